//! 单元测试用的脚本化页面
//!
//! 元素按"它能匹配哪些选择器"声明，选择器做精确字符串比较；
//! 点击 / 导航 / 轮询次数可以挂钩子修改页面，用来模拟异步渲染和跳转。

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::page::{FrameInfo, FramePath, FrameSnapshot, PageHandle};

type Hook = Box<dyn FnMut(&mut FakeFrame) + Send>;

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub id: String,
    pub selectors: Vec<String>,
    pub text: String,
    pub value: String,
}

impl FakeElement {
    pub fn new(id: &str, selectors: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    fn matches(&self, selector: &str) -> bool {
        self.selectors.iter().any(|s| s == selector)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeFrame {
    pub text: String,
    pub html: String,
    pub lang: String,
    pub src: String,
    pub elements: Vec<FakeElement>,
    pub children: Vec<FakeFrame>,
}

impl FakeFrame {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn with_html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    pub fn with_lang(mut self, lang: &str) -> Self {
        self.lang = lang.to_string();
        self
    }

    pub fn with_src(mut self, src: &str) -> Self {
        self.src = src.to_string();
        self
    }

    pub fn with_element(mut self, element: FakeElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_child(mut self, child: FakeFrame) -> Self {
        self.children.push(child);
        self
    }

    fn at(&self, path: &FramePath) -> Option<&FakeFrame> {
        path.indices()
            .iter()
            .try_fold(self, |frame, idx| frame.children.get(*idx))
    }

    fn at_mut(&mut self, path: &FramePath) -> Option<&mut FakeFrame> {
        path.indices()
            .iter()
            .try_fold(self, |frame, idx| frame.children.get_mut(*idx))
    }
}

struct FakeState {
    root: FakeFrame,
    url: String,
    goto_error: Option<String>,
    click_hooks: HashMap<String, Hook>,
    goto_hook: Option<Hook>,
    timed_hooks: Vec<(usize, Hook)>,
    snapshots: usize,
    events: Vec<String>,
}

/// 按脚本响应的假页面
pub struct ScriptedPage {
    state: Mutex<FakeState>,
}

impl ScriptedPage {
    pub fn new(root: FakeFrame) -> Self {
        Self {
            state: Mutex::new(FakeState {
                root,
                url: "about:blank".to_string(),
                goto_error: None,
                click_hooks: HashMap::new(),
                goto_hook: None,
                timed_hooks: Vec::new(),
                snapshots: 0,
                events: Vec::new(),
            }),
        }
    }

    pub fn with_url(self, url: &str) -> Self {
        self.lock().url = url.to_string();
        self
    }

    /// 导航时返回错误
    pub fn failing_goto(self, message: &str) -> Self {
        self.lock().goto_error = Some(message.to_string());
        self
    }

    /// 点击 `id` 元素后修改页面
    pub fn on_click(self, id: &str, hook: impl FnMut(&mut FakeFrame) + Send + 'static) -> Self {
        self.lock().click_hooks.insert(id.to_string(), Box::new(hook));
        self
    }

    pub fn on_goto(self, hook: impl FnMut(&mut FakeFrame) + Send + 'static) -> Self {
        self.lock().goto_hook = Some(Box::new(hook));
        self
    }

    /// 顶层快照被读取 `n` 次后修改页面
    pub fn after_snapshots(self, n: usize, hook: impl FnMut(&mut FakeFrame) + Send + 'static) -> Self {
        self.lock().timed_hooks.push((n, Box::new(hook)));
        self
    }

    /// 按顺序记录的交互：`goto:URL`、`reload`、`click:ID`、`fill:ID=VALUE`
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    pub fn clicked(&self, id: &str) -> bool {
        self.events().iter().any(|e| e == &format!("click:{}", id))
    }

    pub fn filled_value(&self, id: &str) -> Option<String> {
        let prefix = format!("fill:{}=", id);
        self.events()
            .iter()
            .rev()
            .find_map(|e| e.strip_prefix(&prefix).map(str::to_string))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FakeState {
    fn click_element(&mut self, frame: &FramePath, pick: impl Fn(&FakeElement) -> bool) -> bool {
        let id = match self
            .root
            .at(frame)
            .and_then(|f| f.elements.iter().find(|e| pick(e)))
        {
            Some(el) => el.id.clone(),
            None => return false,
        };
        self.events.push(format!("click:{}", id));
        if let Some(hook) = self.click_hooks.get_mut(&id) {
            hook(&mut self.root);
        }
        true
    }
}

fn text_match(element: &FakeElement, selector: &str, texts: &[&str]) -> bool {
    let text = element.text.to_lowercase();
    element.matches(selector) && texts.iter().any(|n| text.contains(&n.to_lowercase()))
}

#[async_trait]
impl PageHandle for ScriptedPage {
    async fn goto(&self, url: &str) -> Result<()> {
        let mut state = self.lock();
        state.events.push(format!("goto:{}", url));
        if let Some(message) = state.goto_error.clone() {
            return Err(anyhow!(message));
        }
        state.url = url.to_string();
        let FakeState { root, goto_hook, .. } = &mut *state;
        if let Some(hook) = goto_hook {
            hook(root);
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.lock().events.push("reload".to_string());
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.lock().url.clone())
    }

    async fn snapshot(&self, frame: &FramePath) -> Result<Option<FrameSnapshot>> {
        let mut state = self.lock();
        if frame.depth() == 0 {
            state.snapshots += 1;
            let count = state.snapshots;
            let FakeState {
                root, timed_hooks, ..
            } = &mut *state;
            for (at, hook) in timed_hooks.iter_mut() {
                if *at == count {
                    hook(&mut *root);
                }
            }
        }
        let url = state.url.clone();
        Ok(state.root.at(frame).map(|f| FrameSnapshot {
            text: f.text.clone(),
            html: if f.html.is_empty() {
                f.text.clone()
            } else {
                f.html.clone()
            },
            url: if frame.depth() == 0 { url } else { f.src.clone() },
            lang: f.lang.clone(),
        }))
    }

    async fn child_frames(&self, frame: &FramePath) -> Result<Vec<FrameInfo>> {
        let state = self.lock();
        Ok(state
            .root
            .at(frame)
            .map(|f| {
                f.children
                    .iter()
                    .enumerate()
                    .map(|(idx, child)| FrameInfo {
                        path: frame.child(idx),
                        src: child.src.clone(),
                        name: String::new(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, frame: &FramePath, selector: &str) -> Result<usize> {
        let state = self.lock();
        Ok(state
            .root
            .at(frame)
            .map(|f| f.elements.iter().filter(|e| e.matches(selector)).count())
            .unwrap_or(0))
    }

    async fn click(&self, frame: &FramePath, selector: &str) -> Result<bool> {
        Ok(self.lock().click_element(frame, |e| e.matches(selector)))
    }

    async fn has_text(&self, frame: &FramePath, selector: &str, texts: &[&str]) -> Result<bool> {
        let state = self.lock();
        Ok(state
            .root
            .at(frame)
            .map(|f| f.elements.iter().any(|e| text_match(e, selector, texts)))
            .unwrap_or(false))
    }

    async fn click_text(&self, frame: &FramePath, selector: &str, texts: &[&str]) -> Result<bool> {
        Ok(self
            .lock()
            .click_element(frame, |e| text_match(e, selector, texts)))
    }

    async fn fill(&self, frame: &FramePath, selector: &str, nth: usize, value: &str) -> Result<bool> {
        let mut state = self.lock();
        let id = match state.root.at_mut(frame).and_then(|f| {
            f.elements
                .iter_mut()
                .filter(|e| e.matches(selector))
                .nth(nth)
        }) {
            Some(el) => {
                el.value = value.to_string();
                el.id.clone()
            }
            None => return Ok(false),
        };
        state.events.push(format!("fill:{}={}", id, value));
        Ok(true)
    }
}
