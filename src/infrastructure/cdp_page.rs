//! chromiumoxide 实现的 [`PageHandle`]

use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::Browser;
use serde::Deserialize;
use tokio::task::JoinHandle;

use super::js_executor::{js_str, JsExecutor};
use super::page::{FrameInfo, FramePath, FrameSnapshot, PageHandle};

/// 通过 CDP 连接的真实页面
///
/// 持有 Browser 连接和事件处理任务，drop 时断开 CDP 连接（不关闭窗口本身）。
pub struct CdpPage {
    executor: JsExecutor,
    _browser: Browser,
    handler_task: JoinHandle<()>,
}

impl CdpPage {
    pub fn new(executor: JsExecutor, browser: Browser, handler_task: JoinHandle<()>) -> Self {
        Self {
            executor,
            _browser: browser,
            handler_task,
        }
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

#[derive(Deserialize)]
struct RawFrame {
    index: usize,
    #[serde(default)]
    src: String,
    #[serde(default)]
    name: String,
}

#[async_trait]
impl PageHandle for CdpPage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.executor.page().goto(url).await?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.executor.page().reload().await?;
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.executor.page().url().await?.unwrap_or_default())
    }

    async fn snapshot(&self, frame: &FramePath) -> Result<Option<FrameSnapshot>> {
        let body = r#"return {
        text: (doc.body && doc.body.innerText) || '',
        html: doc.documentElement ? doc.documentElement.outerHTML : '',
        url: doc.location ? doc.location.href : '',
        lang: (doc.documentElement && doc.documentElement.lang) || ''
    };"#;
        self.executor.eval_in_frame(frame, body).await
    }

    async fn child_frames(&self, frame: &FramePath) -> Result<Vec<FrameInfo>> {
        let body = r#"return Array.from(doc.querySelectorAll('iframe')).map((f, i) => ({
        index: i,
        src: f.getAttribute('src') || '',
        name: f.getAttribute('name') || f.id || ''
    }));"#;
        let raw: Option<Vec<RawFrame>> = self.executor.eval_in_frame(frame, body).await?;
        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .map(|f| FrameInfo {
                path: frame.child(f.index),
                src: f.src,
                name: f.name,
            })
            .collect())
    }

    async fn count(&self, frame: &FramePath, selector: &str) -> Result<usize> {
        let body = format!(
            "try {{ return doc.querySelectorAll({}).length; }} catch (e) {{ return 0; }}",
            js_str(selector)
        );
        let count: Option<usize> = self.executor.eval_in_frame(frame, &body).await?;
        Ok(count.unwrap_or(0))
    }

    async fn click(&self, frame: &FramePath, selector: &str) -> Result<bool> {
        let body = format!(
            r#"const el = doc.querySelector({});
    if (!el) return false;
    el.scrollIntoView({{ block: 'center' }});
    el.click();
    return true;"#,
            js_str(selector)
        );
        let clicked: Option<bool> = self.executor.eval_in_frame(frame, &body).await?;
        Ok(clicked.unwrap_or(false))
    }

    async fn has_text(&self, frame: &FramePath, selector: &str, texts: &[&str]) -> Result<bool> {
        let body = format!(
            "{}\n    return !!el;",
            find_by_text(selector, texts)?
        );
        let found: Option<bool> = self.executor.eval_in_frame(frame, &body).await?;
        Ok(found.unwrap_or(false))
    }

    async fn click_text(&self, frame: &FramePath, selector: &str, texts: &[&str]) -> Result<bool> {
        let body = format!(
            r#"{}
    if (!el) return false;
    el.scrollIntoView({{ block: 'center' }});
    el.click();
    return true;"#,
            find_by_text(selector, texts)?
        );
        let clicked: Option<bool> = self.executor.eval_in_frame(frame, &body).await?;
        Ok(clicked.unwrap_or(false))
    }

    async fn fill(&self, frame: &FramePath, selector: &str, nth: usize, value: &str) -> Result<bool> {
        let body = format!(
            r#"const el = doc.querySelectorAll({})[{}];
    if (!el) return false;
    el.focus();
    const proto = Object.getPrototypeOf(el);
    const desc = Object.getOwnPropertyDescriptor(proto, 'value');
    if (desc && desc.set) {{ desc.set.call(el, {}); }} else {{ el.value = {}; }}
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return true;"#,
            js_str(selector),
            nth,
            js_str(value),
            js_str(value)
        );
        let filled: Option<bool> = self.executor.eval_in_frame(frame, &body).await?;
        Ok(filled.unwrap_or(false))
    }
}

/// 生成 `const el = ...`：第一个匹配选择器且文本包含任一关键词的元素
fn find_by_text(selector: &str, texts: &[&str]) -> Result<String> {
    let needles: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();
    Ok(format!(
        r#"const needles = {};
    const el = Array.from(doc.querySelectorAll({})).find(e => {{
        const t = (e.innerText || e.textContent || e.value || '').toLowerCase();
        return needles.some(n => t.includes(n));
    }});"#,
        serde_json::to_string(&needles)?,
        js_str(selector)
    ))
}
