//! 页面能力抽象 - 基础设施层
//!
//! 自动化引擎被视为黑盒，只暴露：导航、定位元素 / iframe、读文本、填写、点击。
//! 上层（分类器、绑卡、登录）只依赖 [`PageHandle`]，不直接接触 chromiumoxide。

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{sleep, Instant};

/// iframe 路径：从顶层文档开始，逐层按 iframe 下标定位
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FramePath(Vec<usize>);

impl FramePath {
    /// 顶层文档
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, index: usize) -> Self {
        let mut path = self.0.clone();
        path.push(index);
        Self(path)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }
}

impl fmt::Display for FramePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("top");
        }
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "top/{}", parts.join("/"))
    }
}

/// 某个文档（顶层或 iframe）的一次快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FrameSnapshot {
    /// 可见文本
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub url: String,
    /// `<html lang>` 声明
    #[serde(default)]
    pub lang: String,
}

/// 子 iframe 的描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub path: FramePath,
    pub src: String,
    pub name: String,
}

/// 一个活动页面
///
/// 所有带 `frame` 参数的方法在 iframe 不可达（跨域、已卸载）时
/// 返回空值 / `false` 而不是错误。
#[async_trait]
pub trait PageHandle: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    async fn reload(&self) -> Result<()>;

    async fn url(&self) -> Result<String>;

    async fn snapshot(&self, frame: &FramePath) -> Result<Option<FrameSnapshot>>;

    async fn child_frames(&self, frame: &FramePath) -> Result<Vec<FrameInfo>>;

    async fn count(&self, frame: &FramePath, selector: &str) -> Result<usize>;

    /// 点击第一个匹配元素
    async fn click(&self, frame: &FramePath, selector: &str) -> Result<bool>;

    /// 是否存在匹配 `selector` 且文本包含任一 `texts`（不区分大小写）的元素
    async fn has_text(&self, frame: &FramePath, selector: &str, texts: &[&str]) -> Result<bool>;

    /// 点击第一个匹配 `selector` 且文本包含任一 `texts`（不区分大小写）的元素
    async fn click_text(&self, frame: &FramePath, selector: &str, texts: &[&str]) -> Result<bool>;

    /// 填写第 `nth` 个匹配的输入框
    async fn fill(&self, frame: &FramePath, selector: &str, nth: usize, value: &str) -> Result<bool>;
}

/// 在 `timeout` 内轮询等待选择器出现
pub async fn wait_for_selector(
    page: &dyn PageHandle,
    frame: &FramePath,
    selector: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if page.count(frame, selector).await? > 0 {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        sleep(interval).await;
    }
}

/// 在 `timeout` 内等待任一选择器出现，返回命中的选择器
pub async fn wait_for_any<'a>(
    page: &dyn PageHandle,
    frame: &FramePath,
    selectors: &[&'a str],
    timeout: Duration,
    interval: Duration,
) -> Result<Option<&'a str>> {
    let deadline = Instant::now() + timeout;
    loop {
        for selector in selectors {
            if page.count(frame, selector).await? > 0 {
                return Ok(Some(*selector));
            }
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        sleep(interval).await;
    }
}

/// 广度优先列出 `max_depth` 层以内的所有文档（含顶层）
pub async fn frame_tree(page: &dyn PageHandle, max_depth: usize) -> Result<Vec<FrameInfo>> {
    let mut found = vec![FrameInfo {
        path: FramePath::root(),
        src: String::new(),
        name: String::new(),
    }];
    let mut cursor = 0;
    while cursor < found.len() {
        let path = found[cursor].path.clone();
        cursor += 1;
        if path.depth() >= max_depth {
            continue;
        }
        found.extend(page.child_frames(&path).await?);
    }
    Ok(found)
}
