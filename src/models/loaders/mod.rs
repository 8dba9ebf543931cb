//! 输入文件加载
//!
//! 三种纯文本输入：账号、代理、卡片。格式错误的行跳过并告警，不中断加载；
//! 只有文件本身不存在 / 不可读才返回错误。

pub mod account_loader;
pub mod card_loader;
pub mod proxy_loader;

use crate::error::LoadError;

pub use account_loader::{load_accounts, parse_accounts};
pub use card_loader::{load_cards, parse_cards};
pub use proxy_loader::{load_proxies, parse_proxies};

/// 加载结果：有效记录 + 被跳过的行
#[derive(Debug)]
pub struct LoadReport<T> {
    pub items: Vec<T>,
    pub errors: Vec<LoadError>,
}

impl<T> Default for LoadReport<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> LoadReport<T> {
    fn skip(&mut self, err: LoadError) {
        tracing::warn!("⚠️ 跳过无效行: {}", err);
        self.errors.push(err);
    }
}

/// 去掉空行和 `#` 注释行，保留原始行号（从 1 开始）
pub(crate) fn content_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}
