use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;

use super::{content_lines, LoadReport};
use crate::error::LoadError;
use crate::models::Proxy;

/// 从代理文件加载代理池；文件不存在时返回空池（不使用代理）
pub async fn load_proxies(path: &Path) -> Result<LoadReport<Proxy>> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        tracing::info!("未找到代理文件 {}，不使用代理", path.display());
        return Ok(LoadReport::default());
    }

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取代理文件: {}", path.display()))?;

    let report = parse_proxies(&content);
    tracing::info!("✓ 加载 {} 个代理", report.items.len());
    Ok(report)
}

/// 每行一个 `scheme://[user:pass@]host:port`
pub fn parse_proxies(content: &str) -> LoadReport<Proxy> {
    let mut report = LoadReport::default();
    for (line_no, line) in content_lines(content) {
        match line.parse::<Proxy>() {
            Ok(proxy) => {
                tracing::debug!("  代理: {}", proxy.redacted());
                report.items.push(proxy);
            }
            Err(value) => report.skip(LoadError::InvalidProxy {
                line: line_no,
                value,
            }),
        }
    }
    report
}
