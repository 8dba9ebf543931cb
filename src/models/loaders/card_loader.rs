use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;

use super::{content_lines, LoadReport};
use crate::error::LoadError;
use crate::models::Card;

/// 从卡片文件加载卡片；文件不存在时返回空列表
pub async fn load_cards(path: &Path) -> Result<LoadReport<Card>> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        tracing::info!("未找到卡片文件 {}，不执行绑卡", path.display());
        return Ok(LoadReport::default());
    }

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取卡片文件: {}", path.display()))?;

    let report = parse_cards(&content);
    tracing::info!("✓ 加载 {} 张卡片", report.items.len());
    Ok(report)
}

/// 每行 `卡号 月 年 CVV`，空格分隔
pub fn parse_cards(content: &str) -> LoadReport<Card> {
    let mut report = LoadReport::default();
    for (line_no, line) in content_lines(content) {
        match Card::parse_line(line) {
            Ok(card) => report.items.push(card),
            Err(reason) => report.skip(LoadError::InvalidCard {
                line: line_no,
                reason,
            }),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cards_skips_invalid() {
        let content = "5481087170529907 01 32 536\n# spare\n4111111111111111 13 30 123\n4000056655665556 12 29 1234\n";
        let report = parse_cards(content);
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.items[1].cvv, "1234");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].line(), 3);
    }
}
