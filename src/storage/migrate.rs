//! 旧版分类文件迁移
//!
//! 一次性把已有的分类文本文件导入账号库，用于从纯文本工作方式切换过来。
//! 与导出方向相反，只在操作员执行 `migrate` 时运行，平时文件仍由库派生。
//!
//! - `sheerIDlink.txt` 行首可带验证链接：`链接----邮箱----密码...`
//! - `eligible_pending.txt` 只补充库中没有的账号（pending），不覆盖已有状态
//! - 其余文件按文件名对应状态写库

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::export::{
    ELIGIBLE_PENDING_FILE, ERROR_FILE, FIELD_SEPARATOR, INELIGIBLE_FILE, LINK_FILE,
    SUBSCRIBED_FILE, VERIFIED_NO_CARD_FILE,
};
use super::store::Store;
use crate::error::LoadError;
use crate::models::loaders::account_loader::parse_account_line;
use crate::models::loaders::content_lines;
use crate::models::{Account, AccountStatus, Verdict};

/// 早期版本的"已验证未绑卡"文件名
pub const LEGACY_VERIFIED_FILE: &str = "verified_unbound.txt";

/// 迁移顺序：(文件名, 备用文件名, 状态)
const SOURCES: &[(&str, Option<&str>, AccountStatus)] = &[
    (LINK_FILE, None, AccountStatus::LinkReady),
    (VERIFIED_NO_CARD_FILE, Some(LEGACY_VERIFIED_FILE), AccountStatus::Verified),
    (SUBSCRIBED_FILE, None, AccountStatus::Subscribed),
    (INELIGIBLE_FILE, None, AccountStatus::Ineligible),
    (ERROR_FILE, None, AccountStatus::Error),
    (ELIGIBLE_PENDING_FILE, None, AccountStatus::Pending),
];

/// 迁移结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// 每个已读取的文件：(文件名, 写入的账号数)
    pub files: Vec<(String, usize)>,
    pub skipped_lines: usize,
}

impl MigrationReport {
    pub fn total(&self) -> usize {
        self.files.iter().map(|(_, n)| n).sum()
    }
}

/// 解析分类文件中的一行：可选的链接前缀 + 账号行
pub fn parse_status_line(line: &str, line_no: usize) -> Result<(Account, Option<String>), LoadError> {
    match line.split_once(FIELD_SEPARATOR) {
        Some((head, rest)) if head.trim().starts_with("http") => {
            let account = parse_account_line(rest, FIELD_SEPARATOR, line_no)?;
            Ok((account, Some(head.trim().to_string())))
        }
        _ => Ok((parse_account_line(line, FIELD_SEPARATOR, line_no)?, None)),
    }
}

/// 从 `dir` 中的分类文件导入账号，不存在的文件跳过
pub async fn migrate_legacy_files(store: &Store, dir: &Path) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    for (name, legacy, status) in SOURCES {
        let mut path = dir.join(name);
        if !path.exists() {
            match legacy.map(|l| dir.join(l)).filter(|p| p.exists()) {
                Some(fallback) => path = fallback,
                None => {
                    debug!("未找到 {}，跳过", name);
                    continue;
                }
            }
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("无法读取 {}", path.display()))?;

        let mut written = 0;
        for (line_no, line) in content_lines(&content) {
            let (mut account, link) = match parse_status_line(line, line_no) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("⚠️ {}: 跳过无效行: {}", path.display(), e);
                    report.skipped_lines += 1;
                    continue;
                }
            };

            if *status == AccountStatus::Pending {
                if store.import(&account).await? {
                    written += 1;
                }
                continue;
            }

            account.apply(&Verdict {
                status: *status,
                payload: link.filter(|_| *status == AccountStatus::LinkReady),
            });
            store.upsert(&account).await?;
            written += 1;
        }

        info!("✓ {} → {}: {} 个账号", path.display(), status, written);
        report.files.push((name.to_string(), written));
    }

    Ok(report)
}
