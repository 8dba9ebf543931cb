use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::fs;

use super::{content_lines, LoadReport};
use crate::error::LoadError;
use crate::models::Account;

/// 默认分隔符
pub const DEFAULT_SEPARATOR: &str = "----";

static SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^separator\s*=\s*["'](.+?)["']"#).expect("separator regex is valid")
});

/// 从账号文件加载账号（状态均为 pending）
pub async fn load_accounts(path: &Path) -> Result<LoadReport<Account>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取账号文件: {}", path.display()))?;

    let report = parse_accounts(&content);
    tracing::info!(
        "✓ 从 {} 读取 {} 个账号 (跳过 {} 行)",
        path.display(),
        report.items.len(),
        report.errors.len()
    );
    Ok(report)
}

/// 读取文件头部声明的分隔符：`separator="----"`
///
/// 只在第一条数据行之前查找，找不到时返回 `----`。
pub fn detect_separator(content: &str) -> String {
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(caps) = SEPARATOR_RE.captures(line) {
            return caps[1].to_string();
        }
        break;
    }
    DEFAULT_SEPARATOR.to_string()
}

/// 解析账号文件内容
///
/// 每行：`邮箱 SEP 密码 [SEP 辅助邮箱] [SEP 2FA密钥]`。行内的 `#` 不视为注释，
/// 因为密码里可能包含 `#`。同一邮箱重复出现时保留第一条。
pub fn parse_accounts(content: &str) -> LoadReport<Account> {
    let separator = detect_separator(content);
    let mut report = LoadReport::default();
    let mut seen = HashSet::new();

    for (line_no, line) in content_lines(content) {
        if SEPARATOR_RE.is_match(line) {
            continue;
        }
        match parse_account_line(line, &separator, line_no) {
            Ok(account) => {
                if seen.insert(account.email.to_lowercase()) {
                    report.items.push(account);
                } else {
                    tracing::warn!("⚠️ 第 {} 行: 邮箱重复，已忽略: {}", line_no, account.email);
                }
            }
            Err(err) => report.skip(err),
        }
    }

    report
}

/// 解析单行账号
pub fn parse_account_line(line: &str, separator: &str, line_no: usize) -> Result<Account, LoadError> {
    let parts: Vec<&str> = line
        .split(separator)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if parts.len() < 2 {
        return Err(LoadError::MissingFields { line: line_no });
    }

    let email = parts[0];
    if !looks_like_email(email) {
        return Err(LoadError::InvalidEmail {
            line: line_no,
            value: email.to_string(),
        });
    }

    let mut account = Account::new(email, parts[1]);
    if let Some(rec) = parts.get(2) {
        account = account.with_recovery_email(*rec);
    }
    if let Some(secret) = parts.get(3) {
        account = account.with_secret(*secret);
    }
    Ok(account)
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !s.contains(' '),
        None => false,
    }
}
