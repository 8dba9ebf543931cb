//! 导出 / 同步
//!
//! 所有文本文件都由数据库派生，从不反向读取。`sync_all` 每次整体重写，
//! 写临时文件后 rename，保证读者看不到半截文件。

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::Store;
use crate::error::ExportError;
use crate::models::{Account, AccountStatus, LinkOutcome};
use crate::services::totp;

/// 字段分隔符
pub const FIELD_SEPARATOR: &str = "----";

/// 可导出的字段
pub const EXPORT_FIELDS: &[&str] = &[
    "email",
    "password",
    "recovery_email",
    "secret",
    "status",
    "verification_link",
    "message",
    "proxy",
    "profile_id",
    "updated_at",
];

pub const LINK_FILE: &str = "sheerIDlink.txt";
pub const ELIGIBLE_PENDING_FILE: &str = "eligible_pending.txt";
pub const VERIFIED_NO_CARD_FILE: &str = "verified_no_card.txt";
pub const SUBSCRIBED_FILE: &str = "subscribed.txt";
pub const INELIGIBLE_FILE: &str = "ineligible.txt";
pub const ERROR_FILE: &str = "error.txt";
pub const VERIFIED_SUCCESS_FILE: &str = "sheerID_verified_success.txt";
pub const VERIFIED_FAILED_FILE: &str = "sheerID_verified_failed.txt";
pub const TOTP_CODES_FILE: &str = "2fa_codes.txt";

/// 导出条件：邮箱 / 状态为 `None` 表示不过滤
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub emails: Option<Vec<String>>,
    #[serde(default)]
    pub statuses: Option<Vec<AccountStatus>>,
    pub fields: Vec<String>,
}

impl ExportQuery {
    pub fn fields(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    fn selects(&self, account: &Account) -> bool {
        let email_ok = self
            .emails
            .as_ref()
            .map_or(true, |emails| emails.iter().any(|e| e == &account.email));
        let status_ok = self
            .statuses
            .as_ref()
            .map_or(true, |statuses| statuses.contains(&account.status));
        email_ok && status_ok
    }
}

/// 一次同步写出的文件及行数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub files: Vec<(String, usize)>,
}

/// 导出器
///
/// 职责：
/// - 按条件导出选定字段
/// - 从数据库重建全部分类文件
/// - 串行化并发的同步请求
pub struct Exporter {
    store: Store,
    dir: PathBuf,
    sync_lock: Mutex<()>,
}

impl Exporter {
    pub fn new(store: Store, dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            dir: dir.into(),
            sync_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 按条件导出，每个账号一行，字段以 `----` 连接，顺序同数据库
    pub async fn export(&self, query: &ExportQuery) -> Result<Vec<u8>, ExportError> {
        validate_fields(&query.fields)?;

        let mut out = String::new();
        for account in self.store.read_all().await? {
            if !query.selects(&account) {
                continue;
            }
            let values: Vec<String> = query
                .fields
                .iter()
                .map(|f| field_value(&account, f))
                .collect();
            out.push_str(&values.join(FIELD_SEPARATOR));
            out.push('\n');
        }
        Ok(out.into_bytes())
    }

    /// 以当前时间重建全部分类文件
    pub async fn sync_all(&self) -> Result<SyncReport, ExportError> {
        let now = totp::unix_now().unwrap_or_default();
        self.sync_all_at(now).await
    }

    /// 以指定时刻（决定 2FA 验证码）重建全部分类文件
    ///
    /// 数据库状态与 30 秒时间窗都相同时，输出逐字节一致。
    pub async fn sync_all_at(&self, unix_secs: u64) -> Result<SyncReport, ExportError> {
        let _guard = self.sync_lock.lock().await;

        let accounts = self.store.read_all().await?;
        let checks = self.store.link_checks().await?;

        let by_status = |status: AccountStatus| -> Vec<String> {
            accounts
                .iter()
                .filter(|a| a.status == status)
                .map(Account::account_line)
                .collect()
        };

        let link_lines: Vec<String> = accounts
            .iter()
            .filter(|a| a.status == AccountStatus::LinkReady)
            .filter_map(|a| {
                a.verification_link
                    .as_deref()
                    .map(|link| format!("{}{}{}", link, FIELD_SEPARATOR, a.account_line()))
            })
            .collect();

        let check_lines = |outcome: LinkOutcome| -> Vec<String> {
            checks
                .iter()
                .filter(|c| c.outcome == outcome)
                .map(|c| c.export_line())
                .collect()
        };

        let code_lines: Vec<String> = accounts
            .iter()
            .filter_map(|a| {
                let secret = a.secret.as_deref().filter(|s| !s.trim().is_empty())?;
                match totp::code_at(secret, unix_secs) {
                    Ok(code) => Some(format!("{}{}{}", code, FIELD_SEPARATOR, secret)),
                    Err(e) => {
                        warn!("⚠️ {} 的 2FA 密钥无效: {}", a.email, e);
                        None
                    }
                }
            })
            .collect();

        let files: Vec<(&str, Vec<String>)> = vec![
            (LINK_FILE, link_lines),
            (ELIGIBLE_PENDING_FILE, by_status(AccountStatus::LinkReady)),
            (VERIFIED_NO_CARD_FILE, by_status(AccountStatus::Verified)),
            (SUBSCRIBED_FILE, by_status(AccountStatus::Subscribed)),
            (INELIGIBLE_FILE, by_status(AccountStatus::Ineligible)),
            (ERROR_FILE, by_status(AccountStatus::Error)),
            (VERIFIED_SUCCESS_FILE, check_lines(LinkOutcome::Success)),
            (VERIFIED_FAILED_FILE, check_lines(LinkOutcome::Failed)),
            (TOTP_CODES_FILE, code_lines),
        ];

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| ExportError::Write {
                path: self.dir.display().to_string(),
                source,
            })?;

        let mut report = SyncReport::default();
        for (name, lines) in files {
            write_atomic(&self.dir.join(name), &lines).await?;
            report.files.push((name.to_string(), lines.len()));
        }

        debug!("同步完成: {:?}", report.files);
        info!("✓ 已同步 {} 个账号到 {}", accounts.len(), self.dir.display());
        Ok(report)
    }
}

fn validate_fields(fields: &[String]) -> Result<(), ExportError> {
    if fields.is_empty() {
        return Err(ExportError::NoFields);
    }
    if let Some(unknown) = fields.iter().find(|f| !EXPORT_FIELDS.contains(&f.as_str())) {
        return Err(ExportError::UnknownField(unknown.clone()));
    }
    Ok(())
}

fn field_value(account: &Account, field: &str) -> String {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    match field {
        "email" => account.email.clone(),
        "password" => account.password.clone(),
        "recovery_email" => opt(&account.recovery_email),
        "secret" => opt(&account.secret),
        "status" => account.status.to_string(),
        "verification_link" => opt(&account.verification_link),
        "message" => opt(&account.message),
        "proxy" => opt(&account.proxy),
        "profile_id" => opt(&account.profile_id),
        "updated_at" => account.updated_at.clone(),
        _ => String::new(),
    }
}

/// 写临时文件后 rename
async fn write_atomic(path: &Path, lines: &[String]) -> Result<(), ExportError> {
    let write_err = |source| ExportError::Write {
        path: path.display().to_string(),
        source,
    };

    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }

    let tmp = path.with_extension("txt.tmp");
    fs::write(&tmp, content.as_bytes()).await.map_err(write_err)?;
    fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Verdict;

    const SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
    const LINK: &str = "https://services.sheerid.com/verify/abc";

    async fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        let mut a = Account::new("a@x.com", "pa").with_secret(SECRET);
        a.apply(&Verdict::link_ready(LINK));
        store.upsert(&a).await.unwrap();

        let mut b = Account::new("b@x.com", "pb").with_recovery_email("rb@x.com");
        b.apply(&Verdict::subscribed());
        store.upsert(&b).await.unwrap();

        let mut c = Account::new("c@x.com", "pc");
        c.apply(&Verdict::error("timeout"));
        store.upsert(&c).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_export_selected_fields_in_store_order() {
        let exporter = Exporter::new(seeded_store().await, ".");
        let query = ExportQuery {
            emails: Some(vec!["c@x.com".into(), "a@x.com".into()]),
            statuses: None,
            fields: vec!["email".into(), "password".into(), "status".into()],
        };
        let out = String::from_utf8(exporter.export(&query).await.unwrap()).unwrap();
        assert_eq!(out, "a@x.com----pa----link_ready\nc@x.com----pc----error\n");
    }

    #[tokio::test]
    async fn test_export_filters_by_status() {
        let exporter = Exporter::new(seeded_store().await, ".");
        let query = ExportQuery {
            statuses: Some(vec![AccountStatus::Subscribed]),
            ..ExportQuery::fields(&["email", "recovery_email"])
        };
        let out = String::from_utf8(exporter.export(&query).await.unwrap()).unwrap();
        assert_eq!(out, "b@x.com----rb@x.com\n");
    }

    #[tokio::test]
    async fn test_export_rejects_bad_fields() {
        let exporter = Exporter::new(seeded_store().await, ".");
        let err = exporter
            .export(&ExportQuery::fields(&["email", "cookie"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::UnknownField(f) if f == "cookie"));

        let err = exporter.export(&ExportQuery::fields(&[])).await.unwrap_err();
        assert!(matches!(err, ExportError::NoFields));
    }

    #[tokio::test]
    async fn test_sync_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store().await;
        let exporter = Exporter::new(store.clone(), dir.path());
        exporter.sync_all_at(59).await.unwrap();

        let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(
            read(LINK_FILE),
            format!("{}----a@x.com----pa----{}\n", LINK, SECRET)
        );
        assert_eq!(read(ELIGIBLE_PENDING_FILE), format!("a@x.com----pa----{}\n", SECRET));
        assert_eq!(read(SUBSCRIBED_FILE), "b@x.com----pb----rb@x.com\n");
        assert_eq!(read(ERROR_FILE), "c@x.com----pc\n");
        assert_eq!(read(INELIGIBLE_FILE), "");
        assert_eq!(read(TOTP_CODES_FILE), format!("287082----{}\n", SECRET));

        // link_ready → subscribed 记为验证成功
        let mut a = store.get("a@x.com").await.unwrap().unwrap();
        a.apply(&Verdict::subscribed());
        store.upsert(&a).await.unwrap();
        exporter.sync_all_at(59).await.unwrap();
        assert_eq!(read(LINK_FILE), "");
        assert_eq!(read(VERIFIED_SUCCESS_FILE), format!("{}----a@x.com | Success\n", LINK));
        assert_eq!(read(VERIFIED_FAILED_FILE), "");
    }

    #[tokio::test]
    async fn test_sync_is_idempotent_within_time_step() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(seeded_store().await, dir.path());

        exporter.sync_all_at(1111111110).await.unwrap();
        let first: Vec<Vec<u8>> = [LINK_FILE, TOTP_CODES_FILE, SUBSCRIBED_FILE]
            .iter()
            .map(|n| std::fs::read(dir.path().join(n)).unwrap())
            .collect();

        exporter.sync_all_at(1111111119).await.unwrap();
        let second: Vec<Vec<u8>> = [LINK_FILE, TOTP_CODES_FILE, SUBSCRIBED_FILE]
            .iter()
            .map(|n| std::fs::read(dir.path().join(n)).unwrap())
            .collect();
        assert_eq!(first, second);

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }
}
