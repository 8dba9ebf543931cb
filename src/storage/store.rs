//! 账号数据库 - 唯一事实来源
//!
//! SQLite（WAL 模式），`accounts` 以邮箱为主键，`link_checks` 以 (邮箱, 链接) 为主键。
//! 连接由异步互斥锁保护，只在单条语句 / 单个事务期间持有。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::models::{now_timestamp, Account, AccountStatus, LinkCheck, LinkOutcome};

type StoreResult<T> = Result<T, PersistenceError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    email TEXT PRIMARY KEY,
    password TEXT NOT NULL DEFAULT '',
    recovery_email TEXT,
    secret TEXT,
    proxy TEXT,
    profile_id TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    verification_link TEXT,
    message TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_accounts_status ON accounts(status);

CREATE TABLE IF NOT EXISTS link_checks (
    email TEXT NOT NULL,
    link TEXT NOT NULL,
    outcome TEXT NOT NULL,
    message TEXT,
    checked_at TEXT NOT NULL,
    PRIMARY KEY (email, link)
);
"#;

const ACCOUNT_COLUMNS: &str = "email, password, recovery_email, secret, proxy, profile_id, \
     status, verification_link, message, updated_at";

/// 账号库
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// 打开（或创建）数据库文件
    pub fn open(path: &Path) -> StoreResult<Self> {
        let open_err = |source| PersistenceError::Open {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("⚠️ 无法创建数据库目录 {}: {}", parent.display(), e);
                return Err(open_err(rusqlite::Error::InvalidPath(parent.to_path_buf())));
            }
        }

        let conn = Connection::open(path).map_err(open_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(open_err)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(open_err)?;
        debug!("数据库 {} journal_mode={}", path.display(), mode);

        Self::init(conn).map_err(open_err)
    }

    /// 内存数据库（测试和演练用）
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|source| PersistenceError::Open {
            path: ":memory:".to_string(),
            source,
        })?;
        Ok(Self::init(conn)?)
    }

    fn init(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 不存在时插入；返回是否新插入
    pub async fn import(&self, account: &Account) -> StoreResult<bool> {
        check_email(account)?;
        let conn = self.conn.lock().await;
        let verdict = account.verdict();
        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO accounts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                ACCOUNT_COLUMNS
            ),
            params![
                account.email,
                account.password,
                account.recovery_email,
                account.secret,
                account.proxy,
                account.profile_id,
                account.status.as_str(),
                verdict.link(),
                verdict.reason(),
                account.updated_at,
            ],
        )?;
        Ok(inserted == 1)
    }

    /// 插入或更新账号状态（单个事务）
    ///
    /// 凭据字段只在新值非空时覆盖。若账号此前为 `link_ready`，
    /// 同一事务内记录该链接的验证结果。
    pub async fn upsert(&self, account: &Account) -> StoreResult<()> {
        check_email(account)?;
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let previous: Option<(String, Option<String>)> = tx
            .query_row(
                "SELECT status, verification_link FROM accounts WHERE email = ?1",
                params![account.email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let verdict = account.verdict();
        tx.execute(
            &format!(
                "INSERT INTO accounts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(email) DO UPDATE SET
                    password = CASE WHEN excluded.password <> '' THEN excluded.password ELSE accounts.password END,
                    recovery_email = COALESCE(NULLIF(excluded.recovery_email, ''), accounts.recovery_email),
                    secret = COALESCE(NULLIF(excluded.secret, ''), accounts.secret),
                    proxy = COALESCE(NULLIF(excluded.proxy, ''), accounts.proxy),
                    profile_id = COALESCE(NULLIF(excluded.profile_id, ''), accounts.profile_id),
                    status = excluded.status,
                    verification_link = excluded.verification_link,
                    message = excluded.message,
                    updated_at = excluded.updated_at",
                ACCOUNT_COLUMNS
            ),
            params![
                account.email,
                account.password,
                account.recovery_email,
                account.secret,
                account.proxy,
                account.profile_id,
                account.status.as_str(),
                verdict.link(),
                verdict.reason(),
                account.updated_at,
            ],
        )?;

        if let Some((status, Some(link))) = previous {
            let was_link_ready = status == AccountStatus::LinkReady.as_str();
            if let Some(outcome) = LinkOutcome::after_reclassify(account.status) {
                if was_link_ready {
                    let message = match outcome {
                        LinkOutcome::Success => None,
                        LinkOutcome::Failed => verdict.reason(),
                    };
                    insert_link_check(&tx, &account.email, &link, outcome, message)?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// 所有账号，按导入顺序
    pub async fn read_all(&self) -> StoreResult<Vec<Account>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts ORDER BY rowid",
            ACCOUNT_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], row_to_account)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_account).collect()
    }

    /// 指定状态的账号，按导入顺序
    pub async fn read_by_status(&self, status: AccountStatus) -> StoreResult<Vec<Account>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts WHERE status = ?1 ORDER BY rowid",
            ACCOUNT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![status.as_str()], row_to_account)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_account).collect()
    }

    pub async fn get(&self, email: &str) -> StoreResult<Option<Account>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE email = ?1", ACCOUNT_COLUMNS),
                params![email],
                row_to_account,
            )
            .optional()?;
        row.map(finish_account).transpose()
    }

    /// 记录（或覆盖）一条链接验证结果
    pub async fn record_link_check(
        &self,
        email: &str,
        link: &str,
        outcome: LinkOutcome,
        message: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        insert_link_check(&conn, email, link, outcome, message)
    }

    /// 所有链接验证记录，按首次记录顺序
    pub async fn link_checks(&self) -> StoreResult<Vec<LinkCheck>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT email, link, outcome, message, checked_at FROM link_checks ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(email, link, outcome, message, checked_at)| {
                let outcome = outcome
                    .parse::<LinkOutcome>()
                    .map_err(PersistenceError::UnknownStatus)?;
                Ok(LinkCheck {
                    email,
                    link,
                    outcome,
                    message,
                    checked_at,
                })
            })
            .collect()
    }

    /// 把指定账号重置为 `pending`，返回受影响行数
    pub async fn reset(&self, emails: &[String]) -> StoreResult<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = now_timestamp();
        let mut changed = 0;
        for email in emails {
            changed += tx.execute(
                "UPDATE accounts SET status = 'pending', verification_link = NULL, message = NULL,
                 updated_at = ?2 WHERE email = ?1",
                params![email, now],
            )?;
        }
        tx.commit()?;
        info!("已重置 {} 个账号为 pending", changed);
        Ok(changed)
    }

    /// 把某一状态的全部账号重置为 `pending`
    pub async fn reset_status(&self, status: AccountStatus) -> StoreResult<usize> {
        let emails: Vec<String> = self
            .read_by_status(status)
            .await?
            .into_iter()
            .map(|a| a.email)
            .collect();
        self.reset(&emails).await
    }

    /// 各状态的账号数，按状态枚举顺序，包含 0
    pub async fn count_by_status(&self) -> StoreResult<Vec<(AccountStatus, usize)>> {
        let conn = self.conn.lock().await;
        let mut counts: Vec<(AccountStatus, usize)> =
            AccountStatus::ALL.iter().map(|s| (*s, 0)).collect();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM accounts GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        for (status, n) in rows {
            let status: AccountStatus = status.parse().map_err(PersistenceError::UnknownStatus)?;
            if let Some(entry) = counts.iter_mut().find(|(s, _)| *s == status) {
                entry.1 = n as usize;
            }
        }
        Ok(counts)
    }
}

fn check_email(account: &Account) -> StoreResult<()> {
    if account.email.trim().is_empty() {
        return Err(PersistenceError::EmptyEmail);
    }
    Ok(())
}

fn insert_link_check(
    conn: &Connection,
    email: &str,
    link: &str,
    outcome: LinkOutcome,
    message: Option<&str>,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO link_checks (email, link, outcome, message, checked_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(email, link) DO UPDATE SET
            outcome = excluded.outcome,
            message = excluded.message,
            checked_at = excluded.checked_at",
        params![email, link, outcome.as_str(), message, now_timestamp()],
    )?;
    Ok(())
}

/// 读出一行；状态先保留为原始字符串
fn row_to_account(row: &Row<'_>) -> rusqlite::Result<(Account, String)> {
    let account = Account {
        email: row.get(0)?,
        password: row.get(1)?,
        recovery_email: row.get(2)?,
        secret: row.get(3)?,
        proxy: row.get(4)?,
        profile_id: row.get(5)?,
        status: AccountStatus::Pending,
        verification_link: row.get(7)?,
        message: row.get(8)?,
        updated_at: row.get(9)?,
    };
    Ok((account, row.get(6)?))
}

fn finish_account((mut account, status): (Account, String)) -> StoreResult<Account> {
    account.status = status
        .parse()
        .map_err(PersistenceError::UnknownStatus)?;
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Verdict;

    const LINK: &str = "https://services.sheerid.com/verify/abc";

    fn account(email: &str) -> Account {
        Account::new(email, "pw").with_secret("GEZDGNBVGY3TQOJQ")
    }

    #[tokio::test]
    async fn test_import_is_insert_if_absent() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.import(&account("a@x.com")).await.unwrap());

        let mut changed = account("a@x.com");
        changed.apply(&Verdict::subscribed());
        assert!(!store.import(&changed).await.unwrap());

        let stored = store.get("a@x.com").await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Pending);
    }

    #[tokio::test]
    async fn test_upsert_updates_status_and_keeps_credentials() {
        let store = Store::open_in_memory().unwrap();
        store.import(&account("a@x.com")).await.unwrap();

        let mut update = Account::new("a@x.com", "");
        update.apply(&Verdict::link_ready(LINK));
        store.upsert(&update).await.unwrap();

        let stored = store.get("a@x.com").await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::LinkReady);
        assert_eq!(stored.verification_link.as_deref(), Some(LINK));
        assert_eq!(stored.password, "pw");
        assert_eq!(stored.secret.as_deref(), Some("GEZDGNBVGY3TQOJQ"));
    }

    #[tokio::test]
    async fn test_payload_invariant_is_enforced_on_write() {
        let store = Store::open_in_memory().unwrap();
        let mut acc = account("a@x.com");
        acc.status = AccountStatus::Subscribed;
        acc.verification_link = Some(LINK.to_string());
        acc.message = Some("stale".to_string());
        store.upsert(&acc).await.unwrap();

        let stored = store.get("a@x.com").await.unwrap().unwrap();
        assert!(stored.verification_link.is_none());
        assert!(stored.message.is_none());
    }

    #[tokio::test]
    async fn test_reclassifying_link_ready_records_link_check() {
        let store = Store::open_in_memory().unwrap();
        let mut a = account("a@x.com");
        a.apply(&Verdict::link_ready(LINK));
        store.upsert(&a).await.unwrap();

        // link_ready → link_ready 不记录
        store.upsert(&a).await.unwrap();
        assert!(store.link_checks().await.unwrap().is_empty());

        a.apply(&Verdict::ineligible("not eligible"));
        store.upsert(&a).await.unwrap();

        let checks = store.link_checks().await.unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].outcome, LinkOutcome::Failed);
        assert_eq!(checks[0].message.as_deref(), Some("not eligible"));
        assert_eq!(checks[0].link, LINK);
    }

    #[tokio::test]
    async fn test_reads_follow_insertion_order() {
        let store = Store::open_in_memory().unwrap();
        for email in ["c@x.com", "a@x.com", "b@x.com"] {
            store.import(&account(email)).await.unwrap();
        }
        let mut b = account("b@x.com");
        b.apply(&Verdict::error("timeout"));
        store.upsert(&b).await.unwrap();

        let emails: Vec<String> = store
            .read_all()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.email)
            .collect();
        assert_eq!(emails, vec!["c@x.com", "a@x.com", "b@x.com"]);

        let errors = store.read_by_status(AccountStatus::Error).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_reset_and_counts() {
        let store = Store::open_in_memory().unwrap();
        for email in ["a@x.com", "b@x.com"] {
            let mut acc = account(email);
            acc.apply(&Verdict::ineligible("not eligible"));
            store.upsert(&acc).await.unwrap();
        }

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.len(), AccountStatus::ALL.len());
        assert!(counts.contains(&(AccountStatus::Ineligible, 2)));
        assert!(counts.contains(&(AccountStatus::Pending, 0)));

        let n = store.reset(&["a@x.com".to_string(), "missing@x.com".to_string()]).await.unwrap();
        assert_eq!(n, 1);
        let a = store.get("a@x.com").await.unwrap().unwrap();
        assert_eq!(a.status, AccountStatus::Pending);
        assert!(a.message.is_none());

        assert_eq!(store.reset_status(AccountStatus::Ineligible).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_email_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let err = store.upsert(&Account::new("  ", "pw")).await.unwrap_err();
        assert!(matches!(err, PersistenceError::EmptyEmail));
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("accounts.db");
        {
            let store = Store::open(&path).unwrap();
            store.import(&account("a@x.com")).await.unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.read_all().await.unwrap().len(), 1);
    }
}
