//! 应用入口 - 持有数据库与导出器，装配各层并执行命令

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::browser::CdpConnector;
use crate::clients::BitBrowserClient;
use crate::config::Config;
use crate::dashboard::{self, DashboardState};
use crate::error::AppError;
use crate::models::{load_accounts, load_cards, load_proxies, AccountStatus};
use crate::orchestrator::{BatchReport, CardPool, Orchestrator, ProxyPool};
use crate::services::{totp, CachedTranslator, Classifier, LlmTranslator};
use crate::storage::{migrate_legacy_files, Exporter, MigrationReport, Store, SyncReport};
use crate::utils::logging::init_log_file;
use crate::workflow::{AccountFlow, SessionDriver};

/// 导入结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub existing: usize,
    pub skipped_lines: usize,
}

/// 应用主结构
pub struct App {
    config: Config,
    store: Store,
    exporter: Arc<Exporter>,
}

impl App {
    /// 打开数据库；数据库不可用对整个运行致命
    pub fn initialize(config: Config) -> Result<Self> {
        let store = Store::open(Path::new(&config.db_path))
            .with_context(|| format!("无法打开数据库 {}", config.db_path))?;
        let exporter = Arc::new(Exporter::new(store.clone(), &config.export_dir));
        Ok(Self {
            config,
            store,
            exporter,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// 把账号文件导入数据库（已存在的账号不覆盖）
    pub async fn import(&self, path: Option<&Path>) -> Result<ImportSummary> {
        let path = path.unwrap_or_else(|| Path::new(&self.config.accounts_file));
        if !path.exists() {
            return Err(AppError::missing_file(path.display().to_string()).into());
        }

        let report = load_accounts(path).await?;
        let mut summary = ImportSummary {
            skipped_lines: report.errors.len(),
            ..Default::default()
        };
        for account in &report.items {
            if self.store.import(account).await? {
                summary.inserted += 1;
            } else {
                summary.existing += 1;
            }
        }
        info!(
            "✓ 导入完成: 新增 {}，已存在 {}，跳过 {} 行",
            summary.inserted, summary.existing, summary.skipped_lines
        );
        self.sync().await?;
        Ok(summary)
    }

    /// 处理数据库中的账号，直到完成或收到 Ctrl+C
    pub async fn run(&self, with_dashboard: bool) -> Result<BatchReport> {
        init_log_file(&self.config.output_log_file)?;

        let accounts = self.store.read_all().await?;
        if accounts.is_empty() {
            warn!("⚠️ 数据库中没有账号，请先执行 import");
            return Ok(BatchReport::default());
        }

        let orchestrator = Orchestrator::new(
            &self.config,
            Arc::new(self.build_flow().await?),
            self.store.clone(),
            self.exporter.clone(),
            Arc::new(self.load_proxy_pool().await?),
        );

        let dashboard_task = if with_dashboard {
            let listener = dashboard::bind_listener(self.config.dashboard_port)
                .await
                .with_context(|| format!("无法监听端口 {}", self.config.dashboard_port))?;
            let state = self.dashboard_state();
            Some(tokio::spawn(async move {
                dashboard::serve(listener, state, std::future::pending::<()>()).await
            }))
        } else {
            None
        };

        let mut handle = orchestrator.start(accounts);
        let report = tokio::select! {
            report = &mut handle => report.context("批处理任务异常退出")?,
            _ = tokio::signal::ctrl_c() => {
                orchestrator.stop();
                handle.await.context("批处理任务异常退出")?
            }
        };

        if let Some(task) = dashboard_task {
            task.abort();
        }
        Ok(report)
    }

    /// 只运行看板，直到 Ctrl+C
    pub async fn serve(&self) -> Result<()> {
        let listener = dashboard::bind_listener(self.config.dashboard_port)
            .await
            .with_context(|| format!("无法监听端口 {}", self.config.dashboard_port))?;
        dashboard::serve(listener, self.dashboard_state(), async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
        Ok(())
    }

    pub async fn sync(&self) -> Result<SyncReport> {
        Ok(self.exporter.sync_all().await?)
    }

    /// 从旧版分类文件导入账号状态，完成后重建分类文件
    ///
    /// 目录默认为导出目录。
    pub async fn migrate(&self, dir: Option<&Path>) -> Result<MigrationReport> {
        let dir = dir.unwrap_or_else(|| Path::new(&self.config.export_dir));
        if !dir.is_dir() {
            return Err(AppError::missing_file(dir.display().to_string()).into());
        }

        let report = migrate_legacy_files(&self.store, dir).await?;
        info!(
            "✓ 迁移完成: {} 个账号，跳过 {} 行",
            report.total(),
            report.skipped_lines
        );
        self.sync().await?;
        Ok(report)
    }

    /// 当前所有 2FA 验证码：`(email, code)`
    pub async fn codes(&self) -> Result<Vec<(String, String)>> {
        let mut codes = Vec::new();
        for account in self.store.read_all().await? {
            let Some(secret) = account.secret.as_deref().filter(|s| !s.trim().is_empty()) else {
                continue;
            };
            match totp::current_code(secret) {
                Ok(code) => codes.push((account.email.clone(), code)),
                Err(e) => warn!("⚠️ {} 的 2FA 密钥无效: {}", account.email, e),
            }
        }
        Ok(codes)
    }

    /// 把账号重置为 pending：指定邮箱，或某个状态下的全部账号
    pub async fn reset(&self, emails: &[String], status: Option<AccountStatus>) -> Result<usize> {
        let mut count = self.store.reset(emails).await?;
        if let Some(status) = status {
            count += self.store.reset_status(status).await?;
        }
        info!("✓ 已将 {} 个账号重置为 pending", count);
        self.sync().await?;
        Ok(count)
    }

    fn dashboard_state(&self) -> DashboardState {
        DashboardState {
            store: self.store.clone(),
            exporter: self.exporter.clone(),
        }
    }

    async fn load_proxy_pool(&self) -> Result<ProxyPool> {
        let report = load_proxies(Path::new(&self.config.proxies_file)).await?;
        Ok(ProxyPool::new(report.items))
    }

    async fn build_flow(&self) -> Result<AccountFlow> {
        let cards_path = Path::new(&self.config.cards_file);
        let cards = load_cards(cards_path).await?;
        let card_pool = CardPool::new(
            cards.items,
            self.config.uses_per_card,
            Some(cards_path.to_path_buf()),
        );

        let driver = SessionDriver::new(
            &self.config,
            Arc::new(BitBrowserClient::new(&self.config)?),
            Arc::new(CdpConnector),
        );

        let mut classifier = Classifier::from_config(&self.config);
        match LlmTranslator::from_config(&self.config) {
            Some(llm) => {
                classifier =
                    classifier.with_translator(Arc::new(CachedTranslator::new(Arc::new(llm))));
            }
            None => info!("未配置 LLM_API_KEY，未覆盖的语言将无法翻译"),
        }

        Ok(AccountFlow::new(
            &self.config,
            driver,
            classifier,
            Arc::new(card_pool),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, Verdict};

    fn app(dir: &Path) -> App {
        let config = Config {
            db_path: dir.join("accounts.db").display().to_string(),
            export_dir: dir.join("out").display().to_string(),
            accounts_file: dir.join("accounts.txt").display().to_string(),
            ..Config::default()
        };
        App::initialize(config).unwrap()
    }

    #[tokio::test]
    async fn test_import_is_insert_if_absent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("accounts.txt"),
            "# comment\na@example.com----pa\nbroken-line\nb@example.com----pb----r@example.com----JBSWY3DPEHPK3PXP\n",
        )
        .unwrap();
        let app = app(dir.path());

        let first = app.import(None).await.unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.skipped_lines, 1);

        let second = app.import(None).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.existing, 2);

        let codes = app.codes().await.unwrap();
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].0, "b@example.com");
        assert!(dir.path().join("out").join("2fa_codes.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_accounts_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let err = app.import(None).await.unwrap_err();
        assert!(err.to_string().contains("accounts.txt"));
    }

    #[tokio::test]
    async fn test_migrate_from_export_dir_then_sync() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(
            out.join("sheerIDlink.txt"),
            "https://services.sheerid.com/verify/x----a@example.com----pa\n",
        )
        .unwrap();
        std::fs::write(out.join("error.txt"), "b@example.com----pb\n").unwrap();
        let app = app(dir.path());

        let report = app.migrate(None).await.unwrap();

        assert_eq!(report.total(), 2);
        let a = app.store().get("a@example.com").await.unwrap().unwrap();
        assert_eq!(a.status, AccountStatus::LinkReady);
        let pending = std::fs::read_to_string(out.join("eligible_pending.txt")).unwrap();
        assert_eq!(pending, "a@example.com----pa\n");
        let errors = std::fs::read_to_string(out.join("error.txt")).unwrap();
        assert_eq!(errors, "b@example.com----pb\n");
    }

    #[tokio::test]
    async fn test_reset_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let mut account = Account::new("a@example.com", "pw");
        app.store().import(&account).await.unwrap();
        account.apply(&Verdict::error("timeout"));
        app.store().upsert(&account).await.unwrap();

        let count = app.reset(&[], Some(AccountStatus::Error)).await.unwrap();

        assert_eq!(count, 1);
        let stored = app.store().get("a@example.com").await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Pending);
        assert!(stored.message.is_none());
    }
}
