//! 批量账号处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块调度一批账号：限制并发、分配代理、写库、同步导出文件。
//!
//! ## 核心功能
//!
//! 1. **并发控制**：Semaphore 限制同时打开的窗口数，每个账号一个任务
//! 2. **账号独占**：同一邮箱同一时刻只允许一个任务
//! 3. **代理租用**：账号自带代理优先，否则用占用最少的池内代理
//! 4. **持久化**：每个账号处理完立即写库（失败重试），随后同步导出文件
//! 5. **停止**：停止派发新账号，进行中的账号在宽限期后放弃并记为 `cancelled`
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个账号的细节，委托 [`AccountProcessor`]
//! - **失败隔离**：单个账号的任何失败（包括 panic）都不会中断批次，
//!   该账号记为 `error` 并照常写库

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::{Account, AccountStatus, Verdict};
use crate::orchestrator::proxy_pool::ProxyPool;
use crate::storage::{Exporter, Store};
use crate::utils::logging::{log_account_result, log_startup, print_final_stats};
use crate::workflow::{AccountCtx, AccountProcessor};

const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BACKOFF: Duration = Duration::from_millis(500);

/// 批次结束后的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    /// 已派发并结束的账号数
    pub processed: usize,
    /// 已结算状态或重复邮箱而跳过的账号数
    pub skipped: usize,
    /// 停止后未派发的账号数（保持 pending）
    pub not_dispatched: usize,
    /// 宽限期后被放弃的账号数
    pub cancelled: usize,
    /// 写库最终失败的邮箱
    pub persistence_failures: Vec<String>,
    /// 本批次各状态的账号数
    pub by_status: Vec<(AccountStatus, usize)>,
}

impl BatchReport {
    pub fn count(&self, status: AccountStatus) -> usize {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

/// 运行中的进度快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub skipped: usize,
    pub running: usize,
    pub persistence_failures: usize,
    /// 观察到的最大并发任务数
    pub max_running: usize,
    /// 观察到的同一邮箱最大并发数
    pub max_per_email: usize,
    pub stopping: bool,
}

#[derive(Default)]
struct Progress {
    total: AtomicUsize,
    dispatched: AtomicUsize,
    completed: AtomicUsize,
    skipped: AtomicUsize,
    running: AtomicUsize,
    persistence_failures: AtomicUsize,
    max_running: AtomicUsize,
    max_per_email: AtomicUsize,
}

struct AccountOutcome {
    email: String,
    status: AccountStatus,
    persisted: bool,
    cancelled: bool,
}

struct Shared {
    processor: Arc<dyn AccountProcessor>,
    store: Store,
    exporter: Arc<Exporter>,
    proxies: Arc<ProxyPool>,
    worker_count: usize,
    grace_period: Duration,
    recheck_settled: bool,
    output_log_file: String,
    cancel: CancellationToken,
    in_flight: Mutex<HashMap<String, usize>>,
    progress: Progress,
}

/// 持有期间占用一个邮箱，drop 时释放（任务 panic 也会释放）
struct EmailClaim {
    shared: Arc<Shared>,
    email: String,
}

impl Drop for EmailClaim {
    fn drop(&mut self) {
        let mut in_flight = self
            .shared
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.email);
    }
}

/// 批量处理器
///
/// 一个实例对应一次批处理；`stop()` 之后不能再次启动。
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        processor: Arc<dyn AccountProcessor>,
        store: Store,
        exporter: Arc<Exporter>,
        proxies: Arc<ProxyPool>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                processor,
                store,
                exporter,
                proxies,
                worker_count: config.worker_count.max(1),
                grace_period: config.grace_period(),
                recheck_settled: config.recheck_settled,
                output_log_file: config.output_log_file.clone(),
                cancel: CancellationToken::new(),
                in_flight: Mutex::new(HashMap::new()),
                progress: Progress::default(),
            }),
        }
    }

    /// 在后台启动批次
    pub fn start(&self, accounts: Vec<Account>) -> JoinHandle<BatchReport> {
        let shared = self.shared.clone();
        tokio::spawn(async move { shared.run_batch(accounts).await })
    }

    /// 停止派发；进行中的账号有宽限期完成
    pub fn stop(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!("⏹️ 收到停止请求，宽限期 {} 秒", self.shared.grace_period.as_secs());
        }
        self.shared.cancel.cancel();
    }

    pub fn status(&self) -> ProgressSnapshot {
        let p = &self.shared.progress;
        ProgressSnapshot {
            total: p.total.load(Ordering::SeqCst),
            dispatched: p.dispatched.load(Ordering::SeqCst),
            completed: p.completed.load(Ordering::SeqCst),
            skipped: p.skipped.load(Ordering::SeqCst),
            running: p.running.load(Ordering::SeqCst),
            persistence_failures: p.persistence_failures.load(Ordering::SeqCst),
            max_running: p.max_running.load(Ordering::SeqCst),
            max_per_email: p.max_per_email.load(Ordering::SeqCst),
            stopping: self.shared.cancel.is_cancelled(),
        }
    }
}

impl Shared {
    async fn run_batch(self: Arc<Self>, accounts: Vec<Account>) -> BatchReport {
        let total = accounts.len();
        self.progress.total.store(total, Ordering::SeqCst);
        log_startup(total, self.worker_count);

        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut report = BatchReport {
            total,
            ..Default::default()
        };
        let mut handles = Vec::new();

        for (idx, account) in accounts.into_iter().enumerate() {
            let ctx = AccountCtx::new(idx + 1, &account.email);

            if account.status.is_settled() && !self.recheck_settled {
                info!("{} ⏭️ 状态已是 {}，跳过", ctx, account.status.as_str());
                self.skip(&mut report);
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                break;
            };

            let Some(claim) = self.claim(&account.email) else {
                warn!("{} ⚠️ 该邮箱正在处理中，跳过重复项", ctx);
                self.skip(&mut report);
                continue;
            };

            self.progress.dispatched.fetch_add(1, Ordering::SeqCst);
            let shared = self.clone();
            let task_ctx = ctx.clone();
            let fallback = account.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let _claim = claim;
                shared.run_account(account, task_ctx).await
            });
            handles.push((ctx, fallback, handle));
        }

        let dispatched = handles.len();
        report.not_dispatched = total - report.skipped - dispatched;
        if report.not_dispatched > 0 {
            info!("⏹️ {} 个账号未派发，保持 pending", report.not_dispatched);
        }

        let mut counts: HashMap<AccountStatus, usize> = HashMap::new();
        for (ctx, fallback, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("{} ❌ 任务执行失败: {}", ctx, e);
                    self.record_task_failure(fallback, &ctx, &e.to_string()).await
                }
            };
            report.processed += 1;
            *counts.entry(outcome.status).or_default() += 1;
            if outcome.cancelled {
                report.cancelled += 1;
            }
            if !outcome.persisted {
                report.persistence_failures.push(outcome.email);
            }
        }
        report.by_status = AccountStatus::ALL
            .iter()
            .map(|s| (*s, counts.get(s).copied().unwrap_or(0)))
            .collect();

        if let Err(e) = self.exporter.sync_all().await {
            warn!("⚠️ 批次结束时同步导出文件失败: {}", e);
        }

        print_final_stats(
            &report.by_status,
            report.skipped,
            report.persistence_failures.len(),
            &self.output_log_file,
        );
        report
    }

    fn skip(&self, report: &mut BatchReport) {
        report.skipped += 1;
        self.progress.skipped.fetch_add(1, Ordering::SeqCst);
    }

    /// 占用邮箱；已在处理中则返回 `None`
    fn claim(self: &Arc<Self>, email: &str) -> Option<EmailClaim> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let holders = in_flight.entry(email.to_string()).or_insert(0);
        if *holders > 0 {
            return None;
        }
        *holders += 1;
        self.progress
            .max_per_email
            .fetch_max(*holders, Ordering::SeqCst);
        Some(EmailClaim {
            shared: self.clone(),
            email: email.to_string(),
        })
    }

    async fn run_account(&self, mut account: Account, ctx: AccountCtx) -> AccountOutcome {
        let running = self.progress.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.max_running.fetch_max(running, Ordering::SeqCst);

        let lease = self.proxies.lease(account.proxy.as_deref());
        let result = {
            let proxy = lease.as_ref().map(|l| &l.proxy);
            let mut work =
                AssertUnwindSafe(self.processor.process(&account, proxy, &ctx)).catch_unwind();
            tokio::select! {
                result = &mut work => Some(result),
                _ = self.cancel.cancelled() => {
                    tokio::select! {
                        result = &mut work => Some(result),
                        _ = sleep(self.grace_period) => None,
                    }
                }
            }
        };
        if let Some(lease) = lease {
            self.proxies.release(lease);
        }

        let (verdict, cancelled) = match result {
            Some(Ok(result)) => {
                if result.profile_id.is_some() {
                    account.profile_id = result.profile_id;
                }
                (result.verdict, false)
            }
            Some(Err(payload)) => {
                let reason = format!("panic: {}", panic_message(payload.as_ref()));
                error!("{} ❌ 处理过程中 panic: {}", ctx, reason);
                (Verdict::error(reason), false)
            }
            None => {
                warn!("{} ⏹️ 宽限期结束，放弃处理", ctx);
                (Verdict::error("cancelled"), true)
            }
        };

        account.apply(&verdict);
        let persisted = self.persist(&account, &ctx).await;
        if persisted {
            if let Err(e) = self.exporter.sync_all().await {
                warn!("{} ⚠️ 同步导出文件失败: {}", ctx, e);
            }
        }
        log_account_result(&ctx, &verdict);

        self.progress.running.fetch_sub(1, Ordering::SeqCst);
        self.progress.completed.fetch_add(1, Ordering::SeqCst);
        AccountOutcome {
            email: account.email,
            status: verdict.status,
            persisted,
            cancelled,
        }
    }

    /// 任务本身异常退出时，仍把账号记为 `error` 并写库
    async fn record_task_failure(
        &self,
        mut account: Account,
        ctx: &AccountCtx,
        detail: &str,
    ) -> AccountOutcome {
        let verdict = Verdict::error(format!("panic: {}", detail));
        account.apply(&verdict);
        let persisted = self.persist(&account, ctx).await;
        log_account_result(ctx, &verdict);
        self.progress.completed.fetch_add(1, Ordering::SeqCst);
        AccountOutcome {
            email: account.email,
            status: verdict.status,
            persisted,
            cancelled: false,
        }
    }

    /// 写库，失败时退避重试
    async fn persist(&self, account: &Account, ctx: &AccountCtx) -> bool {
        for attempt in 1..=PERSIST_ATTEMPTS {
            match self.store.upsert(account).await {
                Ok(()) => return true,
                Err(e) if attempt < PERSIST_ATTEMPTS => {
                    warn!("{} ⚠️ 写库失败 (第 {} 次)，稍后重试: {}", ctx, attempt, e);
                    sleep(PERSIST_BACKOFF * attempt).await;
                }
                Err(e) => {
                    error!("{} ❌ 写库失败，已重试 {} 次: {}", ctx, PERSIST_ATTEMPTS, e);
                }
            }
        }
        self.progress
            .persistence_failures
            .fetch_add(1, Ordering::SeqCst);
        false
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Proxy;
    use crate::storage::export::ELIGIBLE_PENDING_FILE;
    use crate::workflow::FlowResult;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// 按邮箱返回预设结论的处理器
    struct FakeProcessor {
        delay: Duration,
        verdicts: HashMap<String, Verdict>,
        proxies_seen: Mutex<Vec<Option<String>>>,
        panic_on: Option<String>,
    }

    impl FakeProcessor {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                verdicts: HashMap::new(),
                proxies_seen: Mutex::new(Vec::new()),
                panic_on: None,
            }
        }

        fn panicking_on(mut self, email: &str) -> Self {
            self.panic_on = Some(email.to_string());
            self
        }

        fn with_verdict(mut self, email: &str, verdict: Verdict) -> Self {
            self.verdicts.insert(email.to_string(), verdict);
            self
        }
    }

    #[async_trait]
    impl AccountProcessor for FakeProcessor {
        async fn process(&self, account: &Account, proxy: Option<&Proxy>, _ctx: &AccountCtx) -> FlowResult {
            self.proxies_seen
                .lock()
                .unwrap()
                .push(proxy.map(|p| p.host.clone()));
            sleep(self.delay).await;
            if self.panic_on.as_deref() == Some(account.email.as_str()) {
                panic!("page handle poisoned");
            }
            FlowResult {
                verdict: self
                    .verdicts
                    .get(&account.email)
                    .cloned()
                    .unwrap_or_else(Verdict::verified),
                profile_id: Some(format!("profile-{}", account.email)),
            }
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        store: Store,
        dir: TempDir,
    }

    async fn harness(config: Config, processor: FakeProcessor, accounts: &[Account]) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        for account in accounts {
            store.import(account).await.unwrap();
        }
        let exporter = Arc::new(Exporter::new(store.clone(), dir.path()));
        let proxies = Arc::new(ProxyPool::new(vec![
            "http://10.0.0.1:8080".parse().unwrap(),
            "http://10.0.0.2:8080".parse().unwrap(),
        ]));
        let orchestrator = Orchestrator::new(
            &config,
            Arc::new(processor),
            store.clone(),
            exporter,
            proxies,
        );
        Harness {
            orchestrator,
            store,
            dir,
        }
    }

    fn accounts(n: usize) -> Vec<Account> {
        (0..n)
            .map(|i| Account::new(format!("user{}@example.com", i), "pw"))
            .collect()
    }

    fn config(workers: usize) -> Config {
        Config {
            worker_count: workers,
            grace_period_secs: 1,
            ..Config::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_count_bounds_concurrency() {
        let list = accounts(5);
        let processor = FakeProcessor::new(Duration::from_secs(1))
            .with_verdict("user1@example.com", Verdict::link_ready("https://services.sheerid.com/verify/x"));
        let h = harness(config(2), processor, &list).await;

        let report = h.orchestrator.start(list).await.unwrap();

        assert_eq!(report.processed, 5);
        assert_eq!(report.count(AccountStatus::Verified), 4);
        assert_eq!(report.count(AccountStatus::LinkReady), 1);
        let status = h.orchestrator.status();
        assert_eq!(status.max_running, 2);
        assert_eq!(status.max_per_email, 1);
        assert_eq!(status.completed, 5);

        let stored = h.store.get("user0@example.com").await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Verified);
        assert_eq!(stored.profile_id.as_deref(), Some("profile-user0@example.com"));

        let pending = std::fs::read_to_string(h.dir.path().join(ELIGIBLE_PENDING_FILE)).unwrap();
        assert_eq!(pending, "user1@example.com----pw\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_accounts_are_skipped_unless_rechecked() {
        let mut settled = Account::new("done@example.com", "pw");
        settled.apply(&Verdict::subscribed());
        let list = vec![settled, Account::new("new@example.com", "pw")];

        let h = harness(config(2), FakeProcessor::new(Duration::ZERO), &list).await;
        let report = h.orchestrator.start(list.clone()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 1);

        let rechecking = Config {
            recheck_settled: true,
            ..config(2)
        };
        let h = harness(rechecking, FakeProcessor::new(Duration::ZERO), &list).await;
        let report = h.orchestrator.start(list).await.unwrap();
        assert_eq!(report.skipped, 0);
        assert_eq!(report.processed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_email_is_never_processed_concurrently() {
        let list = vec![
            Account::new("same@example.com", "pw"),
            Account::new("same@example.com", "pw"),
        ];
        let h = harness(config(2), FakeProcessor::new(Duration::from_secs(5)), &list).await;

        let report = h.orchestrator.start(list).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(h.orchestrator.status().max_per_email, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_in_flight_and_leaves_rest_pending() {
        let list = accounts(3);
        let h = harness(config(1), FakeProcessor::new(Duration::from_secs(100)), &list).await;

        let handle = h.orchestrator.start(list);
        sleep(Duration::from_millis(10)).await;
        h.orchestrator.stop();
        let report = handle.await.unwrap();

        assert_eq!(report.cancelled, 1);
        assert_eq!(report.not_dispatched, 2);
        let first = h.store.get("user0@example.com").await.unwrap().unwrap();
        assert_eq!(first.status, AccountStatus::Error);
        assert_eq!(first.message.as_deref(), Some("cancelled"));
        let rest = h.store.read_by_status(AccountStatus::Pending).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(h.orchestrator.status().stopping);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_is_reported() {
        // 空邮箱无法写库
        let list = vec![Account::new("", "pw"), Account::new("ok@example.com", "pw")];
        let h = harness(config(2), FakeProcessor::new(Duration::ZERO), &list[1..]).await;

        let report = h.orchestrator.start(list).await.unwrap();

        assert_eq!(report.persistence_failures, vec![String::new()]);
        assert_eq!(h.orchestrator.status().persistence_failures, 1);
        let ok = h.store.get("ok@example.com").await.unwrap().unwrap();
        assert_eq!(ok.status, AccountStatus::Verified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_proxy_reaches_processor() {
        let mut with_proxy = Account::new("p@example.com", "pw");
        with_proxy.proxy = Some("socks5://9.9.9.9:1080".to_string());
        let list = vec![with_proxy, Account::new("q@example.com", "pw")];

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let processor = Arc::new(FakeProcessor::new(Duration::ZERO));
        let orchestrator = Orchestrator::new(
            &config(1),
            processor.clone(),
            store.clone(),
            Arc::new(Exporter::new(store, dir.path())),
            Arc::new(ProxyPool::new(vec!["http://10.0.0.1:8080".parse().unwrap()])),
        );

        orchestrator.start(list).await.unwrap();

        let seen = processor.proxies_seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![Some("9.9.9.9".to_string()), Some("10.0.0.1".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_processor_panic_is_recorded_as_error() {
        let list = vec![
            Account::new("boom@example.com", "pw"),
            Account::new("fine@example.com", "pw"),
        ];
        let processor = FakeProcessor::new(Duration::ZERO).panicking_on("boom@example.com");
        let h = harness(config(2), processor, &list).await;

        let report = h.orchestrator.start(list).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.count(AccountStatus::Error), 1);
        assert_eq!(report.count(AccountStatus::Verified), 1);
        let boom = h.store.get("boom@example.com").await.unwrap().unwrap();
        assert_eq!(boom.status, AccountStatus::Error);
        assert_eq!(boom.message.as_deref(), Some("panic: page handle poisoned"));
        assert_eq!(h.orchestrator.status().running, 0);
    }
}
