//! 会话驱动 - 流程层
//!
//! 把一个账号变成"已登录、停在目标页面"的浏览器会话：
//! 开窗 → 连接 → 导航 → 登录（含两步验证）→ 重新导航并走菜单

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::browser::PageConnector;
use crate::clients::ProfileProvider;
use crate::config::Config;
use crate::error::{SessionCause, SessionError};
use crate::infrastructure::{wait_for_selector, FramePath, PageHandle};
use crate::models::{Account, Proxy};
use crate::services::keywords::normalize;
use crate::services::totp;

pub const EMAIL_INPUT: &str = "input[type=\"email\"]";
pub const EMAIL_NEXT: &str = "#identifierNext button";
pub const PASSWORD_INPUT: &str = "input[type=\"password\"]";
pub const PASSWORD_NEXT: &str = "#passwordNext button";
pub const TOTP_INPUT: &str = "input[name=\"totpPin\"], input[id=\"totpPin\"], input[type=\"tel\"]";
pub const TOTP_NEXT: &str = "#totpNext button";

const EMAIL_WAIT: Duration = Duration::from_secs(5);
const PASSWORD_WAIT: Duration = Duration::from_secs(15);
const TOTP_WAIT: Duration = Duration::from_secs(10);
/// 提交验证码后观察拒绝提示的时长
const TOTP_SETTLE: Duration = Duration::from_secs(3);

/// 已归一化的凭据拒绝提示
const CREDENTIAL_REJECTIONS: &[&str] = &[
    "wrong password",
    "couldn't find your google account",
    "your password was changed",
    "account has been disabled",
    "enter a valid email",
];

const TOTP_REJECTIONS: &[&str] = &["wrong code", "code is incorrect", "too many failed attempts"];

/// 已打开窗口的所有权
///
/// `close()` 关闭窗口；未调用 `close()` 就被 drop 时在当前运行时上调度关闭。
/// 开窗成功后立即创建，覆盖连接和登录阶段被取消的情况。
struct ProfileGuard {
    profile_id: String,
    provider: Arc<dyn ProfileProvider>,
    closed: bool,
}

impl ProfileGuard {
    fn new(profile_id: impl Into<String>, provider: Arc<dyn ProfileProvider>) -> Self {
        Self {
            profile_id: profile_id.into(),
            provider,
            closed: false,
        }
    }

    async fn close(mut self) {
        self.closed = true;
        close_quietly(self.provider.as_ref(), &self.profile_id).await;
    }
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let provider = self.provider.clone();
        let profile_id = self.profile_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("窗口 {} 未显式关闭，调度关闭", profile_id);
                handle.spawn(async move {
                    close_quietly(provider.as_ref(), &profile_id).await;
                });
            }
            Err(_) => warn!("⚠️ 没有可用的运行时，窗口 {} 未关闭", profile_id),
        }
    }
}

/// 一个已打开的浏览器会话，拥有窗口
pub struct Session {
    guard: ProfileGuard,
    page: Arc<dyn PageHandle>,
}

impl Session {
    pub fn new(
        profile_id: impl Into<String>,
        page: Arc<dyn PageHandle>,
        provider: Arc<dyn ProfileProvider>,
    ) -> Self {
        Self {
            guard: ProfileGuard::new(profile_id, provider),
            page,
        }
    }

    pub fn profile_id(&self) -> &str {
        &self.guard.profile_id
    }

    pub fn page(&self) -> &dyn PageHandle {
        self.page.as_ref()
    }

    pub async fn close(self) {
        self.guard.close().await;
    }
}

async fn close_quietly(provider: &dyn ProfileProvider, profile_id: &str) {
    match provider.close_profile(profile_id).await {
        Ok(()) => debug!("窗口 {} 已关闭", profile_id),
        Err(e) => warn!("⚠️ 关闭窗口 {} 失败: {:#}", profile_id, e),
    }
}

/// 会话驱动
///
/// 职责：
/// - 通过 [`ProfileProvider`] 开窗，通过 [`PageConnector`] 拿到页面
/// - 完成登录与两步验证
/// - 失败时关闭已打开的窗口，并给出 [`SessionCause`]
pub struct SessionDriver {
    provider: Arc<dyn ProfileProvider>,
    connector: Arc<dyn PageConnector>,
    target_url: String,
    menu_path: Vec<String>,
    step_timeout: Duration,
    poll_interval: Duration,
}

impl SessionDriver {
    pub fn new(
        config: &Config,
        provider: Arc<dyn ProfileProvider>,
        connector: Arc<dyn PageConnector>,
    ) -> Self {
        Self {
            provider,
            connector,
            target_url: config.target_url.clone(),
            menu_path: config.menu_path.clone(),
            step_timeout: config.step_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    pub async fn run(&self, account: &Account, proxy: Option<&Proxy>) -> Result<Session, SessionError> {
        let opened = self
            .provider
            .open_profile(account, proxy)
            .await
            .map_err(|e| SessionError::new(SessionCause::ProvisioningFailed, format!("{:#}", e)))?;
        debug!("窗口 {} 已打开: {}", opened.profile_id, opened.ws_endpoint);

        let guard = ProfileGuard::new(opened.profile_id, self.provider.clone());

        let page = match self.connector.connect(&opened.ws_endpoint).await {
            Ok(page) => page,
            Err(e) => {
                guard.close().await;
                return Err(SessionError::new(
                    SessionCause::ConnectFailed,
                    format!("{:#}", e),
                ));
            }
        };

        let session = Session { guard, page };
        let prepared = self.prepare(session.page(), account).await;
        match prepared {
            Ok(()) => {
                info!("✓ {} 已登录并到达目标页面", account.email);
                Ok(session)
            }
            Err(err) => {
                session.close().await;
                Err(err)
            }
        }
    }

    async fn prepare(&self, page: &dyn PageHandle, account: &Account) -> Result<(), SessionError> {
        self.navigate(page).await?;
        self.login(page, account).await?;
        self.navigate(page).await?;
        self.walk_menu(page).await
    }

    async fn navigate(&self, page: &dyn PageHandle) -> Result<(), SessionError> {
        page.goto(&self.target_url)
            .await
            .map_err(|e| SessionError::new(SessionCause::NavigationFailed, format!("{:#}", e)))
    }

    async fn login(&self, page: &dyn PageHandle, account: &Account) -> Result<(), SessionError> {
        let root = FramePath::root();

        if !wait_for_selector(page, &root, EMAIL_INPUT, EMAIL_WAIT, self.poll_interval)
            .await
            .map_err(page_error)?
        {
            debug!("未出现邮箱输入框，视为已登录");
            return Ok(());
        }

        info!("未登录，开始登录 {}", account.email);
        page.fill(&root, EMAIL_INPUT, 0, &account.email)
            .await
            .map_err(page_error)?;
        page.click(&root, EMAIL_NEXT).await.map_err(page_error)?;

        if !wait_for_selector(page, &root, PASSWORD_INPUT, PASSWORD_WAIT, self.poll_interval)
            .await
            .map_err(page_error)?
        {
            if let Some(phrase) = rejection(page, CREDENTIAL_REJECTIONS).await? {
                return Err(SessionError::new(SessionCause::CredentialsRejected, phrase));
            }
            return Err(SessionError::new(
                SessionCause::PasswordStepMissing,
                format!("{} 秒内未出现密码输入框", PASSWORD_WAIT.as_secs()),
            ));
        }
        page.fill(&root, PASSWORD_INPUT, 0, &account.password)
            .await
            .map_err(page_error)?;
        page.click(&root, PASSWORD_NEXT).await.map_err(page_error)?;

        // 密码提交后：要么出现拒绝提示，要么出现验证码框，要么直接登录成功
        let deadline = Instant::now() + TOTP_WAIT;
        loop {
            if let Some(phrase) = rejection(page, CREDENTIAL_REJECTIONS).await? {
                return Err(SessionError::new(SessionCause::CredentialsRejected, phrase));
            }
            if page.count(&root, TOTP_INPUT).await.map_err(page_error)? > 0 {
                return self.submit_totp(page, account).await;
            }
            if Instant::now() >= deadline {
                debug!("未出现两步验证");
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn submit_totp(&self, page: &dyn PageHandle, account: &Account) -> Result<(), SessionError> {
        let root = FramePath::root();
        let secret = account
            .secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SessionError::new(SessionCause::TwoFactorRequired, "账号没有 2FA 密钥"))?;

        let code = totp::current_code(secret)
            .map_err(|e| SessionError::new(SessionCause::TwoFactorFailed, format!("{:#}", e)))?;
        debug!("填写两步验证码 {}", code);
        page.fill(&root, TOTP_INPUT, 0, &code)
            .await
            .map_err(page_error)?;
        page.click(&root, TOTP_NEXT).await.map_err(page_error)?;

        let deadline = Instant::now() + TOTP_SETTLE;
        while Instant::now() < deadline {
            sleep(self.poll_interval).await;
            if let Some(phrase) = rejection(page, TOTP_REJECTIONS).await? {
                return Err(SessionError::new(SessionCause::TwoFactorFailed, phrase));
            }
        }
        info!("✓ 两步验证完成");
        Ok(())
    }

    async fn walk_menu(&self, page: &dyn PageHandle) -> Result<(), SessionError> {
        let root = FramePath::root();
        for (step, selector) in self.menu_path.iter().enumerate() {
            let found = wait_for_selector(page, &root, selector, self.step_timeout, self.poll_interval)
                .await
                .map_err(page_error)?;
            if !found || !page.click(&root, selector).await.map_err(page_error)? {
                return Err(SessionError::new(
                    SessionCause::MenuStepMissing,
                    format!("第 {} 步 {}", step + 1, selector),
                ));
            }
            debug!("菜单第 {} 步已点击: {}", step + 1, selector);
        }
        Ok(())
    }
}

fn page_error(err: anyhow::Error) -> SessionError {
    SessionError::new(SessionCause::PageError, format!("{:#}", err))
}

async fn rejection(
    page: &dyn PageHandle,
    phrases: &[&'static str],
) -> Result<Option<&'static str>, SessionError> {
    let snapshot = page
        .snapshot(&FramePath::root())
        .await
        .map_err(page_error)?
        .unwrap_or_default();
    let text = normalize(&snapshot.text);
    Ok(phrases.iter().find(|p| text.contains(*p)).copied())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clients::OpenedProfile;
    use crate::infrastructure::testing::{FakeElement, FakeFrame, ScriptedPage};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const TARGET: &str = "https://example.test/offer";

    /// 记录开关窗的假供应者
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub fail_open: bool,
        pub opened: Mutex<Vec<String>>,
        pub closed: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        pub fn closed(&self) -> Vec<String> {
            self.closed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProfileProvider for FakeProvider {
        async fn open_profile(&self, account: &Account, _proxy: Option<&Proxy>) -> Result<OpenedProfile> {
            if self.fail_open {
                return Err(anyhow!("local api unreachable"));
            }
            let id = format!("profile-{}", account.email);
            self.opened.lock().unwrap().push(id.clone());
            Ok(OpenedProfile {
                profile_id: id,
                ws_endpoint: "ws://fake".to_string(),
            })
        }

        async fn close_profile(&self, profile_id: &str) -> Result<()> {
            self.closed.lock().unwrap().push(profile_id.to_string());
            Ok(())
        }
    }

    /// 总是返回同一个脚本页面的连接器
    pub(crate) struct FakeConnector {
        pub page: Option<Arc<ScriptedPage>>,
    }

    #[async_trait]
    impl PageConnector for FakeConnector {
        async fn connect(&self, _ws_endpoint: &str) -> Result<Arc<dyn PageHandle>> {
            match &self.page {
                Some(page) => Ok(page.clone() as Arc<dyn PageHandle>),
                None => Err(anyhow!("cdp refused")),
            }
        }
    }

    fn config(menu: &[&str]) -> Config {
        Config {
            target_url: TARGET.to_string(),
            menu_path: menu.iter().map(|s| s.to_string()).collect(),
            step_timeout_secs: 2,
            poll_interval_ms: 100,
            ..Config::default()
        }
    }

    fn driver(
        menu: &[&str],
        provider: Arc<FakeProvider>,
        page: Option<Arc<ScriptedPage>>,
    ) -> SessionDriver {
        SessionDriver::new(&config(menu), provider, Arc::new(FakeConnector { page }))
    }

    /// 邮箱 → 密码 →（可选）验证码的登录页
    fn login_page(with_totp: bool) -> ScriptedPage {
        ScriptedPage::new(
            FakeFrame::new("Sign in")
                .with_element(FakeElement::new("email", &[EMAIL_INPUT]))
                .with_element(FakeElement::new("email-next", &[EMAIL_NEXT])),
        )
        .on_click("email-next", |root| {
            root.elements
                .push(FakeElement::new("password", &[PASSWORD_INPUT]));
            root.elements
                .push(FakeElement::new("password-next", &[PASSWORD_NEXT]));
        })
        .on_click("password-next", move |root| {
            root.elements.clear();
            if with_totp {
                root.text = "2-Step Verification".to_string();
                root.elements.push(FakeElement::new("totp", &[TOTP_INPUT]));
                root.elements.push(FakeElement::new("totp-next", &[TOTP_NEXT]));
            } else {
                root.text = "Welcome".to_string();
            }
        })
        .on_click("totp-next", |root| {
            root.elements.clear();
            root.text = "Welcome".to_string();
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_login_with_two_factor() {
        let provider = Arc::new(FakeProvider::default());
        let page = Arc::new(login_page(true));
        let account = Account::new("a@example.com", "pw").with_secret("JBSWY3DPEHPK3PXP");

        let session = driver(&[], provider.clone(), Some(page.clone()))
            .run(&account, None)
            .await
            .unwrap();

        assert_eq!(session.profile_id(), "profile-a@example.com");
        assert_eq!(page.filled_value("email").as_deref(), Some("a@example.com"));
        assert_eq!(page.filled_value("password").as_deref(), Some("pw"));
        let code = page.filled_value("totp").unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        let gotos = page
            .events()
            .iter()
            .filter(|e| *e == &format!("goto:{}", TARGET))
            .count();
        assert_eq!(gotos, 2);

        session.close().await;
        assert_eq!(provider.closed(), vec!["profile-a@example.com"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_logged_in_walks_menu() {
        let provider = Arc::new(FakeProvider::default());
        let page = Arc::new(ScriptedPage::new(
            FakeFrame::new("Google One").with_element(FakeElement::new("plans", &["#plans"])),
        ));

        let session = driver(&["#plans"], provider, Some(page.clone()))
            .run(&Account::new("a@example.com", "pw"), None)
            .await
            .unwrap();

        assert!(page.clicked("plans"));
        assert!(page.filled_value("email").is_none());
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_password_is_rejected_and_profile_closed() {
        let provider = Arc::new(FakeProvider::default());
        let page = Arc::new(login_page(false).on_click("password-next", |root| {
            root.text = "Wrong password. Try again or click Forgot password".to_string();
        }));

        let err = driver(&[], provider.clone(), Some(page))
            .run(&Account::new("a@example.com", "bad"), None)
            .await
            .err()
            .unwrap();

        assert_eq!(err.cause, SessionCause::CredentialsRejected);
        assert_eq!(provider.closed(), vec!["profile-a@example.com"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_factor_without_secret() {
        let provider = Arc::new(FakeProvider::default());
        let page = Arc::new(login_page(true));

        let err = driver(&[], provider.clone(), Some(page))
            .run(&Account::new("a@example.com", "pw"), None)
            .await
            .err()
            .unwrap();

        assert_eq!(err.cause, SessionCause::TwoFactorRequired);
        assert_eq!(provider.closed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_menu_step() {
        let provider = Arc::new(FakeProvider::default());
        let page = Arc::new(ScriptedPage::new(FakeFrame::new("Google One")));

        let err = driver(&["#plans"], provider.clone(), Some(page))
            .run(&Account::new("a@example.com", "pw"), None)
            .await
            .err()
            .unwrap();

        assert_eq!(err.cause, SessionCause::MenuStepMissing);
        assert!(err.reason().starts_with("menu_step_missing: "));
        assert_eq!(provider.closed().len(), 1);
    }

    #[tokio::test]
    async fn test_provisioning_and_connect_failures() {
        let provider = Arc::new(FakeProvider {
            fail_open: true,
            ..Default::default()
        });
        let err = driver(&[], provider.clone(), None)
            .run(&Account::new("a@example.com", "pw"), None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.cause, SessionCause::ProvisioningFailed);
        assert!(provider.closed().is_empty());

        let provider = Arc::new(FakeProvider::default());
        let err = driver(&[], provider.clone(), None)
            .run(&Account::new("a@example.com", "pw"), None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.cause, SessionCause::ConnectFailed);
        assert_eq!(provider.closed().len(), 1);
    }

    #[tokio::test]
    async fn test_navigation_failure() {
        let provider = Arc::new(FakeProvider::default());
        let page = Arc::new(ScriptedPage::new(FakeFrame::new("")).failing_goto("net::ERR_PROXY"));

        let err = driver(&[], provider, Some(page))
            .run(&Account::new("a@example.com", "pw"), None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.cause, SessionCause::NavigationFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_session_schedules_close() {
        let provider = Arc::new(FakeProvider::default());
        let page: Arc<dyn PageHandle> = Arc::new(ScriptedPage::new(FakeFrame::new("")));
        let session = Session::new("p1", page, provider.clone());

        drop(session);
        sleep(Duration::from_millis(10)).await;

        assert_eq!(provider.closed(), vec!["p1"]);
    }

    /// 连接永远挂起的连接器
    struct StalledConnector;

    #[async_trait]
    impl PageConnector for StalledConnector {
        async fn connect(&self, _ws_endpoint: &str) -> Result<Arc<dyn PageHandle>> {
            sleep(Duration::from_secs(3600)).await;
            Err(anyhow!("cdp never answered"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_connect_still_closes_profile() {
        let provider = Arc::new(FakeProvider::default());
        let driver = SessionDriver::new(&config(&[]), provider.clone(), Arc::new(StalledConnector));
        let account = Account::new("a@example.com", "pw");

        let abandoned = tokio::time::timeout(Duration::from_secs(5), driver.run(&account, None)).await;
        assert!(abandoned.is_err());
        sleep(Duration::from_millis(10)).await;

        assert_eq!(provider.closed(), vec!["profile-a@example.com"]);
    }
}
