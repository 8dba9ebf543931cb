use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 账号状态
///
/// `pending` 之外的五个状态互斥；`subscribed` 是自然终态，
/// `ineligible` / `error` 在重试前视为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// 尚未检测
    Pending,
    /// 有资格，已提取 SheerID 验证链接
    LinkReady,
    /// 已验证，未绑卡
    Verified,
    /// 已绑卡并订阅
    Subscribed,
    /// 无资格
    Ineligible,
    /// 出错 / 超时
    Error,
}

impl AccountStatus {
    pub const ALL: [AccountStatus; 6] = [
        AccountStatus::Pending,
        AccountStatus::LinkReady,
        AccountStatus::Verified,
        AccountStatus::Subscribed,
        AccountStatus::Ineligible,
        AccountStatus::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::LinkReady => "link_ready",
            AccountStatus::Verified => "verified",
            AccountStatus::Subscribed => "subscribed",
            AccountStatus::Ineligible => "ineligible",
            AccountStatus::Error => "error",
        }
    }

    /// 重新运行时默认跳过的状态
    pub fn is_settled(self) -> bool {
        matches!(self, AccountStatus::Subscribed | AccountStatus::Ineligible)
    }

    /// 该状态下 payload 存放的是原因字符串
    fn payload_is_reason(self) -> bool {
        matches!(
            self,
            AccountStatus::Error | AccountStatus::Ineligible | AccountStatus::Verified
        )
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| s.to_string())
    }
}

/// 一次检测（或绑卡）的结论：状态 + 可选载荷
///
/// 载荷对 `link_ready` 是验证链接，对 `error` / `ineligible` 是原因；
/// `verified` 仅在绑卡失败时带原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: AccountStatus,
    pub payload: Option<String>,
}

impl Verdict {
    pub fn link_ready(link: impl Into<String>) -> Self {
        Self {
            status: AccountStatus::LinkReady,
            payload: Some(link.into()),
        }
    }

    pub fn verified() -> Self {
        Self {
            status: AccountStatus::Verified,
            payload: None,
        }
    }

    /// 已验证但绑卡失败，记录原因
    pub fn verified_with_note(reason: impl Into<String>) -> Self {
        Self {
            status: AccountStatus::Verified,
            payload: Some(reason.into()),
        }
    }

    pub fn subscribed() -> Self {
        Self {
            status: AccountStatus::Subscribed,
            payload: None,
        }
    }

    pub fn ineligible(reason: impl Into<String>) -> Self {
        Self {
            status: AccountStatus::Ineligible,
            payload: Some(reason.into()),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: AccountStatus::Error,
            payload: Some(reason.into()),
        }
    }

    pub fn timeout() -> Self {
        Self::error("timeout")
    }

    pub fn link(&self) -> Option<&str> {
        match self.status {
            AccountStatus::LinkReady => self.payload.as_deref(),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        if self.status.payload_is_reason() {
            self.payload.as_deref()
        } else {
            None
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(payload) => write!(f, "{} ({})", self.status, payload),
            None => write!(f, "{}", self.status),
        }
    }
}

/// 账号记录，以邮箱为唯一键
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_email: Option<String>,
    /// 2FA 密钥（base32）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// 显式指定的代理 URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// 指纹浏览器窗口 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    pub status: AccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_link: Option<String>,
    /// 失败原因 / 备注
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: String,
}

impl Account {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            recovery_email: None,
            secret: None,
            proxy: None,
            profile_id: None,
            status: AccountStatus::Pending,
            verification_link: None,
            message: None,
            updated_at: now_timestamp(),
        }
    }

    pub fn with_recovery_email(mut self, recovery_email: impl Into<String>) -> Self {
        self.recovery_email = Some(recovery_email.into());
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// 应用一次检测结论；载荷按状态落到 link 或 message，另一个字段清空
    pub fn apply(&mut self, verdict: &Verdict) {
        self.status = verdict.status;
        self.verification_link = verdict.link().map(str::to_string);
        self.message = verdict.reason().map(str::to_string);
        self.updated_at = now_timestamp();
    }

    /// 当前记录对应的检测结论
    pub fn verdict(&self) -> Verdict {
        let payload = match self.status {
            AccountStatus::LinkReady => self.verification_link.clone(),
            status if status.payload_is_reason() => self.message.clone(),
            _ => None,
        };
        Verdict {
            status: self.status,
            payload,
        }
    }

    /// `email----password[----recovery][----secret]`
    pub fn account_line(&self) -> String {
        let mut line = self.email.clone();
        if !self.password.is_empty() {
            line.push_str("----");
            line.push_str(&self.password);
        }
        if let Some(rec) = self.recovery_email.as_deref().filter(|s| !s.is_empty()) {
            line.push_str("----");
            line.push_str(rec);
        }
        if let Some(sec) = self.secret.as_deref().filter(|s| !s.is_empty()) {
            line.push_str("----");
            line.push_str(sec);
        }
        line
    }
}

pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
