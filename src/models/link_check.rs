use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::AccountStatus;

/// SheerID 链接的验证结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutcome {
    Success,
    Failed,
}

impl LinkOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkOutcome::Success => "success",
            LinkOutcome::Failed => "failed",
        }
    }

    /// `link_ready` 账号被重新分类后的链接结果；仍为 `link_ready` / `pending` 时无结果
    pub fn after_reclassify(status: AccountStatus) -> Option<Self> {
        match status {
            AccountStatus::Verified | AccountStatus::Subscribed => Some(LinkOutcome::Success),
            AccountStatus::Ineligible | AccountStatus::Error => Some(LinkOutcome::Failed),
            AccountStatus::LinkReady | AccountStatus::Pending => None,
        }
    }
}

impl fmt::Display for LinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "success" => Ok(LinkOutcome::Success),
            "failed" => Ok(LinkOutcome::Failed),
            other => Err(other.to_string()),
        }
    }
}

/// 一条链接验证记录，(email, link) 唯一
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCheck {
    pub email: String,
    pub link: String,
    pub outcome: LinkOutcome,
    pub message: Option<String>,
    pub checked_at: String,
}

impl LinkCheck {
    /// 导出行：`link----email | Success` 或 `link----email | 原因`
    pub fn export_line(&self) -> String {
        let tail = match self.outcome {
            LinkOutcome::Success => "Success",
            LinkOutcome::Failed => self.message.as_deref().unwrap_or("Failed"),
        };
        format!("{}----{} | {}", self.link, self.email, tail)
    }
}
