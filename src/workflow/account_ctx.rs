//! 账号处理上下文
//!
//! 封装"我正在处理批次里的第几个账号"这一信息

use std::fmt::Display;

/// 账号处理上下文
#[derive(Debug, Clone)]
pub struct AccountCtx {
    /// 账号在批次中的序号（从1开始，仅用于日志显示）
    pub index: usize,

    pub email: String,
}

impl AccountCtx {
    pub fn new(index: usize, email: impl Into<String>) -> Self {
        Self {
            index,
            email: email.into(),
        }
    }
}

impl Display for AccountCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[账号 #{} {}]", self.index, self.email)
    }
}
