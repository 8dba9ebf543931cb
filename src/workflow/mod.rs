//! 流程层
//!
//! 定义"一个账号"的完整处理流程：会话 → 分类 → 绑卡

pub mod account_ctx;
pub mod account_flow;
pub mod session_driver;

pub use account_ctx::AccountCtx;
pub use account_flow::{AccountFlow, AccountProcessor, FlowResult};
pub use session_driver::{Session, SessionDriver};
