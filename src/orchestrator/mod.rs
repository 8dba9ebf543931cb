//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和资源调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量账号处理器
//! - 控制并发窗口数（Semaphore）
//! - 同一邮箱独占
//! - 写库重试与导出同步
//! - 停止与宽限期
//!
//! ### `card_pool` - 卡池
//! - 独占租卡、成功计数、用满移除并回写文件
//!
//! ### `proxy_pool` - 代理池
//! - 账号代理优先，否则租用占用最少的代理
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<Account>)
//!     ↓
//! workflow::AccountFlow (处理单个 Account)
//!     ↓
//! services (能力层：classifier / card_binder / totp)
//!     ↓
//! infrastructure (基础设施：PageHandle)
//! ```

pub mod batch_processor;
pub mod card_pool;
pub mod proxy_pool;

// 重新导出主要类型
pub use batch_processor::{BatchReport, Orchestrator, ProgressSnapshot};
pub use card_pool::{CardLease, CardPool};
pub use proxy_pool::{ProxyLease, ProxyPool};
