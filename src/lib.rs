//! # Account Lifecycle
//!
//! 批量驱动浏览器窗口，检测账号资格、提取验证链接、按需绑卡，
//! 结果写入 SQLite 并同步为分类文本文件。
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - `PageHandle` 抽象，只暴露页面能力
//! - `JsExecutor` - 唯一的 page owner，提供 eval() 能力
//! - `browser/` / `clients/` - CDP 连接与指纹浏览器窗口管理
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个页面
//! - `Classifier` - 多语言状态判定
//! - `CardBinder` - 绑卡子流程
//! - `totp` - 2FA 验证码
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个账号"的完整处理流程
//! - `AccountCtx` - 上下文封装（序号 + 邮箱）
//! - `SessionDriver` - 开窗 → 登录 → 导航
//! - `AccountFlow` - 流程编排（会话 → 判定 → 绑卡）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 并发窗口、停止、写库与同步
//! - `orchestrator/card_pool` / `proxy_pool` - 共享资源池
//!
//! ### ⑤ 持久化与展示
//! - `storage/` - 账号库与导出
//! - `dashboard/` - 只读 HTTP 看板
//!
//! ## 模块结构

pub mod app;
pub mod browser;
pub mod clients;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod storage;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use app::App;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::JsExecutor;
pub use models::{Account, AccountStatus, Verdict};
pub use orchestrator::{BatchReport, Orchestrator};
pub use storage::{Exporter, Store};
pub use workflow::{AccountCtx, AccountFlow, AccountProcessor};
