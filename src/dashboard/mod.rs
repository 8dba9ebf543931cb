//! 看板服务层
//!
//! 只读：浏览账号、按条件导出。不修改数据库。

pub mod server;

pub use server::{
    bind_listener, export_impl, list_accounts_impl, router, serve, AccountView, DashboardState,
    HttpErr,
};
