//! 只读看板 HTTP 服务
//!
//! - `GET /api/accounts`：全部账号（JSON 数组，按导入顺序）
//! - `POST /api/export`：按条件导出为 `text/plain` 附件

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use crate::error::ExportError;
use crate::models::{Account, AccountStatus};
use crate::storage::{ExportQuery, Exporter, Store};

#[derive(Clone)]
pub struct DashboardState {
    pub store: Store,
    pub exporter: Arc<Exporter>,
}

/// 看板上展示的账号：不含密码和 2FA 密钥
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountView {
    pub email: String,
    pub recovery_email: Option<String>,
    pub has_secret: bool,
    pub proxy: Option<String>,
    pub profile_id: Option<String>,
    pub status: AccountStatus,
    pub verification_link: Option<String>,
    pub message: Option<String>,
    pub updated_at: String,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            has_secret: account
                .secret
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty()),
            email: account.email,
            recovery_email: account.recovery_email,
            proxy: account.proxy,
            profile_id: account.profile_id,
            status: account.status,
            verification_link: account.verification_link,
            message: account.message,
            updated_at: account.updated_at,
        }
    }
}

/// 返回 `{ "error": ... }` 的 HTTP 错误
#[derive(Debug)]
pub struct HttpErr {
    pub status: StatusCode,
    pub message: String,
}

impl HttpErr {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ExportError> for HttpErr {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::UnknownField(_) | ExportError::NoFields => {
                HttpErr::bad_request(err.to_string())
            }
            other => {
                error!("导出失败: {}", other);
                HttpErr::internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for HttpErr {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/accounts", get(list_accounts))
        .route("/api/export", post(export))
        .with_state(state)
}

/// 只监听本机
pub async fn bind_listener(port: u16) -> Result<tokio::net::TcpListener, std::io::Error> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    tokio::net::TcpListener::bind(addr).await
}

pub async fn serve(
    listener: tokio::net::TcpListener,
    state: DashboardState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!("📊 看板已启动: http://{}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn list_accounts(State(state): State<DashboardState>) -> Response {
    match list_accounts_impl(&state).await {
        Ok(accounts) => Json(accounts).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn export(State(state): State<DashboardState>, body: Bytes) -> Response {
    match export_impl(&state, &body).await {
        Ok(content) => (
            StatusCode::OK,
            [
                (CONTENT_TYPE, "text/plain; charset=utf-8"),
                (CONTENT_DISPOSITION, "attachment; filename=\"export.txt\""),
            ],
            content,
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn list_accounts_impl(state: &DashboardState) -> Result<Vec<AccountView>, HttpErr> {
    let accounts = state.store.read_all().await.map_err(|e| {
        error!("读取账号失败: {}", e);
        HttpErr::internal(e.to_string())
    })?;
    Ok(accounts.into_iter().map(AccountView::from).collect())
}

pub async fn export_impl(state: &DashboardState, body: &[u8]) -> Result<Vec<u8>, HttpErr> {
    let query: ExportQuery = serde_json::from_slice(body)
        .map_err(|e| HttpErr::bad_request(format!("无效的请求: {}", e)))?;
    Ok(state.exporter.export(&query).await?)
}
