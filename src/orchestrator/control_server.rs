//! 控制接口 - 编排层
//!
//! 把 HTTP 请求转成控制命令送进控制通道。只做转发，命令的处理
//! 和隔离仍由 `ControlDispatcher` 负责。
//!
//! ```text
//! POST /control  {"command": "pause", "paused": true}
//!                {"command": "reset"}
//!                {"command": "screencap_interval", "ms": 1000}
//!                {"command": "credentials", "user": "...", "pass": "..."}
//! GET  /health
//! ```

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::orchestrator::control::{ControlCommand, ControlHandle};

/// 控制请求的线上格式
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlRequest {
    Pause { paused: bool },
    Reset,
    ScreencapInterval { ms: u64 },
    Credentials { user: String, pass: String },
}

impl From<ControlRequest> for ControlCommand {
    fn from(request: ControlRequest) -> Self {
        match request {
            ControlRequest::Pause { paused } => ControlCommand::Pause(paused),
            ControlRequest::Reset => ControlCommand::Reset,
            ControlRequest::ScreencapInterval { ms } => ControlCommand::SetScreencapInterval(ms),
            ControlRequest::Credentials { user, pass } => ControlCommand::SubmitCredentials { user, pass },
        }
    }
}

/// 创建控制接口的路由
pub fn create_router(control: ControlHandle) -> Router {
    Router::new()
        .route("/control", post(submit_command))
        .route("/health", get(health_check))
        .with_state(control)
}

/// 绑定地址
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("控制接口绑定 {} 失败", addr))?;
    info!("🎛️ 控制接口: http://{}", listener.local_addr()?);
    Ok(listener)
}

/// 在已绑定的监听器上提供服务，直到收到停止信号
pub async fn serve(listener: TcpListener, control: ControlHandle, mut shutdown: watch::Receiver<bool>) {
    let router = create_router(control);
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        })
        .await;
    if let Err(e) = result {
        error!("控制接口异常退出: {}", e);
    }
    debug!("控制接口已停止");
}

async fn submit_command(State(control): State<ControlHandle>, Json(request): Json<ControlRequest>) -> impl IntoResponse {
    let command = ControlCommand::from(request);
    match control.send(command).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(serde_json::json!({ "status": "accepted" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "error", "message": e.to_string() })),
        ),
    }
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
