//! 控制通道 - 编排层
//!
//! 外部控制（仪表盘）以命令的形式进入队列，每条命令单独处理，
//! 一条命令失败不影响循环和其他命令。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::browser::SessionManager;
use crate::config::Config;
use crate::error::{AppError, BrowserError};
use crate::infrastructure::{wait_for_selector, PageDriver};
use crate::models::AgentEvent;
use crate::services::event_sink::EventSink;

/// 截图间隔允许的范围（毫秒）
pub const SCREENCAP_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 200..=60_000;

const USERNAME_INPUT: &str = r#"input[name="text"]"#;
const PASSWORD_INPUT: &str = r#"input[name="password"]"#;
const LOGIN_BUTTON: &str = r#"[data-testid="LoginForm_Login_Button"]"#;
const LOGIN_STEP_TIMEOUT: Duration = Duration::from_secs(10);
/// 等待登录跳转时检查地址的间隔
const NAVIGATION_POLL: Duration = Duration::from_millis(250);

/// 控制命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Pause(bool),
    /// 确保会话可用（必要时重建）
    Reset,
    SetScreencapInterval(u64),
    SubmitCredentials { user: String, pass: String },
}

/// 发送控制命令的句柄
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlCommand>,
}

impl ControlHandle {
    pub async fn send(&self, command: ControlCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| AppError::Other("控制通道已关闭".to_string()))?;
        Ok(())
    }

    pub async fn pause(&self, paused: bool) -> Result<()> {
        self.send(ControlCommand::Pause(paused)).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.send(ControlCommand::Reset).await
    }

    pub async fn set_screencap_interval(&self, ms: u64) -> Result<()> {
        self.send(ControlCommand::SetScreencapInterval(ms)).await
    }

    pub async fn submit_credentials(&self, user: impl Into<String>, pass: impl Into<String>) -> Result<()> {
        self.send(ControlCommand::SubmitCredentials {
            user: user.into(),
            pass: pass.into(),
        })
        .await
    }
}

/// 创建控制通道
pub fn channel(capacity: usize) -> (ControlHandle, mpsc::Receiver<ControlCommand>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ControlHandle { tx }, rx)
}

/// 控制命令处理器
pub struct ControlDispatcher {
    sessions: Arc<SessionManager>,
    sink: Arc<dyn EventSink>,
    paused: Arc<AtomicBool>,
    screencap_interval: watch::Sender<Duration>,
    target_url: String,
    login_timeout: Duration,
}

impl ControlDispatcher {
    pub fn new(
        config: &Config,
        sessions: Arc<SessionManager>,
        sink: Arc<dyn EventSink>,
        paused: Arc<AtomicBool>,
        screencap_interval: watch::Sender<Duration>,
    ) -> Self {
        Self {
            sessions,
            sink,
            paused,
            screencap_interval,
            target_url: config.target_url.clone(),
            login_timeout: config.login_timeout,
        }
    }

    /// 消费命令直到所有发送方关闭
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<ControlCommand>) {
        while let Some(command) = rx.recv().await {
            debug!("收到控制命令: {:?}", command_name(&command));
            match command {
                // 同步命令就地处理，保证顺序
                ControlCommand::Pause(paused) => self.set_paused(paused),
                ControlCommand::SetScreencapInterval(ms) => self.set_screencap_interval(ms),
                command => {
                    let this = Arc::clone(&self);
                    let name = command_name(&command);
                    let task = tokio::spawn(async move { this.handle_async(command).await });
                    let sink = Arc::clone(&self.sink);
                    // 任务 panic 也只影响这一条命令
                    tokio::spawn(async move {
                        if let Err(e) = task.await {
                            error!("控制命令 {} 异常终止: {}", name, e);
                            sink.log_event(AgentEvent::error("control", format!("{} panicked: {}", name, e)));
                        }
                    });
                }
            }
        }
        debug!("控制通道已关闭");
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        let message = if paused { "Agent paused" } else { "Agent resumed" };
        info!("{} {}", if paused { "⏸️" } else { "▶️" }, message);
        self.sink.log_event(AgentEvent::log(message));
    }

    fn set_screencap_interval(&self, ms: u64) {
        if !SCREENCAP_INTERVAL_RANGE_MS.contains(&ms) {
            warn!("忽略超出范围的截图间隔: {}ms", ms);
            return;
        }
        self.screencap_interval.send_replace(Duration::from_millis(ms));
        info!("📸 截图间隔调整为 {}ms", ms);
    }

    async fn handle_async(&self, command: ControlCommand) {
        match command {
            ControlCommand::Reset => match self.sessions.ensure_session(Some(&self.target_url)).await {
                Ok(_) => self.sink.log_event(AgentEvent::log("Session reset completed")),
                Err(e) => {
                    error!("重置会话失败: {:#}", e);
                    self.sink
                        .log_event(AgentEvent::error("reset", format!("Reset failed: {:#}", e)));
                }
            },
            ControlCommand::SubmitCredentials { user, pass } => {
                if let Err(e) = self.login(&user, &pass).await {
                    error!("登录失败: {:#}", e);
                    self.sink
                        .log_event(AgentEvent::error("login", format!("Login failed: {:#}", e)));
                }
            }
            ControlCommand::Pause(paused) => self.set_paused(paused),
            ControlCommand::SetScreencapInterval(ms) => self.set_screencap_interval(ms),
        }
    }

    /// 在当前会话的登录页上填写账号密码；没有会话时什么也不做
    async fn login(&self, user: &str, pass: &str) -> Result<()> {
        let Some(session) = self.sessions.get_singleton() else {
            warn!("没有可用会话，忽略登录请求");
            return Ok(());
        };
        let page = session.page.as_ref();

        self.sink
            .log_event(AgentEvent::log(format!("Attempting login for {}...", user)));

        require(page, USERNAME_INPUT).await?;
        page.type_text(USERNAME_INPUT, user).await?;
        click_by_text(page, "span", "Next").await?;

        require(page, PASSWORD_INPUT).await?;
        page.type_text(PASSWORD_INPUT, pass).await?;
        let before = page.url().await?;
        page.click(LOGIN_BUTTON).await?;

        wait_for_navigation(page, &before, self.login_timeout).await?;
        self.sink.log_event(AgentEvent::log("Login submitted successfully."));
        Ok(())
    }
}

fn command_name(command: &ControlCommand) -> &'static str {
    match command {
        ControlCommand::Pause(_) => "pause",
        ControlCommand::Reset => "reset",
        ControlCommand::SetScreencapInterval(_) => "screencap_interval",
        ControlCommand::SubmitCredentials { .. } => "credentials",
    }
}

async fn require(page: &dyn PageDriver, selector: &str) -> Result<()> {
    if wait_for_selector(page, selector, LOGIN_STEP_TIMEOUT).await {
        Ok(())
    } else {
        Err(AppError::Browser(BrowserError::ElementNotFound {
            selector: selector.to_string(),
        })
        .into())
    }
}

/// 等待页面地址离开 `from`，超时视为登录失败
async fn wait_for_navigation(page: &dyn PageDriver, from: &str, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let current = page.url().await?;
        if current != from {
            debug!("登录后跳转到 {}", current);
            return Ok(());
        }
        if page.is_closed() || Instant::now() >= deadline {
            return Err(AppError::Browser(BrowserError::Timeout {
                operation: format!("登录后等待页面跳转 ({}s)", timeout.as_secs()),
            })
            .into());
        }
        sleep(NAVIGATION_POLL).await;
    }
}

/// 点击第一个文本包含 `text` 的 `tag` 元素
async fn click_by_text(page: &dyn PageDriver, tag: &str, text: &str) -> Result<()> {
    let js_code = format!(
        r#"
        (() => {{
            const el = Array.from(document.querySelectorAll({tag}))
                .find(e => (e.textContent || '').includes({text}));
            if (!el) return false;
            el.click();
            return true;
        }})()
        "#,
        tag = serde_json::to_string(tag)?,
        text = serde_json::to_string(text)?,
    );
    let clicked: bool = page.eval_as(js_code).await?;
    if clicked {
        Ok(())
    } else {
        Err(AppError::Browser(BrowserError::ElementNotFound {
            selector: format!("{}:{}", tag, text),
        })
        .into())
    }
}
