//! 应用主结构 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：组装事件推送、会话管理、存储、LLM 和扫描周期
//! 2. **任务管理**：扫描循环、控制通道（含可选的 HTTP 控制接口）、截图、备份各自独立运行
//! 3. **资源管理**：唯一持有 `SessionManager` 的所有权，退出时关闭浏览器
//! 4. **优雅退出**：Ctrl-C 后等当前一轮扫描结束再关闭会话

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

use crate::browser::{ChromiumLauncher, SessionManager};
use crate::config::Config;
use crate::infrastructure::BrowserLauncher;
use crate::models::AgentEvent;
use crate::orchestrator::backup::BackupService;
use crate::orchestrator::control::{self, ControlCommand, ControlDispatcher, ControlHandle};
use crate::orchestrator::control_server;
use crate::orchestrator::scan_loop::ScanLoop;
use crate::orchestrator::screencap::Screencap;
use crate::services::{
    BroadcastSink, EventSink, FanOutSink, HttpSink, JsonSeenStore, LlmService, ReplyJournal,
    TomlProfileStore, TracingSink,
};
use crate::utils::logging;
use crate::workflow::{CycleServices, ScanCycle};

/// 应用主结构
pub struct App {
    sessions: Arc<SessionManager>,
    scan_loop: ScanLoop,
    dispatcher: Arc<ControlDispatcher>,
    control: ControlHandle,
    control_rx: mpsc::Receiver<ControlCommand>,
    screencap: Screencap,
    backup: BackupService,
    events: BroadcastSink,
    control_addr: Option<String>,
}

impl App {
    /// 使用本地 Chromium 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        Self::with_launcher(config, Arc::new(ChromiumLauncher::new())).await
    }

    /// 使用指定的浏览器启动器初始化应用
    pub async fn with_launcher(config: Config, launcher: Arc<dyn BrowserLauncher>) -> Result<Self> {
        config.validate()?;
        logging::log_startup(&config.target_url, config.poll_interval, config.headless);

        let events = BroadcastSink::new(256);
        let mut fan_out = FanOutSink::new()
            .with(Arc::new(TracingSink))
            .with(Arc::new(events.clone()));
        if let Some(url) = &config.dashboard_url {
            info!("📡 仪表盘推送地址: {}", url);
            fan_out = fan_out.with(Arc::new(HttpSink::new(url.clone())));
        }
        let sink: Arc<dyn EventSink> = Arc::new(fan_out);

        let sessions = Arc::new(SessionManager::new(config.clone(), launcher, Arc::clone(&sink)));

        let profiles = TomlProfileStore::load(&config.profiles_dir).await?;
        if profiles.is_empty() && config.default_prompt.is_none() {
            warn!("⚠️ 没有账号配置也没有默认模板，所有帖子都会被跳过");
        }
        let seen = JsonSeenStore::load(&config.seen_store_file).await?;
        let journal = ReplyJournal::load(&config.reply_journal_file, config.reply_journal_capacity).await;
        let generator = LlmService::new(&config).with_sink(Arc::clone(&sink));
        if config.dry_run {
            info!("🧪 DRY_RUN 模式：不会调用 LLM");
        }

        let cycle = ScanCycle::new(
            &config,
            CycleServices {
                generator: Arc::new(generator),
                profiles: Arc::new(profiles),
                seen: Arc::new(seen),
                journal: Arc::new(journal),
                sink: Arc::clone(&sink),
            },
        )?;
        let scan_loop = ScanLoop::new(&config, Arc::clone(&sessions), cycle, Arc::clone(&sink));

        let (interval_tx, interval_rx) = watch::channel(config.screencap_interval);
        let dispatcher = Arc::new(ControlDispatcher::new(
            &config,
            Arc::clone(&sessions),
            Arc::clone(&sink),
            scan_loop.paused_flag(),
            interval_tx,
        ));
        let (control, control_rx) = control::channel(32);

        let screencap = Screencap::new(
            Arc::clone(&sessions),
            Arc::clone(&sink),
            config.target_url.clone(),
            interval_rx,
        );
        let backup = BackupService::new(&config);

        Ok(Self {
            sessions,
            scan_loop,
            dispatcher,
            control,
            control_rx,
            screencap,
            backup,
            events,
            control_addr: config.control_addr.clone(),
        })
    }

    /// 控制命令入口
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// 订阅仪表盘事件
    pub fn events(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    /// 运行直到 Ctrl-C
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("监听 Ctrl-C 失败: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// 运行直到 `stop` 完成
    pub async fn run_until<F>(self, stop: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher_task = tokio::spawn(Arc::clone(&self.dispatcher).run(self.control_rx));
        let server_task = match &self.control_addr {
            Some(addr) => match control_server::bind(addr).await {
                Ok(listener) => Some(tokio::spawn(control_server::serve(
                    listener,
                    self.control.clone(),
                    shutdown_rx.clone(),
                ))),
                Err(e) => {
                    error!("❌ 控制接口启动失败，只能通过内嵌句柄控制: {:#}", e);
                    None
                }
            },
            None => None,
        };
        let screencap_task = tokio::spawn(self.screencap.run(shutdown_rx.clone()));
        let backup_task = tokio::spawn(self.backup.run(shutdown_rx.clone()));
        let mut loop_task = tokio::spawn(self.scan_loop.run(shutdown_rx));

        tokio::select! {
            _ = stop => {
                info!("🛑 收到退出信号，等待当前扫描结束...");
                let _ = shutdown_tx.send(true);
                if let Err(e) = (&mut loop_task).await {
                    error!("扫描循环异常退出: {}", e);
                }
            }
            result = &mut loop_task => {
                if let Err(e) = result {
                    error!("扫描循环异常退出: {}", e);
                }
                let _ = shutdown_tx.send(true);
            }
        }

        let _ = screencap_task.await;
        let _ = backup_task.await;
        if let Some(task) = server_task {
            let _ = task.await;
        }
        dispatcher_task.abort();
        self.sessions.shutdown().await;
        info!("👋 程序已退出");
        Ok(())
    }
}
