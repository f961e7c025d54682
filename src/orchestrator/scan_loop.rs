//! 扫描循环 - 编排层
//!
//! 顶层无限循环：暂停 / 防重入 / 会话健康 / 扫描 / 限流 / 退避。
//! 扫描按顺序一轮一轮进行，循环本身从不因为单轮失败而退出。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::browser::SessionManager;
use crate::config::Config;
use crate::models::AgentEvent;
use crate::services::event_sink::EventSink;
use crate::utils::logging;
use crate::workflow::{BackoffState, CycleOutcome, ListNavigator, NavigationOutcome, RateLimiter, ScanCycle};

/// 一次 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 已暂停，没有扫描
    Paused,
    /// 上一轮尚未结束，跳过
    Overlapped,
    /// 用户在其他页面，跳过抓取
    SkippedElsewhere,
    /// 扫描完成
    Scanned { replies: usize },
    /// 扫描出错（计入退避）
    Failed,
}

/// 在作用域结束时清除 `scanning`
struct ScanGuard(Arc<AtomicBool>);

impl ScanGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 扫描循环
pub struct ScanLoop {
    sessions: Arc<SessionManager>,
    cycle: ScanCycle,
    navigator: ListNavigator,
    sink: Arc<dyn EventSink>,
    target_url: String,
    poll_interval: Duration,
    max_backoff: Duration,
    paused: Arc<AtomicBool>,
    scanning: Arc<AtomicBool>,
    limiter: RateLimiter,
    backoff: BackoffState,
}

impl ScanLoop {
    pub fn new(config: &Config, sessions: Arc<SessionManager>, cycle: ScanCycle, sink: Arc<dyn EventSink>) -> Self {
        Self {
            sessions,
            cycle,
            navigator: ListNavigator::new(config),
            sink,
            target_url: config.target_url.clone(),
            poll_interval: config.poll_interval,
            max_backoff: config.max_backoff,
            paused: Arc::new(AtomicBool::new(false)),
            scanning: Arc::new(AtomicBool::new(false)),
            limiter: RateLimiter::new(config.max_replies_per_hour, config.max_replies_per_day, Instant::now()),
            backoff: BackoffState::default(),
        }
    }

    /// 暂停标志，由控制通道写入
    pub fn paused_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    pub fn scanning_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.scanning)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn backoff(&self) -> BackoffState {
        self.backoff
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// 执行一次迭代（不含休眠）
    pub async fn tick(&mut self) -> TickOutcome {
        if self.paused.load(Ordering::SeqCst) {
            return TickOutcome::Paused;
        }

        let Some(_guard) = ScanGuard::try_acquire(&self.scanning) else {
            info!("⏳ 上一轮扫描仍在进行，跳过本次");
            return TickOutcome::Overlapped;
        };

        logging::log_scan_start();
        match self.scan_once().await {
            Ok(outcome) => {
                self.backoff.record_success();
                match outcome {
                    CycleOutcome::SkippedElsewhere => {
                        logging::log_scan_end(0);
                        TickOutcome::SkippedElsewhere
                    }
                    CycleOutcome::Completed { replies } => {
                        logging::log_scan_end(replies);
                        TickOutcome::Scanned { replies }
                    }
                }
            }
            Err(e) => {
                self.backoff.record_failure();
                error!("❌ 扫描循环出错: {:#}", e);
                self.sink
                    .log_event(AgentEvent::error("scan_loop", format!("Scan loop error: {:#}", e)));
                TickOutcome::Failed
            }
        }
    }

    async fn scan_once(&mut self) -> Result<CycleOutcome> {
        let session = self.sessions.ensure_session(Some(&self.target_url)).await?;
        self.cycle.run(session.page.as_ref(), &mut self.limiter).await
    }

    /// 本次 tick 之后应当休眠多久
    pub fn sleep_after(&self, outcome: TickOutcome) -> Duration {
        match outcome {
            TickOutcome::Paused | TickOutcome::Overlapped => self.poll_interval,
            _ => self.backoff.delay(self.poll_interval, self.max_backoff),
        }
    }

    /// 启动时把页面带到监控列表；失败只记录，扫描循环照常开始
    pub async fn open_list(&self) -> Option<NavigationOutcome> {
        let result = async {
            let session = self.sessions.ensure_session(Some(&self.target_url)).await?;
            self.navigator.navigate_if_idle(session.page.as_ref()).await
        }
        .await;
        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("⚠️ 初始导航失败，可手动导航: {:#}", e);
                self.sink
                    .log_event(AgentEvent::error("navigation", format!("Initial navigation failed: {:#}", e)));
                None
            }
        }
    }

    /// 运行直到收到停止信号
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = self.open_list() => {}
            _ = shutdown.changed() => {
                info!("扫描循环已停止");
                return;
            }
        }

        loop {
            let outcome = self.tick().await;
            let delay = self.sleep_after(outcome);
            if !matches!(outcome, TickOutcome::Paused) {
                info!("⏱️ {}s 后开始下一轮扫描", delay.as_secs());
            }

            tokio::select! {
                _ = sleep(delay) => {}
                stopped = shutdown.changed() => {
                    if stopped.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                info!("扫描循环已停止");
                break;
            }
        }
    }
}
