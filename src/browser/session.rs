//! 会话管理
//!
//! 整个进程只有一个“当前”会话。所有使用页面的地方（扫描循环、截图任务、
//! 控制命令）都通过 `ensure_session` / `get_singleton` 取得句柄，不长期缓存，
//! 因为会话随时可能被重建替换。
//!
//! 状态流转：`NoSession → Constructing → Healthy → Unhealthy → Constructing → ...`

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::browser::launch::LaunchPlan;
use crate::config::Config;
use crate::infrastructure::{BrowserContext, BrowserLauncher, PageDriver, PageSignal};
use crate::models::AgentEvent;
use crate::services::event_sink::EventSink;
use crate::utils::logging;

/// 有其他调用方正在重建时，等待一次的时长
const RECOVERY_WAIT: Duration = Duration::from_secs(1);

/// 新建页面的初始地址
const BLANK_URLS: &[&str] = &["about:blank", "chrome://newtab/", "chrome://new-tab-page/", ""];

/// 一个打开的会话
#[derive(Clone)]
pub struct SessionHandle {
    pub context: Arc<dyn BrowserContext>,
    pub page: Arc<dyn PageDriver>,
    /// 创建会话时使用的地址
    pub origin_url: String,
    pub profile_dir: PathBuf,
    pub strategy: &'static str,
    /// 浏览器进程 ID，仅用于诊断
    pub pid: Option<u32>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("origin_url", &self.origin_url)
            .field("profile_dir", &self.profile_dir)
            .field("strategy", &self.strategy)
            .field("pid", &self.pid)
            .finish()
    }
}

impl SessionHandle {
    fn is_open(&self) -> bool {
        !self.context.is_closed() && !self.page.is_closed()
    }
}

/// 重建状态
#[derive(Debug, Default)]
pub struct RecoveryState {
    recovering: AtomicBool,
    context_closed: AtomicBool,
}

impl RecoveryState {
    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }

    pub fn is_context_closed(&self) -> bool {
        self.context_closed.load(Ordering::SeqCst)
    }
}

/// 在作用域结束时清除 `recovering`，构建失败也不会让管理器永久锁住
struct RecoveringGuard<'a>(&'a AtomicBool);

impl<'a> RecoveringGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RecoveringGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 会话管理器
///
/// 职责：
/// - 独占当前会话与重建状态
/// - 保证调用方拿到的要么是健康会话，要么是明确的错误
/// - 同一时间最多只有一次重建
pub struct SessionManager {
    config: Config,
    launcher: Arc<dyn BrowserLauncher>,
    sink: Arc<dyn EventSink>,
    current: RwLock<Option<SessionHandle>>,
    state: RecoveryState,
    construct_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(config: Config, launcher: Arc<dyn BrowserLauncher>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            launcher,
            sink,
            current: RwLock::new(None),
            state: RecoveryState::default(),
            construct_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> &RecoveryState {
        &self.state
    }

    /// 返回当前健康会话；不触发创建或导航
    pub fn get_singleton(&self) -> Option<SessionHandle> {
        if self.state.is_context_closed() {
            return None;
        }
        let current = match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        current.filter(SessionHandle::is_open)
    }

    /// 取得健康会话，必要时重建
    ///
    /// 健康时原样返回，不导航、无副作用。
    pub async fn ensure_session(&self, target_url: Option<&str>) -> Result<SessionHandle> {
        if let Some(handle) = self.healthy() {
            return Ok(handle);
        }

        if self.state.is_recovering() {
            debug!("会话正在重建，等待 {:?}", RECOVERY_WAIT);
            tokio::time::sleep(RECOVERY_WAIT).await;
            if let Some(handle) = self.healthy() {
                return Ok(handle);
            }
        }

        let _lock = self.construct_lock.lock().await;
        // 等锁期间可能已有其他调用方完成重建
        if let Some(handle) = self.healthy() {
            return Ok(handle);
        }

        let _guard = RecoveringGuard::acquire(&self.state.recovering);

        if let Some(previous) = self.take_current() {
            if let Err(e) = previous.context.close().await {
                debug!("关闭旧的浏览器上下文失败（忽略）: {:#}", e);
            }
        }
        self.state.context_closed.store(false, Ordering::SeqCst);

        let url = target_url.unwrap_or(&self.config.target_url);
        let handle = self.construct(url).await?;
        self.replace_current(Some(handle.clone()));
        Ok(handle)
    }

    /// 关闭当前会话（进程退出时调用）
    pub async fn shutdown(&self) {
        if let Some(handle) = self.take_current() {
            info!("🛑 关闭浏览器会话");
            if let Err(e) = handle.context.close().await {
                warn!("关闭浏览器失败: {:#}", e);
            }
        }
    }

    /// 与 `get_singleton` 相同，但会记录观察到的上下文关闭
    fn healthy(&self) -> Option<SessionHandle> {
        let current = match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }?;
        if current.context.is_closed() && !self.state.context_closed.swap(true, Ordering::SeqCst) {
            info!("🧯 浏览器上下文已关闭，将重新创建");
        }
        self.get_singleton()
    }

    fn take_current(&self) -> Option<SessionHandle> {
        match self.current.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn replace_current(&self, handle: Option<SessionHandle>) {
        match self.current.write() {
            Ok(mut guard) => *guard = handle,
            Err(poisoned) => *poisoned.into_inner() = handle,
        }
    }

    async fn construct(&self, url: &str) -> Result<SessionHandle> {
        let outcome = LaunchPlan::from_config(&self.config)
            .execute(self.launcher.as_ref())
            .await?;
        let context = outcome.context;

        match self.prepare(Arc::clone(&context), url).await {
            Ok(page) => {
                let handle = SessionHandle {
                    pid: context.pid(),
                    context,
                    page,
                    origin_url: url.to_string(),
                    profile_dir: outcome.strategy.profile_dir.clone(),
                    strategy: outcome.strategy.name,
                };
                logging::log_session_init(url, &handle.profile_dir, handle.strategy, handle.pid);
                self.sink.log_event(AgentEvent::SessionInit {
                    url: url.to_string(),
                    profile_dir: handle.profile_dir.display().to_string(),
                    strategy: handle.strategy.to_string(),
                    pid: handle.pid,
                });
                Ok(handle)
            }
            Err(e) => {
                // 不能留下占着用户数据目录的浏览器
                let _ = context.close().await;
                Err(e)
            }
        }
    }

    /// 选定第一个页面、导入旧 cookie、必要时导航、关闭多余标签页
    async fn prepare(&self, context: Arc<dyn BrowserContext>, url: &str) -> Result<Arc<dyn PageDriver>> {
        let pages = context.pages().await.context("获取页面列表失败")?;
        // 已关闭的标签页不能交给调用方
        let page = match pages.iter().find(|page| !page.is_closed()) {
            Some(page) => Arc::clone(page),
            None => context.new_page().await.context("创建页面失败")?,
        };
        if page.is_closed() {
            anyhow::bail!("新建的页面已关闭");
        }

        self.import_legacy_cookies(page.as_ref()).await;

        let current_url = page.url().await.unwrap_or_default();
        if BLANK_URLS.contains(&current_url.as_str()) {
            if let Err(e) = page.goto(url).await {
                warn!("⚠️ 初始导航失败，可手动导航: {:#}", e);
            }
        } else {
            debug!("页面已在 {}，不重新导航", current_url);
        }

        for extra in pages.iter().filter(|p| !Arc::ptr_eq(p, &page) && !p.is_closed()) {
            if let Err(e) = extra.close().await {
                debug!("关闭多余标签页失败: {:#}", e);
            }
        }

        self.forward_signals(page.as_ref()).await;
        Ok(page)
    }

    /// 把旧版 cookies.json 导入持久化 profile，失败忽略
    async fn import_legacy_cookies(&self, page: &dyn PageDriver) {
        let path = &self.config.legacy_cookies_file;
        if !path.exists() {
            return;
        }
        let result: Result<usize> = async {
            let raw = tokio::fs::read_to_string(path).await?;
            let cookies: Vec<CookieParam> = serde_json::from_str(&raw)?;
            let count = cookies.len();
            if count > 0 {
                page.set_cookies(cookies).await?;
            }
            Ok(count)
        }
        .await;
        match result {
            Ok(0) => {}
            Ok(count) => info!("🍪 从 {} 导入 {} 个旧 cookie", path.display(), count),
            Err(e) => warn!("⚠️ 导入旧 cookie 失败（继续）: {:#}", e),
        }
    }

    /// 把页面控制台 / 异常 / 关闭信号转发到日志和仪表盘
    async fn forward_signals(&self, page: &dyn PageDriver) {
        let mut signals = match page.signals().await {
            Ok(rx) => rx,
            Err(e) => {
                debug!("无法订阅页面信号: {:#}", e);
                return;
            }
        };
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                match signal {
                    PageSignal::Console { level, text } => {
                        debug!("[console.{}] {}", level, text);
                        sink.log_event(AgentEvent::PageConsole { level, text });
                    }
                    PageSignal::Exception(message) => {
                        warn!("💥 页面异常: {}", message);
                        sink.log_event(AgentEvent::Exception { message });
                    }
                    PageSignal::Closed => {
                        info!("📕 页面已关闭，下个周期将重新创建");
                        sink.log_event(AgentEvent::log("page closed"));
                        break;
                    }
                }
            }
        });
    }
}
