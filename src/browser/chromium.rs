//! 基于 chromiumoxide 的页面驱动实现

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::system_info::GetProcessInfoParams;
use chromiumoxide::cdp::browser_protocol::target::EventTargetDestroyed;
use chromiumoxide::cdp::js_protocol::runtime::{EventConsoleApiCalled, EventExceptionThrown};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Handler, Page};
use futures::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::browser::launch::{LaunchOptions, LaunchStrategy};
use crate::error::{AppError, BrowserError};
use crate::infrastructure::{BrowserContext, BrowserLauncher, PageDriver, PageSignal};

/// 启动本地 Chromium 并打开持久化 profile
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, strategy: &LaunchStrategy) -> Result<Arc<dyn BrowserContext>> {
        let dir = &strategy.profile_dir;
        std::fs::create_dir_all(dir).with_context(|| format!("无法创建用户数据目录: {}", dir.display()))?;

        if profile_in_use(dir) {
            return Err(AppError::Browser(BrowserError::ProfileLocked { dir: dir.clone() }).into());
        }

        let config = build_browser_config(dir, &strategy.options)?;

        info!("🚀 启动浏览器 (策略: {})...", strategy.name);
        let (browser, handler) = Browser::launch(config).await.map_err(|e| {
            error!("启动浏览器失败: {}", e);
            AppError::launch_failed(dir.clone(), e)
        })?;
        debug!("浏览器启动成功");

        let closed = Arc::new(AtomicBool::new(false));
        let handler_task = spawn_handler_task(handler, Arc::clone(&closed));

        // 添加短暂延迟以等待浏览器状态同步
        sleep(Duration::from_millis(300)).await;

        let pid = query_browser_pid(&browser).await;

        Ok(Arc::new(ChromiumContext {
            browser: Mutex::new(browser),
            closed,
            handler_task: std::sync::Mutex::new(Some(handler_task)),
            pid,
        }))
    }
}

/// chromiumoxide 的浏览器上下文
pub struct ChromiumContext {
    browser: Mutex<Browser>,
    closed: Arc<AtomicBool>,
    handler_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    pid: Option<u32>,
}

impl ChromiumContext {
    async fn wrap_page(&self, page: Page) -> Arc<dyn PageDriver> {
        let (closed_tx, closed_rx) = watch::channel(false);

        // 目标被销毁即视为页面关闭
        let listener = {
            let browser = self.browser.lock().await;
            browser.event_listener::<EventTargetDestroyed>().await
        };
        match listener {
            Ok(mut destroyed) => {
                let target = page.target_id().clone();
                tokio::spawn(async move {
                    while let Some(event) = destroyed.next().await {
                        if event.target_id == target {
                            info!("📕 页面已关闭，下个周期将重新创建");
                            let _ = closed_tx.send(true);
                            break;
                        }
                    }
                });
            }
            Err(e) => warn!("无法监听页面关闭事件: {}", e),
        }

        Arc::new(ChromiumPage {
            page,
            closed: closed_rx,
            context_closed: Arc::clone(&self.closed),
        })
    }
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn pages(&self) -> Result<Vec<Arc<dyn PageDriver>>> {
        let pages = {
            let browser = self.browser.lock().await;
            browser.pages().await?
        };
        debug!("获取到 {} 个页面", pages.len());

        let mut drivers = Vec::with_capacity(pages.len());
        for page in pages {
            drivers.push(self.wrap_page(page).await);
        }
        Ok(drivers)
    }

    async fn new_page(&self) -> Result<Arc<dyn PageDriver>> {
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page("about:blank").await.map_err(|e| {
                error!("创建新页面失败: {}", e);
                AppError::Browser(BrowserError::PageCreationFailed { source: Box::new(e) })
            })?
        };
        Ok(self.wrap_page(page).await)
    }

    async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        let result = browser.close().await;
        let _ = browser.wait().await;
        if let Ok(mut task) = self.handler_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
        self.closed.store(true, Ordering::SeqCst);
        result?;
        Ok(())
    }
}

/// chromiumoxide 的页面
pub struct ChromiumPage {
    page: Page,
    closed: watch::Receiver<bool>,
    context_closed: Arc<AtomicBool>,
}

#[async_trait]
impl PageDriver for ChromiumPage {
    fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.context_closed.load(Ordering::SeqCst)
    }

    async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await.map_err(|e| {
            error!("导航到 {} 失败: {}", url, e);
            AppError::navigation_failed(url, e)
        })?;
        debug!("页面导航成功: {}", url);
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.page.reload().await?;
        Ok(())
    }

    async fn eval(&self, js_code: String) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        let js_code = format!(
            r#"
            (() => {{
                const el = document.querySelector({});
                if (!el) return false;
                const rect = el.getBoundingClientRect();
                return rect.width > 0 && rect.height > 0;
            }})()
            "#,
            serde_json::to_string(selector)?
        );
        let value = self.eval(js_code).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| AppError::Browser(BrowserError::ElementNotFound { selector: selector.to_string() }))?;
        element.click().await?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| AppError::Browser(BrowserError::ElementNotFound { selector: selector.to_string() }))?;
        element.focus().await?;
        element.type_str(text).await?;
        Ok(())
    }

    async fn screenshot_jpeg(&self, quality: i64) -> Result<Vec<u8>> {
        let bytes = self
            .page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Jpeg)
                    .quality(quality)
                    .full_page(false)
                    .build(),
            )
            .await?;
        Ok(bytes)
    }

    async fn set_cookies(&self, cookies: Vec<CookieParam>) -> Result<()> {
        self.page.set_cookies(cookies).await?;
        Ok(())
    }

    async fn signals(&self) -> Result<mpsc::UnboundedReceiver<PageSignal>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut console = self.page.event_listener::<EventConsoleApiCalled>().await?;
        let console_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = console.next().await {
                let text = event
                    .args
                    .iter()
                    .map(|arg| match (&arg.value, &arg.description) {
                        (Some(JsonValue::String(s)), _) => s.clone(),
                        (Some(v), _) => v.to_string(),
                        (None, Some(d)) => d.clone(),
                        (None, None) => String::new(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                let level = format!("{:?}", event.r#type).to_lowercase();
                if console_tx.send(PageSignal::Console { level, text }).is_err() {
                    break;
                }
            }
        });

        let mut exceptions = self.page.event_listener::<EventExceptionThrown>().await?;
        let exception_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                let details = &event.exception_details;
                let message = details
                    .exception
                    .as_ref()
                    .and_then(|obj| obj.description.clone())
                    .unwrap_or_else(|| details.text.clone());
                if exception_tx.send(PageSignal::Exception(message)).is_err() {
                    break;
                }
            }
        });

        let mut closed = self.closed.clone();
        tokio::spawn(async move {
            loop {
                if *closed.borrow() {
                    let _ = tx.send(PageSignal::Closed);
                    break;
                }
                if closed.changed().await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        self.page.clone().close().await?;
        Ok(())
    }
}

/// 构建 chromiumoxide 启动配置
fn build_browser_config(profile_dir: &Path, options: &LaunchOptions) -> Result<BrowserConfig> {
    let (width, height) = options.window_size;
    let mut builder = BrowserConfig::builder()
        .user_data_dir(profile_dir)
        .window_size(width, height);

    builder = if options.headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };

    if let Some(executable) = resolve_executable(options) {
        debug!("浏览器可执行文件: {}", executable.display());
        builder = builder.chrome_executable(executable);
    }

    if options.debug_port > 0 {
        builder = builder.port(options.debug_port);
    }

    let mut args = options.args.clone();
    if options.devtools {
        args.push("--auto-open-devtools-for-tabs".to_string());
    }
    builder = builder.args(args);

    builder.build().map_err(|e| {
        error!("配置浏览器失败: {}", e);
        AppError::Browser(BrowserError::ConfigurationFailed(e)).into()
    })
}

/// 按可执行文件 / 渠道查找浏览器
fn resolve_executable(options: &LaunchOptions) -> Option<PathBuf> {
    if let Some(path) = &options.executable {
        return Some(path.clone());
    }
    let channel = options.channel.as_deref()?;
    let candidates: &[&str] = match channel {
        "chrome" => &["google-chrome", "google-chrome-stable", "chrome"],
        "chrome-beta" => &["google-chrome-beta"],
        "chrome-canary" => &["google-chrome-unstable", "chrome-canary"],
        "chromium" => &["chromium", "chromium-browser"],
        "msedge" => &["microsoft-edge", "microsoft-edge-stable", "msedge"],
        other => return find_on_path(other),
    };
    candidates.iter().find_map(|name| find_on_path(name))
}

fn find_on_path(binary: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// 用户数据目录是否被另一个仍在运行的浏览器占用
///
/// Chromium 在目录下放一个指向 `<host>-<pid>` 的 SingletonLock 符号链接；
/// 进程已经不存在的锁视为过期。
fn profile_in_use(dir: &Path) -> bool {
    let lock = dir.join("SingletonLock");
    if std::fs::symlink_metadata(&lock).is_err() {
        return false;
    }
    let target = match std::fs::read_link(&lock) {
        Ok(target) => target,
        Err(_) => return true,
    };
    let pid = target
        .to_string_lossy()
        .rsplit('-')
        .next()
        .and_then(|pid| pid.parse::<u32>().ok());
    match pid {
        Some(pid) if cfg!(target_os = "linux") => Path::new(&format!("/proc/{}", pid)).exists(),
        _ => true,
    }
}

fn spawn_handler_task(mut handler: Handler, closed: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("浏览器事件处理错误: {}", e);
            }
        }
        info!("🧯 浏览器上下文已关闭，下个周期将重新创建");
        closed.store(true, Ordering::SeqCst);
    })
}

async fn query_browser_pid(browser: &Browser) -> Option<u32> {
    let response = browser.execute(GetProcessInfoParams::default()).await.ok()?;
    response
        .result
        .process_info
        .iter()
        .find(|process| process.r#type == "browser")
        .and_then(|process| u32::try_from(process.id).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_executable_prefers_explicit_path() {
        let options = LaunchOptions {
            headless: true,
            executable: Some(PathBuf::from("/opt/custom/chrome")),
            channel: Some("chrome".to_string()),
            devtools: false,
            debug_port: 0,
            args: Vec::new(),
            window_size: (1280, 860),
        };
        assert_eq!(resolve_executable(&options), Some(PathBuf::from("/opt/custom/chrome")));
    }

    #[test]
    fn test_profile_not_in_use_without_lock() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!profile_in_use(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_lock_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("somehost-4000000000", dir.path().join("SingletonLock")).unwrap();
        // pid 4000000000 不可能存在
        if cfg!(target_os = "linux") {
            assert!(!profile_in_use(dir.path()));
        }
    }

    #[tokio::test]
    #[ignore] // 需要本机安装 Chromium：cargo test -- --ignored
    async fn test_launch_real_browser() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::Config {
            user_data_dir: dir.path().join("profile"),
            headless: true,
            ..crate::config::Config::default()
        };
        let plan = crate::browser::LaunchPlan::from_config(&config);
        let outcome = plan.execute(&ChromiumLauncher::new()).await.expect("启动浏览器失败");
        let page = outcome.context.new_page().await.expect("创建页面失败");
        assert!(!page.is_closed());
        outcome.context.close().await.expect("关闭浏览器失败");
    }
}
