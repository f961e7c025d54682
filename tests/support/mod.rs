//! 测试用的内存实现
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;

use watchlist_agent::browser::LaunchStrategy;
use watchlist_agent::error::BrowserError;
use watchlist_agent::infrastructure::{BrowserContext, BrowserLauncher, PageDriver, PageSignal};
use watchlist_agent::services::TextGenerator;
use watchlist_agent::{AppError, Config};

pub const LIST_URL: &str = "https://x.com/i/lists/1";

/// 脚本写进 DOM 的临时属性，页面刷新后消失
pub const DOM_MARK: &str = "data-agent-ref";

/// 所有拟人化延迟为 0 的测试配置
pub fn test_config(dir: &Path) -> Config {
    Config {
        target_url: LIST_URL.to_string(),
        user_data_dir: dir.join("profile"),
        legacy_cookies_file: dir.join("cookies.json"),
        seen_store_file: dir.join("memory.json"),
        reply_journal_file: dir.join("handled_replies.json"),
        profiles_dir: dir.join("profiles"),
        backup_dir: dir.join("backups"),
        poll_interval: Duration::from_secs(60),
        max_backoff: Duration::from_secs(300),
        scrape_timeout: Duration::from_secs(1),
        pre_reply_delay_ms: (0, 0),
        keystroke_delay_ms: (0, 0),
        pre_submit_delay_ms: (0, 0),
        settle_delay: Duration::ZERO,
        editor_timeout: Duration::from_millis(400),
        llm_retry_delay: Duration::from_millis(10),
        ..Config::default()
    }
}

/// 一条抓取脚本返回的帖子
pub fn entry(author: &str, id: &str, text: &str) -> JsonValue {
    json!({
        "handle": format!("@{}", author),
        "href": format!("/{}/status/{}", author, id),
        "text": text,
        "media": [],
    })
}

// ========== 页面 ==========

pub struct FakePage {
    url: Mutex<String>,
    closed: AtomicBool,
    visible: Mutex<HashSet<String>>,
    scrape: Mutex<JsonValue>,
    actions: Mutex<Vec<String>>,
    typed: Mutex<String>,
    failing_click: Mutex<Option<(String, bool)>>,
    fail_reload: AtomicBool,
    rate_limited: AtomicBool,
    redirects: Mutex<HashMap<String, String>>,
    click_navigations: Mutex<Vec<(String, String)>>,
    signals: Mutex<Option<mpsc::UnboundedSender<PageSignal>>>,
}

impl FakePage {
    pub fn at(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: Mutex::new(url.to_string()),
            closed: AtomicBool::new(false),
            visible: Mutex::new(HashSet::new()),
            scrape: Mutex::new(json!([])),
            actions: Mutex::new(Vec::new()),
            typed: Mutex::new(String::new()),
            failing_click: Mutex::new(None),
            fail_reload: AtomicBool::new(false),
            rate_limited: AtomicBool::new(false),
            redirects: Mutex::new(HashMap::new()),
            click_navigations: Mutex::new(Vec::new()),
            signals: Mutex::new(None),
        })
    }

    pub fn blank() -> Arc<Self> {
        Self::at("about:blank")
    }

    pub fn show(&self, selectors: &[&str]) {
        let mut visible = self.visible.lock().unwrap();
        for selector in selectors {
            visible.insert(selector.to_string());
        }
    }

    pub fn set_scrape(&self, entries: JsonValue) {
        *self.scrape.lock().unwrap() = entries;
    }

    /// 点击包含 `needle` 的选择器时失败
    pub fn fail_clicks_on(&self, needle: &str) {
        *self.failing_click.lock().unwrap() = Some((needle.to_string(), false));
    }

    /// 只让下一次匹配的点击失败
    pub fn fail_next_click_on(&self, needle: &str) {
        *self.failing_click.lock().unwrap() = Some((needle.to_string(), true));
    }

    /// 页面上显示限流提示
    pub fn set_rate_limited(&self, limited: bool) {
        self.rate_limited.store(limited, Ordering::SeqCst);
    }

    /// 导航到 `from` 时实际落在 `to`（例如被重定向到登录页）
    pub fn redirect(&self, from: &str, to: &str) {
        self.redirects.lock().unwrap().insert(from.to_string(), to.to_string());
    }

    /// 点击包含 `needle` 的元素后页面跳转到 `url`
    pub fn navigate_on_click(&self, needle: &str, url: &str) {
        self.click_navigations
            .lock()
            .unwrap()
            .push((needle.to_string(), url.to_string()));
    }

    pub fn fail_reload(&self, fail: bool) {
        self.fail_reload.store(fail, Ordering::SeqCst);
    }

    pub fn set_url(&self, url: &str) {
        *self.url.lock().unwrap() = url.to_string();
    }

    /// 模拟用户关掉了标签页
    pub fn close_now(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(tx) = self.signals.lock().unwrap().as_ref() {
            let _ = tx.send(PageSignal::Closed);
        }
    }

    pub fn emit(&self, signal: PageSignal) {
        if let Some(tx) = self.signals.lock().unwrap().as_ref() {
            let _ = tx.send(signal);
        }
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.actions().iter().filter(|a| a.starts_with(prefix)).count()
    }

    pub fn typed(&self) -> String {
        self.typed.lock().unwrap().clone()
    }

    fn record(&self, action: String) {
        self.actions.lock().unwrap().push(action);
    }
}

#[async_trait]
impl PageDriver for FakePage {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn url(&self) -> Result<String> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.record(format!("goto:{}", url));
        let landed = self.redirects.lock().unwrap().get(url).cloned();
        self.set_url(landed.as_deref().unwrap_or(url));
        Ok(())
    }

    /// 与真实页面一样，刷新会丢掉脚本写进 DOM 的临时标记
    async fn reload(&self) -> Result<()> {
        self.record("reload".to_string());
        if self.fail_reload.load(Ordering::SeqCst) {
            anyhow::bail!("net::ERR_CONNECTION_RESET");
        }
        self.visible.lock().unwrap().retain(|s| !s.contains(DOM_MARK));
        Ok(())
    }

    async fn eval(&self, js_code: String) -> Result<JsonValue> {
        if js_code.contains("tweetText") {
            self.record("scrape".to_string());
            return Ok(self.scrape.lock().unwrap().clone());
        }
        if js_code.contains("Rate limit exceeded") {
            return Ok(JsonValue::Bool(self.rate_limited.load(Ordering::SeqCst)));
        }
        self.record("eval".to_string());
        Ok(JsonValue::Bool(true))
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        Ok(self.visible.lock().unwrap().contains(selector))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.record(format!("click:{}", selector));
        let not_found = || -> Result<()> {
            Err(AppError::Browser(BrowserError::ElementNotFound {
                selector: selector.to_string(),
            })
            .into())
        };
        // 临时标记只在刷新前有效
        if selector.contains(DOM_MARK) && !self.visible.lock().unwrap().iter().any(|s| s.contains(DOM_MARK)) {
            return not_found();
        }
        {
            let mut failing = self.failing_click.lock().unwrap();
            if let Some((needle, once)) = failing.clone() {
                if selector.contains(needle.as_str()) {
                    if once {
                        *failing = None;
                    }
                    return not_found();
                }
            }
        }
        let target = self
            .click_navigations
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| selector.contains(needle.as_str()))
            .map(|(_, url)| url.clone());
        if let Some(url) = target {
            self.set_url(&url);
        }
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        self.record(format!("type:{}", selector));
        self.typed.lock().unwrap().push_str(text);
        Ok(())
    }

    async fn screenshot_jpeg(&self, _quality: i64) -> Result<Vec<u8>> {
        Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
    }

    async fn set_cookies(&self, cookies: Vec<CookieParam>) -> Result<()> {
        self.record(format!("cookies:{}", cookies.len()));
        Ok(())
    }

    async fn signals(&self) -> Result<mpsc::UnboundedReceiver<PageSignal>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.signals.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        self.record("close".to_string());
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ========== 上下文 ==========

pub struct FakeContext {
    closed: AtomicBool,
    pages: Mutex<Vec<Arc<FakePage>>>,
    pub close_calls: AtomicUsize,
}

impl FakeContext {
    pub fn with_pages(pages: Vec<Arc<FakePage>>) -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            pages: Mutex::new(pages),
            close_calls: AtomicUsize::new(0),
        })
    }

    /// 模拟浏览器进程退出
    pub fn crash(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn first_page(&self) -> Option<Arc<FakePage>> {
        self.pages.lock().unwrap().first().cloned()
    }
}

#[async_trait]
impl BrowserContext for FakeContext {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn pages(&self) -> Result<Vec<Arc<dyn PageDriver>>> {
        Ok(self
            .pages
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.clone() as Arc<dyn PageDriver>)
            .collect())
    }

    async fn new_page(&self) -> Result<Arc<dyn PageDriver>> {
        let page = FakePage::blank();
        self.pages.lock().unwrap().push(Arc::clone(&page));
        Ok(page)
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ========== 启动器 ==========

#[derive(Default)]
pub struct FakeLauncher {
    launches: AtomicUsize,
    attempts: Mutex<Vec<(&'static str, PathBuf)>>,
    locked_dirs: Mutex<HashSet<PathBuf>>,
    failing_strategies: Mutex<HashSet<&'static str>>,
    fail_all: AtomicBool,
    delay: Mutex<Duration>,
    queued: Mutex<VecDeque<Arc<FakeContext>>>,
    contexts: Mutex<Vec<Arc<FakeContext>>>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 下一次启动返回的上下文
    pub fn queue(&self, context: Arc<FakeContext>) {
        self.queued.lock().unwrap().push_back(context);
    }

    /// 下一次启动返回一个只有 `page` 的上下文
    pub fn queue_page(&self, page: Arc<FakePage>) {
        self.queue(FakeContext::with_pages(vec![page]));
    }

    pub fn lock_dir(&self, dir: impl Into<PathBuf>) {
        self.locked_dirs.lock().unwrap().insert(dir.into());
    }

    pub fn fail_strategy(&self, name: &'static str) {
        self.failing_strategies.lock().unwrap().insert(name);
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// 成功启动的次数
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// 所有尝试过的策略（含失败）
    pub fn attempts(&self) -> Vec<&'static str> {
        self.attempts.lock().unwrap().iter().map(|(name, _)| *name).collect()
    }

    pub fn contexts(&self) -> Vec<Arc<FakeContext>> {
        self.contexts.lock().unwrap().clone()
    }

    pub fn last_context(&self) -> Option<Arc<FakeContext>> {
        self.contexts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, strategy: &LaunchStrategy) -> Result<Arc<dyn BrowserContext>> {
        self.attempts
            .lock()
            .unwrap()
            .push((strategy.name, strategy.profile_dir.clone()));

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.locked_dirs.lock().unwrap().contains(&strategy.profile_dir) {
            return Err(AppError::Browser(BrowserError::ProfileLocked {
                dir: strategy.profile_dir.clone(),
            })
            .into());
        }
        if self.fail_all.load(Ordering::SeqCst) || self.failing_strategies.lock().unwrap().contains(strategy.name) {
            anyhow::bail!("Failed to launch the browser process: executable not found");
        }

        let context = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| FakeContext::with_pages(vec![FakePage::blank()]));
        self.contexts.lock().unwrap().push(Arc::clone(&context));
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(context)
    }
}

// ========== 文本生成 ==========

/// 依次返回预设结果，用完后重复最后一个
pub struct FakeGenerator {
    replies: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Result<String, String>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn always(reply: &str) -> Arc<Self> {
        Self::sequence(vec![Ok(reply.to_string())])
    }

    pub fn sequence(replies: Vec<Result<String, String>>) -> Arc<Self> {
        let last = replies.last().cloned().unwrap_or_else(|| Ok(String::new()));
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(last),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.last.lock().unwrap().clone());
        next.map_err(|e| anyhow::anyhow!(e))
    }
}
