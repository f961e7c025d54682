//! 页面驱动 - 基础设施层
//!
//! 唯一接触真实浏览器的接缝：上层只通过这几个 trait 操作页面，
//! 测试中可以用内存实现替换。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::browser::launch::LaunchStrategy;

/// 轮询元素的间隔
const POLL_STEP: Duration = Duration::from_millis(200);

/// 页面上报的可观测信号
#[derive(Debug, Clone, PartialEq)]
pub enum PageSignal {
    /// 页面控制台输出
    Console { level: String, text: String },
    /// 页面未捕获异常
    Exception(String),
    /// 页面已关闭
    Closed,
}

/// 页面驱动
///
/// 职责：
/// - 持有一个页面（tab）
/// - 暴露导航、执行 JS、点击、输入、截图等能力
/// - 不认识帖子 / 回复
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// 页面是否已关闭（同步、无副作用）
    fn is_closed(&self) -> bool;

    /// 当前地址
    async fn url(&self) -> Result<String>;

    async fn goto(&self, url: &str) -> Result<()>;

    async fn reload(&self) -> Result<()>;

    /// 执行 JS 代码并返回 JSON 结果
    async fn eval(&self, js_code: String) -> Result<JsonValue>;

    /// 选择器对应的元素当前是否存在且可见
    async fn is_visible(&self, selector: &str) -> Result<bool>;

    async fn click(&self, selector: &str) -> Result<()>;

    /// 向选择器对应的元素输入文本
    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;

    /// 截取当前视口（JPEG）
    async fn screenshot_jpeg(&self, quality: i64) -> Result<Vec<u8>>;

    async fn set_cookies(&self, cookies: Vec<CookieParam>) -> Result<()>;

    /// 订阅控制台 / 异常 / 关闭信号
    async fn signals(&self) -> Result<mpsc::UnboundedReceiver<PageSignal>>;

    async fn close(&self) -> Result<()>;
}

impl dyn PageDriver + '_ {
    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval(js_code.into()).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }
}

/// 浏览器上下文（持久化 profile + 其中的页面）
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// 上下文是否已关闭（浏览器退出或连接断开）
    fn is_closed(&self) -> bool;

    /// 浏览器进程 ID（仅用于诊断）
    fn pid(&self) -> Option<u32>;

    /// 当前打开的所有页面，按创建顺序
    async fn pages(&self) -> Result<Vec<Arc<dyn PageDriver>>>;

    async fn new_page(&self) -> Result<Arc<dyn PageDriver>>;

    async fn close(&self) -> Result<()>;
}

/// 按某个启动策略打开持久化上下文
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, strategy: &LaunchStrategy) -> Result<Arc<dyn BrowserContext>>;
}

/// 等待元素出现
///
/// 超时视为“未找到”，返回 `false` 而不是错误。
pub async fn wait_for_selector(page: &dyn PageDriver, selector: &str, timeout: Duration) -> bool {
    wait_for_any(page, &[selector], timeout).await.is_some()
}

/// 等待多个选择器中任意一个出现，返回先出现者的下标
pub async fn wait_for_any(page: &dyn PageDriver, selectors: &[&str], timeout: Duration) -> Option<usize> {
    let deadline = Instant::now() + timeout;
    loop {
        for (idx, selector) in selectors.iter().enumerate() {
            match page.is_visible(selector).await {
                Ok(true) => return Some(idx),
                Ok(false) => {}
                Err(e) => debug!("检查元素 {} 失败: {}", selector, e),
            }
        }
        if page.is_closed() || Instant::now() >= deadline {
            return None;
        }
        sleep(POLL_STEP).await;
    }
}
