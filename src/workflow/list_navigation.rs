//! 启动导航 - 流程层
//!
//! 启动时把会话页面带到监控列表：先进首页，再进列表，确认地址和内容。
//! 只在空白页或站点内页面上执行，用户去了别的网站就不动。

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;
use crate::infrastructure::{wait_for_any, PageDriver};
use crate::services::scraper::ARTICLE_SELECTOR;

/// 最多尝试次数
const MAX_ATTEMPTS: usize = 3;
/// 两次尝试之间的等待
const RETRY_WAIT: Duration = Duration::from_secs(5);
/// 出现限流提示后的等待
const RATE_LIMIT_WAIT: Duration = Duration::from_secs(15 * 60);
/// 首页加载完成后停留的时间
const HOME_SETTLE: Duration = Duration::from_secs(2);
const HOME_TIMEOUT: Duration = Duration::from_secs(20);
const LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// 首页主栏
pub const PRIMARY_COLUMN_SELECTOR: &str = r#"[data-testid="primaryColumn"]"#;
/// 列表页头
pub const LIST_HEADER_SELECTOR: &str = r#"[data-testid="ListHeader"]"#;
/// 站点限流提示文本
pub const RATE_LIMIT_TEXT: &str = "Rate limit exceeded";

/// 页面上是否出现限流提示
const RATE_LIMIT_JS: &str = r#"(() => (document.body && document.body.innerText || '').includes('Rate limit exceeded'))()"#;

/// 启动导航结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// 已确认在列表页
    Arrived,
    /// 用户在其他网站，没有导航
    LeftAlone,
}

/// 启动导航
pub struct ListNavigator {
    home_url: String,
    list_url: String,
    host: String,
    /// 到达后地址中应包含的路径片段
    paths: Vec<String>,
}

impl ListNavigator {
    pub fn new(config: &Config) -> Self {
        Self {
            home_url: config.home_url.clone(),
            list_url: config.target_url.clone(),
            host: config.monitored_host.clone(),
            paths: config.monitored_paths.clone(),
        }
    }

    /// 空白页或站点内页面才导航
    pub fn should_navigate(&self, url: &str) -> bool {
        url == "about:blank" || url.is_empty() || url.contains(&self.host)
    }

    /// 按需导航到列表页
    pub async fn navigate_if_idle(&self, page: &dyn PageDriver) -> Result<NavigationOutcome> {
        let url = page.url().await.context("读取页面地址失败")?;
        if !self.should_navigate(&url) {
            info!("🔶 用户在其他页面 ({})，保持不动", url);
            return Ok(NavigationOutcome::LeftAlone);
        }
        self.navigate(page).await?;
        Ok(NavigationOutcome::Arrived)
    }

    /// 导航到列表页，失败时重试
    pub async fn navigate(&self, page: &dyn PageDriver) -> Result<()> {
        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            info!("🧭 导航到列表 (第 {}/{} 次)", attempt, MAX_ATTEMPTS);
            match self.try_navigate(page).await {
                Ok(()) => {
                    info!("✅ 列表页已加载: {}", self.list_url);
                    return Ok(());
                }
                Err(e) => {
                    warn!("⚠️ 第 {} 次导航失败: {:#}", attempt, e);
                    last_error = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        sleep(RETRY_WAIT).await;
                    }
                }
            }
        }
        let e = last_error.map(|e| format!("{:#}", e)).unwrap_or_default();
        bail!("{} 次尝试后仍无法打开列表: {}", MAX_ATTEMPTS, e)
    }

    async fn try_navigate(&self, page: &dyn PageDriver) -> Result<()> {
        if self.is_rate_limited(page).await {
            warn!("⛔ 检测到限流提示，等待 {} 分钟", RATE_LIMIT_WAIT.as_secs() / 60);
            sleep(RATE_LIMIT_WAIT).await;
        }

        page.goto(&self.home_url).await.context("打开首页失败")?;
        if wait_for_any(page, &[PRIMARY_COLUMN_SELECTOR, ARTICLE_SELECTOR], HOME_TIMEOUT)
            .await
            .is_none()
        {
            bail!("首页内容未出现");
        }
        sleep(HOME_SETTLE).await;

        page.goto(&self.list_url).await.context("打开列表失败")?;
        let current = page.url().await.context("读取页面地址失败")?;
        if !self.paths.iter().any(|path| current.contains(path.as_str())) {
            bail!("页面不对: {}", current);
        }

        if wait_for_any(page, &[ARTICLE_SELECTOR, LIST_HEADER_SELECTOR], LIST_TIMEOUT)
            .await
            .is_none()
        {
            bail!("列表内容未出现");
        }
        Ok(())
    }

    async fn is_rate_limited(&self, page: &dyn PageDriver) -> bool {
        page.eval_as::<bool>(RATE_LIMIT_JS).await.unwrap_or(false)
    }
}
