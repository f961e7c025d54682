//! 列表抓取服务 - 业务能力层
//!
//! 只负责"把页面上可见的帖子读成结构化数据"能力，不关心流程

use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::infrastructure::{wait_for_any, PageDriver};
use crate::models::profile::normalize_handle;
use crate::models::ScrapedItem;

/// 帖子元素
pub const ARTICLE_SELECTOR: &str = r#"article[role="article"]"#;
/// 列表为空的提示
pub const EMPTY_STATE_SELECTOR: &str = r#"[data-testid="empty-timeline"]"#;
/// 在页面中收集每个帖子的原始字段
///
/// 单个帖子出错只影响它自己的条目。页面上不留任何标记，
/// 帖子靠详情页链接定位，刷新后依然有效。
const SCRAPE_JS: &str = r#"
(() => {
    const articles = Array.from(document.querySelectorAll('article[role="article"]'));
    return articles.map((article) => {
        try {
            const handleLink = Array.from(article.querySelectorAll('a[role="link"]'))
                .find(a => (a.textContent || '').includes('@'));
            const statusLink = article.querySelector('a[href*="/status/"]');
            const textEl = article.querySelector('[data-testid="tweetText"]');
            const media = Array.from(article.querySelectorAll('img, [data-testid="tweetPhoto"] img'))
                .map(img => img.getAttribute('src'))
                .filter(Boolean);
            return {
                handle: handleLink ? handleLink.textContent : null,
                href: statusLink ? statusLink.getAttribute('href') : null,
                text: textEl ? textEl.textContent : '',
                media,
            };
        } catch (e) {
            return { error: String(e) };
        }
    });
})()
"#;

/// 脚本返回的单个帖子
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    handle: Option<String>,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    media: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

/// 列表抓取服务
pub struct Scraper {
    timeout: Duration,
    status_id: Regex,
}

impl Scraper {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            timeout,
            status_id: Regex::new(r"status/(\d+)")?,
        })
    }

    /// 读取当前页面上可见的帖子，按页面顺序返回
    ///
    /// 超时或列表为空时返回空列表，不视为错误。
    pub async fn scrape_visible(&self, page: &dyn PageDriver) -> Vec<ScrapedItem> {
        info!("🔍 开始抓取帖子...");

        match wait_for_any(page, &[ARTICLE_SELECTOR, EMPTY_STATE_SELECTOR], self.timeout).await {
            Some(0) => {}
            Some(_) => {
                info!("列表为空");
                return Vec::new();
            }
            None => {
                info!("等待列表超时，本轮视为没有帖子");
                return Vec::new();
            }
        }

        let entries: Vec<JsonValue> = match page.eval_as(SCRAPE_JS).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("抓取帖子失败: {:#}", e);
                return Vec::new();
            }
        };
        debug!("页面上共有 {} 个帖子", entries.len());

        self.parse_entries(entries)
    }

    /// 逐条解析；任何一条失败只跳过它自己
    fn parse_entries(&self, entries: Vec<JsonValue>) -> Vec<ScrapedItem> {
        entries
            .into_iter()
            .filter_map(|entry| match self.parse_entry(entry) {
                Ok(item) => Some(item),
                Err(reason) => {
                    debug!("跳过帖子: {}", reason);
                    None
                }
            })
            .collect()
    }

    fn parse_entry(&self, entry: JsonValue) -> Result<ScrapedItem, String> {
        let raw: RawEntry = serde_json::from_value(entry).map_err(|e| format!("字段格式错误: {}", e))?;
        if let Some(error) = raw.error {
            return Err(format!("脚本错误: {}", error));
        }

        let author = raw.handle.as_deref().map(normalize_handle).unwrap_or_default();
        if author.is_empty() {
            return Err("缺少作者".to_string());
        }

        let id = raw
            .href
            .as_deref()
            .and_then(|href| self.status_id.captures(href))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| format!("@{} 的帖子缺少 ID", author))?;

        let mut media: Vec<String> = Vec::with_capacity(raw.media.len());
        for src in raw.media {
            if !src.is_empty() && !media.contains(&src) {
                media.push(src);
            }
        }

        Ok(ScrapedItem {
            author,
            text: raw.text.unwrap_or_default().trim().to_string(),
            media,
            element: article_selector(&id),
            id,
        })
    }
}

/// 按帖子 ID 定位帖子元素的选择器
///
/// 只依赖帖子自身的详情页链接，页面刷新后重新渲染也能找到。
pub fn article_selector(id: &str) -> String {
    format!(r#"{}:has(a[href$="/status/{}"])"#, ARTICLE_SELECTOR, id)
}
