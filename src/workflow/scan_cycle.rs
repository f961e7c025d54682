//! 扫描周期 - 流程层
//!
//! 核心职责：定义"一轮扫描"的完整处理流程
//!
//! 流程顺序：
//! 1. 页面不在监控列表上 → 本轮跳过（不抢用户的导航）
//! 2. 刷新 → 抓取
//! 3. 对每条未回复的帖子：限流 → 组装提示词 → 生成 → 回复
//! 4. 第一条回复成功后立即结束本轮

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::infrastructure::PageDriver;
use crate::models::{AgentEvent, ScrapedItem};
use crate::services::event_sink::EventSink;
use crate::services::llm_service::TextGenerator;
use crate::services::profile_store::ProfileStore;
use crate::services::reply_composer::ReplyComposer;
use crate::services::reply_journal::ReplyJournal;
use crate::services::reply_poster::{HumanPacing, ReplyPoster};
use crate::services::scraper::Scraper;
use crate::services::seen_store::SeenStore;
use crate::utils::truncate_text;
use crate::workflow::rate_window::RateLimiter;

/// 一轮扫描的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 页面不在监控范围内，没有抓取
    SkippedElsewhere,
    /// 正常完成
    Completed { replies: usize },
}

/// 只在监控页面上工作
#[derive(Debug, Clone)]
pub struct NavigationPolicy {
    host: String,
    paths: Vec<String>,
}

impl NavigationPolicy {
    pub fn new(host: impl Into<String>, paths: Vec<String>) -> Self {
        Self {
            host: host.into(),
            paths,
        }
    }

    pub fn is_monitored(&self, url: &str) -> bool {
        url.contains(&self.host) && self.paths.iter().any(|path| url.contains(path.as_str()))
    }
}

/// 扫描周期依赖的外部协作者
#[derive(Clone)]
pub struct CycleServices {
    pub generator: Arc<dyn TextGenerator>,
    pub profiles: Arc<dyn ProfileStore>,
    pub seen: Arc<dyn SeenStore>,
    pub journal: Arc<ReplyJournal>,
    pub sink: Arc<dyn EventSink>,
}

/// 扫描周期
///
/// - 编排一轮扫描的完整流程
/// - 不持有页面，由调用方传入
/// - 不持有限流状态，由扫描循环传入
pub struct ScanCycle {
    policy: NavigationPolicy,
    scraper: Scraper,
    poster: ReplyPoster,
    composer: ReplyComposer,
    generator: Arc<dyn TextGenerator>,
    seen: Arc<dyn SeenStore>,
    journal: Arc<ReplyJournal>,
    sink: Arc<dyn EventSink>,
}

impl ScanCycle {
    pub fn new(config: &Config, services: CycleServices) -> Result<Self> {
        Ok(Self {
            policy: NavigationPolicy::new(&config.monitored_host, config.monitored_paths.clone()),
            scraper: Scraper::new(config.scrape_timeout)?,
            poster: ReplyPoster::new(HumanPacing::from_config(config), Arc::clone(&services.sink)),
            composer: ReplyComposer::new(services.profiles, config.default_prompt.clone()),
            generator: services.generator,
            seen: services.seen,
            journal: services.journal,
            sink: services.sink,
        })
    }

    /// 执行一轮扫描
    ///
    /// 只有页面级错误（取地址、刷新）会向上抛出；单条帖子的问题都在内部消化。
    pub async fn run(&self, page: &dyn PageDriver, limiter: &mut RateLimiter) -> Result<CycleOutcome> {
        let url = page.url().await.context("读取页面地址失败")?;
        if !self.policy.is_monitored(&url) {
            info!("🟡 用户正在其他页面操作，本轮跳过以免打扰");
            return Ok(CycleOutcome::SkippedElsewhere);
        }

        page.reload().await.context("刷新页面失败")?;
        info!("🔁 页面已刷新");

        let items = self.scraper.scrape_visible(page).await;
        info!("📋 抓取到 {} 条帖子", items.len());

        let mut replies = 0;
        for item in &items {
            if self.seen.is_seen(&item.id).await {
                continue;
            }
            info!("[NEW] @{}: \"{}\"", item.author, truncate_text(&item.text, 60));

            if !limiter.can_reply(Instant::now()) {
                info!("⛔ 已达到当前窗口的回复上限，本轮不再回复");
                break;
            }

            let Some(reply) = self.prepare_reply(item).await else {
                continue;
            };

            if self.poster.post_reply(page, item, &reply).await {
                self.seen.mark_seen(&item.id).await;
                limiter.note_reply(Instant::now());
                self.journal.record(&item.id, &item.author, &reply).await;
                self.report(item, "replied");
                self.sink.log_event(AgentEvent::ReplyPosted {
                    post_id: item.id.clone(),
                    author: item.author.clone(),
                    reply,
                });
                replies += 1;
                // 每轮最多回复一条
                break;
            }
            self.report(item, "reply_failed");
        }

        Ok(CycleOutcome::Completed { replies })
    }

    /// 组装提示词并生成回复；拿不到可用文本时返回 `None`
    async fn prepare_reply(&self, item: &ScrapedItem) -> Option<String> {
        let Some(prompt) = self.composer.compose(item) else {
            warn!("⚠️ 没有 @{} 的回复配置，跳过", item.author);
            self.report(item, "skipped_no_profile");
            return None;
        };

        match self.generator.generate(&prompt).await {
            Ok(reply) if !reply.trim().is_empty() => {
                debug!("生成回复: {}", truncate_text(&reply, 80));
                Some(reply)
            }
            Ok(_) => {
                warn!("生成的回复为空，跳过帖子 {}", item.id);
                self.report(item, "skipped_empty_reply");
                None
            }
            Err(e) => {
                warn!("生成回复失败，跳过帖子 {}: {:#}", item.id, e);
                self.sink.log_event(AgentEvent::error("generate", format!("{:#}", e)));
                self.report(item, "skipped_generation_failed");
                None
            }
        }
    }

    fn report(&self, item: &ScrapedItem, action: &str) {
        self.sink.log_event(AgentEvent::PostProcessed {
            post_id: item.id.clone(),
            author: item.author.clone(),
            text: item.text.clone(),
            action: action.to_string(),
        });
    }
}
