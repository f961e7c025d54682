//! 回复发送服务 - 业务能力层
//!
//! 只负责"像人一样回复一条帖子"能力，不关心流程

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, BrowserError};
use crate::infrastructure::{wait_for_selector, PageDriver};
use crate::models::{AgentEvent, ScrapedItem};
use crate::services::event_sink::EventSink;

/// 帖子内的回复按钮
pub const REPLY_BUTTON_SELECTOR: &str = r#"[data-testid="reply"]"#;
/// 回复编辑器
pub const EDITOR_SELECTOR: &str = ".public-DraftEditor-content";
/// 发送按钮
pub const SUBMIT_BUTTON_SELECTOR: &str = r#"[data-testid="tweetButton"]"#;

/// 拟人化节奏
#[derive(Debug, Clone)]
pub struct HumanPacing {
    /// 回复前的延迟区间（毫秒）
    pub pre_reply_ms: (u64, u64),
    /// 每个字符之间的延迟区间（毫秒）
    pub keystroke_ms: (u64, u64),
    /// 点击发送前的延迟区间（毫秒）
    pub pre_submit_ms: (u64, u64),
    /// 发送后等待界面稳定
    pub settle: Duration,
    /// 查找编辑器的超时
    pub editor_timeout: Duration,
}

impl HumanPacing {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pre_reply_ms: config.pre_reply_delay_ms,
            keystroke_ms: config.keystroke_delay_ms,
            pre_submit_ms: config.pre_submit_delay_ms,
            settle: config.settle_delay,
            editor_timeout: config.editor_timeout,
        }
    }

    /// 在区间内随机取一个延迟
    pub fn pick(range: (u64, u64)) -> Duration {
        let (lo, hi) = if range.0 <= range.1 { range } else { (range.1, range.0) };
        if lo == hi {
            return Duration::from_millis(lo);
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

/// 回复发送服务
///
/// 职责：
/// - 点击回复、找到编辑器、逐字输入、发送
/// - 失败时刷新页面清掉半开的编辑框
/// - 从不向外抛错，只返回是否成功
pub struct ReplyPoster {
    pacing: HumanPacing,
    sink: Arc<dyn EventSink>,
}

impl ReplyPoster {
    pub fn new(pacing: HumanPacing, sink: Arc<dyn EventSink>) -> Self {
        Self { pacing, sink }
    }

    /// 回复一条帖子，返回是否成功
    pub async fn post_reply(&self, page: &dyn PageDriver, item: &ScrapedItem, text: &str) -> bool {
        match self.try_post(page, item, text).await {
            Ok(()) => {
                sleep(self.pacing.settle).await;
                info!("✅ 已回复 @{} 的帖子 {}", item.author, item.id);
                true
            }
            Err(e) => {
                error!("❌ 回复帖子 {} 失败: {:#}", item.id, e);
                self.sink.log_event(AgentEvent::error(
                    "post_reply",
                    format!("Reply to {} failed: {:#}", item.id, e),
                ));
                if let Err(e) = page.reload().await {
                    warn!("刷新页面失败: {:#}", e);
                }
                false
            }
        }
    }

    async fn try_post(&self, page: &dyn PageDriver, item: &ScrapedItem, text: &str) -> Result<()> {
        let delay = HumanPacing::pick(self.pacing.pre_reply_ms);
        debug!("等待 {:?} 后回复", delay);
        sleep(delay).await;

        page.click(&item.scoped(REPLY_BUTTON_SELECTOR)).await?;

        let editor = self.locate_editor(page, item).await?;
        page.click(&editor).await?;

        for ch in text.chars() {
            page.type_text(&editor, &ch.to_string()).await?;
            sleep(HumanPacing::pick(self.pacing.keystroke_ms)).await;
        }

        sleep(HumanPacing::pick(self.pacing.pre_submit_ms)).await;
        page.click(SUBMIT_BUTTON_SELECTOR).await?;
        Ok(())
    }

    /// 优先使用帖子内部的编辑器，找不到时退回页面全局编辑器
    async fn locate_editor(&self, page: &dyn PageDriver, item: &ScrapedItem) -> Result<String> {
        let scoped = item.scoped(EDITOR_SELECTOR);
        if wait_for_selector(page, &scoped, self.pacing.editor_timeout).await {
            return Ok(scoped);
        }

        warn!("⚠️ 帖子内未找到回复编辑器，改用页面全局编辑器（界面可能已变化）");
        if wait_for_selector(page, EDITOR_SELECTOR, self.pacing.editor_timeout).await {
            return Ok(EDITOR_SELECTOR.to_string());
        }

        Err(AppError::Browser(BrowserError::ElementNotFound {
            selector: EDITOR_SELECTOR.to_string(),
        })
        .into())
    }
}
