//! 提示词组装 - 业务能力层
//!
//! 只负责把帖子套进账号的提示词模板

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::ScrapedItem;
use crate::services::profile_store::ProfileStore;

const POST_TEXT_PLACEHOLDER: &str = "{{POST_TEXT}}";
const FACT_PLACEHOLDER: &str = "{{FACT}}";

/// 提示词组装器
pub struct ReplyComposer {
    profiles: Arc<dyn ProfileStore>,
    default_prompt: Option<String>,
}

impl ReplyComposer {
    pub fn new(profiles: Arc<dyn ProfileStore>, default_prompt: Option<String>) -> Self {
        Self {
            profiles,
            default_prompt,
        }
    }

    /// 为帖子生成提示词
    ///
    /// 作者没有配置且没有默认模板时返回 `None`。
    pub fn compose(&self, item: &ScrapedItem) -> Option<String> {
        self.compose_with(item, &mut rand::thread_rng())
    }

    pub fn compose_with<R: Rng + ?Sized>(&self, item: &ScrapedItem, rng: &mut R) -> Option<String> {
        let (template, facts) = match self.profiles.lookup(&item.author) {
            Some(profile) => (profile.prompt, profile.facts),
            None => (self.default_prompt.clone()?, Vec::new()),
        };
        Some(render(&template, item, &facts, rng))
    }
}

fn render<R: Rng + ?Sized>(template: &str, item: &ScrapedItem, facts: &[String], rng: &mut R) -> String {
    let fact = facts.choose(rng).map(String::as_str).unwrap_or("");
    let mut prompt = template
        .replace(POST_TEXT_PLACEHOLDER, &item.text)
        .replace(FACT_PLACEHOLDER, fact);
    if !item.media.is_empty() {
        prompt.push_str("\n\nAttached images: ");
        prompt.push_str(&item.media.join(", "));
    }
    prompt
}
