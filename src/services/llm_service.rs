//! LLM 服务 - 业务能力层
//!
//! 只负责"根据提示词生成回复"能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, LlmError};
use crate::models::AgentEvent;
use crate::services::event_sink::EventSink;

/// 文本生成接口
///
/// 返回空字符串或错误都表示“没有可用回复”。
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// LLM 服务
///
/// 职责：
/// - 调用 LLM API 生成回复
/// - 失败重试，模型 / 配额错误时切换备用模型
/// - 截断到平台允许的长度
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
    fallback_model_name: String,
    system_prompt: String,
    max_reply_chars: usize,
    max_retries: usize,
    retry_delay: Duration,
    dry_run: bool,
    sink: Option<Arc<dyn EventSink>>,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        let client = Client::with_config(openai_config);

        Self {
            client,
            model_name: config.llm_model_name.clone(),
            fallback_model_name: config.llm_fallback_model_name.clone(),
            system_prompt: config.llm_system_prompt.clone(),
            max_reply_chars: config.llm_max_reply_chars,
            max_retries: config.llm_max_retries.max(1),
            retry_delay: config.llm_retry_delay,
            dry_run: config.dry_run,
            sink: None,
        }
    }

    /// 每次调用后推送一条 `generation` 事件
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 单次 LLM 调用
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    /// - `model`: 使用的模型
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
        model: &str,
    ) -> Result<String> {
        debug!("调用 LLM API，模型: {}", model);
        debug!("用户消息长度: {} 字符", user_message.len());

        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(0.8)
            .max_tokens(256u32)
            .build()?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AppError::llm_api_failed(model, e.to_string()))?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::Llm(LlmError::EmptyContent { model: model.to_string() }))?;

        Ok(content.trim().to_string())
    }

    /// 重试循环：`call` 收到本次使用的模型名
    async fn generate_with<F, Fut>(&self, mut call: F) -> Result<String>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut model = self.model_name.clone();

        for attempt in 1..=self.max_retries {
            let started = Instant::now();
            let result = call(model.clone()).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(text) if !text.trim().is_empty() => {
                    self.emit(&model, latency_ms, true);
                    return Ok(truncate_reply(&text, self.max_reply_chars));
                }
                Ok(_) => {
                    self.emit(&model, latency_ms, false);
                    warn!("LLM 返回内容为空 (第 {}/{} 次, 模型: {})", attempt, self.max_retries, model);
                }
                Err(e) => {
                    self.emit(&model, latency_ms, false);
                    warn!("LLM 调用失败 (第 {}/{} 次, 模型: {}): {:#}", attempt, self.max_retries, model, e);
                    if should_switch_model(&e) && model != self.fallback_model_name {
                        info!("🔁 切换到备用模型: {}", self.fallback_model_name);
                        model = self.fallback_model_name.clone();
                    }
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(AppError::Llm(LlmError::RetriesExhausted {
            attempts: self.max_retries,
        })
        .into())
    }

    fn emit(&self, model: &str, latency_ms: u64, success: bool) {
        if let Some(sink) = &self.sink {
            sink.log_event(AgentEvent::Generation {
                model: model.to_string(),
                latency_ms,
                success,
            });
        }
    }
}

#[async_trait]
impl TextGenerator for LlmService {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if self.dry_run {
            return Ok(dry_run_reply(prompt));
        }
        self.generate_with(|model| async move {
            self.send_to_llm(prompt, Some(&self.system_prompt), &model).await
        })
        .await
    }
}

/// 模型不可用或配额耗尽时值得换模型
fn should_switch_model(err: &anyhow::Error) -> bool {
    let message = match err.downcast_ref::<AppError>() {
        Some(AppError::Llm(LlmError::ApiCallFailed { message, .. })) => message.to_lowercase(),
        _ => format!("{:#}", err).to_lowercase(),
    };
    ["model", "quota", "429", "resource_exhausted"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// 截断到 `max_chars` 个字符（含结尾的 `...`）
pub fn truncate_reply(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    text.chars().take(keep).collect::<String>() + "..."
}

fn dry_run_reply(prompt: &str) -> String {
    let preview: String = prompt.chars().take(80).collect();
    format!("Simulated reply: {}", preview)
}
