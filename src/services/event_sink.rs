//! 事件推送服务 - 业务能力层
//!
//! 所有推送都是“发出即忘”：失败只记日志，不影响调用方。

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::models::events::{AgentEvent, EventEnvelope};
use crate::utils::truncate_text;

/// 事件接收方
pub trait EventSink: Send + Sync {
    fn log_event(&self, event: AgentEvent);

    /// 推送一帧截图
    fn broadcast_screencap(&self, image: String, url: String) {
        self.log_event(AgentEvent::Screencap { image, url });
    }
}

/// 写入 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn log_event(&self, event: AgentEvent) {
        match &event {
            AgentEvent::PostProcessed { post_id, author, action, .. } => {
                debug!("📄 帖子 {} (@{}) -> {}", post_id, author, action)
            }
            AgentEvent::ReplyPosted { post_id, author, reply } => {
                info!("💬 已回复 @{} ({}): {}", author, post_id, truncate_text(reply, 60))
            }
            AgentEvent::Generation { model, latency_ms, success } => {
                debug!("🤖 生成 model={} latency={}ms success={}", model, latency_ms, success)
            }
            AgentEvent::Error { context, message } => error!("❌ [{}] {}", context, message),
            AgentEvent::SessionInit { url, strategy, .. } => {
                debug!("会话就绪: {} (策略: {})", url, strategy)
            }
            AgentEvent::AgentLog { message } => info!("{}", message),
            AgentEvent::PageConsole { level, text } => debug!("🖥️ [console.{}] {}", level, text),
            AgentEvent::Exception { message } => warn!("💥 页面异常: {}", message),
            AgentEvent::Screencap { image, url } => {
                debug!("📸 截图 {} 字节 ({})", image.len(), url)
            }
        }
    }
}

/// 进程内广播（仪表盘 / 测试订阅）
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<AgentEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn log_event(&self, event: AgentEvent) {
        // 没有订阅者时发送失败，忽略
        let _ = self.sender.send(event);
    }
}

/// 通过 HTTP POST 推送到仪表盘
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl EventSink for HttpSink {
    fn log_event(&self, event: AgentEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("不在 tokio 运行时中，丢弃事件 {}", event.kind());
            return;
        };
        let client = self.client.clone();
        let url = self.url.clone();
        runtime.spawn(async move {
            let result = client
                .post(&url)
                .json(&EventEnvelope::now(&event))
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            if let Err(e) = result {
                debug!("推送事件 {} 到仪表盘失败: {}", event.kind(), e);
            }
        });
    }
}

/// 同时推送给多个接收方
#[derive(Clone, Default)]
pub struct FanOutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanOutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanOutSink {
    fn log_event(&self, event: AgentEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.log_event(event.clone());
            }
            last.log_event(event);
        }
    }
}
