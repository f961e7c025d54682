//! 仪表盘事件

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 推送给仪表盘的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 一条帖子被处理（回复 / 跳过）
    PostProcessed {
        post_id: String,
        author: String,
        text: String,
        action: String,
    },
    /// 回复已发送
    ReplyPosted {
        post_id: String,
        author: String,
        reply: String,
    },
    /// 一次文本生成调用
    Generation {
        model: String,
        latency_ms: u64,
        success: bool,
    },
    Error {
        context: String,
        message: String,
    },
    SessionInit {
        url: String,
        profile_dir: String,
        strategy: String,
        pid: Option<u32>,
    },
    AgentLog {
        message: String,
    },
    PageConsole {
        level: String,
        text: String,
    },
    Exception {
        message: String,
    },
    /// 页面截图（data URL）
    Screencap {
        image: String,
        url: String,
    },
}

impl AgentEvent {
    pub fn error(context: impl Into<String>, message: impl Into<String>) -> Self {
        AgentEvent::Error {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        AgentEvent::AgentLog {
            message: message.into(),
        }
    }

    /// 事件类型名（与序列化后的 `kind` 一致）
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::PostProcessed { .. } => "post_processed",
            AgentEvent::ReplyPosted { .. } => "reply_posted",
            AgentEvent::Generation { .. } => "generation",
            AgentEvent::Error { .. } => "error",
            AgentEvent::SessionInit { .. } => "session_init",
            AgentEvent::AgentLog { .. } => "agent_log",
            AgentEvent::PageConsole { .. } => "page_console",
            AgentEvent::Exception { .. } => "exception",
            AgentEvent::Screencap { .. } => "screencap",
        }
    }
}

/// 带时间戳的事件，用于对外推送
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope<'a> {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: &'a AgentEvent,
}

impl<'a> EventEnvelope<'a> {
    pub fn now(event: &'a AgentEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
