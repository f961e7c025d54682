//! 回复日志写入服务 - 业务能力层
//!
//! 只负责"记下已发送的回复"能力，不关心流程

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// 一条回复记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub post_id: String,
    pub author: String,
    pub reply: String,
    pub timestamp: DateTime<Utc>,
}

/// 回复日志
///
/// 职责：
/// - 追加已发送的回复
/// - 只保留最近 `capacity` 条
/// - 写入失败只记录警告
pub struct ReplyJournal {
    path: PathBuf,
    capacity: usize,
    entries: Mutex<VecDeque<JournalEntry>>,
}

impl ReplyJournal {
    /// 加载已有日志；文件不存在或损坏时从空日志开始
    pub async fn load(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let entries: VecDeque<JournalEntry> = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("⚠️ 回复日志无法解析，从空日志开始 ({}): {}", path.display(), e);
                VecDeque::new()
            }),
            Err(_) => VecDeque::new(),
        };
        Self {
            path,
            capacity: capacity.max(1),
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 记录一条回复
    pub async fn record(&self, post_id: &str, author: &str, reply: &str) {
        debug!("写入回复日志: 帖子 {} | 作者 {}", post_id, author);

        let mut entries = self.entries.lock().await;
        entries.push_back(JournalEntry {
            post_id: post_id.to_string(),
            author: author.to_string(),
            reply: reply.to_string(),
            timestamp: Utc::now(),
        });
        while entries.len() > self.capacity {
            entries.pop_front();
        }

        if let Err(e) = self.write(&entries).await {
            warn!("写入回复日志失败: {:#}", e);
        }
    }

    pub async fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    async fn write(&self, entries: &VecDeque<JournalEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}
