//! 已回复帖子记录 - 业务能力层

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AppError, StoreError};

/// 已回复帖子集合
///
/// 只在确认回复成功后才 `mark_seen`。
#[async_trait]
pub trait SeenStore: Send + Sync {
    async fn is_seen(&self, id: &str) -> bool;

    async fn mark_seen(&self, id: &str);
}

/// 以 JSON 数组保存在磁盘上的已回复集合
pub struct JsonSeenStore {
    path: PathBuf,
    ids: Mutex<BTreeSet<String>>,
}

impl JsonSeenStore {
    /// 加载记录文件；文件不存在时从空集合开始
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ids = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    warn!("⚠️ 已回复记录损坏，从空记录开始 ({}): {}", path.display(), e);
                    BTreeSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(source) => return Err(AppError::Store(StoreError::ReadFailed { path, source }).into()),
        };
        debug!("已加载 {} 条已回复记录", ids.len());
        Ok(Self {
            path,
            ids: Mutex::new(ids),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }

    async fn persist(&self, ids: &BTreeSet<String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let json = serde_json::to_string_pretty(&ids.iter().collect::<Vec<_>>())?;
        tokio::fs::write(&self.path, json).await.map_err(|source| {
            AppError::Store(StoreError::WriteFailed {
                path: self.path.clone(),
                source,
            })
        })?;
        Ok(())
    }
}

#[async_trait]
impl SeenStore for JsonSeenStore {
    async fn is_seen(&self, id: &str) -> bool {
        self.ids.lock().await.contains(id)
    }

    async fn mark_seen(&self, id: &str) {
        let mut ids = self.ids.lock().await;
        if !ids.insert(id.to_string()) {
            return;
        }
        if let Err(e) = self.persist(&ids).await {
            warn!("保存已回复记录失败: {:#}", e);
        }
    }
}
