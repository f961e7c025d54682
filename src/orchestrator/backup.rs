//! 定期备份 - 编排层
//!
//! 把已回复记录、回复日志和旧 cookie 打包成一个带时间戳的 JSON 快照，
//! 只保留最近几份。备份失败只记日志。

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;

const BACKUP_PREFIX: &str = "backup_";
const KEEP_BACKUPS: usize = 5;

pub struct BackupService {
    backup_dir: PathBuf,
    seen_store_file: PathBuf,
    reply_journal_file: PathBuf,
    cookies_file: PathBuf,
    interval: Duration,
}

impl BackupService {
    pub fn new(config: &Config) -> Self {
        Self {
            backup_dir: config.backup_dir.clone(),
            seen_store_file: config.seen_store_file.clone(),
            reply_journal_file: config.reply_journal_file.clone(),
            cookies_file: config.legacy_cookies_file.clone(),
            interval: config.backup_interval,
        }
    }

    /// 写一份快照并清理旧备份，返回快照路径
    pub async fn create_backup(&self) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .with_context(|| format!("无法创建备份目录: {}", self.backup_dir.display()))?;

        let timestamp = Utc::now();
        let snapshot = json!({
            "timestamp": timestamp.to_rfc3339(),
            "cookies": read_json(&self.cookies_file).await,
            "memory": read_json(&self.seen_store_file).await,
            "engagement_logs": read_json(&self.reply_journal_file).await,
        });

        let file_name = format!("{}{}.json", BACKUP_PREFIX, timestamp.format("%Y-%m-%dT%H-%M-%S-%3fZ"));
        let path = self.backup_dir.join(file_name);
        tokio::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)
            .await
            .with_context(|| format!("无法写入备份: {}", path.display()))?;
        info!("✅ 备份已创建: {}", path.display());

        self.prune().await?;
        Ok(path)
    }

    /// 只保留最近的 `KEEP_BACKUPS` 份
    async fn prune(&self) -> Result<()> {
        let mut backups = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.backup_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(BACKUP_PREFIX) {
                backups.push(name);
            }
        }
        backups.sort();

        let excess = backups.len().saturating_sub(KEEP_BACKUPS);
        for name in backups.into_iter().take(excess) {
            let path = self.backup_dir.join(&name);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("删除旧备份失败 {}: {}", path.display(), e);
            } else {
                debug!("已删除旧备份 {}", name);
            }
        }
        Ok(())
    }

    /// 立即备份一次，之后按间隔备份
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("📦 备份任务启动（间隔 {} 分钟）", self.interval.as_secs() / 60);
        let mut ticker = interval(self.interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.create_backup().await {
                        warn!("创建备份失败: {:#}", e);
                    }
                }
                stopped = shutdown.changed() => {
                    if stopped.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("备份任务已停止");
    }
}

/// 读取 JSON 文件；不存在或无法解析时为 `null`
async fn read_json(path: &Path) -> JsonValue {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or(JsonValue::Null),
        Err(_) => JsonValue::Null,
    }
}
