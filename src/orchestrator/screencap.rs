//! 截图推送 - 编排层
//!
//! 按自己的节奏截取当前页面推送给仪表盘，与扫描循环互不等待。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::browser::SessionManager;
use crate::services::event_sink::EventSink;

const JPEG_QUALITY: i64 = 60;

pub struct Screencap {
    sessions: Arc<SessionManager>,
    sink: Arc<dyn EventSink>,
    target_url: String,
    interval: watch::Receiver<Duration>,
}

impl Screencap {
    pub fn new(
        sessions: Arc<SessionManager>,
        sink: Arc<dyn EventSink>,
        target_url: impl Into<String>,
        interval: watch::Receiver<Duration>,
    ) -> Self {
        Self {
            sessions,
            sink,
            target_url: target_url.into(),
            interval,
        }
    }

    /// 截一帧并推送
    pub async fn capture_once(&self) -> Result<()> {
        let session = self.sessions.ensure_session(Some(&self.target_url)).await?;
        let page = session.page;
        let bytes = page.screenshot_jpeg(JPEG_QUALITY).await?;
        let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes));
        let url = page.url().await.unwrap_or_default();
        self.sink.broadcast_screencap(data_url, url);
        Ok(())
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("📸 截图任务启动，间隔 {:?}", *self.interval.borrow());
        loop {
            let interval = *self.interval.borrow_and_update();
            tokio::select! {
                _ = sleep(interval) => {
                    if let Err(e) = self.capture_once().await {
                        debug!("截图失败: {:#}", e);
                    }
                }
                changed = self.interval.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                stopped = shutdown.changed() => {
                    if stopped.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        debug!("截图任务已停止");
    }
}
