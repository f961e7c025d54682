//! 回复频率窗口

use std::time::Duration;

use tokio::time::Instant;

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// 固定时长的计数窗口
///
/// `now - start >= duration` 时计数归零并重新开窗，其余时候计数只增不减。
#[derive(Debug, Clone)]
pub struct RateWindow {
    duration: Duration,
    cap: u32,
    start: Instant,
    count: u32,
}

impl RateWindow {
    pub fn new(duration: Duration, cap: u32, now: Instant) -> Self {
        Self {
            duration,
            cap,
            start: now,
            count: 0,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.start) >= self.duration {
            self.start = now;
            self.count = 0;
        }
    }

    /// 当前窗口是否还能再回复
    pub fn has_capacity(&mut self, now: Instant) -> bool {
        self.roll(now);
        self.count < self.cap
    }

    pub fn record(&mut self, now: Instant) {
        self.roll(now);
        self.count += 1;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// 小时 + 天两级限流
#[derive(Debug, Clone)]
pub struct RateLimiter {
    hourly: RateWindow,
    daily: RateWindow,
}

impl RateLimiter {
    pub fn new(per_hour: u32, per_day: u32, now: Instant) -> Self {
        Self {
            hourly: RateWindow::new(HOUR, per_hour, now),
            daily: RateWindow::new(DAY, per_day, now),
        }
    }

    pub fn can_reply(&mut self, now: Instant) -> bool {
        // 两个窗口都要先滚动，不能短路
        let hour_ok = self.hourly.has_capacity(now);
        let day_ok = self.daily.has_capacity(now);
        hour_ok && day_ok
    }

    pub fn note_reply(&mut self, now: Instant) {
        self.hourly.record(now);
        self.daily.record(now);
    }

    /// (本小时, 今天) 已回复数
    pub fn counts(&self) -> (u32, u32) {
        (self.hourly.count(), self.daily.count())
    }
}
