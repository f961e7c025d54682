//! 失败退避

use std::time::Duration;

/// 连续失败计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    consecutive_errors: u32,
}

impl BackoffState {
    pub fn record_failure(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// 下一次扫描前的等待时长
    pub fn delay(&self, poll_interval: Duration, ceiling: Duration) -> Duration {
        backoff_delay(poll_interval, ceiling, self.consecutive_errors)
    }
}

/// `max(poll, min(poll * 2^(errors-1), ceiling))`
pub fn backoff_delay(poll_interval: Duration, ceiling: Duration, errors: u32) -> Duration {
    let exponent = errors.saturating_sub(1).min(31);
    let backoff = poll_interval
        .checked_mul(1u32 << exponent)
        .unwrap_or(ceiling)
        .min(ceiling);
    poll_interval.max(backoff)
}
