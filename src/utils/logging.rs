/// 日志工具模块
///
/// 提供日志初始化和格式化输出的辅助函数
use std::path::Path;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化 tracing 日志
///
/// `RUST_LOG` 优先；否则按 `verbose` 选择 info / debug。
/// 可重复调用（测试中多次初始化不会 panic）。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(target_url: &str, poll_interval: Duration, headless: bool) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 列表监控回复模式");
    info!("🎯 目标列表: {}", target_url);
    info!("⏱️ 轮询间隔: {}s", poll_interval.as_secs());
    info!("🧩 模式: {}", if headless { "headless" } else { "interactive" });
    info!("{}", "=".repeat(60));
}

/// 记录会话初始化信息
pub fn log_session_init(start_url: &str, profile_dir: &Path, strategy: &str, pid: Option<u32>) {
    info!("🧭 会话初始化: url={}", start_url);
    info!("👤 用户数据目录: {}", profile_dir.display());
    info!("🛠️ 启动策略: {}", strategy);
    match pid {
        Some(pid) => info!("🆔 浏览器 PID: {}", pid),
        None => info!("🆔 浏览器 PID: n/a"),
    }
}

/// 记录扫描开始
pub fn log_scan_start() {
    info!("\n--- 扫描开始 [{}] ---", chrono::Local::now().format("%H:%M:%S"));
}

/// 记录扫描结束
pub fn log_scan_end(replies: usize) {
    info!("本轮回复数: {}", replies);
    info!("--- 扫描结束");
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（按字符计）
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
