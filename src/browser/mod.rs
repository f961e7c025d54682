//! 浏览器会话
//!
//! - `launch` - 启动参数与按顺序尝试的启动策略
//! - `chromium` - 基于 chromiumoxide 的真实实现
//! - `session` - 单例会话管理（创建、校验、恢复、关闭）

pub mod chromium;
pub mod launch;
pub mod session;

pub use chromium::ChromiumLauncher;
pub use launch::{is_profile_lock_error, LaunchOptions, LaunchOutcome, LaunchPlan, LaunchStrategy, Trigger};
pub use session::{RecoveryState, SessionHandle, SessionManager};
