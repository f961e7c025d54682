pub mod backoff;
pub mod list_navigation;
pub mod rate_window;
pub mod scan_cycle;

pub use backoff::{backoff_delay, BackoffState};
pub use list_navigation::{ListNavigator, NavigationOutcome};
pub use rate_window::{RateLimiter, RateWindow};
pub use scan_cycle::{CycleOutcome, CycleServices, NavigationPolicy, ScanCycle};
