//! 基础设施层
//!
//! 持有稀缺资源（浏览器、页面），只暴露能力

pub mod page_driver;

pub use page_driver::{wait_for_any, wait_for_selector, BrowserContext, BrowserLauncher, PageDriver, PageSignal};
