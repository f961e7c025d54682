//! # Watchlist Agent
//!
//! 监控社交平台上的一个账号列表，用 LLM 生成回复并通过持久化浏览器会话发送
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 页面驱动接缝（`PageDriver` / `BrowserContext` / `BrowserLauncher`）
//! - `browser/` - chromiumoxide 实现、启动策略、单例会话管理 `SessionManager`
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单条帖子
//! - `Scraper` - 抓取可见帖子
//! - `ReplyPoster` - 拟人化回复
//! - `LlmService` - 生成回复
//! - `ReplyComposer` / `ProfileStore` - 提示词模板
//! - `SeenStore` / `ReplyJournal` - 本地记录
//! - `EventSink` - 仪表盘事件
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一轮扫描"的完整处理流程
//! - `ScanCycle` - 导航检查 → 刷新 → 抓取 → 限流 → 生成 → 回复
//! - `RateLimiter` / `BackoffState` - 限流窗口与失败退避
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/agent` - 应用主结构，管理任务生命周期
//! - `orchestrator/scan_loop` - 扫描循环
//! - `orchestrator/control` - 控制命令
//! - `orchestrator/screencap` / `orchestrator/backup` - 后台任务
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::{ChromiumLauncher, SessionHandle, SessionManager};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{BrowserContext, BrowserLauncher, PageDriver};
pub use models::{AgentEvent, Profile, ScrapedItem};
pub use orchestrator::{App, ControlCommand, ControlHandle, ScanLoop};
pub use workflow::{CycleOutcome, ScanCycle};
