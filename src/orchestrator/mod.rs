//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责长期运行的任务和调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `agent` - 应用主结构
//! - 管理应用生命周期（初始化、运行、退出）
//! - 组装各层依赖，启动各个后台任务
//!
//! ### `scan_loop` - 扫描循环
//! - 暂停 / 防重入 / 限流 / 退避
//! - 每轮委托 `workflow::ScanCycle`
//!
//! ### `control` - 控制通道
//! - 暂停、重置会话、截图间隔、提交登录信息
//! - 每条命令单独隔离
//!
//! ### `control_server` - 控制接口
//! - HTTP 请求转成控制命令（可选，配置 `CONTROL_ADDR` 后启用）
//!
//! ### `screencap` / `backup` - 后台任务
//! - 截图推送、定期备份，失败只记日志
//!
//! ## 层次关系
//!
//! ```text
//! agent (组装 + 任务生命周期)
//!     ↓
//! scan_loop / control / screencap / backup
//!     ↓
//! workflow::ScanCycle (处理一轮扫描)
//!     ↓
//! services (能力层：scraper / poster / llm / stores / events)
//!     ↓
//! browser + infrastructure (会话与页面驱动)
//! ```

pub mod agent;
pub mod backup;
pub mod control;
pub mod control_server;
pub mod scan_loop;
pub mod screencap;

// 重新导出主要类型
pub use agent::App;
pub use backup::BackupService;
pub use control::{ControlCommand, ControlDispatcher, ControlHandle};
pub use scan_loop::{ScanLoop, TickOutcome};
pub use screencap::Screencap;
