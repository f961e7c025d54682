//! 启动策略
//!
//! 持久化上下文的创建按一组有序策略依次尝试，取第一个成功者：
//!
//! 1. `primary` - 配置的用户数据目录 + 首选启动参数
//! 2. `alternate-profile` - 备用目录 + 首选参数（仅当首次失败是目录被占用）
//! 3. `alternate-profile-fallback` - 备用目录 + 精简参数（同上）
//! 4. `fallback` - 原目录 + 精简参数
//!
//! 全部失败时把最后一个错误交给调用方。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, BrowserError};
use crate::infrastructure::{BrowserContext, BrowserLauncher};

const PROFILE_LOCK_PATTERN: &str = r"(?i)ProcessSingleton|SingletonLock|profile directory.*in use";

/// 浏览器启动参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub headless: bool,
    /// 指定可执行文件
    pub executable: Option<PathBuf>,
    /// 浏览器渠道，没有指定可执行文件时用于查找
    pub channel: Option<String>,
    pub devtools: bool,
    /// 0 表示不指定
    pub debug_port: u16,
    pub args: Vec<String>,
    pub window_size: (u32, u32),
}

impl LaunchOptions {
    /// 首选参数：尊重配置中的可执行文件 / 渠道
    pub fn preferred(config: &Config) -> Self {
        let mut args = vec![
            "--disable-infobars".to_string(),
            "--no-default-browser-check".to_string(),
            "--no-first-run".to_string(),
        ];
        args.extend(config.browser_extra_args.iter().cloned());

        Self {
            headless: config.headless,
            executable: config.browser_executable.clone(),
            channel: config.browser_channel.clone(),
            devtools: config.browser_devtools,
            debug_port: config.browser_debug_port,
            args,
            window_size: (1280, 860),
        }
    }

    /// 精简参数：不指定可执行文件和渠道，交给 chromiumoxide 自动查找
    pub fn fallback(config: &Config) -> Self {
        Self {
            executable: None,
            channel: None,
            ..Self::preferred(config)
        }
    }
}

/// 策略生效条件（相对于第一次失败的原因）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// 总是尝试
    Always,
    /// 仅当第一次失败是用户数据目录被占用
    OnProfileLock,
}

impl Trigger {
    fn applies(self, first_failure_was_lock: bool) -> bool {
        match self {
            Trigger::Always => true,
            Trigger::OnProfileLock => first_failure_was_lock,
        }
    }
}

/// 一个启动策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchStrategy {
    pub name: &'static str,
    pub profile_dir: PathBuf,
    pub options: LaunchOptions,
    pub trigger: Trigger,
}

/// 启动成功的结果
pub struct LaunchOutcome {
    pub context: Arc<dyn BrowserContext>,
    pub strategy: LaunchStrategy,
}

/// 有序的启动策略列表
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    strategies: Vec<LaunchStrategy>,
}

impl LaunchPlan {
    pub fn new(strategies: Vec<LaunchStrategy>) -> Self {
        Self { strategies }
    }

    /// 按配置生成默认的四级策略
    pub fn from_config(config: &Config) -> Self {
        let primary_dir = config.user_data_dir.clone();
        let alternate_dir = config.alternate_user_data_dir();
        let preferred = LaunchOptions::preferred(config);
        let fallback = LaunchOptions::fallback(config);

        Self::new(vec![
            LaunchStrategy {
                name: "primary",
                profile_dir: primary_dir.clone(),
                options: preferred.clone(),
                trigger: Trigger::Always,
            },
            LaunchStrategy {
                name: "alternate-profile",
                profile_dir: alternate_dir.clone(),
                options: preferred,
                trigger: Trigger::OnProfileLock,
            },
            LaunchStrategy {
                name: "alternate-profile-fallback",
                profile_dir: alternate_dir,
                options: fallback.clone(),
                trigger: Trigger::OnProfileLock,
            },
            LaunchStrategy {
                name: "fallback",
                profile_dir: primary_dir,
                options: fallback,
                trigger: Trigger::Always,
            },
        ])
    }

    pub fn strategies(&self) -> &[LaunchStrategy] {
        &self.strategies
    }

    /// 依次尝试各策略，返回第一个成功的上下文
    pub async fn execute(&self, launcher: &dyn BrowserLauncher) -> Result<LaunchOutcome> {
        let mut first_failure_was_lock: Option<bool> = None;
        let mut last_error: Option<anyhow::Error> = None;

        for strategy in &self.strategies {
            if let Some(was_lock) = first_failure_was_lock {
                if !strategy.trigger.applies(was_lock) {
                    debug!("跳过启动策略 {}", strategy.name);
                    continue;
                }
            }

            debug!(
                "尝试启动策略 {} (目录: {})",
                strategy.name,
                strategy.profile_dir.display()
            );
            match launcher.launch(strategy).await {
                Ok(context) => {
                    if first_failure_was_lock.is_some() {
                        info!("✓ 启动策略 {} 成功", strategy.name);
                    }
                    return Ok(LaunchOutcome {
                        context,
                        strategy: strategy.clone(),
                    });
                }
                Err(e) => {
                    let locked = is_profile_lock_error(&e);
                    if locked {
                        warn!(
                            "⚠️ 用户数据目录被占用 ({}), 尝试下一个策略",
                            strategy.profile_dir.display()
                        );
                    } else {
                        warn!("⚠️ 启动策略 {} 失败: {:#}", strategy.name, e);
                    }
                    first_failure_was_lock.get_or_insert(locked);
                    last_error = Some(e);
                }
            }
        }

        let last = last_error
            .map(|e| format!("{:#}", e))
            .unwrap_or_else(|| "没有可用的启动策略".to_string());
        Err(AppError::Browser(BrowserError::AllStrategiesFailed { last }).into())
    }
}

/// 判断错误是否由用户数据目录被占用引起
pub fn is_profile_lock_error(err: &anyhow::Error) -> bool {
    if let Some(app) = err.downcast_ref::<AppError>() {
        if app.is_profile_locked() {
            return true;
        }
    }
    if let Some(BrowserError::ProfileLocked { .. }) = err.downcast_ref::<BrowserError>() {
        return true;
    }
    let message = format!("{:#}", err);
    Regex::new(PROFILE_LOCK_PATTERN)
        .map(|re| re.is_match(&message))
        .unwrap_or(false)
}
