use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, AppResult, ConfigError};

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    // --- 监控目标 ---
    /// 默认目标 URL（列表页）
    pub target_url: String,
    /// 站点首页，启动导航时先经过这里
    pub home_url: String,
    /// 被监控的站点域名
    pub monitored_host: String,
    /// 被监控的页面路径片段（任意一个匹配即可）
    pub monitored_paths: Vec<String>,

    // --- 浏览器配置 ---
    /// 持久化用户数据目录
    pub user_data_dir: PathBuf,
    /// 用户数据目录被占用时使用的备用目录后缀
    pub alternate_profile_suffix: String,
    /// 是否无头模式
    pub headless: bool,
    /// 指定浏览器可执行文件（优先于 channel）
    pub browser_executable: Option<PathBuf>,
    /// 浏览器渠道（chrome / chromium / msedge ...）
    pub browser_channel: Option<String>,
    /// 启动时打开开发者工具
    pub browser_devtools: bool,
    /// 远程调试端口，0 表示不指定
    pub browser_debug_port: u16,
    /// 额外的浏览器启动参数
    pub browser_extra_args: Vec<String>,
    /// 旧版 cookies.json 路径（一次性迁移）
    pub legacy_cookies_file: PathBuf,
    /// 导航超时
    pub navigation_timeout: Duration,

    // --- 扫描循环 ---
    /// 轮询间隔
    pub poll_interval: Duration,
    /// 退避上限
    pub max_backoff: Duration,
    /// 每小时最多回复数
    pub max_replies_per_hour: u32,
    /// 每天最多回复数
    pub max_replies_per_day: u32,
    /// 等待帖子列表出现的超时
    pub scrape_timeout: Duration,

    // --- 拟人化节奏 ---
    /// 回复前的随机延迟（毫秒区间）
    pub pre_reply_delay_ms: (u64, u64),
    /// 逐字输入的随机延迟（毫秒区间）
    pub keystroke_delay_ms: (u64, u64),
    /// 点击发送前的随机延迟（毫秒区间）
    pub pre_submit_delay_ms: (u64, u64),
    /// 发送后等待界面稳定的时间
    pub settle_delay: Duration,
    /// 查找回复编辑器的超时
    pub editor_timeout: Duration,

    /// 提交登录后等待页面跳转的上限
    pub login_timeout: Duration,

    // --- 截图推送 ---
    /// 截图间隔
    pub screencap_interval: Duration,

    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_fallback_model_name: String,
    pub llm_system_prompt: String,
    /// 回复最大字符数
    pub llm_max_reply_chars: usize,
    pub llm_max_retries: usize,
    pub llm_retry_delay: Duration,
    /// 不调用 LLM，直接返回模拟回复
    pub dry_run: bool,
    /// 找不到账号配置时使用的默认模板
    pub default_prompt: Option<String>,

    // --- 数据文件 ---
    pub seen_store_file: PathBuf,
    pub reply_journal_file: PathBuf,
    pub reply_journal_capacity: usize,
    pub profiles_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub backup_interval: Duration,

    // --- 仪表盘 ---
    /// 仪表盘事件推送地址（可选）
    pub dashboard_url: Option<String>,
    /// 控制接口监听地址（可选，如 `127.0.0.1:8787`）
    pub control_addr: Option<String>,

    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_url: "https://x.com/i/lists/1950005227715014919".to_string(),
            home_url: "https://x.com/home".to_string(),
            monitored_host: "x.com".to_string(),
            monitored_paths: vec!["/lists/".to_string(), "/notifications".to_string()],
            user_data_dir: PathBuf::from("data/agent_profile"),
            alternate_profile_suffix: "_alt".to_string(),
            headless: false,
            browser_executable: None,
            browser_channel: Some("chromium".to_string()),
            browser_devtools: false,
            browser_debug_port: 0,
            browser_extra_args: Vec::new(),
            legacy_cookies_file: PathBuf::from("data/cookies.json"),
            navigation_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(60),
            max_backoff: Duration::from_secs(5 * 60),
            max_replies_per_hour: 50,
            max_replies_per_day: 100,
            scrape_timeout: Duration::from_secs(30),
            pre_reply_delay_ms: (1000, 2000),
            keystroke_delay_ms: (50, 150),
            pre_submit_delay_ms: (500, 2000),
            settle_delay: Duration::from_secs(3),
            editor_timeout: Duration::from_secs(3),
            login_timeout: Duration::from_secs(20),
            screencap_interval: Duration::from_millis(3000),
            llm_api_key: String::new(),
            llm_api_base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            llm_model_name: "gemini-1.5-flash".to_string(),
            llm_fallback_model_name: "gemini-1.5-pro".to_string(),
            llm_system_prompt: "You reply to posts on a social platform. \
                                Be concise and factual. Do not use hashtags or emojis. \
                                Keep replies to one or two sentences and vary the phrasing."
                .to_string(),
            llm_max_reply_chars: 280,
            llm_max_retries: 3,
            llm_retry_delay: Duration::from_secs(1),
            dry_run: false,
            default_prompt: None,
            seen_store_file: PathBuf::from("data/memory.json"),
            reply_journal_file: PathBuf::from("data/handled_replies.json"),
            reply_journal_capacity: 500,
            profiles_dir: PathBuf::from("profiles"),
            backup_dir: PathBuf::from("data/backups"),
            backup_interval: Duration::from_secs(30 * 60),
            dashboard_url: None,
            control_addr: None,
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            target_url: std::env::var("TARGET_URL").unwrap_or(default.target_url),
            home_url: std::env::var("HOME_URL").unwrap_or(default.home_url),
            monitored_host: std::env::var("MONITORED_HOST").unwrap_or(default.monitored_host),
            monitored_paths: std::env::var("MONITORED_PATHS").ok().map(|v| split_list(&v)).unwrap_or(default.monitored_paths),
            user_data_dir: std::env::var("BROWSER_USER_DATA_DIR").map(PathBuf::from).unwrap_or(default.user_data_dir),
            alternate_profile_suffix: default.alternate_profile_suffix,
            headless: std::env::var("HEADLESS_BROWSER").ok().and_then(|v| v.parse().ok()).unwrap_or(default.headless),
            browser_executable: std::env::var("BROWSER_EXECUTABLE").ok().map(PathBuf::from).or(default.browser_executable),
            browser_channel: std::env::var("BROWSER_CHANNEL").ok().or(default.browser_channel),
            browser_devtools: std::env::var("BROWSER_DEVTOOLS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.browser_devtools),
            browser_debug_port: std::env::var("BROWSER_DEBUG_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.browser_debug_port),
            browser_extra_args: std::env::var("BROWSER_ARGS").ok().map(|v| split_list(&v)).unwrap_or(default.browser_extra_args),
            legacy_cookies_file: std::env::var("LEGACY_COOKIES_FILE").map(PathBuf::from).unwrap_or(default.legacy_cookies_file),
            navigation_timeout: default.navigation_timeout,
            poll_interval: env_millis("POLL_INTERVAL_MS").unwrap_or(default.poll_interval),
            max_backoff: env_millis("MAX_BACKOFF_MS").unwrap_or(default.max_backoff),
            max_replies_per_hour: std::env::var("MAX_REPLIES_PER_HOUR").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_replies_per_hour),
            max_replies_per_day: std::env::var("MAX_REPLIES_PER_DAY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_replies_per_day),
            scrape_timeout: default.scrape_timeout,
            pre_reply_delay_ms: default.pre_reply_delay_ms,
            keystroke_delay_ms: default.keystroke_delay_ms,
            pre_submit_delay_ms: default.pre_submit_delay_ms,
            settle_delay: default.settle_delay,
            editor_timeout: default.editor_timeout,
            login_timeout: default.login_timeout,
            screencap_interval: env_millis("SCREENCAP_INTERVAL_MS").unwrap_or(default.screencap_interval),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            llm_fallback_model_name: std::env::var("LLM_FALLBACK_MODEL_NAME").unwrap_or(default.llm_fallback_model_name),
            llm_system_prompt: std::env::var("LLM_SYSTEM_PROMPT").unwrap_or(default.llm_system_prompt),
            llm_max_reply_chars: default.llm_max_reply_chars,
            llm_max_retries: default.llm_max_retries,
            llm_retry_delay: default.llm_retry_delay,
            dry_run: std::env::var("DRY_RUN").map(|v| v == "1").unwrap_or(default.dry_run),
            default_prompt: std::env::var("DEFAULT_PROMPT").ok().or(default.default_prompt),
            seen_store_file: std::env::var("SEEN_STORE_FILE").map(PathBuf::from).unwrap_or(default.seen_store_file),
            reply_journal_file: std::env::var("REPLY_JOURNAL_FILE").map(PathBuf::from).unwrap_or(default.reply_journal_file),
            reply_journal_capacity: default.reply_journal_capacity,
            profiles_dir: std::env::var("PROFILES_DIR").map(PathBuf::from).unwrap_or(default.profiles_dir),
            backup_dir: std::env::var("BACKUP_PATH").map(PathBuf::from).unwrap_or(default.backup_dir),
            backup_interval: default.backup_interval,
            dashboard_url: std::env::var("DASHBOARD_URL").ok().or(default.dashboard_url),
            control_addr: std::env::var("CONTROL_ADDR").ok().or(default.control_addr),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
        }
    }

    /// 检查取值范围
    pub fn validate(&self) -> AppResult<()> {
        let screencap_ms = self.screencap_interval.as_millis() as u64;
        if !(200..=60_000).contains(&screencap_ms) {
            return Err(out_of_range("SCREENCAP_INTERVAL_MS", screencap_ms));
        }
        if self.poll_interval.is_zero() {
            return Err(out_of_range("POLL_INTERVAL_MS", 0));
        }
        if self.llm_max_reply_chars < 4 {
            return Err(out_of_range("llm_max_reply_chars", self.llm_max_reply_chars));
        }
        Ok(())
    }

    /// 备用用户数据目录（原目录名 + 后缀）
    pub fn alternate_user_data_dir(&self) -> PathBuf {
        let mut name = self.user_data_dir.as_os_str().to_os_string();
        name.push(&self.alternate_profile_suffix);
        PathBuf::from(name)
    }
}

fn out_of_range(name: &str, value: impl ToString) -> AppError {
    AppError::Config(ConfigError::OutOfRange {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_millis)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
