use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "lifecycle.toml";

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 同时处理的账号数量（每个 worker 持有一个浏览器会话）
    pub worker_count: usize,
    /// 状态检测预算（秒）
    pub detection_timeout_secs: u64,
    /// 状态检测轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 单步元素等待超时（秒）
    pub step_timeout_secs: u64,
    /// 目标优惠页 URL
    pub target_url: String,
    /// 登录后依次点击的菜单选择器
    pub menu_path: Vec<String>,
    /// 停止信号后的宽限期（秒）
    pub grace_period_secs: u64,
    /// 是否重新检测 subscribed / ineligible 账号
    pub recheck_settled: bool,
    /// 是否对 verified 账号执行绑卡
    pub enable_card_binding: bool,
    /// 每张卡可成功绑定的账号数
    pub uses_per_card: usize,
    /// iframe 搜索最大深度
    pub frame_search_depth: usize,
    /// iframe 搜索时间上限（秒）
    pub frame_search_timeout_secs: u64,
    /// 提交后等待结果的时间上限（秒）
    pub bind_result_timeout_secs: u64,
    // --- 文件路径 ---
    pub db_path: String,
    pub export_dir: String,
    pub accounts_file: String,
    pub proxies_file: String,
    pub cards_file: String,
    /// 输出日志文件
    pub output_log_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- 看板 ---
    pub dashboard_port: u16,
    // --- 指纹浏览器本地 API ---
    pub profile_api_url: String,
    pub profile_api_key: String,
    /// 新建窗口时复制的模板窗口 ID
    pub profile_template_id: Option<String>,
    // --- LLM 翻译回退 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: 3,
            detection_timeout_secs: 10,
            poll_interval_ms: 500,
            step_timeout_secs: 15,
            target_url: "https://one.google.com/ai-student?g1_landing_page=75".to_string(),
            menu_path: Vec::new(),
            grace_period_secs: 20,
            recheck_settled: false,
            enable_card_binding: true,
            uses_per_card: 1,
            frame_search_depth: 4,
            frame_search_timeout_secs: 60,
            bind_result_timeout_secs: 30,
            db_path: "accounts.db".to_string(),
            export_dir: ".".to_string(),
            accounts_file: "accounts.txt".to_string(),
            proxies_file: "proxies.txt".to_string(),
            cards_file: "cards.txt".to_string(),
            output_log_file: "output.txt".to_string(),
            verbose_logging: false,
            dashboard_port: 8080,
            profile_api_url: "http://127.0.0.1:54345".to_string(),
            profile_api_key: String::new(),
            profile_template_id: None,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
        }
    }
}

impl Config {
    /// 加载配置：可选的 TOML 文件 + 环境变量覆盖
    ///
    /// `path` 为 `None` 时尝试当前目录下的 `lifecycle.toml`，不存在则使用默认值。
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(p) => Self::from_toml_file(p)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_toml_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        base.with_env_overrides()
    }

    /// 从 TOML 文件读取配置，未出现的字段使用默认值
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })
    }

    /// 仅使用默认值 + 环境变量
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(self) -> Result<Self, ConfigError> {
        Ok(Self {
            worker_count: env_parse("WORKER_COUNT", self.worker_count)?,
            detection_timeout_secs: env_parse("DETECTION_TIMEOUT_SECS", self.detection_timeout_secs)?,
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", self.poll_interval_ms)?,
            step_timeout_secs: env_parse("STEP_TIMEOUT_SECS", self.step_timeout_secs)?,
            target_url: std::env::var("TARGET_URL").unwrap_or(self.target_url),
            menu_path: self.menu_path,
            grace_period_secs: env_parse("GRACE_PERIOD_SECS", self.grace_period_secs)?,
            recheck_settled: env_parse("RECHECK_SETTLED", self.recheck_settled)?,
            enable_card_binding: env_parse("ENABLE_CARD_BINDING", self.enable_card_binding)?,
            uses_per_card: env_parse("USES_PER_CARD", self.uses_per_card)?,
            frame_search_depth: env_parse("FRAME_SEARCH_DEPTH", self.frame_search_depth)?,
            frame_search_timeout_secs: env_parse("FRAME_SEARCH_TIMEOUT_SECS", self.frame_search_timeout_secs)?,
            bind_result_timeout_secs: env_parse("BIND_RESULT_TIMEOUT_SECS", self.bind_result_timeout_secs)?,
            db_path: std::env::var("DB_PATH").unwrap_or(self.db_path),
            export_dir: std::env::var("EXPORT_DIR").unwrap_or(self.export_dir),
            accounts_file: std::env::var("ACCOUNTS_FILE").unwrap_or(self.accounts_file),
            proxies_file: std::env::var("PROXIES_FILE").unwrap_or(self.proxies_file),
            cards_file: std::env::var("CARDS_FILE").unwrap_or(self.cards_file),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(self.output_log_file),
            verbose_logging: env_parse("VERBOSE_LOGGING", self.verbose_logging)?,
            dashboard_port: env_parse("DASHBOARD_PORT", self.dashboard_port)?,
            profile_api_url: std::env::var("PROFILE_API_URL").unwrap_or(self.profile_api_url),
            profile_api_key: std::env::var("PROFILE_API_KEY").unwrap_or(self.profile_api_key),
            profile_template_id: std::env::var("PROFILE_TEMPLATE_ID").ok().or(self.profile_template_id),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(self.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(self.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
        })
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_secs(self.detection_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn frame_search_timeout(&self) -> Duration {
        Duration::from_secs(self.frame_search_timeout_secs)
    }

    pub fn bind_result_timeout(&self) -> Duration {
        Duration::from_secs(self.bind_result_timeout_secs)
    }
}

fn env_parse<T: FromStr>(var_name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var_name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::EnvVarParseFailed {
            var_name: var_name.to_string(),
            value,
            expected_type: std::any::type_name::<T>().to_string(),
        }),
        Err(_) => Ok(default),
    }
}
