use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 输入文件解析错误
    #[error("加载错误: {0}")]
    Load(#[from] LoadError),
    /// 会话（登录 / 导航 / 开窗）错误
    #[error("会话错误: {0}")]
    Session(#[from] SessionError),
    /// 绑卡子流程错误
    #[error("绑卡错误: {0}")]
    CardBinding(#[from] CardBindingError),
    /// 数据库错误
    #[error("持久化错误: {0}")]
    Persistence(#[from] PersistenceError),
    /// 导出错误
    #[error("导出错误: {0}")]
    Export(#[from] ExportError),
    /// 翻译回退错误
    #[error("翻译错误: {0}")]
    Translation(#[from] TranslationError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
}

/// 输入行解析错误（跳过该行并告警，批处理继续）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// 账号行字段不足
    #[error("第 {line} 行: 字段不足 (至少需要 邮箱 和 密码)")]
    MissingFields { line: usize },
    /// 邮箱格式不合法
    #[error("第 {line} 行: 邮箱格式不合法: {value}")]
    InvalidEmail { line: usize, value: String },
    /// 代理行格式错误
    #[error("第 {line} 行: 代理格式错误: {value}")]
    InvalidProxy { line: usize, value: String },
    /// 卡片行格式错误
    #[error("第 {line} 行: 卡片格式错误 ({reason})")]
    InvalidCard { line: usize, reason: String },
}

impl LoadError {
    /// 出错的行号（从 1 开始）
    pub fn line(&self) -> usize {
        match self {
            LoadError::MissingFields { line }
            | LoadError::InvalidEmail { line, .. }
            | LoadError::InvalidProxy { line, .. }
            | LoadError::InvalidCard { line, .. } => *line,
        }
    }
}

/// 会话失败的原因代码，写入账号的 message 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCause {
    ProvisioningFailed,
    ConnectFailed,
    NavigationFailed,
    PasswordStepMissing,
    CredentialsRejected,
    TwoFactorRequired,
    TwoFactorFailed,
    MenuStepMissing,
    PageError,
}

impl SessionCause {
    pub fn code(self) -> &'static str {
        match self {
            SessionCause::ProvisioningFailed => "provisioning_failed",
            SessionCause::ConnectFailed => "connect_failed",
            SessionCause::NavigationFailed => "navigation_failed",
            SessionCause::PasswordStepMissing => "password_step_missing",
            SessionCause::CredentialsRejected => "credentials_rejected",
            SessionCause::TwoFactorRequired => "two_factor_required",
            SessionCause::TwoFactorFailed => "two_factor_failed",
            SessionCause::MenuStepMissing => "menu_step_missing",
            SessionCause::PageError => "page_error",
        }
    }
}

/// 会话错误：登录、导航或开窗任意一步失败
#[derive(Debug, Error)]
#[error("{} ({detail})", cause.code())]
pub struct SessionError {
    pub cause: SessionCause,
    pub detail: String,
}

impl SessionError {
    pub fn new(cause: SessionCause, detail: impl Into<String>) -> Self {
        Self {
            cause,
            detail: detail.into(),
        }
    }

    /// 写入账号状态的原因字符串
    pub fn reason(&self) -> String {
        format!("{}: {}", self.cause.code(), self.detail)
    }
}

/// 绑卡子流程错误（账号保持 verified，卡片不消耗）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardBindingError {
    /// 广度优先搜索耗尽仍未找到支付 iframe
    #[error("payment_frame_not_found")]
    PaymentFrameNotFound,
    /// 找到支付表单但缺少输入框
    #[error("payment_fields_missing: 仅找到 {found} 个输入框")]
    FieldsMissing { found: usize },
    /// 提交按钮不存在
    #[error("save_button_not_found")]
    SaveButtonNotFound,
    /// 提交后被拒绝或超时
    #[error("bind_rejected: {0}")]
    Rejected(String),
    /// 卡池为空
    #[error("no_card_available")]
    NoCardAvailable,
    /// 页面操作失败
    #[error("page_error: {0}")]
    Page(String),
}

impl CardBindingError {
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// 数据库错误：对单个账号的更新是致命的，必须重试或上报
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// 打开数据库失败
    #[error("无法打开数据库 {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    /// SQL 执行失败
    #[error("SQL 执行失败: {0}")]
    Sql(#[from] rusqlite::Error),
    /// 库中存在无法识别的状态值
    #[error("无法识别的账号状态: {0}")]
    UnknownStatus(String),
    /// 邮箱为空，拒绝写入
    #[error("邮箱为空，拒绝写入")]
    EmptyEmail,
}

/// 导出错误
#[derive(Debug, Error)]
pub enum ExportError {
    /// 请求了不存在的字段
    #[error("未知的导出字段: {0}")]
    UnknownField(String),
    /// 未指定任何字段
    #[error("导出字段不能为空")]
    NoFields,
    /// 读取数据库失败
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// 写文件失败
    #[error("写入文件失败 ({path}): {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 翻译回退失败（非致命，分类器降级为 error）
#[derive(Debug, Error)]
pub enum TranslationError {
    /// 未配置翻译器
    #[error("translation_unavailable")]
    Unavailable,
    /// 调用翻译服务失败
    #[error("translation_failed: {0}")]
    Failed(String),
}

/// 配置错误（对整个运行致命）
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 必需的输入文件不存在
    #[error("必需的文件不存在: {path}")]
    MissingFile { path: String },
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML 解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建缺失文件错误
    pub fn missing_file(path: impl Into<String>) -> Self {
        AppError::Config(ConfigError::MissingFile { path: path.into() })
    }

    /// 创建会话错误
    pub fn session(cause: SessionCause, detail: impl Into<String>) -> Self {
        AppError::Session(SessionError::new(cause, detail))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
