use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::models::Strategy;

/// 应用程序错误类型
///
/// 对外暴露的所有操作都返回 `AppResult`，组件内部的失败在边界处统一转换成这里的某一类。
#[derive(Debug, Error)]
pub enum AppError {
    /// 网络 / 超时 / DNS
    #[error("连接错误: {0}")]
    Connectivity(#[from] ConnectivityError),
    /// 验证码过期、已被使用或格式不对
    #[error("验证码错误: {0}")]
    Captcha(#[from] CaptchaError),
    /// 结果表格或电子表格无法解析
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),
    /// 调用方提供的参数不合法
    #[error("参数错误: {0}")]
    Validation(#[from] ValidationError),
    /// 会话句柄超过 TTL 或不存在
    #[error("会话已过期或不存在: {key}")]
    SessionExpired { key: String },
    /// 所有策略都失败了，逐条列出每个策略的原因
    #[error("{operation}失败，已尝试全部策略: {}", format_attempts(.attempts))]
    Exhausted {
        operation: String,
        attempts: Vec<AttemptFailure>,
    },
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 会话存储读写失败
    #[error("存储错误 ({path}): {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// JSON 序列化失败
    #[error("JSON 处理失败: {0}")]
    Json(#[from] serde_json::Error),
}

/// 错误大类，方便调用方分支处理而不用匹配嵌套的枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    Captcha,
    Parse,
    Validation,
    SessionExpired,
    Exhausted,
    Config,
    Storage,
}

/// 单个策略的失败记录
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AttemptFailure {
    pub strategy: Strategy,
    pub reason: String,
}

impl AttemptFailure {
    pub fn new(strategy: Strategy, reason: impl Into<String>) -> Self {
        Self {
            strategy,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.strategy, self.reason)
    }
}

fn format_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 网络层错误
#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("请求超时 ({url}, {timeout_secs}s)")]
    Timeout { url: String, timeout_secs: u64 },
    #[error("无法连接 ({url}): {message}")]
    Connect { url: String, message: String },
    #[error("HTTP {status} ({url})")]
    HttpStatus { url: String, status: u16 },
    #[error("请求失败 ({url}): {message}")]
    Request { url: String, message: String },
    #[error("响应为空 ({url})")]
    EmptyBody { url: String },
    #[error("中继拒绝请求 (HTTP {status}): {message}")]
    RelayRejected { status: u16, message: String },
}

impl ConnectivityError {
    /// 把 reqwest 的错误归类成超时 / 连接失败 / 其他
    pub fn from_reqwest(url: &str, timeout: Duration, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ConnectivityError::Timeout {
                url: url.to_string(),
                timeout_secs: timeout.as_secs(),
            }
        } else if err.is_connect() {
            ConnectivityError::Connect {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            ConnectivityError::Request {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// 验证码错误
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("验证码已过期 (已过 {age_secs}s, 有效期 {ttl_secs}s)")]
    Expired { age_secs: i64, ttl_secs: u64 },
    #[error("验证码不存在或已被使用: {key}")]
    NotFound { key: String },
    #[error("验证码不正确")]
    Mismatch,
    #[error("验证码格式不正确: {reason}")]
    Malformed { reason: String },
    #[error("生成验证码图片失败: {message}")]
    Render { message: String },
    #[error("验证码图片数据无效: {reason}")]
    InvalidImage { reason: String },
}

/// 解析错误
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("响应中找不到结果表格 (#{marker})")]
    TableNotFound { marker: String },
    #[error("结果表格中没有有效数据行")]
    NoRows,
    #[error("选择器无效: {selector}")]
    Selector { selector: String },
    #[error("文件内容为空")]
    EmptySpreadsheet,
    #[error("文件中没有可用的数据行")]
    NoSpreadsheetRows,
    #[error("无法识别的文件格式")]
    UnsupportedFormat,
    #[error("读取工作簿失败: {message}")]
    Workbook { message: String },
    #[error("读取 CSV 失败: {message}")]
    Csv { message: String },
}

/// 参数校验错误
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("字段 {field} 无效: {reason}")]
    Field { field: &'static str, reason: String },
    #[error("文件太大 ({size} 字节, 上限 {max} 字节)")]
    FileTooLarge { size: usize, max: usize },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} 不是有效的 URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("配置了中继地址但没有配置共享密钥")]
    MissingSecret,
    #[error("中继重试超时列表不能为空")]
    EmptyTimeouts,
    #[error("{field} 取值无效: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("读取配置文件失败 ({path}): {message}")]
    File { path: String, message: String },
}

// ========== 从常见错误类型转换 ==========

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        AppError::Connectivity(ConnectivityError::Request {
            url,
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage {
            path: String::new(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(ConfigError::File {
            path: String::new(),
            message: err.to_string(),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建字段校验错误
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        AppError::Validation(ValidationError::Field {
            field,
            reason: reason.into(),
        })
    }

    /// 创建会话过期错误
    pub fn session_expired(key: impl Into<String>) -> Self {
        AppError::SessionExpired { key: key.into() }
    }

    /// 创建存储错误
    pub fn storage(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Storage {
            path: path.into(),
            source,
        }
    }

    /// 错误大类
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Connectivity(_) => ErrorKind::Connectivity,
            AppError::Captcha(_) => ErrorKind::Captcha,
            AppError::Parse(_) => ErrorKind::Parse,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::SessionExpired { .. } => ErrorKind::SessionExpired,
            AppError::Exhausted { .. } => ErrorKind::Exhausted,
            AppError::Config(_) => ErrorKind::Config,
            AppError::Storage { .. } | AppError::Json(_) => ErrorKind::Storage,
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_message_names_every_strategy() {
        let err = AppError::Exhausted {
            operation: "获取验证码".to_string(),
            attempts: vec![
                AttemptFailure::new(Strategy::Direct, "请求超时"),
                AttemptFailure::new(Strategy::Proxy, "中继拒绝请求"),
                AttemptFailure::new(Strategy::Local, "生成失败"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("[direct] 请求超时"));
        assert!(msg.contains("[proxy] 中继拒绝请求"));
        assert!(msg.contains("[local] 生成失败"));
        assert_eq!(err.kind(), ErrorKind::Exhausted);
    }

    #[test]
    fn nested_errors_keep_their_kind() {
        let err: AppError = ParseError::NoRows.into();
        assert_eq!(err.kind(), ErrorKind::Parse);

        let err = AppError::invalid_field("anoEje", "必须是 4 位数字");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("anoEje"));
    }
}
