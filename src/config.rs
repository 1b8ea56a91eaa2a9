use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppResult, ConfigError};

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SIAF 门户根地址（以 `/` 结尾）
    pub portal_base_url: String,
    /// 访问门户时使用的 User-Agent
    pub user_agent: String,
    /// 是否尝试直连门户
    pub direct_enabled: bool,
    /// 直连建立连接超时（秒）
    pub direct_connect_timeout_secs: u64,
    /// 直连总超时（秒）
    pub direct_timeout_secs: u64,
    // --- 中继配置 ---
    pub relay_url: Option<String>,
    pub relay_secret: String,
    /// 中继获取验证码的逐次超时（秒），第一次成功即停止
    pub relay_attempt_timeouts_secs: Vec<u64>,
    pub relay_query_timeout_secs: u64,
    pub relay_query_connect_timeout_secs: u64,
    /// 两次重试之间的停顿（毫秒）
    pub relay_retry_pause_ms: u64,
    /// 是否校验 TLS 证书
    pub verify_tls: bool,
    // --- 验证码 / 会话 ---
    pub captcha_length: usize,
    pub local_captcha_ttl_secs: u64,
    pub session_ttl_secs: u64,
    pub relay_token_ttl_secs: u64,
    /// 设置后会话保存在磁盘上（可跨进程使用）
    pub session_dir: Option<PathBuf>,
    // --- 电子表格 ---
    pub spreadsheet_max_bytes: usize,
    /// 日志级别
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            portal_base_url: "https://apps2.mef.gob.pe/consulta-vfp-webapp/".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0.0.0".to_string(),
            direct_enabled: true,
            direct_connect_timeout_secs: 10,
            direct_timeout_secs: 15,
            relay_url: None,
            relay_secret: String::new(),
            relay_attempt_timeouts_secs: vec![20, 40, 60],
            relay_query_timeout_secs: 60,
            relay_query_connect_timeout_secs: 20,
            relay_retry_pause_ms: 200,
            verify_tls: true,
            captcha_length: 6,
            local_captcha_ttl_secs: 300,
            session_ttl_secs: 600,
            relay_token_ttl_secs: 600,
            session_dir: None,
            spreadsheet_max_bytes: 5 * 1024 * 1024,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// 默认值 + 环境变量覆盖
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载，再叠加环境变量
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(self) -> Self {
        let default = self;
        Self {
            portal_base_url: std::env::var("SIAF_PORTAL_URL").unwrap_or(default.portal_base_url),
            user_agent: std::env::var("SIAF_USER_AGENT").unwrap_or(default.user_agent),
            direct_enabled: std::env::var("SIAF_DIRECT_ENABLED").ok().and_then(|v| v.parse().ok()).unwrap_or(default.direct_enabled),
            direct_connect_timeout_secs: std::env::var("SIAF_DIRECT_CONNECT_TIMEOUT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.direct_connect_timeout_secs),
            direct_timeout_secs: std::env::var("SIAF_DIRECT_TIMEOUT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.direct_timeout_secs),
            relay_url: std::env::var("SIAF_PROXY_URL").ok().filter(|v| !v.trim().is_empty()).or(default.relay_url),
            relay_secret: std::env::var("SIAF_PROXY_SECRET").unwrap_or(default.relay_secret),
            relay_attempt_timeouts_secs: std::env::var("SIAF_PROXY_TIMEOUTS").ok().and_then(|v| parse_secs_list(&v)).unwrap_or(default.relay_attempt_timeouts_secs),
            verify_tls: std::env::var("SIAF_VERIFY_TLS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verify_tls),
            captcha_length: std::env::var("SIAF_CAPTCHA_LENGTH").ok().and_then(|v| v.parse().ok()).unwrap_or(default.captcha_length),
            session_dir: std::env::var("SIAF_SESSION_DIR").ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from).or(default.session_dir),
            log_level: std::env::var("SIAF_LOG_LEVEL").unwrap_or(default.log_level),
            ..default
        }
    }

    /// 检查配置之间的约束
    pub fn validate(&self) -> AppResult<()> {
        if reqwest::Url::parse(&self.portal_base_url).is_err() {
            return Err(ConfigError::InvalidUrl {
                field: "portal_base_url",
                value: self.portal_base_url.clone(),
            }
            .into());
        }
        if let Some(relay_url) = &self.relay_url {
            if reqwest::Url::parse(relay_url).is_err() {
                return Err(ConfigError::InvalidUrl {
                    field: "relay_url",
                    value: relay_url.clone(),
                }
                .into());
            }
            if self.relay_secret.is_empty() {
                return Err(ConfigError::MissingSecret.into());
            }
        }
        if self.relay_attempt_timeouts_secs.is_empty() {
            return Err(ConfigError::EmptyTimeouts.into());
        }
        if self.captcha_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "captcha_length",
                reason: "必须大于 0".to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn direct_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.direct_connect_timeout_secs)
    }

    pub fn direct_timeout(&self) -> Duration {
        Duration::from_secs(self.direct_timeout_secs)
    }

    pub fn relay_attempt_timeouts(&self) -> Vec<Duration> {
        self.relay_attempt_timeouts_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn relay_token_ttl(&self) -> Duration {
        Duration::from_secs(self.relay_token_ttl_secs)
    }

    pub fn local_captcha_ttl(&self) -> Duration {
        Duration::from_secs(self.local_captcha_ttl_secs)
    }
}

/// 解析 "20,40,60" 形式的秒数列表
fn parse_secs_list(value: &str) -> Option<Vec<u64>> {
    let parsed: Result<Vec<u64>, _> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect();
    parsed.ok().filter(|list| !list.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secs_list() {
        assert_eq!(parse_secs_list("20, 40,60"), Some(vec![20, 40, 60]));
        assert_eq!(parse_secs_list("5"), Some(vec![5]));
        assert_eq!(parse_secs_list(""), None);
        assert_eq!(parse_secs_list("20,abc"), None);
    }

    #[test]
    fn test_default_is_valid_and_verifies_tls() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.verify_tls);
        assert_eq!(config.relay_attempt_timeouts_secs, vec![20, 40, 60]);
        assert_eq!(config.local_captcha_ttl_secs, 300);
    }

    #[test]
    fn test_relay_without_secret_is_rejected() {
        let config = Config {
            relay_url: Some("https://relay.example.workers.dev".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            relay_url: Some("https://relay.example.workers.dev".to_string()),
            relay_secret: "s3cret".to_string(),
            relay_attempt_timeouts_secs: Vec::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            relay_url = "https://relay.example.workers.dev"
            relay_secret = "abc"
            relay_attempt_timeouts_secs = [5, 10]
            "#,
        )
        .unwrap();
        assert_eq!(config.relay_attempt_timeouts_secs, vec![5, 10]);
        assert_eq!(config.captcha_length, 6);
        assert!(config.direct_enabled);
    }
}
