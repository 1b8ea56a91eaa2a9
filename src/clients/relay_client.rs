//! 中继客户端
//!
//! 部署环境无法直接访问门户时，通过独立运行的中继服务完成同样的两步操作。
//! 所有请求都带 `X-Proxy-Secret` 头。中继本身访问门户可能很慢，
//! 所以获取验证码时按递增的超时逐次重试，第一次成功即停止。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clients::connector::{ensure_kind, PortalConnector, ProbeReport, RemoteChallenge};
use crate::clients::direct_client::base_url;
use crate::config::Config;
use crate::error::{AppError, AppResult, ConfigError, ConnectivityError};
use crate::models::{ConnectorKind, ImageData, QueryForm, SessionHandle};
use crate::utils::logging::truncate_text;

pub const SECRET_HEADER: &str = "X-Proxy-Secret";

/// 单次尝试的连接超时上限
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct RelayCaptchaResponse {
    #[serde(default)]
    success: bool,
    captcha: Option<String>,
    session: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct RelayQueryBody<'a> {
    session: &'a str,
    #[serde(flatten)]
    form: &'a QueryForm,
}

#[derive(Debug, Deserialize)]
struct RelayQueryResponse {
    #[serde(default)]
    success: bool,
    html: Option<String>,
    message: Option<String>,
    #[serde(rename = "httpCode")]
    http_code: Option<u16>,
}

/// `/health` 的响应
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayHealth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl RelayHealth {
    pub fn is_healthy(&self) -> bool {
        self.success.unwrap_or(false)
            || self
                .status
                .as_deref()
                .is_some_and(|s| matches!(s.to_ascii_lowercase().as_str(), "ok" | "healthy" | "up"))
    }
}

/// 经中继访问门户
#[derive(Debug, Clone)]
pub struct ProxyConnector {
    base_url: Url,
    secret: String,
    attempt_timeouts: Vec<Duration>,
    query_timeout: Duration,
    query_connect_timeout: Duration,
    retry_pause: Duration,
    verify_tls: bool,
}

impl ProxyConnector {
    /// 从配置创建，没有配置中继地址或密钥时返回配置错误
    pub fn new(config: &Config) -> AppResult<Self> {
        let relay_url = config.relay_url.as_deref().ok_or(ConfigError::InvalidValue {
            field: "relay_url",
            reason: "未配置".to_string(),
        })?;
        if config.relay_secret.is_empty() {
            return Err(ConfigError::MissingSecret.into());
        }
        if config.relay_attempt_timeouts_secs.is_empty() {
            return Err(ConfigError::EmptyTimeouts.into());
        }
        Ok(Self {
            base_url: base_url("relay_url", relay_url)?,
            secret: config.relay_secret.clone(),
            attempt_timeouts: config.relay_attempt_timeouts(),
            query_timeout: Duration::from_secs(config.relay_query_timeout_secs),
            query_connect_timeout: Duration::from_secs(config.relay_query_connect_timeout_secs),
            retry_pause: Duration::from_millis(config.relay_retry_pause_ms),
            verify_tls: config.verify_tls,
        })
    }

    fn endpoint(&self, path: &str) -> AppResult<Url> {
        self.base_url.join(path).map_err(|_| {
            ConfigError::InvalidUrl {
                field: "relay_url",
                value: format!("{}{}", self.base_url, path),
            }
            .into()
        })
    }

    fn client(&self, timeout: Duration, connect_timeout: Duration) -> AppResult<Client> {
        Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()
            .map_err(|e| {
                ConnectivityError::Request {
                    url: self.base_url.to_string(),
                    message: format!("无法创建 HTTP 客户端: {}", e),
                }
                .into()
            })
    }

    /// 读取 JSON 响应
    ///
    /// 中继在拒绝请求时也返回 JSON，所以先解析再看状态码。
    async fn read_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        timeout: Duration,
        response: reqwest::Response,
    ) -> AppResult<(StatusCode, T)> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::from(ConnectivityError::from_reqwest(url.as_str(), timeout, &e)))?;
        match serde_json::from_str::<T>(&body) {
            Ok(parsed) => Ok((status, parsed)),
            Err(_) if !status.is_success() => Err(ConnectivityError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into()),
            Err(e) => {
                debug!("[proxy] 无法解析的响应: {}", truncate_text(&body, 200));
                Err(ConnectivityError::Request {
                    url: url.to_string(),
                    message: format!("响应不是有效的 JSON: {}", e),
                }
                .into())
            }
        }
    }

    async fn try_fetch_captcha(
        &self,
        url: &Url,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> AppResult<RemoteChallenge> {
        let client = self.client(timeout, connect_timeout)?;
        let response = client
            .get(url.clone())
            .header(SECRET_HEADER, &self.secret)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AppError::from(ConnectivityError::from_reqwest(url.as_str(), timeout, &e)))?;
        let (status, parsed): (_, RelayCaptchaResponse) = self.read_json(url, timeout, response).await?;

        if !status.is_success() || !parsed.success {
            return Err(ConnectivityError::RelayRejected {
                status: status.as_u16(),
                message: parsed.message.unwrap_or_else(|| "未知错误".to_string()),
            }
            .into());
        }
        let captcha = parsed.captcha.filter(|c| !c.is_empty()).ok_or_else(|| {
            AppError::from(ConnectivityError::EmptyBody {
                url: url.to_string(),
            })
        })?;
        let session_state = parsed.session.filter(|s| !s.is_empty()).ok_or_else(|| {
            AppError::from(ConnectivityError::RelayRejected {
                status: status.as_u16(),
                message: "中继没有返回会话".to_string(),
            })
        })?;

        Ok(RemoteChallenge {
            image: ImageData::from_data_uri(&captcha)?,
            session_state,
        })
    }

    /// 健康检查
    pub async fn health(&self) -> AppResult<RelayHealth> {
        let url = self.endpoint("health")?;
        let timeout = self.attempt_timeouts.first().copied().unwrap_or(self.query_timeout);
        let client = self.client(timeout, timeout.min(MAX_CONNECT_TIMEOUT))?;
        let response = client
            .get(url.clone())
            .header(SECRET_HEADER, &self.secret)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AppError::from(ConnectivityError::from_reqwest(url.as_str(), timeout, &e)))?;
        let (status, health): (_, RelayHealth) = self.read_json(&url, timeout, response).await?;
        if !status.is_success() {
            return Err(ConnectivityError::RelayRejected {
                status: status.as_u16(),
                message: health.message.unwrap_or_else(|| "健康检查失败".to_string()),
            }
            .into());
        }
        Ok(health)
    }
}

/// 拒绝类错误（密钥不对）重试没有意义
fn is_rejection(err: &AppError) -> bool {
    matches!(
        err,
        AppError::Connectivity(ConnectivityError::RelayRejected { status, .. })
            if *status == 401 || *status == 403
    )
}

#[async_trait]
impl PortalConnector for ProxyConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Proxy
    }

    async fn fetch_challenge(&self) -> AppResult<RemoteChallenge> {
        let url = self.endpoint("captcha")?;
        let total = self.attempt_timeouts.len();
        let mut last_error = None;

        for (index, timeout) in self.attempt_timeouts.iter().copied().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.retry_pause).await;
            }
            let connect_timeout = (timeout / 2).min(MAX_CONNECT_TIMEOUT);
            let started = Instant::now();
            debug!(
                "🔍 [proxy] 第 {}/{} 次获取验证码 (超时 {}s, 连接 {}s)",
                index + 1,
                total,
                timeout.as_secs(),
                connect_timeout.as_secs()
            );

            match self.try_fetch_captcha(&url, timeout, connect_timeout).await {
                Ok(challenge) => {
                    info!(
                        "✓ [proxy] 验证码获取成功 (第 {} 次, {}ms)",
                        index + 1,
                        started.elapsed().as_millis()
                    );
                    return Ok(challenge);
                }
                Err(e) if is_rejection(&e) => {
                    warn!("⚠️ [proxy] 中继拒绝请求，不再重试: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "⚠️ [proxy] 第 {}/{} 次失败 ({}ms): {}",
                        index + 1,
                        total,
                        started.elapsed().as_millis(),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ConfigError::EmptyTimeouts.into()))
    }

    async fn submit_query(&self, session: &SessionHandle, form: &QueryForm) -> AppResult<String> {
        ensure_kind(ConnectorKind::Proxy, session)?;
        let url = self.endpoint("consultar")?;
        let started = Instant::now();
        let client = self.client(self.query_timeout, self.query_connect_timeout)?;
        debug!(
            "🔍 [proxy] POST {} (超时 {}s, expediente={})",
            url,
            self.query_timeout.as_secs(),
            form.expediente
        );

        let body = RelayQueryBody {
            session: &session.state,
            form,
        };
        let response = client
            .post(url.clone())
            .header(SECRET_HEADER, &self.secret)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                AppError::from(ConnectivityError::from_reqwest(url.as_str(), self.query_timeout, &e))
            })?;
        let (status, parsed): (_, RelayQueryResponse) =
            self.read_json(&url, self.query_timeout, response).await?;

        if !status.is_success() || !parsed.success {
            return Err(ConnectivityError::RelayRejected {
                status: status.as_u16(),
                message: parsed.message.unwrap_or_else(|| "未知错误".to_string()),
            }
            .into());
        }
        let html = parsed
            .html
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| AppError::from(ConnectivityError::EmptyBody { url: url.to_string() }))?;

        info!(
            "✓ [proxy] 查询完成 ({} 字节, 门户 HTTP {}, {}ms)",
            html.len(),
            parsed.http_code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            started.elapsed().as_millis()
        );
        Ok(html)
    }

    async fn probe(&self) -> ProbeReport {
        let started = Instant::now();
        let target = self
            .endpoint("health")
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.base_url.to_string());
        let result = self.health().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(health) => ProbeReport {
                connector: ConnectorKind::Proxy,
                target,
                reachable: health.is_healthy(),
                http_status: Some(200),
                elapsed_ms,
                error: None,
                detail: health.message,
            },
            Err(e) => ProbeReport {
                connector: ConnectorKind::Proxy,
                target,
                reachable: false,
                http_status: match &e {
                    AppError::Connectivity(ConnectivityError::HttpStatus { status, .. })
                    | AppError::Connectivity(ConnectivityError::RelayRejected { status, .. }) => {
                        Some(*status)
                    }
                    _ => None,
                },
                elapsed_ms,
                error: Some(e.to_string()),
                detail: None,
            },
        }
    }
}
