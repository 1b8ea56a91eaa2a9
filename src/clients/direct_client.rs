//! 直连客户端
//!
//! 封装与 SIAF 门户的直接通信：
//! 1. 访问查询页面建立会话 cookie
//! 2. 用同一会话下载验证码图片
//! 3. 带着会话 cookie 和 Referer 提交查询表单
//!
//! 每次获取验证码都使用新的 cookie jar，不同调用方的会话互不影响。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER};
use reqwest::{redirect, Client, Response, Url};
use tracing::{debug, info, warn};

use crate::clients::connector::{ensure_kind, PortalConnector, ProbeReport, RemoteChallenge};
use crate::config::Config;
use crate::error::{AppError, AppResult, ConfigError, ConnectivityError};
use crate::models::{ConnectorKind, ImageData, QueryForm, SessionHandle};
use crate::utils::logging::truncate_text;

pub const LANDING_PATH: &str = "consultaExpediente.jspx";
pub const CAPTCHA_PATH: &str = "Captcha.jpg";
pub const ACTION_PATH: &str = "actionConsultaExpediente.jspx";

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const LANGUAGE: &str = "es-ES,es;q=0.9";

/// 直连门户
#[derive(Debug, Clone)]
pub struct DirectConnector {
    base_url: Url,
    user_agent: String,
    connect_timeout: Duration,
    timeout: Duration,
    verify_tls: bool,
}

impl DirectConnector {
    /// 从配置创建
    pub fn new(config: &Config) -> AppResult<Self> {
        Ok(Self {
            base_url: base_url("portal_base_url", &config.portal_base_url)?,
            user_agent: config.user_agent.clone(),
            connect_timeout: config.direct_connect_timeout(),
            timeout: config.direct_timeout(),
            verify_tls: config.verify_tls,
        })
    }

    pub fn landing_url(&self) -> AppResult<Url> {
        self.endpoint(LANDING_PATH)
    }

    fn endpoint(&self, path: &str) -> AppResult<Url> {
        self.base_url.join(path).map_err(|_| {
            ConfigError::InvalidUrl {
                field: "portal_base_url",
                value: format!("{}{}", self.base_url, path),
            }
            .into()
        })
    }

    fn client(&self, jar: Arc<Jar>) -> AppResult<Client> {
        Client::builder()
            .cookie_provider(jar)
            .user_agent(self.user_agent.clone())
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .redirect(redirect::Policy::limited(5))
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

    fn network_error(&self, url: &Url, err: reqwest::Error) -> AppError {
        ConnectivityError::from_reqwest(url.as_str(), self.timeout, &err).into()
    }

    /// 非 2xx 视为失败
    fn ensure_success(&self, url: &Url, response: &Response) -> AppResult<()> {
        let status = response.status();
        if !status.is_success() {
            warn!("⚠️ [direct] {} 返回 HTTP {}", url, status.as_u16());
            return Err(ConnectivityError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        Ok(())
    }

    /// 用保存的 cookie 头重建 jar
    fn restore_jar(&self, state: &str) -> Arc<Jar> {
        let jar = Jar::default();
        for cookie in state.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            jar.add_cookie_str(cookie, &self.base_url);
        }
        Arc::new(jar)
    }
}

#[async_trait]
impl PortalConnector for DirectConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Direct
    }

    async fn fetch_challenge(&self) -> AppResult<RemoteChallenge> {
        let started = Instant::now();
        let jar = Arc::new(Jar::default());
        let client = self.client(jar.clone())?;

        // 1. 查询页面，拿到会话 cookie
        let landing = self.endpoint(LANDING_PATH)?;
        debug!("🔍 [direct] GET {} (超时 {}s)", landing, self.timeout.as_secs());
        let response = client
            .get(landing.clone())
            .header(ACCEPT, HTML_ACCEPT)
            .header(ACCEPT_LANGUAGE, LANGUAGE)
            .send()
            .await
            .map_err(|e| self.network_error(&landing, e))?;
        self.ensure_success(&landing, &response)?;
        let body = response
            .text()
            .await
            .map_err(|e| self.network_error(&landing, e))?;
        debug!(
            "[direct] 查询页面 {} 字节, 用时 {}ms",
            body.len(),
            started.elapsed().as_millis()
        );

        // 2. 同一会话下载验证码
        let captcha_url = self.endpoint(CAPTCHA_PATH)?;
        let response = client
            .get(captcha_url.clone())
            .header(REFERER, landing.as_str())
            .header(ACCEPT, "image/*,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| self.network_error(&captcha_url, e))?;
        self.ensure_success(&captcha_url, &response)?;
        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.network_error(&captcha_url, e))?;
        if bytes.is_empty() {
            return Err(ConnectivityError::EmptyBody {
                url: captcha_url.to_string(),
            }
            .into());
        }

        let session_state = jar
            .cookies(&landing)
            .and_then(|v| v.to_str().ok().map(str::to_string))
            .unwrap_or_default();
        if session_state.is_empty() {
            warn!("⚠️ [direct] 门户没有返回会话 cookie");
        }

        info!(
            "✓ [direct] 验证码获取成功 ({} 字节, {}ms)",
            bytes.len(),
            started.elapsed().as_millis()
        );
        Ok(RemoteChallenge {
            image: ImageData::new(mime, bytes.to_vec()),
            session_state,
        })
    }

    async fn submit_query(&self, session: &SessionHandle, form: &QueryForm) -> AppResult<String> {
        ensure_kind(ConnectorKind::Direct, session)?;
        let started = Instant::now();
        let client = self.client(self.restore_jar(&session.state))?;
        let landing = self.endpoint(LANDING_PATH)?;
        let action = self.endpoint(ACTION_PATH)?;

        debug!(
            "🔍 [direct] POST {} (anoEje={}, secEjec={}, expediente={})",
            action, form.year, form.unit_code, form.expediente
        );
        let response = client
            .post(action.clone())
            .header(REFERER, landing.as_str())
            .header(ACCEPT, HTML_ACCEPT)
            .header(ACCEPT_LANGUAGE, LANGUAGE)
            .form(&form.pairs())
            .send()
            .await
            .map_err(|e| self.network_error(&action, e))?;
        self.ensure_success(&action, &response)?;
        let body = response
            .text()
            .await
            .map_err(|e| self.network_error(&action, e))?;
        if body.trim().is_empty() {
            return Err(ConnectivityError::EmptyBody {
                url: action.to_string(),
            }
            .into());
        }

        info!(
            "✓ [direct] 查询完成 ({} 字节, {}ms)",
            body.len(),
            started.elapsed().as_millis()
        );
        debug!("[direct] 响应预览: {}", truncate_text(&body, 200));
        Ok(body)
    }

    async fn probe(&self) -> ProbeReport {
        let started = Instant::now();
        let target = self
            .endpoint(LANDING_PATH)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.base_url.to_string());
        let mut report = ProbeReport {
            connector: ConnectorKind::Direct,
            target: target.clone(),
            reachable: false,
            http_status: None,
            elapsed_ms: 0,
            error: None,
            detail: None,
        };

        let result = match self.client(Arc::new(Jar::default())) {
            Ok(client) => client.get(target.as_str()).send().await.map_err(|e| {
                let detail = std::error::Error::source(&e).map(|s| s.to_string());
                (ConnectivityError::from_reqwest(&target, self.timeout, &e).to_string(), detail)
            }),
            Err(e) => Err((e.to_string(), None)),
        };
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let status = response.status();
                report.http_status = Some(status.as_u16());
                report.reachable = status.is_success();
            }
            Err((error, detail)) => {
                report.error = Some(error);
                report.detail = detail;
            }
        }
        report
    }
}

/// 解析根地址，保证以 `/` 结尾，这样 `join` 不会丢掉最后一级路径
pub(crate) fn base_url(field: &'static str, raw: &str) -> AppResult<Url> {
    let mut value = raw.trim().to_string();
    if !value.ends_with('/') {
        value.push('/');
    }
    Url::parse(&value).map_err(|_| {
        ConfigError::InvalidUrl {
            field,
            value: raw.to_string(),
        }
        .into()
    })
}
