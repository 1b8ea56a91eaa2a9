//! 获取流程编排
//!
//! 获取验证码：直连 → 中继 → 本地验证码，第一个成功的策略直接返回。
//! 提交查询：直连 → 中继（只有拿到过中继会话时），没有本地兜底。
//! 每个策略的失败原因都会被记录，全部失败时一起返回。

use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::{DirectConnector, PortalConnector, ProxyConnector, RemoteChallenge};
use crate::config::Config;
use crate::error::{AppError, AppResult, AttemptFailure, ParseError};
use crate::infrastructure::{
    Clock, FileSessionStore, MemorySessionStore, SessionStore, SessionStoreExt, SystemClock,
};
use crate::models::{
    AcquisitionRequest, CaptchaChallenge, ConnectorKind, IngestOutcome, QueryOutcome,
    SessionHandle, Strategy,
};
use crate::orchestrator::diagnostics::Diagnostics;
use crate::services::{reconcile, CaptchaRenderer, CaptchaService, ResponseParser, SpreadsheetIngestor};

const RELAY_TOKEN_LEN: usize = 40;

/// 编排器
///
/// 持有所有连接器和存储，是调用方唯一需要接触的入口。
#[derive(Debug)]
pub struct Orchestrator {
    direct: Option<Arc<dyn PortalConnector>>,
    proxy: Option<Arc<dyn PortalConnector>>,
    captcha: CaptchaService,
    /// 调用方会话作用域（主）
    scope: Arc<dyn SessionStore>,
    /// 按令牌索引的中继会话缓存（备用）
    cache: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    session_ttl: Duration,
    relay_token_ttl: Duration,
    parser: ResponseParser,
    ingestor: SpreadsheetIngestor,
}

impl Orchestrator {
    /// 创建不带连接器的编排器
    ///
    /// # 参数
    /// - `scope`: 会话作用域存储，验证码状态也存在这里
    /// - `cache`: 中继令牌缓存
    /// - `clock`: 时钟
    /// - `config`: TTL 和验证码参数从这里读取
    pub fn new(
        scope: Arc<dyn SessionStore>,
        cache: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let captcha = CaptchaService::new(
            scope.clone(),
            clock.clone(),
            config.captcha_length,
            config.local_captcha_ttl(),
        );
        Self {
            direct: None,
            proxy: None,
            captcha,
            scope,
            cache,
            clock,
            session_ttl: config.session_ttl(),
            relay_token_ttl: config.relay_token_ttl(),
            parser: ResponseParser::default(),
            ingestor: SpreadsheetIngestor::new(config.spreadsheet_max_bytes),
        }
    }

    /// 按配置组装：直连、中继和会话存储
    pub fn from_config(config: &Config) -> AppResult<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn SessionStore> = match &config.session_dir {
            Some(dir) => Arc::new(FileSessionStore::new(dir, clock.clone())?),
            None => Arc::new(MemorySessionStore::new(clock.clone())),
        };

        let mut orchestrator = Self::new(store.clone(), store, clock, config);
        if config.direct_enabled {
            orchestrator = orchestrator.with_direct(Arc::new(DirectConnector::new(config)?));
        }
        if config.relay_url.is_some() {
            orchestrator = orchestrator.with_proxy(Arc::new(ProxyConnector::new(config)?));
        }
        Ok(orchestrator)
    }

    pub fn with_direct(mut self, connector: Arc<dyn PortalConnector>) -> Self {
        self.direct = Some(connector);
        self
    }

    pub fn with_proxy(mut self, connector: Arc<dyn PortalConnector>) -> Self {
        self.proxy = Some(connector);
        self
    }

    /// 替换本地验证码的渲染器
    pub fn with_captcha_renderer(mut self, renderer: Box<dyn CaptchaRenderer>) -> Self {
        self.captcha = self.captcha.with_renderer(renderer);
        self
    }

    fn connectors(&self) -> [(Strategy, Option<&Arc<dyn PortalConnector>>); 2] {
        [
            (Strategy::Direct, self.direct.as_ref()),
            (Strategy::Proxy, self.proxy.as_ref()),
        ]
    }

    /// 获取验证码
    ///
    /// # 返回
    /// 成功时返回挑战；直连、中继和本地生成全部失败时返回 `Exhausted`
    pub async fn fetch_challenge(&self) -> AppResult<CaptchaChallenge> {
        let session_key = Uuid::new_v4().simple().to_string();
        let mut failures = Vec::new();
        info!("🔍 获取验证码 (会话 {})", session_key);

        for (strategy, connector) in self.connectors() {
            let Some(connector) = connector else {
                failures.push(AttemptFailure::new(strategy, "未配置"));
                continue;
            };
            let accepted = match connector.fetch_challenge().await {
                Ok(remote) => self.accept_remote(&session_key, connector.kind(), remote),
                Err(e) => Err(e),
            };
            match accepted {
                Ok(challenge) => {
                    info!("✓ 验证码来源: {}", challenge.source);
                    return Ok(challenge);
                }
                Err(e) => {
                    warn!("⚠️ [{}] 获取验证码失败: {}", strategy, e);
                    failures.push(AttemptFailure::new(strategy, e.to_string()));
                }
            }
        }

        let notice = format!(
            "远端验证码不可用，已改用本地验证码。{}",
            failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        );
        match self.captcha.issue_local(&session_key, Some(notice)) {
            Ok(challenge) => Ok(challenge),
            Err(e) => {
                warn!("⚠️ [local] 生成本地验证码失败: {}", e);
                failures.push(AttemptFailure::new(Strategy::Local, e.to_string()));
                Err(AppError::Exhausted {
                    operation: "获取验证码".to_string(),
                    attempts: failures,
                })
            }
        }
    }

    /// 保存远端会话并登记验证码
    fn accept_remote(
        &self,
        session_key: &str,
        kind: ConnectorKind,
        remote: RemoteChallenge,
    ) -> AppResult<CaptchaChallenge> {
        let ttl_secs = self.session_ttl.as_secs();
        let handle = SessionHandle::new(kind, remote.session_state, session_key, self.clock.now(), ttl_secs);
        self.scope.put_json(
            &SessionHandle::scope_key(kind, session_key),
            &handle,
            self.session_ttl,
        )?;

        let relay_token = match kind {
            ConnectorKind::Proxy => {
                let token = new_relay_token();
                self.cache
                    .put_json(&SessionHandle::token_key(&token), &handle, self.relay_token_ttl)?;
                Some(token)
            }
            ConnectorKind::Direct => None,
        };

        let source = Strategy::from(kind);
        let issued_at = self.captcha.register_remote(session_key, source, self.session_ttl)?;
        Ok(CaptchaChallenge {
            image: remote.image,
            source,
            session_key: session_key.to_string(),
            relay_token,
            issued_at,
            ttl_secs,
            notice: None,
        })
    }

    /// 读取某种连接方式的会话句柄
    fn load_handle(&self, kind: ConnectorKind, session_key: &str) -> AppResult<Option<SessionHandle>> {
        let handle: Option<SessionHandle> = self
            .scope
            .get_json(&SessionHandle::scope_key(kind, session_key))?;
        Ok(handle.filter(|h| h.kind == kind && !h.is_expired(self.clock.now())))
    }

    /// 主作用域丢失时用令牌恢复中继会话
    fn rehydrate_proxy(&self, session_key: &str, token: Option<&str>) -> AppResult<Option<SessionHandle>> {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let handle: Option<SessionHandle> = self.cache.get_json(&SessionHandle::token_key(token))?;
        match handle {
            Some(h) if h.kind == ConnectorKind::Proxy && h.owner == session_key => {
                info!("🔄 已通过令牌恢复中继会话 (会话 {})", session_key);
                Ok(Some(h))
            }
            Some(_) => {
                warn!("⚠️ 令牌与会话不匹配，已忽略 (会话 {})", session_key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// 查询成功后丢弃会话，清理失败只记日志
    fn discard_sessions(&self, session_key: &str, token: Option<&str>) {
        for kind in [ConnectorKind::Direct, ConnectorKind::Proxy] {
            if let Err(e) = self.scope.forget(&SessionHandle::scope_key(kind, session_key)) {
                warn!("⚠️ 清理会话失败: {}", e);
            }
        }
        if let Some(token) = token {
            if let Err(e) = self.cache.forget(&SessionHandle::token_key(token.trim())) {
                warn!("⚠️ 清理中继令牌失败: {}", e);
            }
        }
    }

    /// 提交查询
    ///
    /// # 参数
    /// - `request`: 查询参数，`session_key` 必须来自之前的 `fetch_challenge`
    ///
    /// # 返回
    /// 记录、补全后的最终记录和汇总；所有可用会话都失败时返回 `Exhausted`
    pub async fn submit_query(&self, request: &AcquisitionRequest) -> AppResult<QueryOutcome> {
        request.validate()?;
        let session_key = request.session_key.trim();
        let captcha_source = self.captcha.validate(session_key, &request.captcha_text)?;
        debug!("验证码通过本地校验 (来源 {})", captcha_source);

        let direct = self.load_handle(ConnectorKind::Direct, session_key)?;
        let proxy = match self.load_handle(ConnectorKind::Proxy, session_key)? {
            Some(handle) => Some(handle),
            None => self.rehydrate_proxy(session_key, request.relay_token.as_deref())?,
        };
        if direct.is_none() && proxy.is_none() {
            warn!("⚠️ 没有可用的会话 (会话 {})", session_key);
            return Err(AppError::session_expired(session_key));
        }

        let form = request.form();
        let mut failures = Vec::new();
        for ((strategy, connector), handle) in self.connectors().into_iter().zip([direct, proxy]) {
            let Some(handle) = handle else {
                failures.push(AttemptFailure::new(strategy, "没有该方式的会话"));
                continue;
            };
            let Some(connector) = connector else {
                failures.push(AttemptFailure::new(strategy, "未配置"));
                continue;
            };

            info!("🔍 [{}] 提交查询: {}-{}-{}", strategy, form.year, form.unit_code, form.expediente);
            let parsed = match connector.submit_query(&handle, &form).await {
                Ok(html) => self.parser.parse(&html).and_then(|table| {
                    let (best_record, summary) =
                        reconcile(&table.records).ok_or(AppError::Parse(ParseError::NoRows))?;
                    Ok((table, best_record, summary))
                }),
                Err(e) => Err(e),
            };
            match parsed {
                Ok((table, best_record, summary)) => {
                    self.discard_sessions(session_key, request.relay_token.as_deref());
                    info!(
                        "✓ [{}] 查询成功: {} 条记录, 阶段 {} / 状态 {}",
                        strategy,
                        table.records.len(),
                        summary.phase,
                        summary.status
                    );
                    return Ok(QueryOutcome {
                        source: handle.kind,
                        year: form.year.clone(),
                        unit_code: form.unit_code.clone(),
                        expediente: form.expediente.clone(),
                        document_code: request.document_code.trim().to_string(),
                        records: table.records,
                        best_record,
                        summary,
                        table_html: table.table_html,
                    });
                }
                Err(e) => {
                    warn!("⚠️ [{}] 查询失败: {}", strategy, e);
                    failures.push(AttemptFailure::new(strategy, e.to_string()));
                }
            }
        }

        Err(AppError::Exhausted {
            operation: "查询 expediente".to_string(),
            attempts: failures,
        })
    }

    /// 导入电子表格（不经过网络）
    pub fn ingest_spreadsheet(&self, bytes: &[u8]) -> AppResult<IngestOutcome> {
        self.ingestor.ingest(bytes)
    }

    /// 探测各连接方式
    pub async fn diagnose(&self) -> Diagnostics {
        let direct = match &self.direct {
            Some(connector) => Some(connector.probe().await),
            None => None,
        };
        let proxy = match &self.proxy {
            Some(connector) => Some(connector.probe().await),
            None => None,
        };
        Diagnostics::new(self.clock.now(), direct, proxy)
    }
}

fn new_relay_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RELAY_TOKEN_LEN)
        .map(char::from)
        .collect()
}
