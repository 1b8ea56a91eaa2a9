//! 连接方式的公共接口
//!
//! 直连和中继都实现 `PortalConnector`，编排层只面向这个 trait。

use std::fmt::Debug;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::{ConnectorKind, ImageData, QueryForm, SessionHandle};

/// 远端验证码
#[derive(Debug, Clone)]
pub struct RemoteChallenge {
    pub image: ImageData,
    /// 后续查询需要带回的会话状态
    pub session_state: String,
}

/// 一次连通性探测的结果
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub connector: ConnectorKind,
    pub target: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProbeReport {
    pub fn unsupported(connector: ConnectorKind) -> Self {
        Self {
            connector,
            target: String::new(),
            reachable: false,
            http_status: None,
            elapsed_ms: 0,
            error: Some("不支持探测".to_string()),
            detail: None,
        }
    }
}

/// 门户连接
///
/// 连接器自身不做任何重试之外的兜底，失败直接返回给编排层。
#[async_trait]
pub trait PortalConnector: Send + Sync + Debug {
    fn kind(&self) -> ConnectorKind;

    /// 建立会话并取回验证码图片
    async fn fetch_challenge(&self) -> AppResult<RemoteChallenge>;

    /// 用会话提交查询表单
    ///
    /// # 返回
    /// 门户返回的原始 HTML
    async fn submit_query(&self, session: &SessionHandle, form: &QueryForm) -> AppResult<String>;

    /// 连通性探测
    async fn probe(&self) -> ProbeReport {
        ProbeReport::unsupported(self.kind())
    }
}

/// 拒绝其他连接方式的会话
pub(crate) fn ensure_kind(expected: ConnectorKind, session: &SessionHandle) -> AppResult<()> {
    if session.kind != expected {
        return Err(AppError::invalid_field(
            "session",
            format!("{} 连接不能使用 {} 会话", expected, session.kind),
        ));
    }
    Ok(())
}
