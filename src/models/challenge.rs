//! 验证码挑战

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::error::{AppResult, CaptchaError};
use crate::models::session::ConnectorKind;

/// 获取策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// 直连门户
    Direct,
    /// 经中继服务
    Proxy,
    /// 本地生成的验证码
    Local,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Proxy => "proxy",
            Strategy::Local => "local",
        }
    }

    /// 验证码是否来自远端门户
    pub fn is_remote(self) -> bool {
        !matches!(self, Strategy::Local)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ConnectorKind> for Strategy {
    fn from(kind: ConnectorKind) -> Self {
        match kind {
            ConnectorKind::Direct => Strategy::Direct,
            ConnectorKind::Proxy => Strategy::Proxy,
        }
    }
}

/// 图片数据（序列化为 data URI）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// `data:<mime>;base64,<payload>`
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }

    /// 解析中继返回的 data URI
    pub fn from_data_uri(uri: &str) -> AppResult<Self> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| CaptchaError::InvalidImage {
                reason: "缺少 data: 前缀".to_string(),
            })?;
        let (meta, payload) = rest.split_once(',').ok_or_else(|| CaptchaError::InvalidImage {
            reason: "缺少数据部分".to_string(),
        })?;
        let mime = meta
            .strip_suffix(";base64")
            .ok_or_else(|| CaptchaError::InvalidImage {
                reason: "只支持 base64 编码".to_string(),
            })?;
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| CaptchaError::InvalidImage {
                reason: e.to_string(),
            })?;
        if bytes.is_empty() {
            return Err(CaptchaError::InvalidImage {
                reason: "图片为空".to_string(),
            }
            .into());
        }
        Ok(Self::new(mime, bytes))
    }
}

impl Serialize for ImageData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_data_uri())
    }
}

/// 发给调用方的验证码挑战
///
/// 本地生成的验证码不会把明文放进来，只有图片。
#[derive(Debug, Clone, Serialize)]
pub struct CaptchaChallenge {
    pub image: ImageData,
    pub source: Strategy,
    /// 调用方在提交查询时带回的会话键
    pub session_key: String,
    /// 中继模式下的备用令牌，主会话丢失时用它恢复
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub ttl_secs: u64,
    /// 本地兜底时说明远端为什么失败
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}
