//! 会话句柄
//!
//! 直连模式保存 cookie 头，中继模式保存中继返回的不透明会话串。
//! 两种句柄用不同的键存放，永远不会互相替用。

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Direct,
    Proxy,
}

impl ConnectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectorKind::Direct => "direct",
            ConnectorKind::Proxy => "proxy",
        }
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub kind: ConnectorKind,
    /// cookie 头（直连）或中继会话串（中继）
    pub state: String,
    /// 所属会话键
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl SessionHandle {
    pub fn new(
        kind: ConnectorKind,
        state: impl Into<String>,
        owner: impl Into<String>,
        created_at: DateTime<Utc>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            kind,
            state: state.into(),
            owner: owner.into(),
            created_at,
            ttl_secs,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > ChronoDuration::seconds(self.ttl_secs as i64)
    }

    /// 会话作用域中的存储键
    pub fn scope_key(kind: ConnectorKind, owner: &str) -> String {
        format!("siaf:session:{}:{}", kind, owner)
    }

    /// 备用令牌缓存中的存储键
    pub fn token_key(token: &str) -> String {
        format!("siaf:relay-token:{}", token)
    }
}

/// 验证码状态的存储键
pub fn captcha_key(owner: &str) -> String {
    format!("siaf:captcha:{}", owner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_partitioned_by_kind() {
        let direct = SessionHandle::scope_key(ConnectorKind::Direct, "abc");
        let proxy = SessionHandle::scope_key(ConnectorKind::Proxy, "abc");
        assert_ne!(direct, proxy);
        assert_eq!(direct, "siaf:session:direct:abc");
    }

    #[test]
    fn test_expiry() {
        let start = Utc::now();
        let handle = SessionHandle::new(ConnectorKind::Proxy, "c=1", "abc", start, 600);
        assert!(!handle.is_expired(start + ChronoDuration::seconds(600)));
        assert!(handle.is_expired(start + ChronoDuration::seconds(601)));
    }
}
