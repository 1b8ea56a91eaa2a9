//! 连通性诊断
//!
//! 对每种连接方式做一次探测，并把常见的失败原因翻译成可以直接照做的提示。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clients::ProbeReport;
use crate::models::ConnectorKind;

/// 诊断报告
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct: Option<ProbeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProbeReport>,
    pub hints: Vec<String>,
}

impl Diagnostics {
    pub fn new(checked_at: DateTime<Utc>, direct: Option<ProbeReport>, proxy: Option<ProbeReport>) -> Self {
        let mut hints = Vec::new();
        match &direct {
            Some(report) => hints.extend(hints_for(report)),
            None => hints.push("直连已关闭".to_string()),
        }
        match &proxy {
            Some(report) => hints.extend(hints_for(report)),
            None => hints.push("未配置中继服务 (SIAF_PROXY_URL / SIAF_PROXY_SECRET)".to_string()),
        }
        Self {
            checked_at,
            direct,
            proxy,
            hints,
        }
    }

    /// 是否至少有一种远端方式可用
    pub fn any_reachable(&self) -> bool {
        [&self.direct, &self.proxy]
            .into_iter()
            .flatten()
            .any(|report| report.reachable)
    }
}

/// 根据探测结果给出提示
pub fn hints_for(report: &ProbeReport) -> Vec<String> {
    let name = match report.connector {
        ConnectorKind::Direct => "直连",
        ConnectorKind::Proxy => "中继",
    };
    let mut hints = Vec::new();

    if report.reachable {
        return hints;
    }

    let text = format!(
        "{} {}",
        report.error.as_deref().unwrap_or_default(),
        report.detail.as_deref().unwrap_or_default()
    )
    .to_lowercase();

    if text.contains("dns") || text.contains("resolve") || text.contains("lookup") {
        hints.push(format!("{}: 无法解析主机名 (DNS 问题)，检查服务器的 DNS 设置", name));
    } else if text.contains("timed out") || text.contains("timeout") || text.contains("超时") {
        hints.push(format!("{}: 请求超时，门户响应太慢或网络被限制", name));
    } else if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
        hints.push(format!(
            "{}: TLS 证书校验失败，可以确认后设置 SIAF_VERIFY_TLS=false",
            name
        ));
    } else if text.contains("connect") || text.contains("无法连接") {
        hints.push(format!("{}: 无法连接到主机，出站网络可能被防火墙拦截", name));
    }

    match report.http_status {
        Some(401) | Some(403) if report.connector == ConnectorKind::Proxy => {
            hints.push("中继: 共享密钥不正确 (SIAF_PROXY_SECRET)".to_string());
        }
        Some(status) if !(200..300).contains(&status) => {
            hints.push(format!("{}: HTTP 响应码 {}", name, status));
        }
        _ => {}
    }

    if hints.is_empty() {
        hints.push(format!(
            "{}: 不可用 ({})",
            name,
            report.error.as_deref().unwrap_or("未知原因")
        ));
    }
    hints
}
