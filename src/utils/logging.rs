/// 日志工具模块
///
/// 提供日志初始化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化日志
///
/// `RUST_LOG` 优先，否则使用配置中的级别。重复调用不会报错。
///
/// # 参数
/// - `level`: 默认日志级别，如 `info`、`debug`
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `config`: 生效的配置
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 SIAF expediente 获取");
    info!("🌐 门户: {}", config.portal_base_url);
    info!(
        "📋 策略: 直连={} | 中继={} | 本地验证码=开启",
        if config.direct_enabled { "开启" } else { "关闭" },
        match &config.relay_url {
            Some(url) => format!("{} (密钥 {})", url, mask_secret(&config.relay_secret)),
            None => "未配置".to_string(),
        }
    );
    info!(
        "⏱️ 直连超时 {}s (连接 {}s) | 中继重试超时 {:?}s",
        config.direct_timeout_secs, config.direct_connect_timeout_secs, config.relay_attempt_timeouts_secs
    );
    if !config.verify_tls {
        info!("⚠️ 已关闭 TLS 证书校验");
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

/// 遮盖密钥，只保留前 3 个字符
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return "(空)".to_string();
    }
    let head: String = secret.chars().take(3).collect();
    format!("{}***", head)
}
