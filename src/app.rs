//! 命令行入口
//!
//! 每个子命令输出一段 JSON 到标准输出，日志走标准错误。

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use siaf_expediente::utils::logging::log_startup;
use siaf_expediente::{AcquisitionRequest, Config, Orchestrator};
use tracing::{info, warn};

const USAGE: &str = "用法:
  siaf-expediente captcha <out.png>
  siaf-expediente query <session_key> <year> <unit> <expediente> <captcha> <doc_code> [relay_token]
  siaf-expediente ingest <file>
  siaf-expediente diagnose";

/// 运行一个子命令
pub async fn run(mut config: Config, args: &[String]) -> Result<()> {
    let Some((command, rest)) = args.split_first() else {
        bail!("{}", USAGE);
    };

    // 两次调用分属不同进程，会话必须落盘
    if config.session_dir.is_none() {
        config.session_dir = Some(std::env::temp_dir().join("siaf-expediente"));
    }
    log_startup(&config);
    let orchestrator = Orchestrator::from_config(&config).context("初始化失败")?;

    match (command.as_str(), rest) {
        ("captcha", [out]) => captcha(&orchestrator, Path::new(out)).await,
        ("query", [session_key, year, unit, expediente, captcha, doc_code, token @ ..]) if token.len() <= 1 => {
            let request = AcquisitionRequest {
                session_key: session_key.clone(),
                relay_token: token.first().cloned(),
                year: year.clone(),
                unit_code: unit.clone(),
                expediente: expediente.clone(),
                captcha_text: captcha.clone(),
                document_code: doc_code.clone(),
            };
            let outcome = orchestrator.submit_query(&request).await?;
            print_json(&outcome)
        }
        ("ingest", [file]) => {
            let bytes = fs::read(file).with_context(|| format!("无法读取文件: {}", file))?;
            let outcome = orchestrator.ingest_spreadsheet(&bytes)?;
            info!("✓ 导入 {} 条记录", outcome.records.len());
            print_json(&outcome)
        }
        ("diagnose", []) => {
            let diagnostics = orchestrator.diagnose().await;
            if !diagnostics.any_reachable() {
                warn!("⚠️ 没有可用的远端连接方式");
            }
            print_json(&diagnostics)
        }
        _ => bail!("{}", USAGE),
    }
}

/// 输出给调用方的验证码信息，图片单独写文件
#[derive(Serialize)]
struct ChallengeOutput<'a> {
    session_key: &'a str,
    relay_token: Option<&'a str>,
    source: String,
    issued_at: String,
    ttl_secs: u64,
    image_path: String,
    notice: Option<&'a str>,
}

async fn captcha(orchestrator: &Orchestrator, out: &Path) -> Result<()> {
    let challenge = orchestrator.fetch_challenge().await?;
    fs::write(out, &challenge.image.bytes)
        .with_context(|| format!("无法写入图片: {}", out.display()))?;
    info!("✓ 验证码图片已保存: {}", out.display());

    print_json(&ChallengeOutput {
        session_key: &challenge.session_key,
        relay_token: challenge.relay_token.as_deref(),
        source: challenge.source.to_string(),
        issued_at: challenge.issued_at.to_rfc3339(),
        ttl_secs: challenge.ttl_secs,
        image_path: out.display().to_string(),
        notice: challenge.notice.as_deref(),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
