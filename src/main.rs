mod app;

use std::path::Path;

use anyhow::Result;
use siaf_expediente::utils::logging;
use siaf_expediente::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = match std::env::var("SIAF_CONFIG") {
        Ok(path) if !path.trim().is_empty() => Config::from_toml_file(Path::new(path.trim()))?,
        _ => Config::from_env(),
    };

    // 初始化日志
    logging::init(&config.log_level);

    let args: Vec<String> = std::env::args().skip(1).collect();
    app::run(config, &args).await
}
