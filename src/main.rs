use anyhow::Context;
use card_proxy::app::{serve, AppState};
use card_proxy::utils::{logger, validation::Validate};
use card_proxy::CliArgs;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 初始化日誌
    if args.json_logs {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("Starting card-proxy");
    if let Some(path) = &args.config {
        tracing::info!("📁 Loading configuration from: {}", path);
    }

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }
    tracing::info!("✅ Configuration loaded and validated successfully");

    let state = AppState::from_config(config).context("failed to build application state")?;
    serve(state).await.context("server error")?;

    Ok(())
}
