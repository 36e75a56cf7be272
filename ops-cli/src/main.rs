use clap::Parser;
use config_engine::ConfigLoader;
use logger_redacted::{init_tracing, LoggerConfig};
use ops_cli::cli::Cli;
use ops_cli::commands;
use ops_cli::context::AppContext;

#[tokio::main]
async fn main() -> error_common::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = ConfigLoader::standard(cli.config.as_deref()).load()?;

    let logging = &config.logging;
    let _guard = init_tracing(&LoggerConfig {
        level: if cli.verbose { "debug".to_string() } else { logging.level.clone() },
        json: logging.json,
        redaction_enabled: logging.redaction_enabled,
        log_dir: logging.log_dir.clone(),
    })?;

    tracing::debug!(database = %config.database.path.display(), "Configuration loaded");

    let ctx = AppContext::build(config).await?;
    commands::dispatch(&ctx, cli.command).await?;

    ctx.engine.database().clone().close().await?;
    Ok(())
}
