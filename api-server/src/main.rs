mod api;
mod models;

use log::{error, info};
use models::config::Config;
use models::context::{Context, ContextPointer};
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] figment::Error),

    #[error("Logger setup failed: {0}")]
    Logger(#[from] log::SetLoggerError),

    #[error("Could not open the mention database: {0}")]
    Store(#[from] mention_monitor::Error),
}

#[rocket::main]
async fn main() -> Result<(), StartupError> {
    let config = Config::load()?;

    TermLogger::init(
        config.level_filter(),
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    info!("Tracking {} by default", config.default_entity());
    let context: ContextPointer = Arc::new(Context::new(config).await?);

    if let Err(err) = api::build(context).launch().await {
        error!("Server stopped: {}", err);
    }

    Ok(())
}
