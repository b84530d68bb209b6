//! keygate server binary

use keygate_server::{AppState, KeygateServer, LogFormat, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;
    init_tracing(config.log_format);

    info!("Starting keygate server");
    info!("Data directory: {}", config.data_dir.display());
    info!("Bind address: {}", config.bind);

    let (state, _usage_worker) = AppState::from_config(&config)?;
    KeygateServer::new(state).bind(config.bind).await
}
