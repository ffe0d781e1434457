use std::path::PathBuf;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use car_scout::infrastructure::logging;
use car_scout::infrastructure::ConfigManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Optional config path as the only argument; default is the platform
    // config directory.
    let manager = match std::env::args().nth(1) {
        Some(path) => ConfigManager::with_path(PathBuf::from(path)),
        None => ConfigManager::new()?,
    };
    let config = manager.load_config().await?;

    logging::init_logging_with_config(&config.user.logging)?;
    info!("Car Scout starting (config: {})", manager.config_path().display());

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    car_scout::run(config, cancel).await
}
