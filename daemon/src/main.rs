//! Gemstone daemon binary (`gemstoned`)

use daemon::Daemon;
use tracing::{error, info};

#[tokio::main]
async fn main() -> daemon::Result<()> {
    gemstone_core::utils::init_tracing("info").map_err(daemon::DaemonError::Core)?;

    info!("Starting Gemstone daemon v{}", env!("CARGO_PKG_VERSION"));

    let daemon = match Daemon::new() {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("Failed to initialize daemon: {}", e);
            return Err(e);
        }
    };

    if let Err(e) = daemon.run().await {
        error!("Daemon failed: {}", e);
        return Err(e);
    }

    info!("Daemon stopped");
    Ok(())
}
