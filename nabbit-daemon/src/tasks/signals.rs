//! Unix signal task
//!
//! SIGUSR1 reloads the configuration; SIGINT and SIGTERM stop the daemon.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use crate::daemon::Nabbitd;

/// Signal task
pub async fn signals_task(daemon: Arc<Nabbitd>) {
    info!("Signal task started");
    let (mut reload, mut interrupt, mut terminate) = match (
        signal(SignalKind::user_defined1()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(reload), Ok(interrupt), Ok(terminate)) => (reload, interrupt, terminate),
        _ => {
            error!("Cannot install signal handlers");
            return;
        }
    };
    let token = daemon.shutdown_token().clone();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = reload.recv() => {
                info!("SIGUSR1, reloading configuration");
                daemon.reload_config().await;
            }
            _ = interrupt.recv() => {
                info!("SIGINT, stopping");
                token.cancel();
            }
            _ = terminate.recv() => {
                info!("SIGTERM, stopping");
                token.cancel();
            }
        }
    }
}
