//! Hardware event task
//!
//! Forwards driver events to the daemon in arrival order.

use std::sync::Arc;

use tracing::info;

use crate::channels::HardwareReceiver;
use crate::daemon::Nabbitd;

/// Hardware task - button, ear and tag events
pub async fn hardware_task(mut events: HardwareReceiver, daemon: Arc<Nabbitd>) {
    info!("Hardware task started");
    let token = daemon.shutdown_token().clone();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => daemon.on_hardware_event(event),
                None => break,
            },
        }
    }
    info!("Hardware task stopped");
}
