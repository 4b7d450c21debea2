//! Drain task
//!
//! Sole consumer of the playback queue. Between requests it loops the info
//! animations while idle, and otherwise sleeps until the daemon wakes it.

use std::sync::Arc;

use nabbit_core::state::Event;
use tracing::info;

use crate::controller::DrainStep;
use crate::daemon::Nabbitd;

/// Drain task - plays queued requests in order
pub async fn drain_task(daemon: Arc<Nabbitd>) {
    info!("Drain task started");
    let stop = daemon.drain_token().clone();

    {
        let _stage = daemon.lock_stage().await;
        daemon.idle_setup().await;
    }

    'drain: loop {
        let stage = daemon.lock_stage().await;
        match daemon.next_step() {
            DrainStep::Wait => {
                drop(stage);
                tokio::select! {
                    _ = stop.cancelled() => break 'drain,
                    _ = daemon.woken() => {}
                }
            }
            DrainStep::Info(animations) => {
                drop(stage);
                let loop_ms = daemon.info_loop_ms();
                for animation in &animations {
                    let notified = tokio::select! {
                        _ = stop.cancelled() => break 'drain,
                        notified = daemon.play_info(animation, loop_ms) => notified,
                    };
                    if notified {
                        break;
                    }
                }
            }
            DrainStep::Expired(request) => daemon.expire(request),
            DrainStep::Run(request) => {
                tokio::select! {
                    _ = stop.cancelled() => break 'drain,
                    _ = daemon.run_queued(request) => {}
                }
            }
            DrainStep::Drained => daemon.fire(Event::QueueDrained).await,
        }
    }
    info!("Drain task stopped");
}
