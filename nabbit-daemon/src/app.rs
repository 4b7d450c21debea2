//! Daemon assembly
//!
//! Builds the hardware backend, the facade and the daemon, binds the
//! listener and spawns the tasks. `main` and the integration tests both
//! start the daemon through [`App::start`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capabilities::{device, sim};
use crate::capabilities::sim::SimControls;
use crate::channels::{hardware_channel, Clock};
use crate::config::{Backend, DaemonConfig};
use crate::daemon::Nabbitd;
use crate::error::DaemonError;
use crate::nabio::NabIo;
use crate::resources::ResourceLocator;
use crate::tasks::{drain_task, hardware_task, service_task};

/// Longest wait for the tasks once the daemon stops
const STOP_GRACE: Duration = Duration::from_secs(5);

/// A running daemon
pub struct App {
    /// Bound service address
    pub addr: SocketAddr,
    pub daemon: Arc<Nabbitd>,
    /// Hands on the simulated robot, for the virtual backend
    pub sim: Option<SimControls>,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    pub async fn start(config: DaemonConfig, config_path: Option<PathBuf>) -> Result<App, DaemonError> {
        config.validate()?;
        let addr = config.server.addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| DaemonError::Bind { addr, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| DaemonError::Bind { addr, source })?;

        let (events, events_rx) = hardware_channel();
        let clock = Clock::new();
        let (hardware, sim) = match config.hardware.backend {
            Backend::Virtual => {
                let (hardware, controls) = sim::start(&config.hardware, events, clock)?;
                (hardware, Some(controls))
            }
            Backend::Device => (device::start(&config.hardware, events, clock)?, None),
        };
        info!("Hardware ready: {}", hardware.model);

        let nabio = NabIo::new(hardware, ResourceLocator::from_config(&config.resources));
        nabio.boot_leds(1);
        let daemon = Arc::new(Nabbitd::new(nabio, config, config_path, CancellationToken::new()));

        let tasks = vec![
            tokio::spawn(drain_task(daemon.clone())),
            tokio::spawn(hardware_task(events_rx, daemon.clone())),
            tokio::spawn(service_task(listener, daemon.clone())),
        ];
        info!("nabbitd listening on {}", addr);

        Ok(App {
            addr,
            daemon,
            sim,
            tasks,
        })
    }

    pub fn stop(&self) {
        self.daemon.shutdown_token().cancel();
    }

    /// Wait until the daemon stops, then for its tasks
    pub async fn wait(self) {
        self.daemon.shutdown_token().cancelled().await;
        for task in self.tasks {
            if tokio::time::timeout(STOP_GRACE, task).await.is_err() {
                warn!("Task did not stop in time");
            }
        }
        info!("nabbitd stopped");
    }
}
