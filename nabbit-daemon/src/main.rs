//! nabbitd - rabbit hardware daemon
//!
//! Loads the configuration, takes the pidfile and runs the daemon until a
//! signal, a `shutdown` packet or a triple click stops it.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nabbit_daemon::config::{self, Backend, DEFAULT_CONFIG_PATH};
use nabbit_daemon::error::DaemonError;
use nabbit_daemon::pidfile::{PidFile, DEFAULT_PIDFILE};
use nabbit_daemon::tasks::signals_task;
use nabbit_daemon::App;

#[derive(Parser, Debug)]
#[command(name = "nabbitd")]
#[command(version, about = "Serves the rabbit's ears, LEDs, sound, tag reader and button")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Pidfile guarding against a second instance
    #[arg(long, default_value = DEFAULT_PIDFILE)]
    pidfile: PathBuf,

    /// Override the configured hardware backend
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Override the configured service address, e.g. 0.0.0.0:10543
    #[arg(long)]
    listen: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let mut config = config::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(backend) = args.backend {
        config.hardware.backend = backend;
    }
    if let Some(listen) = &args.listen {
        let addr: SocketAddr = listen
            .parse()
            .map_err(|_| DaemonError::Address(listen.clone()))?;
        config.server.host = addr.ip().to_string();
        config.server.port = addr.port();
    }

    let _pidfile = match PidFile::acquire(&args.pidfile) {
        Ok(pidfile) => pidfile,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let app = App::start(config, Some(args.config)).await?;
    tokio::spawn(signals_task(app.daemon.clone()));
    info!("nabbitd started");
    app.wait().await;
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nabbit_daemon={level},nabbitd={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
