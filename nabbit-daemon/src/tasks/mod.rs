//! Daemon tasks
//!
//! Each task runs independently and talks to the others through
//! [`Nabbitd`](crate::daemon::Nabbitd) and channels. All of them stop on
//! the daemon's shutdown token.

pub mod drain;
pub mod hardware;
pub mod service;
pub mod signals;

pub use drain::drain_task;
pub use hardware::hardware_task;
pub use service::service_task;
pub use signals::signals_task;
