//! Process host for onion-layer
//!
//! [`ProcessServiceManager`] implements the core `ServiceManager` trait by
//! running the routing daemon as a supervised child process. The daemon's
//! control port doubles as the readiness signal.

mod bootstrap;
mod config;
mod handle;
mod manager;
mod torrc;

pub use bootstrap::parse_bootstrap_progress;
pub use config::{DEFAULT_CONTROL_PORT, DEFAULT_SOCKS_PORT, DaemonConfig, DaemonConfigBuilder};
pub use handle::DaemonHandle;
pub use manager::ProcessServiceManager;
pub use torrc::generate_torrc;
