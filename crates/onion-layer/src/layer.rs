use onion_layer_core::{
    ControllerConfig, ControllerStatus, LayerError, PollConfig, ServiceLifecycleController,
};
use onion_layer_process::{DaemonConfig, ProcessServiceManager};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::socks::socks_proxy_alive;

/// Service name the routing daemon is bound under
pub const TOR_SERVICE: &str = "tor";

/// Routing daemon lifecycle wired to the process host
///
/// Owned by whatever session object switches the anonymity network on and
/// off. Dropping it stops the daemon.
pub struct OnionLayer {
    controller: ServiceLifecycleController<ProcessServiceManager>,
    socks_address: SocketAddr,
    probe_timeout: Duration,
}

impl OnionLayer {
    /// Create a layer with default polling on the current tokio runtime
    pub fn new(daemon: DaemonConfig) -> Result<Self, LayerError> {
        Self::with_poll(daemon, PollConfig::default())
    }

    pub fn with_poll(daemon: DaemonConfig, poll: PollConfig) -> Result<Self, LayerError> {
        let socks_address = daemon.socks_address();
        let probe_timeout = daemon.probe_timeout;

        let config = ControllerConfig::builder()
            .service_name(TOR_SERVICE)
            .poll(poll)
            .build()
            .map_err(|e| LayerError::ConfigurationError(e.to_string()))?;
        let host = Arc::new(ProcessServiceManager::new(daemon)?);

        Ok(Self {
            controller: ServiceLifecycleController::new(config, host)?,
            socks_address,
            probe_timeout,
        })
    }

    /// Launch the daemon; returns immediately
    pub fn start(&self) {
        self.controller.start()
    }

    /// Stop the daemon; returns immediately
    pub fn stop(&self) {
        self.controller.stop()
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    pub fn progress(&self) -> u8 {
        self.controller.progress()
    }

    pub fn status(&self) -> ControllerStatus {
        self.controller.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.controller.subscribe()
    }

    pub async fn wait_until_running(&self, timeout: Duration) -> Result<(), LayerError> {
        self.controller.wait_until_running(timeout).await
    }

    /// Proxy URL dependents route their traffic through
    pub fn socks_url(&self) -> String {
        format!("socks5://{}", self.socks_address)
    }

    /// Whether the daemon's SOCKS port answers a SOCKS5 greeting
    pub async fn is_proxy_alive(&self) -> bool {
        socks_proxy_alive(self.socks_address, self.probe_timeout).await
    }

    pub fn controller(&self) -> &ServiceLifecycleController<ProcessServiceManager> {
        &self.controller
    }
}
