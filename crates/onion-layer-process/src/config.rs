use derive_builder::Builder;
use onion_layer_core::LayerError;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default SOCKS port of the routing daemon.
pub const DEFAULT_SOCKS_PORT: u16 = 9050;

/// Default control port of the routing daemon.
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// Binary names searched in PATH when no explicit binary is configured.
const BINARY_CANDIDATES: &[&str] = if cfg!(windows) {
    &["tor.exe"]
} else {
    &["tor", "/usr/bin/tor", "/usr/local/bin/tor"]
};

/// Configuration of the daemon launched by [`crate::ProcessServiceManager`]
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct DaemonConfig {
    /// Explicit daemon binary, searched in PATH when unset
    #[builder(default)]
    pub binary: Option<PathBuf>,
    /// Directory the daemon keeps its state in; the torrc is written here
    pub data_dir: PathBuf,
    #[builder(default = "DEFAULT_SOCKS_PORT")]
    pub socks_port: u16,
    #[builder(default = "DEFAULT_CONTROL_PORT")]
    pub control_port: u16,
    #[builder(default)]
    #[builder(setter(custom))]
    pub args: Vec<String>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    /// Time between SIGTERM and a hard kill on unbind
    #[builder(default = "Duration::from_secs(5)")]
    pub shutdown_grace: Duration,
    /// Upper bound for one control port connect probe
    #[builder(default = "Duration::from_millis(250)")]
    pub probe_timeout: Duration,
}

impl DaemonConfig {
    pub fn builder() -> DaemonConfigBuilder {
        DaemonConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), LayerError> {
        if self.socks_port == 0 || self.control_port == 0 {
            return Err(LayerError::ConfigurationError(
                "socks_port and control_port must be non-zero".to_string(),
            ));
        }

        if self.socks_port == self.control_port {
            return Err(LayerError::ConfigurationError(format!(
                "socks_port and control_port must differ (both {})",
                self.socks_port
            )));
        }

        if self.probe_timeout.is_zero() {
            return Err(LayerError::ConfigurationError(
                "probe_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Find the daemon binary: the configured path first, then PATH
    pub fn resolve_binary(&self) -> Option<PathBuf> {
        if let Some(ref path) = self.binary {
            return path.exists().then(|| path.clone());
        }

        BINARY_CANDIDATES
            .iter()
            .find_map(|candidate| which::which(candidate).ok())
    }

    pub fn control_address(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.control_port))
    }

    pub fn socks_address(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.socks_port))
    }

    pub fn torrc_path(&self) -> PathBuf {
        self.data_dir.join("torrc")
    }
}

impl DaemonConfigBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());

        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}
