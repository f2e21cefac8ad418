use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::service::ServiceDescriptor;

/// Configuration for the readiness poller that runs once a service is bound
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollConfig {
    /// Delay between two control channel checks (in milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound for a single control channel check (in milliseconds)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl PollConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll configuration tuned for tests and local daemons that come up quickly
    pub fn fast() -> Self {
        Self {
            interval_ms: 50,
            probe_timeout_ms: 50,
        }
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_ms == 0 {
            return Err(anyhow::anyhow!("interval_ms must be greater than zero"));
        }

        if self.probe_timeout_ms == 0 {
            return Err(anyhow::anyhow!("probe_timeout_ms must be greater than zero"));
        }

        if self.interval_ms > 60_000 {
            return Err(anyhow::anyhow!("interval_ms should not exceed 60 seconds"));
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Main controller configuration
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into))]
pub struct ControllerConfig {
    /// The background service the controller binds to
    pub service: ServiceDescriptor,
    #[builder(default)]
    pub poll: PollConfig,
}

impl ControllerConfig {
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }

    /// Shorthand for a controller bound to `name` with default polling
    pub fn for_service(name: impl Into<String>) -> Self {
        Self {
            service: ServiceDescriptor::new(name),
            poll: PollConfig::default(),
        }
    }
}

impl ControllerConfigBuilder {
    pub fn service_name<S: ToString>(&mut self, name: S) -> &mut Self {
        self.service = Some(ServiceDescriptor::new(name.to_string()));
        self
    }
}

// Default value functions for serde
fn default_interval_ms() -> u64 {
    500
}
fn default_probe_timeout_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_poll_config() {
        let config = PollConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.interval(), Duration::from_millis(500));
        assert_eq!(config.probe_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_poll_config() {
        let mut config = PollConfig {
            interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.interval_ms = 120_000;
        assert!(config.validate().is_err());

        config.interval_ms = 500;
        config.probe_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: PollConfig = serde_json::from_str(r#"{"intervalMs": 100}"#).unwrap();
        assert_eq!(config.interval_ms, 100);
        assert_eq!(config.probe_timeout_ms, 250);
    }

    #[test]
    fn test_builder_requires_service() {
        assert!(ControllerConfig::builder().build().is_err());

        let config = ControllerConfig::builder()
            .service_name("tor")
            .poll(PollConfig::fast())
            .build()
            .unwrap();
        assert_eq!(config.service.name, "tor");
        assert_eq!(config.poll.interval_ms, 50);
    }
}
