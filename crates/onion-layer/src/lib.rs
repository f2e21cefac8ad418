//! onion-layer - supervise a background anonymity-routing daemon
//!
//! ```rust,no_run
//! use onion_layer::{DaemonConfig, OnionLayer};
//! use std::time::Duration;
//!
//! async fn example() -> Result<(), onion_layer::LayerError> {
//!     let daemon = DaemonConfig::builder()
//!         .data_dir("/var/lib/onion-layer")
//!         .build()
//!         .map_err(|e| onion_layer::LayerError::ConfigurationError(e.to_string()))?;
//!
//!     let layer = OnionLayer::new(daemon)?;
//!     layer.start();
//!     layer.wait_until_running(Duration::from_secs(120)).await?;
//!     println!("proxy at {}", layer.socks_url());
//!     layer.stop();
//!     Ok(())
//! }
//! ```

mod layer;
mod socks;

pub use layer::{OnionLayer, TOR_SERVICE};
pub use socks::socks_proxy_alive;

// Re-export core and host functionality
pub use onion_layer_core::*;
pub use onion_layer_process::*;
