//! Seams between the lifecycle controller and the host that runs the service.
//!
//! A host implements [`ServiceManager`]. The controller hands it one
//! [`ServiceConnection`] per bind episode and later unbinds with that very
//! same `Arc`, so hosts identify bindings by pointer identity
//! (see [`same_connection`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::LayerError;

/// Identifies the background service a host should start and bind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// The live control interface of a bound service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChannel {
    pub address: SocketAddr,
}

/// Handle to a bound service, delivered through [`ServiceConnection::on_connected`]
#[async_trait]
pub trait ServiceHandle: Send + Sync {
    /// Returns the control channel once the service is operational, `None` before that
    async fn control_channel(&self) -> Option<ControlChannel>;

    /// Latest bootstrap percentage reported by the service, if it reports one
    fn bootstrap_progress(&self) -> Option<u8> {
        None
    }
}

/// Callbacks a host invokes for a single binding
///
/// `on_connected` fires at most once per successful bind. `on_disconnected`
/// fires when the service goes away without an unbind; after delivering it
/// the host considers the binding released.
pub trait ServiceConnection: Send + Sync {
    fn on_connected(&self, handle: Arc<dyn ServiceHandle>);

    fn on_disconnected(&self);
}

/// Host-side service manager able to start and bind background services
///
/// Both calls only issue the request and return; outcomes arrive through the
/// connection callbacks on the host's own context. A `bind` that fails after
/// delivering `on_connected` is followed by an `unbind` for that connection.
pub trait ServiceManager: Send + Sync {
    /// Request that `service` be started and bound to `connection`
    fn bind(
        &self,
        service: &ServiceDescriptor,
        connection: Arc<dyn ServiceConnection>,
    ) -> Result<(), LayerError>;

    /// Release the binding previously created for `connection`
    fn unbind(&self, connection: &Arc<dyn ServiceConnection>) -> Result<(), LayerError>;
}

/// True when both `Arc`s point at the same connection object
pub fn same_connection(a: &Arc<dyn ServiceConnection>, b: &Arc<dyn ServiceConnection>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
