use async_trait::async_trait;
use onion_layer_core::{ControlChannel, ServiceHandle};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::trace;

const NO_PROGRESS: u8 = u8::MAX;

/// Handle to a daemon process started by [`crate::ProcessServiceManager`]
///
/// The control channel counts as available as soon as the daemon accepts
/// connections on its control port.
pub struct DaemonHandle {
    pid: Option<u32>,
    control_address: SocketAddr,
    probe_timeout: Duration,
    progress: AtomicU8,
    exited: AtomicBool,
}

impl DaemonHandle {
    pub(crate) fn new(pid: Option<u32>, control_address: SocketAddr, probe_timeout: Duration) -> Self {
        Self {
            pid,
            control_address,
            probe_timeout,
            progress: AtomicU8::new(NO_PROGRESS),
            exited: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn control_address(&self) -> SocketAddr {
        self.control_address
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub(crate) fn set_progress(&self, progress: u8) {
        self.progress.store(progress.min(100), Ordering::Release);
    }

    pub(crate) fn mark_exited(&self) {
        self.exited.store(true, Ordering::Release);
    }
}

#[async_trait]
impl ServiceHandle for DaemonHandle {
    async fn control_channel(&self) -> Option<ControlChannel> {
        if self.has_exited() {
            return None;
        }

        match tokio::time::timeout(self.probe_timeout, TcpStream::connect(self.control_address)).await
        {
            Ok(Ok(_stream)) => Some(ControlChannel {
                address: self.control_address,
            }),
            Ok(Err(e)) => {
                trace!(address = %self.control_address, error = %e, "control port not accepting yet");
                None
            }
            Err(_) => None,
        }
    }

    fn bootstrap_progress(&self) -> Option<u8> {
        match self.progress.load(Ordering::Acquire) {
            NO_PROGRESS => None,
            progress => Some(progress),
        }
    }
}
