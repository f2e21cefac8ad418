use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::service::{ServiceConnection, ServiceHandle};

/// Identifier of one start-to-stop cycle of the binding
pub type Epoch = u64;

/// Externally observable controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    /// No binding; `epoch` is the last episode that ran, 0 if none did
    Stopped { epoch: Epoch },
    /// Bind request issued, host has not connected yet
    Binding { epoch: Epoch },
    /// Bound, waiting for the control channel
    Polling { epoch: Epoch },
    /// Control channel observed
    Running { epoch: Epoch },
}

impl ControllerStatus {
    pub const fn epoch(self) -> Epoch {
        match self {
            ControllerStatus::Stopped { epoch }
            | ControllerStatus::Binding { epoch }
            | ControllerStatus::Polling { epoch }
            | ControllerStatus::Running { epoch } => epoch,
        }
    }

    pub const fn is_running(self) -> bool {
        matches!(self, ControllerStatus::Running { .. })
    }

    pub const fn is_stopped(self) -> bool {
        matches!(self, ControllerStatus::Stopped { .. })
    }

    pub const fn label(self) -> &'static str {
        match self {
            ControllerStatus::Stopped { .. } => "stopped",
            ControllerStatus::Binding { .. } => "binding",
            ControllerStatus::Polling { .. } => "polling",
            ControllerStatus::Running { .. } => "running",
        }
    }
}

/// Binding state; the connection is kept from bind to unbind so the host
/// can match it by identity.
#[derive(Default)]
pub(crate) enum BindState {
    #[default]
    Idle,
    Binding {
        epoch: Epoch,
        connection: Arc<dyn ServiceConnection>,
    },
    Polling {
        epoch: Epoch,
        connection: Arc<dyn ServiceConnection>,
        handle: Arc<dyn ServiceHandle>,
        poller: CancellationToken,
    },
    Ready {
        epoch: Epoch,
        connection: Arc<dyn ServiceConnection>,
        handle: Arc<dyn ServiceHandle>,
    },
}

impl BindState {
    pub(crate) fn epoch(&self) -> Option<Epoch> {
        match self {
            BindState::Idle => None,
            BindState::Binding { epoch, .. }
            | BindState::Polling { epoch, .. }
            | BindState::Ready { epoch, .. } => Some(*epoch),
        }
    }

    /// Cancels the poller, if any, and hands back what unbind needs
    pub(crate) fn release(self) -> Option<(Epoch, Arc<dyn ServiceConnection>)> {
        match self {
            BindState::Idle => None,
            BindState::Binding { epoch, connection } | BindState::Ready { epoch, connection, .. } => {
                Some((epoch, connection))
            }
            BindState::Polling {
                epoch,
                connection,
                poller,
                ..
            } => {
                poller.cancel();
                Some((epoch, connection))
            }
        }
    }
}

/// A `bind` call the host has not returned from yet
struct InFlightBind {
    epoch: Epoch,
    /// Set when the episode was stopped during the call; the caller unbinds on return
    released: bool,
}

pub(crate) struct ControllerState {
    pub(crate) last_epoch: Epoch,
    pub(crate) bind: BindState,
    in_flight: Vec<InFlightBind>,
}

impl ControllerState {
    pub(crate) fn new() -> Self {
        Self {
            last_epoch: 0,
            bind: BindState::Idle,
            in_flight: Vec::new(),
        }
    }

    pub(crate) fn begin_bind(&mut self, epoch: Epoch) {
        self.in_flight.push(InFlightBind {
            epoch,
            released: false,
        });
    }

    /// Hands the unbind for `epoch` to the pending `bind` caller, if there is one
    pub(crate) fn defer_unbind(&mut self, epoch: Epoch) -> bool {
        match self.in_flight.iter_mut().find(|call| call.epoch == epoch) {
            Some(call) => {
                call.released = true;
                true
            }
            None => false,
        }
    }

    /// Ends the `bind` call for `epoch`; true if the episode was stopped meanwhile
    pub(crate) fn finish_bind(&mut self, epoch: Epoch) -> bool {
        match self.in_flight.iter().position(|call| call.epoch == epoch) {
            Some(index) => self.in_flight.swap_remove(index).released,
            None => false,
        }
    }

    pub(crate) fn next_epoch(&mut self) -> Epoch {
        self.last_epoch += 1;
        self.last_epoch
    }

    pub(crate) fn status(&self) -> ControllerStatus {
        match &self.bind {
            BindState::Idle => ControllerStatus::Stopped {
                epoch: self.last_epoch,
            },
            BindState::Binding { epoch, .. } => ControllerStatus::Binding { epoch: *epoch },
            BindState::Polling { epoch, .. } => ControllerStatus::Polling { epoch: *epoch },
            BindState::Ready { epoch, .. } => ControllerStatus::Running { epoch: *epoch },
        }
    }
}
