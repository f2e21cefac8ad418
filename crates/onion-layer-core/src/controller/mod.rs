//! Lifecycle controller for a bound background service.
//!
//! [`ServiceLifecycleController`] asks a [`ServiceManager`] to start and bind
//! a service, waits for the bound service to expose its control channel, and
//! publishes readiness through a lock-free flag. All mutable state lives in a
//! single mutex-guarded [`ControllerState`]; the readiness flag mirrors it and
//! is only written while that lock is held, so `ready` never outlives the
//! handle it was observed on.
//!
//! Every `start()` opens a new bind episode tagged with a fresh [`Epoch`].
//! Host callbacks and poller results carry the epoch they belong to and are
//! dropped when it no longer matches the current episode.

mod poller;
mod state;

pub use state::{ControllerStatus, Epoch};

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::config::{ControllerConfig, PollConfig};
use crate::error::LayerError;
use crate::service::{ControlChannel, ServiceConnection, ServiceDescriptor, ServiceHandle, ServiceManager};
use state::{BindState, ControllerState};

/// State shared between the controller, its episode connections and the poller
pub(crate) struct Shared {
    state: Mutex<ControllerState>,
    ready: AtomicBool,
    progress: AtomicU8,
    status: watch::Sender<ControllerStatus>,
    poll: PollConfig,
    runtime: Handle,
    span: Span,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Must be called with the state lock held, after every transition
    fn publish(&self, state: &ControllerState) {
        let running = matches!(state.bind, BindState::Ready { .. });
        self.ready.store(running, Ordering::Release);
        if !matches!(state.bind, BindState::Polling { .. } | BindState::Ready { .. }) {
            self.progress.store(0, Ordering::Release);
        }
        self.status.send_replace(state.status());
    }

    fn connected(self: &Arc<Self>, epoch: Epoch, handle: Arc<dyn ServiceHandle>) {
        let mut state = self.lock();
        let connection = match std::mem::take(&mut state.bind) {
            BindState::Binding {
                epoch: current,
                connection,
            } if current == epoch => connection,
            other => {
                state.bind = other;
                debug!(epoch, "ignoring connection for a superseded bind episode");
                return;
            }
        };

        let token = CancellationToken::new();
        state.bind = BindState::Polling {
            epoch,
            connection,
            handle: handle.clone(),
            poller: token.clone(),
        };
        self.publish(&state);
        drop(state);

        info!(epoch, "service connected");
        self.runtime.spawn(
            poller::wait_for_control_channel(
                Arc::downgrade(self),
                epoch,
                handle,
                token,
                self.poll.clone(),
            )
            .instrument(self.span.clone()),
        );
    }

    fn disconnected(&self, epoch: Epoch) {
        let mut state = self.lock();
        if state.bind.epoch() != Some(epoch) {
            debug!(epoch, "ignoring disconnect for a superseded bind episode");
            return;
        }

        std::mem::take(&mut state.bind).release();
        self.publish(&state);
        drop(state);

        warn!(epoch, "service disconnected");
    }

    pub(crate) fn mark_ready(&self, epoch: Epoch, channel: ControlChannel) {
        let mut state = self.lock();
        match std::mem::take(&mut state.bind) {
            BindState::Polling {
                epoch: current,
                connection,
                handle,
                poller,
            } if current == epoch && !poller.is_cancelled() => {
                state.bind = BindState::Ready {
                    epoch,
                    connection,
                    handle,
                };
                self.progress.store(100, Ordering::Release);
                self.publish(&state);
                drop(state);
                info!(epoch, address = %channel.address, "control channel ready");
            }
            other => {
                state.bind = other;
                debug!(epoch, "dropping readiness for a superseded bind episode");
            }
        }
    }

    pub(crate) fn record_progress(&self, epoch: Epoch, progress: u8) {
        let state = self.lock();
        if matches!(state.bind, BindState::Polling { epoch: current, .. } if current == epoch) {
            let progress = progress.min(99);
            if self.progress.swap(progress, Ordering::AcqRel) != progress {
                debug!(epoch, progress, "bootstrap progress");
            }
        }
    }
}

/// Connection handed to the host for a single bind episode
struct EpisodeConnection {
    epoch: Epoch,
    shared: Weak<Shared>,
}

impl ServiceConnection for EpisodeConnection {
    fn on_connected(&self, handle: Arc<dyn ServiceHandle>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.span.in_scope(|| shared.connected(self.epoch, handle));
        }
    }

    fn on_disconnected(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.span.in_scope(|| shared.disconnected(self.epoch));
        }
    }
}

/// Starts, supervises and stops one background service binding
///
/// `start()` and `stop()` only issue requests and return; `is_running()` is
/// a single atomic load. None of them report errors: failures are logged and
/// leave the controller stopped.
pub struct ServiceLifecycleController<M: ServiceManager + ?Sized> {
    host: Arc<M>,
    service: ServiceDescriptor,
    shared: Arc<Shared>,
}

impl<M: ServiceManager + ?Sized> ServiceLifecycleController<M> {
    /// Create a controller on the current tokio runtime with a default span
    pub fn new(config: ControllerConfig, host: Arc<M>) -> Result<Self, LayerError> {
        let runtime = Handle::try_current().map_err(|e| {
            LayerError::ConfigurationError(format!("no tokio runtime available: {e}"))
        })?;
        let span = info_span!("service_controller", service = %config.service.name);
        Self::with_runtime(config, host, runtime, span)
    }

    /// Create a controller that spawns its poller on `runtime` and logs inside `span`
    pub fn with_runtime(
        config: ControllerConfig,
        host: Arc<M>,
        runtime: Handle,
        span: Span,
    ) -> Result<Self, LayerError> {
        config
            .poll
            .validate()
            .map_err(|e| LayerError::ConfigurationError(format!("Invalid poll config: {e}")))?;

        let state = ControllerState::new();
        let (status, _) = watch::channel(state.status());

        Ok(Self {
            host,
            service: config.service,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                ready: AtomicBool::new(false),
                progress: AtomicU8::new(0),
                status,
                poll: config.poll,
                runtime,
                span,
            }),
        })
    }

    /// Issue a bind request; a no-op while a binding is already active
    pub fn start(&self) {
        let _entered = self.shared.span.enter();

        let (epoch, connection) = {
            let mut state = self.shared.lock();
            if let Some(current) = state.bind.epoch() {
                debug!(epoch = current, "start ignored, binding already active");
                return;
            }

            let epoch = state.next_epoch();
            let connection: Arc<dyn ServiceConnection> = Arc::new(EpisodeConnection {
                epoch,
                shared: Arc::downgrade(&self.shared),
            });
            state.bind = BindState::Binding {
                epoch,
                connection: connection.clone(),
            };
            state.begin_bind(epoch);
            self.shared.publish(&state);
            (epoch, connection)
        };

        info!(epoch, "starting service");

        // The host may call back synchronously, the lock must not be held here
        let result = self.host.bind(&self.service, connection.clone());

        let unbind = {
            let mut state = self.shared.lock();
            let stopped = state.finish_bind(epoch);
            match result {
                Ok(()) => stopped,
                Err(e) => {
                    error!(epoch, error = %e, "failed to issue bind request");
                    if state.bind.epoch() != Some(epoch) {
                        false
                    } else {
                        let connected = !matches!(state.bind, BindState::Binding { .. });
                        std::mem::take(&mut state.bind).release();
                        self.shared.publish(&state);
                        connected
                    }
                }
            }
        };

        // Stopped during the call, or connected before the host gave up
        if unbind {
            debug!(epoch, "releasing binding after bind returned");
            if let Err(e) = self.host.unbind(&connection) {
                warn!(epoch, error = %e, "failed to unbind service");
            }
        }
    }

    /// Release the binding, if any, and reset to the stopped state
    ///
    /// When a `bind` call for the episode is still executing, the unbind is
    /// issued by that call's `start()` once the host returns.
    pub fn stop(&self) {
        let _entered = self.shared.span.enter();

        let (released, deferred) = {
            let mut state = self.shared.lock();
            let released = std::mem::take(&mut state.bind).release();
            let deferred = released
                .as_ref()
                .is_some_and(|(epoch, _)| state.defer_unbind(*epoch));
            self.shared.publish(&state);
            (released, deferred)
        };

        let Some((epoch, connection)) = released else {
            debug!("stop ignored, service not started");
            return;
        };

        if deferred {
            // The host may not have registered the connection yet
            debug!(epoch, "bind still in flight, unbinding once it returns");
        } else if let Err(e) = self.host.unbind(&connection) {
            error!(epoch, error = %e, "failed to unbind service");
        }
        info!(epoch, "service stopped");
    }

    /// Whether the service's control channel has been observed for the current episode
    pub fn is_running(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Bootstrap percentage: 100 when running, last reported value while polling, 0 otherwise
    pub fn progress(&self) -> u8 {
        self.shared.progress.load(Ordering::Acquire)
    }

    pub fn status(&self) -> ControllerStatus {
        *self.shared.status.borrow()
    }

    /// Receive every status transition
    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.shared.status.subscribe()
    }

    /// Handle of the bound service while running
    pub fn service_handle(&self) -> Option<Arc<dyn ServiceHandle>> {
        match &self.shared.lock().bind {
            BindState::Ready { handle, .. } => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    /// Wait until the controller is running
    ///
    /// Fails with [`LayerError::Stopped`] when an episode that was current
    /// during the wait ends, and with [`LayerError::Timeout`] after `timeout`.
    pub async fn wait_until_running(&self, timeout: Duration) -> Result<(), LayerError> {
        let mut status = self.subscribe();

        let wait = async {
            let initial = *status.borrow_and_update();
            // Episodes up to and including this one ended before the wait started
            let ended_before = match initial {
                ControllerStatus::Stopped { epoch } => epoch,
                other => other.epoch().saturating_sub(1),
            };

            let mut current = initial;
            loop {
                if current.is_running() {
                    return Ok(());
                }
                if current.is_stopped() && current.epoch() > ended_before {
                    return Err(LayerError::Stopped);
                }
                if status.changed().await.is_err() {
                    return Err(LayerError::Stopped);
                }
                current = *status.borrow_and_update();
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            LayerError::Timeout(format!("{} not running after {timeout:?}", self.service.name))
        })?
    }
}

impl<M: ServiceManager + ?Sized> Drop for ServiceLifecycleController<M> {
    fn drop(&mut self) {
        self.stop();
    }
}
