use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::Shared;
use super::state::Epoch;
use crate::config::PollConfig;
use crate::service::{ControlChannel, ServiceHandle};

/// Waits for the control channel of `handle` to become available
///
/// Checks once per interval until the channel shows up, then reports it to
/// the controller and exits. `token` is observed during both the check and
/// the sleep, so a stop or disconnect ends the loop without further checks.
pub(crate) async fn wait_for_control_channel(
    shared: Weak<Shared>,
    epoch: Epoch,
    handle: Arc<dyn ServiceHandle>,
    token: CancellationToken,
    poll: PollConfig,
) {
    debug!(epoch, "waiting for control channel");

    let mut attempts: u32 = 0;
    loop {
        attempts += 1;

        let channel = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(epoch, attempts, "readiness poll cancelled");
                return;
            }
            channel = probe(handle.as_ref(), &poll) => channel,
        };

        // The controller is gone, nobody is left to observe readiness
        let Some(shared) = shared.upgrade() else {
            return;
        };

        if let Some(channel) = channel {
            shared.mark_ready(epoch, channel);
            return;
        }

        if let Some(progress) = handle.bootstrap_progress() {
            shared.record_progress(epoch, progress);
        }
        drop(shared);

        trace!(epoch, attempts, "control channel not available yet");

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(epoch, attempts, "readiness poll cancelled");
                return;
            }
            _ = tokio::time::sleep(poll.interval()) => {}
        }
    }
}

async fn probe(handle: &dyn ServiceHandle, poll: &PollConfig) -> Option<ControlChannel> {
    match tokio::time::timeout(poll.probe_timeout(), handle.control_channel()).await {
        Ok(channel) => channel,
        Err(_) => {
            trace!("control channel probe timed out");
            None
        }
    }
}
