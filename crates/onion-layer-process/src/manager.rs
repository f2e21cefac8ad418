use anyhow::{Context, Result};
use onion_layer_core::{
    LayerError, ServiceConnection, ServiceDescriptor, ServiceManager, same_connection,
};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid as NixPid;

use crate::bootstrap::follow_output;
use crate::config::DaemonConfig;
use crate::handle::DaemonHandle;
use crate::torrc::generate_torrc;

/// A live binding: the connection it was created for and the supervisor's token
struct Binding {
    connection: Arc<dyn ServiceConnection>,
    token: CancellationToken,
    pid: Option<u32>,
    /// Set once SIGTERM went out, so the supervisor only waits and sweeps
    terminating: Arc<AtomicBool>,
}

type Bindings = Arc<Mutex<Vec<Binding>>>;

fn lock(bindings: &Bindings) -> MutexGuard<'_, Vec<Binding>> {
    bindings.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the binding for `connection`, returning it if it was still live
fn take_binding(bindings: &Bindings, connection: &Arc<dyn ServiceConnection>) -> Option<Binding> {
    let mut bindings = lock(bindings);
    let index = bindings
        .iter()
        .position(|binding| same_connection(&binding.connection, connection))?;
    Some(bindings.swap_remove(index))
}

/// Host service manager running the routing daemon as a child process
///
/// `bind` writes the torrc and launches the daemon from a supervisor task,
/// so it returns before the daemon exists. The supervisor delivers
/// `on_connected` once the process is spawned and `on_disconnected` if the
/// process exits while still bound.
pub struct ProcessServiceManager {
    config: DaemonConfig,
    runtime: Handle,
    bindings: Bindings,
}

impl ProcessServiceManager {
    /// Create a manager on the current tokio runtime
    pub fn new(config: DaemonConfig) -> Result<Self, LayerError> {
        let runtime = Handle::try_current().map_err(|e| {
            LayerError::ConfigurationError(format!("no tokio runtime available: {e}"))
        })?;
        Self::with_runtime(config, runtime)
    }

    pub fn with_runtime(config: DaemonConfig, runtime: Handle) -> Result<Self, LayerError> {
        config.validate()?;
        Ok(Self {
            config,
            runtime,
            bindings: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Number of bindings whose daemon has not been released yet
    pub fn active_bindings(&self) -> usize {
        lock(&self.bindings).len()
    }
}

impl ServiceManager for ProcessServiceManager {
    fn bind(
        &self,
        service: &ServiceDescriptor,
        connection: Arc<dyn ServiceConnection>,
    ) -> Result<(), LayerError> {
        let binary = self.config.resolve_binary().ok_or_else(|| {
            LayerError::BindFailed(format!(
                "{} binary not found, install it or set binary in the daemon config",
                service.name
            ))
        })?;

        let token = CancellationToken::new();
        let terminating = Arc::new(AtomicBool::new(false));
        {
            let mut bindings = lock(&self.bindings);
            if bindings
                .iter()
                .any(|binding| same_connection(&binding.connection, &connection))
            {
                return Err(LayerError::BindFailed(
                    "connection is already bound".to_string(),
                ));
            }
            bindings.push(Binding {
                connection: connection.clone(),
                token: token.clone(),
                pid: None,
                terminating: terminating.clone(),
            });
        }

        let span = info_span!("daemon", service = %service.name);
        self.runtime.spawn(
            supervise(
                self.config.clone(),
                binary,
                connection,
                token,
                terminating,
                self.bindings.clone(),
            )
            .instrument(span),
        );
        Ok(())
    }

    fn unbind(&self, connection: &Arc<dyn ServiceConnection>) -> Result<(), LayerError> {
        let binding = take_binding(&self.bindings, connection).ok_or(LayerError::NotBound)?;
        debug!(pid = ?binding.pid, "releasing daemon binding");
        binding.token.cancel();
        Ok(())
    }
}

impl Drop for ProcessServiceManager {
    fn drop(&mut self) {
        let bindings = std::mem::take(&mut *lock(&self.bindings));
        if bindings.is_empty() {
            return;
        }

        warn!(
            count = bindings.len(),
            "emergency cleanup: releasing daemon bindings during drop"
        );
        for binding in bindings {
            // Signal right away, the runtime may not poll the supervisor again
            #[cfg(unix)]
            {
                if let Some(pid) = binding.pid {
                    match signal_group(pid, Signal::SIGTERM) {
                        Ok(()) => binding.terminating.store(true, Ordering::Release),
                        Err(e) => {
                            warn!(pid, error = %e, "failed to send SIGTERM to daemon during drop")
                        }
                    }
                }
            }
            binding.token.cancel();
        }
    }
}

async fn supervise(
    config: DaemonConfig,
    binary: PathBuf,
    connection: Arc<dyn ServiceConnection>,
    token: CancellationToken,
    terminating: Arc<AtomicBool>,
    bindings: Bindings,
) {
    let spawned = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!("binding released before the daemon was started");
            return;
        }
        spawned = spawn_daemon(&config, &binary) => spawned,
    };

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            // The binding never connects; the controller only sees that it never runs
            error!(error = %format!("{e:#}"), "failed to start daemon");
            take_binding(&bindings, &connection);
            return;
        }
    };

    let pid = child.id();
    if let Some(binding) = lock(&bindings)
        .iter_mut()
        .find(|binding| same_connection(&binding.connection, &connection))
    {
        binding.pid = pid;
    }
    info!(pid = ?pid, binary = %binary.display(), "daemon started");

    let handle = Arc::new(DaemonHandle::new(
        pid,
        config.control_address(),
        config.probe_timeout,
    ));
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(follow_output(stdout, handle.clone()).in_current_span());
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(follow_output(stderr, handle.clone()).in_current_span());
    }

    if !token.is_cancelled() {
        connection.on_connected(handle.clone());
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            terminate(&mut child, config.shutdown_grace, &terminating).await;
            handle.mark_exited();
        }
        status = child.wait() => {
            handle.mark_exited();
            log_exit(status);
            if take_binding(&bindings, &connection).is_some() {
                warn!("daemon exited while bound");
                connection.on_disconnected();
            }
        }
    }
}

async fn spawn_daemon(config: &DaemonConfig, binary: &Path) -> Result<Child> {
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Failed to create data dir {}", config.data_dir.display()))?;

    // The daemon refuses a data directory readable by others
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&config.data_dir, std::fs::Permissions::from_mode(0o700))
            .await
            .context("Failed to restrict data dir permissions")?;
    }

    let torrc = config.torrc_path();
    tokio::fs::write(&torrc, generate_torrc(config))
        .await
        .with_context(|| format!("Failed to write {}", torrc.display()))?;
    debug!(torrc = %torrc.display(), "daemon config written");

    let mut cmd = Command::new(binary);
    cmd.arg("-f")
        .arg(&torrc)
        .args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group so termination reaches everything the daemon forks
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    cmd.spawn()
        .with_context(|| format!("Failed to spawn daemon: {}", binary.display()))
}

async fn terminate(child: &mut Child, grace: Duration, terminating: &AtomicBool) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let signalled = if terminating.swap(true, Ordering::AcqRel) {
                true
            } else {
                match signal_group(pid, Signal::SIGTERM) {
                    Ok(()) => {
                        debug!(pid, "sent SIGTERM to daemon process group");
                        true
                    }
                    Err(nix::errno::Errno::ESRCH) => {
                        debug!(pid, "daemon process group already gone");
                        false
                    }
                    Err(e) => {
                        warn!(pid, error = %e, "failed to send SIGTERM to daemon");
                        false
                    }
                }
            };

            let mut reaped = false;
            if signalled {
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(status) => {
                        log_exit(status);
                        reaped = true;
                    }
                    Err(_) => warn!(pid, ?grace, "daemon ignored SIGTERM, killing"),
                }
            }

            // Members of the group can outlive the leader
            match signal_group(pid, Signal::SIGKILL) {
                Ok(()) => debug!(pid, "sent SIGKILL to daemon process group"),
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => warn!(pid, error = %e, "failed to send SIGKILL to daemon process group"),
            }

            if reaped {
                info!("daemon stopped");
                return;
            }
        }
    }

    #[cfg(not(unix))]
    let _ = (grace, terminating);

    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill daemon");
    }
    info!("daemon stopped");
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) -> nix::Result<()> {
    signal::killpg(NixPid::from_raw(pid as i32), signal)
}

fn log_exit(status: std::io::Result<ExitStatus>) {
    match status {
        Ok(status) if status.success() => info!("daemon exited"),
        Ok(status) => warn!(%status, "daemon exited"),
        Err(e) => error!(error = %e, "failed to wait for daemon"),
    }
}
