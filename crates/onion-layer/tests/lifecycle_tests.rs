#![cfg(unix)]

use onion_layer::{ControllerStatus, DaemonConfig, LayerError, OnionLayer, PollConfig};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_target(false)
        .with_line_number(true)
        .try_init();
}

/// Writes an executable shell script standing in for the routing daemon
fn fake_daemon(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("fake-tor");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn layer(dir: &tempfile::TempDir, binary: PathBuf, control_port: u16) -> OnionLayer {
    init_tracing();
    let daemon = DaemonConfig::builder()
        .binary(binary)
        .data_dir(dir.path().join("data"))
        .socks_port(29050u16)
        .control_port(control_port)
        .shutdown_grace(Duration::from_secs(2))
        .probe_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    OnionLayer::with_poll(daemon, PollConfig::fast()).unwrap()
}

async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_start_runs_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let control = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let binary = fake_daemon(
        &dir,
        "echo '[notice] Bootstrapped 10% (conn): Connecting'\nexec sleep 30",
    );
    let layer = layer(&dir, binary, control.local_addr().unwrap().port());

    assert!(!layer.is_running());
    layer.start();
    layer.start();

    layer
        .wait_until_running(Duration::from_secs(5))
        .await
        .unwrap();
    assert!(layer.is_running());
    assert_eq!(layer.progress(), 100);
    assert_eq!(layer.status(), ControllerStatus::Running { epoch: 1 });
    assert!(layer.controller().service_handle().is_some());

    layer.stop();
    assert!(!layer.is_running());
    assert_eq!(layer.status(), ControllerStatus::Stopped { epoch: 1 });
    assert!(layer.controller().service_handle().is_none());
}

#[tokio::test]
async fn test_daemon_crash_stops_running() {
    let dir = tempfile::tempdir().unwrap();
    let control = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let binary = fake_daemon(&dir, "sleep 1\nexit 3");
    let layer = layer(&dir, binary, control.local_addr().unwrap().port());
    let mut status = layer.subscribe();

    layer.start();
    layer
        .wait_until_running(Duration::from_secs(5))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.is_stopped()))
        .await
        .expect("daemon exit was not observed")
        .unwrap();
    assert!(!layer.is_running());
    assert_eq!(layer.progress(), 0);

    // The host already dropped the binding; stopping again is harmless
    layer.stop();
    assert_eq!(layer.status(), ControllerStatus::Stopped { epoch: 1 });
}

#[tokio::test]
async fn test_closed_control_port_never_runs() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_daemon(&dir, "exec sleep 30");
    let layer = layer(&dir, binary, unused_port().await);

    layer.start();
    let result = layer.wait_until_running(Duration::from_millis(800)).await;
    assert!(matches!(result, Err(LayerError::Timeout(_))));
    assert!(!layer.is_running());
    assert!(matches!(layer.status(), ControllerStatus::Polling { epoch: 1 }));

    layer.stop();
    assert_eq!(layer.status(), ControllerStatus::Stopped { epoch: 1 });
}

#[tokio::test]
async fn test_missing_binary_start_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let layer = layer(&dir, dir.path().join("no-such-daemon"), 29051);

    layer.start();
    assert!(!layer.is_running());
    assert_eq!(layer.status(), ControllerStatus::Stopped { epoch: 1 });

    layer.stop();
    assert!(!layer.is_running());
}

#[tokio::test]
async fn test_restart_opens_new_episode() {
    let dir = tempfile::tempdir().unwrap();
    let control = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let binary = fake_daemon(&dir, "exec sleep 30");
    let layer = layer(&dir, binary, control.local_addr().unwrap().port());

    layer.start();
    layer.stop();
    layer.start();

    layer
        .wait_until_running(Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(layer.status(), ControllerStatus::Running { epoch: 2 });
    layer.stop();
}
