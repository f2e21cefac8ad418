use crate::config::DaemonConfig;

/// Render the torrc the daemon is started with
///
/// Logging goes to stdout so the manager can follow bootstrap progress.
pub fn generate_torrc(config: &DaemonConfig) -> String {
    format!(
        r#"# onion-layer daemon configuration
# Auto-generated on every start - do not edit manually

DataDirectory {data_dir}
SocksPort {socks_port}
ControlPort {control_port}
CookieAuthentication 1

# Logging
Log notice stdout

# Safety settings
SafeLogging 1
"#,
        data_dir = config.data_dir.display(),
        socks_port = config.socks_port,
        control_port = config.control_port,
    )
}
