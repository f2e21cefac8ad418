//! Daemon output handling.

use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

use crate::handle::DaemonHandle;

const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Extract the percentage from a `Bootstrapped NN%` log line
pub fn parse_bootstrap_progress(line: &str) -> Option<u8> {
    let (_, rest) = line.split_once("Bootstrapped ")?;
    let (digits, _) = rest.split_once('%')?;
    let progress: u8 = digits.trim().parse().ok()?;
    (progress <= 100).then_some(progress)
}

/// Forward daemon output to tracing, recording bootstrap progress on `handle`
pub(crate) async fn follow_output<R: AsyncRead + Unpin>(reader: R, handle: Arc<DaemonHandle>) {
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                if let Some(progress) = parse_bootstrap_progress(&line) {
                    handle.set_progress(progress);
                }

                if line.contains("[warn]") || line.contains("[err]") {
                    warn!("daemon: {}", line);
                } else {
                    debug!("daemon: {}", line);
                }
            }
            Err(e) => {
                debug!(error = %e, "stopped reading daemon output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bootstrap_progress() {
        let line = "Nov 01 12:00:00.000 [notice] Bootstrapped 45% (loading_descriptors): Loading relay descriptors";
        assert_eq!(parse_bootstrap_progress(line), Some(45));

        let done = "[notice] Bootstrapped 100% (done): Done";
        assert_eq!(parse_bootstrap_progress(done), Some(100));
    }

    #[test]
    fn test_parse_ignores_other_lines() {
        assert_eq!(parse_bootstrap_progress("[notice] Opening Socks listener"), None);
        assert_eq!(parse_bootstrap_progress("Bootstrapped lots%"), None);
        assert_eq!(parse_bootstrap_progress("Bootstrapped 250%"), None);
        assert_eq!(parse_bootstrap_progress("Bootstrapped 12 percent"), None);
    }

    #[tokio::test]
    async fn test_follow_output_records_progress() {
        let handle = Arc::new(DaemonHandle::new(
            None,
            "127.0.0.1:9".parse().unwrap(),
            std::time::Duration::from_millis(10),
        ));
        let output: &[u8] = b"[notice] Bootstrapped 5% (conn): Connecting\n[notice] Bootstrapped 80% (circuit): Establishing\n[warn] clock skew\n";

        follow_output(output, handle.clone()).await;

        assert_eq!(onion_layer_core::ServiceHandle::bootstrap_progress(&*handle), Some(80));
    }
}
