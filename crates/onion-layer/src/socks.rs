use anyhow::{Result, ensure};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// SOCKS5 greeting offering only "no authentication"
const GREETING: [u8; 3] = [0x05, 0x01, 0x00];

/// Check that a SOCKS5 proxy answers at `address`
///
/// Performs the method negotiation only; no connection is requested through
/// the proxy. Any failure, including `timeout` expiring, yields `false`.
pub async fn socks_proxy_alive(address: SocketAddr, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, negotiate(address)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(%address, error = %e, "SOCKS proxy not usable");
            false
        }
        Err(_) => {
            debug!(%address, ?timeout, "SOCKS proxy did not answer in time");
            false
        }
    }
}

async fn negotiate(address: SocketAddr) -> Result<()> {
    let mut stream = TcpStream::connect(address).await?;
    stream.write_all(&GREETING).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    ensure!(
        reply == [0x05, 0x00],
        "unexpected SOCKS greeting reply {reply:02x?}"
    );
    Ok(())
}
