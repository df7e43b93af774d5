use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

/// Loopback address with a port nothing is bound to at return time.
pub fn unused_local_addr() -> Result<SocketAddr> {
    let probe = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(probe.local_addr()?)
}

/// `Host` value for an origin that refuses connections.
pub fn dead_origin_host() -> Result<String> {
    Ok(unused_local_addr()?.to_string())
}

/// Polls until the cache accepts connections on `addr`.
pub async fn wait_until_accepting(addr: SocketAddr) -> Result<()> {
    timeout(StdDuration::from_secs(3), async {
        while TcpStream::connect(addr).await.is_err() {
            sleep(StdDuration::from_millis(20)).await;
        }
    })
    .await
    .with_context(|| format!("cache on {addr} never accepted connections"))
}
