use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Minimal CDN origin that replays a canned response and counts requests.
pub struct MockOrigin {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    request_lines: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockOrigin {
    pub async fn ok(body: &[u8]) -> Result<Self> {
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(body);
        Self::spawn(response, None).await
    }

    pub async fn ok_delayed(body: &[u8], delay: StdDuration) -> Result<Self> {
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(body);
        Self::spawn(response, Some(delay)).await
    }

    pub async fn raw(response: impl Into<Vec<u8>>) -> Result<Self> {
        Self::spawn(response.into(), None).await
    }

    /// `Host` value that routes requests to this origin.
    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn request_lines(&self) -> Vec<String> {
        self.request_lines.lock().clone()
    }

    async fn spawn(response: Vec<u8>, delay: Option<StdDuration>) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(AtomicUsize::new(0));
        let request_lines = Arc::new(Mutex::new(Vec::new()));
        let response = Arc::new(response);

        let handle = {
            let requests = requests.clone();
            let request_lines = request_lines.clone();
            tokio::spawn(async move {
                loop {
                    let (socket, _) = match listener.accept().await {
                        Ok(conn) => conn,
                        Err(_) => break,
                    };
                    let requests = requests.clone();
                    let request_lines = request_lines.clone();
                    let response = response.clone();
                    tokio::spawn(async move {
                        let _ =
                            serve_one(socket, &requests, &request_lines, &response, delay).await;
                    });
                }
            })
        };

        Ok(Self {
            addr,
            requests,
            request_lines,
            handle,
        })
    }
}

impl Drop for MockOrigin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_one(
    mut socket: TcpStream,
    requests: &AtomicUsize,
    request_lines: &Mutex<Vec<String>>,
    response: &[u8],
    delay: Option<StdDuration>,
) -> Result<()> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    if data.is_empty() {
        return Ok(());
    }

    requests.fetch_add(1, Ordering::SeqCst);
    let text = String::from_utf8_lossy(&data);
    if let Some(line) = text.lines().next() {
        request_lines.lock().push(line.to_string());
    }

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    socket.write_all(response).await?;
    socket.shutdown().await.ok();
    Ok(())
}
