#![allow(dead_code)]

pub mod net;
pub mod origin;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use depotcache::{build_app, cli::LogFormat, proxy, settings::Settings};

pub use net::{dead_origin_host, unused_local_addr, wait_until_accepting};
pub use origin::MockOrigin;

pub fn default_test_settings(listen: SocketAddr, cache_dir: &Path) -> Settings {
    Settings {
        listen,
        cache_dir: Some(cache_dir.to_path_buf()),
        log: LogFormat::Text,
        request_header_timeout: 5,
        client_keepalive_idle_timeout: 5,
        max_request_header_size: 32 * 1024,
        max_response_header_size: 4096,
        origin_port: 80,
        coalesce_fetches: false,
    }
}

pub struct CacheHarness {
    _temp: TempDir,
    pub cache_dir: PathBuf,
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl CacheHarness {
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with<F>(override_fn: F) -> Result<Self>
    where
        F: FnOnce(&mut Settings),
    {
        let temp = TempDir::new()?;
        let cache_dir = temp.path().join("cache");
        std::fs::create_dir_all(&cache_dir)?;

        let mut settings = default_test_settings(unused_local_addr()?, &cache_dir);
        override_fn(&mut settings);
        let addr = settings.listen;

        let app = build_app(settings)?;
        let handle = tokio::spawn(async move {
            if let Err(err) = proxy::run(app).await {
                tracing::error!(error = ?err, "cache run failed");
            }
        });
        wait_until_accepting(addr).await?;

        Ok(Self {
            _temp: temp,
            cache_dir,
            addr,
            handle,
        })
    }

    pub async fn connect(&self) -> Result<TcpStream> {
        Ok(TcpStream::connect(self.addr).await?)
    }

    /// Sends one `Connection: close` GET and returns the whole response.
    pub async fn get(&self, host: Option<&str>, path: &str) -> Result<HttpResponse> {
        let mut request = format!("GET {path} HTTP/1.1\r\n");
        if let Some(host) = host {
            request.push_str(&format!("Host: {host}\r\n"));
        }
        request.push_str("Connection: close\r\n\r\n");

        let mut stream = self.connect().await?;
        stream.write_all(request.as_bytes()).await?;
        let mut raw = Vec::new();
        timeout(StdDuration::from_secs(5), stream.read_to_end(&mut raw))
            .await
            .context("timed out reading response")??;
        HttpResponse::parse(&raw)
    }

    pub fn cache_file(&self, relative: &str) -> PathBuf {
        self.cache_dir.join(relative)
    }

    pub fn cache_is_empty(&self) -> Result<bool> {
        Ok(std::fs::read_dir(&self.cache_dir)?.next().is_none())
    }
}

impl Drop for CacheHarness {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub head: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let split = raw
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .ok_or_else(|| anyhow!("response missing header terminator"))?;
        let head = String::from_utf8(raw[..split].to_vec()).context("invalid UTF-8 head")?;
        let status = head
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow!("missing status code in response line"))?
            .parse::<u16>()
            .map_err(|err| anyhow!("invalid status code: {err}"))?;
        Ok(Self {
            status,
            head,
            body: raw[split + 4..].to_vec(),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }
}

/// Reads one Content-Length delimited response from a kept-alive connection.
pub async fn read_framed_response(reader: &mut BufReader<TcpStream>) -> Result<HttpResponse> {
    let mut raw = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        let read = timeout(StdDuration::from_secs(5), reader.read_line(&mut line)).await??;
        if read == 0 {
            return Err(anyhow!("connection closed before response head completed"));
        }
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse()?;
        }
        raw.extend_from_slice(line.as_bytes());
        if line == "\r\n" {
            break;
        }
    }
    let mut body = vec![0u8; content_length];
    timeout(StdDuration::from_secs(5), reader.read_exact(&mut body)).await??;
    raw.extend_from_slice(&body);
    HttpResponse::parse(&raw)
}
