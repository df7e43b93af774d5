use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail, ensure};
use http::{Method, Version};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tracing::debug;

use super::headers::RequestHeaders;
use super::line::read_line;

pub(crate) struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: RequestHeaders,
}

impl RequestHead {
    /// Whether the client expects the connection to stay open after the response.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::HTTP_10 => self.headers.has_connection_token("keep-alive"),
            _ => !self.headers.has_connection_token("close"),
        }
    }

    /// Whether a request body follows the head.
    pub fn has_body(&self) -> Result<bool> {
        if self.headers.is_chunked() {
            return Ok(true);
        }
        Ok(self.headers.content_length()?.unwrap_or(0) > 0)
    }
}

/// Reads a request head. Returns `Ok(None)` when the client closes the connection or stays
/// idle past `idle_timeout` before sending anything.
pub(crate) async fn read_request_head<S>(
    reader: &mut BufReader<S>,
    peer: SocketAddr,
    idle_timeout: Duration,
    header_timeout: Duration,
    max_header_bytes: usize,
) -> Result<Option<RequestHead>>
where
    S: AsyncRead + Unpin,
{
    ensure!(
        max_header_bytes > 0,
        "request header limit must be greater than zero"
    );
    let available = match tokio::time::timeout(idle_timeout, reader.fill_buf()).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(err)) => {
            return Err(err).with_context(|| format!("waiting for request data from {peer}"));
        }
        Err(_) => return Ok(None),
    };
    if available.is_empty() {
        return Ok(None);
    }

    let deadline = Instant::now() + header_timeout;
    let mut request_line = String::new();
    let request_line_bytes = read_line(
        reader,
        &mut request_line,
        Some(deadline),
        peer,
        max_header_bytes,
    )
    .await?;
    if request_line_bytes == 0 {
        debug!(peer = %peer, "connection closed before request line");
        return Ok(None);
    }

    let trimmed = request_line.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        bail!("empty request line from {peer}");
    }
    let mut parts = trimmed.split_whitespace();
    let method_str = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing method"))?;
    let target = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing target"))?;
    let version = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing version"))?;
    if parts.next().is_some() {
        bail!("malformed request line: unexpected data");
    }
    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => bail!("invalid HTTP version '{other}'"),
    };
    let method = Method::from_bytes(method_str.as_bytes())
        .with_context(|| format!("invalid method '{method_str}'"))?;
    let target = target.to_string();

    let remaining = max_header_bytes.saturating_sub(request_line_bytes);
    ensure!(remaining > 0, "request headers exceed configured limit");
    let mut headers = RequestHeaders::new(remaining);
    let mut header_line = String::new();
    loop {
        let read = read_line(reader, &mut header_line, Some(deadline), peer, remaining).await?;
        if read == 0 {
            bail!("connection closed while reading request headers from {peer}");
        }
        if !headers
            .push_line(&header_line)
            .with_context(|| format!("invalid header from {peer}"))?
        {
            break;
        }
    }

    Ok(Some(RequestHead {
        method,
        target,
        version,
        headers,
    }))
}
