use anyhow::{Context, Result};
use http::StatusCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::codec::{ResponseFraming, encode_response_head};

/// Writes a complete response with a `Content-Length` body. HEAD responses keep the length but
/// omit the body. Returns the bytes written.
pub async fn send_response<S>(
    stream: &mut S,
    status: StatusCode,
    body: &[u8],
    close: bool,
    head_only: bool,
) -> Result<u64>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let head = encode_response_head(status, ResponseFraming::Length(body.len() as u64), close);
    write_head(stream, &head).await?;
    let mut written = head.len() as u64;
    if !head_only && !body.is_empty() {
        stream
            .write_all(body)
            .await
            .context("writing response body")?;
        written += body.len() as u64;
    }
    stream.flush().await.context("flushing response")?;
    Ok(written)
}

pub async fn write_head<S>(stream: &mut S, head: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream
        .write_all(head)
        .await
        .context("writing response header")
}

pub async fn shutdown_stream<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream
        .shutdown()
        .await
        .context("shutting down client stream")
}
