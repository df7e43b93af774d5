use std::io;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::proxy::http::OriginBody;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Result of streaming an origin body to the client and a cache file.
#[derive(Debug, Default)]
pub struct TeeOutcome {
    /// Bytes accepted by the client.
    pub client_bytes: u64,
    /// Bytes written to the cache file before it was finished or abandoned.
    pub cached_bytes: u64,
    /// Failure that stopped the copy (origin read or client write).
    pub error: Option<anyhow::Error>,
    /// Failure that made the copy abandon the cache file.
    pub cache_error: Option<io::Error>,
}

impl TeeOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// The cache file holds the whole body.
    pub fn fully_cached(&self) -> bool {
        self.error.is_none() && self.cache_error.is_none()
    }
}

/// Copies `body` to `client`, mirroring every chunk the client accepted into `cache`.
///
/// Each chunk goes to the client first and to the cache second, before the next read. A cache
/// write failure drops the cache file and the client stream carries on; a client write failure
/// or an origin read failure stops the copy.
pub async fn tee_copy<C, F>(body: &mut OriginBody, client: &mut C, cache: F) -> TeeOutcome
where
    C: AsyncWrite + Unpin + ?Sized,
    F: AsyncWrite + Unpin,
{
    let mut outcome = TeeOutcome::default();
    let mut cache = Some(cache);
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    loop {
        let read = match body.read(&mut buf).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) => {
                outcome.error = Some(err);
                break;
            }
        };
        let chunk = &buf[..read];
        if let Err(err) = client.write_all(chunk).await {
            outcome.error = Some(anyhow::Error::new(err).context("writing response body to client"));
            break;
        }
        outcome.client_bytes += read as u64;

        if let Some(file) = cache.as_mut() {
            match file.write_all(chunk).await {
                Ok(()) => outcome.cached_bytes += read as u64,
                Err(err) => {
                    outcome.cache_error = Some(err);
                    cache = None;
                }
            }
        }
    }

    if outcome.error.is_none()
        && let Err(err) = client.flush().await
    {
        outcome.error = Some(anyhow::Error::new(err).context("flushing response body to client"));
    }
    if let Some(mut file) = cache
        && outcome.cache_error.is_none()
    {
        if let Err(err) = file.flush().await {
            outcome.cache_error = Some(err);
        }
    }
    outcome
}

/// Streams an origin body to the client without caching it. Returns the bytes written.
pub async fn relay_body<C>(body: &mut OriginBody, client: &mut C) -> (u64, Option<anyhow::Error>)
where
    C: AsyncWrite + Unpin + ?Sized,
{
    let outcome = tee_copy(body, client, tokio::io::sink()).await;
    (outcome.client_bytes, outcome.error)
}

/// Copies a cached entry to the client, counting bytes written.
pub async fn copy_counted<R, C>(source: &mut R, client: &mut C) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    C: AsyncWrite + Unpin + ?Sized,
{
    let copied = tokio::io::copy(source, client)
        .await
        .context("copying cache entry to client")?;
    client.flush().await.context("flushing cache entry to client")?;
    Ok(copied)
}
