use std::net::SocketAddr;
use std::path::Path;
use std::time::Instant;

use http::{Method, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWrite};
use tracing::{debug, info, warn};

use crate::logging::AccessLogBuilder;
use crate::proxy::AppContext;
use crate::proxy::cache::{
    CacheKey, CachedFile, Lookup, StoreOutcome, copy_counted, relay_body, tee_copy,
};
use crate::proxy::error::ProxyError;
use crate::proxy::origin::OriginResponse;
use crate::proxy::request::{CdnRequest, parse_request};
use crate::proxy::validate::{Verdict, validate};

use super::codec::{RequestHead, ResponseFraming, encode_response_head};
use super::respond::{send_response, write_head};

pub(super) enum ClientDisposition {
    Continue,
    Close,
}

type ClientWriter<'a> = dyn AsyncWrite + Unpin + Send + 'a;

/// How a single response went, collected for the access log and the keep-alive decision.
struct Served {
    status: StatusCode,
    bytes_out: u64,
    lookup: Option<&'static str>,
    store: StoreOutcome,
    /// The response body was delivered in full under its announced framing.
    complete: bool,
    /// The body was close-delimited.
    close_delimited: bool,
    error_reason: Option<&'static str>,
    error_detail: Option<String>,
}

impl Served {
    fn new(status: StatusCode) -> Self {
        Self {
            status,
            bytes_out: 0,
            lookup: None,
            store: StoreOutcome::Skipped,
            complete: true,
            close_delimited: false,
            error_reason: None,
            error_detail: None,
        }
    }

    fn fail(&mut self, reason: &'static str, err: &anyhow::Error) {
        self.complete = false;
        self.error_reason = Some(reason);
        self.error_detail = Some(format!("{err:#}"));
    }
}

/// Per-request options derived from the request head.
#[derive(Clone, Copy)]
struct ResponseMode {
    close: bool,
    head_only: bool,
}

pub(super) async fn handle_request<S>(
    client: &mut S,
    peer: SocketAddr,
    app: &AppContext,
    head: RequestHead,
) -> ClientDisposition
where
    S: AsyncWrite + Unpin + Send,
{
    let start = Instant::now();
    // A request body is never read, so the connection cannot be reused after it.
    let has_body = head.has_body().unwrap_or(true);
    let mode = ResponseMode {
        close: !head.keep_alive() || has_body,
        head_only: head.method == Method::HEAD,
    };
    let mut log = AccessLogBuilder::new(peer).method(head.method.as_str());

    let mut cache_key = None;
    let served = match parse_request(head.method, &head.target, head.headers.host()) {
        Ok(request) => {
            log = log.host(request.host.as_str()).path(request.path.as_str());
            serve_request(client, app, &request, mode, &mut cache_key).await
        }
        Err(err) => {
            debug!(peer = %peer, error = %err, "rejecting malformed request target");
            log = log.path(head.target.as_str());
            respond_error(client, ProxyError::BadRequest(format!("{err:#}")), mode).await
        }
    };

    let keep_open = !mode.close && served.complete && !served.close_delimited;

    log = log
        .status(served.status)
        .bytes_out(served.bytes_out)
        .cache_store(served.store.as_str())
        .elapsed(start.elapsed());
    if let Some(key) = cache_key {
        log = log.cache_key(key);
    }
    if let Some(lookup) = served.lookup {
        log = log.cache_lookup(lookup);
    }
    if let Some(reason) = served.error_reason {
        log = log.error_reason(reason);
    }
    if let Some(detail) = served.error_detail {
        log = log.error_detail(detail);
    }
    log.log();

    if keep_open {
        ClientDisposition::Continue
    } else {
        ClientDisposition::Close
    }
}

async fn serve_request<S>(
    client: &mut S,
    app: &AppContext,
    request: &CdnRequest,
    mode: ResponseMode,
    cache_key: &mut Option<String>,
) -> Served
where
    S: AsyncWrite + Unpin + Send,
{
    if let Verdict::Reject(rejection) = validate(request) {
        return respond_error(client, ProxyError::Rejected(rejection), mode).await;
    }
    if let Err(err) = app.cache.ensure_root().await {
        warn!(error = %err, "cache root unavailable; failing request");
        return respond_error(client, err.into(), mode).await;
    }

    let key = CacheKey::from_request_path(&request.path);
    *cache_key = Some(key.to_string());
    let path = app.cache.entry_path(&key);

    let lookup = lookup_entry(app, &path).await;
    let lookup_label = lookup.label();
    if let Lookup::Hit(cached) = lookup {
        return serve_hit(client, cached, mode).await;
    }

    let _fetch_guard = match &app.fetch_locks {
        Some(locks) => {
            let guard = locks.acquire(&key).await;
            // Another request may have stored the entry while we waited.
            if let Lookup::Hit(cached) = lookup_entry(app, &path).await {
                debug!(cache_key = %key, "serving entry stored by concurrent fetch");
                return serve_hit(client, cached, mode).await;
            }
            Some(guard)
        }
        None => None,
    };

    let mut served = fetch_and_store(client, app, request, &key, &path, mode).await;
    served.lookup = Some(lookup_label);
    served
}

async fn lookup_entry(app: &AppContext, path: &Path) -> Lookup {
    let lookup = app.cache.lookup(path).await;
    if let Lookup::IoError(err) = &lookup {
        debug!(path = %path.display(), error = %err, "cache lookup failed; treating as miss");
    }
    lookup
}

async fn serve_hit<S>(client: &mut S, cached: CachedFile, mode: ResponseMode) -> Served
where
    S: AsyncWrite + Unpin + Send,
{
    let CachedFile { file, len } = cached;
    let mut served = Served::new(StatusCode::OK);
    served.lookup = Some("hit");

    let head = encode_response_head(StatusCode::OK, ResponseFraming::Length(len), mode.close);
    if let Err(err) = write_head(client, &head).await {
        served.fail("client_write_failed", &err);
        return served;
    }
    served.bytes_out = head.len() as u64;
    if mode.head_only {
        return served;
    }

    // The entry may be rewritten by a concurrent miss; never send more than announced.
    let mut body = file.take(len);
    match copy_counted(&mut body, client).await {
        Ok(copied) => {
            served.bytes_out += copied;
            if copied < len {
                served.complete = false;
                served.error_reason = Some("cache_entry_truncated");
            }
        }
        Err(err) => served.fail("client_write_failed", &err),
    }
    served
}

async fn fetch_and_store<S>(
    client: &mut S,
    app: &AppContext,
    request: &CdnRequest,
    key: &CacheKey,
    path: &Path,
    mode: ResponseMode,
) -> Served
where
    S: AsyncWrite + Unpin + Send,
{
    let OriginResponse { status, mut body } =
        match app.origin.fetch(&request.host, &request.origin_path).await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    host = %request.host,
                    path = %request.origin_path,
                    error = %err,
                    "origin fetch failed"
                );
                return respond_error(client, err.into(), mode).await;
            }
        };

    let mut served = Served::new(status);
    if status != StatusCode::OK {
        debug!(host = %request.host, path = %request.path, status = status.as_u16(), "origin returned non-OK status");
        let head = encode_response_head(status, ResponseFraming::Length(0), mode.close);
        match write_head(client, &head).await {
            Ok(()) => served.bytes_out = head.len() as u64,
            Err(err) => served.fail("client_write_failed", &err),
        }
        return served;
    }

    let framing = match body.content_length() {
        Some(length) => ResponseFraming::Length(length),
        None => ResponseFraming::UntilClose,
    };
    served.close_delimited = framing == ResponseFraming::UntilClose;
    let head = encode_response_head(StatusCode::OK, framing, mode.close);
    if let Err(err) = write_head(client, &head).await {
        served.fail("client_write_failed", &err);
        return served;
    }
    served.bytes_out = head.len() as u64;

    let mut discard = tokio::io::sink();
    let out: &mut ClientWriter<'_> = if mode.head_only {
        &mut discard
    } else {
        client
    };

    match app.cache.create_entry(path).await {
        Ok(file) => {
            let outcome = tee_copy(&mut body, out, file).await;
            if !mode.head_only {
                served.bytes_out += outcome.client_bytes;
            }
            if let Some(err) = &outcome.cache_error {
                warn!(
                    cache_key = %key,
                    path = %path.display(),
                    cached_bytes = outcome.cached_bytes,
                    error = %err,
                    "cache write failed; continuing uncached"
                );
            }
            served.store = if outcome.fully_cached() {
                info!(
                    cache_key = %key,
                    bytes = outcome.cached_bytes,
                    "stored cache entry"
                );
                StoreOutcome::Stored
            } else {
                StoreOutcome::Partial
            };
            if let Some(err) = &outcome.error {
                served.fail("stream_failed", err);
            }
        }
        Err(err) => {
            warn!(
                cache_key = %key,
                error = %err,
                "failed to create cache entry; streaming uncached"
            );
            served.store = StoreOutcome::Failed;
            let (written, error) = relay_body(&mut body, out).await;
            if !mode.head_only {
                served.bytes_out += written;
            }
            if let Some(err) = &error {
                served.fail("stream_failed", err);
            }
        }
    }
    served
}

async fn respond_error<S>(client: &mut S, err: ProxyError, mode: ResponseMode) -> Served
where
    S: AsyncWrite + Unpin + Send,
{
    let mut served = Served::new(err.status());
    served.error_reason = Some(err.reason());
    if matches!(err, ProxyError::CacheRoot(_) | ProxyError::Fetch(_)) {
        served.error_detail = Some(err.to_string());
    }
    match send_response(client, err.status(), err.body(), mode.close, mode.head_only).await {
        Ok(written) => served.bytes_out = written,
        Err(write_err) => {
            served.complete = false;
            debug!(error = %write_err, "failed to write error response");
        }
    }
    served
}
