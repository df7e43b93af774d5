use std::io;

use async_trait::async_trait;
use http::uri::{Authority, PathAndQuery};
use http::{StatusCode, Uri};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use super::http::{BodyPlan, BodyStream, OriginBody, ResponseHead, read_response_head};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid origin authority '{authority}'")]
    InvalidAuthority { authority: String },
    #[error("failed to connect to origin {authority}: {source}")]
    Connect {
        authority: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to send request to origin {authority}: {source}")]
    Request {
        authority: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid response from origin {authority}: {reason}")]
    Response { authority: String, reason: String },
    #[error("origin {authority} redirected to unusable location '{location}'")]
    Redirect { authority: String, location: String },
    #[error("origin gave up after {limit} redirects, last from {authority}")]
    TooManyRedirects { authority: String, limit: usize },
}

impl FetchError {
    /// Short label for access logs.
    pub fn reason(&self) -> &'static str {
        match self {
            FetchError::InvalidAuthority { .. } => "origin_invalid_authority",
            FetchError::Connect { .. } => "origin_connect_failed",
            FetchError::Request { .. } => "origin_request_failed",
            FetchError::Response { .. } => "origin_response_invalid",
            FetchError::Redirect { .. } => "origin_redirect_invalid",
            FetchError::TooManyRedirects { .. } => "origin_too_many_redirects",
        }
    }
}

/// Origin response with its head parsed and the body ready to stream.
pub struct OriginResponse {
    pub status: StatusCode,
    pub body: OriginBody,
}

/// Responses fetched in a row before a redirect chain is abandoned.
const MAX_REDIRECTS: usize = 10;

/// Source of CDN content on a cache miss.
#[async_trait]
pub trait Origin: Send + Sync {
    /// Issues `GET http://<host><path>`, following redirects to the final response.
    async fn fetch(&self, host: &str, path: &str) -> Result<OriginResponse, FetchError>;
}

/// Plain HTTP/1.1 origin client; one connection per fetch.
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    default_port: u16,
    max_response_header_size: usize,
}

impl HttpOrigin {
    pub fn new(default_port: u16, max_response_header_size: usize) -> Self {
        Self {
            default_port,
            max_response_header_size,
        }
    }

    fn split_authority(&self, host: &str) -> Result<(String, u16), FetchError> {
        let authority: Authority = host.parse().map_err(|_| FetchError::InvalidAuthority {
            authority: host.to_string(),
        })?;
        let name = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        Ok((name, authority.port_u16().unwrap_or(self.default_port)))
    }

    /// One request/response exchange; the connection stays with the returned reader.
    async fn send(
        &self,
        host: &str,
        path: &str,
    ) -> Result<(ResponseHead, BufReader<BodyStream>), FetchError> {
        let (name, port) = self.split_authority(host)?;
        let mut stream = TcpStream::connect((name.as_str(), port))
            .await
            .map_err(|source| FetchError::Connect {
                authority: host.to_string(),
                source,
            })?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(host, error = %err, "failed to set TCP_NODELAY on origin stream");
        }

        stream
            .write_all(build_origin_request(host, path).as_bytes())
            .await
            .map_err(|source| FetchError::Request {
                authority: host.to_string(),
                source,
            })?;

        let stream: BodyStream = Box::new(stream);
        let mut reader = BufReader::new(stream);
        let head = read_response_head(&mut reader, host, self.max_response_header_size)
            .await
            .map_err(|err| FetchError::Response {
                authority: host.to_string(),
                reason: format!("{err:#}"),
            })?;
        debug!(host, path, status = head.status.as_u16(), "origin responded");
        Ok((head, reader))
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, host: &str, path: &str) -> Result<OriginResponse, FetchError> {
        let mut host = host.to_string();
        let mut path = path.to_string();
        for hop in 1..=MAX_REDIRECTS {
            let (head, reader) = self.send(&host, &path).await?;
            if is_redirect(head.status)
                && let Some(location) = head.location.as_deref()
            {
                let (next_host, next_path) = redirect_target(&host, &path, location)?;
                debug!(
                    from_host = %host,
                    from_path = %path,
                    to_host = %next_host,
                    to_path = %next_path,
                    hop,
                    "following origin redirect"
                );
                host = next_host;
                path = next_path;
                continue;
            }

            let plan = body_plan(&head);
            return Ok(OriginResponse {
                status: head.status,
                body: OriginBody::new(reader, plan),
            });
        }
        Err(FetchError::TooManyRedirects {
            authority: host,
            limit: MAX_REDIRECTS,
        })
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Resolves a `Location` value against the request that produced it.
///
/// Returns the next authority and request target. Only plain `http` locations are usable.
fn redirect_target(host: &str, path: &str, location: &str) -> Result<(String, String), FetchError> {
    let invalid = || FetchError::Redirect {
        authority: host.to_string(),
        location: location.to_string(),
    };
    let trimmed = location.split('#').next().unwrap_or_default();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let absolute = if trimmed.starts_with("//") {
        Some(format!("http:{trimmed}"))
    } else if trimmed.contains("://") {
        Some(trimmed.to_string())
    } else {
        None
    };
    if let Some(absolute) = absolute {
        let uri: Uri = absolute.parse().map_err(|_| invalid())?;
        if !uri
            .scheme_str()
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("http"))
        {
            return Err(invalid());
        }
        let authority = uri.authority().ok_or_else(invalid)?.to_string();
        let target = uri
            .path_and_query()
            .map(PathAndQuery::as_str)
            .filter(|target| target.starts_with('/'))
            .unwrap_or("/");
        return Ok((authority, target.to_string()));
    }

    let target = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        let base = path.rfind('/').map_or("/", |idx| &path[..=idx]);
        format!("{base}{trimmed}")
    };
    let target: PathAndQuery = target.parse().map_err(|_| invalid())?;
    Ok((host.to_string(), target.as_str().to_string()))
}

fn build_origin_request(host: &str, path: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: depotcache/{}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        env!("CARGO_PKG_VERSION")
    )
}

fn body_plan(head: &ResponseHead) -> BodyPlan {
    if head.status == StatusCode::NO_CONTENT || head.status == StatusCode::NOT_MODIFIED {
        return BodyPlan::Fixed(0);
    }
    if head.chunked {
        return BodyPlan::Chunked;
    }
    match head.content_length {
        Some(length) => BodyPlan::Fixed(length),
        None => BodyPlan::UntilClose,
    }
}
