use http::StatusCode;
use thiserror::Error;

use super::cache::CacheRootUnavailable;
use super::origin::FetchError;
use super::validate::Rejection;

/// Failures that end a request before any body has been committed to the client.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed request: {0}")]
    BadRequest(String),
    #[error("request rejected: {}", .0.reason)]
    Rejected(Rejection),
    #[error(transparent)]
    CacheRoot(#[from] CacheRootUnavailable),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Rejected(rejection) => rejection.status,
            ProxyError::CacheRoot(_) | ProxyError::Fetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> &'static [u8] {
        match self {
            ProxyError::Rejected(rejection) => rejection.body,
            _ => b"",
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "bad_request",
            ProxyError::Rejected(rejection) => rejection.reason,
            ProxyError::CacheRoot(_) => "cache_root_unavailable",
            ProxyError::Fetch(err) => err.reason(),
        }
    }
}
