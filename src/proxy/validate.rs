use http::StatusCode;

use super::request::CdnRequest;

pub const MISSING_HOST_BODY: &[u8] = b"Missing host header.\n";

const LOOPBACK_HOST: &str = "127.0.0.1";
const FAVICON_PATH: &str = "/favicon.ico";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub body: &'static [u8],
    pub reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Reject(Rejection),
}

/// Rejects requests that must never touch the cache or the origin.
///
/// A request addressed to ourselves (no host, or the loopback literal) would fetch from this
/// proxy again, so the host check comes first.
pub fn validate(request: &CdnRequest) -> Verdict {
    if request.host.is_empty() || request.host == LOOPBACK_HOST {
        return Verdict::Reject(Rejection {
            status: StatusCode::BAD_REQUEST,
            body: MISSING_HOST_BODY,
            reason: "missing_host",
        });
    }
    if request.path == FAVICON_PATH {
        return Verdict::Reject(Rejection {
            status: StatusCode::NOT_FOUND,
            body: b"",
            reason: "favicon",
        });
    }
    Verdict::Continue
}
