use anyhow::{Context, Result, bail};
use http::{Method, Uri};
use percent_encoding::percent_decode_str;

/// A client request reduced to what the cache needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnRequest {
    pub method: Method,
    /// Host as the client sent it, including any port. Empty when absent.
    pub host: String,
    /// Percent-decoded request path without the query string. Cache keys derive from it.
    pub path: String,
    /// Path as it appeared on the wire, forwarded to the origin unchanged.
    pub origin_path: String,
}

/// Parses an HTTP/1 request target into a [`CdnRequest`].
///
/// Origin-form targets take the host from the `Host` header; absolute-form targets carry their
/// own authority, which wins over the header.
pub fn parse_request(method: Method, target: &str, host_header: Option<&str>) -> Result<CdnRequest> {
    let uri: Uri = target
        .parse()
        .with_context(|| format!("invalid request target '{target}'"))?;

    let host = if uri.scheme().is_some() {
        match uri.scheme_str() {
            Some("http") | Some("HTTP") => {}
            Some(other) => bail!("unsupported scheme '{other}'"),
            None => {}
        }
        uri.authority()
            .map(|authority| authority.as_str().to_string())
            .unwrap_or_default()
    } else {
        if !target.starts_with('/') {
            bail!("request target must be origin-form (start with '/')");
        }
        host_header.map(str::trim).unwrap_or_default().to_string()
    };

    let origin_path = match uri.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };
    let path = percent_decode_str(&origin_path)
        .decode_utf8()
        .with_context(|| format!("request path '{origin_path}' is not valid UTF-8 once decoded"))?
        .into_owned();

    Ok(CdnRequest {
        method,
        host,
        path,
        origin_path,
    })
}
