use std::fmt::Display;

use anyhow::{Context, Result, anyhow, bail, ensure};
use http::StatusCode;
use tokio::io::{AsyncRead, BufReader};

use super::line::read_line;

/// Framing of a response head received from the origin.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: StatusCode,
    pub content_length: Option<u64>,
    pub chunked: bool,
    /// `Location` header, kept for redirect following.
    pub location: Option<String>,
}

/// How the body of a response sent to the client is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseFraming {
    Length(u64),
    UntilClose,
}

pub(crate) fn encode_response_head(
    status: StatusCode,
    framing: ResponseFraming,
    close: bool,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(128);
    buffer.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )
        .as_bytes(),
    );
    if let ResponseFraming::Length(length) = framing {
        buffer.extend_from_slice(b"Content-Length: ");
        buffer.extend_from_slice(length.to_string().as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }
    if close || framing == ResponseFraming::UntilClose {
        buffer.extend_from_slice(b"Connection: close\r\n");
    }
    buffer.extend_from_slice(b"\r\n");
    buffer
}

/// Reads a final (non-1xx) response head from the origin.
pub(crate) async fn read_response_head<S, P>(
    reader: &mut BufReader<S>,
    peer: P,
    max_header_bytes: usize,
) -> Result<ResponseHead>
where
    S: AsyncRead + Unpin,
    P: Display + Copy,
{
    loop {
        let head = read_single_response_head(reader, peer, max_header_bytes).await?;
        if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
            continue;
        }
        return Ok(head);
    }
}

async fn read_single_response_head<S, P>(
    reader: &mut BufReader<S>,
    peer: P,
    max_header_bytes: usize,
) -> Result<ResponseHead>
where
    S: AsyncRead + Unpin,
    P: Display + Copy,
{
    ensure!(
        max_header_bytes > 0,
        "max response header size must be greater than zero"
    );
    let mut line = String::new();
    let mut total = read_line(reader, &mut line, None, peer, max_header_bytes).await?;
    if total == 0 {
        bail!("origin {peer} closed connection before sending status line");
    }
    let status = parse_status_line(line.trim_end_matches(['\r', '\n']))?;

    let mut content_length = None;
    let mut chunked = false;
    let mut transfer_encoding_present = false;
    let mut location = None;
    loop {
        let remaining = max_header_bytes.saturating_sub(total);
        if remaining == 0 {
            bail!("origin response headers exceed configured limit of {max_header_bytes} bytes");
        }
        let read = read_line(reader, &mut line, None, peer, remaining).await?;
        if read == 0 {
            bail!("origin {peer} closed connection during headers");
        }
        total += read;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| anyhow!("header missing ':' separator from origin"))?;
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            let parsed: u64 = value
                .parse()
                .with_context(|| format!("invalid Content-Length value '{value}'"))?;
            if content_length.is_some_and(|existing| existing != parsed) {
                bail!("conflicting Content-Length headers from origin");
            }
            content_length = Some(parsed);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            transfer_encoding_present = true;
            if value.to_ascii_lowercase().contains("chunked") {
                chunked = true;
            }
        } else if name.eq_ignore_ascii_case("location") {
            location = Some(value.to_string());
        }
    }

    if transfer_encoding_present {
        // Transfer-Encoding overrides Content-Length (RFC 9112 section 6.3).
        content_length = None;
    }

    Ok(ResponseHead {
        status,
        content_length,
        chunked,
        location,
    })
}

fn parse_status_line(value: &str) -> Result<StatusCode> {
    let mut parts = value.split_whitespace();
    let version = parts
        .next()
        .ok_or_else(|| anyhow!("origin status line missing HTTP version"))?;
    let status = parts
        .next()
        .ok_or_else(|| anyhow!("origin status line missing status code"))?;

    match version {
        "HTTP/1.1" | "HTTP/1.0" => {}
        other => bail!("unsupported origin HTTP version '{other}'"),
    }

    let status_code: u16 = status
        .parse()
        .with_context(|| format!("invalid origin status code '{status}'"))?;
    StatusCode::from_u16(status_code)
        .map_err(|_| anyhow!("unsupported origin status code '{status_code}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &[u8]) -> Result<ResponseHead> {
        let mut reader = BufReader::new(raw);
        read_response_head(&mut reader, "origin.test:80", 1024).await
    }

    #[test]
    fn encodes_fixed_length_head() {
        let head = encode_response_head(StatusCode::OK, ResponseFraming::Length(5), false);
        assert_eq!(
            String::from_utf8(head).unwrap(),
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n"
        );
    }

    #[test]
    fn close_delimited_head_always_closes() {
        let head = encode_response_head(StatusCode::OK, ResponseFraming::UntilClose, false);
        let text = String::from_utf8(head).unwrap();
        assert!(!text.contains("Content-Length"));
        assert!(text.contains("Connection: close\r\n"));
    }

    #[test]
    fn status_line_accepts_http10_and_http11() {
        assert_eq!(parse_status_line("HTTP/1.1 404 Not Found").unwrap(), StatusCode::NOT_FOUND);
        assert_eq!(parse_status_line("HTTP/1.0 200 OK").unwrap(), StatusCode::OK);
    }

    #[test]
    fn status_line_rejects_garbage() {
        let err = parse_status_line("BAD 200 OK").unwrap_err();
        assert!(err.to_string().contains("unsupported origin HTTP version"));
        let err = parse_status_line("HTTP/1.1").unwrap_err();
        assert!(err.to_string().contains("missing status code"));
        let err = parse_status_line("HTTP/1.1 twohundred OK").unwrap_err();
        assert!(err.to_string().contains("invalid origin status code"));
    }

    #[tokio::test]
    async fn reads_content_length_head() -> Result<()> {
        let head = parse(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\nServer: x\r\n\r\nbody").await?;
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.content_length, Some(10));
        assert!(!head.chunked);
        Ok(())
    }

    #[tokio::test]
    async fn keeps_location_header() -> Result<()> {
        let head = parse(b"HTTP/1.1 302 Found\r\nlocation:  http://b.example/x \r\nContent-Length: 0\r\n\r\n")
            .await?;
        assert_eq!(head.status, StatusCode::FOUND);
        assert_eq!(head.location.as_deref(), Some("http://b.example/x"));
        Ok(())
    }

    #[tokio::test]
    async fn transfer_encoding_overrides_content_length() -> Result<()> {
        let head = parse(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\nTransfer-Encoding: chunked\r\n\r\n")
            .await?;
        assert!(head.chunked);
        assert_eq!(head.content_length, None);
        Ok(())
    }

    #[tokio::test]
    async fn skips_informational_heads() -> Result<()> {
        let head = parse(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
            .await?;
        assert_eq!(head.status, StatusCode::NOT_FOUND);
        assert_eq!(head.content_length, Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_conflicting_content_length() {
        let err = parse(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\nContent-Length: 11\r\n\r\n")
            .await
            .expect_err("conflicting lengths");
        assert!(err.to_string().contains("conflicting Content-Length"));
    }

    #[tokio::test]
    async fn rejects_truncated_head() {
        let err = parse(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n")
            .await
            .expect_err("truncated head");
        assert!(err.to_string().contains("closed connection during headers"));
    }
}
