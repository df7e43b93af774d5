use std::net::SocketAddr;

use anyhow::Result;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::debug;

use crate::logging::AccessLogBuilder;
use crate::proxy::AppContext;

use super::codec::read_request_head;
use super::pipeline::{ClientDisposition, handle_request};
use super::respond::{send_response, shutdown_stream};

/// Serves HTTP/1 requests on one client connection until it closes or a response requires
/// closing it.
pub async fn handle_http<S>(stream: S, peer: SocketAddr, app: AppContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let header_timeout = app.settings.request_header_timeout();
    let idle_timeout = app.settings.client_keepalive_idle_timeout();
    let max_header_size = app.settings.max_request_header_size;
    let mut reader = BufReader::new(stream);
    let mut first = true;

    loop {
        // The first request gets the header deadline; later ones may idle between requests.
        let wait = if first { header_timeout } else { idle_timeout };
        first = false;
        let head = match read_request_head(
            &mut reader,
            peer,
            wait,
            header_timeout,
            max_header_size,
        )
        .await
        {
            Ok(Some(head)) => head,
            Ok(None) => break,
            Err(err) => {
                debug!(peer = %peer, error = %err, "failed to read request head");
                let sent = send_response(
                    reader.get_mut(),
                    StatusCode::BAD_REQUEST,
                    b"",
                    true,
                    false,
                )
                .await
                .unwrap_or(0);
                AccessLogBuilder::new(peer)
                    .status(StatusCode::BAD_REQUEST)
                    .bytes_out(sent)
                    .error_reason("malformed_request_head")
                    .error_detail(format!("{err:#}"))
                    .log();
                break;
            }
        };

        match handle_request(reader.get_mut(), peer, &app, head).await {
            ClientDisposition::Continue => continue,
            ClientDisposition::Close => break,
        }
    }

    if let Err(err) = shutdown_stream(reader.get_mut()).await {
        debug!(peer = %peer, error = %err, "failed to shut down client stream");
    }
    Ok(())
}
