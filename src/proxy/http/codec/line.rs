use std::fmt::Display;

use anyhow::{Result, anyhow, bail, ensure};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;

use crate::util::{remaining_deadline, timeout_with_context};

/// Reads one `\n`-terminated line into `buf`, returning the number of bytes consumed
/// (0 on a clean EOF). Without a deadline the read waits for as long as the peer does.
pub(crate) async fn read_line<S, P>(
    reader: &mut BufReader<S>,
    buf: &mut String,
    deadline: Option<Instant>,
    peer: P,
    max_len: usize,
) -> Result<usize>
where
    S: AsyncRead + Unpin,
    P: Display,
{
    ensure!(max_len > 0, "line length limit must be greater than zero");
    buf.clear();
    let mut collected = Vec::new();
    let context = format!("reading line from {peer}");

    loop {
        let available = match deadline {
            Some(deadline) => {
                let remaining = remaining_deadline(deadline, &context)?;
                timeout_with_context(remaining, reader.fill_buf(), context.as_str()).await?
            }
            None => reader
                .fill_buf()
                .await
                .map_err(|err| anyhow!("failed while {context}: {err}"))?,
        };

        if available.is_empty() {
            if collected.is_empty() {
                return Ok(0);
            }
            bail!("connection closed while reading line from {peer}");
        }

        let newline_pos = available.iter().position(|byte| *byte == b'\n');
        let consume = newline_pos.map(|idx| idx + 1).unwrap_or(available.len());

        if collected
            .len()
            .checked_add(consume)
            .ok_or_else(|| anyhow!("line length overflow for {peer}"))?
            > max_len
        {
            bail!("line from {peer} exceeds configured limit of {max_len} bytes");
        }

        collected.extend_from_slice(&available[..consume]);
        reader.consume(consume);

        if newline_pos.is_some() {
            break;
        }
    }

    let string = String::from_utf8(collected)
        .map_err(|_| anyhow!("line from {peer} contained invalid bytes"))?;
    let len = string.len();
    *buf = string;
    Ok(len)
}
