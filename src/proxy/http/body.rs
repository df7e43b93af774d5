use anyhow::{Context, Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use super::codec::read_line;

const MAX_CHUNK_LINE_LENGTH: usize = 8192;

pub type BodyStream = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPlan {
    Fixed(u64),
    Chunked,
    UntilClose,
}

#[derive(Debug, Clone, Copy)]
enum ChunkState {
    Size,
    Data(u64),
}

#[derive(Debug, Clone, Copy)]
enum BodyState {
    Fixed(u64),
    Chunked(ChunkState),
    UntilClose,
    Done,
}

/// Decoded origin response body. Each `read` yields payload bytes only; chunk framing and
/// trailers are consumed internally.
pub struct OriginBody {
    reader: BufReader<BodyStream>,
    state: BodyState,
    plan: BodyPlan,
}

impl OriginBody {
    pub fn new(reader: BufReader<BodyStream>, plan: BodyPlan) -> Self {
        let state = match plan {
            BodyPlan::Fixed(0) => BodyState::Done,
            BodyPlan::Fixed(length) => BodyState::Fixed(length),
            BodyPlan::Chunked => BodyState::Chunked(ChunkState::Size),
            BodyPlan::UntilClose => BodyState::UntilClose,
        };
        Self {
            reader,
            state,
            plan,
        }
    }

    /// Wraps a raw, already-unframed byte stream.
    pub fn from_stream(stream: BodyStream, plan: BodyPlan) -> Self {
        Self::new(BufReader::new(stream), plan)
    }

    /// Length announced by the origin, when the body is length-delimited.
    pub fn content_length(&self) -> Option<u64> {
        match self.plan {
            BodyPlan::Fixed(length) => Some(length),
            BodyPlan::Chunked | BodyPlan::UntilClose => None,
        }
    }

    /// Reads decoded payload into `buf`. Returns 0 once the body is complete.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.state {
                BodyState::Done => return Ok(0),
                BodyState::UntilClose => {
                    let read = self
                        .reader
                        .read(buf)
                        .await
                        .context("reading response body from origin")?;
                    if read == 0 {
                        self.state = BodyState::Done;
                    }
                    return Ok(read);
                }
                BodyState::Fixed(remaining) => {
                    let to_read = remaining.min(buf.len() as u64) as usize;
                    let read = self
                        .reader
                        .read(&mut buf[..to_read])
                        .await
                        .context("reading response body from origin")?;
                    if read == 0 {
                        bail!(
                            "origin closed connection with {remaining} body bytes outstanding"
                        );
                    }
                    let remaining = remaining - read as u64;
                    self.state = if remaining == 0 {
                        BodyState::Done
                    } else {
                        BodyState::Fixed(remaining)
                    };
                    return Ok(read);
                }
                BodyState::Chunked(ChunkState::Size) => {
                    let size = self.read_chunk_size().await?;
                    if size == 0 {
                        self.skip_trailers().await?;
                        self.state = BodyState::Done;
                    } else {
                        self.state = BodyState::Chunked(ChunkState::Data(size));
                    }
                }
                BodyState::Chunked(ChunkState::Data(remaining)) => {
                    let to_read = remaining.min(buf.len() as u64) as usize;
                    let read = self
                        .reader
                        .read(&mut buf[..to_read])
                        .await
                        .context("reading chunk data from origin")?;
                    if read == 0 {
                        bail!("unexpected EOF while reading chunk data from origin");
                    }
                    let remaining = remaining - read as u64;
                    if remaining == 0 {
                        self.read_chunk_terminator().await?;
                        self.state = BodyState::Chunked(ChunkState::Size);
                    } else {
                        self.state = BodyState::Chunked(ChunkState::Data(remaining));
                    }
                    return Ok(read);
                }
            }
        }
    }

    async fn read_chunk_size(&mut self) -> Result<u64> {
        let mut line = String::new();
        let read = read_line(
            &mut self.reader,
            &mut line,
            None,
            "origin",
            MAX_CHUNK_LINE_LENGTH,
        )
        .await?;
        if read == 0 {
            bail!("unexpected EOF while reading chunk size from origin");
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let size_str = trimmed
            .split_once(';')
            .map(|(size, _)| size)
            .unwrap_or(trimmed)
            .trim();
        u64::from_str_radix(size_str, 16).with_context(|| format!("invalid chunk size '{size_str}'"))
    }

    async fn read_chunk_terminator(&mut self) -> Result<()> {
        let mut crlf = [0u8; 2];
        self.reader
            .read_exact(&mut crlf)
            .await
            .context("reading chunk terminator from origin")?;
        if &crlf != b"\r\n" {
            bail!("invalid chunk terminator from origin");
        }
        Ok(())
    }

    async fn skip_trailers(&mut self) -> Result<()> {
        let mut line = String::new();
        loop {
            let read = read_line(
                &mut self.reader,
                &mut line,
                None,
                "origin",
                MAX_CHUNK_LINE_LENGTH,
            )
            .await?;
            if read == 0 {
                bail!("unexpected EOF while reading chunk trailer from origin");
            }
            if line.trim_end_matches(['\r', '\n']).is_empty() {
                return Ok(());
            }
        }
    }
}
