use anyhow::{Context, Result, anyhow, bail};
use http::header::HeaderName;

#[derive(Clone, Debug)]
pub(crate) struct HeaderLine {
    pub name: String,
    pub value: String,
}

impl HeaderLine {
    fn is(&self, lower_name: &str) -> bool {
        self.name.eq_ignore_ascii_case(lower_name)
    }
}

/// Request header lines collected under a byte budget.
pub(crate) struct RequestHeaders {
    headers: Vec<HeaderLine>,
    max_bytes: usize,
    total_bytes: usize,
}

impl RequestHeaders {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            headers: Vec::new(),
            max_bytes,
            total_bytes: 0,
        }
    }

    /// Records one raw header line. Returns `false` once the blank line ending the head is seen.
    pub fn push_line(&mut self, line: &str) -> Result<bool> {
        self.total_bytes = self.total_bytes.saturating_add(line.len());
        if self.total_bytes > self.max_bytes {
            bail!(
                "request headers exceed configured limit of {} bytes",
                self.max_bytes
            );
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(false);
        }

        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| anyhow!("header missing ':' separator"))?;
        let name = name.trim();
        if name.is_empty() {
            bail!("header name must not be empty");
        }
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| anyhow!("invalid header name '{name}'"))?;
        self.headers.push(HeaderLine {
            name: name.to_string(),
            value: value.trim().to_string(),
        });
        Ok(true)
    }

    fn values<'a>(&'a self, lower_name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |header| header.is(lower_name))
            .map(|header| header.value.as_str())
    }

    /// The first `Host` header value, if any.
    pub fn host(&self) -> Option<&str> {
        self.values("host").next()
    }

    pub fn content_length(&self) -> Result<Option<u64>> {
        let mut length = None;
        for value in self.values("content-length") {
            let parsed: u64 = value
                .parse()
                .with_context(|| format!("invalid Content-Length value '{value}'"))?;
            if length.is_some_and(|existing| existing != parsed) {
                bail!("conflicting Content-Length headers");
            }
            length = Some(parsed);
        }
        Ok(length)
    }

    pub fn is_chunked(&self) -> bool {
        self.values("transfer-encoding")
            .any(|value| value.to_ascii_lowercase().contains("chunked"))
    }

    pub fn has_connection_token(&self, token: &str) -> bool {
        self.values("connection").any(|value| {
            value
                .split(',')
                .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
        })
    }
}
