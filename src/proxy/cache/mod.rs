mod key;
mod locks;
mod store;
mod tee;

pub use key::CacheKey;
pub use locks::{FetchGuard, FetchLocks};
pub use store::{CacheRootUnavailable, CacheStore, CacheWriteError, CachedFile, Lookup};
pub use tee::{TeeOutcome, copy_counted, relay_body, tee_copy};

/// What happened to the cache entry while serving a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The full body was written to a new entry.
    Stored,
    /// The entry was created but holds only a prefix of the body.
    Partial,
    /// Nothing was written: hit, rejection, non-200 or failed fetch.
    Skipped,
    /// The entry could not be created; the body was streamed uncached.
    Failed,
}

impl StoreOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreOutcome::Stored => "stored",
            StoreOutcome::Partial => "partial",
            StoreOutcome::Skipped => "skipped",
            StoreOutcome::Failed => "failed",
        }
    }
}
