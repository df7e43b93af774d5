use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Trailing `/5` (optionally followed by `/<digits>`) on manifest request paths.
static MANIFEST_TRAILER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/5(/\d+)?$").expect("static manifest pattern"));

/// Storage key derived from a CDN request path.
///
/// The mapping is a pure string rewrite:
/// - every `/depot` becomes `/depots`;
/// - every `/chunk` is removed;
/// - paths mentioning `manifest` lose `/manifest` and the trailing `/5[/<n>]`, and gain `.zip`.
///
/// Distinct request paths can map to the same key (manifest request variants).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_request_path(path: &str) -> Self {
        let mut key = path.replace("/depot", "/depots").replace("/chunk", "");
        if key.contains("manifest") {
            let original = key.clone();
            key = key.replace("/manifest", "");
            key = MANIFEST_TRAILER.replace(&key, "").into_owned();
            key.push_str(".zip");
            debug!(from = %original, to = %key, "rewrote manifest path");
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Joins the key onto `root` as a rooted path. `..` pops the previous component and never
    /// climbs above `root`; empty and `.` components are dropped.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        let mut components: Vec<&str> = Vec::new();
        for segment in self.0.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                other => components.push(other),
            }
        }
        let mut path = root.to_path_buf();
        path.extend(components);
        path
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
