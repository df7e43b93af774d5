pub mod cli;
pub mod logging;
pub mod proxy;
pub mod settings;
pub mod util;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::{
    proxy::{
        AppContext,
        cache::{CacheStore, FetchLocks},
        origin::HttpOrigin,
    },
    settings::Settings,
};

pub async fn run(settings: Settings) -> Result<()> {
    let app = build_app(settings)?;
    proxy::run(app).await
}

/// Resolves the cache root once and wires the request pipeline together.
pub fn build_app(settings: Settings) -> Result<AppContext> {
    let cache_root = settings.cache_root()?;
    info!(
        cache_root = %cache_root.display(),
        coalesce_fetches = settings.coalesce_fetches,
        "using cache root"
    );
    let cache = Arc::new(CacheStore::new(cache_root));
    let origin = Arc::new(HttpOrigin::new(
        settings.origin_port,
        settings.max_response_header_size,
    ));
    let fetch_locks = settings
        .coalesce_fetches
        .then(|| Arc::new(FetchLocks::new()));
    Ok(AppContext::new(
        Arc::new(settings),
        cache,
        origin,
        fetch_locks,
    ))
}
