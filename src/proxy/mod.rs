pub mod cache;
pub mod error;
pub mod http;
pub mod listener;
pub mod origin;
pub mod request;
pub mod validate;

use anyhow::Result;
use std::sync::Arc;

use crate::settings::Settings;

use self::cache::{CacheStore, FetchLocks};
use self::origin::Origin;

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub cache: Arc<CacheStore>,
    pub origin: Arc<dyn Origin>,
    pub fetch_locks: Option<Arc<FetchLocks>>,
}

impl AppContext {
    pub fn new(
        settings: Arc<Settings>,
        cache: Arc<CacheStore>,
        origin: Arc<dyn Origin>,
        fetch_locks: Option<Arc<FetchLocks>>,
    ) -> Self {
        Self {
            settings,
            cache,
            origin,
            fetch_locks,
        }
    }
}

pub async fn run(app: AppContext) -> Result<()> {
    let listener = listener::bind_listener(app.settings.listen).await?;
    listener::serve(listener, app).await
}
