use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 80))
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_request_header_timeout() -> u64 {
    30
}

fn default_client_keepalive_idle_timeout() -> u64 {
    60
}

fn default_max_request_header_size() -> usize {
    32 * 1024
}

fn default_max_response_header_size() -> usize {
    32 * 1024
}

fn default_origin_port() -> u16 {
    80
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Cache root. When unset, the working directory at startup is used.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default = "default_request_header_timeout")]
    pub request_header_timeout: u64,
    #[serde(default = "default_client_keepalive_idle_timeout")]
    pub client_keepalive_idle_timeout: u64,
    #[serde(default = "default_max_request_header_size")]
    pub max_request_header_size: usize,
    #[serde(default = "default_max_response_header_size")]
    pub max_response_header_size: usize,
    #[serde(default = "default_origin_port")]
    pub origin_port: u16,
    /// Serialize concurrent origin fetches for the same cache key.
    #[serde(default)]
    pub coalesce_fetches: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            cache_dir: None,
            log: default_log_format(),
            request_header_timeout: default_request_header_timeout(),
            client_keepalive_idle_timeout: default_client_keepalive_idle_timeout(),
            max_request_header_size: default_max_request_header_size(),
            max_response_header_size: default_max_response_header_size(),
            origin_port: default_origin_port(),
            coalesce_fetches: false,
        }
    }
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli);

        if let Some(path) = &config_path {
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("DEPOTCACHE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        if let Some(path) = &config_path {
            settings.apply_base_dir(path);
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Resolves the cache root once; an unset `cache_dir` means the current
    /// working directory.
    pub fn cache_root(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("failed to resolve working directory"),
        }
    }

    pub fn request_header_timeout(&self) -> Duration {
        Duration::from_secs(self.request_header_timeout)
    }

    pub fn client_keepalive_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.client_keepalive_idle_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.request_header_timeout > 0,
            "request_header_timeout must be greater than 0 seconds (got {})",
            self.request_header_timeout
        );
        ensure!(
            self.client_keepalive_idle_timeout > 0,
            "client_keepalive_idle_timeout must be greater than 0 seconds (got {})",
            self.client_keepalive_idle_timeout
        );
        ensure!(
            self.max_request_header_size > 0,
            "max_request_header_size must be greater than 0 (got {})",
            self.max_request_header_size
        );
        ensure!(
            self.max_response_header_size > 0,
            "max_response_header_size must be greater than 0 (got {})",
            self.max_response_header_size
        );
        ensure!(self.origin_port > 0, "origin_port must not be 0");
        Ok(())
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        if let Some(cache_dir) = self.cache_dir.clone() {
            self.cache_dir = Some(absolutize(&cache_dir, base_dir));
        }
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = cli.config_path() {
        return Some(path.to_path_buf());
    }

    default_config_candidates()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("/etc/depotcache/depotcache.toml"),
        PathBuf::from("depotcache.toml"),
    ]
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
