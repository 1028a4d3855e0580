use crate::{Error, Result};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Development,
    Production,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" => Ok(Mode::Development),
            "production" => Ok(Mode::Production),
            other => Err(Error::Config(format!("invalid mode: {other}"))),
        }
    }
}

/// Which `CacheStore` adapter backs the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Sled,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "sled" => Ok(StoreBackend::Sled),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(Error::Config(format!("unknown cache backend: {other}"))),
        }
    }
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Sqlite => "sqlite",
            StoreBackend::Sled => "sled",
            StoreBackend::Memory => "memory",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,
    pub host: String,
    pub grpc_port: u16,
    pub cache_backend: StoreBackend,
    /// SQLite file, sled directory, or `:memory:`.
    pub cache_path: String,
    /// Origin URL with a `{key}` placeholder.
    pub origin_template: String,
    pub origin_timeout: Duration,
    pub max_body_bytes: usize,
    /// Used when the origin sends no usable `Expires` header. `None` makes
    /// such a response a fetch failure.
    pub default_ttl: Option<Duration>,
    pub max_chunk_bytes: usize,
    /// `None` disables the expired-row sweeper.
    pub sweep_interval: Option<Duration>,
}

impl Config {
    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_GRPC_PORT: u16 = 50051;
    pub const DEFAULT_CACHE_PATH: &str = ":memory:";
    pub const DEFAULT_ORIGIN_TEMPLATE: &str = "https://i.ytimg.com/vi/{key}/hqdefault.jpg";
    pub const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 10;
    pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
    pub const DEFAULT_TTL_SECS: u64 = 3600;
    pub const DEFAULT_MAX_CHUNK_BYTES: usize = 64 * 1024;
    /// Upper bound for a frame payload, under tonic's 4 MiB message limit.
    pub const MAX_CHUNK_BYTES_LIMIT: usize = 3 * 1024 * 1024;

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = lookup("YOUTHUMB_MODE")
            .map(|v| v.parse::<Mode>())
            .transpose()?
            .unwrap_or(Mode::Development);
        let cache_backend = lookup("YOUTHUMB_CACHE_BACKEND")
            .map(|v| v.parse::<StoreBackend>())
            .transpose()?
            .unwrap_or(StoreBackend::Sqlite);

        let origin_template = lookup("YOUTHUMB_ORIGIN_TEMPLATE")
            .unwrap_or_else(|| Self::DEFAULT_ORIGIN_TEMPLATE.to_string());
        if !origin_template.contains("{key}") {
            return Err(Error::Config(format!(
                "origin template has no {{key}} placeholder: {origin_template}"
            )));
        }

        let origin_timeout_secs = parse_var(
            &lookup,
            "YOUTHUMB_ORIGIN_TIMEOUT_SECS",
            Self::DEFAULT_ORIGIN_TIMEOUT_SECS,
        )?;
        let default_ttl_secs =
            parse_var(&lookup, "YOUTHUMB_DEFAULT_TTL_SECS", Self::DEFAULT_TTL_SECS)?;
        let sweep_interval_secs = parse_var(&lookup, "YOUTHUMB_SWEEP_INTERVAL_SECS", 0u64)?;

        let max_chunk_bytes = parse_var(
            &lookup,
            "YOUTHUMB_MAX_CHUNK_BYTES",
            Self::DEFAULT_MAX_CHUNK_BYTES,
        )?;
        if max_chunk_bytes == 0 || max_chunk_bytes > Self::MAX_CHUNK_BYTES_LIMIT {
            return Err(Error::Config(format!(
                "YOUTHUMB_MAX_CHUNK_BYTES must be between 1 and {}",
                Self::MAX_CHUNK_BYTES_LIMIT
            )));
        }

        if default_ttl_secs == 0 {
            warn!("YOUTHUMB_DEFAULT_TTL_SECS is 0, origin responses without Expires will fail");
        }

        Ok(Self {
            mode,
            host: lookup("YOUTHUMB_GRPC_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            grpc_port: parse_var(&lookup, "YOUTHUMB_GRPC_PORT", Self::DEFAULT_GRPC_PORT)?,
            cache_backend,
            cache_path: lookup("YOUTHUMB_CACHE_PATH")
                .unwrap_or_else(|| Self::DEFAULT_CACHE_PATH.to_string()),
            origin_template,
            origin_timeout: Duration::from_secs(origin_timeout_secs),
            max_body_bytes: parse_var(
                &lookup,
                "YOUTHUMB_MAX_BODY_BYTES",
                Self::DEFAULT_MAX_BODY_BYTES,
            )?,
            default_ttl: non_zero_secs(default_ttl_secs),
            max_chunk_bytes,
            sweep_interval: non_zero_secs(sweep_interval_secs),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.grpc_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Development,
            host: Self::DEFAULT_HOST.to_string(),
            grpc_port: Self::DEFAULT_GRPC_PORT,
            cache_backend: StoreBackend::Sqlite,
            cache_path: Self::DEFAULT_CACHE_PATH.to_string(),
            origin_template: Self::DEFAULT_ORIGIN_TEMPLATE.to_string(),
            origin_timeout: Duration::from_secs(Self::DEFAULT_ORIGIN_TIMEOUT_SECS),
            max_body_bytes: Self::DEFAULT_MAX_BODY_BYTES,
            default_ttl: Some(Duration::from_secs(Self::DEFAULT_TTL_SECS)),
            max_chunk_bytes: Self::DEFAULT_MAX_CHUNK_BYTES,
            sweep_interval: None,
        }
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| Error::Config(format!("{name}={raw:?}: {e}"))),
        None => Ok(default),
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
