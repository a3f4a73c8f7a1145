use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use snafu::ResultExt as _;
use url::Url;

use crate::database::DatabaseConfig;
use crate::error::{ApplicationError, ConfigLoadSnafu};

/// Loads the configuration from the environment. Durations accept humantime syntax such as
/// `250ms`, `10m` or `1h`.
pub fn load() -> Result<Config, ApplicationError> {
    envy::from_env::<Config>().context(ConfigLoadSnafu)
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(rename = "host_address")]
    pub host: SocketAddr,
    #[serde(flatten)]
    pub database: DatabaseConfig,
    #[serde(flatten)]
    pub cache: CacheConfig,
    #[serde(flatten)]
    pub counters: CounterConfig,
    #[serde(flatten)]
    pub views: ViewConfig,
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

/// Without a url the cache lives in process.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(rename = "cache_url", default)]
    pub url: Option<Url>,
    #[serde(rename = "cache_ttl", default = "default_cache_ttl", deserialize_with = "duration")]
    pub ttl: Duration,
    #[serde(rename = "cache_timeout", default = "default_call_timeout", deserialize_with = "duration")]
    pub timeout: Duration,
}

/// Without a url the counters live in process.
#[derive(Debug, Deserialize, Clone)]
pub struct CounterConfig {
    #[serde(rename = "counter_url", default)]
    pub url: Option<Url>,
    #[serde(rename = "counter_timeout", default = "default_call_timeout", deserialize_with = "duration")]
    pub timeout: Duration,
    #[serde(rename = "reconcile_queue", default = "default_reconcile_queue", deserialize_with = "parsed")]
    pub reconcile_queue: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewConfig {
    #[serde(rename = "rearm_window", default = "default_rearm_window", deserialize_with = "duration")]
    pub rearm_window: Duration,
    #[serde(rename = "database_timeout", default = "default_database_timeout", deserialize_with = "duration")]
    pub database_timeout: Duration,
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("blobs")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_cache_ttl() -> Duration {
    crate::service::DEFAULT_TTL
}

fn default_rearm_window() -> Duration {
    crate::service::DEFAULT_REARM_WINDOW
}

fn default_call_timeout() -> Duration {
    Duration::from_millis(250)
}

fn default_database_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_reconcile_queue() -> usize {
    1024
}

fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

/// Flattened fields reach serde as strings, so numbers are parsed by hand.
fn parsed<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let text = String::deserialize(deserializer)?;
    text.parse().map_err(serde::de::Error::custom)
}
