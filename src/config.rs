//! Service configuration.
//!
//! Configuration is loaded from a YAML file and overridable by environment
//! variables prefixed `URLSVC_` (e.g. `URLSVC_PORT=9000`), matching the
//! options enumerated for the external configuration surface. Validation
//! runs once at startup; a bad configuration is a hard exit, not a runtime
//! error.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: String,
    pub port: u16,
    /// Public origin prepended to short codes in API responses.
    pub domain: String,
    /// Disables the write routes (`POST`/`DELETE /api/shorten`) when true.
    pub readonly: bool,
    /// Enables verbose pool stats and the debug routes.
    pub debug: bool,
    #[serde(with = "humantime_secs")]
    pub request_timeout: Duration,

    pub global_rate_limit_key: String,
    pub global_write_rate: f64,
    pub global_write_burst: u32,

    pub stand_alone_read_rate: f64,
    pub stand_alone_read_burst: u32,

    pub sequence: SequenceConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub step: u64,
    pub seq_name: String,
    pub start_num: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub redis: RedisConfig,
    pub local_cache: LocalCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub addr: Vec<String>,
    #[serde(with = "humantime_secs")]
    pub dial_timeout: Duration,
    pub max_conn: u32,
    #[serde(with = "humantime_secs")]
    pub ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalCacheConfig {
    #[serde(with = "humantime_secs")]
    pub ttl: Duration,
    pub capacity: u64,
    pub max_memory_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dsn: String,
    pub max_conn: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub writers: Vec<LogWriter>,
    pub file: LogFileConfig,
    pub format: LogFormat,
    pub level: String,
    pub add_source: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogWriter {
    Console,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFileConfig {
    pub path: String,
    pub max_age_days: u32,
    pub max_backups: u32,
    pub compress: bool,
    pub max_size_mb: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port: 8080,
            domain: "http://localhost:8080".to_string(),
            readonly: false,
            debug: false,
            request_timeout: Duration::from_secs(5),
            global_rate_limit_key: "turlsvc:write".to_string(),
            global_write_rate: 100.0,
            global_write_burst: 50,
            stand_alone_read_rate: 1000.0,
            stand_alone_read_burst: 200,
            sequence: SequenceConfig::default(),
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            step: 1000,
            seq_name: "tiny_url".to_string(),
            start_num: 100_000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            local_cache: LocalCacheConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: vec!["127.0.0.1:6379".to_string()],
            dial_timeout: Duration::from_secs(1),
            max_conn: 16,
            ttl: Duration::from_secs(24 * 3600),
        }
    }
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            capacity: 100_000,
            max_memory_mb: 128,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dsn: "sqlite::memory:".to_string(),
            max_conn: 8,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            writers: vec![LogWriter::Console],
            file: LogFileConfig::default(),
            format: LogFormat::Text,
            level: "info".to_string(),
            add_source: false,
        }
    }
}

impl Default for LogFileConfig {
    fn default() -> Self {
        Self {
            path: "turlsvc.log".to_string(),
            max_age_days: 7,
            max_backups: 5,
            compress: true,
            max_size_mb: 100,
        }
    }
}

impl Config {
    /// Load a YAML file, then overlay `URLSVC_`-prefixed environment variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config: Config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| Error::internal(format!("reading {}: {e}", path.display())))?;
            serde_yaml::from_str(&raw)
                .map_err(|e| Error::internal(format!("parsing {}: {e}", path.display())))?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("URLSVC_LISTEN") {
            self.listen = v;
        }
        if let Ok(v) = std::env::var("URLSVC_PORT") {
            if let Ok(p) = v.parse() {
                self.port = p;
            }
        }
        if let Ok(v) = std::env::var("URLSVC_DOMAIN") {
            self.domain = v;
        }
        if let Ok(v) = std::env::var("URLSVC_READONLY") {
            self.readonly = v.parse().unwrap_or(self.readonly);
        }
        if let Ok(v) = std::env::var("URLSVC_DEBUG") {
            self.debug = v.parse().unwrap_or(self.debug);
        }
        if let Ok(v) = std::env::var("URLSVC_STORE_DSN") {
            self.store.dsn = v;
        }
        if let Ok(v) = std::env::var("URLSVC_REDIS_ADDR") {
            self.cache.redis.addr = v.split(',').map(str::to_string).collect();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::invalid_input("port must be nonzero"));
        }
        if self.global_write_rate <= 0.0 || self.stand_alone_read_rate <= 0.0 {
            return Err(Error::invalid_input("rate limiter rates must be positive"));
        }
        if self.global_write_burst == 0 || self.stand_alone_read_burst == 0 {
            return Err(Error::invalid_input("rate limiter bursts must be at least 1"));
        }
        if self.sequence.step == 0 {
            return Err(Error::invalid_input("sequence.step must be nonzero"));
        }
        if self.store.dsn.is_empty() {
            return Err(Error::invalid_input("store.dsn must not be empty"));
        }
        if self.store.max_conn == 0 || self.cache.redis.max_conn == 0 {
            return Err(Error::invalid_input("max_conn fields must be at least 1"));
        }
        if self.cache.local_cache.capacity == 0 || self.cache.local_cache.max_memory_mb == 0 {
            return Err(Error::invalid_input(
                "local_cache.capacity and local_cache.max_memory_mb must be at least 1",
            ));
        }
        Ok(())
    }
}

/// (De)serialize a `Duration` as whole seconds, matching the plain-integer
/// TTL fields used throughout the YAML configuration.
mod humantime_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_port_rejected() {
        let mut c = Config::default();
        c.port = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let c = Config::load("/nonexistent/path/turlsvc.yaml").unwrap();
        assert_eq!(c.port, 8080);
    }
}
