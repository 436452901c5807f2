use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;

use crate::engine::{EnginePolicy, DEFAULT_BASE_PARTIES_PER_SLOT};

/// Server settings, read from `COVERS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub policy: EnginePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownTimeZone(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownTimeZone(tz) => write!(f, "unknown time zone: {tz}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable values fall back to their defaults, except the time zone.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tz = match lookup("COVERS_TIMEZONE") {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|_| ConfigError::UnknownTimeZone(name))?,
            None => Tz::UTC,
        };
        let fallback_capacity = match lookup("COVERS_FALLBACK_CAPACITY") {
            Some(s) if s.trim().eq_ignore_ascii_case("none") => None,
            Some(s) => Some(s.trim().parse().unwrap_or(DEFAULT_BASE_PARTIES_PER_SLOT)),
            None => Some(DEFAULT_BASE_PARTIES_PER_SLOT),
        };

        Ok(Self {
            bind: lookup("COVERS_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "COVERS_PORT").unwrap_or(5433),
            data_dir: PathBuf::from(lookup("COVERS_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections: parsed(&lookup, "COVERS_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "COVERS_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&lookup, "COVERS_METRICS_PORT"),
            policy: EnginePolicy {
                tz,
                fallback_capacity,
                serialize_admissions: parsed(&lookup, "COVERS_SERIALIZE_ADMISSIONS").unwrap_or(true),
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("covers.wal")
    }
}
