//! Runtime settings for the demo binary, read from the environment.
//! A `.env` file in the working directory is loaded first when present.

use std::env;
use std::path::PathBuf;

use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{name} must be a number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("cannot read aggregates file {path}: {source}")]
    AggregatesFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("aggregates file {path} is not valid JSON: {source}")]
    AggregatesJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// `host:port` contact points.
    pub nodes: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u32,
    pub page_size: i32,
    pub metrics_port: u16,
    /// Loose aggregate mapping, validated when the repository is built.
    pub aggregates: Value,
}

impl StoreSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        // ignore a missing .env
        let _ = dotenvy::dotenv();

        let nodes = env::var("SCYLLA_NODES")
            .unwrap_or_else(|_| "127.0.0.1:9042".to_string())
            .split(',')
            .map(str::trim)
            .filter(|node| !node.is_empty())
            .map(str::to_string)
            .collect();

        let aggregates = match env::var("EVENTSTORE_AGGREGATES") {
            Ok(path) => read_aggregates(PathBuf::from(path))?,
            Err(_) => default_aggregates(),
        };

        Ok(Self {
            nodes,
            keyspace: env::var("SCYLLA_KEYSPACE").unwrap_or_else(|_| "eventstore_ks".to_string()),
            replication_factor: number("SCYLLA_REPLICATION_FACTOR", 1)?,
            page_size: number("SCYLLA_PAGE_SIZE", 100)?,
            metrics_port: number("METRICS_PORT", 9090)?,
            aggregates,
        })
    }
}

fn number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, SettingsError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| SettingsError::InvalidNumber { name, value }),
        Err(_) => Ok(default),
    }
}

fn read_aggregates(path: PathBuf) -> Result<Value, SettingsError> {
    let raw = std::fs::read_to_string(&path).map_err(|source| SettingsError::AggregatesFile {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| SettingsError::AggregatesJson { path, source })
}

/// The `book` aggregate used by the demo.
pub fn default_aggregates() -> Value {
    json!({
        "book": { "tableName": "book_event", "aggregateIdField": "bookId" }
    })
}
