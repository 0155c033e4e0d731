//! Config schema types (server, database, metrics).

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimetableConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub metrics: MetricsConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite:timetable.db?mode=rwc`.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:timetable.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

/// How requests that match no route are labeled in HTTP metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedRoutes {
    /// A single `unmatched` label for every such request.
    #[default]
    Collapse,
    /// The raw path with numeric and UUID segments replaced by `{id}`.
    Normalize,
    /// The raw path. Label cardinality grows with the set of requested paths.
    RawPath,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled.
    pub enabled: bool,
    /// Path of the scrape endpoint.
    pub path: String,
    pub unmatched_routes: UnmatchedRoutes,
    /// Maximum number of entries held by the schedule cache.
    pub schedule_cache_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".into(),
            unmatched_routes: UnmatchedRoutes::default(),
            schedule_cache_capacity: 256,
        }
    }
}
