//! Configuration management for graphloom.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`GRAPHLOOM__` prefix, `__` separator)
//! 2. Config file (`graphloom.toml`)
//! 3. Defaults
//!
//! Missing or malformed required values are fatal at startup.

use std::fmt;

use serde::Deserialize;

use crate::error::GraphloomError;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub control_db: DatabaseConfig,
    pub neo4j: Neo4jConfig,
    #[serde(default)]
    pub etl: EtlConfig,
}

/// Connection parameters for the control database.
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,

    pub database: String,

    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .finish()
    }
}

/// Connection parameters for the Neo4j graph store.
#[derive(Clone, Deserialize)]
pub struct Neo4jConfig {
    pub uri: String,

    #[serde(default = "default_neo4j_user")]
    pub user: String,

    pub password: String,

    #[serde(default = "default_neo4j_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
}

impl fmt::Debug for Neo4jConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Neo4jConfig")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("fetch_size", &self.fetch_size)
            .finish()
    }
}

/// Pipeline behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct EtlConfig {
    /// Wipe the graph before loading.
    #[serde(default = "default_true")]
    pub clear_first: bool,

    /// Directory the generated script is written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// File name prefix of the generated script.
    #[serde(default = "default_script_prefix")]
    pub script_prefix: String,

    /// Bounded connect timeout for each source database.
    #[serde(default = "default_connect_timeout")]
    pub source_connect_timeout_secs: u64,

    /// Sources extracted concurrently (1 = sequential).
    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,

    /// Log loader progress every N statements.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

fn default_pg_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_neo4j_user() -> String {
    "neo4j".to_string()
}

fn default_neo4j_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> String {
    ".".to_string()
}

fn default_script_prefix() -> String {
    "graph_output".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_concurrent_sources() -> usize {
    1
}

fn default_progress_interval() -> usize {
    100
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            clear_first: default_true(),
            output_dir: default_output_dir(),
            script_prefix: default_script_prefix(),
            source_connect_timeout_secs: default_connect_timeout(),
            max_concurrent_sources: default_max_concurrent_sources(),
            progress_interval: default_progress_interval(),
        }
    }
}

impl AppConfig {
    /// Load from `<file_prefix>.toml` (optional) overlaid by `GRAPHLOOM__*`
    /// environment variables.
    pub fn load(file_prefix: &str) -> Result<Self, GraphloomError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("GRAPHLOOM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::from_config(cfg)
    }

    /// Deserialize and validate an already-built configuration.
    pub fn from_config(cfg: config::Config) -> Result<Self, GraphloomError> {
        let app: AppConfig = cfg.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// Reject values that would only fail later, mid-run.
    pub fn validate(&self) -> Result<(), GraphloomError> {
        let required = [
            ("control_db.host", self.control_db.host.as_str()),
            ("control_db.database", self.control_db.database.as_str()),
            ("control_db.user", self.control_db.user.as_str()),
            ("neo4j.uri", self.neo4j.uri.as_str()),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            return Err(GraphloomError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }
        if self.etl.max_concurrent_sources == 0 {
            return Err(GraphloomError::Config(
                "etl.max_concurrent_sources must be at least 1".to_string(),
            ));
        }
        if self.etl.script_prefix.trim().is_empty() {
            return Err(GraphloomError::Config(
                "etl.script_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<AppConfig, GraphloomError> {
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        AppConfig::from_config(cfg)
    }

    const MINIMAL: &str = r#"
        [control_db]
        host = "localhost"
        database = "control"
        user = "etl"
        password = "secret"

        [neo4j]
        uri = "bolt://localhost:7687"
        password = "graph-secret"
    "#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.control_db.port, 5432);
        assert_eq!(config.neo4j.user, "neo4j");
        assert!(config.etl.clear_first);
        assert_eq!(config.etl.max_concurrent_sources, 1);
        assert_eq!(config.etl.script_prefix, "graph_output");
        assert_eq!(config.etl.progress_interval, 100);
    }

    #[test]
    fn test_missing_section_is_fatal() {
        let err = parse("[neo4j]\nuri = \"bolt://x\"\npassword = \"p\"\n").unwrap_err();
        assert!(matches!(err, GraphloomError::Config(_)));
    }

    #[test]
    fn test_blank_required_value_is_fatal() {
        let toml = MINIMAL.replace("host = \"localhost\"", "host = \"\"");
        let err = parse(&toml).unwrap_err();
        assert!(err.to_string().contains("control_db.host"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let toml = format!("{MINIMAL}\n[etl]\nmax_concurrent_sources = 0\n");
        assert!(parse(&toml).is_err());
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let config = parse(MINIMAL).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
    }
}
