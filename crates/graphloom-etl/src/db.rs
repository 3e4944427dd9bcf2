//! PostgreSQL connection pools for the control database and the sources.

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use graphloom_core::config::DatabaseConfig;
use graphloom_core::SourceDatabase;

/// Create the control database pool.
pub async fn create_control_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database)
        .application_name("graphloom");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect_with(options)
        .await?;

    tracing::info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        max_connections = config.max_connections,
        "Control database pool created"
    );

    Ok(pool)
}

/// Open a small pool against one source database.
///
/// The connect is bounded by `connect_timeout` so a hung source fails its
/// own extraction instead of blocking the run.
pub async fn create_source_pool(
    source: &SourceDatabase,
    connect_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    let options = PgConnectOptions::new()
        .host(&source.host)
        .port(source.port)
        .username(&source.user)
        .password(&source.password)
        .database(&source.database)
        .application_name("graphloom");

    let connect = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(connect_timeout)
        .connect_with(options);

    match tokio::time::timeout(connect_timeout, connect).await {
        Ok(result) => result,
        Err(_) => Err(sqlx::Error::PoolTimedOut),
    }
}

/// Quote a PostgreSQL identifier.
pub fn quote_pg_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
