//! CLI entry point for the graphloom ETL.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use graphloom_core::config::AppConfig;
use graphloom_graph::{GraphClient, GraphConfig, GraphStore};

use graphloom_etl::control::PgControlStore;
use graphloom_etl::db::create_control_pool;
use graphloom_etl::source::PgSourceConnector;
use graphloom_etl::{GraphTarget, Pipeline};

#[derive(Parser)]
#[command(name = "graphloom")]
#[command(about = "Build a Neo4j graph from PostgreSQL sources described in a control database")]
struct Cli {
    /// Config file prefix (default: graphloom).
    #[arg(short, long, default_value = "graphloom", global = true)]
    config: String,

    /// Wipe the graph before loading (overrides etl.clear_first).
    #[arg(long, global = true, conflicts_with = "no_clear")]
    clear: bool,

    /// Keep existing graph data when loading.
    #[arg(long, global = true)]
    no_clear: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, generate the script, and load it.
    Run,
    /// Extract and write the script without loading.
    Generate,
    /// Load the most recently registered script.
    Load,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let mut app = AppConfig::load(&cli.config)?;
    if cli.clear {
        app.etl.clear_first = true;
    } else if cli.no_clear {
        app.etl.clear_first = false;
    }

    let pool = create_control_pool(&app.control_db).await?;
    let control = Arc::new(PgControlStore::new(pool));
    let connector = Arc::new(PgSourceConnector::new(Duration::from_secs(
        app.etl.source_connect_timeout_secs,
    )));
    let pipeline = Pipeline::new(control.clone(), control, connector, app.etl.clone());
    let graph_config = GraphConfig::from(&app.neo4j);

    match cli.command {
        Command::Load => {
            let graph: Arc<dyn GraphStore> = Arc::new(GraphClient::connect(&graph_config).await?);
            let report = pipeline.load_latest(graph).await?;
            tracing::info!(
                total = report.total,
                succeeded = report.succeeded,
                failed = report.failed(),
                "Loaded registered script"
            );
        }
        Command::Generate | Command::Run => {
            let target = if matches!(cli.command, Command::Generate) {
                GraphTarget::Skip
            } else {
                match GraphClient::connect(&graph_config).await {
                    Ok(client) => GraphTarget::Store(Arc::new(client)),
                    Err(e) => GraphTarget::Unreachable(e.to_string()),
                }
            };

            let summary = pipeline.run(target).await?;
            tracing::info!(
                run_id = summary.run.run_id,
                status = summary.run.status.as_str(),
                tables = summary.run.tables.len(),
                failed_tables = summary.run.failed_tables().count(),
                nodes = summary.node_statements,
                relationships = summary.relationship_statements,
                failed_mappings = summary.mapping_failures.len(),
                script = summary.script.as_ref().map(|s| s.script_name.as_str()),
                "Run finished"
            );
            println!("{}", serde_json::to_string_pretty(&summary.run)?);
            if !summary.succeeded() {
                anyhow::bail!("run {} ended {}", summary.run.run_id, summary.run.status.as_str());
            }
        }
    }

    Ok(())
}
