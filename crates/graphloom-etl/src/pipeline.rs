//! Run orchestration: snapshot, extract, generate, resolve, sink, load.
//!
//! Every phase after the configuration snapshot folds per-item outcomes
//! (tables, mappings, statements) instead of aborting. Only control database
//! failures abort a run; the run record is still closed `failed` when the
//! control database allows it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use graphloom_core::config::EtlConfig;
use graphloom_core::{RunStatus, ScriptRecord, SourceDatabase, TableStatus};
use graphloom_graph::GraphStore;

use crate::audit::{AuditRecorder, AuditStore, RunRecord, TableClose, TableRecord};
use crate::control::{ConfigSnapshot, ControlStore};
use crate::error::{EtlError, Result};
use crate::extract::{ExtractedTable, RowExtractor};
use crate::loader::{GraphLoader, LoadReport};
use crate::nodes::{generate_nodes, NodeSection};
use crate::relationships::{resolve_all, IndexKey, RowIndex};
use crate::sink::{read_script, ScriptWriter, StatementSink};
use crate::source::SourceConnector;

/// Where generated statements go after the script is written.
pub enum GraphTarget {
    /// Stop after writing the script.
    Skip,
    Store(Arc<dyn GraphStore>),
    /// The graph store could not be reached; the run ends failed.
    Unreachable(String),
}

/// What one run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub run: RunRecord,
    pub node_statements: usize,
    pub relationship_statements: usize,
    pub mapping_failures: Vec<EtlError>,
    pub script: Option<ScriptRecord>,
    pub load: Option<LoadReport>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.run.status == RunStatus::Completed
    }
}

pub struct Pipeline {
    control: Arc<dyn ControlStore>,
    audit: Arc<AuditRecorder>,
    connector: Arc<dyn SourceConnector>,
    writer: ScriptWriter,
    config: EtlConfig,
}

impl Pipeline {
    pub fn new(
        control: Arc<dyn ControlStore>,
        audit: Arc<dyn AuditStore>,
        connector: Arc<dyn SourceConnector>,
        config: EtlConfig,
    ) -> Self {
        Self {
            control,
            audit: Arc::new(AuditRecorder::new(audit)),
            connector,
            writer: ScriptWriter::new(&config.output_dir, &config.script_prefix),
            config,
        }
    }

    /// Execute one full run.
    ///
    /// Fails if the configuration snapshot cannot be read or the control
    /// database rejects an audit write; everything else is reported through
    /// the run and table records.
    pub async fn run(&self, graph: GraphTarget) -> Result<RunSummary> {
        let snapshot = Arc::new(self.control.load_snapshot().await?);
        let mut run = self.audit.open_run().await?;

        let outputs = self.extract_sources(snapshot.clone(), run.run_id()).await;
        let mut audit_failure = None;

        let mut sink = StatementSink::new();
        let mut index = RowIndex::new();
        for output in outputs {
            run.record(output.records);
            if audit_failure.is_none() {
                audit_failure = output.audit_failure;
            }
            for section in output.nodes {
                sink.push_nodes(section);
            }
            for retained in output.retained {
                for key in retained.keys {
                    index.add_table(key, &retained.table.columns, retained.table.rows.clone());
                }
            }
        }

        if let Some(e) = audit_failure {
            if let Err(close) = self.audit.close_run(run, RunStatus::Failed).await {
                tracing::error!(error = %close, "Run log left open");
            }
            return Err(e);
        }

        let resolution = resolve_all(snapshot.list_active_relationship_mappings(), &index);
        for section in resolution.sections {
            sink.push_relationships(section);
        }
        let node_statements = sink.node_count();
        let relationship_statements = sink.relationship_count();
        tracing::info!(
            run_id = run.run_id(),
            nodes = node_statements,
            relationships = relationship_statements,
            failed_mappings = resolution.failures.len(),
            "Generated statements"
        );

        let script = self.write_script(&sink).await;
        let statements = sink.rendered();

        let (status, load) = match graph {
            GraphTarget::Skip => (RunStatus::Completed, None),
            GraphTarget::Unreachable(message) => {
                tracing::error!(error = %message, "Graph store unreachable, skipping load");
                (RunStatus::Failed, None)
            }
            GraphTarget::Store(store) => {
                let loader = GraphLoader::new(store, self.config.progress_interval);
                match loader.load(&statements, self.config.clear_first).await {
                    Ok(report) => {
                        self.mark_loaded(script.as_ref()).await;
                        (RunStatus::Completed, Some(report))
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Load phase failed");
                        (RunStatus::Failed, None)
                    }
                }
            }
        };

        let run = self.audit.close_run(run, status).await?;
        Ok(RunSummary {
            run,
            node_statements,
            relationship_statements,
            mapping_failures: resolution.failures,
            script,
            load,
        })
    }

    /// Load the most recently registered script without extracting.
    pub async fn load_latest(&self, graph: Arc<dyn GraphStore>) -> Result<LoadReport> {
        let script = self.control.latest_script().await?.ok_or_else(|| {
            EtlError::Configuration("no generated script is registered".to_string())
        })?;
        tracing::info!(script = %script.script_name, path = %script.file_path, "Loading registered script");

        let statements = read_script(&script.file_path).await?;
        let report = GraphLoader::new(graph, self.config.progress_interval)
            .load(&statements, self.config.clear_first)
            .await?;
        self.mark_loaded(Some(&script)).await;
        Ok(report)
    }

    async fn extract_sources(&self, snapshot: Arc<ConfigSnapshot>, run_id: i64) -> Vec<SourceOutput> {
        let task = SourceTask {
            snapshot: snapshot.clone(),
            audit: self.audit.clone(),
            control: self.control.clone(),
            connector: self.connector.clone(),
            run_id,
        };
        let sources = snapshot.list_active_sources().to_vec();

        if self.config.max_concurrent_sources <= 1 {
            let mut outputs = Vec::with_capacity(sources.len());
            for (ordinal, source) in sources.into_iter().enumerate() {
                outputs.push(task.process(ordinal, source).await);
            }
            return outputs;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_sources));
        let mut set = JoinSet::new();
        for (ordinal, source) in sources.into_iter().enumerate() {
            let task = task.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                task.process(ordinal, source).await
            });
        }

        let mut outputs = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(output) => outputs.push(output),
                Err(e) => tracing::error!(error = %e, "Source extraction task panicked"),
            }
        }
        outputs.sort_by_key(|o| o.ordinal);
        outputs
    }

    /// Write and register the script. Neither failure stops the run.
    async fn write_script(&self, sink: &StatementSink) -> Option<ScriptRecord> {
        let now = Utc::now();
        let text = sink.render_script(now);
        let mut record = match self.writer.write(&text, now).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, "Failed to write Cypher script");
                return None;
            }
        };
        match self.control.register_script(&record).await {
            Ok(id) => record.script_id = Some(id),
            Err(e) => tracing::error!(error = %e, script = %record.script_name, "Failed to register Cypher script"),
        }
        Some(record)
    }

    async fn mark_loaded(&self, script: Option<&ScriptRecord>) {
        let Some(id) = script.and_then(|s| s.script_id) else {
            return;
        };
        if let Err(e) = self.control.mark_script_run(id).await {
            tracing::warn!(script_id = id, error = %e, "Failed to stamp script run time");
        }
    }
}

/// Rows kept for the relationship index, with the keys they are filed under.
struct RetainedTable {
    keys: Vec<IndexKey>,
    table: ExtractedTable,
}

struct SourceOutput {
    ordinal: usize,
    nodes: Vec<NodeSection>,
    retained: Vec<RetainedTable>,
    records: Vec<TableRecord>,
    /// A control database write failed; the source stopped there.
    audit_failure: Option<EtlError>,
}

/// Everything one source needs, owned so it can run on its own task.
#[derive(Clone)]
struct SourceTask {
    snapshot: Arc<ConfigSnapshot>,
    audit: Arc<AuditRecorder>,
    control: Arc<dyn ControlStore>,
    connector: Arc<dyn SourceConnector>,
    run_id: i64,
}

impl SourceTask {
    async fn process(&self, ordinal: usize, source: SourceDatabase) -> SourceOutput {
        let mut output = SourceOutput {
            ordinal,
            nodes: Vec::new(),
            retained: Vec::new(),
            records: Vec::new(),
            audit_failure: None,
        };
        tracing::info!(source = %source.source_name, source_id = source.source_id, "Processing source");
        if let Err(e) = self.extract_source(&source, &mut output).await {
            tracing::error!(source = %source.source_name, error = %e, "Audit write failed, abandoning source");
            output.audit_failure = Some(e);
        }
        output
    }

    /// Extract every mapped table of one source. Source and table failures
    /// are recorded in `output`; only audit write failures are returned.
    async fn extract_source(&self, source: &SourceDatabase, output: &mut SourceOutput) -> Result<()> {
        let reader = match self.connector.connect(source).await {
            Ok(reader) => reader,
            Err(e) => {
                tracing::error!(source = %source.source_name, error = %e, "Source unreachable");
                output.records.push(self.fail_source(source, &e).await?);
                return Ok(());
            }
        };
        if let Err(e) = self.control.touch_source(source.source_id).await {
            tracing::warn!(source = %source.source_name, error = %e, "Failed to stamp source access");
        }

        let tables = match reader.list_tables().await {
            Ok(tables) => tables,
            Err(e) => {
                tracing::error!(source = %source.source_name, error = %e, "Table discovery failed");
                reader.close().await;
                output.records.push(self.fail_source(source, &e).await?);
                return Ok(());
            }
        };
        tracing::info!(source = %source.source_name, tables = tables.len(), "Discovered tables");

        let extractor = RowExtractor::new(reader.as_ref(), source);
        let mut outcome = Ok(());
        for table in tables {
            outcome = self.extract_table(&extractor, source, table, output).await;
            if outcome.is_err() {
                break;
            }
        }
        reader.close().await;
        outcome
    }

    async fn extract_table(
        &self,
        extractor: &RowExtractor<'_>,
        source: &SourceDatabase,
        table: String,
        output: &mut SourceOutput,
    ) -> Result<()> {
        let label = self.snapshot.resolve_label(&table);
        let junction = self.snapshot.is_junction_table(&table);
        if label.is_none() && !junction {
            tracing::debug!(source = %source.source_name, table = %table, "No label mapping, skipping");
            return Ok(());
        }

        let audit = self.audit.open_table(self.run_id, source.source_id, &table).await?;
        let excluded = self.snapshot.list_exclusion_rules(source.source_id, &table);
        let close = match extractor.extract(&table, excluded).await {
            Ok(extracted) => {
                let rows_processed = i64::try_from(extracted.rows.len()).unwrap_or(i64::MAX);
                if let Some(label) = label {
                    output.nodes.push(generate_nodes(&extracted, label));
                }
                if self.snapshot.is_needed_for_relationships(&table) {
                    let mut keys = Vec::new();
                    if let Some(label) = label {
                        keys.push(IndexKey::Label(label.to_string()));
                    }
                    if junction {
                        keys.push(IndexKey::Table(table.clone()));
                    }
                    output.retained.push(RetainedTable {
                        keys,
                        table: extracted,
                    });
                }
                TableClose {
                    status: TableStatus::Success,
                    rows_processed,
                    error_message: None,
                }
            }
            Err(e) => {
                tracing::warn!(source = %source.source_name, table = %table, error = %e, "Table extraction failed");
                TableClose {
                    status: TableStatus::Failed,
                    rows_processed: 0,
                    error_message: Some(e.to_string()),
                }
            }
        };
        output.records.push(self.audit.close_table(audit, close).await?);
        Ok(())
    }

    /// A single failed table log standing in for every table of the source.
    async fn fail_source(&self, source: &SourceDatabase, error: &EtlError) -> Result<TableRecord> {
        let audit = self.audit.open_table(self.run_id, source.source_id, "*").await?;
        self.audit
            .close_table(
                audit,
                TableClose {
                    status: TableStatus::Failed,
                    rows_processed: 0,
                    error_message: Some(error.to_string()),
                },
            )
            .await
    }
}
