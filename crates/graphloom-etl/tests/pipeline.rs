//! End-to-end pipeline runs against in-memory control, source and graph
//! stores.

mod common;

use std::sync::Arc;

use serde_json::json;

use graphloom_core::config::EtlConfig;
use graphloom_core::{RunStatus, TableStatus};
use graphloom_etl::sink::parse_script;
use graphloom_etl::{GraphTarget, Pipeline};

use common::{
    exclude, label, mapping, source, DownGraph, MemoryAudit, MemoryControl, MemoryGraph,
    MemorySources, MemoryTable,
};

fn identity_tables() -> Vec<(&'static str, MemoryTable)> {
    vec![
        (
            "accounts",
            MemoryTable::new(
                &["account_id", "email", "hashed_password"],
                &["account_id"],
                vec![json!({"account_id": "A1", "email": "a1@example.com", "hashed_password": "pbkdf2-secret"})],
            ),
        ),
        (
            "audit_trail",
            MemoryTable::new(
                &["event_id", "detail"],
                &["event_id"],
                vec![json!({"event_id": 1, "detail": "login"})],
            ),
        ),
    ]
}

fn billing_tables() -> Vec<(&'static str, MemoryTable)> {
    vec![(
        "payment_methods",
        MemoryTable::new(
            &["payment_method_id", "account_id", "kind"],
            &["payment_method_id"],
            vec![json!({"payment_method_id": 10, "account_id": "A1", "kind": "card"})],
        ),
    )]
}

fn control() -> MemoryControl {
    MemoryControl {
        sources: vec![source(1, "identity"), source(2, "billing")],
        exclusions: vec![exclude(1, "accounts", "hashed_password")],
        labels: vec![
            label("accounts", "Account"),
            label("payment_methods", "PaymentMethod"),
        ],
        relationships: vec![mapping(
            1,
            "HAS_PAYMENT_METHOD",
            "Account",
            "PaymentMethod",
            "a.account_id = pm.account_id",
        )],
        ..Default::default()
    }
}

fn sources() -> MemorySources {
    MemorySources::default()
        .with_database("identity", identity_tables())
        .with_database("billing", billing_tables())
}

fn etl_config(dir: &tempfile::TempDir) -> EtlConfig {
    EtlConfig {
        output_dir: dir.path().display().to_string(),
        ..EtlConfig::default()
    }
}

struct Harness {
    control: Arc<MemoryControl>,
    audit: Arc<MemoryAudit>,
    pipeline: Pipeline,
}

fn harness(control: MemoryControl, sources: MemorySources, config: EtlConfig) -> Harness {
    harness_with_audit(control, sources, config, MemoryAudit::default())
}

fn harness_with_audit(
    control: MemoryControl,
    sources: MemorySources,
    config: EtlConfig,
    audit: MemoryAudit,
) -> Harness {
    let control = Arc::new(control);
    let audit = Arc::new(audit);
    let pipeline = Pipeline::new(control.clone(), audit.clone(), Arc::new(sources), config);
    Harness {
        control,
        audit,
        pipeline,
    }
}

#[tokio::test]
async fn test_account_payment_method_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(control(), sources(), etl_config(&dir));
    let graph = Arc::new(MemoryGraph::default());

    let summary = h
        .pipeline
        .run(GraphTarget::Store(graph.clone()))
        .await
        .unwrap();

    assert!(summary.succeeded());
    assert_eq!(summary.node_statements, 2);
    assert_eq!(summary.relationship_statements, 1);
    assert!(summary.mapping_failures.is_empty());

    let load = summary.load.expect("load report");
    assert_eq!(load.failed(), 0);
    let counts = load.counts.expect("counts");
    assert_eq!(counts.nodes.get("Account"), Some(&1));
    assert_eq!(counts.nodes.get("PaymentMethod"), Some(&1));
    assert_eq!(counts.relationships.get("HAS_PAYMENT_METHOD"), Some(&1));

    assert_eq!(h.audit.last_run_status(), Some(RunStatus::Completed));
    assert_eq!(*h.control.touched.lock().unwrap(), vec![1, 2]);

    let script = summary.script.expect("script written");
    assert_eq!(script.script_id, Some(1));
    assert_eq!(*h.control.script_runs.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn test_excluded_column_never_reaches_the_graph() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(control(), sources(), etl_config(&dir));
    let graph = Arc::new(MemoryGraph::default());

    let summary = h
        .pipeline
        .run(GraphTarget::Store(graph.clone()))
        .await
        .unwrap();

    let account = graph.node_statement("Account", "A1").expect("account node");
    assert!(account.contains("a1@example.com"));
    assert!(!account.contains("hashed_password"));

    let executed = graph.executed.lock().unwrap().clone();
    assert!(executed.iter().all(|s| !s.contains("pbkdf2-secret")));

    let text = std::fs::read_to_string(summary.script.unwrap().file_path).unwrap();
    assert!(!text.contains("hashed_password"));
    assert!(!text.contains("pbkdf2-secret"));
}

#[tokio::test]
async fn test_unmapped_tables_are_skipped_without_a_log() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(control(), sources(), etl_config(&dir));

    let summary = h.pipeline.run(GraphTarget::Skip).await.unwrap();

    let logged: Vec<String> = h
        .audit
        .closed_tables()
        .into_iter()
        .map(|(_, table, _)| table)
        .collect();
    assert_eq!(logged, vec!["accounts", "payment_methods"]);
    assert_eq!(summary.run.failed_tables().count(), 0);
    assert!(summary
        .run
        .tables
        .iter()
        .all(|t| t.status == TableStatus::Success && t.rows_processed == 1));
}

#[tokio::test]
async fn test_unreachable_source_fails_only_its_tables() {
    let dir = tempfile::tempdir().unwrap();
    let sources = MemorySources::default()
        .with_database("identity", identity_tables())
        .with_unreachable("billing");
    let h = harness(control(), sources, etl_config(&dir));
    let graph = Arc::new(MemoryGraph::default());

    let summary = h
        .pipeline
        .run(GraphTarget::Store(graph.clone()))
        .await
        .unwrap();

    assert_eq!(summary.run.status, RunStatus::Completed);
    let closed = h.audit.closed_tables();
    let accounts = closed.iter().find(|(_, t, _)| t == "accounts").unwrap();
    assert_eq!(accounts.2.status, TableStatus::Success);
    let billing = closed.iter().find(|(id, _, _)| *id == 2).unwrap();
    assert_eq!(billing.1, "*");
    assert_eq!(billing.2.status, TableStatus::Failed);
    let message = billing.2.error_message.as_deref().unwrap();
    assert!(message.contains("connection refused"));
    assert!(!message.contains("s3cret"));

    // No PaymentMethod rows, so the mapping fails but the run does not.
    assert_eq!(summary.mapping_failures.len(), 1);
    assert_eq!(summary.node_statements, 1);
}

#[tokio::test]
async fn test_two_clearing_runs_give_identical_counts() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(control(), sources(), etl_config(&dir));
    let graph = Arc::new(MemoryGraph::default());

    let first = h
        .pipeline
        .run(GraphTarget::Store(graph.clone()))
        .await
        .unwrap();
    let second = h
        .pipeline
        .run(GraphTarget::Store(graph.clone()))
        .await
        .unwrap();

    assert_eq!(*graph.clears.lock().unwrap(), 2);
    assert_eq!(
        first.load.unwrap().counts.unwrap(),
        second.load.unwrap().counts.unwrap()
    );
}

#[tokio::test]
async fn test_unreachable_graph_fails_run_but_keeps_script() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(control(), sources(), etl_config(&dir));

    let summary = h
        .pipeline
        .run(GraphTarget::Unreachable("connection refused".to_string()))
        .await
        .unwrap();

    assert_eq!(summary.run.status, RunStatus::Failed);
    assert!(summary.load.is_none());
    let script = summary.script.expect("script still written");
    assert!(std::path::Path::new(&script.file_path).exists());
    assert!(h.control.script_runs.lock().unwrap().is_empty());
    assert_eq!(h.audit.last_run_status(), Some(RunStatus::Failed));
}

#[tokio::test]
async fn test_failed_wipe_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(control(), sources(), etl_config(&dir));

    let summary = h
        .pipeline
        .run(GraphTarget::Store(Arc::new(DownGraph)))
        .await
        .unwrap();
    assert_eq!(summary.run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_concurrent_sources_keep_script_order() {
    let sequential_dir = tempfile::tempdir().unwrap();
    let sequential = harness(control(), sources(), etl_config(&sequential_dir));
    let concurrent_dir = tempfile::tempdir().unwrap();
    let concurrent = harness(
        control(),
        sources(),
        EtlConfig {
            max_concurrent_sources: 4,
            ..etl_config(&concurrent_dir)
        },
    );

    let a = sequential.pipeline.run(GraphTarget::Skip).await.unwrap();
    let b = concurrent.pipeline.run(GraphTarget::Skip).await.unwrap();

    let read = |path: &str| parse_script(&std::fs::read_to_string(path).unwrap());
    let a_statements = read(&a.script.unwrap().file_path);
    let b_statements = read(&b.script.unwrap().file_path);
    assert!(!a_statements.is_empty());
    assert_eq!(a_statements, b_statements);
    assert!(a_statements[1].contains(":Account"));
}

#[tokio::test]
async fn test_generate_then_load_latest() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(control(), sources(), etl_config(&dir));

    let summary = h.pipeline.run(GraphTarget::Skip).await.unwrap();
    assert!(summary.succeeded());
    assert!(summary.load.is_none());

    let graph = Arc::new(MemoryGraph::default());
    let report = h.pipeline.load_latest(graph.clone()).await.unwrap();
    assert_eq!(report.failed(), 0);
    let counts = report.counts.unwrap();
    assert_eq!(counts.total_nodes(), 2);
    assert_eq!(counts.total_relationships(), 1);
    assert_eq!(*h.control.script_runs.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn test_load_latest_without_script_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(control(), sources(), etl_config(&dir));
    let err = h
        .pipeline
        .load_latest(Arc::new(MemoryGraph::default()))
        .await
        .unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_junction_table_links_songs_to_tags() {
    let dir = tempfile::tempdir().unwrap();
    let mut tagged = mapping(
        1,
        "TAGGED",
        "Song",
        "Tag",
        "s.song_id = link.song_id AND link.tag_id = tag.tag_id",
    );
    tagged.junction_table = Some("song_tags".to_string());
    let control = MemoryControl {
        sources: vec![source(1, "music")],
        labels: vec![label("songs", "Song"), label("tags", "Tag")],
        relationships: vec![tagged],
        ..Default::default()
    };
    let sources = MemorySources::default().with_database(
        "music",
        vec![
            (
                "songs",
                MemoryTable::new(
                    &["song_id", "title"],
                    &["song_id"],
                    vec![json!({"song_id": 1, "title": "One"}), json!({"song_id": 2, "title": "Two"})],
                ),
            ),
            (
                "song_tags",
                MemoryTable::new(
                    &["song_id", "tag_id"],
                    &["song_id", "tag_id"],
                    vec![
                        json!({"song_id": 1, "tag_id": 7}),
                        json!({"song_id": 2, "tag_id": 7}),
                        json!({"song_id": 2, "tag_id": 8}),
                    ],
                ),
            ),
            (
                "tags",
                MemoryTable::new(
                    &["tag_id", "name"],
                    &["tag_id"],
                    vec![json!({"tag_id": 7, "name": "rock"}), json!({"tag_id": 8, "name": "jazz"})],
                ),
            ),
        ],
    );
    let h = harness(control, sources, etl_config(&dir));
    let graph = Arc::new(MemoryGraph::default());

    let summary = h
        .pipeline
        .run(GraphTarget::Store(graph.clone()))
        .await
        .unwrap();

    assert_eq!(summary.relationship_statements, 3);
    let counts = summary.load.unwrap().counts.unwrap();
    // The junction table is extracted for the join but yields no nodes.
    assert_eq!(counts.nodes.len(), 2);
    assert_eq!(counts.relationships.get("TAGGED"), Some(&3));
    assert!(summary.run.tables.iter().any(|t| t.table == "song_tags"));
}

#[tokio::test]
async fn test_failed_table_discovery_fails_only_that_source() {
    let dir = tempfile::tempdir().unwrap();
    let sources = MemorySources::default()
        .with_database("identity", identity_tables())
        .with_database("billing", billing_tables())
        .with_failing_discovery("billing");
    let h = harness(control(), sources, etl_config(&dir));

    let summary = h.pipeline.run(GraphTarget::Skip).await.unwrap();

    assert_eq!(summary.run.status, RunStatus::Completed);
    let closed = h.audit.closed_tables();
    assert_eq!(closed.len(), 2);
    let accounts = closed.iter().find(|(_, t, _)| t == "accounts").unwrap();
    assert_eq!(accounts.2.status, TableStatus::Success);
    let billing = closed.iter().find(|(id, _, _)| *id == 2).unwrap();
    assert_eq!(billing.1, "*");
    assert_eq!(billing.2.status, TableStatus::Failed);
    assert!(billing
        .2
        .error_message
        .as_deref()
        .unwrap()
        .contains("closed the connection"));
    assert_eq!(summary.node_statements, 1);
}

#[tokio::test]
async fn test_failed_table_read_spares_sibling_tables_and_sources() {
    let dir = tempfile::tempdir().unwrap();
    let mut control = control();
    control.labels.push(label("audit_trail", "AuditEvent"));
    let sources = MemorySources::default()
        .with_database("identity", identity_tables())
        .with_database("billing", billing_tables())
        .with_failing_read("identity", "audit_trail");
    let h = harness(control, sources, etl_config(&dir));
    let graph = Arc::new(MemoryGraph::default());

    let summary = h
        .pipeline
        .run(GraphTarget::Store(graph.clone()))
        .await
        .unwrap();

    assert_eq!(summary.run.status, RunStatus::Completed);
    let statuses: Vec<(String, TableStatus)> = h
        .audit
        .closed_tables()
        .into_iter()
        .map(|(_, table, close)| (table, close.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("accounts".to_string(), TableStatus::Success),
            ("audit_trail".to_string(), TableStatus::Failed),
            ("payment_methods".to_string(), TableStatus::Success),
        ]
    );
    let counts = summary.load.unwrap().counts.unwrap();
    assert_eq!(counts.nodes.get("AuditEvent"), None);
    assert_eq!(counts.relationships.get("HAS_PAYMENT_METHOD"), Some(&1));
}

#[tokio::test]
async fn test_keyless_tables_from_two_sources_stay_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let events = |detail: &str| {
        MemoryTable::new(&["detail"], &[], vec![json!({ "detail": detail })])
    };
    let control = MemoryControl {
        sources: vec![source(1, "identity"), source(2, "billing")],
        labels: vec![label("events", "Event")],
        ..Default::default()
    };
    let sources = MemorySources::default()
        .with_database("identity", vec![("events", events("login"))])
        .with_database("billing", vec![("events", events("charge"))]);
    let h = harness(control, sources, etl_config(&dir));
    let graph = Arc::new(MemoryGraph::default());

    let summary = h
        .pipeline
        .run(GraphTarget::Store(graph.clone()))
        .await
        .unwrap();

    assert_eq!(summary.node_statements, 2);
    let counts = summary.load.unwrap().counts.unwrap();
    assert_eq!(counts.nodes.get("Event"), Some(&2));
    assert!(graph.node_statement("Event", "identity.events#1").is_some());
    assert!(graph.node_statement("Event", "billing.events#1").is_some());
}

#[tokio::test]
async fn test_rejected_table_log_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let audit = MemoryAudit {
        reject_table_logs: true,
        ..Default::default()
    };
    let h = harness_with_audit(control(), sources(), etl_config(&dir), audit);
    let graph = Arc::new(MemoryGraph::default());

    let err = h
        .pipeline
        .run(GraphTarget::Store(graph.clone()))
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(h.audit.last_run_status(), Some(RunStatus::Failed));
    assert!(graph.executed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_run_close_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let audit = MemoryAudit {
        reject_run_close: true,
        ..Default::default()
    };
    let h = harness_with_audit(control(), sources(), etl_config(&dir), audit);

    let err = h.pipeline.run(GraphTarget::Skip).await.unwrap_err();

    assert!(err.to_string().contains("connection reset"));
    assert_eq!(h.audit.last_run_status(), Some(RunStatus::Running));
}
