mod common;
use _notebase_core::base;
use _notebase_core::config::EngineConfig;
use _notebase_core::filter::unrecognized_warning;
use _notebase_core::query::{self, QueryRequest, QuerySource};
use _notebase_core::snapshot::SnapshotCache;
use common::{setup_operator, write_note, VAULT};
use opendal::Operator;
use serde_json::json;

const TASKS: &str = r#"
filters: "file.inFolder('Tasks')"
properties:
  status:
    displayName: Status
formulas:
  label: "if(priority, 'has-priority', 'none')"
views:
  - name: Open
    limit: 2
    order: ["-priority"]
    filters:
      and:
        - "status != 'done'"
  - name: All
"#;

async fn seed(op: &Operator) -> anyhow::Result<()> {
    base::write_base_config(op, VAULT, "Tasks", TASKS).await?;
    let notes = [
        ("Tasks/a.md", "open", 1),
        ("Tasks/b.md", "done", 5),
        ("Tasks/c.md", "open", 3),
        ("Tasks/d.md", "blocked", 3),
        ("Tasks/e.md", "open", 0),
    ];
    for (path, status, priority) in notes {
        write_note(
            op,
            path,
            &format!("---\nstatus: {}\npriority: {}\n---\n", status, priority),
        )
        .await?;
    }
    write_note(op, "Inbox/x.md", "---\nstatus: open\npriority: 9\n---\n").await?;
    Ok(())
}

fn request(value: serde_json::Value) -> QueryRequest {
    serde_json::from_value(value).unwrap()
}

fn paths(response: &query::QueryResponse) -> Vec<String> {
    response.rows.iter().map(|r| r.file.path.clone()).collect()
}

#[tokio::test]
async fn test_view_round_trip_with_evaluate() -> anyhow::Result<()> {
    let op = setup_operator()?;
    seed(&op).await?;
    let cache = SnapshotCache::new();
    let config = EngineConfig::default();

    let response = query::query(
        &op,
        VAULT,
        &cache,
        &config,
        "Tasks",
        &request(json!({"view": "Open", "evaluate": true})),
    )
    .await?;

    assert_eq!(response.view.as_deref(), Some("Open"));
    assert_eq!(response.total, 4);
    assert_eq!(response.limit, 2);
    assert_eq!(response.page, 1);
    assert_eq!(response.source, QuerySource::Fallback);
    assert!(response.evaluate);
    assert!(response.warnings.is_empty());
    assert_eq!(paths(&response), vec!["Tasks/c.md", "Tasks/d.md"]);

    let row = &response.rows[0];
    assert_eq!(row.file.name, "c.md");
    assert_eq!(row.props.get("status"), Some(&json!("open")));
    assert_eq!(row.props.get("formula.label"), Some(&json!("has-priority")));
    let computed = row.computed.as_ref().expect("computed map");
    assert_eq!(computed.get("label"), Some(&json!("has-priority")));
    assert!(cache.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_without_evaluate_rows_have_no_computed_map() -> anyhow::Result<()> {
    let op = setup_operator()?;
    seed(&op).await?;
    let response = query::query(
        &op,
        VAULT,
        &SnapshotCache::new(),
        &EngineConfig::default(),
        "Tasks",
        &request(json!({"view": "All"})),
    )
    .await?;
    assert_eq!(response.total, 5);
    assert_eq!(response.limit, 20);
    assert!(response.rows.iter().all(|r| r.computed.is_none()));
    assert!(!paths(&response).contains(&"Inbox/x.md".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_pages_concatenate_to_full_list() -> anyhow::Result<()> {
    let op = setup_operator()?;
    seed(&op).await?;
    let cache = SnapshotCache::new();
    let config = EngineConfig::default();

    let full = query::query(
        &op,
        VAULT,
        &cache,
        &config,
        "Tasks",
        &request(json!({"view": "All", "sort": ["priority"], "limit": 500})),
    )
    .await?;

    let mut collected = Vec::new();
    for page in 1..=3 {
        let response = query::query(
            &op,
            VAULT,
            &cache,
            &config,
            "Tasks",
            &request(json!({"view": "All", "sort": ["priority"], "limit": 2, "page": page})),
        )
        .await?;
        assert_eq!(response.total, 5);
        collected.extend(paths(&response));
    }
    assert_eq!(collected, paths(&full));

    let past_end = query::query(
        &op,
        VAULT,
        &cache,
        &config,
        "Tasks",
        &request(json!({"view": "All", "limit": 2, "page": 4})),
    )
    .await?;
    assert!(past_end.rows.is_empty());
    assert_eq!(past_end.total, 5);
    Ok(())
}

#[tokio::test]
async fn test_sort_is_stable_and_request_sort_wins() -> anyhow::Result<()> {
    let op = setup_operator()?;
    seed(&op).await?;
    let cache = SnapshotCache::new();
    let config = EngineConfig::default();

    let response = query::query(
        &op,
        VAULT,
        &cache,
        &config,
        "Tasks",
        &request(json!({"view": "All", "sort": ["-priority"]})),
    )
    .await?;
    assert_eq!(
        paths(&response),
        vec!["Tasks/b.md", "Tasks/c.md", "Tasks/d.md", "Tasks/a.md", "Tasks/e.md"]
    );

    let response = query::query(
        &op,
        VAULT,
        &cache,
        &config,
        "Tasks",
        &request(json!({
            "view": "Open",
            "limit": 10,
            "sort": [{"key": "status", "dir": "desc"}, {"property": "priority"}]
        })),
    )
    .await?;
    assert_eq!(
        paths(&response),
        vec!["Tasks/e.md", "Tasks/a.md", "Tasks/c.md", "Tasks/d.md"]
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_view_and_limit_clamping() -> anyhow::Result<()> {
    let op = setup_operator()?;
    seed(&op).await?;
    let cache = SnapshotCache::new();
    let config = EngineConfig::default();

    let response = query::query(
        &op,
        VAULT,
        &cache,
        &config,
        "Tasks",
        &request(json!({"view": "Nope", "limit": 0, "page": -3})),
    )
    .await?;
    assert!(response.view.is_none());
    assert_eq!(response.total, 5);
    assert_eq!(response.limit, 1);
    assert_eq!(response.page, 1);
    assert_eq!(paths(&response), vec!["Tasks/a.md"]);

    let response = query::query(
        &op,
        VAULT,
        &cache,
        &config,
        "Tasks",
        &request(json!({"limit": 100000, "page": 5_000_000})),
    )
    .await?;
    assert_eq!(response.limit, 500);
    assert_eq!(response.page, 1_000_000);
    assert_eq!(response.view.as_deref(), Some("Open"));
    Ok(())
}

#[tokio::test]
async fn test_huge_view_limit_clamps_to_max() -> anyhow::Result<()> {
    let op = setup_operator()?;
    seed(&op).await?;
    base::write_base_config(
        &op,
        VAULT,
        "Everything",
        "views:\n  - name: Huge\n    limit: 18446744073709551615\n",
    )
    .await?;
    let cache = SnapshotCache::new();
    let config = EngineConfig::default();

    let response = query::query(&op, VAULT, &cache, &config, "Everything", &QueryRequest::default()).await?;
    assert_eq!(response.view.as_deref(), Some("Huge"));
    assert_eq!(response.limit, 500);
    assert_eq!(response.total, 6);
    assert_eq!(response.rows.len(), 6);
    Ok(())
}

#[tokio::test]
async fn test_request_filter_is_anded_and_warnings_are_deduplicated() -> anyhow::Result<()> {
    let op = setup_operator()?;
    seed(&op).await?;
    let response = query::query(
        &op,
        VAULT,
        &SnapshotCache::new(),
        &EngineConfig::default(),
        "Tasks",
        &request(json!({"view": "All", "filter": {"and": ["priority >= 3", "%%"]}})),
    )
    .await?;
    assert_eq!(paths(&response), vec!["Tasks/b.md", "Tasks/c.md", "Tasks/d.md"]);
    assert_eq!(response.warnings, vec![unrecognized_warning("%%")]);
    Ok(())
}

#[tokio::test]
async fn test_warning_cap_appends_notice() -> anyhow::Result<()> {
    let op = setup_operator()?;
    seed(&op).await?;
    let config = EngineConfig {
        max_warnings: 1,
        ..EngineConfig::default()
    };
    let response = query::query(
        &op,
        VAULT,
        &SnapshotCache::new(),
        &config,
        "Tasks",
        &request(json!({"view": "All", "filter": {"and": ["%%", "@@", "^^"]}})),
    )
    .await?;
    assert_eq!(response.total, 5);
    assert_eq!(response.warnings.len(), 2);
    assert_eq!(response.warnings[0], unrecognized_warning("%%"));
    assert!(response.warnings[1].starts_with("Warnings truncated"));
    Ok(())
}

#[tokio::test]
async fn test_live_engine_serves_snapshot() -> anyhow::Result<()> {
    let op = setup_operator()?;
    seed(&op).await?;
    let cache = SnapshotCache::new();
    let config = EngineConfig {
        live_engine: true,
        ..EngineConfig::default()
    };
    let open = request(json!({"view": "Open", "evaluate": true}));

    let first = query::query(&op, VAULT, &cache, &config, "Tasks", &open).await?;
    assert_eq!(first.source, QuerySource::Engine);
    assert_eq!(first.total, 4);
    assert_eq!(paths(&first), vec!["Tasks/c.md", "Tasks/d.md"]);
    assert_eq!(cache.keys(), vec!["Tasks.base"]);
    let snapshot = cache.get("Tasks").expect("snapshot populated");
    assert_eq!(snapshot.total, 4);
    assert!(snapshot.rows.iter().all(|r| r.computed.is_some()));

    // A pushed snapshot wins over freshly computed rows.
    let pushed = vec![snapshot.rows[3].clone()];
    cache.push("Tasks.base", pushed.clone());
    let second = query::query(&op, VAULT, &cache, &config, "/Tasks", &open).await?;
    assert_eq!(second.source, QuerySource::Engine);
    assert_eq!(second.total, 1);
    assert_eq!(second.rows, pushed);

    let plain = query::query(&op, VAULT, &cache, &config, "Tasks", &request(json!({"view": "Open"}))).await?;
    assert_eq!(plain.source, QuerySource::Fallback);
    assert_eq!(plain.total, 4);
    Ok(())
}

#[tokio::test]
async fn test_missing_base_is_not_found() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let err = query::query(
        &op,
        VAULT,
        &SnapshotCache::new(),
        &EngineConfig::default(),
        "Nope",
        &QueryRequest::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "not_found");
    Ok(())
}

#[tokio::test]
async fn test_evaluate_note_filter() -> anyhow::Result<()> {
    let op = setup_operator()?;
    seed(&op).await?;
    let filter = _notebase_core::FilterNode::from_value(&json!("formula.label = 'none'"));

    let outcome =
        query::evaluate_note_filter(&op, VAULT, "Tasks/e.md", filter.as_ref(), Some("Tasks")).await?;
    assert!(outcome.ok);

    let outcome = query::evaluate_note_filter(&op, VAULT, "Tasks/e.md", filter.as_ref(), None).await?;
    assert!(!outcome.ok);

    let err = query::evaluate_note_filter(&op, VAULT, "Tasks/zz.md", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
    Ok(())
}
