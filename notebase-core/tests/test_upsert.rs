mod common;
use _notebase_core::error::EngineError;
use _notebase_core::upsert::{upsert_batch, upsert_frontmatter, UpsertOperation};
use _notebase_core::vault;
use common::{setup_operator, write_note, VAULT};
use serde_json::json;

fn operation(value: serde_json::Value) -> UpsertOperation {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_upsert_sets_and_unsets_keys() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let before = write_note(&op, "Tasks/A.md", "---\nstatus: open\nowner: kim\n---\nBody\n").await?;

    let result = upsert_frontmatter(
        &op,
        VAULT,
        &operation(json!({
            "file": "Tasks/A",
            "set": {"status": "done", "priority": 2},
            "unset": ["owner"],
            "expected_mtime": before.mtime
        })),
    )
    .await?;

    assert!(result.ok);
    assert_eq!(result.file, "Tasks/A.md");
    assert_eq!(result.changed, vec!["status", "priority", "owner"]);
    let mtime = result.mtime.expect("mtime");
    assert!(mtime > before.mtime);

    let note = vault::get_note(&op, VAULT, "Tasks/A.md").await?;
    assert_eq!(note.mtime, mtime);
    assert_eq!(note.frontmatter.get("status"), Some(&json!("done")));
    assert_eq!(note.frontmatter.get("priority"), Some(&json!(2)));
    assert!(note.frontmatter.get("owner").is_none());
    assert!(vault::read_raw(&op, VAULT, "Tasks/A.md").await?.ends_with("---\nBody\n"));
    Ok(())
}

#[tokio::test]
async fn test_noop_upsert_keeps_mtime() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let before = write_note(&op, "A.md", "---\nstatus: open\n---\n").await?;
    let result = upsert_frontmatter(
        &op,
        VAULT,
        &operation(json!({"file": "A.md", "set": {"status": "open"}, "unset": ["missing"]})),
    )
    .await?;
    assert!(result.ok);
    assert!(result.changed.is_empty());
    assert_eq!(result.mtime, Some(before.mtime));
    Ok(())
}

#[tokio::test]
async fn test_stale_mtime_is_a_conflict() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let before = write_note(&op, "A.md", "---\nstatus: open\n---\n").await?;
    let err = upsert_frontmatter(
        &op,
        VAULT,
        &operation(json!({"file": "A.md", "set": {"status": "done"}, "expectedMtime": before.mtime - 1})),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::MtimeConflict { .. }));
    assert_eq!(err.code(), "mtime_conflict");

    let note = vault::get_note(&op, VAULT, "A.md").await?;
    assert_eq!(note.frontmatter.get("status"), Some(&json!("open")));
    Ok(())
}

#[tokio::test]
async fn test_validation_errors() -> anyhow::Result<()> {
    let op = setup_operator()?;
    write_note(&op, "A.md", "body").await?;
    for bad in [
        json!({"file": "", "set": {"a": 1}}),
        json!({"file": "A.md", "set": {" ": 1}}),
        json!({"file": "A.md", "unset": [""]}),
        json!({"file": "A.md", "set": {"a": 1}, "unset": ["a"]}),
    ] {
        let err = upsert_frontmatter(&op, VAULT, &operation(bad.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error", "{}", bad);
    }
    let err = upsert_frontmatter(&op, VAULT, &operation(json!({"file": "Missing", "set": {"a": 1}})))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
    Ok(())
}

#[tokio::test]
async fn test_batch_aborts_after_conflict() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let a = write_note(&op, "A.md", "---\nstatus: open\n---\n").await?;
    write_note(&op, "B.md", "---\nstatus: open\n---\n").await?;
    write_note(&op, "C.md", "---\nstatus: open\n---\n").await?;

    let operations = vec![
        operation(json!({"file": "B.md", "set": {"status": "done"}})),
        operation(json!({"file": "A.md", "set": {"status": "done"}, "expected_mtime": a.mtime + 1000})),
        operation(json!({"file": "C.md", "set": {"status": "done"}})),
    ];
    let response = upsert_batch(&op, VAULT, &operations, false).await;

    assert!(!response.ok);
    assert_eq!(response.results.len(), 2);
    assert!(response.results[0].ok);
    let error = response.results[1].error.as_ref().expect("error body");
    assert_eq!(error.code, "mtime_conflict");

    let c = vault::get_note(&op, VAULT, "C.md").await?;
    assert_eq!(c.frontmatter.get("status"), Some(&json!("open")));
    Ok(())
}

#[tokio::test]
async fn test_batch_continue_on_error_reports_everything() -> anyhow::Result<()> {
    let op = setup_operator()?;
    write_note(&op, "A.md", "---\nstatus: open\n---\n").await?;
    write_note(&op, "C.md", "---\nstatus: open\n---\n").await?;

    let operations = vec![
        operation(json!({"file": "A.md", "set": {"status": "done"}})),
        operation(json!({"file": "Missing.md", "set": {"status": "done"}})),
        operation(json!({"file": "C.md", "unset": ["status"]})),
    ];
    let response = upsert_batch(&op, VAULT, &operations, true).await;

    assert!(!response.ok);
    assert_eq!(response.results.len(), 3);
    assert!(response.results[0].ok);
    assert_eq!(
        response.results[1].error.as_ref().map(|e| e.code.as_str()),
        Some("not_found")
    );
    assert!(response.results[2].ok);
    assert_eq!(response.results[2].changed, vec!["status"]);
    assert_eq!(vault::read_raw(&op, VAULT, "C.md").await?, "");

    let all_good = upsert_batch(&op, VAULT, &operations[..1], false).await;
    assert!(all_good.ok);
    Ok(())
}

#[tokio::test]
async fn test_upsert_keeps_keys_after_value_ending_in_dashes() -> anyhow::Result<()> {
    let op = setup_operator()?;
    write_note(&op, "A.md", "---\ntitle: Draft ---\nstatus: open\n---\nbody\n").await?;

    let result = upsert_frontmatter(
        &op,
        VAULT,
        &operation(json!({"file": "A.md", "set": {"owner": "kim"}})),
    )
    .await?;
    assert_eq!(result.changed, vec!["owner"]);

    let note = vault::get_note(&op, VAULT, "A.md").await?;
    assert_eq!(note.frontmatter.get("title"), Some(&json!("Draft ---")));
    assert_eq!(note.frontmatter.get("status"), Some(&json!("open")));
    assert_eq!(note.frontmatter.get("owner"), Some(&json!("kim")));

    let raw = vault::read_raw(&op, VAULT, "A.md").await?;
    assert_eq!(vault::split_frontmatter(&raw).1, "body\n");
    Ok(())
}
