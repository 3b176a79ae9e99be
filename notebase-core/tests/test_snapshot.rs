use _notebase_core::query::{QueryRow, RowFile};
use _notebase_core::snapshot::{Snapshot, SnapshotCache};
use serde_json::Map;
use std::sync::Arc;

fn row(path: &str) -> QueryRow {
    QueryRow {
        file: RowFile {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
        },
        props: Map::new(),
        computed: None,
    }
}

#[test]
fn test_keys_are_canonical_and_last_writer_wins() {
    let cache = SnapshotCache::new();
    assert!(cache.is_empty());

    cache.push("Tasks", vec![row("a.md")]);
    cache.push("/Tasks.base", vec![row("b.md"), row("c.md")]);
    cache.set("Views\\Other", Snapshot::new(vec![]));

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.keys(), vec!["Tasks.base", "Views/Other.base"]);
    let tasks = cache.get("Tasks.base").expect("snapshot");
    assert_eq!(tasks.total, 2);
    assert_eq!(tasks.rows[0].file.path, "b.md");
    assert!(tasks.timestamp > 0);
    assert!(cache.get("Missing").is_none());

    let entries = cache.entries();
    assert_eq!(entries[0].0, "Tasks.base");
    assert_eq!(entries[1].1.total, 0);
}

#[test]
fn test_snapshot_pages() {
    let snapshot = Snapshot::new((1..=5).map(|i| row(&format!("{}.md", i))).collect());
    let page: Vec<String> = snapshot.page(2, 2).into_iter().map(|r| r.file.path).collect();
    assert_eq!(page, vec!["3.md", "4.md"]);
    assert_eq!(snapshot.page(3, 2).len(), 1);
    assert!(snapshot.page(9, 2).is_empty());
}

#[tokio::test]
async fn test_cache_is_shared_across_tasks() -> anyhow::Result<()> {
    let cache = Arc::new(SnapshotCache::new());
    let mut handles = Vec::new();
    for i in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.push(&format!("Base{}", i % 2), vec![row(&format!("{}.md", i))]);
        }));
    }
    for handle in handles {
        handle.await?;
    }
    assert_eq!(cache.keys(), vec!["Base0.base", "Base1.base"]);
    Ok(())
}
