//! Store integration tests against a real database file.

use std::collections::HashSet;
use std::path::PathBuf;

use llmdoc::models::ChunkSpan;
use llmdoc::store::{compute_hash, Store};
use tempfile::TempDir;

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("index.db")
}

async fn open_rw(dir: &TempDir) -> Store {
    Store::open(&db_path(dir), false).await.unwrap()
}

fn urls(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn populate(store: &Store) {
    store
        .upsert_document(
            "alpha",
            "https://a.test/llms.txt",
            "https://a.test/one.md",
            Some("One"),
            "# One\n\nfirst body",
        )
        .await
        .unwrap();
    store
        .upsert_document(
            "alpha",
            "https://a.test/llms.txt",
            "https://a.test/two.md",
            Some("Two"),
            "# Two\n\nsecond body",
        )
        .await
        .unwrap();
    store
        .upsert_document(
            "beta",
            "https://b.test/llms.txt",
            "https://b.test/three.md",
            Some("Three"),
            "# Three\n\nthird body",
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_open_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("deep").join("nested").join("index.db");
    let store = Store::open(&nested, false).await.unwrap();
    assert!(nested.exists());
    store.close().await;
}

#[tokio::test]
async fn test_second_writer_is_locked() {
    let dir = TempDir::new().unwrap();
    let first = open_rw(&dir).await;
    let second = Store::open(&db_path(&dir), false).await;
    assert!(matches!(second, Err(llmdoc::error::Error::Locked)));
    first.close().await;
}

#[tokio::test]
async fn test_upsert_new_document() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;

    let doc = store
        .upsert_document(
            "demo",
            "https://host.test/llms.txt",
            "https://host.test/a.md",
            Some("Alpha"),
            "# Alpha\n\nalpha body\n",
        )
        .await
        .unwrap();

    assert!(doc.id > 0);
    assert_eq!(doc.source_name, "demo");
    assert_eq!(doc.content_hash, compute_hash("# Alpha\n\nalpha body\n"));

    let fetched = store
        .get_document_by_url("https://host.test/a.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.title.as_deref(), Some("Alpha"));
    assert_eq!(fetched.content, "# Alpha\n\nalpha body\n");
    store.close().await;
}

#[tokio::test]
async fn test_upsert_overwrites_changed_content() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;

    let first = store
        .upsert_document("demo", "https://h.test/llms.txt", "https://h.test/a.md", Some("A"), "old")
        .await
        .unwrap();
    let second = store
        .upsert_document("demo", "https://h.test/llms.txt", "https://h.test/a.md", Some("A2"), "new")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_ne!(first.content_hash, second.content_hash);

    let fetched = store
        .get_document_by_url("https://h.test/a.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.content, "new");
    assert_eq!(fetched.title.as_deref(), Some("A2"));
    store.close().await;
}

#[tokio::test]
async fn test_upsert_unchanged_content_bumps_updated_at_only() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;

    store
        .upsert_document("demo", "https://h.test/llms.txt", "https://h.test/a.md", Some("A"), "same")
        .await
        .unwrap();
    let before = store
        .get_document_by_url("https://h.test/a.md")
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    store
        .upsert_document("demo", "https://h.test/llms.txt", "https://h.test/a.md", Some("A"), "same")
        .await
        .unwrap();
    let after = store
        .get_document_by_url("https://h.test/a.md")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(before.content_hash, after.content_hash);
    assert_eq!(before.content, after.content);
    assert!(after.updated_at > before.updated_at);
    store.close().await;
}

#[tokio::test]
async fn test_get_document_by_url_not_found_is_none() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    let missing = store
        .get_document_by_url("https://h.test/missing.md")
        .await
        .unwrap();
    assert!(missing.is_none());
    store.close().await;
}

#[tokio::test]
async fn test_get_all_documents() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    populate(&store).await;
    let docs = store.get_all_documents().await.unwrap();
    assert_eq!(docs.len(), 3);
    store.close().await;
}

#[tokio::test]
async fn test_delete_stale_documents_subset() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    populate(&store).await;

    let deleted = store
        .delete_stale_documents("alpha", &urls(&["https://a.test/one.md"]))
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    assert!(store
        .get_document_by_url("https://a.test/one.md")
        .await
        .unwrap()
        .is_some());
    assert!(store
        .get_document_by_url("https://a.test/two.md")
        .await
        .unwrap()
        .is_none());
    // The other source is untouched.
    assert!(store
        .get_document_by_url("https://b.test/three.md")
        .await
        .unwrap()
        .is_some());
    store.close().await;
}

#[tokio::test]
async fn test_delete_stale_documents_empty_set_deletes_source() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    populate(&store).await;

    let deleted = store
        .delete_stale_documents("alpha", &HashSet::new())
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(store.get_all_documents().await.unwrap().len(), 1);
    store.close().await;
}

#[tokio::test]
async fn test_delete_stale_documents_all_valid_deletes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    populate(&store).await;

    let deleted = store
        .delete_stale_documents(
            "alpha",
            &urls(&["https://a.test/one.md", "https://a.test/two.md"]),
        )
        .await
        .unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(store.get_all_documents().await.unwrap().len(), 3);
    store.close().await;
}

#[tokio::test]
async fn test_get_source_stats() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    populate(&store).await;

    let stats = store.get_source_stats().await.unwrap();
    assert_eq!(stats.len(), 2);
    let alpha = stats.iter().find(|s| s.name == "alpha").unwrap();
    assert_eq!(alpha.doc_count, 2);
    assert_eq!(alpha.url, "https://a.test/llms.txt");
    assert!(alpha.last_updated.is_some());
    store.close().await;
}

#[tokio::test]
async fn test_get_source_stats_empty_store() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    assert!(store.get_source_stats().await.unwrap().is_empty());
    store.close().await;
}

#[tokio::test]
async fn test_bulk_store_all_chunks_roundtrip_and_replace() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    let doc = store
        .upsert_document("demo", "https://h.test/llms.txt", "https://h.test/a.md", Some("A"), "body text")
        .await
        .unwrap();

    let spans = vec![
        (
            doc.id,
            ChunkSpan {
                content: "body".to_string(),
                start_pos: 0,
                end_pos: 4,
            },
        ),
        (
            doc.id,
            ChunkSpan {
                content: "text".to_string(),
                start_pos: 5,
                end_pos: 9,
            },
        ),
    ];
    store.bulk_store_all_chunks(&spans).await.unwrap();

    let stored = store.get_all_chunks().await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].doc_url, "https://h.test/a.md");
    assert_eq!(stored[0].content, "body");
    assert_eq!(stored[1].start_pos, 5);

    // A second bulk store replaces, never appends.
    store
        .bulk_store_all_chunks(&[(
            doc.id,
            ChunkSpan {
                content: "body text".to_string(),
                start_pos: 0,
                end_pos: 9,
            },
        )])
        .await
        .unwrap();
    let stored = store.get_all_chunks().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "body text");
    store.close().await;
}

#[tokio::test]
async fn test_chunks_deleted_with_document() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    let doc = store
        .upsert_document("demo", "https://h.test/llms.txt", "https://h.test/a.md", Some("A"), "body")
        .await
        .unwrap();
    store
        .bulk_store_all_chunks(&[(
            doc.id,
            ChunkSpan {
                content: "body".to_string(),
                start_pos: 0,
                end_pos: 4,
            },
        )])
        .await
        .unwrap();

    store
        .delete_stale_documents("demo", &HashSet::new())
        .await
        .unwrap();
    assert!(store.get_all_chunks().await.unwrap().is_empty());
    store.close().await;
}

#[tokio::test]
async fn test_fts_index_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    assert!(!store.has_fts_index().await.unwrap());

    store.create_fts_index().await.unwrap();
    assert!(store.has_fts_index().await.unwrap());
    // Idempotent.
    store.create_fts_index().await.unwrap();
    store.close().await;

    // Survives reopen.
    let store = Store::open(&db_path(&dir), true).await.unwrap();
    assert!(store.has_fts_index().await.unwrap());
    store.close().await;
}

#[tokio::test]
async fn test_fts_candidates_without_index_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    let candidates = store
        .get_fts_candidates(&["anything".to_string()], 100)
        .await
        .unwrap();
    assert!(candidates.is_empty());
    store.close().await;
}

#[tokio::test]
async fn test_fts_candidates_rank_and_limit() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    let doc = store
        .upsert_document("demo", "https://h.test/llms.txt", "https://h.test/a.md", Some("A"), "x")
        .await
        .unwrap();
    store.create_fts_index().await.unwrap();

    let spans: Vec<(i64, ChunkSpan)> = (0..5)
        .map(|i| {
            let content = if i == 0 {
                "kubernetes deployment rollout".to_string()
            } else {
                format!("unrelated filler paragraph number {i}")
            };
            (
                doc.id,
                ChunkSpan {
                    content,
                    start_pos: i * 100,
                    end_pos: i * 100 + 50,
                },
            )
        })
        .collect();
    store.bulk_store_all_chunks(&spans).await.unwrap();

    let candidates = store
        .get_fts_candidates(&["kubernetes".to_string()], 100)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);

    let all_filler = store
        .get_fts_candidates(&["filler".to_string()], 2)
        .await
        .unwrap();
    assert_eq!(all_filler.len(), 2);
    store.close().await;
}

#[tokio::test]
async fn test_fts_candidates_use_porter_stemming() {
    let dir = TempDir::new().unwrap();
    let store = open_rw(&dir).await;
    let doc = store
        .upsert_document("demo", "https://h.test/llms.txt", "https://h.test/a.md", Some("A"), "x")
        .await
        .unwrap();
    store.create_fts_index().await.unwrap();
    store
        .bulk_store_all_chunks(&[(
            doc.id,
            ChunkSpan {
                content: "deploying applications quickly".to_string(),
                start_pos: 0,
                end_pos: 30,
            },
        )])
        .await
        .unwrap();

    // "deployment" and "deploying" share the stem "deploy".
    let candidates = store
        .get_fts_candidates(&["deployment".to_string()], 100)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    store.close().await;
}

#[tokio::test]
async fn test_legacy_schema_migration() {
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::ConnectOptions;
    use std::str::FromStr;

    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    // Build a database with the legacy shape: no source_name, a fetched_at
    // column, one row.
    {
        let mut conn = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true)
            .connect()
            .await
            .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_url TEXT NOT NULL,
                doc_url TEXT NOT NULL UNIQUE,
                title TEXT,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                fetched_at INTEGER
            )
            "#,
        )
        .execute(&mut conn)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO documents (source_url, doc_url, title, content, content_hash, updated_at, fetched_at)
             VALUES ('https://legacy.test/llms.txt', 'https://legacy.test/a.md', 'A', 'body', 'hash', 0, 0)",
        )
        .execute(&mut conn)
        .await
        .unwrap();
        use sqlx::Connection;
        conn.close().await.unwrap();
    }

    let store = Store::open(&path, false).await.unwrap();
    let doc = store
        .get_document_by_url("https://legacy.test/a.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.source_name, "legacy.test");
    store.close().await;

    // Running the migration again must be harmless.
    let store = Store::open(&path, false).await.unwrap();
    assert_eq!(store.get_all_documents().await.unwrap().len(), 1);
    store.close().await;
}
