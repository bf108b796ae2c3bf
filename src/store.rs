//! SQLite-backed document and chunk storage.
//!
//! The store opens in either read-write or read-only mode. Read-write mode
//! uses a single exclusive connection, initializes the schema idempotently,
//! and runs legacy migrations; read-only mode uses a small pool. The
//! database stays in rollback-journal mode so it remains a single file that
//! the refresh coordinator can atomically rename over the primary.
//!
//! Full-text search is provided by an optional FTS5 table over chunk
//! content with the `porter unicode61 remove_diacritics 2` tokenizer
//! (stemming, case folding, accent stripping). Candidate ranking uses the
//! engine's own BM25 via `ORDER BY rank`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{Error, Result};
use crate::models::{ChunkSpan, Document, SourceStat, StoredChunk};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
    read_only: bool,
}

/// Lowercase hex SHA-256 of `content`, the change-detection key.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

/// Map an open/connect failure to [`Error::Locked`] when another writer
/// holds the file.
fn map_db_err(err: sqlx::Error) -> Error {
    if let Some(db_err) = err.as_database_error() {
        if db_err.message().contains("locked") {
            return Error::Locked;
        }
    }
    Error::Db(err)
}

impl Store {
    /// Open the database at `path`, creating parent directories as needed.
    ///
    /// Read-write mode holds a single exclusive connection and initializes
    /// the schema; it fails with [`Error::Locked`] when another writer holds
    /// the file. Read-only mode expects the file to exist.
    pub async fn open(path: &Path, read_only: bool) -> Result<Store> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(Error::Db)?
            .journal_mode(SqliteJournalMode::Delete)
            .foreign_keys(true);

        let max_connections;
        if read_only {
            options = options.read_only(true);
            max_connections = 5;
        } else {
            // A single exclusive connection; a held lock should surface as
            // Locked quickly rather than after the default busy timeout.
            options = options
                .create_if_missing(true)
                .locking_mode(SqliteLockingMode::Exclusive)
                .busy_timeout(std::time::Duration::from_millis(250));
            max_connections = 1;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(map_db_err)?;

        let store = Store {
            pool,
            path: path.to_path_buf(),
            read_only,
        };

        if !read_only {
            store.init_schema().await?;
        }

        Ok(store)
    }

    /// An in-memory read-write store, for tests.
    pub async fn open_in_memory() -> Result<Store> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(Error::Db)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(map_db_err)?;
        let store = Store {
            pool,
            path: PathBuf::from(":memory:"),
            read_only: false,
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Close the underlying connections. The handle must not be used after.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_name TEXT NOT NULL,
                source_url TEXT NOT NULL,
                doc_url TEXT NOT NULL UNIQUE,
                title TEXT,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Schema(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                start_pos INTEGER NOT NULL,
                end_pos INTEGER NOT NULL,
                FOREIGN KEY (doc_id) REFERENCES documents(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Schema(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Schema(e.to_string()))?;

        // Migrate before indexing: legacy tables gain source_name here.
        self.migrate_legacy_schema().await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_doc_url ON documents(doc_url)")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Schema(e.to_string()))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source_name ON documents(source_name)")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Schema(e.to_string()))?;

        Ok(())
    }

    /// Idempotent fixups for databases written by earlier schema versions:
    /// backfill a missing `source_name` column from the host of
    /// `source_url`, and drop the obsolete `fetched_at` column.
    async fn migrate_legacy_schema(&self) -> Result<()> {
        let columns = sqlx::query("PRAGMA table_info(documents)")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Schema(e.to_string()))?;
        let names: Vec<String> = columns.iter().map(|row| row.get::<String, _>("name")).collect();

        if !names.iter().any(|n| n == "source_name") {
            sqlx::query("ALTER TABLE documents ADD COLUMN source_name TEXT NOT NULL DEFAULT ''")
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Schema(e.to_string()))?;

            let rows = sqlx::query("SELECT id, source_url FROM documents WHERE source_name = ''")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::Schema(e.to_string()))?;
            for row in rows {
                let id: i64 = row.get("id");
                let source_url: String = row.get("source_url");
                let name = reqwest::Url::parse(&source_url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_else(|| "unknown".to_string());
                sqlx::query("UPDATE documents SET source_name = ? WHERE id = ?")
                    .bind(&name)
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| Error::Schema(e.to_string()))?;
            }
        }

        if names.iter().any(|n| n == "fetched_at") {
            sqlx::query("ALTER TABLE documents DROP COLUMN fetched_at")
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Schema(e.to_string()))?;
        }

        Ok(())
    }

    /// Insert or update a document keyed by `doc_url`.
    ///
    /// When the content hash is unchanged only `updated_at` is rewritten,
    /// so unchanged refreshes never amplify content writes.
    pub async fn upsert_document(
        &self,
        source_name: &str,
        source_url: &str,
        doc_url: &str,
        title: Option<&str>,
        content: &str,
    ) -> Result<Document> {
        let content_hash = compute_hash(content);
        let now = Utc::now();
        let now_micros = now.timestamp_micros();

        let existing = sqlx::query("SELECT id, content_hash FROM documents WHERE doc_url = ?")
            .bind(doc_url)
            .fetch_optional(&self.pool)
            .await?;

        let id = match existing {
            Some(row) => {
                let id: i64 = row.get("id");
                let old_hash: String = row.get("content_hash");
                if old_hash == content_hash {
                    sqlx::query("UPDATE documents SET updated_at = ? WHERE id = ?")
                        .bind(now_micros)
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                } else {
                    sqlx::query(
                        r#"
                        UPDATE documents
                        SET source_name = ?, source_url = ?, title = ?, content = ?,
                            content_hash = ?, updated_at = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(source_name)
                    .bind(source_url)
                    .bind(title)
                    .bind(content)
                    .bind(&content_hash)
                    .bind(now_micros)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                }
                id
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO documents (source_name, source_url, doc_url, title, content,
                                           content_hash, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(source_name)
                .bind(source_url)
                .bind(doc_url)
                .bind(title)
                .bind(content)
                .bind(&content_hash)
                .bind(now_micros)
                .execute(&self.pool)
                .await?;
                result.last_insert_rowid()
            }
        };

        Ok(Document {
            id,
            source_name: source_name.to_string(),
            source_url: source_url.to_string(),
            doc_url: doc_url.to_string(),
            title: title.map(str::to_string),
            content: content.to_string(),
            content_hash,
            updated_at: now,
        })
    }

    pub async fn get_document_by_url(&self, doc_url: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT id, source_name, source_url, doc_url, title, content,
                   content_hash, updated_at
            FROM documents
            WHERE doc_url = ?
            "#,
        )
        .bind(doc_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_document))
    }

    pub async fn get_all_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_name, source_url, doc_url, title, content,
                   content_hash, updated_at
            FROM documents
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_document).collect())
    }

    /// Delete this source's documents whose URL is not in `valid_urls`;
    /// an empty set deletes all of the source's documents. Chunks follow
    /// their document. Returns the number of deleted documents.
    pub async fn delete_stale_documents(
        &self,
        source_name: &str,
        valid_urls: &HashSet<String>,
    ) -> Result<u64> {
        if valid_urls.is_empty() {
            let result = sqlx::query("DELETE FROM documents WHERE source_name = ?")
                .bind(source_name)
                .execute(&self.pool)
                .await?;
            return Ok(result.rows_affected());
        }

        let rows = sqlx::query("SELECT doc_url FROM documents WHERE source_name = ?")
            .bind(source_name)
            .fetch_all(&self.pool)
            .await?;
        let stale: Vec<String> = rows
            .into_iter()
            .map(|row| row.get::<String, _>("doc_url"))
            .filter(|url| !valid_urls.contains(url))
            .collect();

        for url in &stale {
            sqlx::query("DELETE FROM documents WHERE doc_url = ?")
                .bind(url)
                .execute(&self.pool)
                .await?;
        }

        Ok(stale.len() as u64)
    }

    /// Document counts and most-recent update per `(source_name, source_url)`.
    pub async fn get_source_stats(&self) -> Result<Vec<SourceStat>> {
        let rows = sqlx::query(
            r#"
            SELECT source_name, source_url, COUNT(*) AS doc_count,
                   MAX(updated_at) AS last_updated
            FROM documents
            GROUP BY source_name, source_url
            ORDER BY source_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SourceStat {
                name: row.get("source_name"),
                url: row.get("source_url"),
                doc_count: row.get("doc_count"),
                last_updated: row
                    .get::<Option<i64>, _>("last_updated")
                    .map(micros_to_datetime),
            })
            .collect())
    }

    // ============ Chunk persistence ============

    /// Replace the entire chunk table (and its FTS mirror, when present)
    /// in one transaction.
    pub async fn bulk_store_all_chunks(&self, chunks: &[(i64, ChunkSpan)]) -> Result<()> {
        let fts = self.has_fts_index().await?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        if fts {
            sqlx::query("DELETE FROM chunks_fts").execute(&mut *tx).await?;
        }

        for (doc_id, span) in chunks {
            let result = sqlx::query(
                "INSERT INTO chunks (doc_id, content, start_pos, end_pos) VALUES (?, ?, ?, ?)",
            )
            .bind(doc_id)
            .bind(&span.content)
            .bind(span.start_pos as i64)
            .bind(span.end_pos as i64)
            .execute(&mut *tx)
            .await?;

            if fts {
                sqlx::query("INSERT INTO chunks_fts (chunk_id, content) VALUES (?, ?)")
                    .bind(result.last_insert_rowid())
                    .bind(&span.content)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// All persisted chunks joined with their document's URL, in id order.
    pub async fn get_all_chunks(&self) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.doc_id, c.content, c.start_pos, c.end_pos, d.doc_url
            FROM chunks c
            JOIN documents d ON d.id = c.doc_id
            ORDER BY c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredChunk {
                id: row.get("id"),
                doc_id: row.get("doc_id"),
                doc_url: row.get("doc_url"),
                content: row.get("content"),
                start_pos: row.get("start_pos"),
                end_pos: row.get("end_pos"),
            })
            .collect())
    }

    // ============ Full-text search ============

    pub async fn has_fts_index(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Create the FTS5 table and populate it from the current chunks.
    /// A no-op when the index already exists.
    pub async fn create_fts_index(&self) -> Result<()> {
        if self.has_fts_index().await? {
            return Ok(());
        }

        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                content,
                tokenize = 'porter unicode61 remove_diacritics 2'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, content) SELECT id, content FROM chunks")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Top `limit` chunk ids for the query tokens, best match first, ranked
    /// by the engine's BM25 (`ORDER BY rank`). Returns nothing when no FTS
    /// index exists. Tokens are OR-ed so any stemmed match is a candidate.
    pub async fn get_fts_candidates(&self, tokens: &[String], limit: i64) -> Result<Vec<i64>> {
        if tokens.is_empty() || !self.has_fts_index().await? {
            return Ok(Vec::new());
        }

        let match_expr = tokens
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR ");

        let rows = sqlx::query(
            r#"
            SELECT chunk_id FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get::<i64, _>("chunk_id")).collect())
    }
}

fn row_to_document(row: sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        source_name: row.get("source_name"),
        source_url: row.get("source_url"),
        doc_url: row.get("doc_url"),
        title: row.get("title"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        updated_at: micros_to_datetime(row.get("updated_at")),
    }
}
