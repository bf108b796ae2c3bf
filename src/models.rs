//! Core data models used throughout llmdoc.
//!
//! These types represent the documents, chunks, and search results that flow
//! through the fetch, indexing, and retrieval pipeline, plus the serialized
//! shapes returned by the tool surface.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A document stored in the database.
///
/// `doc_url` is the logical key: an upsert with an existing `doc_url`
/// overwrites every non-key field. `updated_at` is refreshed on every
/// successful upsert, even when the content is unchanged, and doubles as
/// the fetched-at signal for TTL staleness.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: i64,
    pub source_name: String,
    pub source_url: String,
    pub doc_url: String,
    pub title: Option<String>,
    pub content: String,
    /// Lowercase hex SHA-256 of `content`.
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// A contiguous sub-range of a document's content produced by the chunker.
///
/// Positions are half-open byte offsets into the parent content. For chunks
/// assembled from several paragraphs, `content` differs from
/// `parent[start_pos..end_pos]` only by the `"\n\n"` joiners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub content: String,
    pub start_pos: usize,
    pub end_pos: usize,
}

/// A persisted chunk row joined with its parent document's URL.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: i64,
    pub doc_id: i64,
    pub doc_url: String,
    pub content: String,
    pub start_pos: i64,
    pub end_pos: i64,
}

/// A ranked search hit at the index level. At most one per `doc_url`.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub doc_url: String,
    pub source_name: String,
    pub source_url: String,
    pub title: Option<String>,
    /// First 200 characters of the winning chunk, `"..."`-suffixed if cut.
    pub snippet: String,
    pub score: f64,
}

/// Per-source aggregate from the store.
#[derive(Debug, Clone)]
pub struct SourceStat {
    pub name: String,
    pub url: String,
    pub doc_count: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

// ============ Tool result shapes ============

/// A single `search_docs` result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub title: String,
    pub snippet: String,
    pub url: String,
    pub source: String,
    pub source_url: String,
    pub score: f64,
}

/// Full document content with pagination support.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResult {
    pub title: String,
    pub content: String,
    pub url: String,
    pub source: String,
    pub source_url: String,
    pub offset: usize,
    pub length: usize,
    pub total_length: usize,
    pub has_more: bool,
}

/// A single excerpt from a document.
#[derive(Debug, Clone, Serialize)]
pub struct ExcerptItem {
    pub content: String,
    pub start_pos: usize,
    pub end_pos: usize,
    pub score: f64,
}

/// Document metadata with relevant excerpts in relevance order.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentExcerptResult {
    pub title: String,
    pub url: String,
    pub source: String,
    pub source_url: String,
    pub total_length: usize,
    pub excerpts: Vec<ExcerptItem>,
}

/// A configured documentation source with its store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub url: String,
    pub doc_count: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Statistics for a single source after a refresh.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRefreshStats {
    pub name: String,
    pub url: String,
    pub doc_count: usize,
    pub errors: usize,
}

/// Result of a refresh operation.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub refreshed_count: usize,
    pub indexed_documents: usize,
    pub indexed_chunks: usize,
    pub sources: Vec<SourceRefreshStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RefreshResult {
    /// The result returned when another instance holds the refresh lock.
    pub fn skipped(
        reason: impl Into<String>,
        indexed_documents: usize,
        indexed_chunks: usize,
    ) -> Self {
        Self {
            refreshed_count: 0,
            indexed_documents,
            indexed_chunks,
            sources: Vec::new(),
            errors: None,
            skipped: true,
            reason: Some(reason.into()),
        }
    }
}
