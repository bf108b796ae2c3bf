//! The five tool operations, shared by the MCP bridge and the CLI.
//!
//! Every read path holds a shared guard on the store cell for the duration
//! of the call, so it never observes the connection mid-swap. No tool
//! operation writes; `refresh_sources` delegates to the coordinator.

use crate::app::App;
use crate::error::{Error, Result};
use crate::models::{
    DocumentExcerptResult, DocumentResult, ExcerptItem, RefreshResult, SearchResultItem,
    SourceInfo,
};
use crate::refresh;

pub const SEARCH_LIMIT_RANGE: (usize, usize) = (1, 50);
pub const GET_DOC_LIMIT_RANGE: (usize, usize) = (1000, 100_000);
pub const EXCERPT_MAX_CHUNKS_RANGE: (usize, usize) = (1, 20);
pub const EXCERPT_CONTEXT_RANGE: (usize, usize) = (0, 2000);

fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Search documentation, returning ranked passages with source attribution.
pub async fn search_docs(
    app: &App,
    query: &str,
    limit: usize,
    source: Option<&str>,
) -> Result<Vec<SearchResultItem>> {
    let limit = limit.clamp(SEARCH_LIMIT_RANGE.0, SEARCH_LIMIT_RANGE.1);
    let store = app.store().await;
    let index = app.index().await;

    let results = index.search(&store, query, limit, source).await?;
    Ok(results
        .into_iter()
        .map(|r| SearchResultItem {
            title: r.title.unwrap_or_else(|| "Untitled".to_string()),
            snippet: r.snippet,
            url: r.doc_url,
            source: r.source_name,
            source_url: r.source_url,
            score: round_score(r.score),
        })
        .collect())
}

/// Get a slice of a document's content by URL, with pagination metadata.
/// Offsets and lengths count characters.
pub async fn get_doc(app: &App, url: &str, offset: usize, limit: usize) -> Result<DocumentResult> {
    let limit = limit.clamp(GET_DOC_LIMIT_RANGE.0, GET_DOC_LIMIT_RANGE.1);
    let store = app.store().await;

    let doc = store
        .get_document_by_url(url)
        .await?
        .ok_or_else(|| Error::NotFound(url.to_string()))?;

    let total_length = doc.content.chars().count();
    let slice: String = doc.content.chars().skip(offset).take(limit).collect();
    let length = slice.chars().count();

    Ok(DocumentResult {
        title: doc.title.unwrap_or_else(|| "Untitled".to_string()),
        content: slice,
        url: doc.doc_url,
        source: doc.source_name,
        source_url: doc.source_url,
        offset,
        length,
        total_length,
        has_more: offset + length < total_length,
    })
}

/// Get query-relevant excerpts from one document, each expanded by
/// `context_chars` bytes on both sides (clamped to the content bounds).
pub async fn get_doc_excerpt(
    app: &App,
    url: &str,
    query: &str,
    max_chunks: usize,
    context_chars: usize,
) -> Result<DocumentExcerptResult> {
    let max_chunks = max_chunks.clamp(EXCERPT_MAX_CHUNKS_RANGE.0, EXCERPT_MAX_CHUNKS_RANGE.1);
    let context_chars = context_chars.clamp(EXCERPT_CONTEXT_RANGE.0, EXCERPT_CONTEXT_RANGE.1);

    let store = app.store().await;
    let index = app.index().await;

    let doc = store
        .get_document_by_url(url)
        .await?
        .ok_or_else(|| Error::NotFound(url.to_string()))?;

    let hits = index.search_within_document(url, query, max_chunks);
    if hits.is_empty() {
        return Err(Error::NoMatch(query.to_string()));
    }

    let content = &doc.content;
    let excerpts: Vec<ExcerptItem> = hits
        .into_iter()
        .map(|(chunk, score)| {
            let start = floor_boundary(content, chunk.start_pos.saturating_sub(context_chars));
            let end = ceil_boundary(
                content,
                (chunk.start_pos + chunk.content.len() + context_chars).min(content.len()),
            );
            ExcerptItem {
                content: content[start..end].to_string(),
                start_pos: start,
                end_pos: end,
                score: round_score(score),
            }
        })
        .collect();

    Ok(DocumentExcerptResult {
        title: doc.title.clone().unwrap_or_else(|| "Untitled".to_string()),
        url: doc.doc_url.clone(),
        source: doc.source_name.clone(),
        source_url: doc.source_url.clone(),
        total_length: doc.content.len(),
        excerpts,
    })
}

/// List configured sources with their store statistics. Sources that have
/// no documents yet report a zero count and no timestamp.
pub async fn list_sources(app: &App) -> Result<Vec<SourceInfo>> {
    let stats = {
        let store = app.store().await;
        store.get_source_stats().await?
    };

    // Rows may linger for sources dropped from the configuration; only
    // configured sources are reported.
    Ok(app
        .config
        .sources
        .iter()
        .map(|source| {
            let stat = stats.iter().find(|s| s.name == source.name);
            SourceInfo {
                name: source.name.clone(),
                url: source.url.clone(),
                doc_count: stat.map(|s| s.doc_count).unwrap_or(0),
                last_updated: stat.and_then(|s| s.last_updated),
            }
        })
        .collect())
}

/// Manually trigger a refresh of all sources.
pub async fn refresh_sources(app: &App) -> anyhow::Result<RefreshResult> {
    refresh::refresh_all(app).await
}

fn floor_boundary(s: &str, mut at: usize) -> usize {
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}

fn ceil_boundary(s: &str, mut at: usize) -> usize {
    while at < s.len() && !s.is_char_boundary(at) {
        at += 1;
    }
    at
}
