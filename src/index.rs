//! In-memory search index with two-stage ranked retrieval.
//!
//! The index holds the full chunked corpus plus per-chunk token vectors and
//! a BM25 scorer. Stage 1 asks the store's full-text index for up to
//! [`FTS_CANDIDATE_LIMIT`] candidate chunks (stemmed, case-folded,
//! accent-stripped); stage 2 reranks the candidates with BM25 over the raw
//! token vectors. When any stage-1 prerequisite is missing the rerank runs
//! over all chunks, so candidate narrowing can only ever shrink the result
//! set, never grow it.
//!
//! A built index is immutable; rebuilds produce a fresh index that the app
//! swaps in by reference.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::bm25::Bm25;
use crate::chunker::split_chunks;
use crate::error::Result;
use crate::models::{Document, SearchResult, StoredChunk};
use crate::store::Store;

/// Maximum candidate chunks requested from the FTS stage.
pub const FTS_CANDIDATE_LIMIT: i64 = 100;

/// Snippet length in characters.
const SNIPPET_CHARS: usize = 200;

fn word_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w+\b").unwrap())
}

fn stopwords() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOPWORDS.iter().copied().collect())
}

#[rustfmt::skip]
static STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "when",
    "at", "by", "for", "with", "about", "against", "between", "into",
    "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again",
    "further", "once", "here", "there", "all", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own",
    "same", "so", "than", "too", "very", "just", "can", "will", "should",
    "now", "i", "me", "my", "myself", "we", "our", "ours", "ourselves",
    "you", "your", "yours", "yourself", "yourselves", "he", "him", "his",
    "himself", "she", "her", "hers", "herself", "it", "its", "itself",
    "they", "them", "their", "theirs", "themselves", "what", "which",
    "who", "whom", "this", "that", "these", "those", "am", "is", "are",
    "was", "were", "be", "been", "being", "have", "has", "had", "having",
    "do", "does", "did", "doing", "would", "could", "ought", "of", "as",
    "how", "why", "because", "while", "also", "any", "both", "either",
    "neither",
    // Modal verbs
    "may", "might", "must", "shall",
    // Location/time
    "where", "until", "since", "yet", "still", "upon", "within",
    "without", "well",
    // Contraction parts (e.g. "we'll" -> ["we", "ll"])
    "ll", "ve", "re", "d", "m", "s", "t", "don", "won", "aren", "couldn",
    "didn", "doesn", "hadn", "hasn", "haven", "isn", "mustn", "needn",
    "shan", "shouldn", "wasn", "weren", "wouldn",
];

/// Lowercase word tokens with the stoplist and single-character tokens
/// removed. Deterministic and pure.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    word_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|w| w.chars().count() > 1 && !stopwords().contains(w.as_str()))
        .collect()
}

/// A chunk held by the index, carrying the parent document's metadata.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub doc_id: i64,
    pub doc_url: String,
    pub source_name: String,
    pub source_url: String,
    pub title: Option<String>,
    pub content: String,
    pub start_pos: usize,
    pub end_pos: usize,
}

pub struct SearchIndex {
    chunks: Vec<IndexedChunk>,
    bm25: Option<Bm25>,
    /// Persisted chunk id -> position in `chunks`, filled by [`Self::sync_chunk_ids`].
    chunk_id_map: HashMap<i64, usize>,
    enable_fts: bool,
}

impl SearchIndex {
    /// An empty index, as held before the first build.
    pub fn empty(enable_fts: bool) -> Self {
        Self {
            chunks: Vec::new(),
            bm25: None,
            chunk_id_map: HashMap::new(),
            enable_fts,
        }
    }

    /// Build the index from documents, fully recomputing chunks and BM25
    /// tables. Chunk order is documents in the given order crossed with
    /// chunker output order.
    pub fn build(
        documents: &[Document],
        chunk_size: usize,
        chunk_overlap: usize,
        enable_fts: bool,
    ) -> Self {
        let mut chunks: Vec<IndexedChunk> = Vec::new();

        for doc in documents {
            for span in split_chunks(&doc.content, chunk_size, chunk_overlap) {
                chunks.push(IndexedChunk {
                    doc_id: doc.id,
                    doc_url: doc.doc_url.clone(),
                    source_name: doc.source_name.clone(),
                    source_url: doc.source_url.clone(),
                    title: doc.title.clone(),
                    content: span.content,
                    start_pos: span.start_pos,
                    end_pos: span.end_pos,
                });
            }
        }

        let bm25 = if chunks.is_empty() {
            None
        } else {
            let corpus: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(&c.content)).collect();
            Some(Bm25::new(&corpus))
        };

        Self {
            chunks,
            bm25,
            chunk_id_map: HashMap::new(),
            enable_fts,
        }
    }

    /// Backfill persisted chunk ids by joining stored rows on
    /// `(doc_url, start_pos, end_pos)`. Enables the FTS candidate stage.
    pub fn sync_chunk_ids(&mut self, stored: &[StoredChunk]) {
        let mut by_key: HashMap<(&str, usize, usize), usize> = HashMap::new();
        for (pos, chunk) in self.chunks.iter().enumerate() {
            by_key.insert((chunk.doc_url.as_str(), chunk.start_pos, chunk.end_pos), pos);
        }

        self.chunk_id_map.clear();
        for row in stored {
            let key = (row.doc_url.as_str(), row.start_pos as usize, row.end_pos as usize);
            if let Some(&pos) = by_key.get(&key) {
                self.chunk_id_map.insert(row.id, pos);
            }
        }
    }

    /// Number of distinct indexed documents.
    pub fn document_count(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| c.doc_url.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Two-stage ranked search. Returns at most `limit` results, one per
    /// `doc_url`, sorted by descending BM25 score (ties keep insertion
    /// order). An empty or all-stopword query returns nothing.
    pub async fn search(
        &self,
        store: &Store,
        query: &str,
        limit: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let Some(bm25) = &self.bm25 else {
            return Ok(Vec::new());
        };
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let positions = self.candidate_positions(store, &query_tokens).await?;

        let mut scored: Vec<(usize, f64)> = positions
            .into_iter()
            .map(|pos| (pos, bm25.score(&query_tokens, pos)))
            .filter(|&(_, score)| score > 0.0)
            .collect();
        // Stable sort after ordering by position, so equal scores keep
        // insertion order.
        scored.sort_by_key(|&(pos, _)| pos);
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut seen_urls: HashSet<&str> = HashSet::new();
        let mut results: Vec<SearchResult> = Vec::new();

        for (pos, score) in scored {
            let chunk = &self.chunks[pos];
            if let Some(filter) = source_filter {
                if chunk.source_name != filter {
                    continue;
                }
            }
            if !seen_urls.insert(chunk.doc_url.as_str()) {
                continue;
            }

            results.push(SearchResult {
                doc_url: chunk.doc_url.clone(),
                source_name: chunk.source_name.clone(),
                source_url: chunk.source_url.clone(),
                title: chunk.title.clone(),
                snippet: make_snippet(&chunk.content),
                score,
            });
            if results.len() >= limit {
                break;
            }
        }

        Ok(results)
    }

    /// Stage 1: candidate positions from the store's FTS index, falling back
    /// to all chunks when the FTS path is unavailable or comes back empty.
    async fn candidate_positions(&self, store: &Store, query_tokens: &[String]) -> Result<Vec<usize>> {
        if self.enable_fts && !self.chunk_id_map.is_empty() && store.has_fts_index().await? {
            let ids = store
                .get_fts_candidates(query_tokens, FTS_CANDIDATE_LIMIT)
                .await?;
            let mapped: Vec<usize> = ids
                .iter()
                .filter_map(|id| self.chunk_id_map.get(id).copied())
                .collect();
            if !mapped.is_empty() {
                return Ok(mapped);
            }
        }
        Ok((0..self.chunks.len()).collect())
    }

    /// Rerank only the chunks of one document; top `top_k` with strictly
    /// positive scores, in relevance order.
    pub fn search_within_document(
        &self,
        doc_url: &str,
        query: &str,
        top_k: usize,
    ) -> Vec<(&IndexedChunk, f64)> {
        let Some(bm25) = &self.bm25 else {
            return Vec::new();
        };
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(&IndexedChunk, f64)> = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.doc_url == doc_url)
            .map(|(pos, c)| (c, bm25.score(&query_tokens, pos)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(top_k)
            .filter(|&(_, score)| score > 0.0)
            .collect()
    }
}

fn make_snippet(content: &str) -> String {
    let mut snippet: String = content.chars().take(SNIPPET_CHARS).collect();
    if content.chars().count() > SNIPPET_CHARS {
        snippet.push_str("...");
    }
    snippet
}
