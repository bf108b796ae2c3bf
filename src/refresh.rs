//! Refresh coordination: fetch, shadow-write, atomic swap, index rebuild.
//!
//! The refresh keeps reads unblocked while sources are fetched and written,
//! and only quiesces them for the moment the database file is swapped:
//!
//! 1. Fetch every configured source (no locks held).
//! 2. Take a non-blocking exclusive lock on `<db_path>.lock`; if another
//!    process holds it the refresh returns a skipped result.
//! 3. Write documents into a copy of the database at `<db_path>.tmp`,
//!    reap stale documents, and persist the re-chunked corpus (plus the
//!    FTS index when enabled). Failures remove the temp file.
//! 4. Under the store cell's write lock: close the read handle, rename the
//!    temp file over the primary, reopen read-only.
//! 5. Rebuild the in-memory index (no locks held).
//!
//! Read paths therefore observe either the pre-swap or the post-swap
//! database, never a half-written one.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app::App;
use crate::chunker::{split_chunks, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::config::{Config, Source};
use crate::fetcher::FetchedDocument;
use crate::models::{ChunkSpan, RefreshResult, SourceRefreshStats};
use crate::store::Store;

fn lock_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

fn tmp_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Refresh all configured documentation sources.
///
/// Per-link and per-source failures are accumulated into the result; the
/// refresh itself only fails when the shadow write or the swap fails.
pub async fn refresh_all(app: &App) -> Result<RefreshResult> {
    // Phase 1: fetch (unlocked).
    let mut fetched: Vec<(Source, Vec<FetchedDocument>, Vec<String>)> = Vec::new();
    let mut all_errors: Vec<String> = Vec::new();

    for source in &app.config.sources {
        info!(source = %source.name, url = %source.url, "fetching source");
        let (documents, errors) = app.fetcher.fetch_all_from_source(&source.url).await;
        all_errors.extend(errors.iter().cloned());
        fetched.push((source.clone(), documents, errors));
    }

    // Phase 2: cross-process lock.
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(lock_path(&app.config.db_path))
        .context("failed to open refresh lock file")?;
    if lock_file.try_lock_exclusive().is_err() {
        info!("refresh lock held elsewhere, skipping");
        let index = app.index().await;
        return Ok(RefreshResult::skipped(
            "Refresh locked by another instance",
            index.document_count(),
            index.chunk_count(),
        ));
    }

    let result = refresh_locked(app, fetched, all_errors).await;

    let _ = lock_file.unlock();
    result
}

async fn refresh_locked(
    app: &App,
    fetched: Vec<(Source, Vec<FetchedDocument>, Vec<String>)>,
    all_errors: Vec<String>,
) -> Result<RefreshResult> {
    // Phase 3: shadow write.
    let tmp = tmp_path(&app.config.db_path);
    let write_result = shadow_write(&app.config, &tmp, &fetched).await;
    let (refreshed_count, source_stats) = match write_result {
        Ok(ok) => ok,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
    };

    // Phase 4: atomic swap under the in-process refresh mutex.
    {
        let mut store = app.store_for_swap().await;
        store.close().await;
        if let Err(rename_err) = std::fs::rename(&tmp, &app.config.db_path) {
            let _ = std::fs::remove_file(&tmp);
            // The primary is untouched; restore the read handle before
            // propagating.
            *store = Store::open(&app.config.db_path, true)
                .await
                .context("failed to reopen store after swap failure")?;
            return Err(rename_err).context("failed to swap shadow database");
        }
        *store = Store::open(&app.config.db_path, true)
            .await
            .context("failed to reopen store after swap")?;
    }

    // Phase 5: index rebuild (unlocked).
    app.rebuild_index().await?;
    let index = app.index().await;
    info!(
        documents = index.document_count(),
        chunks = index.chunk_count(),
        "index rebuilt"
    );

    for err in &all_errors {
        warn!("{err}");
    }

    Ok(RefreshResult {
        refreshed_count,
        indexed_documents: index.document_count(),
        indexed_chunks: index.chunk_count(),
        sources: source_stats,
        errors: if all_errors.is_empty() {
            None
        } else {
            Some(all_errors)
        },
        skipped: false,
        reason: None,
    })
}

/// Write the fetched corpus into `<db_path>.tmp` and persist the re-chunked
/// chunk table (plus FTS when enabled).
async fn shadow_write(
    config: &Config,
    tmp: &Path,
    fetched: &[(Source, Vec<FetchedDocument>, Vec<String>)],
) -> Result<(usize, Vec<SourceRefreshStats>)> {
    let _ = std::fs::remove_file(tmp);
    if config.db_path.exists() {
        std::fs::copy(&config.db_path, tmp).context("failed to copy database for shadow write")?;
    }

    let writer = Store::open(tmp, false)
        .await
        .context("failed to open shadow database")?;

    let result = write_corpus(config, &writer, fetched).await;
    writer.close().await;
    result
}

async fn write_corpus(
    config: &Config,
    writer: &Store,
    fetched: &[(Source, Vec<FetchedDocument>, Vec<String>)],
) -> Result<(usize, Vec<SourceRefreshStats>)> {
    let mut total_docs = 0usize;
    let mut stats = Vec::with_capacity(fetched.len());

    for (source, documents, source_errors) in fetched {
        let mut valid_urls: HashSet<String> = HashSet::new();
        for doc in documents {
            writer
                .upsert_document(
                    &source.name,
                    &source.url,
                    &doc.url,
                    doc.title.as_deref(),
                    &doc.content,
                )
                .await?;
            valid_urls.insert(doc.url.clone());
            total_docs += 1;
        }

        let deleted = writer.delete_stale_documents(&source.name, &valid_urls).await?;
        if deleted > 0 {
            info!(source = %source.name, deleted, "removed stale documents");
        }

        stats.push(SourceRefreshStats {
            name: source.name.clone(),
            url: source.url.clone(),
            doc_count: documents.len(),
            errors: source_errors.len(),
        });
    }

    // Persist the chunk table the index will be rebuilt from, so the FTS
    // candidate stage has ids to join against after the swap.
    let all_docs = writer.get_all_documents().await?;
    let mut chunks: Vec<(i64, ChunkSpan)> = Vec::new();
    for doc in &all_docs {
        for span in split_chunks(&doc.content, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP) {
            chunks.push((doc.id, span));
        }
    }
    if config.enable_fts {
        writer.create_fts_index().await?;
    }
    writer.bulk_store_all_chunks(&chunks).await?;

    Ok((total_docs, stats))
}

/// Background ticker: refresh every `refresh_interval_hours`, until
/// cancelled. Individual refresh failures are logged and never end the
/// loop.
pub async fn periodic_refresh(app: std::sync::Arc<App>, shutdown: CancellationToken) {
    let interval =
        std::time::Duration::from_secs(u64::from(app.config.refresh_interval_hours) * 3600);
    info!(
        hours = app.config.refresh_interval_hours,
        "periodic refresh enabled"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("periodic refresh cancelled");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        info!("starting scheduled refresh");
        match refresh_all(&app).await {
            Ok(result) if result.skipped => {
                info!(reason = result.reason.as_deref().unwrap_or(""), "refresh skipped");
            }
            Ok(result) => {
                info!(docs = result.refreshed_count, "scheduled refresh completed");
            }
            Err(e) => error!("scheduled refresh failed: {e:#}"),
        }
    }
}

/// Whether App start should trigger a refresh: yes when the store records
/// no sources at all, or when any configured source that has a row is older
/// than the TTL. Sources with no row never force a refresh by themselves.
pub async fn needs_startup_refresh(app: &App) -> Result<bool> {
    if app.config.skip_startup_refresh {
        return Ok(false);
    }
    if app.config.sources.is_empty() {
        return Ok(false);
    }

    let stats = {
        let store = app.store().await;
        store.get_source_stats().await?
    };
    if stats.is_empty() {
        info!("no documents in database, triggering initial fetch");
        return Ok(true);
    }

    let threshold =
        chrono::Utc::now() - chrono::Duration::hours(i64::from(app.config.refresh_interval_hours));
    for source in &app.config.sources {
        let stat = stats.iter().find(|s| s.name == source.name);
        match stat.and_then(|s| s.last_updated) {
            Some(last_updated) if last_updated < threshold => {
                info!(source = %source.name, %last_updated, "source is stale");
                return Ok(true);
            }
            Some(_) => {}
            // Never fetched successfully; attempted on the next tick.
            None => {}
        }
    }

    Ok(false)
}
