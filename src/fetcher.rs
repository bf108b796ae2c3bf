//! Document fetching for llms.txt manifests and standalone pages.
//!
//! A source URL whose path ends in `llms.txt` is treated as a manifest:
//! the manifest is downloaded, its markdown links are parsed in order, and
//! every linked document is fetched concurrently under a process-wide
//! semaphore. Any other URL is fetched as a single document.
//!
//! Fetched bodies are normalized to markdown by a content classifier
//! (URL suffix, then content-type, then a body sniff), and per-link
//! failures are captured as messages instead of failing the whole source.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Url;
use tokio::sync::Semaphore;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A link extracted from an llms.txt manifest, in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocLink {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
}

/// A fetched, markdown-normalized document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: String,
    pub title: Option<String>,
    pub content: String,
}

/// How a fetched body should be normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Markdown,
    PlainText,
    Html,
    Unknown,
}

fn link_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // [title](url) optionally followed by ": description" to end of line.
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)(?:\s*:\s*(.+?))?(?:\n|$)").unwrap())
}

fn h1_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#\s+(.+)$").unwrap())
}

fn html_sniff_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<(!DOCTYPE|html|head|body)").unwrap())
}

/// True when the URL path ends in `llms.txt` (case-sensitive).
pub fn is_llms_txt_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().ends_with("llms.txt"),
        Err(_) => url.ends_with("llms.txt"),
    }
}

/// Parse markdown inline links out of an llms.txt manifest, resolving
/// relative URLs against the manifest URL and preserving manifest order.
pub fn parse_llms_txt(content: &str, base_url: &str) -> Vec<DocLink> {
    let base = Url::parse(base_url).ok();
    let mut links = Vec::new();

    for caps in link_pattern().captures_iter(content) {
        let title = caps[1].trim().to_string();
        let raw_url = caps[2].trim();
        let description = caps.get(3).map(|m| m.as_str().trim().to_string());

        let absolute = match &base {
            Some(base) => base
                .join(raw_url)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| raw_url.to_string()),
            None => raw_url.to_string(),
        };

        links.push(DocLink {
            title,
            url: absolute,
            description,
        });
    }

    links
}

/// First H1 of markdown content, trimmed.
pub fn extract_title(content: &str) -> Option<String> {
    h1_pattern()
        .captures(content)
        .map(|caps| caps[1].trim().to_string())
}

/// Classify a body by URL suffix, then content-type, then body sniff.
fn classify(url: &str, content_type: &str, body: &str) -> ContentKind {
    let path = Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());

    if path.ends_with(".md") || path.ends_with(".markdown") {
        return ContentKind::Markdown;
    }
    if path.ends_with(".txt") {
        return ContentKind::PlainText;
    }
    if content_type.contains("text/markdown") {
        return ContentKind::Markdown;
    }
    if content_type.contains("text/html") {
        return ContentKind::Html;
    }

    // Sniff the first kilobyte for HTML markers.
    let mut head_end = body.len().min(1024);
    while head_end > 0 && !body.is_char_boundary(head_end) {
        head_end -= 1;
    }
    if html_sniff_pattern().is_match(&body[..head_end]) {
        return ContentKind::Html;
    }

    ContentKind::Unknown
}

/// Normalize a body to markdown according to its classification.
fn normalize(url: &str, content_type: &str, body: String) -> String {
    match classify(url, content_type, &body) {
        ContentKind::Html => html2md::parse_html(&body),
        ContentKind::Markdown | ContentKind::PlainText | ContentKind::Unknown => body,
    }
}

pub struct Fetcher {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
}

impl Fetcher {
    /// Build a fetcher with the given per-request timeout and concurrency cap.
    pub fn new(timeout: Duration, max_concurrent: usize) -> Result<Fetcher> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Fetcher {
            client,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    async fn fetch_url(&self, url: &str) -> Result<(String, String)> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;
        Ok((body, content_type))
    }

    /// Fetch one document and normalize it to markdown.
    pub async fn fetch_document(&self, url: &str) -> Result<FetchedDocument> {
        let (body, content_type) = self.fetch_url(url).await?;
        let content = normalize(url, &content_type, body);
        let title = extract_title(&content);
        Ok(FetchedDocument {
            url: url.to_string(),
            title,
            content,
        })
    }

    /// Fetch everything a source URL refers to.
    ///
    /// Manifests fan out to their linked documents, bounded by the
    /// semaphore; the returned documents keep manifest link order (failed
    /// links are simply absent) and each failure is captured as a
    /// `"Failed to fetch <url>: <reason>"` message. A manifest-level
    /// failure yields an empty document list and a single error.
    pub async fn fetch_all_from_source(
        &self,
        source_url: &str,
    ) -> (Vec<FetchedDocument>, Vec<String>) {
        let mut documents = Vec::new();
        let mut errors = Vec::new();

        if is_llms_txt_url(source_url) {
            let manifest = match self.fetch_url(source_url).await {
                Ok((body, _)) => body,
                Err(e) => {
                    errors.push(format!("Failed to fetch source {source_url}: {e:#}"));
                    return (documents, errors);
                }
            };
            let links = parse_llms_txt(&manifest, source_url);

            let mut handles = Vec::with_capacity(links.len());
            for link in &links {
                let url = link.url.clone();
                let client = self.client.clone();
                let semaphore = self.semaphore.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    fetch_document_with(&client, &url).await
                }));
            }

            for (link, handle) in links.iter().zip(handles) {
                match handle.await {
                    Ok(Ok(mut doc)) => {
                        if doc.title.is_none() {
                            doc.title = Some(link.title.clone());
                        }
                        documents.push(doc);
                    }
                    Ok(Err(e)) => errors.push(format!("Failed to fetch {}: {e:#}", link.url)),
                    Err(e) => errors.push(format!("Failed to fetch {}: {e}", link.url)),
                }
            }
        } else {
            match self.fetch_document(source_url).await {
                Ok(doc) => documents.push(doc),
                Err(e) => errors.push(format!("Failed to fetch source {source_url}: {e:#}")),
            }
        }

        (documents, errors)
    }
}

/// Free-standing fetch used by the spawned per-link tasks.
async fn fetch_document_with(client: &reqwest::Client, url: &str) -> Result<FetchedDocument> {
    let response = client.get(url).send().await?.error_for_status()?;
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let body = response.text().await?;
    let content = normalize(url, &content_type, body);
    let title = extract_title(&content);
    Ok(FetchedDocument {
        url: url.to_string(),
        title,
        content,
    })
}
