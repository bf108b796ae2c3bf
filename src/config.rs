//! Configuration loading and validation.
//!
//! llmdoc is configured from environment variables, falling back to an
//! optional `llmdoc.json` in the working directory, falling back to
//! defaults. Resolution is per key: an environment variable overrides the
//! JSON file, which overrides the default. Invalid integers are silently
//! ignored.
//!
//! Source strings come in two forms:
//! - `name:url` — explicit name, split on the last `:` before the `://`
//! - `url` — name derived from the host with `.` and `-` replaced by `_`

use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::Deserialize;

/// A documentation source: an llms.txt manifest URL or a single document URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub url: String,
}

impl Source {
    /// Parse a source string in `name:url` or bare `url` form.
    pub fn parse(source_str: &str) -> Source {
        let source_str = source_str.trim();

        if let Some(protocol_pos) = source_str.find("://") {
            let prefix = &source_str[..protocol_pos];
            if let Some(name_end) = prefix.rfind(':') {
                return Source {
                    name: prefix[..name_end].to_string(),
                    url: source_str[name_end + 1..].to_string(),
                };
            }
            let name = Url::parse(source_str)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            return Source {
                name: sanitize_name(&name),
                url: source_str.to_string(),
            };
        }

        // No protocol: treat as a path-ish URL and derive the name from the stem.
        let stem = Path::new(source_str)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(source_str);
        Source {
            name: sanitize_name(stem),
            url: source_str.to_string(),
        }
    }
}

fn sanitize_name(raw: &str) -> String {
    raw.replace(['.', '-'], "_")
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sources: Vec<Source>,
    pub db_path: PathBuf,
    /// TTL and periodic tick period, clamped to [1, 168] hours.
    pub refresh_interval_hours: u32,
    /// Fetcher semaphore capacity, clamped to [1, 20].
    pub max_concurrent_fetches: usize,
    pub skip_startup_refresh: bool,
    /// Toggles the two-stage (FTS candidates + BM25 rerank) retrieval path.
    pub enable_fts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            db_path: default_db_path(),
            refresh_interval_hours: 6,
            max_concurrent_fetches: 5,
            skip_startup_refresh: false,
            enable_fts: true,
        }
    }
}

impl Config {
    /// Clamp numeric fields to their valid ranges.
    fn clamped(mut self) -> Self {
        self.refresh_interval_hours = self.refresh_interval_hours.clamp(1, 168);
        self.max_concurrent_fetches = self.max_concurrent_fetches.clamp(1, 20);
        self
    }
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".llmdoc")
        .join("index.db")
}

/// Expand a leading `~/` against the user's home directory.
fn expand_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// JSON file shape. Sources accept both `"name:url"` strings and
/// `{ "name": ..., "url": ... }` objects.
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    sources: Option<Vec<SourceEntry>>,
    #[serde(default)]
    db_path: Option<String>,
    #[serde(default)]
    refresh_interval_hours: Option<i64>,
    #[serde(default)]
    max_concurrent_fetches: Option<i64>,
    #[serde(default)]
    skip_startup_refresh: Option<bool>,
    #[serde(default)]
    enable_fts: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceEntry {
    Text(String),
    Named { name: String, url: String },
}

impl SourceEntry {
    fn into_source(self) -> Source {
        match self {
            SourceEntry::Text(s) => Source::parse(&s),
            SourceEntry::Named { name, url } => Source { name, url },
        }
    }
}

/// Load configuration from the environment and `llmdoc.json`.
pub fn load_config() -> Config {
    load_config_from(Path::new("llmdoc.json"))
}

/// Load configuration resolving the JSON file at an explicit path.
pub fn load_config_from(file_path: &Path) -> Config {
    let file: ConfigFile = std::fs::read_to_string(file_path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default();

    let mut config = Config::default();

    if let Some(entries) = file.sources {
        config.sources = entries.into_iter().map(SourceEntry::into_source).collect();
    }
    if let Some(path) = file.db_path {
        config.db_path = expand_path(&path);
    }
    if let Some(hours) = file.refresh_interval_hours {
        config.refresh_interval_hours = hours.max(0) as u32;
    }
    if let Some(n) = file.max_concurrent_fetches {
        config.max_concurrent_fetches = n.max(0) as usize;
    }
    if let Some(skip) = file.skip_startup_refresh {
        config.skip_startup_refresh = skip;
    }
    if let Some(fts) = file.enable_fts {
        config.enable_fts = fts;
    }

    if let Ok(env_sources) = std::env::var("LLMDOC_SOURCES") {
        let parsed: Vec<Source> = env_sources
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Source::parse)
            .collect();
        if !parsed.is_empty() {
            config.sources = parsed;
        }
    }
    if let Ok(path) = std::env::var("LLMDOC_DB_PATH") {
        config.db_path = expand_path(&path);
    }
    if let Ok(raw) = std::env::var("LLMDOC_REFRESH_INTERVAL") {
        if let Ok(hours) = raw.trim().parse::<u32>() {
            config.refresh_interval_hours = hours;
        }
    }
    if let Ok(raw) = std::env::var("LLMDOC_MAX_CONCURRENT") {
        if let Ok(n) = raw.trim().parse::<usize>() {
            config.max_concurrent_fetches = n;
        }
    }
    if let Ok(raw) = std::env::var("LLMDOC_SKIP_STARTUP_REFRESH") {
        config.skip_startup_refresh = matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes");
    }

    config.clamped()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "LLMDOC_SOURCES",
            "LLMDOC_DB_PATH",
            "LLMDOC_REFRESH_INTERVAL",
            "LLMDOC_MAX_CONCURRENT",
            "LLMDOC_SKIP_STARTUP_REFRESH",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_parse_named_source() {
        let s = Source::parse("fast_mcp:https://gofastmcp.com/llms.txt");
        assert_eq!(s.name, "fast_mcp");
        assert_eq!(s.url, "https://gofastmcp.com/llms.txt");
    }

    #[test]
    fn test_parse_unnamed_source() {
        let s = Source::parse("https://example.com/llms.txt");
        assert_eq!(s.name, "example_com");
        assert_eq!(s.url, "https://example.com/llms.txt");
    }

    #[test]
    fn test_parse_source_with_subdomain() {
        let s = Source::parse("https://ai.pydantic.dev/llms.txt");
        assert_eq!(s.name, "ai_pydantic_dev");
    }

    #[test]
    fn test_parse_source_with_hyphen() {
        let s = Source::parse("https://my-docs.example.com/llms.txt");
        assert_eq!(s.name, "my_docs_example_com");
    }

    #[test]
    fn test_parse_strips_whitespace() {
        let s = Source::parse("  docs:https://example.com/llms.txt  ");
        assert_eq!(s.name, "docs");
        assert_eq!(s.url, "https://example.com/llms.txt");
    }

    #[test]
    fn test_default_config() {
        let c = Config::default();
        assert!(c.sources.is_empty());
        assert_eq!(c.refresh_interval_hours, 6);
        assert_eq!(c.max_concurrent_fetches, 5);
        assert!(!c.skip_startup_refresh);
        assert!(c.enable_fts);
    }

    #[test]
    fn test_load_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var(
            "LLMDOC_SOURCES",
            "a:https://a.test/llms.txt, b:https://b.test/llms.txt",
        );
        std::env::set_var("LLMDOC_REFRESH_INTERVAL", "12");
        std::env::set_var("LLMDOC_MAX_CONCURRENT", "9");
        std::env::set_var("LLMDOC_SKIP_STARTUP_REFRESH", "yes");

        let c = load_config_from(Path::new("/nonexistent/llmdoc.json"));
        assert_eq!(c.sources.len(), 2);
        assert_eq!(c.sources[0].name, "a");
        assert_eq!(c.sources[1].url, "https://b.test/llms.txt");
        assert_eq!(c.refresh_interval_hours, 12);
        assert_eq!(c.max_concurrent_fetches, 9);
        assert!(c.skip_startup_refresh);
        clear_env();
    }

    #[test]
    fn test_invalid_integers_fall_back_to_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("LLMDOC_REFRESH_INTERVAL", "not-a-number");
        std::env::set_var("LLMDOC_MAX_CONCURRENT", "2.5");

        let c = load_config_from(Path::new("/nonexistent/llmdoc.json"));
        assert_eq!(c.refresh_interval_hours, 6);
        assert_eq!(c.max_concurrent_fetches, 5);
        clear_env();
    }

    #[test]
    fn test_clamping() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("LLMDOC_REFRESH_INTERVAL", "500");
        std::env::set_var("LLMDOC_MAX_CONCURRENT", "0");

        let c = load_config_from(Path::new("/nonexistent/llmdoc.json"));
        assert_eq!(c.refresh_interval_hours, 168);
        assert_eq!(c.max_concurrent_fetches, 1);
        clear_env();
    }

    #[test]
    fn test_load_from_json_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llmdoc.json");
        std::fs::write(
            &path,
            r#"{
                "sources": [
                    "docs:https://docs.test/llms.txt",
                    { "name": "other", "url": "https://other.test/page.md" }
                ],
                "refresh_interval_hours": 24,
                "enable_fts": false
            }"#,
        )
        .unwrap();

        let c = load_config_from(&path);
        assert_eq!(c.sources.len(), 2);
        assert_eq!(c.sources[0].name, "docs");
        assert_eq!(c.sources[1].name, "other");
        assert_eq!(c.refresh_interval_hours, 24);
        assert!(!c.enable_fts);
    }

    #[test]
    fn test_env_takes_precedence_over_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llmdoc.json");
        std::fs::write(&path, r#"{ "refresh_interval_hours": 24 }"#).unwrap();
        std::env::set_var("LLMDOC_REFRESH_INTERVAL", "2");

        let c = load_config_from(&path);
        assert_eq!(c.refresh_interval_hours, 2);
        clear_env();
    }
}
