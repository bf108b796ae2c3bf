//! Error types shared by the store, index, and tool operations.
//!
//! Fetch failures are not represented here: the fetcher accumulates them as
//! per-link message strings inside a refresh (see [`crate::fetcher`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Another writer holds the database file.
    #[error("database locked by another writer")]
    Locked,

    /// A tool asked for a `doc_url` that is not in the store.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// An excerpt search produced no positively-scored chunks.
    #[error("No relevant excerpts found for query: {0}")]
    NoMatch(String),

    /// Schema initialization or migration failed. Fatal to the caller.
    #[error("schema migration failed: {0}")]
    Schema(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let e = Error::NotFound("https://example.com/a.md".into());
        assert!(e.to_string().contains("https://example.com/a.md"));
    }

    #[test]
    fn test_no_match_display() {
        let e = Error::NoMatch("lifetimes".into());
        assert!(e.to_string().contains("lifetimes"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn test_db_error_converts() {
        let db = sqlx::Error::RowNotFound;
        let e: Error = db.into();
        assert!(matches!(e, Error::Db(_)));
    }
}
