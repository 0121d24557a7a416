//! Error types for catalog extraction
//!
//! Field-level and item-level failures are recoverable: extractors turn them
//! into entries of an error list and keep scanning. Only `Fatal`, `Config`
//! and `Cancelled` end a run.

use thiserror::Error;

/// Result type alias for extraction operations
pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Error, Debug)]
pub enum CatalogError {
    /// A field spec cannot be resolved against the current row, node or page
    #[error("cannot resolve field: {0}")]
    Address(String),

    /// One row, XML item or product page failed to become a record
    #[error("{0}")]
    RowItem(String),

    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// A run precondition was violated; nothing was processed
    #[error("{0}")]
    Fatal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl CatalogError {
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        CatalogError::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error ends the whole run rather than one item
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CatalogError::Fatal(_) | CatalogError::Config(_) | CatalogError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(CatalogError::Fatal("no seed URLs".into()).is_fatal());
        assert!(CatalogError::Cancelled.is_fatal());
        assert!(!CatalogError::fetch("https://example.com", "timeout").is_fatal());
        assert!(!CatalogError::RowItem("Row 3: bad".into()).is_fatal());
    }

    #[test]
    fn test_fetch_message() {
        let err = CatalogError::fetch("https://example.com/p/1", "HTTP 404");
        assert_eq!(
            err.to_string(),
            "fetch failed for https://example.com/p/1: HTTP 404"
        );
    }
}
