//! Error types for the hybrid search core.
//!
//! Two layers: `RetrieveError` is the low-level error internal index
//! structures (HNSW, BM25, LSH, PQ) raise among themselves, simple and
//! `Other`-extensible, with no request context. `EngineError` (below) is
//! what crosses the public boundary; it wraps the lower-level failure into
//! one of the five named kinds from the error-handling design, stamped with
//! a request id, a timestamp, and a truncated echo of the offending input.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Errors that can occur during low-level retrieval operations (HNSW, BM25, LSH, PQ).
#[derive(Debug, Clone, PartialEq)]
pub enum RetrieveError {
    /// Empty query provided.
    EmptyQuery,
    /// Empty index (no documents indexed).
    EmptyIndex,
    /// Invalid parameter value.
    InvalidParameter(String),
    /// Dimension mismatch between query and documents.
    DimensionMismatch {
        query_dim: usize,
        doc_dim: usize,
    },
    /// Other error (for extensibility).
    Other(String),
}

impl fmt::Display for RetrieveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrieveError::EmptyQuery => write!(f, "Query is empty"),
            RetrieveError::EmptyIndex => write!(f, "Index is empty"),
            RetrieveError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            RetrieveError::DimensionMismatch { query_dim, doc_dim } => {
                write!(f, "Dimension mismatch: query has {} dimensions, document has {}", query_dim, doc_dim)
            }
            RetrieveError::Other(msg) => {
                write!(f, "Error: {}", msg)
            }
        }
    }
}

impl std::error::Error for RetrieveError {}

/// Maximum number of characters of caller-supplied text echoed back in an error.
pub const MAX_ECHO_CHARS: usize = 100;

fn truncate_echo(input: &str) -> String {
    if input.chars().count() <= MAX_ECHO_CHARS {
        input.to_string()
    } else {
        let mut truncated: String = input.chars().take(MAX_ECHO_CHARS).collect();
        truncated.push_str("...");
        truncated
    }
}

/// Opaque, monotonically increasing request id. Cheap to generate; no UUID
/// dependency since nothing in the lineage this crate is grounded on pulls one in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        RequestId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Seconds since the Unix epoch, captured at error-construction time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamp(u64);

impl Timestamp {
    fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Timestamp(secs)
    }

    pub fn unix_seconds(&self) -> u64 {
        self.0
    }
}

/// Shared envelope stamped onto every error variant: a request id, a
/// timestamp, and (optionally) a truncated echo of the offending input.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: RequestId,
    pub timestamp: Timestamp,
    pub echo: Option<String>,
}

impl ErrorContext {
    fn new(echo: Option<&str>) -> Self {
        Self {
            request_id: RequestId::next(),
            timestamp: Timestamp::now(),
            echo: echo.map(truncate_echo),
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.echo {
            Some(echo) => write!(f, "[{} @ {}] input={:?}", self.request_id, self.timestamp.0, echo),
            None => write!(f, "[{} @ {}]", self.request_id, self.timestamp.0),
        }
    }
}

/// Validation failure at the public boundary: empty query, out-of-range
/// `num_results`, malformed filters, malformed documents.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
    pub field: Option<String>,
    pub context: ErrorContext,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), field: None, context: ErrorContext::new(None) }
    }

    pub fn on_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self { message: message.into(), field: Some(field.into()), context: ErrorContext::new(None) }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "validation error on '{}': {} {}", field, self.message, self.context),
            None => write!(f, "validation error: {} {}", self.message, self.context),
        }
    }
}

impl std::error::Error for ValidationError {}

/// The external `Embedder` capability returned an error or malformed output.
#[derive(Debug, Clone)]
pub struct EmbeddingError {
    pub message: String,
    pub context: ErrorContext,
}

impl EmbeddingError {
    pub fn new(message: impl Into<String>, text: &str) -> Self {
        Self { message: message.into(), context: ErrorContext::new(Some(text)) }
    }
}

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "embedding error: {} {}", self.message, self.context)
    }
}

impl std::error::Error for EmbeddingError {}

/// An index build phase failed; the engine discards partial state and keeps
/// whatever was there before `build_indexes` was called.
#[derive(Debug, Clone)]
pub struct IndexBuildError {
    pub message: String,
    pub context: ErrorContext,
}

impl IndexBuildError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), context: ErrorContext::new(None) }
    }
}

impl fmt::Display for IndexBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index build error: {} {}", self.message, self.context)
    }
}

impl std::error::Error for IndexBuildError {}

/// Candidate retrieval or scoring failed unexpectedly during `search`.
#[derive(Debug, Clone)]
pub struct SearchError {
    pub message: String,
    pub context: ErrorContext,
}

impl SearchError {
    pub fn new(message: impl Into<String>, query: &str) -> Self {
        Self { message: message.into(), context: ErrorContext::new(Some(query)) }
    }
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "search error: {} {}", self.message, self.context)
    }
}

impl std::error::Error for SearchError {}

/// Save failed. (Load errors are recovered from, not raised: see `persistence`.)
#[derive(Debug, Clone)]
pub struct PersistenceError {
    pub message: String,
    pub context: ErrorContext,
}

impl PersistenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), context: ErrorContext::new(None) }
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "persistence error: {} {}", self.message, self.context)
    }
}

impl std::error::Error for PersistenceError {}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::new(format!("io error: {}", e))
    }
}

impl From<postcard::Error> for PersistenceError {
    fn from(e: postcard::Error) -> Self {
        PersistenceError::new(format!("serialization error: {}", e))
    }
}

/// Top-level error type unifying every kind the core can raise.
#[derive(Debug, Clone)]
pub enum EngineError {
    Validation(ValidationError),
    Embedding(EmbeddingError),
    IndexBuild(IndexBuildError),
    Search(SearchError),
    Persistence(PersistenceError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "{}", e),
            EngineError::Embedding(e) => write!(f, "{}", e),
            EngineError::IndexBuild(e) => write!(f, "{}", e),
            EngineError::Search(e) => write!(f, "{}", e),
            EngineError::Persistence(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl From<EmbeddingError> for EngineError {
    fn from(e: EmbeddingError) -> Self {
        EngineError::Embedding(e)
    }
}

impl From<IndexBuildError> for EngineError {
    fn from(e: IndexBuildError) -> Self {
        EngineError::IndexBuild(e)
    }
}

impl From<SearchError> for EngineError {
    fn from(e: SearchError) -> Self {
        EngineError::Search(e)
    }
}

impl From<PersistenceError> for EngineError {
    fn from(e: PersistenceError) -> Self {
        EngineError::Persistence(e)
    }
}

impl From<RetrieveError> for EngineError {
    fn from(e: RetrieveError) -> Self {
        EngineError::Search(SearchError::new(e.to_string(), ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_echo() {
        let long_query = "q".repeat(500);
        let err = SearchError::new("boom", &long_query);
        let echo = err.context.echo.unwrap();
        assert!(echo.ends_with("..."));
        assert_eq!(echo.chars().count(), MAX_ECHO_CHARS + 3);
    }

    #[test]
    fn short_echo_untouched() {
        let err = SearchError::new("boom", "rust");
        assert_eq!(err.context.echo.unwrap(), "rust");
    }

    #[test]
    fn request_ids_are_unique() {
        let a = ValidationError::new("a");
        let b = ValidationError::new("b");
        assert_ne!(a.context.request_id, b.context.request_id);
    }
}

