//! A hybrid search core combining dense ANN, lexical, and set-similarity
//! retrieval behind one ranked-search API.
//!
//! # Architecture
//!
//! Every document indexed by [`Engine`] is projected into three independent
//! representations, each consulted on every `search` call and fused with
//! fixed weights into one ranked list:
//!
//! - **Dense**: an [`HNSWIndex`](dense::hnsw::HNSWIndex) over embeddings
//!   produced by an external [`Embedder`]: this core never trains or runs a
//!   model itself.
//! - **Set similarity**: a MinHash + LSH-banding index ([`lsh`]) over token
//!   shingles, approximating Jaccard similarity without an exhaustive
//!   pairwise comparison.
//! - **Lexical**: an Okapi BM25 inverted index ([`bm25`]).
//!
//! A fourth representation, [`ProductQuantizer`](dense::ivf_pq::ProductQuantizer),
//! compresses stored vectors for the on-disk footprint only; it is never
//! consulted during search.
//!
//! [`Engine::search`] fans the dense and set-similarity lookups out across
//! two threads (`std::thread::scope`, not an async runtime: see the
//! scheduling note below), unions their candidates, and scores every
//! candidate against all three representations before sorting.
//!
//! # Incremental updates
//!
//! Document adds, updates, and deletes do not touch the indexes directly.
//! They are queued through [`Engine::apply_document_change`] and applied in
//! batches by an [`IncrementalManager`] running on its own background
//! thread, consolidating redundant events (an add immediately followed by a
//! delete becomes a no-op) and triggering a full HNSW rebuild once enough
//! tombstones accumulate. See [`incremental`] for the consolidation rules.
//!
//! # Persistence
//!
//! [`Engine::save_indexes`]/[`Engine::load_indexes`] read and write three
//! files under [`EngineConfig::index_path`]: see [`persistence`] for the
//! on-disk layout. Save is best-effort; load is lenient (a missing or
//! corrupt file degrades to empty state rather than failing construction).
//!
//! # Scheduling model
//!
//! This crate has no async runtime in its dependency graph. The incremental
//! manager's batch cadence and the candidate-fanout parallelism both run on
//! plain `std::thread`s, matching the rest of the `rank-*` family's
//! preference for direct OS threads over a reactor when the concurrency is
//! this simple (a handful of long-lived or short-lived threads, no need for
//! task-level cancellation beyond a shutdown flag).

pub mod bm25;
pub mod dense;
pub mod document;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod filtering;
pub mod incremental;
pub mod lsh;
pub mod persistence;
mod simd;

pub use document::{tokenize, tokenize_with_repeats, Document, DocumentMetadata, SeniorityLevel};
pub use embedder::{Embedder, HashEmbedder};
pub use engine::{BuildReport, Engine, EngineConfig, PerformanceStats, SearchResult};
pub use error::{
    EmbeddingError, EngineError, ErrorContext, IndexBuildError, PersistenceError, RetrieveError, SearchError,
    ValidationError,
};
pub use filtering::SearchFilters;
pub use incremental::{
    AddOutcome, ChangeKind, DeleteOutcome, DocumentChange, FlushResult, IncrementalConfig, IncrementalManager,
    IncrementalStats, MutableIndexSink,
};
