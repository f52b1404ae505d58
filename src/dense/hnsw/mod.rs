//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor search.
//!
//! Pure Rust implementation with SIMD-accelerated distance computation and a
//! cache-friendly Structure-of-Arrays vector layout.
//!
//! # Algorithm
//!
//! HNSW constructs a multi-layer graph where upper layers hold sparse,
//! long-range connections for fast navigation and the base layer holds dense,
//! local connections for precise search. A query descends from the entry
//! point's layer down to the base layer, greedily narrowing at each level.
//!
//! Every insertion, whether part of the initial batch build or a later
//! incremental add, goes through the same single-node insertion path, so
//! the graph never needs a "closed for writes" state.
//!
//! # References
//!
//! - Malkov & Yashunin (2016): "Efficient and robust approximate nearest neighbor search
//!   using Hierarchical Navigable Small World graphs"

pub(crate) mod graph;
pub(crate) mod search;
pub(crate) mod construction;
pub(crate) mod distance;

pub use graph::{HNSWIndex, HNSWParams};
