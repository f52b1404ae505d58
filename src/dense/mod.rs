//! Dense vector indexing: HNSW approximate nearest neighbor search and
//! Product Quantization for memory-footprint reduction.

pub mod hnsw;
pub mod ivf_pq;
