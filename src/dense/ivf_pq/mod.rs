//! Product Quantization for memory-footprint reduction.
//!
//! PQ here exists purely to shrink the on-disk and in-memory size of the
//! vector store (`pq_quantizer.bin`); it plays no role in candidate search,
//! which is HNSW's job against full-precision vectors. IVF partitioning and
//! online/optimized PQ variants are out of scope and not implemented.
//!
//! # References
//!
//! - Jegou et al. (2011): "Product Quantization for Nearest Neighbor Search"

mod pq;

pub use pq::ProductQuantizer;
