//! HNSW graph structure and core types.
//!
//! Unlike the generic, runtime-tunable HNSW in the wider `rank-*` family,
//! this index is purpose-built for one engine: vectors arrive and are
//! normalized on add, parameters are fixed (no diversification-strategy or
//! seed-selection choice at construction), and the index keeps a parallel
//! `doc_ids` list so callers never track the position <-> id mapping
//! themselves.

use crate::error::RetrieveError;
use smallvec::SmallVec;

/// HNSW index for approximate nearest neighbor search.
///
/// Implements the Hierarchical Navigable Small World algorithm (Malkov &
/// Yashunin, 2016), storing L2-normalized vectors so cosine similarity
/// reduces to a dot product.
pub struct HNSWIndex {
    /// Vectors stored in Structure of Arrays (SoA) format for cache efficiency.
    /// Layout: [v0[0..d], v1[0..d], ..., vn[0..d]]
    pub(crate) vectors: Vec<f32>,

    pub(crate) dimension: usize,
    pub(crate) num_vectors: usize,

    /// position i -> the doc_id whose normalized vector occupies slot i.
    /// Never shrinks: deletes are handled by the caller's tombstone set,
    /// not by removing entries here.
    pub(crate) doc_ids: Vec<String>,

    /// Graph layers (index 0 = base layer, higher = upper layers).
    pub(crate) layers: Vec<Layer>,

    /// Layer assignment for each vector (max layer where the vector appears).
    pub(crate) layer_assignments: Vec<u8>,

    pub(crate) params: HNSWParams,

    pub(crate) entry_point: Option<u32>,
    pub(crate) entry_layer: u8,
}

/// HNSW parameters controlling graph structure and search behavior.
///
/// Fixed at construction time; the core does not expose runtime tuning,
/// favoring recall at the small-to-medium corpus sizes this engine targets.
#[derive(Clone, Debug)]
pub struct HNSWParams {
    /// Maximum number of connections per node above the base layer.
    pub m: usize,
    /// Maximum connections for nodes in the base layer.
    pub m_max: usize,
    /// Layer assignment probability parameter (1/ln(2) ~= 1.44).
    pub m_l: f64,
    /// Search width during construction.
    pub ef_construction: usize,
    /// Default search width during query.
    pub ef_search: usize,
}

impl Default for HNSWParams {
    fn default() -> Self {
        Self {
            m: 16,
            m_max: 16,
            m_l: 1.0 / 2.0_f64.ln(),
            ef_construction: 200,
            ef_search: 50,
        }
    }
}

/// Neighbor lists for every node at one layer.
pub(crate) struct Layer {
    neighbors: Vec<SmallVec<[u32; 16]>>,
}

impl Layer {
    pub(crate) fn new(neighbors: Vec<SmallVec<[u32; 16]>>) -> Self {
        Self { neighbors }
    }

    pub(crate) fn get_neighbors_mut(&mut self) -> &mut Vec<SmallVec<[u32; 16]>> {
        &mut self.neighbors
    }

    pub(crate) fn get_neighbors(&self, node: u32) -> SmallVec<[u32; 16]> {
        self.neighbors.get(node as usize).cloned().unwrap_or_default()
    }
}

impl HNSWIndex {
    /// Create a new, empty HNSW index for `dimension`-sized vectors using the
    /// core's fixed parameters.
    pub fn new(dimension: usize) -> Result<Self, RetrieveError> {
        if dimension == 0 {
            return Err(RetrieveError::InvalidParameter("dimension must be > 0".to_string()));
        }
        Ok(Self {
            vectors: Vec::new(),
            dimension,
            num_vectors: 0,
            doc_ids: Vec::new(),
            layers: Vec::new(),
            layer_assignments: Vec::new(),
            params: HNSWParams::default(),
            entry_point: None,
            entry_layer: 0,
        })
    }

    /// Reconstruct an index from persisted parts.
    pub(crate) fn from_parts(
        vectors: Vec<f32>,
        dimension: usize,
        doc_ids: Vec<String>,
        layers: Vec<Layer>,
        layer_assignments: Vec<u8>,
        params: HNSWParams,
        entry_point: Option<u32>,
        entry_layer: u8,
    ) -> Self {
        let num_vectors = doc_ids.len();
        Self {
            vectors,
            dimension,
            num_vectors,
            doc_ids,
            layers,
            layer_assignments,
            params,
            entry_point,
            entry_layer,
        }
    }

    pub fn len(&self) -> usize {
        self.num_vectors
    }

    pub fn is_empty(&self) -> bool {
        self.num_vectors == 0
    }

    pub fn doc_ids(&self) -> &[String] {
        &self.doc_ids
    }

    /// Append normalized vectors and extend the parallel `doc_ids` list,
    /// inserting each into the graph immediately (incremental add).
    ///
    /// Dimension mismatch is a fatal construction error; nothing from this
    /// call is partially applied.
    pub fn add_documents(&mut self, vectors: &[Vec<f32>], doc_ids: &[String]) -> Result<(), RetrieveError> {
        if vectors.len() != doc_ids.len() {
            return Err(RetrieveError::InvalidParameter(
                "vectors and doc_ids must have the same length".to_string(),
            ));
        }
        for v in vectors {
            if v.len() != self.dimension {
                return Err(RetrieveError::DimensionMismatch {
                    query_dim: self.dimension,
                    doc_dim: v.len(),
                });
            }
        }

        for (vector, doc_id) in vectors.iter().zip(doc_ids.iter()) {
            let normalized = normalize(vector);
            let node_id = self.num_vectors as u32;
            self.vectors.extend_from_slice(&normalized);
            self.doc_ids.push(doc_id.clone());
            self.num_vectors += 1;
            let layer = self.assign_layer();
            self.layer_assignments.push(layer);

            crate::dense::hnsw::construction::insert_node(self, node_id)?;
        }

        Ok(())
    }

    /// Search for up to `k` nearest neighbors of `query` (which need not be
    /// pre-normalized; it is normalized internally).
    ///
    /// Returns `(doc_id, cosine_distance)` pairs sorted by ascending distance.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, RetrieveError> {
        if query.len() != self.dimension {
            return Err(RetrieveError::DimensionMismatch {
                query_dim: self.dimension,
                doc_dim: query.len(),
            });
        }
        if self.num_vectors == 0 {
            return Ok(Vec::new());
        }

        let query = normalize(query);
        let ef = self.params.ef_search.max(k);

        let entry_point = self.entry_point.expect("num_vectors > 0 implies an entry point");
        let mut closest = entry_point;

        for layer_idx in (1..=self.entry_layer as usize).rev() {
            if layer_idx >= self.layers.len() {
                continue;
            }
            closest = self.greedy_descend(&query, closest, layer_idx);
        }

        let mut results: Vec<(u32, f32)> = if self.layers.is_empty() {
            let dist = crate::dense::hnsw::distance::cosine_distance(&query, self.get_vector(closest as usize));
            vec![(closest, dist)]
        } else {
            crate::dense::hnsw::search::greedy_search_layer(
                &query,
                closest,
                &self.layers[0],
                &self.vectors,
                self.dimension,
                ef,
            )
        };

        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);

        Ok(results
            .into_iter()
            .map(|(id, dist)| (self.doc_ids[id as usize].clone(), dist))
            .collect())
    }

    fn greedy_descend(&self, query: &[f32], start: u32, layer_idx: usize) -> u32 {
        let layer = &self.layers[layer_idx];
        let mut current = start;
        let mut current_dist = crate::dense::hnsw::distance::cosine_distance(query, self.get_vector(current as usize));
        let mut changed = true;

        while changed {
            changed = false;
            let neighbors = layer.get_neighbors(current);
            for &n in neighbors.iter() {
                let dist = crate::dense::hnsw::distance::cosine_distance(query, self.get_vector(n as usize));
                if dist < current_dist {
                    current_dist = dist;
                    current = n;
                    changed = true;
                }
            }
        }

        current
    }

    fn assign_layer(&self) -> u8 {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut layer = 0u8;
        while rng.gen::<f64>() < 1.0 / self.params.m_l && layer < 63 {
            layer += 1;
        }
        layer
    }

    pub(crate) fn get_vector(&self, idx: usize) -> &[f32] {
        let start = idx * self.dimension;
        let end = start + self.dimension;
        &self.vectors[start..end]
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = crate::simd::norm(v);
    if norm < 1e-9 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_index() {
        let index = HNSWIndex::new(3).unwrap();
        assert_eq!(index.dimension, 3);
        assert_eq!(index.num_vectors, 0);
    }

    #[test]
    fn test_add_and_search() {
        let mut index = HNSWIndex::new(3).unwrap();
        index
            .add_documents(
                &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.9, 0.1, 0.0]],
                &["a".to_string(), "b".to_string(), "c".to_string()],
            )
            .unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = HNSWIndex::new(3).unwrap();
        let result = index.add_documents(&[vec![1.0, 0.0]], &["a".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_incremental_add_after_initial_batch() {
        let mut index = HNSWIndex::new(2).unwrap();
        index.add_documents(&[vec![1.0, 0.0]], &["a".to_string()]).unwrap();
        index.add_documents(&[vec![0.0, 1.0]], &["b".to_string()]).unwrap();
        assert_eq!(index.len(), 2);
        let results = index.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(results[0].0, "b");
    }

    #[test]
    fn test_empty_index_search() {
        let index = HNSWIndex::new(3).unwrap();
        let results = index.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert!(results.is_empty());
    }
}
