//! HNSW search algorithm.

use std::collections::{BinaryHeap, HashSet};

use crate::dense::hnsw::distance::cosine_distance;

/// Candidate node during search.
#[derive(Clone, PartialEq)]
pub(crate) struct Candidate {
    pub(crate) id: u32,
    pub(crate) distance: f32,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        // Min-heap: smaller distance = higher priority
        other.distance.partial_cmp(&self.distance)
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.partial_cmp(other).unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// Search state for HNSW search algorithm.
pub(crate) struct SearchState {
    candidates: BinaryHeap<Candidate>,
    visited: HashSet<u32>,
}

impl SearchState {
    pub(crate) fn with_capacity(ef: usize) -> Self {
        Self {
            candidates: BinaryHeap::with_capacity(ef * 2),
            visited: HashSet::with_capacity(ef * 2),
        }
    }

    pub(crate) fn add_candidate(&mut self, id: u32, distance: f32) {
        if !self.visited.contains(&id) {
            self.candidates.push(Candidate { id, distance });
        }
    }

    pub(crate) fn pop_candidate(&mut self) -> Option<Candidate> {
        while let Some(candidate) = self.candidates.pop() {
            if !self.visited.contains(&candidate.id) {
                self.visited.insert(candidate.id);
                return Some(candidate);
            }
        }
        None
    }
}

/// Greedy search in a single layer.
///
/// Finds up to `ef` nearest unvisited nodes to `query`, starting from `entry_point`.
pub fn greedy_search_layer(
    query: &[f32],
    entry_point: u32,
    layer: &crate::dense::hnsw::graph::Layer,
    vectors: &[f32],
    dimension: usize,
    ef: usize,
) -> Vec<(u32, f32)> {
    let mut state = SearchState::with_capacity(ef);

    let entry_vector = get_vector(vectors, dimension, entry_point as usize);
    let entry_distance = cosine_distance(query, entry_vector);
    state.add_candidate(entry_point, entry_distance);

    let mut results = Vec::with_capacity(ef);

    while let Some(candidate) = state.pop_candidate() {
        results.push((candidate.id, candidate.distance));

        if results.len() >= ef {
            break;
        }

        let neighbors = layer.get_neighbors(candidate.id);
        for &neighbor_id in neighbors.iter() {
            let neighbor_vector = get_vector(vectors, dimension, neighbor_id as usize);
            let neighbor_distance = cosine_distance(query, neighbor_vector);
            state.add_candidate(neighbor_id, neighbor_distance);
        }
    }

    results
}

fn get_vector(vectors: &[f32], dimension: usize, idx: usize) -> &[f32] {
    let start = idx * dimension;
    let end = start + dimension;
    &vectors[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(Candidate { id: 0, distance: 0.5 });
        heap.push(Candidate { id: 1, distance: 0.1 });
        heap.push(Candidate { id: 2, distance: 0.3 });

        assert_eq!(heap.pop().unwrap().distance, 0.1);
        assert_eq!(heap.pop().unwrap().distance, 0.3);
        assert_eq!(heap.pop().unwrap().distance, 0.5);
    }
}
