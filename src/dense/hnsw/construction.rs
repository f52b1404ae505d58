//! HNSW graph construction and incremental insertion.
//!
//! Neighbor selection uses Relative Neighborhood Diversification (RND):
//! a candidate `X_j` is kept only if `dist(X_q, X_j) < dist(X_i, X_j)` for
//! every neighbor `X_i` already selected. Of the common diversification
//! strategies (RND/MOND/RRND), RND gives the best pruning ratio and is the
//! only one this core exposes: fixed HNSW parameters with no runtime
//! tuning mean the other strategies have no caller.
use std::collections::VecDeque;

use crate::error::RetrieveError;
use crate::dense::hnsw::distance;
use crate::dense::hnsw::graph::{HNSWIndex, Layer};
use smallvec::SmallVec;

fn select_neighbors_rnd(candidates: &[(u32, f32)], m: usize, vectors: &[f32], dimension: usize) -> Vec<u32> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<(u32, f32)> = candidates.to_vec();
    sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected = Vec::with_capacity(m.min(sorted.len()));
    if let Some((id, _)) = sorted.first() {
        selected.push(*id);
    }

    for (candidate_id, query_to_candidate_dist) in sorted.iter().skip(1) {
        if selected.len() >= m {
            break;
        }

        let candidate_vec = get_vector(vectors, dimension, *candidate_id as usize);
        let mut can_add = true;

        for &selected_id in &selected {
            let selected_vec = get_vector(vectors, dimension, selected_id as usize);
            let inter_distance = distance::cosine_distance(selected_vec, candidate_vec);
            if *query_to_candidate_dist >= inter_distance {
                can_add = false;
                break;
            }
        }

        if can_add {
            selected.push(*candidate_id);
        }
    }

    while selected.len() < m && selected.len() < sorted.len() {
        for (id, _) in &sorted {
            if !selected.contains(id) {
                selected.push(*id);
                break;
            }
        }
    }

    selected
}

/// Get vector from SoA storage.
pub fn get_vector(vectors: &[f32], dimension: usize, idx: usize) -> &[f32] {
    let start = idx * dimension;
    let end = start + dimension;
    &vectors[start..end]
}

/// Insert a single already-appended node into the graph.
///
/// `node_id` must already have a vector in `index.vectors` and a layer in
/// `index.layer_assignments`. Used both for the initial full build (looped
/// over every node) and for incremental `add_documents` (one call per new
/// vector), so the index never needs a from-scratch rebuild to accept an add.
pub(crate) fn insert_node(index: &mut HNSWIndex, node_id: u32) -> Result<(), RetrieveError> {
    let node_layer = index.layer_assignments[node_id as usize] as usize;

    // Grow the layer stack to cover this node's assigned layer.
    while index.layers.len() <= node_layer {
        let width = index.num_vectors;
        index.layers.push(Layer::new(vec![SmallVec::new(); width]));
    }
    // Every existing layer's neighbor list must cover the new node's slot too.
    for layer in index.layers.iter_mut() {
        let neighbors = layer.get_neighbors_mut();
        while neighbors.len() <= node_id as usize {
            neighbors.push(SmallVec::new());
        }
    }

    let (entry_point, entry_layer) = match index.entry_point {
        Some(ep) if ep != node_id => (ep, index.entry_layer as usize),
        _ => {
            // First node in the index, or re-inserting the current entry point.
            if index.num_vectors == 1 {
                index.entry_point = Some(node_id);
                index.entry_layer = node_layer as u8;
                return Ok(());
            }
            (index.entry_point.unwrap_or(node_id), index.entry_layer as usize)
        }
    };

    let current_vector = index.get_vector(node_id as usize).to_vec();
    let mut closest = entry_point;

    // Descend through layers above node_layer to find a good entry point.
    for layer_idx in (node_layer + 1..=entry_layer).rev() {
        if layer_idx >= index.layers.len() {
            continue;
        }
        closest = greedy_descend(index, &current_vector, closest, layer_idx);
    }

    // Connect at every layer from node_layer down to 0.
    for layer_idx in (0..=node_layer.min(index.layers.len().saturating_sub(1))).rev() {
        let mut candidates = Vec::with_capacity(index.params.ef_construction);
        let mut visited = std::collections::HashSet::with_capacity(index.params.ef_construction);
        let mut frontier: VecDeque<u32> = VecDeque::new();
        frontier.push_back(closest);

        while let Some(explore_id) = frontier.pop_front() {
            if candidates.len() >= index.params.ef_construction {
                break;
            }
            if !visited.insert(explore_id) {
                continue;
            }
            let explore_vec = index.get_vector(explore_id as usize);
            let dist = distance::cosine_distance(&current_vector, explore_vec);
            candidates.push((explore_id, dist));

            let neighbors = index.layers[layer_idx].get_neighbors(explore_id);
            for &n in neighbors.iter() {
                if !visited.contains(&n) {
                    frontier.push_back(n);
                }
            }
        }

        let m_actual = if layer_idx == 0 { index.params.m_max } else { index.params.m };
        let selected = select_neighbors_rnd(&candidates, m_actual, &index.vectors, index.dimension);

        if let Some(&first) = selected.first() {
            closest = first;
        }

        let layer = &mut index.layers[layer_idx];
        let neighbors_vec = layer.get_neighbors_mut();

        for &neighbor_id in &selected {
            let neighbors = &mut neighbors_vec[node_id as usize];
            if !neighbors.contains(&neighbor_id) {
                neighbors.push(neighbor_id);
            }

            let reverse = &mut neighbors_vec[neighbor_id as usize];
            if !reverse.contains(&node_id) {
                reverse.push(node_id);
            }
            if reverse.len() > m_actual {
                let reverse_vec = reverse.to_vec();
                let neighbor_vec = get_vector(&index.vectors, index.dimension, neighbor_id as usize).to_vec();
                let mut scored: Vec<(u32, f32)> = reverse_vec
                    .iter()
                    .map(|&id| {
                        let v = get_vector(&index.vectors, index.dimension, id as usize);
                        (id, distance::cosine_distance(&neighbor_vec, v))
                    })
                    .collect();
                scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
                scored.truncate(m_actual);
                *reverse = scored.into_iter().map(|(id, _)| id).collect();
            }
        }
    }

    if node_layer > entry_layer {
        index.entry_point = Some(node_id);
        index.entry_layer = node_layer as u8;
    }

    Ok(())
}

fn greedy_descend(index: &HNSWIndex, query: &[f32], start: u32, layer_idx: usize) -> u32 {
    let layer = &index.layers[layer_idx];
    let mut current = start;
    let mut current_dist = distance::cosine_distance(query, index.get_vector(current as usize));
    let mut changed = true;

    while changed {
        changed = false;
        let neighbors = layer.get_neighbors(current);
        for &n in neighbors.iter() {
            let dist = distance::cosine_distance(query, index.get_vector(n as usize));
            if dist < current_dist {
                current_dist = dist;
                current = n;
                changed = true;
            }
        }
    }

    current
}

/// Build the full graph from scratch by inserting every node in order.
pub fn construct_graph(index: &mut HNSWIndex) -> Result<(), RetrieveError> {
    if index.num_vectors == 0 {
        return Err(RetrieveError::EmptyIndex);
    }

    for node_id in 0..index.num_vectors as u32 {
        insert_node(index, node_id)?;
    }

    Ok(())
}
