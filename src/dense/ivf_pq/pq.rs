//! Product Quantization (PQ) implementation.
//!
//! Used here strictly for the memory-footprint reduction the component design
//! calls for: each document vector compressed to `num_codebooks` bytes for the
//! on-disk `pq_quantizer.bin` artifact. PQ codes are never consulted during
//! search: HNSW does that against the full-precision vectors.

use crate::error::RetrieveError;
use crate::simd;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const KMEANS_ITERATIONS: usize = 25;

/// Product Quantizer.
///
/// Decomposes vectors into subvectors and quantizes each subvector independently.
pub struct ProductQuantizer {
    dimension: usize,
    num_codebooks: usize,
    codebook_size: usize,
    subvector_dim: usize,
    codebooks: Vec<Vec<Vec<f32>>>, // [codebook][codeword][dimension]
    trained: bool,
}

impl ProductQuantizer {
    /// Create a new, untrained product quantizer.
    pub fn new(dimension: usize, num_codebooks: usize, codebook_size: usize) -> Result<Self, RetrieveError> {
        if dimension == 0 || num_codebooks == 0 || codebook_size == 0 {
            return Err(RetrieveError::InvalidParameter(
                "dimension, num_codebooks and codebook_size must all be > 0".to_string(),
            ));
        }

        if dimension % num_codebooks != 0 {
            return Err(RetrieveError::InvalidParameter(
                "dimension must be divisible by num_codebooks".to_string(),
            ));
        }

        Ok(Self {
            dimension,
            num_codebooks,
            codebook_size,
            subvector_dim: dimension / num_codebooks,
            codebooks: Vec::new(),
            trained: false,
        })
    }

    pub fn trained(&self) -> bool {
        self.trained
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn num_codebooks(&self) -> usize {
        self.num_codebooks
    }

    pub fn codebook_size(&self) -> usize {
        self.codebook_size
    }

    /// Train one codebook per subvector slice via Lloyd's k-means.
    pub fn fit(&mut self, vectors: &[f32], num_vectors: usize) -> Result<(), RetrieveError> {
        if num_vectors == 0 {
            return Err(RetrieveError::EmptyIndex);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(0xA77E5550); // fixed seed keeps codebook training deterministic
        self.codebooks = Vec::with_capacity(self.num_codebooks);

        for codebook_idx in 0..self.num_codebooks {
            let start_dim = codebook_idx * self.subvector_dim;
            let end_dim = start_dim + self.subvector_dim;

            let subvectors: Vec<Vec<f32>> = (0..num_vectors)
                .map(|i| get_vector(vectors, self.dimension, i)[start_dim..end_dim].to_vec())
                .collect();

            let centroids = kmeans(&subvectors, self.codebook_size.min(num_vectors.max(1)), &mut rng);
            self.codebooks.push(centroids);
        }

        self.trained = true;
        Ok(())
    }

    /// Quantize a vector, returning one codebook index per subvector.
    pub fn quantize(&self, vector: &[f32]) -> Vec<u8> {
        let mut codes = Vec::with_capacity(self.num_codebooks);

        for codebook_idx in 0..self.num_codebooks {
            let start_dim = codebook_idx * self.subvector_dim;
            let end_dim = start_dim + self.subvector_dim;
            let subvector = &vector[start_dim..end_dim];

            let mut best_code = 0u8;
            let mut best_dist = f32::INFINITY;
            for (code, codeword) in self.codebooks[codebook_idx].iter().enumerate() {
                let dist = cosine_distance(subvector, codeword);
                if dist < best_dist {
                    best_dist = dist;
                    best_code = code.min(255) as u8;
                }
            }
            codes.push(best_code);
        }

        codes
    }

    /// Approximate distance between `query` and an already-quantized vector.
    pub fn approximate_distance(&self, query: &[f32], codes: &[u8]) -> f32 {
        let mut total_dist = 0.0;
        for (codebook_idx, &code) in codes.iter().enumerate() {
            let start_dim = codebook_idx * self.subvector_dim;
            let end_dim = start_dim + self.subvector_dim;
            let query_subvector = &query[start_dim..end_dim];
            let codeword = &self.codebooks[codebook_idx][code as usize];
            total_dist += cosine_distance(query_subvector, codeword);
        }
        total_dist
    }

    pub fn codebooks(&self) -> &[Vec<Vec<f32>>] {
        &self.codebooks
    }

    pub(crate) fn from_parts(
        dimension: usize,
        num_codebooks: usize,
        codebook_size: usize,
        codebooks: Vec<Vec<Vec<f32>>>,
    ) -> Self {
        let trained = !codebooks.is_empty();
        Self {
            dimension,
            num_codebooks,
            codebook_size,
            subvector_dim: dimension / num_codebooks,
            codebooks,
            trained,
        }
    }
}

/// Lloyd's k-means with k-means++ initialization, run to a fixed iteration
/// count (no convergence check: the codebook only needs to be good enough to
/// shrink memory, not optimal).
fn kmeans(points: &[Vec<f32>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f32>> {
    use rand::Rng;

    if points.is_empty() || k == 0 {
        return Vec::new();
    }
    let k = k.min(points.len());
    let dim = points[0].len();

    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].clone());
    while centroids.len() < k {
        let distances: Vec<f32> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| cosine_distance(p, c))
                    .fold(f32::INFINITY, f32::min)
            })
            .collect();
        let total: f32 = distances.iter().sum();
        if total <= 0.0 {
            centroids.push(points[rng.gen_range(0..points.len())].clone());
            continue;
        }
        let mut threshold = rng.gen::<f32>() * total;
        let mut chosen = points.len() - 1;
        for (i, d) in distances.iter().enumerate() {
            threshold -= d;
            if threshold <= 0.0 {
                chosen = i;
                break;
            }
        }
        centroids.push(points[chosen].clone());
    }

    let mut assignments = vec![0usize; points.len()];
    for _ in 0..KMEANS_ITERATIONS {
        for (i, p) in points.iter().enumerate() {
            let mut best = 0;
            let mut best_dist = f32::INFINITY;
            for (c_idx, c) in centroids.iter().enumerate() {
                let dist = cosine_distance(p, c);
                if dist < best_dist {
                    best_dist = dist;
                    best = c_idx;
                }
            }
            assignments[i] = best;
        }

        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (p, &a) in points.iter().zip(assignments.iter()) {
            for (s, v) in sums[a].iter_mut().zip(p.iter()) {
                *s += v;
            }
            counts[a] += 1;
        }
        for c_idx in 0..k {
            if counts[c_idx] == 0 {
                continue;
            }
            for (c, s) in centroids[c_idx].iter_mut().zip(sums[c_idx].iter()) {
                *c = s / counts[c_idx] as f32;
            }
        }
    }

    centroids
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - simd::dot(a, b)
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
    fn test_fit_and_quantize() {
        let mut pq = ProductQuantizer::new(4, 2, 2).unwrap();
        let vectors = vec![
            1.0, 0.0, 1.0, 0.0, // doc 0
            0.0, 1.0, 0.0, 1.0, // doc 1
            0.9, 0.1, 0.9, 0.1, // doc 2
        ];
        pq.fit(&vectors, 3).unwrap();
        assert!(pq.trained());

        let codes = pq.quantize(&[1.0, 0.0, 1.0, 0.0]);
        assert_eq!(codes.len(), 2);
    }

    #[test]
    fn test_rejects_non_divisible_dimension() {
        assert!(ProductQuantizer::new(5, 2, 4).is_err());
    }
}
