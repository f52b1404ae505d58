//! MinHash + banding LSH index over token feature sets.
//!
//! Unlike a classic random-hyperplane LSH (which hashes dense vectors via
//! projections), this index operates on set-valued text features: each
//! document contributes a deduplicated set of lowercase tokens, and recall
//! comes from how many minhash bands two sets agree on rather than from
//! vector proximity. The band-bucket shape, `Vec<HashMap<bucket_hash,
//! Vec<doc_id>>>`, one map per table/band, mirrors a conventional
//! `hash_tables: Vec<HashMap<u64, Vec<u32>>>` layout.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::RetrieveError;

/// A prime near 2^61, large enough that universal-hash collisions across
/// distinct tokens are negligible at corpus sizes this engine targets.
const MERSENNE_PRIME: u64 = (1u64 << 61) - 1;

/// Seed for the minhash coefficient generator. Fixed so that two `LSHIndex`
/// instances built from the same documents produce identical signatures,
/// which the persistence round-trip property requires.
const HASH_COEFF_SEED: u64 = 0x4D_696E_4861_7368; // "MinHash" in hex-ish

/// LSH parameters: `num_hashes` minhash functions split into `num_bands`
/// bands of `num_hashes / num_bands` rows each.
#[derive(Clone, Debug)]
pub struct LSHParams {
    pub num_hashes: usize,
    pub num_bands: usize,
}

impl Default for LSHParams {
    fn default() -> Self {
        Self { num_hashes: 128, num_bands: 16 }
    }
}

/// MinHash signature index with LSH banding for sublinear candidate recall.
pub struct LSHIndex {
    params: LSHParams,
    rows_per_band: usize,
    hash_coeffs: Vec<(u64, u64)>,
    signatures: HashMap<String, Vec<u64>>,
    band_buckets: Vec<HashMap<u64, Vec<String>>>,
}

impl LSHIndex {
    pub fn new(params: LSHParams) -> Result<Self, RetrieveError> {
        if params.num_hashes == 0 || params.num_bands == 0 {
            return Err(RetrieveError::InvalidParameter(
                "num_hashes and num_bands must be > 0".to_string(),
            ));
        }
        if params.num_hashes % params.num_bands != 0 {
            return Err(RetrieveError::InvalidParameter(
                "num_hashes must be divisible by num_bands".to_string(),
            ));
        }

        let rows_per_band = params.num_hashes / params.num_bands;
        let mut rng = ChaCha8Rng::seed_from_u64(HASH_COEFF_SEED);
        let hash_coeffs = (0..params.num_hashes)
            .map(|_| {
                let a = rng.gen_range(1..MERSENNE_PRIME);
                let b = rng.gen_range(0..MERSENNE_PRIME);
                (a, b)
            })
            .collect();

        let band_buckets = (0..params.num_bands).map(|_| HashMap::new()).collect();

        Ok(Self { params, rows_per_band, hash_coeffs, signatures: HashMap::new(), band_buckets })
    }

    fn token_hash(token: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        hasher.finish()
    }

    fn signature(&self, features: &[String]) -> Vec<u64> {
        if features.is_empty() {
            return vec![0; self.params.num_hashes];
        }
        let token_hashes: Vec<u64> = features.iter().map(|t| Self::token_hash(t)).collect();
        self.hash_coeffs
            .iter()
            .map(|&(a, b)| {
                token_hashes
                    .iter()
                    .map(|&x| a.wrapping_mul(x).wrapping_add(b) % MERSENNE_PRIME)
                    .min()
                    .unwrap_or(0)
            })
            .collect()
    }

    fn band_hash(signature: &[u64], band: usize, rows_per_band: usize) -> u64 {
        let mut hasher = DefaultHasher::new();
        let start = band * rows_per_band;
        signature[start..start + rows_per_band].hash(&mut hasher);
        hasher.finish()
    }

    /// Compute and store `doc_id`'s signature, bucketing it into every band.
    /// Replaces any prior registration for the id.
    pub fn add_document(&mut self, doc_id: &str, features: &[String]) {
        self.remove_document(doc_id);
        let sig = self.signature(features);
        for (band, bucket) in self.band_buckets.iter_mut().enumerate() {
            let bh = Self::band_hash(&sig, band, self.rows_per_band);
            bucket.entry(bh).or_default().push(doc_id.to_string());
        }
        self.signatures.insert(doc_id.to_string(), sig);
    }

    /// Remove `doc_id` from every band bucket and drop its signature.
    /// Returns `false` if the id was not registered.
    pub fn remove_document(&mut self, doc_id: &str) -> bool {
        let Some(sig) = self.signatures.remove(doc_id) else {
            return false;
        };
        for (band, bucket) in self.band_buckets.iter_mut().enumerate() {
            let bh = Self::band_hash(&sig, band, self.rows_per_band);
            if let Some(ids) = bucket.get_mut(&bh) {
                ids.retain(|id| id != doc_id);
                if ids.is_empty() {
                    bucket.remove(&bh);
                }
            }
        }
        true
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.signatures.contains_key(doc_id)
    }

    /// Candidate ids whose signature shares at least one band with the
    /// query's. Ties for the `cap` cutoff favor ids that matched more bands,
    /// then lexically smaller `doc_id`s.
    pub fn query_candidates(&self, features: &[String], cap: usize) -> Vec<String> {
        let sig = self.signature(features);
        let mut band_matches: HashMap<String, usize> = HashMap::new();

        for (band, bucket) in self.band_buckets.iter().enumerate() {
            let bh = Self::band_hash(&sig, band, self.rows_per_band);
            if let Some(ids) = bucket.get(&bh) {
                for id in ids {
                    *band_matches.entry(id.clone()).or_insert(0) += 1;
                }
            }
        }

        let mut candidates: Vec<(String, usize)> = band_matches.into_iter().collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(cap);
        candidates.into_iter().map(|(id, _)| id).collect()
    }

    /// Signature-based Jaccard estimate: the fraction of the `num_hashes`
    /// minhash positions where the stored signature agrees with the query's.
    /// Returns `0.0` if `doc_id` was never registered.
    pub fn jaccard_similarity(&self, doc_id: &str, query_features: &[String]) -> f32 {
        let Some(stored) = self.signatures.get(doc_id) else {
            return 0.0;
        };
        let query_sig = self.signature(query_features);
        let matches = stored.iter().zip(query_sig.iter()).filter(|(a, b)| a == b).count();
        matches as f32 / self.params.num_hashes as f32
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub(crate) fn params(&self) -> &LSHParams {
        &self.params
    }

    /// Reconstruct from persisted signatures, rebuilding band buckets.
    pub(crate) fn from_signatures(params: LSHParams, signatures: HashMap<String, Vec<u64>>) -> Result<Self, RetrieveError> {
        let mut index = Self::new(params)?;
        for (doc_id, sig) in signatures {
            for (band, bucket) in index.band_buckets.iter_mut().enumerate() {
                let bh = Self::band_hash(&sig, band, index.rows_per_band);
                bucket.entry(bh).or_default().push(doc_id.clone());
            }
            index.signatures.insert(doc_id, sig);
        }
        Ok(index)
    }

    pub(crate) fn signatures(&self) -> &HashMap<String, Vec<u64>> {
        &self.signatures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_non_divisible_bands() {
        assert!(LSHIndex::new(LSHParams { num_hashes: 100, num_bands: 16 }).is_err());
    }

    #[test]
    fn identical_sets_have_jaccard_one() {
        let mut index = LSHIndex::new(LSHParams::default()).unwrap();
        let f = features(&["rust", "systems", "engineer"]);
        index.add_document("a", &f);
        assert_eq!(index.jaccard_similarity("a", &f), 1.0);
    }

    #[test]
    fn disjoint_sets_find_no_candidates() {
        let mut index = LSHIndex::new(LSHParams::default()).unwrap();
        index.add_document("a", &features(&["rust", "backend", "systems", "concurrency"]));
        let candidates = index.query_candidates(&features(&["cooking", "pastry", "baking", "desserts"]), 10);
        assert!(!candidates.contains(&"a".to_string()));
    }

    #[test]
    fn overlapping_sets_are_candidates() {
        let mut index = LSHIndex::new(LSHParams::default()).unwrap();
        let f = features(&["rust", "systems", "engineer", "concurrency", "hnsw"]);
        index.add_document("a", &f);
        let candidates = index.query_candidates(&f, 10);
        assert!(candidates.contains(&"a".to_string()));
    }

    #[test]
    fn remove_document_clears_candidacy() {
        let mut index = LSHIndex::new(LSHParams::default()).unwrap();
        let f = features(&["rust", "systems", "engineer"]);
        index.add_document("a", &f);
        assert!(index.remove_document("a"));
        assert!(!index.remove_document("a"));
        let candidates = index.query_candidates(&f, 10);
        assert!(!candidates.contains(&"a".to_string()));
    }

    #[test]
    fn candidate_cap_prefers_more_band_matches_then_doc_id() {
        let mut index = LSHIndex::new(LSHParams::default()).unwrap();
        let f = features(&["rust", "systems", "engineer", "concurrency", "hnsw", "search"]);
        index.add_document("z", &f);
        index.add_document("a", &f);
        let candidates = index.query_candidates(&f, 1);
        assert_eq!(candidates, vec!["a".to_string()]);
    }
}
