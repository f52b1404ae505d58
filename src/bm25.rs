//! Inverted index and Okapi BM25 scoring.
//!
//! # BM25 Formula
//!
//! ```text
//! BM25(q, d) = sum_i IDF(q_i) * (f(q_i, d) * (k1 + 1)) / (f(q_i, d) + k1 * (1 - b + b * |d|/avgdl))
//! ```
//!
//! Where `f(q_i, d)` is the frequency of term `q_i` in document `d`, `|d|` is
//! the document length, `avgdl` the average document length, `k1` the term
//! frequency saturation parameter, and `b` the length-normalization parameter.

use crate::error::RetrieveError;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// BM25 parameters. `k1` defaults to 1.5, matching the reference system this
/// core was distilled from (the wider `rank-*` family defaults to 1.2, but
/// this engine keeps the original's tuning).
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term frequency saturation parameter.
    pub k1: f32,
    /// Length normalization parameter.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Inverted index for BM25 retrieval, keyed by the engine's string document ids.
pub struct InvertedIndex {
    /// term -> (doc_id -> term frequency)
    postings: HashMap<String, HashMap<String, u32>>,
    /// doc_id -> document length (in terms)
    doc_lengths: HashMap<String, u32>,
    num_docs: u32,
    avg_doc_length: f32,
    /// term -> number of documents containing it
    doc_frequencies: HashMap<String, u32>,

    /// Lazily (re)computed on the next retrieval after the index changes.
    /// `Mutex`, not `RefCell`: the engine shares `&InvertedIndex` across the
    /// parallel candidate-fanout threads in `search`, so this cache needs to
    /// be `Sync`.
    precomputed_idf: Mutex<HashMap<String, f32>>,
    idf_computed_at_num_docs: Mutex<u32>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self {
            postings: HashMap::new(),
            doc_lengths: HashMap::new(),
            num_docs: 0,
            avg_doc_length: 0.0,
            doc_frequencies: HashMap::new(),
            precomputed_idf: Mutex::new(HashMap::new()),
            idf_computed_at_num_docs: Mutex::new(0),
        }
    }

    fn invalidate_idf(&self) {
        self.precomputed_idf.lock().unwrap().clear();
        *self.idf_computed_at_num_docs.lock().unwrap() = 0;
    }

    fn ensure_idf_computed(&self) {
        let computed_at = *self.idf_computed_at_num_docs.lock().unwrap();
        if computed_at == self.num_docs && !self.precomputed_idf.lock().unwrap().is_empty() {
            return;
        }

        let mut idf_map = self.precomputed_idf.lock().unwrap();
        idf_map.clear();
        let n = self.num_docs as f32;
        for (term, df) in &self.doc_frequencies {
            let df_f = *df as f32;
            if df_f > 0.0 {
                let idf = ((n - df_f + 0.5) / (df_f + 0.5) + 1.0).ln();
                idf_map.insert(term.clone(), idf);
            }
        }
        *self.idf_computed_at_num_docs.lock().unwrap() = self.num_docs;
    }

    /// Add a document, tokenized into `terms`.
    pub fn add_document(&mut self, doc_id: &str, terms: &[String]) {
        self.remove_document(doc_id); // replace semantics: reindexing an existing id is a no-op bug otherwise

        let doc_length = terms.len() as u32;
        self.doc_lengths.insert(doc_id.to_string(), doc_length);

        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for term in terms {
            *term_freqs.entry(term.clone()).or_insert(0) += 1;
        }

        for (term, freq) in term_freqs {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(doc_id.to_string(), freq);
            *self.doc_frequencies.entry(term).or_insert(0) += 1;
        }

        self.num_docs += 1;
        self.update_avg_doc_length();
        self.invalidate_idf();
    }

    /// Remove a document. Used by the incremental manager to apply deletes
    /// and to coerce an add-after-delete into a clean re-add. A no-op if the
    /// id was never indexed.
    pub fn remove_document(&mut self, doc_id: &str) -> bool {
        let Some(_) = self.doc_lengths.remove(doc_id) else {
            return false;
        };

        let mut emptied_terms = Vec::new();
        for (term, postings) in self.postings.iter_mut() {
            if postings.remove(doc_id).is_some() {
                if let Some(df) = self.doc_frequencies.get_mut(term) {
                    *df = df.saturating_sub(1);
                    if *df == 0 {
                        emptied_terms.push(term.clone());
                    }
                }
            }
        }
        for term in emptied_terms {
            self.doc_frequencies.remove(&term);
            self.postings.remove(&term);
        }

        self.num_docs = self.num_docs.saturating_sub(1);
        self.update_avg_doc_length();
        self.invalidate_idf();
        true
    }

    fn update_avg_doc_length(&mut self) {
        if self.num_docs == 0 {
            self.avg_doc_length = 0.0;
            return;
        }
        let total_length: u32 = self.doc_lengths.values().sum();
        self.avg_doc_length = total_length as f32 / self.num_docs as f32;
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.doc_lengths.contains_key(doc_id)
    }

    /// Inverse document frequency for a term, using the BM25 `+1` variant
    /// that keeps IDF positive even for terms present in most documents.
    pub fn idf(&self, term: &str) -> f32 {
        {
            let idf_map = self.precomputed_idf.lock().unwrap();
            if let Some(&idf) = idf_map.get(term) {
                return idf;
            }
        }
        let df = self.doc_frequencies.get(term).copied().unwrap_or(0) as f32;
        if df == 0.0 {
            return 0.0;
        }
        let n = self.num_docs as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score a single document against a query.
    pub fn score(&self, doc_id: &str, query_terms: &[String], params: Bm25Params) -> f32 {
        if self.avg_doc_length == 0.0 {
            return 0.0;
        }
        let doc_length = self.doc_lengths.get(doc_id).copied().unwrap_or(0) as f32;
        let mut score = 0.0;

        for term in query_terms {
            let idf = self.idf(term);
            if idf == 0.0 {
                continue;
            }
            let tf = self
                .postings
                .get(term)
                .and_then(|postings| postings.get(doc_id))
                .copied()
                .unwrap_or(0) as f32;
            if tf == 0.0 {
                continue;
            }

            let numerator = tf * (params.k1 + 1.0);
            let denominator = tf + params.k1 * (1.0 - params.b + params.b * doc_length / self.avg_doc_length);
            score += idf * (numerator / denominator);
        }

        score
    }

    /// Retrieve the top-k documents for a query, sorted by descending BM25 score.
    pub fn retrieve(&self, query_terms: &[String], k: usize, params: Bm25Params) -> Result<Vec<(String, f32)>, RetrieveError> {
        if query_terms.is_empty() {
            return Err(RetrieveError::EmptyQuery);
        }
        if self.num_docs == 0 {
            return Err(RetrieveError::EmptyIndex);
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        self.ensure_idf_computed();
        let query_idfs: Vec<f32> = query_terms.iter().map(|term| self.idf(term)).collect();

        let mut candidates: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for term in query_terms {
            if let Some(postings) = self.postings.get(term) {
                for doc_id in postings.keys() {
                    if seen.insert(doc_id.as_str()) {
                        candidates.push(doc_id.as_str());
                    }
                }
            }
        }

        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        #[derive(PartialEq)]
        struct FloatOrd(f32);
        impl Eq for FloatOrd {}
        impl PartialOrd for FloatOrd {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for FloatOrd {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
            }
        }

        let mut heap: BinaryHeap<Reverse<(FloatOrd, String)>> = BinaryHeap::with_capacity(k + 1);

        for doc_id in candidates {
            let score = self.score_optimized(doc_id, query_terms, &query_idfs, params);
            if !score.is_finite() || score <= 0.0 {
                continue;
            }

            if heap.len() < k {
                heap.push(Reverse((FloatOrd(score), doc_id.to_string())));
            } else if let Some(Reverse((FloatOrd(min_score), _))) = heap.peek() {
                if score > *min_score {
                    heap.pop();
                    heap.push(Reverse((FloatOrd(score), doc_id.to_string())));
                }
            }
        }

        let mut results: Vec<(String, f32)> = heap
            .into_iter()
            .map(|Reverse((FloatOrd(score), doc_id))| (doc_id, score))
            .collect();
        results.sort_unstable_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }

    fn score_optimized(&self, doc_id: &str, query_terms: &[String], query_idfs: &[f32], params: Bm25Params) -> f32 {
        let doc_length = self.doc_lengths.get(doc_id).copied().unwrap_or(0) as f32;
        let mut score = 0.0;

        for (term, &idf) in query_terms.iter().zip(query_idfs.iter()) {
            if idf == 0.0 {
                continue;
            }
            let tf = self
                .postings
                .get(term)
                .and_then(|postings| postings.get(doc_id))
                .copied()
                .unwrap_or(0) as f32;
            if tf == 0.0 {
                continue;
            }

            let numerator = tf * (params.k1 + 1.0);
            let denominator = tf + params.k1 * (1.0 - params.b + params.b * doc_length / self.avg_doc_length);
            score += idf * (numerator / denominator);
        }

        score
    }
}

impl Default for InvertedIndex {
    fn default() -> Self {
        Self::new()
    }
}
