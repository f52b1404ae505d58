//! The orchestrator tying the four indexes, the query cache, and the
//! incremental update manager into one search surface.
//!
//! `Engine` owns everything; the `IncrementalManager` it starts in `new`
//! only ever sees it through the `MutableIndexSink` capability, never as a
//! concrete type. See the module-level note in `incremental`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::bm25::{Bm25Params, InvertedIndex};
use crate::dense::hnsw::HNSWIndex;
use crate::dense::ivf_pq::ProductQuantizer;
use crate::document::{tokenize, tokenize_with_repeats, Document, DocumentMetadata};
use crate::embedder::Embedder;
use crate::error::{EmbeddingError, EngineError, IndexBuildError, PersistenceError, SearchError, ValidationError};
use crate::filtering::SearchFilters;
use crate::incremental::{
    ChangeKind, DeleteOutcome, AddOutcome, FlushResult, IncrementalConfig, IncrementalManager, IncrementalStats,
    MutableIndexSink,
};
use crate::lsh::{LSHIndex, LSHParams};
use crate::persistence;

const MIN_NUM_RESULTS: usize = 1;
const MAX_NUM_RESULTS: usize = 1000;
const HNSW_SEARCH_K: usize = 100;
const LSH_CANDIDATE_CAP: usize = 200;
const VECTOR_WEIGHT: f32 = 0.4;
const JACCARD_WEIGHT: f32 = 0.3;
const BM25_WEIGHT: f32 = 0.3;
const DEFAULT_CACHE_CAPACITY: usize = 1000;
const TOMBSTONE_REBUILD_THRESHOLD: usize = 100;

/// Fixed linear-combination fusion: 0.4 vector similarity + 0.3 Jaccard
/// estimate + 0.3 BM25 score. No learned or query-time weighting.
fn combine_scores(vector_sim: f32, jaccard: f32, bm25_score: f32) -> f32 {
    VECTOR_WEIGHT * vector_sim + JACCARD_WEIGHT * jaccard + BM25_WEIGHT * bm25_score
}

/// Construction-time configuration. Replaces an environment-variable-driven
/// settings singleton with an explicit struct passed to `Engine::new`,
/// taking parameters directly (`HNSWIndex::new`, `Bm25Params`) rather than
/// reading ambient configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub embedding_dim: usize,
    pub use_gpu: bool,
    pub index_path: PathBuf,
    pub embedding_model_name: String,
}

impl EngineConfig {
    pub fn new(embedding_dim: usize, index_path: impl Into<PathBuf>) -> Self {
        Self {
            embedding_dim,
            use_gpu: false,
            index_path: index_path.into(),
            embedding_model_name: "default".to_string(),
        }
    }
}

/// One ranked hit. `similarity_score` and `bm25_score` are exposed alongside
/// `combined_score` so a caller can see the fusion's inputs, not just its
/// output.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub doc_id: String,
    pub similarity_score: f32,
    pub bm25_score: f32,
    pub combined_score: f32,
    pub metadata: DocumentMetadata,
}

/// Outcome of a `build_indexes` call: how many documents made it in, and why
/// the rest didn't. This core has no logger, so skip reasons travel in the
/// return value instead of a log line.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub indexed: usize,
    pub skipped: Vec<(String, String)>,
}

/// Running search-latency/cache-hit accounting, per `performance_stats()`.
#[derive(Debug, Clone)]
pub struct PerformanceStats {
    pub total_searches: u64,
    pub avg_response_time_ms: f64,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Default)]
struct StatsInner {
    total_searches: u64,
    total_latency_ms: f64,
    cache_hits: u64,
}

struct QueryCache {
    capacity: usize,
    order: VecDeque<String>,
    map: HashMap<String, Vec<SearchResult>>,
}

impl QueryCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, order: VecDeque::new(), map: HashMap::new() }
    }

    fn get(&self, key: &str) -> Option<Vec<SearchResult>> {
        self.map.get(key).cloned()
    }

    /// FIFO insert: evicts the oldest key, not the least-recently-used one,
    /// per the cache's spec (insertion order, not access order).
    fn insert(&mut self, key: String, value: Vec<SearchResult>) {
        if !self.map.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.map.insert(key, value);
        while self.map.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.map.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.map.clear();
    }
}

fn sorted_strings(set: &HashSet<String>) -> Vec<&str> {
    let mut v: Vec<&str> = set.iter().map(|s| s.as_str()).collect();
    v.sort_unstable();
    v
}

/// Canonical cache key for (query, num_results, filters). Unit-separator
/// bytes keep the components unambiguous without pulling in a hashing crate.
fn cache_key(query: &str, num_results: usize, filters: &Option<SearchFilters>) -> String {
    let mut key = format!("{}\u{1}{}", query, num_results);
    if let Some(f) = filters {
        key.push('\u{1}');
        key.push_str(&format!("{:?}", f.min_experience));
        key.push('\u{1}');
        key.push_str(&format!("{:?}", f.max_experience));
        key.push('\u{1}');
        key.push_str(&format!("{:?}", f.seniority_levels.as_ref().map(sorted_strings)));
        key.push('\u{1}');
        key.push_str(&format!("{:?}", f.required_skills.as_ref().map(sorted_strings)));
        key.push('\u{1}');
        key.push_str(&format!("{:?}", f.excluded_skills.as_ref().map(sorted_strings)));
    }
    key
}

/// Pick a PQ codebook count that divides `dimension` evenly, preferring more
/// codebooks (finer quantization) and falling back to 1 (coarsest, but always
/// legal) when `dimension` shares no common divisor with the preferred set.
fn pq_params_for(dimension: usize) -> (usize, usize) {
    let num_codebooks = [8, 4, 2, 1].into_iter().find(|c| dimension % c == 0).unwrap_or(1);
    (num_codebooks, 256)
}

/// Everything mutated by `build_indexes`, `search`, and the incremental
/// manager's batch apply. Held behind one `RwLock` so a rebuild can swap the
/// whole thing in atomically.
struct IndexState {
    hnsw: HNSWIndex,
    lsh: LSHIndex,
    pq: ProductQuantizer,
    bm25: InvertedIndex,
    vectors: HashMap<String, Vec<f32>>,
    pq_codes: HashMap<String, Vec<u8>>,
    metadata: HashMap<String, DocumentMetadata>,
    text_features: HashMap<String, Vec<String>>,
    bm25_terms: HashMap<String, Vec<String>>,
    /// Ids tombstoned since the last full HNSW rebuild. Absent from
    /// `vectors`/`metadata` too; the tombstone set exists purely to
    /// suppress stale results still occupying an old HNSW graph slot.
    tombstones: HashSet<String>,
}

impl IndexState {
    fn empty(dimension: usize) -> Result<Self, EngineError> {
        let hnsw = HNSWIndex::new(dimension).map_err(|e| EngineError::from(IndexBuildError::new(e.to_string())))?;
        let lsh = LSHIndex::new(LSHParams::default()).map_err(|e| EngineError::from(IndexBuildError::new(e.to_string())))?;
        let (num_codebooks, codebook_size) = pq_params_for(dimension);
        let pq = ProductQuantizer::new(dimension, num_codebooks, codebook_size)
            .map_err(|e| EngineError::from(IndexBuildError::new(e.to_string())))?;
        Ok(Self {
            hnsw,
            lsh,
            pq,
            bm25: InvertedIndex::new(),
            vectors: HashMap::new(),
            pq_codes: HashMap::new(),
            metadata: HashMap::new(),
            text_features: HashMap::new(),
            bm25_terms: HashMap::new(),
            tombstones: HashSet::new(),
        })
    }
}

/// The hybrid search core. Construct with `Engine::new`; every public
/// operation takes `&self`, with internal mutability living behind
/// `RwLock`s and `Mutex`es so the engine can be shared as `Arc<Engine>`
/// across callers and the incremental manager's background thread alike.
pub struct Engine {
    config: EngineConfig,
    embedder: Arc<dyn Embedder>,
    state: RwLock<IndexState>,
    cache: Mutex<QueryCache>,
    stats: Mutex<StatsInner>,
    rebuild_in_progress: AtomicBool,
    manager: OnceLock<Mutex<IncrementalManager>>,
}

impl Engine {
    /// Construct a fresh engine, attempt to load whatever is persisted at
    /// `config.index_path` (absence is not an error), and start the
    /// incremental manager's background worker.
    pub fn new(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Arc<Self>, EngineError> {
        if embedder.dimension() != config.embedding_dim {
            return Err(EngineError::from(ValidationError::on_field(
                "embedder dimension does not match EngineConfig::embedding_dim",
                "embedding_dim",
            )));
        }

        let state = IndexState::empty(config.embedding_dim)?;
        let engine = Arc::new(Self {
            config,
            embedder,
            state: RwLock::new(state),
            cache: Mutex::new(QueryCache::new(DEFAULT_CACHE_CAPACITY)),
            stats: Mutex::new(StatsInner::default()),
            rebuild_in_progress: AtomicBool::new(false),
            manager: OnceLock::new(),
        });

        engine.load_indexes()?;

        let sink: Arc<dyn MutableIndexSink> = Arc::clone(&engine) as Arc<dyn MutableIndexSink>;
        let mut manager = IncrementalManager::new(sink, IncrementalConfig::default());
        manager.start();
        let _ = engine.manager.set(Mutex::new(manager));

        Ok(engine)
    }

    /// Fully replace the engine's state from `docs`. Documents failing
    /// structural validation are skipped (and named in the returned
    /// report) rather than aborting the whole build.
    pub fn build_indexes(&self, docs: &[Document]) -> Result<BuildReport, IndexBuildError> {
        let mut valid_docs = Vec::new();
        let mut skipped = Vec::new();
        for doc in docs {
            match doc.validate() {
                Ok(()) => valid_docs.push(doc),
                Err(e) => skipped.push((doc.id.clone(), e.message.clone())),
            }
        }

        if valid_docs.is_empty() {
            let mut state = self.state.write().unwrap();
            *state = IndexState::empty(self.config.embedding_dim).map_err(|e| IndexBuildError::new(e.to_string()))?;
            return Ok(BuildReport { indexed: 0, skipped });
        }

        let texts: Vec<String> = valid_docs.iter().map(|d| d.text()).collect();
        let vectors = self.embedder.encode(&texts).map_err(|e| IndexBuildError::new(e.to_string()))?;
        if vectors.len() != valid_docs.len() {
            return Err(IndexBuildError::new(
                "embedder returned a vector count that does not match the input batch",
            ));
        }

        let doc_ids: Vec<String> = valid_docs.iter().map(|d| d.id.clone()).collect();

        let mut hnsw =
            HNSWIndex::new(self.config.embedding_dim).map_err(|e| IndexBuildError::new(e.to_string()))?;
        hnsw.add_documents(&vectors, &doc_ids).map_err(|e| IndexBuildError::new(e.to_string()))?;

        let mut lsh = LSHIndex::new(LSHParams::default()).map_err(|e| IndexBuildError::new(e.to_string()))?;
        let mut bm25 = InvertedIndex::new();
        let mut metadata = HashMap::new();
        let mut text_features = HashMap::new();
        let mut bm25_terms_map = HashMap::new();
        let mut vectors_map = HashMap::new();

        for (doc, vector) in valid_docs.iter().zip(vectors.iter()) {
            let features = doc.text_features();
            let terms = tokenize_with_repeats(&doc.text());
            lsh.add_document(&doc.id, &features);
            bm25.add_document(&doc.id, &terms);
            metadata.insert(doc.id.clone(), doc.metadata());
            text_features.insert(doc.id.clone(), features);
            bm25_terms_map.insert(doc.id.clone(), terms);
            vectors_map.insert(doc.id.clone(), vector.clone());
        }

        let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
        let (num_codebooks, codebook_size) = pq_params_for(self.config.embedding_dim);
        let mut pq = ProductQuantizer::new(self.config.embedding_dim, num_codebooks, codebook_size)
            .map_err(|e| IndexBuildError::new(e.to_string()))?;
        let mut pq_codes = HashMap::new();
        if pq.fit(&flat, valid_docs.len()).is_ok() {
            for (doc, vector) in valid_docs.iter().zip(vectors.iter()) {
                pq_codes.insert(doc.id.clone(), pq.quantize(vector));
            }
        }

        {
            let mut state = self.state.write().unwrap();
            state.hnsw = hnsw;
            state.lsh = lsh;
            state.bm25 = bm25;
            state.pq = pq;
            state.metadata = metadata;
            state.text_features = text_features;
            state.bm25_terms = bm25_terms_map;
            state.vectors = vectors_map;
            state.pq_codes = pq_codes;
            state.tombstones.clear();
        }

        self.invalidate_cache();
        let _ = MutableIndexSink::persist(self);

        Ok(BuildReport { indexed: valid_docs.len(), skipped })
    }

    /// Rank documents for `query`. Read-only with respect to the indexes:
    /// only the cache and search stats are written.
    pub fn search(
        &self,
        query: &str,
        num_results: usize,
        filters: Option<SearchFilters>,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let start = Instant::now();

        if query.trim().is_empty() {
            return Err(EngineError::from(ValidationError::on_field("query must not be empty", "query")));
        }
        if !(MIN_NUM_RESULTS..=MAX_NUM_RESULTS).contains(&num_results) {
            return Err(EngineError::from(ValidationError::on_field(
                format!("num_results must be between {} and {}", MIN_NUM_RESULTS, MAX_NUM_RESULTS),
                "num_results",
            )));
        }

        // Filters are advisory: one that fails validation is dropped rather
        // than failing the search.
        let filters = filters.filter(|f| f.validate().is_ok());

        let key = cache_key(query, num_results, &filters);
        if let Some(hit) = self.cache.lock().unwrap().get(&key) {
            self.record_search(start.elapsed(), true);
            return Ok(hit);
        }

        let query_vector = self
            .embedder
            .encode(&[query.to_string()])
            .map_err(EngineError::from)?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::from(EmbeddingError::new("embedder returned no vector for the query", query)))?;

        let features = tokenize(query);
        let bm25_query_terms = tokenize_with_repeats(query);

        let state = self.state.read().unwrap();

        let (lsh_candidates, hnsw_result) = thread::scope(|scope| {
            let lsh_handle = scope.spawn(|| state.lsh.query_candidates(&features, LSH_CANDIDATE_CAP));
            let hnsw_handle = scope.spawn(|| state.hnsw.search(&query_vector, HNSW_SEARCH_K));
            (lsh_handle.join().unwrap(), hnsw_handle.join().unwrap())
        });

        let hnsw_candidates =
            hnsw_result.map_err(|e| EngineError::from(SearchError::new(e.to_string(), query)))?;

        let mut candidate_ids: HashSet<String> = lsh_candidates.into_iter().collect();
        candidate_ids.extend(hnsw_candidates.into_iter().map(|(id, _)| id));

        let mut results: Vec<SearchResult> = Vec::new();
        for id in candidate_ids {
            if state.tombstones.contains(&id) {
                continue;
            }
            let Some(metadata) = state.metadata.get(&id) else { continue };
            if let Some(f) = &filters {
                if !f.matches(metadata) {
                    continue;
                }
            }
            let Some(stored_vector) = state.vectors.get(&id) else { continue };

            let vector_sim = crate::simd::cosine(&query_vector, stored_vector);
            let jaccard = state.lsh.jaccard_similarity(&id, &features);
            let bm25_score = state.bm25.score(&id, &bm25_query_terms, Bm25Params::default());
            let combined = combine_scores(vector_sim, jaccard, bm25_score);

            results.push(SearchResult {
                doc_id: id,
                similarity_score: vector_sim,
                bm25_score,
                combined_score: combined,
                metadata: metadata.clone(),
            });
        }
        drop(state);

        results.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        results.truncate(num_results);

        self.cache.lock().unwrap().insert(key, results.clone());
        self.record_search(start.elapsed(), false);

        Ok(results)
    }

    /// Enqueue a change event with the incremental manager (a no-op before
    /// the manager has been started, which only happens mid-construction).
    pub fn apply_document_change(&self, doc_id: impl Into<String>, kind: ChangeKind, doc: Option<Document>) {
        if let Some(manager) = self.manager.get() {
            manager.lock().unwrap().enqueue(doc_id, kind, doc);
        }
    }

    /// Force-process pending incremental changes now, bypassing cadence.
    pub fn flush_pending(&self) -> FlushResult {
        match self.manager.get() {
            Some(manager) => manager.lock().unwrap().flush_pending(),
            None => FlushResult::default(),
        }
    }

    pub fn incremental_stats(&self) -> IncrementalStats {
        match self.manager.get() {
            Some(manager) => manager.lock().unwrap().stats(),
            None => IncrementalStats::default(),
        }
    }

    pub fn set_incremental_enabled(&self, enabled: bool) {
        if let Some(manager) = self.manager.get() {
            manager.lock().unwrap().set_enabled(enabled);
        }
    }

    pub fn save_indexes(&self) -> Result<(), EngineError> {
        MutableIndexSink::persist(self).map_err(EngineError::from)
    }

    /// Load whatever is persisted at `config.index_path`, replacing current
    /// state. Never fails: a missing or corrupt file just leaves that piece
    /// of state empty (see `persistence::load`).
    pub fn load_indexes(&self) -> Result<(), EngineError> {
        let loaded = persistence::load(&self.config.index_path, self.config.embedding_dim);

        let mut bm25 = InvertedIndex::new();
        for (doc_id, terms) in &loaded.bm25_terms {
            bm25.add_document(doc_id, terms);
        }

        let mut state = self.state.write().unwrap();
        if let Some(hnsw) = loaded.hnsw {
            state.hnsw = hnsw;
        }
        if let Some(pq) = loaded.pq {
            state.pq = pq;
        }
        if let Some(lsh) = loaded.lsh {
            state.lsh = lsh;
        }
        state.vectors = loaded.vectors;
        state.pq_codes = loaded.pq_codes;
        state.metadata = loaded.metadata;
        state.text_features = loaded.text_features;
        state.bm25_terms = loaded.bm25_terms;
        state.bm25 = bm25;
        state.tombstones.clear();
        drop(state);

        self.invalidate_cache();
        Ok(())
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        let stats = self.stats.lock().unwrap();
        let avg = if stats.total_searches > 0 { stats.total_latency_ms / stats.total_searches as f64 } else { 0.0 };
        let hit_rate = if stats.total_searches > 0 {
            stats.cache_hits as f64 / stats.total_searches as f64
        } else {
            0.0
        };
        PerformanceStats { total_searches: stats.total_searches, avg_response_time_ms: avg, cache_hit_rate: hit_rate }
    }

    fn record_search(&self, elapsed: Duration, cache_hit: bool) {
        let mut stats = self.stats.lock().unwrap();
        stats.total_searches += 1;
        stats.total_latency_ms += elapsed.as_secs_f64() * 1000.0;
        if cache_hit {
            stats.cache_hits += 1;
        }
    }

    /// If the tombstone set has grown past the threshold and no rebuild is
    /// already running, build a fresh HNSW index from whatever currently
    /// remains in `vectors` (tombstoned ids were already pruned from it by
    /// `apply_deletes`) and swap it in.
    fn maybe_rebuild(&self) {
        let needs_rebuild = self.state.read().unwrap().tombstones.len() > TOMBSTONE_REBUILD_THRESHOLD;
        if !needs_rebuild {
            return;
        }
        if self.rebuild_in_progress.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }

        let mut state = self.state.write().unwrap();
        let live_ids: Vec<String> = state.vectors.keys().cloned().collect();
        let live_vectors: Vec<Vec<f32>> = live_ids.iter().map(|id| state.vectors[id].clone()).collect();

        if let Ok(mut fresh) = HNSWIndex::new(self.config.embedding_dim) {
            if fresh.add_documents(&live_vectors, &live_ids).is_ok() {
                state.hnsw = fresh;
                state.tombstones.clear();
            }
        }
        drop(state);

        self.rebuild_in_progress.store(false, Ordering::Release);
    }
}

impl MutableIndexSink for Engine {
    fn apply_deletes(&self, ids: &[String]) -> DeleteOutcome {
        let mut succeeded = 0;
        let mut failed = 0;
        {
            let mut state = self.state.write().unwrap();
            for id in ids {
                if state.metadata.remove(id).is_some() {
                    state.vectors.remove(id);
                    state.pq_codes.remove(id);
                    state.text_features.remove(id);
                    state.bm25_terms.remove(id);
                    state.bm25.remove_document(id);
                    state.lsh.remove_document(id);
                    state.tombstones.insert(id.clone());
                    succeeded += 1;
                } else {
                    failed += 1;
                }
            }
        }
        self.maybe_rebuild();
        DeleteOutcome { succeeded, failed }
    }

    fn apply_adds_and_updates(&self, docs: &[Document]) -> AddOutcome {
        if docs.is_empty() {
            return AddOutcome::default();
        }

        let mut valid_docs = Vec::new();
        let mut failed = 0usize;
        for doc in docs {
            if doc.validate().is_ok() {
                valid_docs.push(doc);
            } else {
                failed += 1;
            }
        }
        if valid_docs.is_empty() {
            return AddOutcome { succeeded: 0, failed };
        }

        let texts: Vec<String> = valid_docs.iter().map(|d| d.text()).collect();
        let vectors = match self.embedder.encode(&texts) {
            Ok(v) => v,
            Err(_) => return AddOutcome { succeeded: 0, failed: failed + valid_docs.len() },
        };
        if vectors.len() != valid_docs.len() {
            return AddOutcome { succeeded: 0, failed: failed + valid_docs.len() };
        }

        let mut succeeded = 0usize;
        let mut state = self.state.write().unwrap();
        for (doc, vector) in valid_docs.into_iter().zip(vectors.into_iter()) {
            let features = doc.text_features();
            let terms = tokenize_with_repeats(&doc.text());

            state.metadata.insert(doc.id.clone(), doc.metadata());
            state.text_features.insert(doc.id.clone(), features.clone());
            state.bm25_terms.insert(doc.id.clone(), terms.clone());
            state.bm25.add_document(&doc.id, &terms);
            state.lsh.add_document(&doc.id, &features);

            if state.pq.trained() {
                let code = state.pq.quantize(&vector);
                state.pq_codes.insert(doc.id.clone(), code);
            }
            state.vectors.insert(doc.id.clone(), vector.clone());
            state.tombstones.remove(&doc.id);

            match state.hnsw.add_documents(&[vector], std::slice::from_ref(&doc.id)) {
                Ok(()) => succeeded += 1,
                Err(_) => failed += 1,
            }
        }

        AddOutcome { succeeded, failed }
    }

    fn persist(&self) -> Result<(), PersistenceError> {
        let state = self.state.read().unwrap();
        persistence::save(
            &self.config.index_path,
            &state.hnsw,
            &state.pq,
            &state.lsh,
            &state.vectors,
            &state.pq_codes,
            &state.metadata,
            &state.text_features,
            &state.bm25_terms,
        )
    }

    fn invalidate_cache(&self) {
        self.cache.lock().unwrap().clear();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.get() {
            if let Ok(mut guard) = manager.lock() {
                guard.shutdown();
            }
        }
    }
}
