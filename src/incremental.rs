//! Incremental update manager: change-queue consolidation, batched
//! background application, and the tombstone/rebuild trigger.
//!
//! The manager never owns the engine: it holds a `MutableIndexSink`
//! capability the engine implements, passed in at construction. This keeps
//! the manager <-> engine relationship acyclic even though, conceptually,
//! the engine owns the manager and the manager calls back into the engine.
//!
//! Runs its batch cadence on a plain `std::thread` rather than an async
//! task, since this core has no async runtime in its dependency graph (see
//! the scheduling-model note in the crate root).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::document::Document;
use crate::error::PersistenceError;

fn now_unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// The kind of change a single event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
}

/// A single pending mutation for one document.
#[derive(Debug, Clone)]
pub struct DocumentChange {
    pub doc_id: String,
    pub kind: ChangeKind,
    pub doc: Option<Document>,
    pub timestamp: u64,
}

impl DocumentChange {
    pub fn new(doc_id: impl Into<String>, kind: ChangeKind, doc: Option<Document>) -> Self {
        Self { doc_id: doc_id.into(), kind, doc, timestamp: now_unix_seconds() }
    }
}

/// Outcome of applying a set of deletes to the sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

/// Outcome of applying a set of adds/updates to the sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

/// The capability the incremental manager needs from whatever holds the
/// actual indexes. The engine implements this; the manager only ever sees
/// the trait object, never the engine type itself.
pub trait MutableIndexSink: Send + Sync {
    fn apply_deletes(&self, ids: &[String]) -> DeleteOutcome;
    fn apply_adds_and_updates(&self, docs: &[Document]) -> AddOutcome;
    fn persist(&self) -> Result<(), PersistenceError>;
    fn invalidate_cache(&self);
}

/// Tuning for the background batch processor.
#[derive(Debug, Clone)]
pub struct IncrementalConfig {
    pub batch_size: usize,
    pub max_queue_size: usize,
    pub flush_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_queue_size: 1000,
            flush_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Snapshot of the manager's running counters.
#[derive(Debug, Clone, Default)]
pub struct IncrementalStats {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub queue_size: usize,
    pub is_processing: bool,
    pub last_update_time: Option<u64>,
}

/// Result of a single flush (forced or cadence-triggered).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushResult {
    pub processed: usize,
    pub errors: usize,
}

struct PendingChanges {
    order: VecDeque<String>,
    map: std::collections::HashMap<String, DocumentChange>,
    dropped: u64,
}

impl PendingChanges {
    fn new() -> Self {
        Self { order: VecDeque::new(), map: std::collections::HashMap::new(), dropped: 0 }
    }
}

struct Inner {
    sink: Arc<dyn MutableIndexSink>,
    config: IncrementalConfig,
    pending: Mutex<PendingChanges>,
    is_processing: AtomicBool,
    enabled: AtomicBool,
    shutdown: AtomicBool,
    stats: Mutex<IncrementalStats>,
}

impl Inner {
    /// Apply the consolidation rules for a newly arrived `change`
    /// against whatever is already pending for that `doc_id`.
    fn enqueue(&self, change: DocumentChange) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        let doc_id = change.doc_id.clone();

        match pending.map.get(&doc_id) {
            None => {
                pending.order.push_back(doc_id.clone());
                pending.map.insert(doc_id, change);
            }
            Some(existing) => {
                if existing.kind == ChangeKind::Add && change.kind == ChangeKind::Delete {
                    pending.map.remove(&doc_id);
                } else if existing.kind == ChangeKind::Delete && change.kind != ChangeKind::Delete {
                    let mut coerced = change;
                    coerced.kind = ChangeKind::Add;
                    pending.map.insert(doc_id, coerced);
                } else {
                    pending.map.insert(doc_id, change);
                }
            }
        }

        while pending.map.len() > self.config.max_queue_size {
            match pending.order.pop_front() {
                Some(oldest) => {
                    if pending.map.remove(&oldest).is_some() {
                        pending.dropped += 1;
                    }
                }
                None => break,
            }
        }
    }

    fn should_flush(&self) -> bool {
        let pending = self.pending.lock().unwrap();
        if pending.map.is_empty() {
            return false;
        }
        if pending.map.len() >= self.config.batch_size {
            return true;
        }
        let oldest = pending.map.values().map(|c| c.timestamp).min().unwrap_or(0);
        now_unix_seconds().saturating_sub(oldest) > self.config.flush_timeout.as_secs()
    }

    fn drain_pending(&self) -> Vec<DocumentChange> {
        let mut pending = self.pending.lock().unwrap();
        let changes: Vec<DocumentChange> = pending.map.drain().map(|(_, v)| v).collect();
        pending.order.clear();
        changes
    }

    /// Apply one batch in fixed order: deletes, then adds/updates,
    /// then persist, then invalidate the cache, then update stats.
    fn apply_batch(&self, changes: Vec<DocumentChange>) -> FlushResult {
        if changes.is_empty() {
            return FlushResult::default();
        }

        let mut deletes = Vec::new();
        let mut upserts = Vec::new();
        for change in changes {
            match change.kind {
                ChangeKind::Delete => deletes.push(change.doc_id),
                ChangeKind::Add | ChangeKind::Update => {
                    if let Some(doc) = change.doc {
                        upserts.push(doc);
                    }
                }
            }
        }

        let delete_outcome = self.sink.apply_deletes(&deletes);
        let add_outcome = self.sink.apply_adds_and_updates(&upserts);

        let processed = delete_outcome.succeeded + add_outcome.succeeded;
        let errors = delete_outcome.failed + add_outcome.failed;

        if processed > 0 {
            let _ = self.sink.persist();
            self.sink.invalidate_cache();
        }

        let mut stats = self.stats.lock().unwrap();
        stats.total_processed += (processed + errors) as u64;
        stats.successful += processed as u64;
        stats.failed += errors as u64;
        stats.last_update_time = Some(now_unix_seconds());

        FlushResult { processed, errors }
    }

    /// Force a synchronous flush regardless of cadence. Returns an empty
    /// result without processing if a batch is already in flight.
    fn flush_once(&self) -> FlushResult {
        if self.is_processing.swap(true, Ordering::AcqRel) {
            return FlushResult::default();
        }
        let changes = self.drain_pending();
        let result = self.apply_batch(changes);
        self.is_processing.store(false, Ordering::Release);
        result
    }

    fn stats_snapshot(&self) -> IncrementalStats {
        let mut stats = self.stats.lock().unwrap().clone();
        stats.queue_size = self.pending.lock().unwrap().map.len();
        stats.is_processing = self.is_processing.load(Ordering::Acquire);
        stats
    }
}

/// Runs the change queue and its background batch processor.
pub struct IncrementalManager {
    inner: Arc<Inner>,
    worker: Option<thread::JoinHandle<()>>,
}

impl IncrementalManager {
    /// Construct a manager bound to `sink` but do not start its background
    /// worker yet: call `start()` once the engine holding this manager is
    /// fully constructed (it needs to exist as an `Arc` first).
    pub fn new(sink: Arc<dyn MutableIndexSink>, config: IncrementalConfig) -> Self {
        let inner = Arc::new(Inner {
            sink,
            config,
            pending: Mutex::new(PendingChanges::new()),
            is_processing: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            stats: Mutex::new(IncrementalStats::default()),
        });
        Self { inner, worker: None }
    }

    /// Spawn the background thread that flushes on cadence. A manager whose
    /// worker was never started still supports `enqueue`/`flush_pending`,
    /// it just never flushes on its own.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        self.worker = Some(thread::spawn(move || Self::run_worker(inner)));
    }

    fn run_worker(inner: Arc<Inner>) {
        loop {
            thread::sleep(inner.config.poll_interval);

            if inner.shutdown.load(Ordering::Acquire) {
                inner.flush_once();
                break;
            }

            if inner.should_flush() {
                inner.flush_once();
            }
        }
    }

    /// Enqueue a change event, applying the consolidation rules.
    pub fn enqueue(&self, doc_id: impl Into<String>, kind: ChangeKind, doc: Option<Document>) {
        self.inner.enqueue(DocumentChange::new(doc_id, kind, doc));
    }

    /// Force-process whatever is pending right now, bypassing cadence.
    pub fn flush_pending(&self) -> FlushResult {
        self.inner.flush_once()
    }

    pub fn stats(&self) -> IncrementalStats {
        self.inner.stats_snapshot()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Stop the background worker, draining pending changes once before it
    /// exits (cooperative cancellation).
    pub fn shutdown(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IncrementalManager {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct RecordingSink {
        deletes: Mutex<Vec<String>>,
        upserts: Mutex<Vec<String>>,
        persist_calls: AtomicUsize,
        invalidate_calls: AtomicUsize,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                deletes: Mutex::new(Vec::new()),
                upserts: Mutex::new(Vec::new()),
                persist_calls: AtomicUsize::new(0),
                invalidate_calls: AtomicUsize::new(0),
            }
        }
    }

    impl MutableIndexSink for RecordingSink {
        fn apply_deletes(&self, ids: &[String]) -> DeleteOutcome {
            self.deletes.lock().unwrap().extend(ids.iter().cloned());
            DeleteOutcome { succeeded: ids.len(), failed: 0 }
        }

        fn apply_adds_and_updates(&self, docs: &[Document]) -> AddOutcome {
            self.upserts.lock().unwrap().extend(docs.iter().map(|d| d.id.clone()));
            AddOutcome { succeeded: docs.len(), failed: 0 }
        }

        fn persist(&self) -> Result<(), PersistenceError> {
            self.persist_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn invalidate_cache(&self) {
            self.invalidate_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn doc(id: &str) -> Document {
        Document { id: id.to_string(), name: "x".to_string(), ..Default::default() }
    }

    #[test]
    fn add_then_delete_cancels_out() {
        let sink = Arc::new(RecordingSink::new());
        let manager = IncrementalManager::new(sink.clone(), IncrementalConfig::default());
        manager.enqueue("y", ChangeKind::Add, Some(doc("y")));
        manager.enqueue("y", ChangeKind::Delete, None);
        let result = manager.flush_pending();
        assert_eq!(result, FlushResult { processed: 0, errors: 0 });
        assert!(sink.deletes.lock().unwrap().is_empty());
        assert!(sink.upserts.lock().unwrap().is_empty());
    }

    #[test]
    fn delete_then_add_coerces_to_add() {
        let sink = Arc::new(RecordingSink::new());
        let manager = IncrementalManager::new(sink.clone(), IncrementalConfig::default());
        manager.enqueue("z", ChangeKind::Delete, None);
        manager.enqueue("z", ChangeKind::Add, Some(doc("z")));
        let result = manager.flush_pending();
        assert_eq!(result.processed, 1);
        assert!(sink.deletes.lock().unwrap().is_empty());
        assert_eq!(sink.upserts.lock().unwrap().as_slice(), &["z".to_string()]);
    }

    #[test]
    fn plain_add_flushes_and_persists() {
        let sink = Arc::new(RecordingSink::new());
        let manager = IncrementalManager::new(sink.clone(), IncrementalConfig::default());
        manager.enqueue("x", ChangeKind::Add, Some(doc("x")));
        let result = manager.flush_pending();
        assert_eq!(result, FlushResult { processed: 1, errors: 0 });
        assert_eq!(sink.persist_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.invalidate_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flushing_empty_queue_is_a_noop() {
        let sink = Arc::new(RecordingSink::new());
        let manager = IncrementalManager::new(sink.clone(), IncrementalConfig::default());
        let result = manager.flush_pending();
        assert_eq!(result, FlushResult::default());
        assert_eq!(sink.persist_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disabled_manager_drops_new_events() {
        let sink = Arc::new(RecordingSink::new());
        let manager = IncrementalManager::new(sink.clone(), IncrementalConfig::default());
        manager.set_enabled(false);
        manager.enqueue("x", ChangeKind::Add, Some(doc("x")));
        let result = manager.flush_pending();
        assert_eq!(result, FlushResult::default());
    }

    #[test]
    fn queue_overflow_drops_oldest_event() {
        let sink = Arc::new(RecordingSink::new());
        let config = IncrementalConfig { max_queue_size: 2, ..IncrementalConfig::default() };
        let manager = IncrementalManager::new(sink.clone(), config);
        manager.enqueue("a", ChangeKind::Add, Some(doc("a")));
        manager.enqueue("b", ChangeKind::Add, Some(doc("b")));
        manager.enqueue("c", ChangeKind::Add, Some(doc("c")));
        let result = manager.flush_pending();
        assert_eq!(result.processed, 2);
        let upserts = sink.upserts.lock().unwrap();
        assert!(!upserts.contains(&"a".to_string()));
    }

    #[test]
    fn stats_reflect_last_flush() {
        let sink = Arc::new(RecordingSink::new());
        let manager = IncrementalManager::new(sink, IncrementalConfig::default());
        manager.enqueue("x", ChangeKind::Add, Some(doc("x")));
        manager.flush_pending();
        let stats = manager.stats();
        assert_eq!(stats.successful, 1);
        assert!(stats.last_update_time.is_some());
    }

    /// Reference reduction of a sequence of changes for one doc_id, folding
    /// left to right the same way `Inner::enqueue` consolidates arrivals.
    fn reference_consolidate(kinds: &[ChangeKind]) -> Option<ChangeKind> {
        let mut state: Option<ChangeKind> = None;
        for &kind in kinds {
            state = match state {
                None => Some(kind),
                Some(ChangeKind::Add) if kind == ChangeKind::Delete => None,
                Some(ChangeKind::Delete) if kind != ChangeKind::Delete => Some(ChangeKind::Add),
                Some(_) => Some(kind),
            };
        }
        state
    }

    fn change_kind_strategy() -> impl proptest::strategy::Strategy<Value = ChangeKind> {
        proptest::prop_oneof![
            proptest::strategy::Just(ChangeKind::Add),
            proptest::strategy::Just(ChangeKind::Update),
            proptest::strategy::Just(ChangeKind::Delete),
        ]
    }

    proptest::proptest! {
        #[test]
        fn consolidation_matches_reference_reduction(
            kinds in proptest::collection::vec(change_kind_strategy(), 1..8)
        ) {
            let sink = Arc::new(RecordingSink::new());
            let manager = IncrementalManager::new(sink.clone(), IncrementalConfig::default());
            for &kind in &kinds {
                let payload = if kind == ChangeKind::Delete { None } else { Some(doc("p")) };
                manager.enqueue("p", kind, payload);
            }
            manager.flush_pending();

            let expected = reference_consolidate(&kinds);
            let deletes = sink.deletes.lock().unwrap();
            let upserts = sink.upserts.lock().unwrap();
            let was_deleted = deletes.contains(&"p".to_string());
            let was_upserted = upserts.contains(&"p".to_string());

            match expected {
                None => {
                    proptest::prop_assert!(!was_deleted && !was_upserted);
                }
                Some(ChangeKind::Delete) => {
                    proptest::prop_assert!(was_deleted && !was_upserted);
                }
                Some(ChangeKind::Add) | Some(ChangeKind::Update) => {
                    proptest::prop_assert!(was_upserted && !was_deleted);
                }
            }
        }
    }
}
