//! End-to-end scenarios exercising the engine as a whole: build, query,
//! filter, incremental update, tombstone rebuild, and persistence round-trip.

use std::sync::Arc;

use rank_hybrid::{ChangeKind, Document, Embedder, Engine, EngineConfig, HashEmbedder, SearchFilters};

const DIM: usize = 32;

fn temp_index_dir(label: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("rank-hybrid-e2e-{}-{}", label, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn new_engine(label: &str) -> Arc<Engine> {
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DIM));
    Engine::new(EngineConfig::new(DIM, temp_index_dir(label)), embedder).unwrap()
}

fn doc(id: &str, text: &str, experience_years: i32, skills: &[&str]) -> Document {
    Document {
        id: id.to_string(),
        name: text.to_string(),
        skills: skills.iter().map(|s| s.to_string()).collect(),
        experience_years,
        ..Default::default()
    }
}

#[test]
fn build_then_query_returns_matching_docs_stable_on_ties() {
    let engine = new_engine("build-then-query");
    let docs = vec![
        doc("a", "experienced rust backend engineer", 5, &[]),
        doc("b", "python data scientist", 5, &[]),
        doc("c", "rust platform engineer", 5, &[]),
    ];
    engine.build_indexes(&docs).unwrap();

    let results = engine.search("rust", 10, None).unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.doc_id.as_str()).collect();
    assert!(ids == vec!["a", "c"] || ids == vec!["c", "a"]);

    let stats = engine.performance_stats();
    assert_eq!(stats.total_searches, 1);
}

#[test]
fn filter_excludes_below_threshold_and_without_required_skill() {
    let engine = new_engine("filter-excludes");
    let docs = vec![
        doc("junior", "engineer", 1, &["rust"]),
        doc("mid", "engineer", 5, &[]),
        doc("senior", "engineer", 10, &[]),
    ];
    engine.build_indexes(&docs).unwrap();

    let filters = SearchFilters { min_experience: Some(6), ..Default::default() };
    let results = engine.search("engineer", 10, Some(filters)).unwrap();
    assert_eq!(results.iter().map(|r| r.doc_id.as_str()).collect::<Vec<_>>(), vec!["senior"]);

    let filters = SearchFilters {
        min_experience: Some(6),
        required_skills: Some(["rust".to_string()].into_iter().collect()),
        ..Default::default()
    };
    let results = engine.search("engineer", 10, Some(filters)).unwrap();
    assert!(results.is_empty());
}

#[test]
fn incremental_add_then_query_finds_it() {
    let engine = new_engine("incremental-add-then-query");
    engine.apply_document_change("x", ChangeKind::Add, Some(doc("x", "novel taxonomy of search indexes", 3, &[])));

    let flush = engine.flush_pending();
    assert_eq!(flush.processed, 1);
    assert_eq!(flush.errors, 0);

    let results = engine.search("taxonomy", 10, None).unwrap();
    assert_eq!(results.iter().map(|r| r.doc_id.as_str()).collect::<Vec<_>>(), vec!["x"]);
}

#[test]
fn add_then_delete_consolidates_to_a_pure_noop() {
    let engine = new_engine("add-then-delete-noop");
    engine.apply_document_change("y", ChangeKind::Add, Some(doc("y", "ephemeral document", 2, &[])));
    engine.apply_document_change("y", ChangeKind::Delete, None);

    let flush = engine.flush_pending();
    assert_eq!(flush.processed, 0);
    assert_eq!(flush.errors, 0);

    let results = engine.search("ephemeral", 10, None).unwrap();
    assert!(results.is_empty());
}

#[test]
fn deleting_past_tombstone_threshold_hides_all_deleted_ids() {
    let engine = new_engine("tombstone-threshold");
    let docs: Vec<Document> = (0..120).map(|i| doc(&format!("d{}", i), "staff backend engineer", 8, &[])).collect();
    engine.build_indexes(&docs).unwrap();

    for i in 0..101 {
        engine.apply_document_change(format!("d{}", i), ChangeKind::Delete, None);
    }
    let flush = engine.flush_pending();
    assert_eq!(flush.processed, 101);

    let results = engine.search("staff backend engineer", 200, None).unwrap();
    for i in 0..101 {
        let deleted_id = format!("d{}", i);
        assert!(!results.iter().any(|r| r.doc_id == deleted_id));
    }
    for i in 101..120 {
        let surviving_id = format!("d{}", i);
        assert!(results.iter().any(|r| r.doc_id == surviving_id));
    }
}

#[test]
fn persistence_round_trip_yields_identical_search_results() {
    let dir = temp_index_dir("persistence-round-trip");
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DIM));

    let docs: Vec<Document> = (0..10)
        .map(|i| doc(&format!("doc-{}", i), "rust hybrid search engine", i % 15, &["rust"]))
        .collect();
    let queries = ["rust", "hybrid search", "engine"];

    let engine = Engine::new(EngineConfig::new(DIM, dir.clone()), Arc::clone(&embedder)).unwrap();
    engine.build_indexes(&docs).unwrap();
    engine.save_indexes().unwrap();

    let before: Vec<Vec<String>> = queries
        .iter()
        .map(|q| engine.search(q, 10, None).unwrap().into_iter().map(|r| r.doc_id).collect())
        .collect();
    drop(engine);

    let reloaded = Engine::new(EngineConfig::new(DIM, dir.clone()), embedder).unwrap();
    let after: Vec<Vec<String>> = queries
        .iter()
        .map(|q| reloaded.search(q, 10, None).unwrap().into_iter().map(|r| r.doc_id).collect())
        .collect();

    assert_eq!(before, after);
    let _ = std::fs::remove_dir_all(&dir);
}
