//! On-disk persistence for the hybrid search core.
//!
//! Three files live under `index_path/`:
//!
//! - `hnsw.index`: the HNSW graph in a hand-rolled little-endian binary
//!   format (this core has no external ANN library to delegate to, so it is
//!   its own serializer), trailed by a CRC32 of the payload.
//! - `pq_quantizer.bin`: the product quantizer's codebooks, via `postcard`.
//! - `other_data.bin`: everything else (LSH signatures, stored vectors, PQ
//!   codes, metadata, BM25 reconstruction terms), also via `postcard`.
//!
//! Save is best-effort and writes each file independently. Load is lenient:
//! a missing `hnsw.index` means "start empty", and a corrupt file of any
//! kind is swallowed rather than propagated, so the engine falls back to
//! running without that piece of pre-built state.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::dense::hnsw::graph::Layer;
use crate::dense::hnsw::{HNSWIndex, HNSWParams};
use crate::dense::ivf_pq::ProductQuantizer;
use crate::document::DocumentMetadata;
use crate::error::PersistenceError;
use crate::lsh::{LSHIndex, LSHParams};

pub const HNSW_FILE: &str = "hnsw.index";
pub const PQ_FILE: &str = "pq_quantizer.bin";
pub const OTHER_FILE: &str = "other_data.bin";

#[derive(Serialize, Deserialize)]
struct PqFile {
    dimension: usize,
    num_codebooks: usize,
    codebook_size: usize,
    trained: bool,
    codebooks: Vec<Vec<Vec<f32>>>,
}

#[derive(Serialize, Deserialize, Clone)]
struct SerializableMetadata {
    name: String,
    experience_years: i32,
    skills: Vec<String>,
    seniority_level: String,
}

impl From<&DocumentMetadata> for SerializableMetadata {
    fn from(m: &DocumentMetadata) -> Self {
        Self {
            name: m.name.clone(),
            experience_years: m.experience_years,
            skills: m.skills.clone(),
            seniority_level: m.seniority_level.clone(),
        }
    }
}

impl From<SerializableMetadata> for DocumentMetadata {
    fn from(m: SerializableMetadata) -> Self {
        Self { name: m.name, experience_years: m.experience_years, skills: m.skills, seniority_level: m.seniority_level }
    }
}

#[derive(Serialize, Deserialize)]
struct OtherFile {
    lsh_num_hashes: usize,
    lsh_num_bands: usize,
    lsh_signatures: HashMap<String, Vec<u64>>,
    vectors: HashMap<String, Vec<f32>>,
    pq_codes: HashMap<String, Vec<u8>>,
    metadata: HashMap<String, SerializableMetadata>,
    text_features: HashMap<String, Vec<String>>,
    /// Raw per-doc tokens (with repeats), sufficient to reconstruct the
    /// BM25 inverted index exactly via repeated `add_document` calls.
    bm25_terms: HashMap<String, Vec<String>>,
    doc_ids: Vec<String>,
}

/// Everything a fresh `load()` can recover. Every field is best-effort: a
/// `None`/empty value means "not present or failed to decode", never an
/// error the caller must handle.
#[derive(Default)]
pub struct LoadedState {
    pub hnsw: Option<HNSWIndex>,
    pub pq: Option<ProductQuantizer>,
    pub lsh: Option<LSHIndex>,
    pub vectors: HashMap<String, Vec<f32>>,
    pub pq_codes: HashMap<String, Vec<u8>>,
    pub metadata: HashMap<String, DocumentMetadata>,
    pub text_features: HashMap<String, Vec<String>>,
    pub bm25_terms: HashMap<String, Vec<String>>,
}

/// Write all three files under `dir`, creating it if necessary. Attempts
/// every file even if an earlier one fails, then returns the first error
/// encountered (if any).
#[allow(clippy::too_many_arguments)]
pub fn save(
    dir: &Path,
    hnsw: &HNSWIndex,
    pq: &ProductQuantizer,
    lsh: &LSHIndex,
    vectors: &HashMap<String, Vec<f32>>,
    pq_codes: &HashMap<String, Vec<u8>>,
    metadata: &HashMap<String, DocumentMetadata>,
    text_features: &HashMap<String, Vec<String>>,
    bm25_terms: &HashMap<String, Vec<String>>,
) -> Result<(), PersistenceError> {
    fs::create_dir_all(dir)?;

    let hnsw_result = write_hnsw_file(&dir.join(HNSW_FILE), hnsw);
    let pq_result = write_pq_file(&dir.join(PQ_FILE), pq);
    let other_result = write_other_file(&dir.join(OTHER_FILE), lsh, vectors, pq_codes, metadata, text_features, bm25_terms, hnsw.doc_ids());

    hnsw_result?;
    pq_result?;
    other_result?;
    Ok(())
}

/// Load whatever is present and decodable under `dir`. Never fails: absence
/// or corruption of any file falls back to that piece's empty state.
pub fn load(dir: &Path, dimension: usize) -> LoadedState {
    let hnsw_path = dir.join(HNSW_FILE);
    let hnsw = if hnsw_path.exists() { read_hnsw_file(&hnsw_path, dimension).ok() } else { None };

    let pq = read_pq_file(&dir.join(PQ_FILE)).ok();

    let other = read_other_file(&dir.join(OTHER_FILE)).ok();

    let mut state = LoadedState { hnsw, pq, ..Default::default() };

    if let Some(other) = other {
        let lsh_params = LSHParams { num_hashes: other.lsh_num_hashes, num_bands: other.lsh_num_bands };
        state.lsh = LSHIndex::from_signatures(lsh_params, other.lsh_signatures).ok();
        state.vectors = other.vectors;
        state.pq_codes = other.pq_codes;
        state.metadata = other.metadata.into_iter().map(|(k, v)| (k, DocumentMetadata::from(v))).collect();
        state.text_features = other.text_features;
        state.bm25_terms = other.bm25_terms;
    }

    state
}

fn write_hnsw_file(path: &Path, index: &HNSWIndex) -> Result<(), PersistenceError> {
    let mut buf: Vec<u8> = Vec::new();

    buf.write_u32::<LittleEndian>(index.dimension as u32)?;
    buf.write_u32::<LittleEndian>(index.num_vectors as u32)?;
    for &v in &index.vectors {
        buf.write_f32::<LittleEndian>(v)?;
    }
    buf.write_all(&index.layer_assignments)?;

    buf.write_u32::<LittleEndian>(index.layers.len() as u32)?;
    for layer in &index.layers {
        buf.write_u32::<LittleEndian>(index.num_vectors as u32)?;
        for node in 0..index.num_vectors as u32 {
            let neighbors = layer.get_neighbors(node);
            buf.write_u32::<LittleEndian>(neighbors.len() as u32)?;
            for &n in neighbors.iter() {
                buf.write_u32::<LittleEndian>(n)?;
            }
        }
    }

    buf.write_u32::<LittleEndian>(index.params.m as u32)?;
    buf.write_u32::<LittleEndian>(index.params.m_max as u32)?;
    buf.write_f64::<LittleEndian>(index.params.m_l)?;
    buf.write_u32::<LittleEndian>(index.params.ef_construction as u32)?;
    buf.write_u32::<LittleEndian>(index.params.ef_search as u32)?;

    match index.entry_point {
        Some(ep) => {
            buf.write_u8(1)?;
            buf.write_u32::<LittleEndian>(ep)?;
        }
        None => buf.write_u8(0)?,
    }
    buf.write_u8(index.entry_layer)?;

    buf.write_u32::<LittleEndian>(index.doc_ids.len() as u32)?;
    for id in &index.doc_ids {
        let bytes = id.as_bytes();
        buf.write_u32::<LittleEndian>(bytes.len() as u32)?;
        buf.write_all(bytes)?;
    }

    let crc = crc32fast::hash(&buf);
    buf.write_u32::<LittleEndian>(crc)?;

    let mut file = fs::File::create(path)?;
    file.write_all(&buf)?;
    file.flush()?;
    Ok(())
}

fn read_hnsw_file(path: &Path, expected_dimension: usize) -> Result<HNSWIndex, PersistenceError> {
    let bytes = fs::read(path)?;
    if bytes.len() < 4 {
        return Err(PersistenceError::new("hnsw.index is too short to contain a checksum"));
    }
    let (payload, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let expected_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    if crc32fast::hash(payload) != expected_crc {
        return Err(PersistenceError::new("hnsw.index failed checksum verification"));
    }

    let mut cursor = Cursor::new(payload);
    let dimension = cursor.read_u32::<LittleEndian>()? as usize;
    if dimension != expected_dimension {
        return Err(PersistenceError::new("hnsw.index dimension does not match engine configuration"));
    }
    let num_vectors = cursor.read_u32::<LittleEndian>()? as usize;

    let mut vectors = Vec::with_capacity(num_vectors * dimension);
    for _ in 0..(num_vectors * dimension) {
        vectors.push(cursor.read_f32::<LittleEndian>()?);
    }

    let mut layer_assignments = vec![0u8; num_vectors];
    cursor.read_exact(&mut layer_assignments)?;

    let num_layers = cursor.read_u32::<LittleEndian>()? as usize;
    let mut layers = Vec::with_capacity(num_layers);
    for _ in 0..num_layers {
        let num_lists = cursor.read_u32::<LittleEndian>()? as usize;
        let mut neighbor_lists = Vec::with_capacity(num_lists);
        for _ in 0..num_lists {
            let len = cursor.read_u32::<LittleEndian>()? as usize;
            let mut list: SmallVec<[u32; 16]> = SmallVec::with_capacity(len);
            for _ in 0..len {
                list.push(cursor.read_u32::<LittleEndian>()?);
            }
            neighbor_lists.push(list);
        }
        layers.push(Layer::new(neighbor_lists));
    }

    let params = HNSWParams {
        m: cursor.read_u32::<LittleEndian>()? as usize,
        m_max: cursor.read_u32::<LittleEndian>()? as usize,
        m_l: cursor.read_f64::<LittleEndian>()?,
        ef_construction: cursor.read_u32::<LittleEndian>()? as usize,
        ef_search: cursor.read_u32::<LittleEndian>()? as usize,
    };

    let has_entry = cursor.read_u8()? != 0;
    let entry_point = if has_entry { Some(cursor.read_u32::<LittleEndian>()?) } else { None };
    let entry_layer = cursor.read_u8()?;

    let num_ids = cursor.read_u32::<LittleEndian>()? as usize;
    let mut doc_ids = Vec::with_capacity(num_ids);
    for _ in 0..num_ids {
        let len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut str_bytes = vec![0u8; len];
        cursor.read_exact(&mut str_bytes)?;
        doc_ids.push(String::from_utf8(str_bytes).map_err(|e| PersistenceError::new(format!("invalid utf8 in doc_ids: {}", e)))?);
    }

    Ok(HNSWIndex::from_parts(vectors, dimension, doc_ids, layers, layer_assignments, params, entry_point, entry_layer))
}

fn write_pq_file(path: &Path, pq: &ProductQuantizer) -> Result<(), PersistenceError> {
    let file = PqFile {
        dimension: pq.dimension(),
        num_codebooks: pq.num_codebooks(),
        codebook_size: pq.codebook_size(),
        trained: pq.trained(),
        codebooks: pq.codebooks().to_vec(),
    };
    let bytes = postcard::to_allocvec(&file)?;
    fs::write(path, bytes)?;
    Ok(())
}

fn read_pq_file(path: &Path) -> Result<ProductQuantizer, PersistenceError> {
    let bytes = fs::read(path)?;
    let file: PqFile = postcard::from_bytes(&bytes)?;
    Ok(ProductQuantizer::from_parts(file.dimension, file.num_codebooks, file.codebook_size, file.codebooks))
}

#[allow(clippy::too_many_arguments)]
fn write_other_file(
    path: &Path,
    lsh: &LSHIndex,
    vectors: &HashMap<String, Vec<f32>>,
    pq_codes: &HashMap<String, Vec<u8>>,
    metadata: &HashMap<String, DocumentMetadata>,
    text_features: &HashMap<String, Vec<String>>,
    bm25_terms: &HashMap<String, Vec<String>>,
    doc_ids: &[String],
) -> Result<(), PersistenceError> {
    let file = OtherFile {
        lsh_num_hashes: lsh.params().num_hashes,
        lsh_num_bands: lsh.params().num_bands,
        lsh_signatures: lsh.signatures().clone(),
        vectors: vectors.clone(),
        pq_codes: pq_codes.clone(),
        metadata: metadata.iter().map(|(k, v)| (k.clone(), SerializableMetadata::from(v))).collect(),
        text_features: text_features.clone(),
        bm25_terms: bm25_terms.clone(),
        doc_ids: doc_ids.to_vec(),
    };
    let bytes = postcard::to_allocvec(&file)?;
    fs::write(path, bytes)?;
    Ok(())
}

fn read_other_file(path: &Path) -> Result<OtherFile, PersistenceError> {
    let bytes = fs::read(path)?;
    let file: OtherFile = postcard::from_bytes(&bytes)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bm25::InvertedIndex;

    #[test]
    fn round_trips_hnsw_index() {
        let mut index = HNSWIndex::new(3).unwrap();
        index
            .add_documents(
                &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.9, 0.1, 0.0]],
                &["a".to_string(), "b".to_string(), "c".to_string()],
            )
            .unwrap();

        let dir = std::env::temp_dir().join(format!("rank-hybrid-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_hnsw_file(&dir.join(HNSW_FILE), &index).unwrap();
        let reloaded = read_hnsw_file(&dir.join(HNSW_FILE), 3).unwrap();

        assert_eq!(reloaded.len(), index.len());
        assert_eq!(reloaded.doc_ids(), index.doc_ids());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_hnsw_file_is_not_an_error() {
        let dir = std::env::temp_dir().join(format!("rank-hybrid-test-missing-{}", std::process::id()));
        let state = load(&dir, 3);
        assert!(state.hnsw.is_none());
    }

    #[test]
    fn corrupt_other_file_falls_back_to_empty() {
        let dir = std::env::temp_dir().join(format!("rank-hybrid-test-corrupt-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(OTHER_FILE), b"not valid postcard data at all, hopefully").unwrap();
        let state = load(&dir, 3);
        assert!(state.lsh.is_none());
        assert!(state.vectors.is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn round_trips_pq_file() {
        let mut pq = ProductQuantizer::new(4, 2, 2).unwrap();
        pq.fit(&[1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0], 2).unwrap();

        let dir = std::env::temp_dir().join(format!("rank-hybrid-test-pq-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_pq_file(&dir.join(PQ_FILE), &pq).unwrap();
        let reloaded = read_pq_file(&dir.join(PQ_FILE)).unwrap();
        assert!(reloaded.trained());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn other_file_round_trips_bm25_terms_into_a_working_index() {
        let dir = std::env::temp_dir().join(format!("rank-hybrid-test-bm25-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let mut bm25_terms = HashMap::new();
        bm25_terms.insert("a".to_string(), vec!["rust".to_string(), "systems".to_string()]);

        let lsh = LSHIndex::new(LSHParams::default()).unwrap();
        write_other_file(&dir.join(OTHER_FILE), &lsh, &HashMap::new(), &HashMap::new(), &HashMap::new(), &HashMap::new(), &bm25_terms, &[])
            .unwrap();

        let state = load(&dir, 3);
        assert_eq!(state.bm25_terms.get("a"), bm25_terms.get("a"));

        let mut index = InvertedIndex::new();
        for (doc_id, terms) in &state.bm25_terms {
            index.add_document(doc_id, terms);
        }
        assert_eq!(index.num_docs(), 1);
        let _ = fs::remove_dir_all(&dir);
    }
}
