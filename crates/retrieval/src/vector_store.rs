//! Embedded vector store
//!
//! Dense vector storage with cosine similarity search and metadata filtering.
//! Collections live in process memory and optionally persist to a JSON file
//! per collection; persistence is atomic (write to a temp file, then rename).
//! Each collection is pinned to the embedding model that produced its vectors.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use bid_rag_config::StoreSettings;
use bid_rag_core::{MetadataFilter, MetadataValue, SearchCandidate, SearchSource};

use crate::chunker::Chunk;
use crate::embeddings::EmbeddedCorpus;
use crate::RetrievalError;

/// Vector store configuration
#[derive(Debug, Clone, Default)]
pub struct VectorStoreConfig {
    /// Directory holding persisted collections; in-memory when unset
    pub data_dir: Option<PathBuf>,
    /// Collection name
    pub collection: String,
    /// Expected vector dimension; a persisted collection or incoming corpus
    /// with a different dimension is rejected, never silently overwritten
    pub vector_dim: Option<usize>,
}

impl From<&StoreSettings> for VectorStoreConfig {
    fn from(settings: &StoreSettings) -> Self {
        Self {
            data_dir: settings.data_dir.clone(),
            collection: settings.collection.clone(),
            vector_dim: None,
        }
    }
}

/// One stored chunk with its vector
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkRecord {
    chunk_id: String,
    doc_id: String,
    text: String,
    metadata: BTreeMap<String, MetadataValue>,
    vector: Vec<f32>,
}

/// On-disk collection format
#[derive(Debug, Serialize, Deserialize, Default)]
struct CollectionFile {
    /// Embedding model every vector came from
    model: Option<String>,
    vector_dim: Option<usize>,
    records: Vec<ChunkRecord>,
}

#[derive(Debug, Default)]
struct CollectionState {
    model: Option<String>,
    vector_dim: Option<usize>,
    records: BTreeMap<String, ChunkRecord>,
}

/// Embedded vector store with optional file persistence
#[derive(Debug)]
pub struct VectorStore {
    config: VectorStoreConfig,
    state: RwLock<CollectionState>,
}

impl VectorStore {
    /// Open a collection, loading persisted records when a data dir is set
    pub fn open(config: VectorStoreConfig) -> Result<Self, RetrievalError> {
        let mut state = CollectionState::default();

        if let Some(path) = collection_path(&config) {
            if path.exists() {
                let raw = fs::read_to_string(&path)
                    .map_err(|e| RetrievalError::Store(format!("read {}: {}", path.display(), e)))?;
                let file: CollectionFile = serde_json::from_str(&raw)
                    .map_err(|e| RetrievalError::Store(format!("parse {}: {}", path.display(), e)))?;
                state.model = file.model;
                state.vector_dim = file.vector_dim;
                state.records = file
                    .records
                    .into_iter()
                    .map(|r| (r.chunk_id.clone(), r))
                    .collect();
                tracing::info!(
                    collection = %config.collection,
                    records = state.records.len(),
                    model = ?state.model,
                    "Collection loaded"
                );
            }
        }

        if let (Some(expected), Some(actual)) = (config.vector_dim, state.vector_dim) {
            if expected != actual {
                return Err(RetrievalError::Store(format!(
                    "collection {} holds {}-dimensional vectors, configuration expects {}",
                    config.collection, actual, expected
                )));
            }
        }

        Ok(Self {
            config,
            state: RwLock::new(state),
        })
    }

    /// Upsert chunks with their vectors; keyed by `chunk_id`, so re-indexing
    /// the same document replaces rather than duplicates.
    ///
    /// The first write pins the collection to the corpus model. Later writes
    /// from a different model are rejected; reset the collection first.
    pub fn upsert(&self, chunks: &[Chunk], corpus: &EmbeddedCorpus) -> Result<(), RetrievalError> {
        if chunks.len() != corpus.vectors.len() {
            return Err(RetrievalError::Store(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                corpus.vectors.len()
            )));
        }

        {
            let mut state = self.state.write();

            // One dimensionality per collection: the pin is set by the first
            // write or by configuration, and never widened after the fact.
            if let Some(expected) = state.vector_dim.or(self.config.vector_dim) {
                if expected != corpus.dim {
                    return Err(RetrievalError::Store(format!(
                        "collection holds {}-dimensional vectors, refusing dimension {}",
                        expected, corpus.dim
                    )));
                }
            }

            if let Some(existing) = &state.model {
                if existing != &corpus.model {
                    return Err(RetrievalError::Store(format!(
                        "collection is pinned to model {}, refusing vectors from {}",
                        existing, corpus.model
                    )));
                }
            }

            for (chunk, vector) in chunks.iter().zip(&corpus.vectors) {
                if vector.len() != corpus.dim {
                    return Err(RetrievalError::Store(format!(
                        "vector for {} has dimension {}, expected {}",
                        chunk.chunk_id,
                        vector.len(),
                        corpus.dim
                    )));
                }
                state.records.insert(
                    chunk.chunk_id.clone(),
                    ChunkRecord {
                        chunk_id: chunk.chunk_id.clone(),
                        doc_id: chunk.doc_id.clone(),
                        text: chunk.text.clone(),
                        metadata: chunk.metadata.clone(),
                        vector: vector.clone(),
                    },
                );
            }

            state.model = Some(corpus.model.clone());
            state.vector_dim = Some(corpus.dim);
        }

        self.save()
    }

    /// Drop every chunk of a document; returns how many were removed
    pub fn remove_document(&self, doc_id: &str) -> Result<usize, RetrievalError> {
        let removed = {
            let mut state = self.state.write();
            let before = state.records.len();
            state.records.retain(|_, record| record.doc_id != doc_id);
            before - state.records.len()
        };
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    /// Cosine similarity search over filtered records.
    ///
    /// Results are sorted by score descending and annotated with their rank
    /// in this list, which downstream fusion uses for tie-breaking. Every
    /// result is re-checked against the filter before it is returned.
    pub fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchCandidate>, RetrievalError> {
        let state = self.state.read();

        if state.records.is_empty() {
            return Err(RetrievalError::EmptyCorpus);
        }
        if let Some(dim) = state.vector_dim {
            if vector.len() != dim {
                return Err(RetrievalError::InvalidInput(format!(
                    "query vector has dimension {}, collection expects {}",
                    vector.len(),
                    dim
                )));
            }
        }

        let mut scored: Vec<(&ChunkRecord, f32)> = state
            .records
            .values()
            .filter(|record| filter.matches(&record.metadata))
            .map(|record| (record, cosine_similarity(vector, &record.vector)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        let mut candidates = Vec::with_capacity(scored.len());
        for (rank, (record, score)) in scored.into_iter().enumerate() {
            if !filter.matches(&record.metadata) {
                return Err(RetrievalError::FilterViolation(format!(
                    "result {} does not satisfy the query filter",
                    record.chunk_id
                )));
            }
            candidates.push(SearchCandidate {
                chunk_id: record.chunk_id.clone(),
                doc_id: record.doc_id.clone(),
                text: record.text.clone(),
                score,
                source: SearchSource::Vector,
                metadata: record.metadata.clone(),
                vector: Some(record.vector.clone()),
                vector_rank: Some(rank),
            });
        }

        Ok(candidates)
    }

    /// Model the collection is pinned to, if anything has been written
    pub fn model(&self) -> Option<String> {
        self.state.read().model.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    /// Drop all records and the model pin; removes the persisted file too
    pub fn reset(&self) -> Result<(), RetrievalError> {
        {
            let mut state = self.state.write();
            *state = CollectionState::default();
        }
        if let Some(path) = collection_path(&self.config) {
            if path.exists() {
                fs::remove_file(&path)
                    .map_err(|e| RetrievalError::Store(format!("remove {}: {}", path.display(), e)))?;
            }
        }
        tracing::info!(collection = %self.config.collection, "Collection reset");
        Ok(())
    }

    fn save(&self) -> Result<(), RetrievalError> {
        let Some(path) = collection_path(&self.config) else {
            return Ok(());
        };

        let file = {
            let state = self.state.read();
            CollectionFile {
                model: state.model.clone(),
                vector_dim: state.vector_dim,
                records: state.records.values().cloned().collect(),
            }
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RetrievalError::Store(format!("create {}: {}", parent.display(), e)))?;
        }

        let raw = serde_json::to_string(&file)
            .map_err(|e| RetrievalError::Store(format!("serialize collection: {}", e)))?;

        // Readers never observe a half-written collection.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .map_err(|e| RetrievalError::Store(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| RetrievalError::Store(format!("rename {}: {}", path.display(), e)))?;

        Ok(())
    }
}

fn collection_path(config: &VectorStoreConfig) -> Option<PathBuf> {
    config
        .data_dir
        .as_ref()
        .map(|dir| dir.join(format!("{}.json", config.collection)))
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
