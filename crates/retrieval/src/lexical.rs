//! Lexical search using Tantivy (BM25)
//!
//! Keyword leg of hybrid retrieval. Korean gets a character bigram analyzer:
//! Hangul agglutination means whitespace tokens carry particles ("예산은"),
//! so a plain word tokenizer would miss the query "예산". Bigrams sidestep
//! morphological analysis entirely. The same registered analyzer serves both
//! indexing and query parsing, so the two can never disagree.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, IndexRecordOption, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{Language, LowerCaser, NgramTokenizer, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
    Index, IndexReader, IndexWriter, TantivyDocument, Term,
};

use bid_rag_core::{MetadataFilter, MetadataValue, SearchCandidate, SearchSource};

use crate::chunker::Chunk;
use crate::RetrievalError;

const ANALYZER_NAME: &str = "bid_text";
const WRITER_BUFFER_BYTES: usize = 50_000_000;

/// Lexical index configuration
#[derive(Debug, Clone)]
pub struct LexicalConfig {
    /// Index directory (RAM if None)
    pub index_path: Option<PathBuf>,
    /// Language for analysis ("ko" uses character bigrams)
    pub language: String,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            language: "ko".to_string(),
        }
    }
}

/// BM25 index over chunk text
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    writer: RwLock<IndexWriter>,
    chunk_id_field: Field,
    doc_id_field: Field,
    text_field: Field,
    metadata_field: Field,
}

impl LexicalIndex {
    pub fn new(config: LexicalConfig) -> Result<Self, RetrievalError> {
        let mut schema_builder = Schema::builder();

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(ANALYZER_NAME)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let chunk_id_field = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let doc_id_field = schema_builder.add_text_field("doc_id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", text_options);
        let metadata_field = schema_builder.add_text_field("metadata", STORED);

        let schema = schema_builder.build();

        let index = if let Some(ref path) = config.index_path {
            std::fs::create_dir_all(path)
                .map_err(|e| RetrievalError::Index(format!("create {}: {}", path.display(), e)))?;
            let dir = tantivy::directory::MmapDirectory::open(path)
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
            Index::open_or_create(dir, schema)
                .map_err(|e| RetrievalError::Index(e.to_string()))?
        } else {
            Index::create_in_ram(schema)
        };

        let analyzer = build_analyzer(&config.language)?;
        index.tokenizers().register(ANALYZER_NAME, analyzer);

        let reader = index
            .reader()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;
        let writer = index
            .writer(WRITER_BUFFER_BYTES)
            .map_err(|e| RetrievalError::Index(e.to_string()))?;

        tracing::info!(language = %config.language, "Lexical index created");

        Ok(Self {
            index,
            reader,
            writer: RwLock::new(writer),
            chunk_id_field,
            doc_id_field,
            text_field,
            metadata_field,
        })
    }

    /// Index chunks; keyed by `chunk_id`, so re-indexing replaces in place
    pub fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), RetrievalError> {
        {
            let mut writer = self.writer.write();

            for chunk in chunks {
                let term = Term::from_field_text(self.chunk_id_field, &chunk.chunk_id);
                writer.delete_term(term);

                let metadata_json = serde_json::to_string(&chunk.metadata)
                    .map_err(|e| RetrievalError::Index(format!("metadata for {}: {}", chunk.chunk_id, e)))?;

                let mut doc = TantivyDocument::default();
                doc.add_text(self.chunk_id_field, &chunk.chunk_id);
                doc.add_text(self.doc_id_field, &chunk.doc_id);
                doc.add_text(self.text_field, &chunk.text);
                doc.add_text(self.metadata_field, &metadata_json);

                writer
                    .add_document(doc)
                    .map_err(|e| RetrievalError::Index(e.to_string()))?;
            }

            writer
                .commit()
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
        }

        self.reader
            .reload()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;

        Ok(())
    }

    /// Drop every chunk of a document
    pub fn remove_document(&self, doc_id: &str) -> Result<(), RetrievalError> {
        {
            let mut writer = self.writer.write();
            writer.delete_term(Term::from_field_text(self.doc_id_field, doc_id));
            writer
                .commit()
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
        }
        self.reader
            .reload()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;
        Ok(())
    }

    /// BM25 search, filtered by metadata.
    ///
    /// Tantivy cannot filter on the opaque metadata payload, so when a filter
    /// is present the search over-fetches and filters afterwards. The fetch
    /// window grows until `top_k` candidates survive the filter or the whole
    /// index has been considered, so a highly selective filter still returns
    /// every match it can.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchCandidate>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidInput("query is empty".to_string()));
        }

        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);

        // Lenient parse: user queries are raw text, not query syntax.
        let (parsed, parse_errors) = query_parser.parse_query_lenient(query);
        if !parse_errors.is_empty() {
            tracing::debug!(?parse_errors, "Query parsed leniently");
        }

        let total_docs = searcher.num_docs() as usize;
        let mut fetch = if filter.is_empty() {
            top_k.max(1)
        } else {
            top_k.saturating_mul(10).max(1)
        };

        loop {
            let top_docs = searcher
                .search(&parsed, &TopDocs::with_limit(fetch))
                .map_err(|e| RetrievalError::Search(e.to_string()))?;
            let fetched = top_docs.len();

            let mut results = Vec::new();
            for (score, doc_address) in top_docs {
                if results.len() >= top_k {
                    break;
                }

                let doc: TantivyDocument = searcher
                    .doc(doc_address)
                    .map_err(|e| RetrievalError::Search(e.to_string()))?;

                let chunk_id = stored_text(&doc, self.chunk_id_field);
                let doc_id = stored_text(&doc, self.doc_id_field);
                let text = stored_text(&doc, self.text_field);
                let metadata: BTreeMap<String, MetadataValue> =
                    serde_json::from_str(&stored_text(&doc, self.metadata_field))
                        .map_err(|e| RetrievalError::Search(format!("metadata for {}: {}", chunk_id, e)))?;

                if !filter.matches(&metadata) {
                    continue;
                }

                results.push(SearchCandidate {
                    chunk_id,
                    doc_id,
                    text,
                    score,
                    source: SearchSource::Lexical,
                    metadata,
                    vector: None,
                    vector_rank: None,
                });
            }

            // Stop once enough survived, the query has no more matches, or
            // the window already spans the index.
            if results.len() >= top_k || fetched < fetch || fetch >= total_docs {
                return Ok(results);
            }

            fetch = fetch.saturating_mul(4).min(total_docs);
            tracing::debug!(fetch, "Filter rejected most candidates, widening lexical fetch");
        }
    }

    /// Drop every indexed chunk
    pub fn reset(&self) -> Result<(), RetrievalError> {
        {
            let mut writer = self.writer.write();
            writer
                .delete_all_documents()
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
            writer
                .commit()
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
        }
        self.reader
            .reload()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;
        Ok(())
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

/// Language-aware analyzer shared by indexing and query parsing
fn build_analyzer(language: &str) -> Result<TextAnalyzer, RetrievalError> {
    match language {
        "ko" => {
            let ngram = NgramTokenizer::new(2, 2, false)
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
            Ok(TextAnalyzer::builder(ngram).filter(LowerCaser).build())
        }
        "en" => Ok(TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser)
            .filter(Stemmer::new(Language::English))
            .build()),
        other => {
            tracing::warn!(language = other, "No analyzer for language, using simple tokenization");
            Ok(TextAnalyzer::builder(SimpleTokenizer::default())
                .filter(RemoveLongFilter::limit(100))
                .filter(LowerCaser)
                .build())
        }
    }
}

fn stored_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| match v {
            OwnedValue::Str(s) => Some(s.as_str()),
            _ => None,
        })
        .unwrap_or("")
        .to_string()
}
