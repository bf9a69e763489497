//! Fixed-size text chunking
//!
//! Splits normalized document text into overlapping character windows. The
//! corpus is mostly Korean, so all sizes and offsets are in characters, not
//! bytes. Sentence-boundary strategies were considered and rejected for the
//! first iteration: announcement documents are table-heavy and boundary
//! detection buys little there.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bid_rag_core::MetadataValue;

use crate::RetrievalError;

/// Configuration for fixed-size chunking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Window size in characters
    pub chunk_size: usize,
    /// Overlap between consecutive windows, in characters
    pub chunk_overlap: usize,
    /// A final window contributing fewer than this many new characters is
    /// merged into the previous chunk instead of emitted on its own
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_size: 100,
        }
    }
}

impl From<&bid_rag_config::ChunkingConfig> for ChunkerConfig {
    fn from(config: &bid_rag_config::ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            min_chunk_size: config.min_chunk_size,
        }
    }
}

/// A single chunk of a source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within the corpus: `{doc_id}_{chunk_index}`
    pub chunk_id: String,
    /// Owning document
    pub doc_id: String,
    /// 0-based position within the document
    pub chunk_index: usize,
    /// Segment content
    pub text: String,
    /// Start position in the source document, in characters
    pub char_offset_start: usize,
    /// End position (exclusive), in characters
    pub char_offset_end: usize,
    /// Document metadata plus `doc_id` and `chunk_index`
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// Fixed-size chunker with overlap
pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split a document into overlapping chunks.
    ///
    /// Every chunk inherits `metadata` verbatim, plus `doc_id` and its own
    /// `chunk_index`. Pure function: no state survives the call.
    pub fn chunk(
        &self,
        text: &str,
        doc_id: &str,
        metadata: &BTreeMap<String, MetadataValue>,
    ) -> Result<Vec<Chunk>, RetrievalError> {
        if text.is_empty() {
            return Err(RetrievalError::InvalidInput(
                "document text is empty".to_string(),
            ));
        }
        if self.config.chunk_size <= self.config.chunk_overlap {
            return Err(RetrievalError::InvalidInput(format!(
                "chunk_size {} must exceed overlap {}",
                self.config.chunk_size, self.config.chunk_overlap
            )));
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let stride = self.config.chunk_size - self.config.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.config.chunk_size).min(total);
            let chunk_index = chunks.len();

            let mut chunk_metadata = metadata.clone();
            chunk_metadata.insert("doc_id".to_string(), MetadataValue::from(doc_id));
            chunk_metadata.insert(
                "chunk_index".to_string(),
                MetadataValue::Number(chunk_index as f64),
            );

            chunks.push(Chunk {
                chunk_id: format!("{}_{}", doc_id, chunk_index),
                doc_id: doc_id.to_string(),
                chunk_index,
                text: chars[start..end].iter().collect(),
                char_offset_start: start,
                char_offset_end: end,
                metadata: chunk_metadata,
            });

            if end == total {
                break;
            }
            start += stride;
        }

        self.merge_short_tail(&mut chunks, &chars);

        tracing::debug!(
            doc_id,
            chunks = chunks.len(),
            chars = total,
            "Document chunked"
        );

        Ok(chunks)
    }

    /// Merge a low-information final window into the previous chunk.
    ///
    /// The final window overlaps the previous one, so its information content
    /// is the characters past the previous chunk's end. When that tail is
    /// shorter than `min_chunk_size`, only the tail is appended (the overlap
    /// is already present in the previous chunk's text).
    fn merge_short_tail(&self, chunks: &mut Vec<Chunk>, chars: &[char]) {
        if chunks.len() < 2 {
            return;
        }

        let last_end = chunks[chunks.len() - 1].char_offset_end;
        let prev_end = chunks[chunks.len() - 2].char_offset_end;
        debug_assert!(last_end >= prev_end);

        if last_end - prev_end >= self.config.min_chunk_size {
            return;
        }

        chunks.pop();
        if let Some(prev) = chunks.last_mut() {
            let tail: String = chars[prev.char_offset_end..last_end].iter().collect();
            prev.text.push_str(&tail);
            prev.char_offset_end = last_end;
        }
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk_size: usize, overlap: usize, min: usize) -> TextChunker {
        TextChunker::new(ChunkerConfig {
            chunk_size,
            chunk_overlap: overlap,
            min_chunk_size: min,
        })
    }

    #[test]
    fn test_short_text_single_chunk() {
        let text = "예산은 1억원이며 마감은 12월 23일입니다";
        let chunks = TextChunker::default()
            .chunk(text, "rfp-001", &BTreeMap::new())
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, "rfp-001_0");
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].char_offset_start, 0);
        assert_eq!(chunks[0].char_offset_end, text.chars().count());
    }

    #[test]
    fn test_empty_text_rejected() {
        let err = TextChunker::default()
            .chunk("", "doc", &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidInput(_)));
    }

    #[test]
    fn test_overlap_geq_chunk_size_rejected() {
        let err = chunker(100, 100, 10)
            .chunk("some text", "doc", &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidInput(_)));
    }

    #[test]
    fn test_overlap_and_monotonic_offsets() {
        let text: String = std::iter::repeat('가').take(2500).collect();
        let chunks = chunker(1000, 200, 100)
            .chunk(&text, "doc", &BTreeMap::new())
            .unwrap();

        let covered: usize = chunks.iter().map(|c| c.text.chars().count()).sum();
        assert!(covered >= 2500, "overlap must over-cover the source");

        for pair in chunks.windows(2) {
            assert!(pair[1].char_offset_start > pair[0].char_offset_start);
            assert!(pair[1].char_offset_end >= pair[0].char_offset_end);
            assert!(pair[1].char_offset_start < pair[0].char_offset_end, "windows overlap");
        }
        for chunk in &chunks {
            assert!(chunk.char_offset_end > chunk.char_offset_start);
        }
        assert_eq!(chunks.last().unwrap().char_offset_end, 2500);
    }

    #[test]
    fn test_short_tail_merged() {
        // 1000 + 100/2 new characters: the tail window adds only 50 new
        // characters, so it folds into the first chunk.
        let text: String = std::iter::repeat('나').take(1050).collect();
        let chunks = chunker(1000, 200, 100)
            .chunk(&text, "doc", &BTreeMap::new())
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].char_offset_end, 1050);
        assert_eq!(chunks[0].text.chars().count(), 1050);
    }

    #[test]
    fn test_tail_at_threshold_kept() {
        let text: String = std::iter::repeat('다').take(1100).collect();
        let chunks = chunker(1000, 200, 100)
            .chunk(&text, "doc", &BTreeMap::new())
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].char_offset_end, 1100);
    }

    #[test]
    fn test_metadata_inherited_with_provenance() {
        let mut metadata = BTreeMap::new();
        metadata.insert("발주기관".to_string(), MetadataValue::from("조달청"));

        let text: String = std::iter::repeat('라').take(1900).collect();
        let chunks = chunker(1000, 200, 100)
            .chunk(&text, "rfp-77", &metadata)
            .unwrap();

        assert!(chunks.len() >= 2);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(
                chunk.metadata.get("발주기관"),
                Some(&MetadataValue::from("조달청"))
            );
            assert_eq!(
                chunk.metadata.get("doc_id"),
                Some(&MetadataValue::from("rfp-77"))
            );
            assert_eq!(
                chunk.metadata.get("chunk_index"),
                Some(&MetadataValue::Number(i as f64))
            );
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn test_multibyte_offsets_are_char_based() {
        // 600 Hangul syllables are 1800 UTF-8 bytes; a byte-based splitter
        // would emit two chunks here.
        let text: String = std::iter::repeat('마').take(600).collect();
        let chunks = chunker(1000, 200, 100)
            .chunk(&text, "doc", &BTreeMap::new())
            .unwrap();
        assert_eq!(chunks.len(), 1);
    }
}
