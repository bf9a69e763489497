//! End-to-end pipeline tests: ingest, fallback, persistence, hybrid search.

use std::sync::Arc;

use async_trait::async_trait;

use bid_rag_config::Settings;
use bid_rag_retrieval::{
    DocumentInput, EmbedError, EmbeddingModel, HashEmbeddingModel, MetadataFilter, RerankMode,
    RetrievalPipeline, RetrieveOptions,
};

/// Backend that refuses every request, for exercising the fallback path.
struct DeadModel {
    name: String,
    dim: usize,
}

#[async_trait]
impl EmbeddingModel for DeadModel {
    fn name(&self) -> &str {
        &self.name
    }
    fn dim(&self) -> usize {
        self.dim
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Request("connection refused".to_string()))
    }
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.embedding.vector_dim = 32;
    settings.embedding.batch_size = 4;
    settings.embedding.retry_delay_ms = 1;
    settings.embedding.max_retries = 1;
    // Hash vectors carry no semantics; let the lexical leg dominate so
    // keyword assertions are deterministic.
    settings.retrieval.vector_weight = 0.3;
    settings
}

fn doc(doc_id: &str, text: &str) -> DocumentInput {
    DocumentInput {
        doc_id: doc_id.to_string(),
        text: text.to_string(),
        metadata: serde_json::Map::new(),
    }
}

fn announcement_corpus() -> Vec<DocumentInput> {
    vec![
        doc(
            "rfp-budget",
            "본 사업의 예산은 총 1억원이며 부가세를 포함한 금액입니다",
        ),
        doc(
            "rfp-deadline",
            "제안서 제출 마감은 12월 23일 18시까지이며 지연 제출은 무효 처리됩니다",
        ),
        doc(
            "rfp-eligibility",
            "입찰 참가 자격은 소프트웨어 개발 실적을 보유한 중소기업으로 한정합니다",
        ),
    ]
}

#[tokio::test]
async fn fallback_build_pins_second_model() {
    let models: Vec<Arc<dyn EmbeddingModel>> = vec![
        Arc::new(DeadModel {
            name: "primary".to_string(),
            dim: 32,
        }),
        Arc::new(HashEmbeddingModel::new("backup", 32)),
    ];
    let pipeline = RetrievalPipeline::with_models(&test_settings(), models).unwrap();

    let report = pipeline
        .index_documents(&announcement_corpus())
        .await
        .unwrap();
    assert_eq!(report.model, "backup");
    assert_eq!(pipeline.active_model().as_deref(), Some("backup"));

    // Incremental writes stay on the pinned model even though the primary
    // is still first in the preference list.
    let report = pipeline
        .index_documents(&[doc("rfp-extra", "추가 공고 본문")])
        .await
        .unwrap();
    assert_eq!(report.model, "backup");

    let result = pipeline
        .search("예산", RetrieveOptions::default())
        .await
        .unwrap();
    assert!(!result.candidates.is_empty());
}

#[tokio::test]
async fn all_models_dead_leaves_indexes_untouched() {
    let models: Vec<Arc<dyn EmbeddingModel>> = vec![
        Arc::new(DeadModel {
            name: "model-a".to_string(),
            dim: 32,
        }),
        Arc::new(DeadModel {
            name: "model-b".to_string(),
            dim: 32,
        }),
    ];
    let pipeline = RetrievalPipeline::with_models(&test_settings(), models).unwrap();

    let err = pipeline
        .index_documents(&announcement_corpus())
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("model-a"), "{message}");
    assert!(message.contains("model-b"), "{message}");

    assert_eq!(pipeline.chunk_count(), 0);
    assert!(pipeline.active_model().is_none());
}

#[tokio::test]
async fn collection_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings();
    settings.store.data_dir = Some(dir.path().to_path_buf());

    {
        let pipeline = RetrievalPipeline::with_models(
            &settings,
            vec![Arc::new(HashEmbeddingModel::new("hash", 32))],
        )
        .unwrap();
        pipeline
            .index_documents(&announcement_corpus())
            .await
            .unwrap();
    }

    let reopened = RetrievalPipeline::with_models(
        &settings,
        vec![Arc::new(HashEmbeddingModel::new("hash", 32))],
    )
    .unwrap();

    assert_eq!(reopened.chunk_count(), 3);
    assert_eq!(reopened.active_model().as_deref(), Some("hash"));

    let result = reopened
        .search("마감", RetrieveOptions::default())
        .await
        .unwrap();
    assert_eq!(result.candidates[0].doc_id, "rfp-deadline");
}

#[tokio::test]
async fn reopen_with_changed_dimension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings();
    settings.store.data_dir = Some(dir.path().to_path_buf());

    {
        let pipeline = RetrievalPipeline::with_models(
            &settings,
            vec![Arc::new(HashEmbeddingModel::new("hash", 32))],
        )
        .unwrap();
        pipeline
            .index_documents(&announcement_corpus())
            .await
            .unwrap();
    }

    // The persisted collection holds 32-dimensional vectors; a pipeline
    // configured for 64 must refuse to open it instead of mixing dimensions.
    let mut changed = settings;
    changed.embedding.vector_dim = 64;
    let err = RetrievalPipeline::with_models(
        &changed,
        vec![Arc::new(HashEmbeddingModel::new("hash", 64))],
    );
    assert!(err.is_err());
}

#[tokio::test]
async fn hybrid_search_finds_keyword_document() {
    let pipeline = RetrievalPipeline::with_models(
        &test_settings(),
        vec![Arc::new(HashEmbeddingModel::new("hash", 32))],
    )
    .unwrap();
    pipeline
        .index_documents(&announcement_corpus())
        .await
        .unwrap();

    // The hash vectors carry no semantics; the lexical leg must surface the
    // budget announcement for the keyword query.
    let result = pipeline
        .search("예산", RetrieveOptions::default().rerank_mode(RerankMode::None))
        .await
        .unwrap();
    assert_eq!(result.candidates[0].doc_id, "rfp-budget");
    assert_eq!(result.total_found, result.candidates.len());
}

#[tokio::test]
async fn long_document_spans_multiple_chunks() {
    let pipeline = RetrievalPipeline::with_models(
        &test_settings(),
        vec![Arc::new(HashEmbeddingModel::new("hash", 32))],
    )
    .unwrap();

    let body: String = "사업 개요와 추진 배경을 설명하는 문단입니다 "
        .repeat(120);
    let report = pipeline
        .index_documents(&[doc("rfp-long", &body)])
        .await
        .unwrap();
    assert!(report.chunks > 1, "expected multiple chunks, got {}", report.chunks);

    let result = pipeline
        .search("추진 배경", RetrieveOptions::default().top_k(3))
        .await
        .unwrap();
    assert!(!result.candidates.is_empty());
    assert!(result.candidates.len() <= 3);

    let mut ids: Vec<&str> = result.candidates.iter().map(|c| c.chunk_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), result.candidates.len(), "chunk ids must be unique");
}

#[tokio::test]
async fn filter_and_rerank_modes_compose() {
    let pipeline = RetrievalPipeline::with_models(
        &test_settings(),
        vec![Arc::new(HashEmbeddingModel::new("hash", 32))],
    )
    .unwrap();

    let mut metadata = serde_json::Map::new();
    metadata.insert("발주기관".to_string(), serde_json::json!("조달청"));
    pipeline
        .index_documents(&[
            DocumentInput {
                doc_id: "gov".to_string(),
                text: "조달청 발주 예산 공고".to_string(),
                metadata,
            },
            doc("private", "민간 발주 예산 공고"),
        ])
        .await
        .unwrap();

    for mode in [RerankMode::Mmr, RerankMode::CrossEncoder, RerankMode::None] {
        let options = RetrieveOptions::default()
            .rerank_mode(mode)
            .filter(MetadataFilter::new().with("발주기관", "조달청"));
        let result = pipeline.search("예산 공고", options).await.unwrap();
        assert!(
            result.candidates.iter().all(|c| c.doc_id == "gov"),
            "filter leaked in mode {:?}",
            mode
        );
    }
}
