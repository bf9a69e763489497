//! Index a few announcement snippets and run hybrid searches against them.
//!
//! Uses the deterministic hash embedding backend so it runs without an
//! embedding server; swap in `RetrievalPipeline::new` for a live endpoint.
//!
//! ```sh
//! cargo run --example index_and_search
//! ```

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use bid_rag_config::Settings;
use bid_rag_retrieval::{
    DocumentInput, HashEmbeddingModel, RerankMode, RetrievalPipeline, RetrieveOptions,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut settings = Settings::default();
    settings.embedding.vector_dim = 64;
    settings.retrieval.vector_weight = 0.3;

    let pipeline = RetrievalPipeline::with_models(
        &settings,
        vec![Arc::new(HashEmbeddingModel::new("hash-demo", 64))],
    )?;

    let documents = vec![
        document(
            "rfp-2024-117",
            "본 사업의 총 예산은 1억원이며 부가가치세를 포함합니다. 계약 기간은 착수일로부터 6개월입니다.",
            &[("발주기관", "조달청"), ("유형", "용역")],
        ),
        document(
            "rfp-2024-118",
            "제안서 제출 마감은 12월 23일 18시까지이며 전자입찰 시스템으로만 접수합니다.",
            &[("발주기관", "조달청"), ("유형", "공사")],
        ),
        document(
            "rfp-2024-119",
            "입찰 참가 자격은 최근 3년 이내 유사 사업 실적을 보유한 중소기업으로 한정합니다.",
            &[("발주기관", "행정안전부"), ("유형", "용역")],
        ),
    ];

    let report = pipeline.index_documents(&documents).await?;
    println!(
        "indexed {} documents into {} chunks with model {}",
        report.documents, report.chunks, report.model
    );

    for query in ["예산", "제출 마감", "참가 자격"] {
        let result = pipeline
            .search(query, RetrieveOptions::default().top_k(3))
            .await?;
        println!(
            "\nquery {:?} -> {} candidates in {:?}",
            result.query, result.total_found, result.search_time
        );
        for candidate in &result.candidates {
            println!(
                "  {:.3}  {}  {}",
                candidate.score,
                candidate.chunk_id,
                snippet(&candidate.text)
            );
        }
    }

    // Scoped search: only 조달청 announcements, pairwise reranking.
    let options = RetrieveOptions::default()
        .rerank_mode(RerankMode::CrossEncoder)
        .filter(bid_rag_retrieval::MetadataFilter::new().with("발주기관", "조달청"));
    let result = pipeline.search("마감 일정", options).await?;
    println!("\n조달청 only, cross-encoder reranked:");
    for candidate in &result.candidates {
        println!("  {:.3}  {}", candidate.score, candidate.doc_id);
    }

    Ok(())
}

fn document(doc_id: &str, text: &str, metadata: &[(&str, &str)]) -> DocumentInput {
    let mut map = serde_json::Map::new();
    for (key, value) in metadata {
        map.insert(key.to_string(), serde_json::json!(value));
    }
    DocumentInput {
        doc_id: doc_id.to_string(),
        text: text.to_string(),
        metadata: map,
    }
}

fn snippet(text: &str) -> String {
    let mut s: String = text.chars().take(30).collect();
    if text.chars().count() > 30 {
        s.push('…');
    }
    s
}
