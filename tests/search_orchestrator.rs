//! Orchestrator-level behavior that needs a real store but no real model
//! (spec.md §8: empty-store short circuit, score bounds, path filtering).

use async_trait::async_trait;
use semantic_code::config::IndexerConfig;
use semantic_code::embedder::Embedder;
use semantic_code::error::CoreResult;
use semantic_code::indexer::Indexer;
use semantic_code::search::{SearchOrchestrator, SearchRequest};
use semantic_code::store::VectorStore;
use std::sync::Arc;
use tempfile::tempdir;

struct FakeEmbedder;

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.01f32; semantic_code::config::VECTOR_DIM];
                v[0] = t.len() as f32;
                v
            })
            .collect())
    }
}

#[tokio::test]
async fn search_on_empty_store_returns_no_results_without_embedding() {
    let dir = tempdir().unwrap();
    let store = Arc::new(VectorStore::open(&dir.path().join("idx")).await.unwrap());
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder);
    let orchestrator = SearchOrchestrator::new(store, embedder, None);

    let results = orchestrator
        .search(&SearchRequest { query: "anything".to_string(), limit: 10, ..Default::default() })
        .await
        .unwrap();

    assert!(results.is_empty());
}

#[tokio::test]
async fn search_returns_indexed_chunk_with_bounded_score() {
    let dir = tempdir().unwrap();
    let src_dir = dir.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    std::fs::write(src_dir.join("auth.rs"), "pub fn authenticate(token: &str) -> bool {\n    !token.is_empty()\n}\n").unwrap();

    let store = Arc::new(VectorStore::open(&dir.path().join("idx")).await.unwrap());
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder);
    let indexer = Indexer::new(dir.path().to_path_buf(), IndexerConfig::default(), Arc::clone(&store), Arc::clone(&embedder));
    indexer.run().await.unwrap();

    let orchestrator = SearchOrchestrator::new(Arc::clone(&store), embedder, None);
    let results = orchestrator
        .search(&SearchRequest { query: "authenticate".to_string(), limit: 5, ..Default::default() })
        .await
        .unwrap();

    assert!(!results.is_empty());
    for r in &results {
        assert!(r.combined_score >= 0.0 && r.combined_score <= 1.0);
        assert!((r.vector_score + r.keyword_score - r.combined_score).abs() < 1e-6);
    }
    assert!(results.iter().any(|r| r.name.as_deref() == Some("authenticate")));
}
