//! End-to-end incremental indexing behavior (spec.md §8 properties on
//! change detection and stale-file cleanup), driven against a real
//! on-disk store with a deterministic fake embedder standing in for the
//! candle model.

use async_trait::async_trait;
use semantic_code::config::IndexerConfig;
use semantic_code::embedder::Embedder;
use semantic_code::error::CoreResult;
use semantic_code::indexer::Indexer;
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
                let seed = t.len() as f32;
                let mut v = vec![0.0f32; semantic_code::config::VECTOR_DIM];
                v[0] = seed;
                v
            })
            .collect())
    }
}

#[tokio::test]
async fn reindexing_unchanged_files_is_a_no_op() {
    let dir = tempdir().unwrap();
    let src_dir = dir.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    std::fs::write(src_dir.join("lib.rs"), "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n").unwrap();

    let index_path = dir.path().join(".semantic-code").join("index");
    let store = Arc::new(VectorStore::open(&index_path).await.unwrap());
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder);
    let indexer = Indexer::new(dir.path().to_path_buf(), IndexerConfig::default(), Arc::clone(&store), embedder);

    let first = indexer.run().await.unwrap();
    assert_eq!(first.files_unchanged, 0);
    assert!(first.files_indexed >= 1);

    let second = indexer.run().await.unwrap();
    assert_eq!(second.files_indexed, 0);
    assert!(second.files_unchanged >= 1);
}

#[tokio::test]
async fn deleting_a_file_removes_its_records() {
    let dir = tempdir().unwrap();
    let src_dir = dir.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    let file_path = src_dir.join("gone.rs");
    std::fs::write(&file_path, "pub fn soon_deleted() -> i32 {\n    42\n}\n").unwrap();

    let index_path = dir.path().join(".semantic-code").join("index");
    let store = Arc::new(VectorStore::open(&index_path).await.unwrap());
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder);
    let indexer = Indexer::new(dir.path().to_path_buf(), IndexerConfig::default(), Arc::clone(&store), embedder);

    indexer.run().await.unwrap();
    assert!(!store.is_empty().await.unwrap());

    std::fs::remove_file(&file_path).unwrap();
    let stats = indexer.run().await.unwrap();
    assert_eq!(stats.files_deleted, 1);
    assert!(store.is_empty().await.unwrap());
}

#[tokio::test]
async fn modifying_a_file_produces_new_content_hash() {
    let dir = tempdir().unwrap();
    let src_dir = dir.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    let file_path = src_dir.join("mutating.rs");
    std::fs::write(&file_path, "pub fn v1() -> i32 {\n    1\n}\n").unwrap();

    let index_path = dir.path().join(".semantic-code").join("index");
    let store = Arc::new(VectorStore::open(&index_path).await.unwrap());
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder);
    let indexer = Indexer::new(dir.path().to_path_buf(), IndexerConfig::default(), Arc::clone(&store), embedder);

    indexer.run().await.unwrap();
    let before = store.get_indexed_files().await.unwrap();

    std::fs::write(&file_path, "pub fn v2() -> i32 {\n    2\n}\n").unwrap();
    let stats = indexer.run().await.unwrap();
    assert!(stats.files_indexed >= 1);

    let after = store.get_indexed_files().await.unwrap();
    let key = file_path.to_string_lossy().to_string();
    assert_ne!(before.get(&key), after.get(&key));
}

#[tokio::test]
async fn zero_byte_file_is_recorded_as_skipped() {
    let dir = tempdir().unwrap();
    let src_dir = dir.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    std::fs::write(src_dir.join("empty.rs"), "").unwrap();
    std::fs::write(src_dir.join("real.rs"), "pub fn kept(x: i32) -> i32 {\n    let y = x + 1;\n    y\n}\n").unwrap();

    let index_path = dir.path().join(".semantic-code").join("index");
    let store = Arc::new(VectorStore::open(&index_path).await.unwrap());
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder);
    let indexer = Indexer::new(dir.path().to_path_buf(), IndexerConfig::default(), Arc::clone(&store), embedder);

    let stats = indexer.run().await.unwrap();
    assert_eq!(stats.files_skipped, 1);
    assert_eq!(stats.files_indexed, 1);
}

#[tokio::test]
async fn shrinking_a_file_drops_its_orphaned_chunk_ids() {
    let dir = tempdir().unwrap();
    let src_dir = dir.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    let file_path = src_dir.join("shrinking.rs");
    // Two substantial functions, each well above the minimum chunk size.
    std::fs::write(
        &file_path,
        "pub fn first_one(x: i32) -> i32 {\n    let y = x + 1;\n    let z = y * 2;\n    z\n}\n\npub fn second_one(x: i32) -> i32 {\n    let y = x - 1;\n    let z = y * 3;\n    z\n}\n",
    )
    .unwrap();

    let index_path = dir.path().join(".semantic-code").join("index");
    let store = Arc::new(VectorStore::open(&index_path).await.unwrap());
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder);
    let indexer = Indexer::new(dir.path().to_path_buf(), IndexerConfig::default(), Arc::clone(&store), embedder);

    indexer.run().await.unwrap();
    let count_before = store.count().await.unwrap();
    assert!(count_before >= 2);

    // Rewrite with only the first function; the second function's chunk
    // id must not survive re-indexing.
    std::fs::write(
        &file_path,
        "pub fn first_one(x: i32) -> i32 {\n    let y = x + 1;\n    let z = y * 2;\n    z\n}\n",
    )
    .unwrap();
    let stats = indexer.run().await.unwrap();
    assert!(stats.files_indexed >= 1);

    let count_after = store.count().await.unwrap();
    assert!(count_after < count_before, "stale chunk from the removed function should be gone");
}
