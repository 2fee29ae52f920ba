//! Directory scan, change detection, and batch embedding (spec.md §4.5).
//!
//! Generalized from the teacher's inline mtime-diffing in `search.rs`
//! into a standalone component that tracks per-file MD5 content hashes
//! (spec.md invariant 1) rather than mtimes, since mtimes don't survive
//! a git checkout or clone.

use crate::chunk::{Chunk, VectorRecord};
use crate::chunker::chunk_source;
use crate::config::IndexerConfig;
use crate::embedder::{document_text, Embedder};
use crate::error::{CoreError, CoreResult};
use crate::store::VectorStore;
use ignore::WalkBuilder;
use md5::{Digest, Md5};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// spec.md §4.5 step 5: "Emit IndexStats (total files, indexed, skipped,
/// total chunks, duration ms)".
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct IndexStats {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_deleted: usize,
    /// Zero-byte, over `max_file_size`, or unreadable files (spec.md §4.5
    /// step 3).
    pub files_skipped: usize,
    pub chunks_indexed: usize,
    pub duration_ms: u64,
}

pub struct Indexer {
    root: PathBuf,
    config: IndexerConfig,
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl Indexer {
    pub fn new(root: PathBuf, config: IndexerConfig, store: Arc<VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { root, config, store, embedder }
    }

    /// Full incremental pass: scan the tree, diff against stored content
    /// hashes, re-chunk and re-embed only changed files, and delete
    /// records for files that disappeared (spec.md §4.5 steps 1-5).
    pub async fn run(&self) -> CoreResult<IndexStats> {
        let started = Instant::now();
        let mut stats = IndexStats::default();
        let indexed = self.store.get_indexed_files().await?;
        let mut seen_paths: HashSet<String> = HashSet::new();

        let mut pending: Vec<(PathBuf, String, String, bool)> = Vec::new(); // (path, hash, content, was_changed)

        for entry in self.walk() {
            stats.files_scanned += 1;
            let path = entry;
            let path_str = path.to_string_lossy().to_string();
            seen_paths.insert(path_str.clone());

            // spec.md §4.5 step 3: "Skip if file size is 0 or >
            // max_file_size (recorded as skipped)."
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if size == 0 || size > self.config.max_file_size {
                stats.files_skipped += 1;
                continue;
            }

            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(_) => {
                    stats.files_skipped += 1; // binary or unreadable
                    continue;
                }
            };
            let hash = hash_content(&content);

            match indexed.get(&path_str) {
                Some(old_hash) if old_hash == &hash => {
                    stats.files_unchanged += 1;
                    continue;
                }
                Some(_) => pending.push((path, hash, content, true)),
                None => pending.push((path, hash, content, false)),
            }
            if pending.len() >= self.config.max_chunks_in_memory {
                self.flush_pending(&mut pending, &mut stats).await?;
            }
        }
        self.flush_pending(&mut pending, &mut stats).await?;

        // invariant 2: stale records (files removed from the tree) must
        // go before the pass is considered complete.
        for stale_path in indexed.keys().filter(|p| !seen_paths.contains(*p)) {
            self.store.delete_by_file_path(stale_path).await?;
            stats.files_deleted += 1;
        }

        let _ = self.store.compact().await;
        self.store.close().await?;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        Ok(stats)
    }

    /// Re-indexes a single file, used by the watcher on create/modify
    /// events (spec.md §4.6).
    pub async fn index_file(&self, path: &Path) -> CoreResult<()> {
        let path_str = path.to_string_lossy().to_string();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => return Err(CoreError::IoFailure { path: path_str, source: e }),
        };
        let hash = hash_content(&content);
        let chunks = chunk_source(&path_str, &content);
        let records = self.embed_chunks(&path_str, &hash, chunks).await?;
        self.store.upsert(&records).await?;
        Ok(())
    }

    pub async fn remove_file(&self, path: &Path) -> CoreResult<()> {
        self.store.delete_by_file_path(&path.to_string_lossy()).await
    }

    /// Walks the tree on `ignore`'s own parallel walker, same shape as
    /// the teacher's `scan_repository`, streaming accepted paths back
    /// over a `crossbeam_channel` rather than collecting inline. Size
    /// filtering happens in `run()`, not here, so zero-byte and
    /// over-`max_file_size` files are counted as skipped instead of
    /// vanishing silently from `IndexStats`.
    fn walk(&self) -> Vec<PathBuf> {
        let mut overrides = ignore::overrides::OverrideBuilder::new(&self.root);
        for pattern in &self.config.ignore_patterns {
            if let Some(stripped) = pattern.strip_prefix("**/") {
                let _ = overrides.add(&format!("!{stripped}"));
                let _ = overrides.add(&format!("!**/{stripped}"));
            } else {
                let _ = overrides.add(&format!("!{pattern}"));
            }
        }
        let built = overrides.build().unwrap_or_else(|_| ignore::overrides::OverrideBuilder::new(&self.root).build().unwrap());

        let (tx, rx) = crossbeam_channel::unbounded::<PathBuf>();
        let walker = WalkBuilder::new(&self.root).overrides(built).hidden(false).git_ignore(true).build_parallel();
        walker.run(|| {
            let tx = tx.clone();
            Box::new(move |result| {
                if let Ok(entry) = result {
                    let path = entry.path();
                    if path.is_file() {
                        let _ = tx.send(path.to_path_buf());
                    }
                }
                ignore::WalkState::Continue
            })
        });
        drop(tx);
        rx.iter().collect()
    }

    async fn flush_pending(&self, pending: &mut Vec<(PathBuf, String, String, bool)>, stats: &mut IndexStats) -> CoreResult<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(pending);
        for chunk_of_files in batch.chunks(self.config.batch_size) {
            for (path, hash, content, was_changed) in chunk_of_files {
                let path_str = path.to_string_lossy().to_string();
                let chunks = chunk_source(&path_str, content);
                let records = self.embed_chunks(&path_str, hash, chunks).await?;
                // spec.md §4.5 step 4: a changed file's stale records are
                // deleted before the new ones land, so a shrinking chunk
                // set never leaves an orphaned record behind (invariant 1).
                if *was_changed {
                    self.store.delete_by_file_path(&path_str).await?;
                }
                stats.chunks_indexed += records.len();
                self.store.upsert(&records).await?;
                stats.files_indexed += 1;
            }
        }
        Ok(())
    }

    async fn embed_chunks(&self, file_path: &str, content_hash: &str, chunks: Vec<Chunk>) -> CoreResult<Vec<VectorRecord>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = chunks.iter().map(|c| document_text(&c.content)).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        let now = approximate_epoch_millis();

        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                chunk,
                vector,
                content_hash: content_hash.to_string(),
                indexed_at: now,
            })
            .collect())
    }
}

fn hash_content(content: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn approximate_epoch_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = hash_content("fn main() {}");
        let b = hash_content("fn main() {}");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_changes_with_content() {
        let a = hash_content("fn main() {}");
        let b = hash_content("fn main() { }");
        assert_ne!(a, b);
    }
}
