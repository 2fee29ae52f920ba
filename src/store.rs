//! Persistent columnar store of chunk records + vectors (spec.md §4.4).
//!
//! Backed by `lancedb` (vector ANN search, same as the teacher) fronted
//! by a `tantivy` full-text index (`fulltext.rs`), with a bounded manual
//! keyword scan as the documented fallback when FTS can't answer.

use crate::chunk::{Chunk, VectorRecord};
use crate::error::{CoreError, CoreResult};
use crate::fulltext::TextIndex;
use anyhow::Result;
use arrow_array::{
    types::Float32Type, Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array,
    RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures::StreamExt;
use lancedb::arrow::SendableRecordBatchStream;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{connect, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const TABLE_NAME: &str = "code_chunks";
const FULL_TEXT_SCAN_CAP: usize = 10_000;

pub struct VectorStore {
    conn: Connection,
    text_index: TextIndex,
}

/// A scored vector-search hit.
pub struct ScoredRecord {
    pub record: VectorRecord,
    pub score: f32,
}

/// Resolves the Open Question in spec.md §9: the manual keyword-scan
/// fallback never silently truncates — callers can tell a bounded scan
/// from a complete one.
pub enum FullTextSearchOutcome {
    Complete(Vec<ScoredRecord>),
    Partial(Vec<ScoredRecord>),
}

impl FullTextSearchOutcome {
    pub fn into_records(self) -> Vec<ScoredRecord> {
        match self {
            Self::Complete(r) | Self::Partial(r) => r,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial(_))
    }
}

impl VectorStore {
    pub async fn open(index_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_root)?;
        let conn = connect(index_root.to_str().ok_or_else(|| anyhow::anyhow!("non-utf8 index path"))?)
            .execute()
            .await?;
        let text_index = TextIndex::load_or_create(&index_root.join("fts"))?;
        Ok(Self { conn, text_index })
    }

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("file_path", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("start_line", DataType::Int32, false),
            Field::new("end_line", DataType::Int32, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("node_type", DataType::Utf8, false),
            Field::new("signature", DataType::Utf8, true),
            Field::new("docstring", DataType::Utf8, true),
            Field::new("language", DataType::Utf8, false),
            Field::new("content_hash", DataType::Utf8, false),
            Field::new("indexed_at", DataType::Int64, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    crate::config::VECTOR_DIM as i32,
                ),
                false,
            ),
        ]))
    }

    fn records_to_batch(records: &[VectorRecord]) -> Result<RecordBatch> {
        let schema = Self::schema();
        let ids = StringArray::from(records.iter().map(|r| r.chunk.id.clone()).collect::<Vec<_>>());
        let file_paths = StringArray::from(records.iter().map(|r| r.chunk.file_path.clone()).collect::<Vec<_>>());
        let contents = StringArray::from(records.iter().map(|r| r.chunk.content.clone()).collect::<Vec<_>>());
        let start_lines = Int32Array::from(records.iter().map(|r| r.chunk.start_line as i32).collect::<Vec<_>>());
        let end_lines = Int32Array::from(records.iter().map(|r| r.chunk.end_line as i32).collect::<Vec<_>>());
        let names = StringArray::from(records.iter().map(|r| r.chunk.name.clone()).collect::<Vec<_>>());
        let node_types = StringArray::from(records.iter().map(|r| r.chunk.node_type.clone()).collect::<Vec<_>>());
        let signatures = StringArray::from(records.iter().map(|r| r.chunk.signature.clone()).collect::<Vec<_>>());
        let docstrings = StringArray::from(records.iter().map(|r| r.chunk.docstring.clone()).collect::<Vec<_>>());
        let languages = StringArray::from(records.iter().map(|r| r.chunk.language.clone()).collect::<Vec<_>>());
        let content_hashes = StringArray::from(records.iter().map(|r| r.content_hash.clone()).collect::<Vec<_>>());
        let indexed_ats = Int64Array::from(records.iter().map(|r| r.indexed_at).collect::<Vec<_>>());
        let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            records.iter().map(|r| Some(r.vector.iter().map(|x| Some(*x)))),
            crate::config::VECTOR_DIM as i32,
        );

        Ok(RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(ids),
                Arc::new(file_paths),
                Arc::new(contents),
                Arc::new(start_lines),
                Arc::new(end_lines),
                Arc::new(names),
                Arc::new(node_types),
                Arc::new(signatures),
                Arc::new(docstrings),
                Arc::new(languages),
                Arc::new(content_hashes),
                Arc::new(indexed_ats),
                Arc::new(vectors),
            ],
        )?)
    }

    /// Creates the table on first call; deletes any prior record sharing
    /// an id, then inserts. `upsert([])` is a no-op (spec.md §4.4).
    pub async fn upsert(&self, records: &[VectorRecord]) -> CoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        for r in records {
            r.validate().map_err(|reason| CoreError::InvalidRecord { id: r.chunk.id.clone(), reason })?;
        }

        let batch = Self::records_to_batch(records).map_err(|e| CoreError::StoreIo { reason: e.to_string() })?;
        let schema = Self::schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema.clone());

        match self.conn.open_table(TABLE_NAME).execute().await {
            Ok(table) => {
                let ids: Vec<String> = records.iter().map(|r| r.chunk.id.clone()).collect();
                let predicate = Self::id_in_predicate(&ids)?;
                let _ = table.delete(&predicate).await;
                table
                    .add(batches)
                    .execute()
                    .await
                    .map_err(|e| CoreError::StoreIo { reason: e.to_string() })?;
            }
            Err(_) => {
                self.conn
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .map_err(|e| CoreError::StoreIo { reason: e.to_string() })?;
            }
        }

        for r in records {
            if let Err(e) = self.text_index.index_chunk(&r.chunk.id, &r.chunk.file_path, &r.chunk.content) {
                tracing::warn!(error = %e, "full-text index update failed; manual scan will still cover this record");
            }
        }
        if let Err(e) = self.text_index.commit() {
            tracing::warn!(error = %e, "full-text index commit failed");
        }

        Ok(())
    }

    fn id_in_predicate(ids: &[String]) -> CoreResult<String> {
        for id in ids {
            if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(CoreError::InvalidId { id: id.clone() });
            }
        }
        let list = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(", ");
        Ok(format!("id IN ({list})"))
    }

    /// Removes all records where `file_path` equals `path`. String
    /// equality with doubled quotes, per spec.md §4.4.
    pub async fn delete_by_file_path(&self, path: &str) -> CoreResult<()> {
        let table = match self.conn.open_table(TABLE_NAME).execute().await {
            Ok(t) => t,
            Err(_) => return Ok(()),
        };
        let escaped = path.replace('\'', "''");
        let predicate = format!("file_path = '{escaped}'");
        table
            .delete(&predicate)
            .await
            .map_err(|e| CoreError::StoreIo { reason: e.to_string() })?;
        if let Err(e) = self.text_index.delete_file(path) {
            tracing::warn!(error = %e, "full-text index deletion failed");
        }
        let _ = self.text_index.commit();
        Ok(())
    }

    pub async fn clear(&self) -> CoreResult<()> {
        if self.conn.table_names().execute().await.map(|names| names.iter().any(|n| n == TABLE_NAME)).unwrap_or(false) {
            self.conn
                .drop_table(TABLE_NAME)
                .await
                .map_err(|e| CoreError::StoreIo { reason: e.to_string() })?;
        }
        let _ = self.text_index.clear();
        Ok(())
    }

    /// Ascending cosine distance order, score = `1 - distance`. Empty
    /// store returns `[]` (spec.md §4.4).
    pub async fn vector_search(&self, query_vector: &[f32], limit: usize, filter: Option<&str>) -> CoreResult<Vec<ScoredRecord>> {
        let table = match self.conn.open_table(TABLE_NAME).execute().await {
            Ok(t) => t,
            Err(_) => return Ok(Vec::new()),
        };

        let mut query = table
            .vector_search(query_vector.to_vec())
            .map_err(|e| CoreError::StoreIo { reason: e.to_string() })?
            .limit(limit);
        if let Some(f) = filter {
            query = query.only_if(f);
        }

        let mut stream: SendableRecordBatchStream =
            query.execute().await.map_err(|e| CoreError::StoreIo { reason: e.to_string() })?;

        let mut out = Vec::new();
        while let Some(batch) = stream.next().await {
            let batch = batch.map_err(|e| CoreError::StoreIo { reason: e.to_string() })?;
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>().cloned());
            for (i, record) in batch_to_records(&batch)?.into_iter().enumerate() {
                let dist = distances.as_ref().map(|d| d.value(i)).unwrap_or(0.0);
                let score = (1.0 - (dist / 2.0)).clamp(0.0, 1.0);
                out.push(ScoredRecord { record, score });
            }
        }
        Ok(out)
    }

    /// Tantivy-backed full-text search; falls back to a bounded manual
    /// keyword scan when tantivy returns nothing (spec.md §4.4).
    pub async fn full_text_search(&self, text: &str, limit: usize) -> CoreResult<FullTextSearchOutcome> {
        let hits = self.text_index.search(text, limit);
        if !hits.is_empty() {
            let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
            let by_id = self.fetch_by_ids(&ids).await?;
            let mut scored: Vec<ScoredRecord> = hits
                .into_iter()
                .filter_map(|(id, score)| by_id.get(&id).cloned().map(|record| ScoredRecord { record, score }))
                .collect();
            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            return Ok(FullTextSearchOutcome::Complete(scored));
        }
        self.manual_keyword_scan(text, limit).await
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> CoreResult<HashMap<String, VectorRecord>> {
        let table = match self.conn.open_table(TABLE_NAME).execute().await {
            Ok(t) => t,
            Err(_) => return Ok(HashMap::new()),
        };
        let predicate = Self::id_in_predicate(ids)?;
        let mut stream: SendableRecordBatchStream = table
            .query()
            .only_if(predicate)
            .execute()
            .await
            .map_err(|e| CoreError::StoreIo { reason: e.to_string() })?;

        let mut out = HashMap::new();
        while let Some(batch) = stream.next().await {
            let batch = batch.map_err(|e| CoreError::StoreIo { reason: e.to_string() })?;
            for record in batch_to_records(&batch)? {
                out.insert(record.chunk.id.clone(), record);
            }
        }
        Ok(out)
    }

    /// spec.md §4.4 "Full-text fallback": scan up to 10,000 rows,
    /// score = `2*hits(name) + 1.5*hits(signature) + 1*hits(content)`,
    /// drop zero-score rows, normalize by `keywords * 4`.
    async fn manual_keyword_scan(&self, text: &str, limit: usize) -> CoreResult<FullTextSearchOutcome> {
        let table = match self.conn.open_table(TABLE_NAME).execute().await {
            Ok(t) => t,
            Err(_) => return Ok(FullTextSearchOutcome::Complete(Vec::new())),
        };

        let total = table.count_rows(None).await.unwrap_or(0);
        let mut stream: SendableRecordBatchStream = table
            .query()
            .limit(FULL_TEXT_SCAN_CAP)
            .execute()
            .await
            .map_err(|e| CoreError::StoreIo { reason: e.to_string() })?;

        let keywords: Vec<String> = text.to_lowercase().split_whitespace().map(str::to_string).collect();
        if keywords.is_empty() {
            return Ok(FullTextSearchOutcome::Complete(Vec::new()));
        }

        let mut scored = Vec::new();
        let mut scanned = 0usize;
        while let Some(batch) = stream.next().await {
            let batch = batch.map_err(|e| CoreError::StoreIo { reason: e.to_string() })?;
            for record in batch_to_records(&batch)? {
                scanned += 1;
                let name_lc = record.chunk.name.as_deref().unwrap_or("").to_lowercase();
                let sig_lc = record.chunk.signature.as_deref().unwrap_or("").to_lowercase();
                let content_lc = record.chunk.content.to_lowercase();

                let score: f32 = keywords
                    .iter()
                    .map(|kw| {
                        2.0 * hits(&name_lc, kw) as f32
                            + 1.5 * hits(&sig_lc, kw) as f32
                            + 1.0 * hits(&content_lc, kw) as f32
                    })
                    .sum();
                if score > 0.0 {
                    let normalized = (score / (keywords.len() as f32 * 4.0)).min(1.0);
                    scored.push(ScoredRecord { record, score: normalized });
                }
            }
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        if total > FULL_TEXT_SCAN_CAP as u64 || scanned >= FULL_TEXT_SCAN_CAP {
            Ok(FullTextSearchOutcome::Partial(scored))
        } else {
            Ok(FullTextSearchOutcome::Complete(scored))
        }
    }

    /// `file_path -> content_hash`, first hash encountered per file
    /// (invariant 1 guarantees a single value per file).
    pub async fn get_indexed_files(&self) -> CoreResult<HashMap<String, String>> {
        let table = match self.conn.open_table(TABLE_NAME).execute().await {
            Ok(t) => t,
            Err(_) => return Ok(HashMap::new()),
        };

        let selection = Select::Columns(vec!["file_path".to_string(), "content_hash".to_string()]);
        let mut stream: SendableRecordBatchStream = match table.query().select(selection).execute().await {
            Ok(s) => s,
            Err(_) => return Ok(HashMap::new()),
        };

        let mut map = HashMap::new();
        while let Some(batch) = stream.next().await {
            let batch = batch.map_err(|e| CoreError::StoreIo { reason: e.to_string() })?;
            let paths = column::<StringArray>(&batch, "file_path")?;
            let hashes = column::<StringArray>(&batch, "content_hash")?;
            for i in 0..batch.num_rows() {
                map.entry(paths.value(i).to_string()).or_insert_with(|| hashes.value(i).to_string());
            }
        }
        Ok(map)
    }

    pub async fn count(&self) -> CoreResult<usize> {
        match self.conn.open_table(TABLE_NAME).execute().await {
            Ok(t) => t.count_rows(None).await.map(|n| n as usize).map_err(|e| CoreError::StoreIo { reason: e.to_string() }),
            Err(_) => Ok(0),
        }
    }

    pub async fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.count().await? == 0)
    }

    /// Prunes old table versions and compacts small fragments. Not on
    /// the hot path; callers run this periodically, not per-search.
    pub async fn compact(&self) -> CoreResult<()> {
        let table = match self.conn.open_table(TABLE_NAME).execute().await {
            Ok(t) => t,
            Err(_) => return Ok(()),
        };

        use lancedb::table::OptimizeAction;
        if let Err(e) = table
            .optimize(OptimizeAction::Prune {
                older_than: Some(chrono::Duration::hours(1)),
                delete_unverified: Some(false),
                error_if_tagged_old_versions: Some(false),
            })
            .await
        {
            tracing::warn!(error = %e, "store prune failed");
        }
        if let Err(e) = table.optimize(OptimizeAction::Compact { options: Default::default(), remap_options: None }).await {
            tracing::warn!(error = %e, "store compaction failed");
        }
        Ok(())
    }

    /// Releases handles; no persisted state is modified.
    pub async fn close(&self) -> CoreResult<()> {
        let _ = self.text_index.commit();
        Ok(())
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> CoreResult<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| CoreError::StoreIo { reason: format!("missing or mistyped column '{name}'") })
}

fn batch_to_records(batch: &RecordBatch) -> CoreResult<Vec<VectorRecord>> {
    let ids = column::<StringArray>(batch, "id")?;
    let file_paths = column::<StringArray>(batch, "file_path")?;
    let contents = column::<StringArray>(batch, "content")?;
    let start_lines = column::<Int32Array>(batch, "start_line")?;
    let end_lines = column::<Int32Array>(batch, "end_line")?;
    let names = column::<StringArray>(batch, "name")?;
    let node_types = column::<StringArray>(batch, "node_type")?;
    let signatures = column::<StringArray>(batch, "signature")?;
    let docstrings = column::<StringArray>(batch, "docstring")?;
    let languages = column::<StringArray>(batch, "language")?;
    let content_hashes = column::<StringArray>(batch, "content_hash")?;
    let indexed_ats = column::<Int64Array>(batch, "indexed_at")?;
    let vectors = batch
        .column_by_name("vector")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| CoreError::StoreIo { reason: "missing vector column".to_string() })?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let vector_values = vectors.value(i);
        let vector_f32 = vector_values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| CoreError::StoreIo { reason: "vector column has unexpected element type".to_string() })?;
        let vector: Vec<f32> = vector_f32.values().to_vec();

        out.push(VectorRecord {
            chunk: Chunk {
                id: ids.value(i).to_string(),
                file_path: file_paths.value(i).to_string(),
                content: contents.value(i).to_string(),
                start_line: start_lines.value(i) as usize,
                end_line: end_lines.value(i) as usize,
                name: opt_str(names, i),
                node_type: node_types.value(i).to_string(),
                signature: opt_str(signatures, i),
                docstring: opt_str(docstrings, i),
                language: languages.value(i).to_string(),
            },
            vector,
            content_hash: content_hashes.value(i).to_string(),
            indexed_at: indexed_ats.value(i),
        });
    }
    Ok(out)
}

fn opt_str(arr: &StringArray, i: usize) -> Option<String> {
    if arr.is_null(i) {
        None
    } else {
        Some(arr.value(i).to_string())
    }
}

fn hits(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_in_predicate_rejects_malformed_id() {
        let err = VectorStore::id_in_predicate(&["ok_id".to_string(), "bad id; drop".to_string()]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidId { .. }));
    }

    #[test]
    fn id_in_predicate_builds_quoted_list() {
        let out = VectorStore::id_in_predicate(&["a".to_string(), "b-2".to_string()]).unwrap();
        assert_eq!(out, "id IN ('a', 'b-2')");
    }

    #[test]
    fn outcome_is_partial_reflects_variant() {
        let complete = FullTextSearchOutcome::Complete(Vec::new());
        let partial = FullTextSearchOutcome::Partial(Vec::new());
        assert!(!complete.is_partial());
        assert!(partial.is_partial());
    }

    #[test]
    fn hits_counts_overlapping_free_occurrences() {
        assert_eq!(hits("authenticate user authentication", "auth"), 2);
        assert_eq!(hits("nothing here", "zzz"), 0);
        assert_eq!(hits("x", ""), 0);
    }
}
