//! Full-text index over chunk content, backed by `tantivy` (spec.md §4.4).
//!
//! This is the "FTS" half of the vector store's search surface; the
//! manual keyword-scan fallback used when FTS is unavailable lives in
//! `store.rs` since it needs the full record set, not just an `id`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::RwLock;
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, IndexWriter, TantivyDocument, Term};

pub struct TextIndex {
    index: Index,
    writer: RwLock<IndexWriter>,
    id_field: Field,
    path_field: Field,
    content_field: Field,
}

impl TextIndex {
    /// Creates the on-disk index under `index_root` on first use. Failure
    /// to create it is non-fatal to the caller — the manual scan in
    /// `store.rs` covers the need (spec.md §4.4 "Schema / durability").
    pub fn load_or_create(index_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_root).context("creating full-text index directory")?;

        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let path_field = schema_builder.add_text_field("path", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let dir = MmapDirectory::open(index_root)?;
        let index = Index::open_or_create(dir, schema)?;
        let writer = index.writer(50_000_000)?;

        Ok(Self {
            index,
            writer: RwLock::new(writer),
            id_field,
            path_field,
            content_field,
        })
    }

    pub fn index_chunk(&self, id: &str, file_path: &str, content: &str) -> Result<()> {
        let writer = self.writer.write().unwrap();
        let term = Term::from_field_text(self.id_field, id);
        writer.delete_term(term);
        writer.add_document(tantivy::doc!(
            self.id_field => id,
            self.path_field => file_path,
            self.content_field => content,
        ))?;
        Ok(())
    }

    pub fn delete_file(&self, file_path: &str) -> Result<()> {
        let writer = self.writer.write().unwrap();
        let term = Term::from_field_text(self.path_field, file_path);
        writer.delete_term(term);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer.write().unwrap();
        writer.delete_all_documents()?;
        writer.commit()?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let mut writer = self.writer.write().unwrap();
        writer.commit()?;
        Ok(())
    }

    /// Returns `(chunk id, tantivy score)` pairs, highest first.
    pub fn search(&self, text: &str, limit: usize) -> Vec<(String, f32)> {
        let reader = match self.index.reader_builder().try_into() {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "tantivy reader unavailable");
                return Vec::new();
            }
        };
        let searcher = reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let query = match query_parser.parse_query(text) {
            Ok(q) => q,
            Err(_) => return Vec::new(),
        };

        let top_docs = match searcher.search(&query, &TopDocs::with_limit(limit)) {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!(error = %e, "tantivy search failed");
                return Vec::new();
            }
        };

        let mut results = Vec::new();
        for (score, addr) in top_docs {
            let doc: TantivyDocument = match searcher.doc(addr) {
                Ok(d) => d,
                Err(_) => continue,
            };
            if let Some(id) = doc.get_first(self.id_field).and_then(|v| v.as_str()) {
                results.push((id.to_string(), score));
            }
        }
        results
    }
}
