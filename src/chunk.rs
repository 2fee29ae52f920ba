//! The canonical chunk record and its deterministic id derivation
//! (spec.md §3, §4.2).

use serde::{Deserialize, Serialize};

/// Collapses any byte outside `[A-Za-z0-9_-]` to `_`. Shared verbatim by
/// chunk-id derivation and the filter builder's path-prefix sanitizer so
/// the two stay byte-identical (spec.md §4.2).
pub(crate) fn collapse_unsafe(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A code span produced by the chunker, before it is embedded and
/// persisted as a `VectorRecord`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub name: Option<String>,
    pub node_type: String,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub language: String,
}

/// Suffix applied to a chunk id to keep it unique within a file.
pub enum IdSuffix {
    /// A split part of an oversized node, 0-indexed.
    Part(usize),
    /// A window from line-based fallback chunking, 0-indexed.
    Fallback(usize),
    /// No further disambiguation needed.
    None,
}

/// Derives `normalize(file_path) + "_L" + start_line [+ "_p" + i | + "_fallback" + i]`.
///
/// Must stay byte-identical to `FilterBuilder`'s path-prefix normalization
/// (spec.md §4.2) — both funnel through [`collapse_unsafe`].
pub fn derive_chunk_id(file_path: &str, start_line: usize, suffix: IdSuffix) -> String {
    let base = collapse_unsafe(file_path);
    let mut id = format!("{base}_L{start_line}");
    match suffix {
        IdSuffix::Part(i) => id.push_str(&format!("_p{i}")),
        IdSuffix::Fallback(i) => id.push_str(&format!("_fallback{i}")),
        IdSuffix::None => {}
    }
    id
}

/// `Chunk` fields plus the persisted vector and bookkeeping columns
/// (spec.md §3 "VectorRecord").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub chunk: Chunk,
    /// 768-element, L2-normalized embedding (spec.md invariant 3).
    pub vector: Vec<f32>,
    /// MD5 digest (hex) of the *file* the chunk was derived from.
    pub content_hash: String,
    /// Unix epoch milliseconds at record creation.
    pub indexed_at: i64,
}

impl VectorRecord {
    /// Validates invariants 3 and 4 from spec.md §3. Called once at
    /// construction so malformed records never reach the store.
    pub fn validate(&self) -> Result<(), String> {
        if self.vector.len() != crate::config::VECTOR_DIM {
            return Err(format!(
                "vector has {} components, expected {}",
                self.vector.len(),
                crate::config::VECTOR_DIM
            ));
        }
        if !self.vector.iter().all(|x| x.is_finite()) {
            return Err("vector contains a non-finite component".to_string());
        }
        if self.chunk.start_line > self.chunk.end_line {
            return Err(format!(
                "start_line {} > end_line {}",
                self.chunk.start_line, self.chunk.end_line
            ));
        }
        if !ID_PATTERN_OK(&self.chunk.id) {
            return Err(format!("id '{}' contains unsafe characters", self.chunk.id));
        }
        Ok(())
    }
}

/// Equivalent of `^[A-Za-z0-9_-]+$`, spec.md §8 property 1.
#[allow(non_snake_case)]
fn ID_PATTERN_OK(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_matches_whitelist() {
        let id = derive_chunk_id("/repo/src/main.rs", 42, IdSuffix::None);
        assert!(ID_PATTERN_OK(&id));
        assert_eq!(id, "_repo_src_main_rs_L42");
    }

    #[test]
    fn id_part_suffix() {
        let id = derive_chunk_id("/repo/src/big.rs", 10, IdSuffix::Part(2));
        assert!(id.ends_with("_L10_p2"));
        assert!(ID_PATTERN_OK(&id));
    }

    #[test]
    fn id_fallback_suffix() {
        let id = derive_chunk_id("/repo/notes.xyz", 1, IdSuffix::Fallback(3));
        assert!(id.ends_with("_L1_fallback3"));
    }

    #[test]
    fn collapse_matches_filter_normalization() {
        let path = "/repo/src/../src/a b(c).rs";
        let a = collapse_unsafe(path);
        let b = collapse_unsafe(path);
        assert_eq!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }
}
