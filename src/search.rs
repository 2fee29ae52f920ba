//! Hybrid search orchestration (spec.md §4.7). Generalized from the
//! teacher's `Searcher` (vector search + flat `+0.5` keyword boost) into
//! a candidate-multiplier recall pass, a weighted per-field keyword
//! boost, and an optional reranking stage that degrades gracefully on
//! failure.

use crate::embedder::{query_text, Embedder};
use crate::error::CoreResult;
use crate::filter::{FilterBuilder, FilterInput};
use crate::reranker::Reranker;
use crate::store::VectorStore;
use serde::Serialize;
use std::sync::Arc;

/// Default over-recall multiplier and limit bounds (spec.md §4.7, §6).
const DEFAULT_CANDIDATE_MULTIPLIER: usize = 5;
const MIN_LIMIT: usize = 1;
const MAX_LIMIT: usize = 50;
const MIN_CANDIDATE_MULTIPLIER: usize = 1;
const MAX_CANDIDATE_MULTIPLIER: usize = 20;

/// Passages handed to the reranker are truncated to this many characters
/// by the caller, not the reranker (spec.md §6).
const MAX_RERANK_PASSAGE_CHARS: usize = 512;

/// Per-keyword weights for the content/name/signature boost (spec.md §4.7
/// step 6).
const BOOST_CONTENT: f32 = 0.10;
const BOOST_NAME: f32 = 0.20;
const BOOST_SIGNATURE: f32 = 0.15;
const BOOST_NAME_WHOLE_TOKEN: f32 = 0.25;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub name: Option<String>,
    pub node_type: String,
    pub signature: Option<String>,
    pub language: String,
    pub content: String,
    /// Sort key actually used: the reranked score when reranking ran,
    /// otherwise the keyword-boosted vector score.
    pub combined_score: f32,
    /// Raw cosine-similarity score from `vector_search`, before boosting.
    pub vector_score: f32,
    /// `combined_score - vector_score` contributed by the keyword boost
    /// (zero once a rerank pass has replaced `combined_score` outright).
    pub keyword_score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub path: Option<String>,
    pub file_pattern: Option<String>,
    pub limit: usize,
    pub use_reranking: bool,
    pub candidate_multiplier: Option<usize>,
}

pub struct SearchOrchestrator {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl SearchOrchestrator {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>, reranker: Option<Arc<dyn Reranker>>) -> Self {
        Self { store, embedder, reranker }
    }

    pub async fn search(&self, request: &SearchRequest) -> CoreResult<Vec<SearchResult>> {
        let limit = request.limit.clamp(MIN_LIMIT, MAX_LIMIT);

        // spec.md §9 Open Question 2: skip the embedding call entirely
        // when the store holds nothing to compare against.
        if self.store.is_empty().await? {
            return Ok(Vec::new());
        }

        let filter = FilterBuilder::build(&FilterInput {
            path: request.path.clone(),
            file_pattern: request.file_pattern.clone(),
        })?;

        let multiplier = request
            .candidate_multiplier
            .unwrap_or(DEFAULT_CANDIDATE_MULTIPLIER)
            .clamp(MIN_CANDIDATE_MULTIPLIER, MAX_CANDIDATE_MULTIPLIER);
        // spec.md §4.7 step 3: over-recall only pays for itself when a
        // reranking pass will subsequently narrow it back down.
        let candidate_count = if request.use_reranking { limit * multiplier } else { limit };

        let query_vector = self.embedder.embed_one(&query_text(&request.query)).await?;
        let candidates = self.store.vector_search(&query_vector, candidate_count, filter.as_deref()).await?;

        let mut scored: Vec<SearchResult> = candidates
            .into_iter()
            .map(|c| {
                let vector_score = c.score;
                let boosted = apply_keyword_boost(&request.query, &c.record.chunk, vector_score);
                SearchResult {
                    file_path: c.record.chunk.file_path,
                    start_line: c.record.chunk.start_line,
                    end_line: c.record.chunk.end_line,
                    name: c.record.chunk.name,
                    node_type: c.record.chunk.node_type,
                    signature: c.record.chunk.signature,
                    language: c.record.chunk.language,
                    content: c.record.chunk.content,
                    combined_score: boosted,
                    vector_score,
                    keyword_score: boosted - vector_score,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.combined_score.partial_cmp(&a.combined_score).unwrap_or(std::cmp::Ordering::Equal));

        // spec.md §4.7 step 7: only worth invoking the cross-encoder when
        // there is actually a shortlist larger than what we'll return.
        if request.use_reranking && scored.len() > limit {
            if let Some(reranker) = &self.reranker {
                if let Err(e) = self.rerank_in_place(reranker.as_ref(), &request.query, &mut scored).await {
                    tracing::warn!(error = %e, "reranking failed, falling back to vector+keyword order");
                }
            }
        }

        scored.truncate(limit);
        Ok(scored)
    }

    async fn rerank_in_place(&self, reranker: &dyn Reranker, query: &str, candidates: &mut [SearchResult]) -> CoreResult<()> {
        let passages: Vec<String> =
            candidates.iter().map(|c| c.content.chars().take(MAX_RERANK_PASSAGE_CHARS).collect()).collect();
        let scores = reranker.rerank(query, &passages).await?;
        for (candidate, score) in candidates.iter_mut().zip(scores) {
            candidate.combined_score = score;
        }
        candidates.sort_by(|a, b| b.combined_score.partial_cmp(&a.combined_score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(())
    }

    /// Full-text-only search path (no embedding call), used when a
    /// caller wants literal keyword matching instead of semantic recall.
    pub async fn search_full_text(&self, text: &str, limit: usize) -> CoreResult<(Vec<SearchResult>, bool)> {
        let outcome = self.store.full_text_search(text, limit).await?;
        let partial = outcome.is_partial();
        let results = outcome
            .into_records()
            .into_iter()
            .map(|c| SearchResult {
                file_path: c.record.chunk.file_path,
                start_line: c.record.chunk.start_line,
                end_line: c.record.chunk.end_line,
                name: c.record.chunk.name,
                node_type: c.record.chunk.node_type,
                signature: c.record.chunk.signature,
                language: c.record.chunk.language,
                content: c.record.chunk.content,
                combined_score: c.score,
                vector_score: 0.0,
                keyword_score: c.score,
            })
            .collect();
        Ok((results, partial))
    }
}

/// Additive boost over the vector-search score (spec.md §4.7 step 6):
/// for every query keyword, `0.10` if it appears in `content`, `0.20` if
/// in `name`, `0.15` if in `signature`, and a further `0.25` if it is a
/// whole token of `name`. Clamped to `1.0`.
fn apply_keyword_boost(query: &str, chunk: &crate::chunk::Chunk, vector_score: f32) -> f32 {
    let keywords: Vec<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();
    if keywords.is_empty() {
        return vector_score;
    }

    let name_lc = chunk.name.as_deref().unwrap_or("").to_lowercase();
    let signature_lc = chunk.signature.as_deref().unwrap_or("").to_lowercase();
    let content_lc = chunk.content.to_lowercase();
    let name_tokens: Vec<&str> = name_lc.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).collect();

    let boost: f32 = keywords
        .iter()
        .map(|kw| {
            let mut b = 0.0;
            if content_lc.contains(kw.as_str()) {
                b += BOOST_CONTENT;
            }
            if !name_lc.is_empty() && name_lc.contains(kw.as_str()) {
                b += BOOST_NAME;
            }
            if !signature_lc.is_empty() && signature_lc.contains(kw.as_str()) {
                b += BOOST_SIGNATURE;
            }
            if name_tokens.iter().any(|t| *t == kw.as_str()) {
                b += BOOST_NAME_WHOLE_TOKEN;
            }
            b
        })
        .sum();

    (vector_score + boost).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    fn chunk_with(name: Option<&str>, signature: Option<&str>, content: &str) -> Chunk {
        Chunk {
            id: "t_L1".to_string(),
            file_path: "/t.rs".to_string(),
            content: content.to_string(),
            start_line: 1,
            end_line: 1,
            name: name.map(str::to_string),
            node_type: "function_item".to_string(),
            signature: signature.map(str::to_string),
            docstring: None,
            language: "rust".to_string(),
        }
    }

    #[test]
    fn boost_is_clamped_to_one() {
        let chunk = chunk_with(Some("authenticate"), Some("fn authenticate(jwt)"), "fn authenticate(jwt) { verify(jwt) }");
        let boosted = apply_keyword_boost("authenticate", &chunk, 0.95);
        assert!(boosted <= 1.0);
    }

    #[test]
    fn whole_token_name_match_outweighs_substring_match() {
        let whole = chunk_with(Some("authenticate"), None, "");
        let substring = chunk_with(Some("reauthenticated"), None, "");
        let whole_boost = apply_keyword_boost("authenticate", &whole, 0.0);
        let substring_boost = apply_keyword_boost("authenticate", &substring, 0.0);
        assert!(whole_boost > substring_boost);
    }

    #[test]
    fn no_keyword_match_leaves_score_unchanged() {
        let chunk = chunk_with(Some("unrelated"), None, "nothing matches here");
        let boosted = apply_keyword_boost("jwt", &chunk, 0.4);
        assert_eq!(boosted, 0.4);
    }
}
