//! MCP stdio server exposing `semantic_search` (spec.md §6). Keeps the
//! teacher's `rmcp` tool-router shape (manual `call_tool` dispatch,
//! `tool_router` macro) but replaces the single `search` tool's narrow
//! argument set with the full filter/rerank surface SPEC_FULL.md names,
//! and replaces the teacher's `Arc<Mutex<Option<Searcher>>>` lazy init
//! with a `tokio::sync::OnceCell` so concurrent first calls single-flight
//! onto one model load and one initial index build (spec.md §5).

use crate::config::{resolve_index_path, IndexerConfig};
use crate::embedder::{Embedder, LocalEmbedder};
use crate::error::CoreError;
use crate::indexer::Indexer;
use crate::reranker::{LocalReranker, Reranker};
use crate::search::{SearchOrchestrator, SearchRequest};
use crate::store::VectorStore;
use anyhow::{Context, Result};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters, ServerHandler},
    model::{
        CallToolRequestParam, CallToolResult, Content, ErrorCode, ErrorData, ListToolsResult,
        PaginatedRequestParam,
    },
    service::{RequestContext, RoleServer, ServiceExt},
    tool, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug)]
pub struct SemanticSearchArgs {
    /// Natural-language or code-shaped query.
    pub query: String,
    /// Restrict results to chunks whose id begins with this path prefix.
    pub path: Option<String>,
    /// Maximum results to return (default 10).
    pub limit: Option<usize>,
    /// Glob or bare extension (e.g. `*.py`) narrowing results by file.
    pub file_pattern: Option<String>,
    /// Apply the cross-encoder reranking pass (default true).
    pub use_reranking: Option<bool>,
    /// Candidate pool size multiplier before truncation to `limit`.
    pub candidate_multiplier: Option<usize>,
}

struct Runtime {
    root: PathBuf,
    #[allow(dead_code)]
    indexer: Arc<Indexer>,
    watcher: Option<crate::watcher::DebouncedWatcher>,
    store: Arc<VectorStore>,
    orchestrator: SearchOrchestrator,
}

impl Runtime {
    /// spec.md §5 "Cancellation": the shutdown signal cancels the watcher
    /// before closing the store. Safe to call once; `DebouncedWatcher::stop`
    /// and `VectorStore::close` are each idempotent-ish but this only runs
    /// on the single shutdown path.
    async fn shutdown(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.stop();
        }
        if let Err(e) = self.store.close().await {
            tracing::warn!(error = %e, "error closing store during shutdown");
        }
    }
}

#[derive(Clone)]
pub struct McpServer {
    tool_router: ToolRouter<Self>,
    root: PathBuf,
    runtime: Arc<OnceCell<Arc<Runtime>>>,
}

#[tool_router]
impl McpServer {
    pub fn new(root: PathBuf) -> Self {
        Self {
            tool_router: Self::tool_router(),
            root,
            runtime: Arc::new(OnceCell::new()),
        }
    }

    /// Single-flight lazy init: model load + store open + initial index
    /// build happen once no matter how many callers race this (spec.md
    /// §5 "Lazy initialization").
    async fn runtime(&self) -> Result<Arc<Runtime>, ErrorData> {
        self.runtime
            .get_or_try_init(|| async {
                let index_path = resolve_index_path(&self.root);
                let store = Arc::new(VectorStore::open(&index_path).await.map_err(to_internal_err)?);
                let embedder: Arc<dyn Embedder> = Arc::new(LocalEmbedder::load().map_err(to_internal_err)?);
                let reranker: Option<Arc<dyn Reranker>> = match LocalReranker::load() {
                    Ok(r) => Some(Arc::new(r) as Arc<dyn Reranker>),
                    Err(e) => {
                        tracing::warn!(error = %e, "reranker unavailable; use_reranking requests will be served unreranked");
                        None
                    }
                };

                let indexer = Arc::new(Indexer::new(
                    self.root.clone(),
                    IndexerConfig::default(),
                    Arc::clone(&store),
                    Arc::clone(&embedder),
                ));
                let stats = indexer.run().await.map_err(to_internal_err)?;
                tracing::info!(
                    files_indexed = stats.files_indexed,
                    files_unchanged = stats.files_unchanged,
                    files_skipped = stats.files_skipped,
                    files_deleted = stats.files_deleted,
                    chunks_indexed = stats.chunks_indexed,
                    duration_ms = stats.duration_ms,
                    "initial index build complete"
                );

                let watcher = match crate::watcher::DebouncedWatcher::start(self.root.clone(), Arc::clone(&indexer)) {
                    Ok(w) => Some(w),
                    Err(e) => {
                        tracing::warn!(error = %e, "filesystem watcher failed to start; index will only refresh on restart");
                        None
                    }
                };

                let orchestrator = SearchOrchestrator::new(Arc::clone(&store), embedder, reranker);
                Ok::<_, ErrorData>(Arc::new(Runtime { root: self.root.clone(), indexer, watcher, store, orchestrator }))
            })
            .await
            .map(Arc::clone)
    }

    #[tool(
        name = "semantic_search",
        description = "Search this codebase by meaning. Returns matching code chunks with file path, line range, and a similarity score, optionally filtered by path prefix or file pattern and reranked with a cross-encoder."
    )]
    async fn semantic_search(&self, args: Parameters<SemanticSearchArgs>) -> Result<CallToolResult, ErrorData> {
        let args = args.0;
        let runtime = self.runtime().await?;

        if let Some(path) = &args.path {
            validate_path_within_root(&runtime.root, path).map_err(to_invalid_params)?;
        }

        let query = args.query.clone();
        let request = SearchRequest {
            query,
            path: args.path,
            file_pattern: args.file_pattern,
            limit: args.limit.unwrap_or(10),
            use_reranking: args.use_reranking.unwrap_or(true),
            candidate_multiplier: args.candidate_multiplier,
        };

        let results = runtime.orchestrator.search(&request).await.map_err(to_internal_err)?;
        let response = ToolResponse {
            total_results: results.len(),
            query: args.query,
            results: results.iter().map(ResultRow::from).collect(),
        };
        let body = serde_json::to_string(&response).map_err(|e| to_internal_err(e.to_string()))?;
        Ok(CallToolResult::success(vec![Content::text(body)]))
    }
}

impl ServerHandler for McpServer {
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let tools = self.tool_router.list_all();
        Ok(ListToolsResult { tools, next_cursor: None, meta: None })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        if request.name == "semantic_search" {
            let args: SemanticSearchArgs = if let Some(args_map) = request.arguments {
                serde_json::from_value(serde_json::Value::Object(args_map))
                    .map_err(|e| to_invalid_params(format!("invalid arguments: {e}")))?
            } else {
                return Err(to_invalid_params("missing arguments".to_string()));
            };
            return self.semantic_search(Parameters(args)).await;
        }

        Err(ErrorData {
            code: ErrorCode(-32601),
            message: format!("tool not found: {}", request.name).into(),
            data: None,
        })
    }
}

/// Rejects a `path` argument that would resolve outside the repository
/// root (spec.md §6 "Path validation"). Normalizes `.`/`..` components
/// lexically rather than via `std::fs::canonicalize`, which fails (and
/// previously fell back to the un-resolved, traversal-vulnerable path)
/// for any `path` scope that doesn't already exist on disk.
fn validate_path_within_root(root: &Path, candidate: &str) -> Result<(), CoreError> {
    let joined = root.join(candidate.trim_start_matches('/'));
    let normalized = normalize_lexically(&joined);
    if normalized.starts_with(root) {
        Ok(())
    } else {
        Err(CoreError::PathTraversal { path: candidate.to_string() })
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Literal response shape from spec.md §6 "Tool surface (MCP)".
#[derive(Serialize)]
struct ToolResponse {
    results: Vec<ResultRow>,
    #[serde(rename = "totalResults")]
    total_results: usize,
    query: String,
}

#[derive(Serialize)]
struct ResultRow {
    file: String,
    #[serde(rename = "startLine")]
    start_line: usize,
    #[serde(rename = "endLine")]
    end_line: usize,
    name: Option<String>,
    #[serde(rename = "nodeType")]
    node_type: String,
    score: f32,
    content: String,
    signature: Option<String>,
}

impl From<&crate::search::SearchResult> for ResultRow {
    fn from(r: &crate::search::SearchResult) -> Self {
        Self {
            file: r.file_path.clone(),
            start_line: r.start_line,
            end_line: r.end_line,
            name: r.name.clone(),
            node_type: r.node_type.clone(),
            score: r.combined_score,
            content: r.content.clone(),
            signature: r.signature.clone(),
        }
    }
}

fn to_internal_err(e: impl std::fmt::Display) -> ErrorData {
    ErrorData { code: ErrorCode(-32000), message: format!("{e}").into(), data: None }
}

fn to_invalid_params(message: String) -> ErrorData {
    ErrorData { code: ErrorCode(-32602), message: message.into(), data: None }
}

pub async fn run_mcp_server(root: PathBuf) -> Result<()> {
    let server = McpServer::new(root);
    let shutdown_runtime = Arc::clone(&server.runtime);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            if let Some(runtime) = shutdown_runtime.get() {
                runtime.shutdown().await;
            }
            std::process::exit(0);
        }
    });

    let transport = rmcp::transport::io::stdio();
    server.serve(transport).await.context("MCP server failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_outside_an_existing_root() {
        let root = Path::new("/repo");
        assert!(validate_path_within_root(root, "src/lib.rs").is_ok());
        assert!(validate_path_within_root(root, "../outside").is_err());
    }

    #[test]
    fn rejects_traversal_through_a_scope_that_does_not_exist_on_disk() {
        // Regression: canonicalize() fails for a path with no real
        // on-disk entry, and the old fallback to the un-resolved joined
        // path let lexical ".." components slip past `starts_with`.
        let root = Path::new("/repo");
        let result = validate_path_within_root(root, "../../../../nonexistent-but-outside");
        assert!(result.is_err());
    }

    #[test]
    fn dot_components_do_not_escape_root() {
        let root = Path::new("/repo");
        assert!(validate_path_within_root(root, "./src/./lib.rs").is_ok());
    }
}
