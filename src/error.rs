//! Structured error kinds shared by every core subsystem.
//!
//! `anyhow` is still used at the CLI/MCP process boundary (matching the
//! rest of the codebase), but anything that crosses a subsystem boundary —
//! store, indexer, orchestrator, filter builder — returns `CoreError` so
//! callers can match on the kind instead of parsing message text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid filter: {reason}")]
    InvalidFilter { reason: String },

    #[error("path escapes repository root: {path}")]
    PathTraversal { path: String },

    #[error("malformed chunk id reached a store operation: {id}")]
    InvalidId { id: String },

    #[error("failed to load model {model}: {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("embedding generation failed for {context}: {reason}")]
    EmbeddingGeneration { context: String, reason: String },

    #[error("I/O failure on {path}: {source}")]
    IoFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("store I/O failure: {reason}")]
    StoreIo { reason: String },

    #[error("parse failure in {path}: {reason}")]
    ParseFailure { path: String, reason: String },

    #[error("invalid record for chunk {id}: {reason}")]
    InvalidRecord { id: String, reason: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
