//! Environment and default configuration (spec.md §6 "Environment",
//! §4.5 Indexer defaults, §6 "Default ignore patterns").

use std::env;
use std::path::{Path, PathBuf};

/// Default ignore globs honored by both the indexer scan and the watcher.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/dist/**",
    "**/build/**",
    "**/.next/**",
    "**/coverage/**",
    "**/__pycache__/**",
    "**/venv/**",
    "**/.venv/**",
    "**/target/**",
    "**/vendor/**",
    "**/*.min.js",
    "**/*.bundle.js",
    "**/*.map",
    "**/package-lock.json",
    "**/yarn.lock",
    "**/pnpm-lock.yaml",
    "**/.semantic-code/**",
];

pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024; // 1 MiB
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_CHUNKS_IN_MEMORY: usize = 500;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;

pub const WATCH_STABILITY_WINDOW_MS: u64 = 500;
pub const WATCH_DEBOUNCE_WINDOW_MS: u64 = 1000;

pub const VECTOR_DIM: usize = 768;

/// Resolves the repository root: positional CLI argument, then
/// `SEMANTIC_CODE_ROOT`, then the current working directory.
pub fn resolve_root(cli_arg: Option<&str>) -> anyhow::Result<PathBuf> {
    let raw = cli_arg
        .map(str::to_string)
        .or_else(|| env::var("SEMANTIC_CODE_ROOT").ok())
        .unwrap_or_else(|| ".".to_string());
    Ok(std::fs::canonicalize(&raw)?)
}

/// Resolves the index storage directory: `SEMANTIC_CODE_INDEX`, else
/// `<root>/.semantic-code/index/`.
pub fn resolve_index_path(root: &Path) -> PathBuf {
    env::var("SEMANTIC_CODE_INDEX")
        .map(PathBuf::from)
        .unwrap_or_else(|_| root.join(".semantic-code").join("index"))
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub max_file_size: u64,
    pub batch_size: usize,
    pub max_chunks_in_memory: usize,
    pub ignore_patterns: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            max_chunks_in_memory: DEFAULT_MAX_CHUNKS_IN_MEMORY,
            ignore_patterns: DEFAULT_IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}
