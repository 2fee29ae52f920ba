//! Translates user-supplied `{ path, file_pattern }` scope into a single
//! store-level predicate, safe against SQL injection (spec.md §4.1).

use crate::chunk::collapse_unsafe;
use crate::error::{CoreError, CoreResult};
use crate::languages::language_for_extension;
use lazy_static::lazy_static;
use regex::Regex;

const MAX_PREDICATE_LEN: usize = 500;

lazy_static! {
    /// Whitelist applied to every interpolated token before it is
    /// embedded in the predicate string.
    static ref TOKEN_WHITELIST: Regex = Regex::new(r"^[A-Za-z0-9_\-%]+$").unwrap();
    static ref BARE_EXTENSION_GLOB: Regex = Regex::new(r"^\*\.[a-z]+$").unwrap();
}

#[derive(Debug, Default, Clone)]
pub struct FilterInput {
    pub path: Option<String>,
    pub file_pattern: Option<String>,
}

/// Builds the store's `WHERE`-clause predicate for a search request.
/// Never panics on arbitrary input; unsafe characters are collapsed to
/// `_` rather than rejected outright, and only the final, fully
/// interpolated tokens are validated against the whitelist.
pub struct FilterBuilder;

impl FilterBuilder {
    /// Returns `None` when both inputs are absent ("no filter").
    pub fn build(input: &FilterInput) -> CoreResult<Option<String>> {
        let mut clauses = Vec::new();

        if let Some(path) = input.path.as_deref().filter(|p| !p.is_empty()) {
            clauses.push(Self::path_clause(path)?);
        }

        if let Some(pattern) = input.file_pattern.as_deref().filter(|p| !p.is_empty()) {
            clauses.push(Self::file_pattern_clause(pattern)?);
        }

        if clauses.is_empty() {
            return Ok(None);
        }

        let predicate = clauses.join(" AND ");
        if predicate.len() > MAX_PREDICATE_LEN {
            return Err(CoreError::InvalidFilter {
                reason: format!("predicate exceeds {MAX_PREDICATE_LEN} characters"),
            });
        }
        Ok(Some(predicate))
    }

    fn path_clause(path: &str) -> CoreResult<String> {
        let sanitized = collapse_unsafe(path);
        Self::check_token(&sanitized)?;
        Ok(format!("id LIKE '{sanitized}%'"))
    }

    fn file_pattern_clause(pattern: &str) -> CoreResult<String> {
        if BARE_EXTENSION_GLOB.is_match(pattern) {
            let ext = &pattern[2..];
            if let Some(lang) = language_for_extension(ext) {
                Self::check_token(lang)?;
                return Ok(format!("language = '{lang}'"));
            }
        }

        // Convert glob syntax to LIKE syntax, longest patterns first so
        // "**" doesn't get half-converted by the "*" rule.
        let converted = pattern.replace("**", "%").replace('*', "%").replace('?', "_");
        let sanitized = collapse_glob_preserving_wildcards(&converted);
        Self::check_token(&sanitized)?;
        Ok(format!("id LIKE '%{sanitized}'"))
    }

    fn check_token(token: &str) -> CoreResult<()> {
        if token.is_empty() || !TOKEN_WHITELIST.is_match(token) {
            return Err(CoreError::InvalidFilter {
                reason: format!("token '{token}' contains characters outside the whitelist"),
            });
        }
        Ok(())
    }
}

/// Like [`collapse_unsafe`] but leaves `%` and `_` (the LIKE wildcards
/// produced by glob conversion) untouched.
fn collapse_glob_preserving_wildcards(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '%' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_filter_when_empty() {
        let out = FilterBuilder::build(&FilterInput::default()).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn path_prefix_matches_chunk_id() {
        let out = FilterBuilder::build(&FilterInput {
            path: Some("/repo/src".to_string()),
            file_pattern: None,
        })
        .unwrap()
        .unwrap();
        assert_eq!(out, "id LIKE '_repo_src%'");

        let id = crate::chunk::derive_chunk_id("/repo/src/main.rs", 1, crate::chunk::IdSuffix::None);
        assert!(id.starts_with("_repo_src"));
    }

    #[test]
    fn bare_extension_glob_becomes_language_equality() {
        let out = FilterBuilder::build(&FilterInput {
            path: None,
            file_pattern: Some("*.py".to_string()),
        })
        .unwrap()
        .unwrap();
        assert_eq!(out, "language = 'python'");
    }

    #[test]
    fn injection_payload_is_sanitized_not_rejected() {
        let out = FilterBuilder::build(&FilterInput {
            path: Some("'; DROP TABLE--".to_string()),
            file_pattern: None,
        })
        .unwrap()
        .unwrap();
        assert_eq!(out, "id LIKE '___DROP_TABLE--%'");
    }

    #[test]
    fn combined_clauses_use_and() {
        let out = FilterBuilder::build(&FilterInput {
            path: Some("/repo".to_string()),
            file_pattern: Some("*.ts".to_string()),
        })
        .unwrap()
        .unwrap();
        assert_eq!(out, "id LIKE '_repo%' AND language = 'typescript'");
    }

    #[test]
    fn glob_suffix_conversion() {
        let out = FilterBuilder::build(&FilterInput {
            path: None,
            file_pattern: Some("**/utils.*".to_string()),
        })
        .unwrap()
        .unwrap();
        assert_eq!(out, "id LIKE '%%_utils_%'");
    }
}
