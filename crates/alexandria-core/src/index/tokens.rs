//! Exact-Token Index
//!
//! Classifies tokens in memory content (identifiers, paths, commands,
//! versions, error codes, flags) and keeps them in the `object_tokens` table
//! for exact-hit lookup. Re-indexed transactionally with content changes.

use regex::Regex;
use rusqlite::{params, Connection};
use std::sync::{Arc, LazyLock};

use crate::error::Result;
use crate::storage::Database;

/// Classified token kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    /// camelCase / snake_case / PascalCase identifier
    Identifier,
    /// Slash-separated path with a dot extension
    Path,
    /// Lowercase command word followed by arguments
    Command,
    /// Dotted version like 1.2 or 1.2.3
    Version,
    /// E123 / ERR_FOO / TS2304 style error code
    ErrorCode,
    /// --long-flag
    Flag,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Identifier => "identifier",
            TokenType::Path => "path",
            TokenType::Command => "command",
            TokenType::Version => "version",
            TokenType::ErrorCode => "error_code",
            TokenType::Flag => "flag",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "identifier" => Some(TokenType::Identifier),
            "path" => Some(TokenType::Path),
            "command" => Some(TokenType::Command),
            "version" => Some(TokenType::Version),
            "error_code" => Some(TokenType::ErrorCode),
            "flag" => Some(TokenType::Flag),
            _ => None,
        }
    }
}

/// A classified token extracted from content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedToken {
    pub token: String,
    pub token_type: TokenType,
}

static FLAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^--[A-Za-z][A-Za-z0-9-]*$").expect("flag pattern"));
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v?\d+\.\d+(\.\d+)?$").expect("version pattern"));
static ERROR_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(E\d{2,}|ERR_[A-Z0-9_]+|TS\d+)$").expect("error code pattern"));
static PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S*/\S*\.[A-Za-z0-9]+$").expect("path pattern"));
static SNAKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]*(_[a-z0-9]+)+$").expect("snake pattern"));
static CAMEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]+([A-Z][a-z0-9]*)+$").expect("camel pattern"));
static PASCAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z][a-z0-9]+){2,}$").expect("pascal pattern"));
static COMMAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]*$").expect("command pattern"));

/// Extract and classify tokens from memory content. Unclassifiable words are
/// skipped; duplicates collapse to one entry (first classification wins).
pub fn extract_tokens(content: &str) -> Vec<ExtractedToken> {
    let words: Vec<&str> = content
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | ',' | ';' | '(' | ')' | ':' | '.')))
        .filter(|w| !w.is_empty())
        .collect();

    let mut seen = std::collections::HashSet::new();
    let mut tokens = Vec::new();

    for (i, word) in words.iter().enumerate() {
        let classified = if FLAG_RE.is_match(word) {
            Some(TokenType::Flag)
        } else if VERSION_RE.is_match(word) {
            Some(TokenType::Version)
        } else if ERROR_CODE_RE.is_match(word) {
            Some(TokenType::ErrorCode)
        } else if PATH_RE.is_match(word) {
            Some(TokenType::Path)
        } else if SNAKE_RE.is_match(word) || CAMEL_RE.is_match(word) || PASCAL_RE.is_match(word) {
            Some(TokenType::Identifier)
        } else if COMMAND_RE.is_match(word)
            && words.get(i + 1).is_some_and(|next| FLAG_RE.is_match(next))
        {
            Some(TokenType::Command)
        } else {
            None
        };

        if let Some(token_type) = classified {
            if seen.insert(word.to_string()) {
                tokens.push(ExtractedToken {
                    token: word.to_string(),
                    token_type,
                });
            }
        }
    }

    tokens
}

/// Exact-token index over the `object_tokens` table.
pub struct TokenIndex {
    db: Arc<Database>,
}

impl TokenIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Replace a memory's tokens using the caller's connection so the token
    /// rows commit atomically with the content change.
    pub(crate) fn reindex_with(
        conn: &Connection,
        memory_id: &str,
        content: &str,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "DELETE FROM object_tokens WHERE object_id = ?1",
            params![memory_id],
        )?;
        for t in extract_tokens(content) {
            conn.execute(
                "INSERT OR IGNORE INTO object_tokens (object_id, token, token_type)
                 VALUES (?1, ?2, ?3)",
                params![memory_id, t.token, t.token_type.as_str()],
            )?;
        }
        Ok(())
    }

    /// Memory ids carrying the exact token.
    pub fn search_by_token(&self, token: &str) -> Result<Vec<String>> {
        let reader = self.db.read()?;
        let mut stmt = reader.prepare(
            "SELECT object_id FROM object_tokens WHERE token = ?1 ORDER BY object_id",
        )?;
        let ids = stmt
            .query_map(params![token], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Case-insensitive containment over identifier tokens, for camelCase
    /// lookups like `jsonBody` hitting `parseJsonBody`.
    pub fn search_identifier_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        let reader = self.db.read()?;
        let mut stmt = reader.prepare(
            "SELECT DISTINCT object_id FROM object_tokens
             WHERE token_type = 'identifier' AND token LIKE ?1 ESCAPE '\\'
             ORDER BY object_id",
        )?;
        let like = format!("%{}%", pattern.replace('%', "").replace('_', "\\_"));
        let ids = stmt
            .query_map(params![like], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Tokens stored for one memory, for coherence checks.
    pub fn tokens_for(&self, memory_id: &str) -> Result<Vec<ExtractedToken>> {
        let reader = self.db.read()?;
        let mut stmt = reader.prepare(
            "SELECT token, token_type FROM object_tokens WHERE object_id = ?1 ORDER BY token",
        )?;
        let rows = stmt
            .query_map(params![memory_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(token, ty)| {
                TokenType::parse_name(&ty).map(|token_type| ExtractedToken { token, token_type })
            })
            .collect();
        Ok(rows)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn types_of(content: &str) -> Vec<(String, TokenType)> {
        extract_tokens(content)
            .into_iter()
            .map(|t| (t.token, t.token_type))
            .collect()
    }

    #[test]
    fn test_identifier_classification() {
        let tokens = types_of("call parseJsonBody or parse_json_body or HybridSearch");
        assert!(tokens.contains(&("parseJsonBody".into(), TokenType::Identifier)));
        assert!(tokens.contains(&("parse_json_body".into(), TokenType::Identifier)));
        assert!(tokens.contains(&("HybridSearch".into(), TokenType::Identifier)));
    }

    #[test]
    fn test_path_version_flag_error_code() {
        let tokens = types_of("see src/retriever/hybrid.rs at 1.2.3 with --no-cache after E0308");
        assert!(tokens.contains(&("src/retriever/hybrid.rs".into(), TokenType::Path)));
        assert!(tokens.contains(&("1.2.3".into(), TokenType::Version)));
        assert!(tokens.contains(&("--no-cache".into(), TokenType::Flag)));
        assert!(tokens.contains(&("E0308".into(), TokenType::ErrorCode)));
    }

    #[test]
    fn test_command_requires_following_flag() {
        let tokens = types_of("run cargo --offline to build");
        assert!(tokens.contains(&("cargo".into(), TokenType::Command)));
        // Plain lowercase words with no flag after them are not commands
        let tokens = types_of("just some ordinary words here");
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_ts_error_code() {
        let tokens = types_of("compiler said TS2304 again");
        assert!(tokens.contains(&("TS2304".into(), TokenType::ErrorCode)));
    }

    #[test]
    fn test_dedup_within_content() {
        let tokens = types_of("retryBackoff retryBackoff retryBackoff");
        assert_eq!(tokens.len(), 1);
    }
}
