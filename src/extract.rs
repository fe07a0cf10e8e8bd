//! Isolate the executable query from free-form LLM output
//!
//! Extraction never fails: when nothing recognizable is found the trimmed
//! input is returned as-is and validation decides whether it is runnable.

use crate::database::Dialect;
use regex::Regex;
use std::sync::LazyLock;

/// Opening fence with optional info string, body, closing fence
static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[^\n]*\n([\s\S]*?)```").expect("valid fence regex"));

/// Opening fence whose closing fence never arrived (truncated completion)
static UNTERMINATED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[^\n`]*\n([\s\S]*)$").expect("valid fence regex"));

/// Single-line fence such as ```SELECT 1```
static INLINE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```([^`\n]+)```").expect("valid fence regex"));

/// Collection handle access: `db[...]` or `db.<name>`
static DOCUMENT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bdb\s*[\[.]").expect("valid marker regex"));

/// `result = `, `let cursor = `, `const x = ` ahead of the handle
static ASSIGNMENT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(?:let|const|var)\s+)?[A-Za-z_][A-Za-z0-9_]*\s*=\s*$")
        .expect("valid assignment regex")
});

/// Extract the best-effort query from an LLM response
///
/// Takes the interior of the first fenced code block (or the whole text when
/// there is none), then, if the candidate addresses a document collection,
/// keeps only the first line that does so with any assignment prefix removed.
pub fn extract_query(response: &str) -> String {
    let candidate = fenced_or_whole(response);
    refine_document_candidate(&candidate).unwrap_or(candidate)
}

/// Dialect-aware extraction: SQL candidates skip the document refinement so
/// statements mentioning `db.` identifiers are never truncated.
pub fn extract_query_for(response: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::Sql => fenced_or_whole(response),
        Dialect::Document => extract_query(response),
    }
}

fn fenced_or_whole(response: &str) -> String {
    if let Some(body) = FENCED_BLOCK.captures(response).and_then(|c| c.get(1)) {
        return body.as_str().trim().to_string();
    }
    if let Some(body) = UNTERMINATED_BLOCK.captures(response).and_then(|c| c.get(1)) {
        return body.as_str().trim().to_string();
    }
    if let Some(body) = INLINE_BLOCK.captures(response).and_then(|c| c.get(1)) {
        return body.as_str().trim().to_string();
    }
    response.trim().to_string()
}

fn refine_document_candidate(candidate: &str) -> Option<String> {
    candidate.lines().find_map(|line| {
        let marker = DOCUMENT_MARKER.find(line)?;
        let prefix = &line[..marker.start()];
        let query = if ASSIGNMENT_PREFIX.is_match(prefix) {
            &line[marker.start()..]
        } else {
            line
        };
        Some(query.trim().to_string())
    })
}
