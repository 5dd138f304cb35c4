//! Query Fingerprinter
//!
//! Derives a stable identity for semantically-equivalent queries that differ
//! only in literals, whitespace or comments. The normalized text is produced
//! by a single character walk (comment stripping, literal replacement,
//! keyword casing) followed by whitespace collapse; the identity is a
//! truncated SHA-256 of that normalized text.
//!
//! The function is pure and idempotent: normalizing an already-normalized
//! text is a no-op, and equal normalized texts always produce equal hashes.

use crate::models::QueryIdentity;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Maximum bytes of original SQL retained as the descriptive sample
const MAX_SAMPLE_BYTES: usize = 4096;

/// Marker appended when the sample text was truncated
const TRUNCATION_MARKER: &str = "...";

/// Reserved words that are uppercased during normalization. Identifiers keep
/// their original casing.
static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "SELECT", "FROM", "WHERE", "AND", "OR", "NOT", "NULL", "IS", "IN", "EXISTS", "BETWEEN",
        "LIKE", "INSERT", "INTO", "VALUES", "UPDATE", "SET", "DELETE", "JOIN", "INNER", "LEFT",
        "RIGHT", "FULL", "OUTER", "CROSS", "ON", "GROUP", "BY", "ORDER", "HAVING", "LIMIT",
        "OFFSET", "TOP", "UNION", "ALL", "DISTINCT", "AS", "CASE", "WHEN", "THEN", "ELSE", "END",
        "CREATE", "ALTER", "DROP", "TABLE", "INDEX", "VIEW", "WITH", "OPTION", "DECLARE", "EXEC",
        "EXECUTE", "MERGE", "USING", "OUTPUT", "APPLY", "PIVOT", "UNPIVOT", "OVER", "PARTITION",
        "ASC", "DESC", "COUNT", "SUM", "AVG", "MIN", "MAX", "CAST", "CONVERT", "COALESCE",
        "ISNULL", "NULLIF", "IF", "BEGIN", "COMMIT", "ROLLBACK", "TRANSACTION", "RETURN",
        "WHILE", "FOR", "VALUES",
    ]
    .into_iter()
    .collect()
});

static ISO_DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}([ T]\d{2}:\d{2}(:\d{2}(\.\d+)?)?)?$").unwrap()
});

static GUID_SHAPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});

/// Produce the stable identity for a SQL text.
pub fn fingerprint(sql_text: &str) -> QueryIdentity {
    let normalized_text = normalize(sql_text);
    let hash = hash_normalized(&normalized_text);
    QueryIdentity { hash, normalized_text, sample_text: sample_text(sql_text) }
}

/// Hex-encoded first 16 bytes of SHA-256 over the normalized text.
pub fn hash_normalized(normalized: &str) -> String {
    let digest = Sha256::digest(normalized.as_bytes());
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Original SQL truncated to 4 KiB on a char boundary, with a marker.
fn sample_text(sql: &str) -> String {
    if sql.len() <= MAX_SAMPLE_BYTES {
        return sql.to_string();
    }
    let mut cut = MAX_SAMPLE_BYTES;
    while !sql.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = sql[..cut].to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Normalization pipeline: strip comments, replace literals with sentinels,
/// uppercase reserved keywords, collapse whitespace.
pub fn normalize(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            // Single-quoted string literal; '' escape pairs collapse first
            '\'' => {
                let (content, next) = scan_string_literal(&chars, i + 1);
                out.push('\'');
                out.push_str(classify_string_literal(&content));
                out.push('\'');
                i = next;
            },
            // Line comment
            '-' if chars.get(i + 1) == Some(&'-') => {
                i += 2;
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.push(' ');
            },
            // Block comment
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                out.push(' ');
            },
            // Numeric literal (integer, decimal, hex)
            _ if starts_number(&chars, i, &out) => {
                i = skip_number(&chars, i);
                out.push('#');
            },
            // Identifier or keyword
            _ if c.is_alphabetic() || c == '_' || c == '@' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '@' | '$'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let upper = word.to_uppercase();
                if KEYWORDS.contains(upper.as_str()) {
                    out.push_str(&upper);
                } else {
                    out.push_str(&word);
                }
            },
            _ => {
                out.push(c);
                i += 1;
            },
        }
    }

    // Collapse whitespace runs (including line breaks) and trim ends
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scan a string literal body starting after the opening quote. Returns the
/// content with '' pairs collapsed and the index after the closing quote.
fn scan_string_literal(chars: &[char], mut i: usize) -> (String, usize) {
    let mut content = String::new();
    while i < chars.len() {
        if chars[i] == '\'' {
            if chars.get(i + 1) == Some(&'\'') {
                content.push('\'');
                i += 2;
            } else {
                return (content, i + 1);
            }
        } else {
            content.push(chars[i]);
            i += 1;
        }
    }
    (content, i)
}

/// Sentinel for a string literal: datetime- and UUID-shaped contents keep a
/// typed marker so plan-affecting literal kinds remain distinguishable.
fn classify_string_literal(content: &str) -> &'static str {
    match content {
        // Already-normalized sentinels pass through, keeping the pipeline
        // idempotent.
        "#" => "#",
        "#DATE#" => "#DATE#",
        "#GUID#" => "#GUID#",
        _ if ISO_DATETIME.is_match(content) => "#DATE#",
        _ if GUID_SHAPED.is_match(content) => "#GUID#",
        _ => "#",
    }
}

/// A digit (or leading decimal point) starts a numeric literal only when the
/// previous emitted character cannot extend an identifier.
fn starts_number(chars: &[char], i: usize, out: &str) -> bool {
    let prev_is_word = out
        .chars()
        .next_back()
        .is_some_and(|p| p.is_alphanumeric() || p == '_' || p == '#');
    if prev_is_word {
        return false;
    }
    match chars[i] {
        '0'..='9' => true,
        '.' => chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// Skip past one numeric literal (decimal, float, scientific, or 0x hex).
fn skip_number(chars: &[char], mut i: usize) -> usize {
    if chars[i] == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
        i += 2;
        while i < chars.len() && chars[i].is_ascii_hexdigit() {
            i += 1;
        }
        return i;
    }
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
        i += 1;
    }
    if matches!(chars.get(i), Some('e') | Some('E'))
        && chars
            .get(i + 1)
            .is_some_and(|c| c.is_ascii_digit() || *c == '+' || *c == '-')
    {
        i += 2;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_equivalence() {
        let a = fingerprint("SELECT * FROM T WHERE id = 1");
        let b = fingerprint("select *  from  T  where  id = 42");

        assert_eq!(a.hash, b.hash);
        assert_eq!(a.normalized_text, "SELECT * FROM T WHERE id = #");
    }

    #[test]
    fn test_whitespace_and_comment_equivalence() {
        let a = fingerprint("SELECT name FROM users -- trailing comment\nWHERE id = 7");
        let b = fingerprint("SELECT /* block */ name\n\tFROM users WHERE id = 9");

        assert_eq!(a.hash, b.hash);
        assert_eq!(a.normalized_text, "SELECT name FROM users WHERE id = #");
    }

    #[test]
    fn test_string_literals_collapse() {
        let a = fingerprint("SELECT * FROM T WHERE name = 'alice'");
        let b = fingerprint("SELECT * FROM T WHERE name = 'bob with ''quote'''");

        assert_eq!(a.hash, b.hash);
        assert_eq!(a.normalized_text, "SELECT * FROM T WHERE name = '#'");
    }

    #[test]
    fn test_typed_string_sentinels() {
        let dt = fingerprint("SELECT 1 FROM T WHERE created > '2024-01-15 10:30:00'");
        assert!(dt.normalized_text.contains("'#DATE#'"));

        let guid =
            fingerprint("SELECT 1 FROM T WHERE id = 'a1b2c3d4-e5f6-7890-abcd-ef0123456789'");
        assert!(guid.normalized_text.contains("'#GUID#'"));

        // Different datetime values still collapse to one identity
        let dt2 = fingerprint("SELECT 1 FROM T WHERE created > '2025-06-30'");
        assert_eq!(dt.hash, dt2.hash);
    }

    #[test]
    fn test_identifier_case_preserved() {
        let id = fingerprint("select OrderId from dbo.Orders");
        assert_eq!(id.normalized_text, "SELECT OrderId FROM dbo.Orders");
    }

    #[test]
    fn test_numbers_inside_identifiers_survive() {
        let id = fingerprint("SELECT c1, c2 FROM t1 WHERE c1 > 100");
        assert_eq!(id.normalized_text, "SELECT c1, c2 FROM t1 WHERE c1 > #");
    }

    #[test]
    fn test_hex_and_float_literals() {
        let a = fingerprint("SELECT * FROM T WHERE mask = 0xFF AND ratio > 0.25");
        assert_eq!(a.normalized_text, "SELECT * FROM T WHERE mask = # AND ratio > #");
    }

    #[test]
    fn test_idempotent() {
        let once = normalize("SELECT * FROM T WHERE id = 12 AND d = '2024-01-01' AND s = 'x'");
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sample_text_truncation() {
        let long_sql = format!("SELECT '{}'", "x".repeat(8000));
        let id = fingerprint(&long_sql);
        assert!(id.sample_text.len() <= MAX_SAMPLE_BYTES + TRUNCATION_MARKER.len());
        assert!(id.sample_text.ends_with(TRUNCATION_MARKER));

        let short = fingerprint("SELECT 1");
        assert_eq!(short.sample_text, "SELECT 1");
    }

    #[test]
    fn test_hash_length() {
        let id = fingerprint("SELECT 1");
        assert_eq!(id.hash.len(), 32); // 16 bytes hex-encoded
        assert!(id.hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
