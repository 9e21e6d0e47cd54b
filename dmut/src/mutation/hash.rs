use regex::{Captures, Regex};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--[^\n]*").expect("line comment pattern is valid"));
// nested block comments are not handled
static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment pattern is valid"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Reduces a statement to the part that identifies it.
///
/// Single-line comments are removed unless their text starts with `!`, block comments
/// are removed, and every whitespace run becomes a single space.
pub fn normalize(statement: &str) -> String {
    let without_lines = LINE_COMMENT.replace_all(statement, |caps: &Captures| {
        let comment = &caps[0];
        if comment[2..].trim_start().starts_with('!') {
            comment.to_string()
        } else {
            String::new()
        }
    });
    let without_blocks = BLOCK_COMMENT.replace_all(&without_lines, "");
    WHITESPACE.replace_all(&without_blocks, " ").into_owned()
}

/// Computes the content hash of a mutation.
///
/// The digest covers every up statement, then every undo statement, each normalized,
/// then the hash of every parent in declaration order.
pub fn content_hash<'a, S, U, P>(statements: S, undo: U, parent_hashes: P) -> String
where
    S: IntoIterator<Item = &'a str>,
    U: IntoIterator<Item = &'a str>,
    P: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for statement in statements.into_iter().chain(undo) {
        hasher.update(normalize(statement).as_bytes());
    }
    for parent in parent_hashes {
        hasher.update(parent.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
