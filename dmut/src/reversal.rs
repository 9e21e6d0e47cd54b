//! Pattern-based derivation of undo statements.
//!
//! A [`ReversalEngine`] holds an ordered list of [`ReversalRule`]s. Each rule pairs a
//! case-insensitive pattern with a function building the inverse statement from the
//! captures. Rules are tried top to bottom and the first match wins.
//!
//! Identifiers are bare words, `"double quoted"`, `` `backtick quoted` `` or
//! `[bracketed]` tokens, optionally dot-qualified.

use crate::errors::{DmutError, DmutResult, ErrorKind};
use itertools::Itertools;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Suffix appended to every derived undo statement.
pub const AUTO_MARKER: &str = "-- @auto";

const IDENT_PART: &str = r#"(?:\w+|"[^"]+"|`[^`]+`|\[[^\]]+\])"#;

static IDENT_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(IDENT_PART).expect("identifier pattern is valid"));

fn ident() -> String {
    format!(r"{p}(?:\.{p})*", p = IDENT_PART)
}

/// Splits a possibly qualified identifier into its parts, keeping quotes.
pub(crate) fn split_qualified(identifier: &str) -> Vec<&str> {
    IDENT_PART_RE
        .find_iter(identifier)
        .map(|m| m.as_str())
        .collect()
}

fn lower_words(text: &str) -> String {
    text.split_whitespace().join(" ").to_lowercase()
}

static ARGUMENT_DEFAULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(?:\s+default\b|\s*=).*$").expect("argument default pattern is valid")
});

/// Arguments of a function signature with their defaults dropped.
///
/// `rest` starts right after the opening parenthesis. Scanning stops at the matching
/// closing parenthesis, so argument types may carry their own parentheses.
fn signature_arguments(rest: &str) -> String {
    let mut arguments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for c in rest.chars() {
        if let Some(open) = quote {
            current.push(c);
            if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' if depth == 0 => break,
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => arguments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    arguments.push(current);
    arguments
        .iter()
        .map(|argument| ARGUMENT_DEFAULT.replace(argument, "").split_whitespace().join(" "))
        .filter(|argument| !argument.is_empty())
        .join(", ")
}

/// One (pattern, inverse-builder) pair.
#[derive(Clone)]
pub struct ReversalRule {
    name: String,
    pattern: Regex,
    inverse: fn(&Captures) -> String,
}

impl ReversalRule {
    /// Creates a rule. `pattern` is compiled case-insensitive with `.` matching newlines.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the pattern does not compile.
    pub fn new(name: &str, pattern: &str, inverse: fn(&Captures) -> String) -> DmutResult<Self> {
        let pattern = Regex::new(&format!("(?is){}", pattern)).map_err(|e| {
            DmutError::new(
                &format!("Invalid pattern for reversal rule '{}': {}", name, e),
                ErrorKind::InvalidOperation,
            )
        })?;
        Ok(ReversalRule {
            name: name.to_string(),
            pattern,
            inverse,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the inverse of `statement` if this rule recognizes it.
    pub fn apply(&self, statement: &str) -> Option<String> {
        self.pattern
            .captures(statement)
            .map(|caps| (self.inverse)(&caps))
    }
}

impl std::fmt::Debug for ReversalRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReversalRule")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

/// Ordered set of reversal rules, evaluated first-match-wins.
#[derive(Debug, Clone)]
pub struct ReversalEngine {
    rules: Vec<ReversalRule>,
}

impl Default for ReversalEngine {
    fn default() -> Self {
        Self::postgres()
    }
}

impl ReversalEngine {
    /// Creates an engine from an explicit rule list.
    pub fn new(rules: Vec<ReversalRule>) -> Self {
        ReversalEngine { rules }
    }

    /// Creates an engine with the rules for the PostgreSQL DDL forms dmut understands.
    pub fn postgres() -> Self {
        let id = ident();
        let rules = vec![
            builtin(
                "create-object",
                &format!(
                    r"^\s*create\s+(?:or\s+replace\s+)?(table|role|extension|schema|type|view|materialized\s+view)\s+(?:if\s+not\s+exists\s+)?({id})"
                ),
                |caps| format!("drop {} {}", lower_words(&caps[1]), &caps[2]),
            ),
            builtin(
                "create-index",
                &format!(
                    r"^\s*create\s+(?:unique\s+)?index\s+(?:concurrently\s+)?(?:if\s+not\s+exists\s+)?({id})\s+on\s+(?:only\s+)?({id})"
                ),
                |caps| {
                    let index = &caps[1];
                    let table = split_qualified(&caps[2]);
                    if split_qualified(index).len() == 1 && table.len() > 1 {
                        let schema = table[..table.len() - 1].join(".");
                        format!("drop index {}.{}", schema, index)
                    } else {
                        format!("drop index {}", index)
                    }
                },
            ),
            builtin(
                "grant",
                r"^\s*grant\s+(.+?)\s+on\s+(.+?)\s+to\s+(.+?)(?:\s+with\s+grant\s+option)?\s*;?\s*$",
                |caps| {
                    format!(
                        "revoke {} on {} from {}",
                        caps[1].trim(),
                        caps[2].trim(),
                        caps[3].trim()
                    )
                },
            ),
            builtin(
                "create-function",
                &format!(r"^\s*create\s+(?:or\s+replace\s+)?function\s+({id})\s*\((.*\))"),
                |caps| format!("drop function {}({})", &caps[1], signature_arguments(&caps[2])),
            ),
            builtin(
                "create-policy-or-trigger",
                &format!(
                    r"^\s*create\s+(?:or\s+replace\s+)?(policy|trigger)\s+({id})\s.*?\bon\s+({id})"
                ),
                |caps| {
                    format!(
                        "drop {} {} on {}",
                        caps[1].to_lowercase(),
                        &caps[2],
                        &caps[3]
                    )
                },
            ),
            builtin(
                "enable-row-level-security",
                &format!(
                    r"^\s*alter\s+table\s+(?:if\s+exists\s+)?(?:only\s+)?({id})\s+enable\s+row\s+level\s+security"
                ),
                |caps| format!("alter table {} disable row level security", &caps[1]),
            ),
        ];
        ReversalEngine { rules }
    }

    /// Appends a rule after the existing ones.
    pub fn push(&mut self, rule: ReversalRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[ReversalRule] {
        &self.rules
    }

    /// Derives the inverse of `statement` with the first matching rule.
    pub fn reverse(&self, statement: &str) -> Option<String> {
        let found = self
            .rules
            .iter()
            .find_map(|rule| rule.apply(statement).map(|inverse| (rule.name(), inverse)));
        if let Some((name, inverse)) = &found {
            log::trace!("Rule {} reversed '{}' into '{}'", name, statement, inverse);
        }
        found.map(|(_, inverse)| inverse)
    }

    /// Names of every rule that recognizes `statement`, in evaluation order.
    pub fn matching_rules(&self, statement: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|rule| rule.pattern.is_match(statement))
            .map(|rule| rule.name())
            .collect()
    }
}

fn builtin(name: &str, pattern: &str, inverse: fn(&Captures) -> String) -> ReversalRule {
    ReversalRule::new(name, pattern, inverse).expect("built-in reversal pattern is valid")
}
