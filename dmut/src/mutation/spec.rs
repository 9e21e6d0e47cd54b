use super::{MutationBuilder, MutationId};
use crate::errors::{DmutError, ErrorKind};
use serde::{Deserialize, Serialize};

/// Whether a statement entry applies or reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Up,
    Down,
}

/// One statement of a mutation specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementEntry {
    pub kind: EntryKind,
    pub contents: String,
}

impl StatementEntry {
    pub fn up(contents: &str) -> Self {
        StatementEntry {
            kind: EntryKind::Up,
            contents: contents.to_string(),
        }
    }

    pub fn down(contents: &str) -> Self {
        StatementEntry {
            kind: EntryKind::Down,
            contents: contents.to_string(),
        }
    }
}

/// Structured description of a mutation, as produced by a mutation file parser.
///
/// Parents are referenced by identifier and resolved when the specification is added
/// to a [`MutationGraph`](crate::graph::MutationGraph).
///
/// Entries are interpreted in order:
/// - a `down` entry is paired with the `up` entry that follows it,
/// - a lone `comment on ...` `up` entry is documentation and has no undo,
/// - any other lone `up` entry is auto-reversed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationSpec {
    pub identifier: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub search_path: Vec<String>,
    #[serde(default)]
    pub entries: Vec<StatementEntry>,
    #[serde(default)]
    pub lock: Option<String>,
}

impl MutationSpec {
    pub fn new(identifier: &str) -> Self {
        MutationSpec {
            identifier: identifier.to_string(),
            ..Default::default()
        }
    }

    /// Builds the draft for this specification with already resolved parents.
    pub(crate) fn to_builder(&self, parents: Vec<MutationId>) -> MutationBuilder {
        let mut builder = MutationBuilder::new(&self.identifier)
            .depends(parents)
            .search_path(self.search_path.iter().map(String::as_str));
        if let Some(lock) = &self.lock {
            builder = builder.lock(lock);
        }

        let mut pending_down: Option<&str> = None;
        for entry in &self.entries {
            match (entry.kind, pending_down.take()) {
                (EntryKind::Down, None) => pending_down = Some(&entry.contents),
                (EntryKind::Down, Some(_)) => {
                    return builder.fail(self.unpaired_down());
                }
                (EntryKind::Up, Some(down)) => {
                    builder = builder.down(down).up(&entry.contents);
                }
                (EntryKind::Up, None) if is_comment(&entry.contents) => {
                    builder = builder.comment(&entry.contents);
                }
                (EntryKind::Up, None) => builder = builder.auto(&entry.contents),
            }
        }

        if pending_down.is_some() {
            return builder.fail(self.unpaired_down());
        }
        builder
    }

    fn unpaired_down(&self) -> DmutError {
        DmutError::new(
            &format!(
                "A down statement of mutation '{}' is not followed by its up statement",
                self.identifier
            ),
            ErrorKind::InvalidOperation,
        )
    }
}

pub(crate) fn is_comment(statement: &str) -> bool {
    let mut words = statement.split_whitespace();
    matches!(
        (words.next(), words.next()),
        (Some(first), Some(second))
            if first.eq_ignore_ascii_case("comment") && second.eq_ignore_ascii_case("on")
    )
}
