//! The ordered record of what a reconciliation run did.

use std::fmt::{Display, Formatter};

/// What happened to one mutation during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Already applied and still wanted
    Kept,
    /// Already applied, still wanted, and pinned by a hash lock
    Locked,
    /// Applied earlier but no longer wanted, so its stored undo was run
    Reverted,
    /// Newly applied
    Applied,
}

impl ChangeKind {
    fn marker(&self) -> &'static str {
        match self {
            ChangeKind::Kept => "≋",
            ChangeKind::Locked => "♖",
            ChangeKind::Reverted => "«",
            ChangeKind::Applied => "»",
        }
    }
}

/// A single line of the change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLine {
    pub kind: ChangeKind,
    pub hash: String,
    pub identifier: String,
    /// Identifiers of the parents, only filled for applied mutations.
    pub parents: Vec<String>,
}

impl Display for ChangeLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = if self.identifier.is_empty() {
            &self.hash
        } else {
            &self.identifier
        };
        write!(
            f,
            "  {} {} {}",
            self.kind.marker(),
            &self.hash[..self.hash.len().min(8)],
            label
        )?;
        if !self.parents.is_empty() {
            write!(f, " :: {}", self.parents.join(" | "))?;
        }
        Ok(())
    }
}

/// Ordered lines produced by a run, handed to the presentation layer.
///
/// Kept and locked lines come first, sorted by identifier, followed by reverted
/// and applied lines in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeLog {
    lines: Vec<ChangeLine>,
}

impl ChangeLog {
    pub fn new() -> Self {
        ChangeLog::default()
    }

    pub(crate) fn push(&mut self, line: ChangeLine) {
        self.lines.push(line);
    }

    pub(crate) fn extend_kept(&mut self, mut kept: Vec<ChangeLine>) {
        kept.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        self.lines.extend(kept);
    }

    pub fn lines(&self) -> &[ChangeLine] {
        &self.lines
    }

    /// Lines of the given kind, in log order.
    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &ChangeLine> {
        self.lines.iter().filter(move |line| line.kind == kind)
    }

    /// Whether anything was applied or reverted.
    pub fn has_changes(&self) -> bool {
        self.lines
            .iter()
            .any(|line| matches!(line.kind, ChangeKind::Applied | ChangeKind::Reverted))
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Display for ChangeLog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}
