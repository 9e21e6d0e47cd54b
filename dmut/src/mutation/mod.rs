//! Content-addressed schema mutations.
//!
//! A [`Mutation`] is one atomic, reversible schema change: an ordered list of up
//! statements, the undo statements reverting them, and links to the mutations it
//! depends on. Its identity is the hash of its normalized statements and of its
//! parents' hashes, so the same statements with a different ancestry are a different
//! mutation.
//!
//! Mutations are written as [`MutationBuilder`] drafts (or described by a
//! [`MutationSpec`]) and sealed by [`MutationGraph::add`](crate::graph::MutationGraph::add).

mod builder;
mod hash;
mod spec;

pub use builder::{DownBuilder, MutationBuilder};
pub use hash::{content_hash, normalize};
pub use spec::{EntryKind, MutationSpec, StatementEntry};

use crate::errors::{DmutError, DmutResult, ErrorKind};

/// Position of a mutation in its graph, which is also its declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(pub(crate) usize);

impl MutationId {
    pub(crate) fn new(index: usize) -> Self {
        MutationId(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// A sealed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub(crate) id: MutationId,
    pub(crate) identifier: String,
    pub(crate) statements: Vec<String>,
    pub(crate) undo: Vec<String>,
    pub(crate) parents: Vec<MutationId>,
    pub(crate) children: Vec<MutationId>,
    pub(crate) hash: String,
    pub(crate) hash_lock: Option<String>,
}

impl Mutation {
    pub fn id(&self) -> MutationId {
        self.id
    }

    /// Human readable label. Not unique.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Up statements, in execution order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Undo statements, in execution order.
    pub fn undo(&self) -> &[String] {
        &self.undo
    }

    pub fn parents(&self) -> &[MutationId] {
        &self.parents
    }

    pub fn children(&self) -> &[MutationId] {
        &self.children
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn hash_lock(&self) -> Option<&str> {
        self.hash_lock.as_deref()
    }

    pub fn is_locked(&self) -> bool {
        self.hash_lock.is_some()
    }

    /// Checks that a locked mutation still hashes to its pinned prefix.
    pub fn verify_lock(&self) -> DmutResult<()> {
        match &self.hash_lock {
            Some(lock) if !self.hash.starts_with(lock.as_str()) => {
                log::error!(
                    "Mutation {} is locked on {} but now hashes to {}",
                    self.identifier,
                    lock,
                    self.hash
                );
                Err(DmutError::new(
                    &format!(
                        "Mutation '{}' is locked on {} but has changed (current hash is {}), cannot proceed",
                        self.identifier, lock, self.hash
                    ),
                    ErrorKind::LockViolation,
                ))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn add_child(&mut self, child: MutationId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }
}
