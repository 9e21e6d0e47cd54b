use super::hash::content_hash;
use super::spec::is_comment;
use super::{Mutation, MutationId};
use crate::errors::{DmutError, DmutResult, ErrorKind};
use crate::reversal::{ReversalEngine, AUTO_MARKER};
use itertools::Itertools;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Auto(String),
    Manual { up: String, down: String },
    Comment(String),
}

/// Draft of a mutation, sealed into a [`Mutation`] when added to a graph.
///
/// Statements are recorded in declaration order and resolved when the draft is
/// sealed: auto statements are reversed with the graph's [`ReversalEngine`], the
/// search path is wrapped around the statements and the hash is computed. A sealed
/// mutation can no longer change, so its hash is computed exactly once.
///
/// Like the other builders of this crate, the first error raised while building is
/// kept and returned when the draft is added to the graph.
///
/// # Examples
///
/// ```rust,ignore
/// let users = graph.add(
///     MutationBuilder::new("users")
///         .auto("create table app.users (id serial primary key)")
///         .down("delete from app.users where id = 0")
///         .up("insert into app.users values (0)")
///         .comment("on table app.users is 'Registered users'"),
/// )?;
/// ```
#[derive(Debug, Clone)]
pub struct MutationBuilder {
    identifier: String,
    entries: Vec<Entry>,
    parents: Vec<MutationId>,
    search_path: Vec<String>,
    hash_lock: Option<String>,
    error: Option<DmutError>,
}

impl MutationBuilder {
    pub fn new(identifier: &str) -> Self {
        MutationBuilder {
            identifier: identifier.to_string(),
            entries: Vec::new(),
            parents: Vec::new(),
            search_path: Vec::new(),
            hash_lock: None,
            error: None,
        }
    }

    /// Creates a new draft with the statements of `self` and an explicit parent list.
    ///
    /// The derived draft is not locked, whatever the lock of `self`.
    pub fn derive<I>(&self, identifier: &str, parents: I) -> Self
    where
        I: IntoIterator<Item = MutationId>,
    {
        MutationBuilder {
            identifier: identifier.to_string(),
            entries: self.entries.clone(),
            parents: Vec::new(),
            search_path: self.search_path.clone(),
            hash_lock: None,
            error: self.error.clone(),
        }
        .depends(parents)
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Registers parents. Duplicates are ignored, declaration order is kept.
    pub fn depends<I>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = MutationId>,
    {
        for parent in parents {
            if !self.parents.contains(&parent) {
                self.parents.push(parent);
            }
        }
        self
    }

    /// Pins the hash of the mutation to `prefix`.
    pub fn lock(mut self, prefix: &str) -> Self {
        if prefix.is_empty() {
            let message = format!("Lock prefix of mutation '{}' is empty", self.identifier);
            return self.fail(DmutError::new(&message, ErrorKind::InvalidOperation));
        }
        if let Some(existing) = &self.hash_lock {
            let message = format!(
                "Mutation '{}' is already locked on {}",
                self.identifier, existing
            );
            return self.fail(DmutError::new(&message, ErrorKind::LockViolation));
        }
        self.hash_lock = Some(prefix.to_string());
        self
    }

    /// Sets the schema search path used while applying and reverting.
    pub fn search_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.search_path = path.into_iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// Adds a statement whose undo is derived by the reversal engine.
    pub fn auto(mut self, statement: &str) -> Self {
        self.entries.push(Entry::Auto(statement.trim().to_string()));
        self
    }

    /// Adds an explicit undo statement, to be completed by [`DownBuilder::up`].
    pub fn down(self, statement: &str) -> DownBuilder {
        DownBuilder {
            builder: self,
            down: statement.trim().to_string(),
        }
    }

    /// Adds a `COMMENT` statement. `text` may omit the leading `comment` keyword.
    pub fn comment(mut self, text: &str) -> Self {
        let text = text.trim();
        let statement = if is_comment(text) {
            text.to_string()
        } else {
            format!("comment {}", text)
        };
        self.entries.push(Entry::Comment(statement));
        self
    }

    pub(crate) fn fail(mut self, error: DmutError) -> Self {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self
    }

    /// Resolves the draft against the already sealed mutations of a graph.
    pub(crate) fn seal(
        self,
        id: MutationId,
        engine: &ReversalEngine,
        sealed: &[Mutation],
    ) -> DmutResult<Mutation> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut parent_hashes = Vec::with_capacity(self.parents.len());
        for parent in &self.parents {
            let parent = sealed.get(parent.index()).ok_or_else(|| {
                DmutError::new(
                    &format!(
                        "Mutation '{}' depends on an unknown mutation #{}",
                        self.identifier,
                        parent.index()
                    ),
                    ErrorKind::UnresolvedDependency,
                )
            })?;
            if self.hash_lock.is_some() && !parent.is_locked() {
                log::error!(
                    "Locked mutation {} depends on unlocked mutation {}",
                    self.identifier,
                    parent.identifier()
                );
                return Err(DmutError::new(
                    &format!(
                        "Locked mutation '{}' cannot depend on unlocked mutation '{}'",
                        self.identifier,
                        parent.identifier()
                    ),
                    ErrorKind::LockViolation,
                ));
            }
            parent_hashes.push(parent.hash().to_string());
        }

        let mut statements = Vec::new();
        let mut undo = Vec::new();
        for entry in self.entries {
            match entry {
                Entry::Auto(statement) => {
                    let inverse = engine.reverse(&statement).ok_or_else(|| {
                        DmutError::new(
                            &format!(
                                "Unrecognized statement for auto() in mutation '{}': {}",
                                self.identifier, statement
                            ),
                            ErrorKind::UnrecognizedStatement,
                        )
                    })?;
                    undo.insert(0, format!("{} {}", inverse, AUTO_MARKER));
                    statements.push(statement);
                }
                Entry::Manual { up, down } => {
                    undo.insert(0, down);
                    statements.push(up);
                }
                Entry::Comment(statement) => statements.push(statement),
            }
        }

        if !self.search_path.is_empty() {
            let set = format!("set search_path to {}", self.search_path.iter().join(", "));
            for list in [&mut statements, &mut undo] {
                list.insert(0, set.clone());
                list.push("reset search_path".to_string());
            }
        }

        let hash = content_hash(
            statements.iter().map(String::as_str),
            undo.iter().map(String::as_str),
            parent_hashes.iter().map(String::as_str),
        );

        Ok(Mutation {
            id,
            identifier: self.identifier,
            statements,
            undo,
            parents: self.parents,
            children: Vec::new(),
            hash,
            hash_lock: self.hash_lock,
        })
    }
}

/// Pending explicit undo statement, waiting for the statement it reverts.
#[derive(Debug, Clone)]
pub struct DownBuilder {
    builder: MutationBuilder,
    down: String,
}

impl DownBuilder {
    /// Adds the statement reverted by the pending undo statement.
    pub fn up(self, statement: &str) -> MutationBuilder {
        let mut builder = self.builder;
        builder.entries.push(Entry::Manual {
            up: statement.trim().to_string(),
            down: self.down,
        });
        builder
    }
}
