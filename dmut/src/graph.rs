//! The registry of mutations and the dependency graph between them.
//!
//! Mutations live in an arena and refer to each other by [`MutationId`]. A mutation
//! can only name parents that were added before it, so the graph has no cycles and
//! declaration order is already a valid topological order.

use crate::errors::{DmutError, DmutResult, ErrorKind};
use crate::ledger;
use crate::mutation::{Mutation, MutationBuilder, MutationId, MutationSpec};
use crate::reversal::ReversalEngine;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Index;

/// The bootstrap mutation is always the first one.
const BOOTSTRAP: MutationId = MutationId(0);

/// Arena of sealed mutations, in declaration order.
///
/// # Examples
///
/// ```rust,ignore
/// let mut graph = MutationGraph::postgres()?;
/// let schema = graph.add(MutationBuilder::new("schema").auto("create schema app"))?;
/// let users = graph.add(
///     MutationBuilder::new("users")
///         .depends([schema])
///         .auto("create table app.users (id int)"),
/// )?;
/// let target = graph.target([users]);
/// ```
#[derive(Debug, Clone)]
pub struct MutationGraph {
    mutations: Vec<Mutation>,
    identifiers: HashMap<String, MutationId>,
    hashes: HashMap<String, MutationId>,
    engine: ReversalEngine,
}

impl MutationGraph {
    /// Creates a graph whose first mutation is `bootstrap`.
    pub fn new(bootstrap: MutationBuilder, engine: ReversalEngine) -> DmutResult<Self> {
        let mut graph = MutationGraph {
            mutations: Vec::new(),
            identifiers: HashMap::new(),
            hashes: HashMap::new(),
            engine,
        };
        graph.add(bootstrap)?;
        Ok(graph)
    }

    /// Creates a graph with the ledger bootstrap mutation and the PostgreSQL reversal rules.
    pub fn postgres() -> DmutResult<Self> {
        MutationGraph::new(ledger::bootstrap(), ReversalEngine::postgres())
    }

    /// Builds a graph from parsed specifications, in order.
    pub fn from_specs(
        specs: &[MutationSpec],
        bootstrap: MutationBuilder,
        engine: ReversalEngine,
    ) -> DmutResult<Self> {
        let mut graph = MutationGraph::new(bootstrap, engine)?;
        for spec in specs {
            graph.add_spec(spec)?;
        }
        Ok(graph)
    }

    /// Seals `builder` and appends it.
    ///
    /// # Errors
    ///
    /// - `UnresolvedDependency` if a parent is not part of this graph
    /// - `LockViolation` if a locked mutation has an unlocked parent
    /// - `UnrecognizedStatement` if an auto statement cannot be reversed
    /// - `InvalidOperation` if a mutation with the same hash already exists
    pub fn add(&mut self, builder: MutationBuilder) -> DmutResult<MutationId> {
        let id = MutationId::new(self.mutations.len());
        let mutation = builder.seal(id, &self.engine, &self.mutations)?;

        if let Some(existing) = self.hashes.get(mutation.hash()) {
            return Err(DmutError::new(
                &format!(
                    "Mutation '{}' is identical to mutation '{}' (hash {})",
                    mutation.identifier(),
                    self[*existing].identifier(),
                    mutation.hash()
                ),
                ErrorKind::InvalidOperation,
            ));
        }

        for parent in mutation.parents().to_vec() {
            self.mutations[parent.index()].add_child(id);
        }
        log::debug!(
            "Registered mutation {} as {}",
            mutation.identifier(),
            &mutation.hash()[..8]
        );
        self.identifiers.insert(mutation.identifier().to_string(), id);
        self.hashes.insert(mutation.hash().to_string(), id);
        self.mutations.push(mutation);
        Ok(id)
    }

    /// Resolves the parent identifiers of `spec` and appends it.
    ///
    /// # Errors
    ///
    /// `UnresolvedDependency` if a parent identifier was not declared before, plus
    /// every error of [`MutationGraph::add`].
    pub fn add_spec(&mut self, spec: &MutationSpec) -> DmutResult<MutationId> {
        let mut parents = Vec::with_capacity(spec.parents.len());
        for parent in &spec.parents {
            let id = self.lookup(parent).ok_or_else(|| {
                log::error!("Mutation {} depends on unknown {}", spec.identifier, parent);
                DmutError::new(
                    &format!(
                        "Mutation '{}' depends on '{}', which is not declared before it",
                        spec.identifier, parent
                    ),
                    ErrorKind::UnresolvedDependency,
                )
            })?;
            parents.push(id);
        }
        self.add(spec.to_builder(parents))
    }

    /// Latest mutation declared with `identifier`.
    pub fn lookup(&self, identifier: &str) -> Option<MutationId> {
        self.identifiers.get(identifier).copied()
    }

    pub fn get(&self, id: MutationId) -> Option<&Mutation> {
        self.mutations.get(id.index())
    }

    pub fn by_hash(&self, hash: &str) -> Option<&Mutation> {
        self.hashes.get(hash).map(|id| &self[*id])
    }

    /// Every mutation, in declaration order.
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn bootstrap(&self) -> &Mutation {
        &self[BOOTSTRAP]
    }

    pub fn engine(&self) -> &ReversalEngine {
        &self.engine
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Expands `ids` to their parent closure, plus the bootstrap mutation.
    pub fn target<I>(&self, ids: I) -> TargetSet
    where
        I: IntoIterator<Item = MutationId>,
    {
        let mut included = vec![false; self.mutations.len()];
        let mut stack: Vec<MutationId> = ids
            .into_iter()
            .filter(|id| id.index() < self.mutations.len())
            .collect();
        stack.push(BOOTSTRAP);
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut included[id.index()], true) {
                continue;
            }
            stack.extend(self[id].parents().iter().copied());
        }
        TargetSet::from_flags(&included)
    }

    /// Every mutation of the graph.
    pub fn all(&self) -> TargetSet {
        TargetSet {
            ids: (0..self.mutations.len()).map(MutationId::new).collect(),
        }
    }

    /// Every mutation except those with the given hashes and all their descendants.
    ///
    /// The bootstrap mutation is always kept, even when its own hash is given, since
    /// removing it would drop the ledger. Asking for it only logs a warning.
    pub fn without(&self, hashes: &[&str]) -> TargetSet {
        self.all().without(self, hashes)
    }

    /// Marks the given mutations and every mutation transitively depending on them.
    ///
    /// The bootstrap mutation is never marked: it holds the ledger itself.
    fn cascade(&self, seeds: impl IntoIterator<Item = MutationId>) -> Vec<bool> {
        let mut excluded = vec![false; self.mutations.len()];
        let mut queue: VecDeque<MutationId> = VecDeque::new();
        for id in seeds {
            if id == BOOTSTRAP {
                log::warn!(
                    "Mutation {} holds the ledger and cannot be removed",
                    self[id].identifier()
                );
            } else {
                queue.push_back(id);
            }
        }
        while let Some(id) = queue.pop_front() {
            if excluded[id.index()] {
                continue;
            }
            excluded[id.index()] = true;
            queue.extend(self[id].children().iter().copied());
        }
        excluded
    }
}

impl Index<MutationId> for MutationGraph {
    type Output = Mutation;

    fn index(&self, id: MutationId) -> &Self::Output {
        &self.mutations[id.index()]
    }
}

/// A set of mutations of one graph, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    ids: Vec<MutationId>,
}

impl TargetSet {
    fn from_flags(flags: &[bool]) -> Self {
        TargetSet {
            ids: flags
                .iter()
                .enumerate()
                .filter(|(_, included)| **included)
                .map(|(index, _)| MutationId::new(index))
                .collect(),
        }
    }

    pub fn ids(&self) -> &[MutationId] {
        &self.ids
    }

    pub fn contains(&self, id: MutationId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter<'g>(&'g self, graph: &'g MutationGraph) -> impl Iterator<Item = &'g Mutation> + 'g {
        self.ids.iter().map(move |id| &graph[*id])
    }

    /// Hashes of the members, in declaration order.
    pub fn hashes<'g>(&'g self, graph: &'g MutationGraph) -> impl Iterator<Item = &'g str> + 'g {
        self.iter(graph).map(Mutation::hash)
    }

    /// Removes the mutations with the given hashes and every member depending on them,
    /// keeping the relative order of what remains. The bootstrap mutation is never
    /// removed.
    pub fn without(&self, graph: &MutationGraph, hashes: &[&str]) -> TargetSet {
        let wanted: HashSet<&str> = hashes.iter().copied().collect();
        let seeds = self
            .ids
            .iter()
            .copied()
            .filter(|id| wanted.contains(graph[*id].hash()));
        let excluded = graph.cascade(seeds);
        TargetSet {
            ids: self
                .ids
                .iter()
                .copied()
                .filter(|id| !excluded[id.index()])
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_bootstrap() -> MutationBuilder {
        MutationBuilder::new("bootstrap").auto("create schema boot")
    }

    fn graph() -> MutationGraph {
        MutationGraph::new(empty_bootstrap(), ReversalEngine::postgres()).unwrap()
    }

    fn table(identifier: &str, parents: &[MutationId]) -> MutationBuilder {
        MutationBuilder::new(identifier)
            .depends(parents.iter().copied())
            .auto(&format!("create table {} (id int)", identifier))
    }

    fn identifiers(graph: &MutationGraph, set: &TargetSet) -> Vec<String> {
        set.iter(graph).map(|m| m.identifier().to_string()).collect()
    }

    #[test]
    fn children_are_derived_from_parents() {
        let mut graph = graph();
        let a = graph.add(table("a", &[])).unwrap();
        let b = graph.add(table("b", &[a])).unwrap();
        let c = graph.add(table("c", &[a, b])).unwrap();
        assert_eq!(graph[a].children(), &[b, c]);
        assert_eq!(graph[b].children(), &[c]);
        assert_eq!(graph[c].parents(), &[a, b]);
        assert!(graph[c].children().is_empty());
    }

    #[test]
    fn parent_hashes_are_part_of_identity() {
        let mut graph = graph();
        let a = graph.add(table("a", &[])).unwrap();
        let b = graph.add(table("b", &[])).unwrap();
        let child_of_a = graph.add(table("child", &[a])).unwrap();
        let child_of_b = graph.add(table("child", &[b])).unwrap();
        assert_eq!(graph[child_of_a].statements(), graph[child_of_b].statements());
        assert_ne!(graph[child_of_a].hash(), graph[child_of_b].hash());
    }

    #[test]
    fn identical_mutations_are_rejected() {
        let mut graph = graph();
        graph.add(table("a", &[])).unwrap();
        let err = graph.add(table("a", &[])).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn unknown_parent_id_is_unresolved() {
        let mut graph = graph();
        let err = graph.add(table("a", &[MutationId::new(42)])).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnresolvedDependency);
    }

    #[test]
    fn spec_parents_must_be_declared_first() {
        let mut graph = graph();
        let mut spec = MutationSpec::new("child");
        spec.parents.push("parent".to_string());
        let err = graph.add_spec(&spec).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnresolvedDependency);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn lookup_returns_latest_declaration() {
        let mut graph = graph();
        graph.add(table("a", &[])).unwrap();
        let second = graph
            .add(MutationBuilder::new("a").auto("create table a2 (id int)"))
            .unwrap();
        assert_eq!(graph.lookup("a"), Some(second));
        assert_eq!(graph.lookup("missing"), None);
    }

    #[test]
    fn target_expands_parents_and_bootstrap() {
        let mut graph = graph();
        let a = graph.add(table("a", &[])).unwrap();
        let b = graph.add(table("b", &[a])).unwrap();
        let _unrelated = graph.add(table("u", &[])).unwrap();
        let c = graph.add(table("c", &[b])).unwrap();
        let target = graph.target([c]);
        assert_eq!(identifiers(&graph, &target), vec!["bootstrap", "a", "b", "c"]);
        assert!(target.contains(a));
    }

    #[test]
    fn without_removes_transitive_dependents() {
        let mut graph = graph();
        let a = graph.add(table("a", &[])).unwrap();
        let b = graph.add(table("b", &[a])).unwrap();
        let _c = graph.add(table("c", &[b])).unwrap();
        let _d = graph.add(table("d", &[])).unwrap();
        let _e = graph.add(table("e", &[b, a])).unwrap();

        let reduced = graph.without(&[graph[a].hash()]);
        assert_eq!(identifiers(&graph, &reduced), vec!["bootstrap", "d"]);

        let reduced = graph.without(&[graph[b].hash()]);
        assert_eq!(identifiers(&graph, &reduced), vec!["bootstrap", "a", "d"]);
    }

    #[test]
    fn without_keeps_bootstrap() {
        let mut graph = graph();
        let a = graph.add(table("a", &[])).unwrap();
        let bootstrap_hash = graph.bootstrap().hash().to_string();
        let reduced = graph.without(&[&bootstrap_hash]);
        assert_eq!(reduced.len(), 2);

        let reduced = graph.without(&[&bootstrap_hash, graph[a].hash()]);
        assert_eq!(identifiers(&graph, &reduced), vec!["bootstrap"]);
    }

    #[test]
    fn without_on_subset_ignores_non_members() {
        let mut graph = graph();
        let a = graph.add(table("a", &[])).unwrap();
        let b = graph.add(table("b", &[a])).unwrap();
        let d = graph.add(table("d", &[])).unwrap();
        let subset = graph.target([d]);
        let reduced = subset.without(&graph, &[graph[a].hash()]);
        assert_eq!(reduced, subset);
        assert!(!reduced.contains(b));
    }

    #[test]
    fn unknown_hash_removes_nothing() {
        let mut graph = graph();
        graph.add(table("a", &[])).unwrap();
        assert_eq!(graph.without(&["nope"]), graph.all());
    }
}
