//! Reconciliation of a target set of mutations against the ledger.
//!
//! A run reads the ledger, reverts the rows whose mutation is no longer wanted,
//! applies the wanted mutations that are missing, and proves with the self-test
//! harness that every live mutation can be removed and reapplied. All of it happens
//! in one transaction: the database ends up either fully reconciled or untouched.

mod self_test;

use crate::change_log::{ChangeKind, ChangeLine, ChangeLog};
use crate::config::RunnerConfig;
use crate::database::Database;
use crate::errors::{DmutError, DmutResult};
use crate::graph::{MutationGraph, TargetSet};
use crate::ledger::{order_rows, LedgerRow};
use crate::mutation::Mutation;
use std::collections::HashSet;

/// What a runner is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    /// Reconciling inside the run transaction
    Applying,
    /// Removing and reapplying mutations inside savepoints
    Testing,
}

/// Reconciles mutation graphs against one database.
///
/// # Examples
///
/// ```rust,ignore
/// let mut graph = MutationGraph::postgres()?;
/// let users = graph.add(MutationBuilder::new("users").auto("create table users (id int)"))?;
///
/// let mut runner = MutationRunner::new(PgDatabase::connect(url).await?);
/// let log = runner.mutate(&graph, &graph.target([users])).await?;
/// print!("{}", log);
/// ```
pub struct MutationRunner<D: Database> {
    database: D,
    config: RunnerConfig,
    state: RunnerState,
}

impl<D: Database> MutationRunner<D> {
    pub fn new(database: D) -> Self {
        Self::with_config(database, RunnerConfig::default())
    }

    pub fn with_config(database: D, config: RunnerConfig) -> Self {
        MutationRunner {
            database,
            config,
            state: RunnerState::Idle,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    pub fn database_mut(&mut self) -> &mut D {
        &mut self.database
    }

    pub fn into_inner(self) -> D {
        self.database
    }

    /// Brings the database to `target`, expanded to its parent closure and the
    /// bootstrap mutation.
    ///
    /// Returns the change log of the run. When nothing had to change, the
    /// transaction is rolled back and the log only holds kept and locked lines.
    ///
    /// # Errors
    ///
    /// - `LockViolation` if a locked mutation changed; the database is not touched
    /// - `StatementError` if a statement failed
    /// - `ReversibilityFailure` if the self-test found mutations that cannot be
    ///   removed and reapplied
    ///
    /// On error the transaction is rolled back and the partial change log is
    /// attached to the error.
    pub async fn mutate(
        &mut self,
        graph: &MutationGraph,
        target: &TargetSet,
    ) -> DmutResult<ChangeLog> {
        let target = graph.target(target.ids().iter().copied());
        for mutation in target.iter(graph) {
            mutation.verify_lock()?;
        }

        self.state = RunnerState::Applying;
        let mut log = ChangeLog::new();
        let result = self.run(graph, &target, &mut log).await;
        self.state = RunnerState::Idle;
        match result {
            Ok(()) => Ok(log),
            Err(error) => Err(error.with_change_log(log)),
        }
    }

    async fn run(
        &mut self,
        graph: &MutationGraph,
        target: &TargetSet,
        log: &mut ChangeLog,
    ) -> DmutResult<()> {
        let ledger = self.read_ledger().await?;
        self.database.begin().await?;

        match self.reconcile(graph, target, &ledger, log).await {
            Ok(true) => {
                self.database.commit().await?;
                log::info!(
                    "Committed {} reverted and {} applied mutations",
                    log.of_kind(ChangeKind::Reverted).count(),
                    log.of_kind(ChangeKind::Applied).count()
                );
                Ok(())
            }
            Ok(false) => {
                log::info!("Database is up to date");
                self.database.rollback().await
            }
            Err(error) => {
                if let Err(rollback_error) = self.database.rollback().await {
                    log::warn!("Rollback after a failed run failed too: {}", rollback_error);
                }
                Err(error)
            }
        }
    }

    /// Applies the diff and, when something changed, runs the self-test.
    ///
    /// Returns whether the transaction must be committed.
    async fn reconcile(
        &mut self,
        graph: &MutationGraph,
        target: &TargetSet,
        ledger: &[LedgerRow],
        log: &mut ChangeLog,
    ) -> DmutResult<bool> {
        if !self.apply_diff(graph, target, ledger, log).await? {
            return Ok(false);
        }
        if self.config.is_self_test() {
            self.self_test(graph, target).await?;
        }
        Ok(true)
    }

    /// Reads the ledger with every row after its parents. A missing ledger is empty.
    async fn read_ledger(&mut self) -> DmutResult<Vec<LedgerRow>> {
        if !self.database.ledger_exists().await? {
            log::debug!("No ledger yet, starting from an empty database");
            return Ok(Vec::new());
        }
        let rows = self.database.fetch_ledger().await?;
        Ok(order_rows(rows))
    }

    /// Reverts the ledger rows missing from `target`, then applies the members of
    /// `target` missing from the ledger.
    ///
    /// Returns whether anything was reverted or applied.
    async fn apply_diff(
        &mut self,
        graph: &MutationGraph,
        target: &TargetSet,
        ledger: &[LedgerRow],
        log: &mut ChangeLog,
    ) -> DmutResult<bool> {
        let wanted: HashSet<&str> = target.hashes(graph).collect();
        let (staying, gone): (Vec<&LedgerRow>, Vec<&LedgerRow>) = ledger
            .iter()
            .partition(|row| wanted.contains(row.hash.as_str()));
        let present: HashSet<&str> = staying.iter().map(|row| row.hash.as_str()).collect();

        let kept = staying
            .iter()
            .filter_map(|row| graph.by_hash(&row.hash))
            .map(|mutation| ChangeLine {
                kind: if mutation.is_locked() {
                    ChangeKind::Locked
                } else {
                    ChangeKind::Kept
                },
                hash: mutation.hash().to_string(),
                identifier: mutation.identifier().to_string(),
                parents: Vec::new(),
            })
            .collect();
        log.extend_kept(kept);

        for row in gone.iter().rev() {
            log.push(ChangeLine {
                kind: ChangeKind::Reverted,
                hash: row.hash.clone(),
                identifier: row.identifier.clone(),
                parents: Vec::new(),
            });
            self.revert(row).await.map_err(|e| {
                DmutError::new_with_cause(
                    &format!("Cannot revert mutation '{}' ({})", row.identifier, short(&row.hash)),
                    e.kind().clone(),
                    e,
                )
            })?;
        }

        let mut applied = 0;
        for mutation in target.iter(graph) {
            if present.contains(mutation.hash()) {
                continue;
            }
            log.push(ChangeLine {
                kind: ChangeKind::Applied,
                hash: mutation.hash().to_string(),
                identifier: mutation.identifier().to_string(),
                parents: mutation
                    .parents()
                    .iter()
                    .map(|p| graph[*p].identifier().to_string())
                    .collect(),
            });
            self.apply(graph, mutation).await.map_err(|e| {
                DmutError::new_with_cause(
                    &format!(
                        "Cannot apply mutation '{}' ({})",
                        mutation.identifier(),
                        short(mutation.hash())
                    ),
                    e.kind().clone(),
                    e,
                )
            })?;
            applied += 1;
        }

        Ok(!gone.is_empty() || applied > 0)
    }

    /// Runs the stored undo statements of `row` and forgets it.
    async fn revert(&mut self, row: &LedgerRow) -> DmutResult<()> {
        for statement in &row.undo {
            self.execute(statement).await?;
        }
        self.database.delete_ledger_row(&row.hash).await?;
        log::debug!("Reverted {} {}", short(&row.hash), row.identifier);
        Ok(())
    }

    async fn apply(&mut self, graph: &MutationGraph, mutation: &Mutation) -> DmutResult<()> {
        for statement in mutation.statements() {
            self.execute(statement).await?;
        }
        self.database
            .insert_ledger_row(&LedgerRow::from_mutation(graph, mutation))
            .await?;
        log::debug!("Applied {} {}", short(mutation.hash()), mutation.identifier());
        Ok(())
    }

    async fn execute(&mut self, statement: &str) -> DmutResult<()> {
        if self.config.is_log_statements() {
            log::debug!("{}", statement);
        }
        self.database.execute(statement).await.inspect_err(|e| {
            if self.state != RunnerState::Testing {
                match e.statement() {
                    Some(context) => log::error!("{}\n{}", e, context),
                    None => log::error!("{}", e),
                }
            }
        })
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::errors::ErrorKind;
    use crate::mutation::{MutationBuilder, MutationId};

    fn table(identifier: &str, parents: &[MutationId]) -> MutationBuilder {
        MutationBuilder::new(identifier)
            .depends(parents.iter().copied())
            .auto(&format!("create table {} (id int)", identifier))
    }

    fn identifiers<'a>(log: &'a ChangeLog, kind: ChangeKind) -> Vec<&'a str> {
        log.of_kind(kind).map(|l| l.identifier.as_str()).collect()
    }

    #[tokio::test]
    async fn applies_in_declaration_order_and_records_parents() {
        let mut graph = MutationGraph::postgres().unwrap();
        let x = graph.add(table("x", &[])).unwrap();
        let y = graph.add(table("y", &[x])).unwrap();
        let db = MemoryDatabase::new();
        let mut runner = MutationRunner::new(db.clone());

        let log = runner.mutate(&graph, &graph.target([y])).await.unwrap();

        assert_eq!(
            identifiers(&log, ChangeKind::Applied),
            vec!["dmut installation", "x", "y"]
        );
        assert_eq!(log.lines()[2].parents, vec!["x"]);
        let row = db
            .ledger()
            .into_iter()
            .find(|row| row.identifier == "y")
            .unwrap();
        assert_eq!(row.parents, vec![graph[x].hash().to_string()]);
        assert_eq!(db.commits(), 1);
        assert!(db.has_object("table", "y"));
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test]
    async fn auto_statement_is_stored_with_its_undo() {
        let mut graph = MutationGraph::postgres().unwrap();
        let bar = graph
            .add(MutationBuilder::new("bar").auto("create table foo.bar(id int)"))
            .unwrap();
        let db = MemoryDatabase::new();
        let mut runner = MutationRunner::new(db.clone());
        runner.mutate(&graph, &graph.target([bar])).await.unwrap();

        let row = db
            .ledger()
            .into_iter()
            .find(|row| row.hash == graph[bar].hash())
            .unwrap();
        assert_eq!(row.statements, vec!["create table foo.bar(id int)"]);
        assert_eq!(row.undo, vec!["drop table foo.bar -- @auto"]);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let mut graph = MutationGraph::postgres().unwrap();
        let x = graph.add(table("x", &[])).unwrap();
        let db = MemoryDatabase::new();
        let mut runner = MutationRunner::new(db.clone());
        runner.mutate(&graph, &graph.target([x])).await.unwrap();
        let rows = db.ledger();

        let log = runner.mutate(&graph, &graph.target([x])).await.unwrap();

        assert!(!log.has_changes());
        assert_eq!(identifiers(&log, ChangeKind::Kept), vec!["x"]);
        assert_eq!(
            identifiers(&log, ChangeKind::Locked),
            vec!["dmut installation"]
        );
        assert_eq!(db.commits(), 1);
        assert_eq!(db.rollbacks(), 1);
        assert_eq!(db.ledger(), rows);
    }

    #[tokio::test]
    async fn reverts_dependents_first_with_stored_undo() {
        let mut graph = MutationGraph::postgres().unwrap();
        let a = graph.add(table("a", &[])).unwrap();
        let b = graph.add(table("b", &[a])).unwrap();
        let c = graph.add(table("c", &[b])).unwrap();
        let db = MemoryDatabase::new();
        let config = RunnerConfig::new().self_test(false);
        let mut runner = MutationRunner::with_config(db.clone(), config);
        runner.mutate(&graph, &graph.target([c])).await.unwrap();
        db.clear_journal();

        // b and c are no longer declared at all
        let mut reduced = MutationGraph::postgres().unwrap();
        let a2 = reduced.add(table("a", &[])).unwrap();
        let log = runner.mutate(&reduced, &reduced.target([a2])).await.unwrap();

        assert_eq!(identifiers(&log, ChangeKind::Reverted), vec!["c", "b"]);
        assert!(identifiers(&log, ChangeKind::Applied).is_empty());
        let drops: Vec<String> = db
            .journal()
            .into_iter()
            .filter(|s| s.starts_with("drop"))
            .collect();
        assert_eq!(drops, vec!["drop table c -- @auto", "drop table b -- @auto"]);
        assert!(db.has_object("table", "a"));
        assert_eq!(db.ledger().len(), 2);
    }

    #[tokio::test]
    async fn changed_locked_mutation_never_touches_the_database() {
        let mut graph = MutationGraph::postgres().unwrap();
        let shipped = graph
            .add(table("shipped", &[]).lock("0000000000000000"))
            .unwrap();
        let db = MemoryDatabase::new();
        let mut runner = MutationRunner::new(db.clone());

        let err = runner
            .mutate(&graph, &graph.target([shipped]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), &ErrorKind::LockViolation);
        assert!(db.journal().is_empty());
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test]
    async fn failed_statement_rolls_back_everything() {
        let mut graph = MutationGraph::postgres().unwrap();
        let x = graph.add(table("x", &[])).unwrap();
        let y = graph.add(table("y", &[x])).unwrap();
        let db = MemoryDatabase::new();
        db.fail_on("create table y");
        let mut runner = MutationRunner::new(db.clone());

        let err = runner.mutate(&graph, &graph.target([y])).await.unwrap_err();

        assert_eq!(err.kind(), &ErrorKind::StatementError);
        assert!(err.message().contains("'y'"));
        assert_eq!(
            err.statement().unwrap().highlighted(),
            ">>create<< table y (id int)"
        );
        let log = err.change_log().unwrap();
        assert_eq!(
            identifiers(log, ChangeKind::Applied),
            vec!["dmut installation", "x", "y"]
        );
        assert!(db.objects().is_empty());
        assert!(!db.in_transaction());
        assert_eq!(db.commits(), 0);
    }

    #[tokio::test]
    async fn irreversible_mutation_fails_the_self_test() {
        let mut graph = MutationGraph::postgres().unwrap();
        let x = graph.add(table("x", &[])).unwrap();
        let y = graph
            .add(
                MutationBuilder::new("y")
                    .depends([x])
                    .down("select 1")
                    .up("create table y (id int)"),
            )
            .unwrap();
        let db = MemoryDatabase::new();
        let mut runner = MutationRunner::new(db.clone());
        runner.mutate(&graph, &graph.target([])).await.unwrap();
        let before = db.ledger();

        let err = runner.mutate(&graph, &graph.target([y])).await.unwrap_err();

        assert_eq!(err.kind(), &ErrorKind::ReversibilityFailure);
        let failed: Vec<&str> = err.failures().iter().map(|f| f.hash.as_str()).collect();
        assert!(failed.contains(&graph[x].hash()));
        assert_eq!(db.ledger(), before);
        assert!(!db.has_object("table", "x"));
        assert_eq!(db.commits(), 1);
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test]
    async fn self_test_leaves_no_residue() {
        let mut graph = MutationGraph::postgres().unwrap();
        let x = graph.add(table("x", &[])).unwrap();
        let y = graph.add(table("y", &[x])).unwrap();
        let db = MemoryDatabase::new();
        let mut runner = MutationRunner::new(db.clone());

        runner.mutate(&graph, &graph.target([y])).await.unwrap();

        let journal = db.journal();
        assert!(journal.iter().any(|s| s == "drop table x -- @auto"));
        assert!(journal.iter().any(|s| s == r#"release savepoint "dmut_testing""#));
        assert!(db.has_object("table", "x"));
        assert!(db.has_object("table", "y"));
        assert_eq!(db.ledger().len(), 3);
    }

    #[tokio::test]
    async fn search_path_wraps_statements() {
        let mut graph = MutationGraph::postgres().unwrap();
        let users = graph
            .add(
                MutationBuilder::new("users")
                    .search_path(["app"])
                    .auto("create table users (id int)"),
            )
            .unwrap();
        let db = MemoryDatabase::new();
        let mut runner = MutationRunner::new(db.clone());
        runner.mutate(&graph, &graph.target([users])).await.unwrap();

        let row = db
            .ledger()
            .into_iter()
            .find(|row| row.identifier == "users")
            .unwrap();
        assert_eq!(
            row.statements,
            vec![
                "set search_path to app",
                "create table users (id int)",
                "reset search_path"
            ]
        );
        assert_eq!(row.undo[1], "drop table users -- @auto");
    }
}
