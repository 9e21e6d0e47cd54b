use super::{MutationRunner, RunnerState};
use crate::change_log::ChangeLog;
use crate::database::Database;
use crate::errors::{DmutError, DmutResult, ErrorKind, MutationFailure};
use crate::graph::{MutationGraph, TargetSet};

impl<D: Database> MutationRunner<D> {
    /// Proves that every member of `target` except the bootstrap mutation can be
    /// removed, together with its dependents, and applied again.
    ///
    /// Each attempt runs inside a savepoint that is rolled back whatever the
    /// outcome. Every failing mutation is reported in one `ReversibilityFailure`.
    pub(super) async fn self_test(
        &mut self,
        graph: &MutationGraph,
        target: &TargetSet,
    ) -> DmutResult<()> {
        let previous = std::mem::replace(&mut self.state, RunnerState::Testing);
        let result = self.test_each(graph, target).await;
        self.state = previous;
        result
    }

    async fn test_each(&mut self, graph: &MutationGraph, target: &TargetSet) -> DmutResult<()> {
        let savepoint = self.config.savepoint().to_string();
        let bootstrap = graph.bootstrap().id();
        let mut failures = Vec::new();

        for mutation in target.iter(graph) {
            if mutation.id() == bootstrap {
                continue;
            }
            self.database.savepoint(&savepoint).await?;
            let reduced = target.without(graph, &[mutation.hash()]);
            let outcome = self.remove_and_reapply(graph, &reduced, target).await;
            self.database.rollback_to_savepoint(&savepoint).await?;
            self.database.release_savepoint(&savepoint).await?;

            match outcome {
                Ok(()) => log::debug!("Mutation {} is reversible", mutation.identifier()),
                Err(error) => {
                    log::warn!(
                        "Mutation {} cannot be removed and reapplied: {}",
                        mutation.identifier(),
                        error
                    );
                    failures.push(MutationFailure {
                        hash: mutation.hash().to_string(),
                        identifier: mutation.identifier().to_string(),
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            return Ok(());
        }
        let identifiers: Vec<&str> = failures.iter().map(|f| f.identifier.as_str()).collect();
        Err(DmutError::new(
            &format!(
                "Reversibility test failed for {} mutation(s): {}",
                failures.len(),
                identifiers.join(", ")
            ),
            ErrorKind::ReversibilityFailure,
        )
        .with_failures(failures))
    }

    /// Reconciles to `reduced`, then back to `full`, inside the ambient transaction.
    async fn remove_and_reapply(
        &mut self,
        graph: &MutationGraph,
        reduced: &TargetSet,
        full: &TargetSet,
    ) -> DmutResult<()> {
        let mut scratch = ChangeLog::new();
        let ledger = self.read_ledger().await?;
        self.apply_diff(graph, reduced, &ledger, &mut scratch).await?;
        let ledger = self.read_ledger().await?;
        self.apply_diff(graph, full, &ledger, &mut scratch).await?;
        Ok(())
    }
}
