//! Access to the target database.
//!
//! The runner only needs to run statements, read and write the ledger, and control
//! one transaction with nested savepoints. [`Database`] captures that contract.
//!
//! # Implementations
//! - [`PgDatabase`]: a PostgreSQL connection through `sqlx`
//! - [`MemoryDatabase`]: an in-memory catalog for tests and dry runs

mod memory;
mod postgres;

pub use memory::MemoryDatabase;
pub use postgres::PgDatabase;

use crate::errors::DmutResult;
use crate::ledger::LedgerRow;
use async_trait::async_trait;

/// Quotes `name` as an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The database a reconciliation run talks to.
///
/// Every call completes before the next one starts; implementations never have to
/// handle concurrent use.
#[async_trait]
pub trait Database: Send {
    /// Executes one statement text, which may hold several SQL commands.
    ///
    /// # Errors
    /// `StatementError` with the statement attached when the database rejects it.
    async fn execute(&mut self, statement: &str) -> DmutResult<()>;

    /// Whether the ledger table exists yet.
    async fn ledger_exists(&mut self) -> DmutResult<bool>;

    /// Reads every ledger row, oldest first.
    async fn fetch_ledger(&mut self) -> DmutResult<Vec<LedgerRow>>;

    /// Records an applied mutation. `date_applied` is set by the database.
    async fn insert_ledger_row(&mut self, row: &LedgerRow) -> DmutResult<()>;

    /// Forgets a reverted mutation.
    async fn delete_ledger_row(&mut self, hash: &str) -> DmutResult<()>;

    async fn begin(&mut self) -> DmutResult<()> {
        self.execute("begin").await
    }

    async fn commit(&mut self) -> DmutResult<()> {
        self.execute("commit").await
    }

    async fn rollback(&mut self) -> DmutResult<()> {
        self.execute("rollback").await
    }

    async fn savepoint(&mut self, name: &str) -> DmutResult<()> {
        self.execute(&format!("savepoint {}", quote_ident(name))).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> DmutResult<()> {
        self.execute(&format!("rollback to savepoint {}", quote_ident(name)))
            .await
    }

    async fn release_savepoint(&mut self, name: &str) -> DmutResult<()> {
        self.execute(&format!("release savepoint {}", quote_ident(name)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("dmut_testing"), "\"dmut_testing\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
