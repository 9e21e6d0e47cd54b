use super::Database;
use crate::errors::{DmutError, DmutResult, ErrorKind, StatementContext};
use crate::ledger::{LedgerRow, LEDGER_TABLE};
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgDatabaseError, PgErrorPosition};
use sqlx::{Connection, Executor};

/// A PostgreSQL connection.
///
/// Statements go through the simple query protocol, so a statement text may hold
/// several commands (function bodies, `do` blocks). Ledger reads and writes use bound
/// parameters.
///
/// # Examples
///
/// ```rust,ignore
/// let database = PgDatabase::connect("postgres://localhost/app").await?;
/// let mut runner = MutationRunner::new(database);
/// let log = runner.mutate(&graph, &graph.all()).await?;
/// ```
pub struct PgDatabase {
    connection: PgConnection,
}

impl PgDatabase {
    /// Opens a connection to `url`.
    pub async fn connect(url: &str) -> DmutResult<Self> {
        let connection = PgConnection::connect(url).await.map_err(|e| {
            log::error!("Cannot connect to the database: {}", e);
            DmutError::from(e)
        })?;
        Ok(PgDatabase { connection })
    }

    pub fn from_connection(connection: PgConnection) -> Self {
        PgDatabase { connection }
    }

    pub fn into_inner(self) -> PgConnection {
        self.connection
    }

    pub async fn close(self) -> DmutResult<()> {
        self.connection.close().await?;
        Ok(())
    }

    async fn fetch_rows(&mut self, table: &str) -> DmutResult<Vec<LedgerRow>> {
        let query = ledger_query(table);
        let rows = sqlx::query_as::<_, LedgerRow>(&query)
            .fetch_all(&mut self.connection)
            .await
            .map_err(|e| statement_error(e, &query))?;
        Ok(rows)
    }
}

/// Selects the rows of a ledger table. Every column but the hash is nullable, and
/// rows written by older tools may leave them empty.
fn ledger_query(table: &str) -> String {
    format!(
        "select hash, coalesce(identifier, '') as identifier, coalesce(statements, '{{}}') as statements, \
         coalesce(undo, '{{}}') as undo, coalesce(parents, '{{}}') as parents, date_applied \
         from {} order by date_applied, hash",
        table
    )
}

/// Turns a driver error into a `StatementError`, keeping the reported position.
fn statement_error(err: sqlx::Error, statement: &str) -> DmutError {
    let position = err
        .as_database_error()
        .and_then(|e| e.try_downcast_ref::<PgDatabaseError>())
        .and_then(|e| match e.position() {
            Some(PgErrorPosition::Original(position)) => Some(position),
            _ => None,
        });
    let message = match err.as_database_error() {
        Some(db_error) => db_error.message().to_string(),
        None => err.to_string(),
    };
    DmutError::new(&message, ErrorKind::StatementError)
        .with_statement(StatementContext::new(statement, position))
}

#[async_trait]
impl Database for PgDatabase {
    async fn execute(&mut self, statement: &str) -> DmutResult<()> {
        Executor::execute(&mut self.connection, sqlx::raw_sql(statement))
            .await
            .map_err(|e| statement_error(e, statement))?;
        Ok(())
    }

    async fn ledger_exists(&mut self) -> DmutResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>("select to_regclass($1) is not null")
            .bind(LEDGER_TABLE)
            .fetch_one(&mut self.connection)
            .await?;
        Ok(exists)
    }

    async fn fetch_ledger(&mut self) -> DmutResult<Vec<LedgerRow>> {
        self.fetch_rows(LEDGER_TABLE).await
    }

    async fn insert_ledger_row(&mut self, row: &LedgerRow) -> DmutResult<()> {
        let query = format!(
            "insert into {} (hash, identifier, statements, undo, parents) values ($1, $2, $3, $4, $5)",
            LEDGER_TABLE
        );
        sqlx::query(&query)
            .bind(&row.hash)
            .bind(&row.identifier)
            .bind(&row.statements)
            .bind(&row.undo)
            .bind(&row.parents)
            .execute(&mut self.connection)
            .await
            .map_err(|e| statement_error(e, &query))?;
        Ok(())
    }

    async fn delete_ledger_row(&mut self, hash: &str) -> DmutResult<()> {
        let query = format!("delete from {} where hash = $1", LEDGER_TABLE);
        sqlx::query(&query)
            .bind(hash)
            .execute(&mut self.connection)
            .await
            .map_err(|e| statement_error(e, &query))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_query_coalesces_nullable_columns() {
        let query = ledger_query(LEDGER_TABLE);
        assert!(query.contains("coalesce(identifier, '') as identifier"));
        for column in ["statements", "undo", "parents"] {
            assert!(query.contains(&format!("coalesce({column}, '{{}}') as {column}")));
        }
        assert!(query.ends_with(r#"from "dmut"."mutations" order by date_applied, hash"#));
    }

    #[tokio::test]
    async fn null_ledger_columns_read_as_empty() -> DmutResult<()> {
        let Ok(url) = std::env::var("DMUT_TEST_DATABASE_URL") else {
            return Ok(());
        };
        let mut database = PgDatabase::connect(&url).await?;
        database
            .execute(
                r#"create temporary table "mutations" ("hash" text primary key, "identifier" text, "statements" text[], "undo" text[], "parents" text[], "date_applied" timestamp default now())"#,
            )
            .await?;
        database
            .execute(r#"insert into pg_temp."mutations" ("hash") values ('0123456789ab')"#)
            .await?;

        let rows = database.fetch_rows(r#"pg_temp."mutations""#).await?;

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hash, "0123456789ab");
        assert_eq!(rows[0].identifier, "");
        assert!(rows[0].statements.is_empty());
        assert!(rows[0].undo.is_empty());
        assert!(rows[0].parents.is_empty());
        assert!(rows[0].date_applied.is_some());
        database.close().await
    }
}
