use dmut::change_log::{ChangeKind, ChangeLog};
use dmut::config::RunnerConfig;
use dmut::database::{MemoryDatabase, PgDatabase};
use dmut::errors::{DmutError, DmutResult, ErrorKind};
use dmut::graph::MutationGraph;
use dmut::ledger;
use dmut::mutation::MutationSpec;
use dmut::reversal::ReversalEngine;
use dmut::runner::MutationRunner;
use std::env;
use std::future::Future;

/// Connection string of the PostgreSQL database used by the live scenarios.
pub const DATABASE_URL_VAR: &str = "DMUT_TEST_DATABASE_URL";

/// A small application schema, as a mutation file parser would describe it.
pub const APP_SPECS: &str = r#"[
    {
        "identifier": "schema",
        "entries": [
            {"kind": "up", "contents": "create schema app"},
            {"kind": "up", "contents": "comment on schema app is 'Application data'"}
        ]
    },
    {
        "identifier": "users",
        "parents": ["schema"],
        "search_path": ["app"],
        "entries": [
            {"kind": "up", "contents": "create table users (id serial primary key, email text not null)"},
            {"kind": "up", "contents": "create unique index users_email on users (email)"}
        ]
    },
    {
        "identifier": "reader",
        "parents": ["schema"],
        "entries": [
            {"kind": "up", "contents": "create role app_reader"},
            {"kind": "up", "contents": "grant usage on schema app to app_reader"}
        ]
    },
    {
        "identifier": "users access",
        "parents": ["users", "reader"],
        "entries": [
            {"kind": "up", "contents": "grant select on app.users to app_reader"},
            {"kind": "up", "contents": "alter table app.users enable row level security"},
            {"kind": "up", "contents": "create policy users_self on app.users for select using (true)"}
        ]
    },
    {
        "identifier": "seed",
        "parents": ["users"],
        "entries": [
            {"kind": "down", "contents": "delete from app.users where email = 'admin@example.com'"},
            {"kind": "up", "contents": "insert into app.users (email) values ('admin@example.com')"}
        ]
    }
]"#;

pub fn parse_specs(json: &str) -> DmutResult<Vec<MutationSpec>> {
    serde_json::from_str(json).map_err(|e| {
        DmutError::new(
            &format!("Invalid mutation specifications: {}", e),
            ErrorKind::InvalidOperation,
        )
    })
}

/// Builds a graph with the ledger bootstrap and the PostgreSQL reversal rules.
pub fn graph_from_specs(specs: &[MutationSpec]) -> DmutResult<MutationGraph> {
    MutationGraph::from_specs(specs, ledger::bootstrap(), ReversalEngine::postgres())
}

pub fn graph_from_json(json: &str) -> DmutResult<MutationGraph> {
    graph_from_specs(&parse_specs(json)?)
}

pub fn app_specs() -> Vec<MutationSpec> {
    match parse_specs(APP_SPECS) {
        Ok(specs) => specs,
        Err(e) => panic!("Fixture does not parse: {:?}", e),
    }
}

/// A runner over an in-memory database, with a handle on the same database.
pub struct TestContext {
    database: MemoryDatabase,
    runner: MutationRunner<MemoryDatabase>,
}

impl TestContext {
    pub fn database(&self) -> &MemoryDatabase {
        &self.database
    }

    pub fn runner(&mut self) -> &mut MutationRunner<MemoryDatabase> {
        &mut self.runner
    }

    /// Reconciles the database with every mutation of `graph`.
    pub async fn mutate_all(&mut self, graph: &MutationGraph) -> DmutResult<ChangeLog> {
        self.runner.mutate(graph, &graph.all()).await
    }
}

pub fn create_test_context() -> TestContext {
    create_test_context_with(RunnerConfig::default())
}

pub fn create_test_context_with(config: RunnerConfig) -> TestContext {
    let database = MemoryDatabase::new();
    TestContext {
        runner: MutationRunner::with_config(database.clone(), config),
        database,
    }
}

/// Runs a scenario between a setup and a cleanup step.
///
/// `after` runs even when the scenario fails, on a handle to the same database.
pub async fn run_test<B, T, F, A>(before: B, test: T, after: A)
where
    B: FnOnce() -> TestContext,
    T: FnOnce(TestContext) -> F,
    F: Future<Output = DmutResult<()>>,
    A: FnOnce(&MemoryDatabase) -> DmutResult<()>,
{
    let ctx = before();
    let database = ctx.database().clone();
    let result = test(ctx).await;
    let cleanup_result = after(&database);
    if let Err(e) = result {
        panic!("Test failed: {:?}", e);
    }
    if let Err(e) = cleanup_result {
        panic!("After run failed: {:?}", e);
    }
}

/// Checks that the scenario left no transaction open.
pub fn cleanup(database: &MemoryDatabase) -> DmutResult<()> {
    if database.in_transaction() {
        return Err(DmutError::new(
            "A transaction is still open after the run",
            ErrorKind::InvalidOperation,
        ));
    }
    Ok(())
}

/// Connects to the live database, or returns `None` when none is configured.
pub async fn postgres_database() -> DmutResult<Option<PgDatabase>> {
    match env::var(DATABASE_URL_VAR) {
        Ok(url) => Ok(Some(PgDatabase::connect(&url).await?)),
        Err(_) => {
            log::warn!("{} is not set, skipping the live scenario", DATABASE_URL_VAR);
            Ok(None)
        }
    }
}

pub fn identifiers(log: &ChangeLog, kind: ChangeKind) -> Vec<String> {
    log.of_kind(kind).map(|line| line.identifier.clone()).collect()
}
