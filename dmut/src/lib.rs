//! # dmut - Content-addressed schema mutations
//!
//! dmut keeps a PostgreSQL schema in line with a declared graph of mutations. Each
//! mutation is a reversible unit of statements identified by the hash of its
//! content and of its ancestry. The database records what was applied in a ledger
//! table, created by dmut itself, so a run can compute exactly what to revert and
//! what to apply.
//!
//! ## Key Features
//!
//! - **Content addressed**: the hash covers the normalized statements, their undo
//!   statements and the parents' hashes
//! - **Auto-reversal**: undo statements are derived from common DDL forms
//! - **Hash locks**: shipped mutations are pinned and can never change silently
//! - **Cascading removal**: removing a mutation removes everything depending on it
//! - **Self-test**: before committing, every live mutation is removed and
//!   reapplied inside a savepoint
//! - **All or nothing**: a run either commits fully or rolls back fully
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dmut::database::PgDatabase;
//! use dmut::graph::MutationGraph;
//! use dmut::mutation::MutationBuilder;
//! use dmut::runner::MutationRunner;
//!
//! let mut graph = MutationGraph::postgres()?;
//! let schema = graph.add(MutationBuilder::new("schema").auto("create schema app"))?;
//! let users = graph.add(
//!     MutationBuilder::new("users")
//!         .depends([schema])
//!         .auto("create table app.users (id serial primary key, email text)")
//!         .auto("create unique index users_email on app.users (email)"),
//! )?;
//!
//! let database = PgDatabase::connect("postgres://localhost/app").await?;
//! let mut runner = MutationRunner::new(database);
//! let log = runner.mutate(&graph, &graph.target([users])).await?;
//! print!("{}", log);
//! ```
//!
//! ## Modules
//!
//! - [`mutation`]: mutation drafts, sealed mutations and hashing
//! - [`reversal`]: derivation of undo statements
//! - [`graph`]: the mutation registry and target sets
//! - [`ledger`]: the ledger table and its bootstrap mutation
//! - [`runner`]: reconciliation and self-testing
//! - [`database`]: the database seam and its implementations
//! - [`change_log`]: the record of what a run did
//! - [`config`]: runner options
//! - [`errors`]: error types

pub mod change_log;
pub mod config;
pub mod database;
pub mod errors;
pub mod graph;
pub mod ledger;
pub mod mutation;
pub mod reversal;
pub mod runner;

pub use change_log::{ChangeKind, ChangeLine, ChangeLog};
pub use config::RunnerConfig;
pub use errors::{DmutError, DmutResult, ErrorKind};
pub use graph::{MutationGraph, TargetSet};
pub use mutation::{Mutation, MutationBuilder, MutationId, MutationSpec};
pub use runner::MutationRunner;
