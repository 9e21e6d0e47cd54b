//! The ledger: the table inside the target database recording applied mutations.
//!
//! The ledger is created by the bootstrap mutation, which is locked on a fixed hash
//! so that its identity never drifts between releases.

use crate::graph::MutationGraph;
use crate::mutation::{Mutation, MutationBuilder};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Schema holding the ledger.
pub const LEDGER_SCHEMA: &str = r#""dmut""#;
/// Fully qualified ledger table.
pub const LEDGER_TABLE: &str = r#""dmut"."mutations""#;
/// Identifier of the bootstrap mutation.
pub const BOOTSTRAP_IDENTIFIER: &str = "dmut installation";
/// Pinned hash prefix of the bootstrap mutation.
pub const BOOTSTRAP_LOCK: &str = "a537ab8b6a52";

/// The mutation creating the ledger schema and table.
pub fn bootstrap() -> MutationBuilder {
    MutationBuilder::new(BOOTSTRAP_IDENTIFIER)
        .lock(BOOTSTRAP_LOCK)
        .auto(&format!("create schema {}", LEDGER_SCHEMA))
        .auto(&format!(
            r#"create table {} ("hash" text primary key, "identifier" text, "statements" text[], "undo" text[], "parents" text[], "date_applied" timestamp default now())"#,
            LEDGER_TABLE
        ))
        .comment(&format!(
            "on schema {} is 'Ledger of the mutations applied to this database.'",
            LEDGER_SCHEMA
        ))
        .comment(&format!(
            r#"on column {}."hash" is 'Content hash identifying the mutation.'"#,
            LEDGER_TABLE
        ))
        .comment(&format!(
            r#"on column {}."identifier" is 'Human readable label of the mutation.'"#,
            LEDGER_TABLE
        ))
        .comment(&format!(
            r#"on column {}."statements" is 'Statements run to apply the mutation.'"#,
            LEDGER_TABLE
        ))
        .comment(&format!(
            r#"on column {}."undo" is 'Statements run when the mutation is reverted.'"#,
            LEDGER_TABLE
        ))
        .comment(&format!(
            r#"on column {}."parents" is 'Hashes of the mutations this one depends on.'"#,
            LEDGER_TABLE
        ))
        .comment(&format!(
            r#"on column {}."date_applied" is 'When the mutation was applied.'"#,
            LEDGER_TABLE
        ))
}

/// One row of the ledger.
///
/// The stored undo statements are authoritative when the mutation is reverted, since
/// the code declaring the mutation may have changed since the row was written.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LedgerRow {
    pub hash: String,
    pub identifier: String,
    pub statements: Vec<String>,
    pub undo: Vec<String>,
    pub parents: Vec<String>,
    pub date_applied: Option<NaiveDateTime>,
}

impl LedgerRow {
    /// The row recording that `mutation` was applied.
    pub fn from_mutation(graph: &MutationGraph, mutation: &Mutation) -> Self {
        LedgerRow {
            hash: mutation.hash().to_string(),
            identifier: mutation.identifier().to_string(),
            statements: mutation.statements().to_vec(),
            undo: mutation.undo().to_vec(),
            parents: mutation
                .parents()
                .iter()
                .map(|p| graph[*p].hash().to_string())
                .collect(),
            date_applied: None,
        }
    }
}

/// Orders rows so that every row comes after the rows of its recorded parents.
///
/// Rows are expected in apply order. Rows applied in the same transaction share a
/// timestamp, so apply order alone does not always put parents first. Parents that
/// are not in the ledger are ignored.
pub fn order_rows(rows: Vec<LedgerRow>) -> Vec<LedgerRow> {
    let mut pending: IndexMap<String, LedgerRow> =
        rows.into_iter().map(|row| (row.hash.clone(), row)).collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut expanded_once: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());
    let hashes: Vec<String> = pending.keys().cloned().collect();

    for hash in hashes {
        // depth-first: (hash, parents visited)
        let mut stack = vec![(hash, false)];
        while let Some((hash, expanded)) = stack.pop() {
            if placed.contains(&hash) {
                continue;
            }
            if expanded {
                if let Some(row) = pending.shift_remove(&hash) {
                    placed.insert(hash);
                    ordered.push(row);
                }
                continue;
            }
            let Some(row) = pending.get(&hash) else {
                continue;
            };
            if !expanded_once.insert(hash.clone()) {
                // a malformed ledger with a parent cycle
                continue;
            }
            let parents: Vec<String> = row
                .parents
                .iter()
                .rev()
                .filter(|p| !placed.contains(*p) && pending.contains_key(*p))
                .cloned()
                .collect();
            stack.push((hash, true));
            stack.extend(parents.into_iter().map(|p| (p, false)));
        }
    }
    ordered
}
