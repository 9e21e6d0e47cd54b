use super::Database;
use crate::errors::{DmutError, DmutResult, ErrorKind, StatementContext};
use crate::ledger::{LedgerRow, LEDGER_TABLE};
use crate::reversal::split_qualified;
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

const KINDS: &str = r"(table|role|schema|type|view|index|function|policy)";
const NAME: &str = r#"((?:\w+|"[^"]+")(?:\.(?:\w+|"[^"]+"))*)"#;

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--[^\n]*").expect("comment pattern is valid"));
static SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
static CREATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)^create\s+(or\s+replace\s+)?(?:unique\s+)?{}\s+(?:concurrently\s+)?(if\s+not\s+exists\s+)?{}",
        KINDS, NAME
    ))
    .expect("create pattern is valid")
});
static INDEX_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?is)\s+on\s+(?:only\s+)?{}", NAME)).expect("index pattern is valid")
});
static DROP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)^drop\s+{}\s+(?:concurrently\s+)?(if\s+exists\s+)?{}",
        KINDS, NAME
    ))
    .expect("drop pattern is valid")
});
static GRANT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^grant\s+(.+?)\s+on\s+(.+?)\s+to\s+(.+?)(?:\s+with\s+grant\s+option)?$")
        .expect("grant pattern is valid")
});
static REVOKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^revoke\s+(.+?)\s+on\s+(.+?)\s+from\s+(.+?)(?:\s+cascade)?$")
        .expect("revoke pattern is valid")
});
static ROW_SECURITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)^alter\s+table\s+(?:only\s+)?{}\s+(enable|disable)\s+row\s+level\s+security$",
        NAME
    ))
    .expect("row security pattern is valid")
});
static SET_SEARCH_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^set\s+(?:local\s+)?search_path\s+(?:to|=)\s+(.+)$")
        .expect("search_path pattern is valid")
});
static SAVEPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)^(savepoint|rollback to savepoint|release savepoint) {}$",
        NAME
    ))
    .expect("savepoint pattern is valid")
});

/// Normalizes a possibly quoted, possibly qualified name the way the server folds it.
fn fold_name(name: &str) -> String {
    split_qualified(name)
        .into_iter()
        .map(|part| {
            if part.len() >= 2 && part.starts_with('"') && part.ends_with('"') {
                part[1..part.len() - 1].to_string()
            } else {
                part.to_lowercase()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn fold_words(text: &str) -> String {
    SPACES.replace_all(text.trim(), " ").to_lowercase()
}

/// 1-based character position of `byte_offset` in `text`.
fn char_position(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].chars().count() + 1
}

/// The single command of a statement text, without comments, trailing semicolon
/// or extra whitespace.
fn command_text(statement: &str) -> String {
    let text = LINE_COMMENT.replace_all(statement, "");
    SPACES
        .replace_all(text.trim().trim_end_matches(';').trim_end(), " ")
        .into_owned()
}

/// Everything the simulated server knows about.
#[derive(Debug, Clone, Default)]
struct Catalog {
    objects: BTreeSet<String>,
    grants: BTreeSet<String>,
    row_security: BTreeSet<String>,
    ledger: Vec<LedgerRow>,
    search_path: Option<String>,
}

const SCHEMA_SCOPED: [&str; 5] = ["table", "view", "index", "type", "function"];

impl Catalog {
    /// Qualifies an unqualified name with the first schema of the search path.
    fn qualify(&self, kind: &str, name: String) -> String {
        if name.contains('.') || !SCHEMA_SCOPED.contains(&kind) {
            return name;
        }
        let schema = self
            .search_path
            .as_deref()
            .and_then(|path| path.split(',').next())
            .map(|schema| fold_name(schema.trim()))
            .filter(|schema| !schema.is_empty());
        match schema {
            Some(schema) => format!("{}.{}", schema, name),
            None => name,
        }
    }

    fn ledger_exists(&self) -> bool {
        self.objects
            .contains(&format!("table {}", fold_name(LEDGER_TABLE)))
    }
}

#[derive(Debug)]
struct Transaction {
    base: Catalog,
    savepoints: Vec<(String, Catalog)>,
    aborted: bool,
    started: NaiveDateTime,
}

#[derive(Debug)]
struct State {
    catalog: Catalog,
    transaction: Option<Transaction>,
    journal: Vec<String>,
    failures: Vec<String>,
    commits: usize,
    rollbacks: usize,
    clock: NaiveDateTime,
}

impl Default for State {
    fn default() -> Self {
        State {
            catalog: Catalog::default(),
            transaction: None,
            journal: Vec::new(),
            failures: Vec::new(),
            commits: 0,
            rollbacks: 0,
            clock: Utc::now().naive_utc(),
        }
    }
}

fn rejected(statement: &str, message: &str, position: Option<usize>) -> DmutError {
    DmutError::new(message, ErrorKind::StatementError)
        .with_statement(StatementContext::new(statement, position))
}

impl State {
    /// Time as seen by `now()`: the start of the current transaction.
    fn now(&mut self) -> NaiveDateTime {
        if let Some(transaction) = &self.transaction {
            return transaction.started;
        }
        self.tick()
    }

    fn tick(&mut self) -> NaiveDateTime {
        self.clock += TimeDelta::milliseconds(1);
        self.clock
    }

    fn check_not_aborted(&self, statement: &str) -> DmutResult<()> {
        match &self.transaction {
            Some(transaction) if transaction.aborted => Err(rejected(
                statement,
                "current transaction is aborted, commands ignored until end of transaction block",
                None,
            )),
            _ => Ok(()),
        }
    }

    /// Records a failed command, aborting the open transaction if any.
    fn fail(&mut self, error: DmutError) -> DmutError {
        if let Some(transaction) = &mut self.transaction {
            transaction.aborted = true;
        }
        error
    }

    fn run(&mut self, statement: &str) -> DmutResult<()> {
        let command = command_text(statement);
        match command.to_lowercase().as_str() {
            "" => Ok(()),
            "begin" => {
                self.begin();
                Ok(())
            }
            "commit" => {
                self.commit();
                Ok(())
            }
            "rollback" => {
                self.rollback();
                Ok(())
            }
            _ => {
                if let Some(caps) = SAVEPOINT.captures(&command) {
                    return self.run_savepoint(statement, &caps);
                }
                self.check_not_aborted(statement)?;
                match self.apply(statement, &command) {
                    Ok(()) => Ok(()),
                    Err(error) => Err(self.fail(error)),
                }
            }
        }
    }

    fn begin(&mut self) {
        if self.transaction.is_some() {
            log::warn!("There is already a transaction in progress");
            return;
        }
        let started = self.tick();
        self.transaction = Some(Transaction {
            base: self.catalog.clone(),
            savepoints: Vec::new(),
            aborted: false,
            started,
        });
    }

    fn commit(&mut self) {
        match self.transaction.take() {
            Some(transaction) if transaction.aborted => {
                self.catalog = transaction.base;
                self.rollbacks += 1;
            }
            Some(_) => self.commits += 1,
            None => log::warn!("There is no transaction in progress"),
        }
    }

    fn rollback(&mut self) {
        match self.transaction.take() {
            Some(transaction) => {
                self.catalog = transaction.base;
                self.rollbacks += 1;
            }
            None => log::warn!("There is no transaction in progress"),
        }
    }

    fn run_savepoint(&mut self, statement: &str, caps: &Captures) -> DmutResult<()> {
        let verb = fold_words(&caps[1]);
        let name = fold_name(&caps[2]);
        let snapshot = self.catalog.clone();
        let Some(transaction) = &mut self.transaction else {
            return Err(rejected(
                statement,
                "savepoints can only be used in transaction blocks",
                None,
            ));
        };

        if verb == "savepoint" {
            if transaction.aborted {
                return Err(rejected(
                    statement,
                    "current transaction is aborted, commands ignored until end of transaction block",
                    None,
                ));
            }
            transaction.savepoints.push((name, snapshot));
            return Ok(());
        }

        let Some(position) = transaction.savepoints.iter().rposition(|(n, _)| *n == name) else {
            transaction.aborted = true;
            return Err(rejected(
                statement,
                &format!("savepoint \"{}\" does not exist", name),
                None,
            ));
        };
        if verb == "rollback to savepoint" {
            transaction.savepoints.truncate(position + 1);
            transaction.aborted = false;
            self.catalog = transaction.savepoints[position].1.clone();
        } else {
            if transaction.aborted {
                return Err(rejected(
                    statement,
                    "current transaction is aborted, commands ignored until end of transaction block",
                    None,
                ));
            }
            transaction.savepoints.truncate(position);
        }
        Ok(())
    }

    fn apply(&mut self, statement: &str, command: &str) -> DmutResult<()> {
        if let Some(pattern) = self
            .failures
            .iter()
            .find(|pattern| command.contains(pattern.as_str()))
        {
            let position = statement
                .find(pattern.as_str())
                .map(|offset| char_position(statement, offset));
            return Err(rejected(
                statement,
                &format!("injected failure on '{}'", pattern),
                position,
            ));
        }

        if let Some(caps) = CREATE.captures(command) {
            return self.create(statement, command, &caps);
        }
        if let Some(caps) = DROP.captures(command) {
            return self.drop(statement, &caps);
        }
        if let Some(caps) = GRANT.captures(command) {
            let key = grant_key(&caps[1], &caps[2], &caps[3]);
            self.catalog.grants.insert(key);
            return Ok(());
        }
        if let Some(caps) = REVOKE.captures(command) {
            let key = grant_key(&caps[1], &caps[2], &caps[3]);
            if !self.catalog.grants.remove(&key) {
                log::warn!("no privileges could be revoked for {}", key);
            }
            return Ok(());
        }
        if let Some(caps) = ROW_SECURITY.captures(command) {
            return self.row_security(statement, &caps);
        }
        if let Some(caps) = SET_SEARCH_PATH.captures(command) {
            self.catalog.search_path = Some(fold_words(&caps[1]));
            return Ok(());
        }
        if fold_words(command) == "reset search_path" {
            self.catalog.search_path = None;
        }
        Ok(())
    }

    fn create(&mut self, statement: &str, command: &str, caps: &Captures) -> DmutResult<()> {
        let replace = caps.get(1).is_some();
        let kind = fold_words(&caps[2]);
        let if_not_exists = caps.get(3).is_some();
        let name_match = caps.get(4).map(|m| (m.start(), m.as_str()));
        let Some((name_start, raw_name)) = name_match else {
            return Ok(());
        };

        let mut name = fold_name(raw_name);
        if kind == "index" && !name.contains('.') {
            if let Some(table) = INDEX_TABLE.captures(&command[name_start..]) {
                let table = fold_name(&table[1]);
                if let Some((schema, _)) = table.rsplit_once('.') {
                    name = format!("{}.{}", schema, name);
                }
            }
        }
        let name = self.catalog.qualify(&kind, name);
        let key = format!("{} {}", kind, name);

        if self.catalog.objects.contains(&key) {
            if replace || if_not_exists {
                return Ok(());
            }
            let position = statement
                .find(raw_name)
                .map(|offset| char_position(statement, offset));
            return Err(rejected(
                statement,
                &format!("{} \"{}\" already exists", kind, name),
                position,
            ));
        }
        log::trace!("Created {}", key);
        self.catalog.objects.insert(key);
        Ok(())
    }

    fn drop(&mut self, statement: &str, caps: &Captures) -> DmutResult<()> {
        let kind = fold_words(&caps[1]);
        let if_exists = caps.get(2).is_some();
        let raw_name = &caps[3];
        let name = self.catalog.qualify(&kind, fold_name(raw_name));
        let key = format!("{} {}", kind, name);

        if !self.catalog.objects.remove(&key) {
            if if_exists {
                return Ok(());
            }
            let position = statement
                .find(raw_name)
                .map(|offset| char_position(statement, offset));
            return Err(rejected(
                statement,
                &format!("{} \"{}\" does not exist", kind, name),
                position,
            ));
        }
        if kind == "table" {
            self.catalog.row_security.remove(&name);
            if key == format!("table {}", fold_name(LEDGER_TABLE)) {
                self.catalog.ledger.clear();
            }
        }
        log::trace!("Dropped {}", key);
        Ok(())
    }

    fn row_security(&mut self, statement: &str, caps: &Captures) -> DmutResult<()> {
        let table = self.catalog.qualify("table", fold_name(&caps[1]));
        if !self.catalog.objects.contains(&format!("table {}", table)) {
            return Err(rejected(
                statement,
                &format!("relation \"{}\" does not exist", table),
                None,
            ));
        }
        if caps[2].eq_ignore_ascii_case("enable") {
            self.catalog.row_security.insert(table);
        } else {
            self.catalog.row_security.remove(&table);
        }
        Ok(())
    }

    fn ledger_statement(&mut self, statement: &str) -> DmutResult<()> {
        self.check_not_aborted(statement)?;
        if !self.catalog.ledger_exists() {
            let error = rejected(
                statement,
                &format!("relation {} does not exist", LEDGER_TABLE),
                None,
            );
            return Err(self.fail(error));
        }
        Ok(())
    }
}

fn grant_key(privileges: &str, object: &str, grantee: &str) -> String {
    format!(
        "{} on {} to {}",
        fold_words(privileges),
        fold_words(object),
        fold_words(grantee)
    )
}

/// A simulated PostgreSQL catalog.
///
/// The catalog tracks which objects exist, granted privileges, row level security
/// and the ledger table. It enforces the rules reconciliation depends on: creating an
/// existing object or dropping a missing one fails, a failed command aborts the open
/// transaction until it is rolled back or rolled back to a savepoint, and rows written
/// in one transaction share the transaction start time.
///
/// Statements it does not model are accepted and only recorded in the journal.
/// Clones share the same catalog.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command containing `pattern` fail.
    pub fn fail_on(&self, pattern: &str) {
        self.inner.lock().failures.push(pattern.to_string());
    }

    /// Existing objects as `kind name`, sorted.
    pub fn objects(&self) -> Vec<String> {
        self.inner.lock().catalog.objects.iter().cloned().collect()
    }

    /// Whether an object of `kind` named `name` exists.
    pub fn has_object(&self, kind: &str, name: &str) -> bool {
        let key = format!("{} {}", fold_words(kind), fold_name(name));
        self.inner.lock().catalog.objects.contains(&key)
    }

    pub fn grants(&self) -> Vec<String> {
        self.inner.lock().catalog.grants.iter().cloned().collect()
    }

    pub fn has_row_security(&self, table: &str) -> bool {
        self.inner
            .lock()
            .catalog
            .row_security
            .contains(&fold_name(table))
    }

    /// Ledger rows as currently visible, in insertion order.
    pub fn ledger(&self) -> Vec<LedgerRow> {
        self.inner.lock().catalog.ledger.clone()
    }

    /// Every statement text passed to [`Database::execute`], in order.
    pub fn journal(&self) -> Vec<String> {
        self.inner.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.inner.lock().journal.clear();
    }

    pub fn commits(&self) -> usize {
        self.inner.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.inner.lock().rollbacks
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.lock().transaction.is_some()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn execute(&mut self, statement: &str) -> DmutResult<()> {
        let mut state = self.inner.lock();
        state.journal.push(statement.to_string());
        state.run(statement)
    }

    async fn ledger_exists(&mut self) -> DmutResult<bool> {
        let state = self.inner.lock();
        state.check_not_aborted("select to_regclass($1) is not null")?;
        Ok(state.catalog.ledger_exists())
    }

    async fn fetch_ledger(&mut self) -> DmutResult<Vec<LedgerRow>> {
        let mut state = self.inner.lock();
        state.ledger_statement("select * from ledger")?;
        let mut rows = state.catalog.ledger.clone();
        rows.sort_by(|a, b| (a.date_applied, &a.hash).cmp(&(b.date_applied, &b.hash)));
        Ok(rows)
    }

    async fn insert_ledger_row(&mut self, row: &LedgerRow) -> DmutResult<()> {
        let mut state = self.inner.lock();
        state.ledger_statement("insert into ledger")?;
        if state.catalog.ledger.iter().any(|r| r.hash == row.hash) {
            let error = rejected(
                "insert into ledger",
                &format!("duplicate key value (hash)=({})", row.hash),
                None,
            );
            return Err(state.fail(error));
        }
        let mut row = row.clone();
        row.date_applied = Some(state.now());
        state.catalog.ledger.push(row);
        Ok(())
    }

    async fn delete_ledger_row(&mut self, hash: &str) -> DmutResult<()> {
        let mut state = self.inner.lock();
        state.ledger_statement("delete from ledger")?;
        state.catalog.ledger.retain(|row| row.hash != hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(hash: &str) -> LedgerRow {
        LedgerRow {
            hash: hash.to_string(),
            identifier: hash.to_string(),
            statements: vec![],
            undo: vec![],
            parents: vec![],
            date_applied: None,
        }
    }

    async fn with_ledger() -> MemoryDatabase {
        let mut db = MemoryDatabase::new();
        db.execute(r#"create schema "dmut""#).await.unwrap();
        db.execute(&format!("create table {} (hash text)", LEDGER_TABLE))
            .await
            .unwrap();
        db
    }

    #[test]
    fn comments_and_trailing_semicolon_are_ignored() {
        assert_eq!(
            command_text("drop table\n  app.users; -- @auto"),
            "drop table app.users"
        );
        assert_eq!(command_text("-- nothing to run"), "");
    }

    #[test]
    fn names_fold_like_the_server() {
        assert_eq!(fold_name("App.Users"), "app.users");
        assert_eq!(fold_name(r#""App"."Users""#), "App.Users");
    }

    #[tokio::test]
    async fn create_and_drop_track_objects() {
        let mut db = MemoryDatabase::new();
        db.execute("create table foo.bar(id int)").await.unwrap();
        assert!(db.has_object("table", "foo.bar"));

        let err = db.execute("create table foo.bar (id int)").await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::StatementError);
        assert_eq!(
            err.statement().unwrap().highlighted(),
            "create table >>foo.bar<< (id int)"
        );
        db.execute("create table if not exists foo.bar (id int)")
            .await
            .unwrap();

        db.execute("drop table foo.bar -- @auto").await.unwrap();
        assert!(!db.has_object("table", "foo.bar"));
        assert!(db.execute("drop table foo.bar").await.is_err());
        db.execute("drop table if exists foo.bar").await.unwrap();
    }

    #[tokio::test]
    async fn unqualified_index_takes_the_table_schema() {
        let mut db = MemoryDatabase::new();
        db.execute("create unique index users_email on app.users (email)")
            .await
            .unwrap();
        assert!(db.has_object("index", "app.users_email"));
        db.execute("drop index app.users_email").await.unwrap();
        assert!(db.objects().is_empty());
    }

    #[tokio::test]
    async fn search_path_qualifies_names() {
        let mut db = MemoryDatabase::new();
        db.execute("set search_path to App, public").await.unwrap();
        db.execute("create table users (id int)").await.unwrap();
        db.execute("create index users_id on users (id)").await.unwrap();
        db.execute("create role reader").await.unwrap();
        db.execute("reset search_path").await.unwrap();
        assert_eq!(
            db.objects(),
            vec!["index app.users_id", "role reader", "table app.users"]
        );
        db.execute("drop table users").await.unwrap_err();
        db.execute("drop table app.users").await.unwrap();
    }

    #[tokio::test]
    async fn grants_and_row_security() {
        let mut db = MemoryDatabase::new();
        db.execute("grant usage on schema app to reader with grant option")
            .await
            .unwrap();
        assert_eq!(db.grants(), vec!["usage on schema app to reader"]);
        db.execute("revoke usage on SCHEMA app from reader").await.unwrap();
        assert!(db.grants().is_empty());

        assert!(db
            .execute("alter table t enable row level security")
            .await
            .is_err());
        db.execute("create table t (id int)").await.unwrap();
        db.execute("alter table t enable row level security")
            .await
            .unwrap();
        assert!(db.has_row_security("t"));
    }

    #[tokio::test]
    async fn rollback_restores_the_catalog() {
        let mut db = MemoryDatabase::new();
        db.begin().await.unwrap();
        db.execute("create table a (id int)").await.unwrap();
        assert!(db.in_transaction());
        db.rollback().await.unwrap();
        assert!(!db.in_transaction());
        assert!(db.objects().is_empty());
        assert_eq!(db.rollbacks(), 1);
        assert_eq!(db.commits(), 0);
    }

    #[tokio::test]
    async fn failure_aborts_until_savepoint_rollback() {
        let mut db = MemoryDatabase::new();
        db.begin().await.unwrap();
        db.execute("create table a (id int)").await.unwrap();
        db.savepoint("sp_check").await.unwrap();
        db.execute("drop table a").await.unwrap();
        assert!(db.execute("drop table a").await.is_err());
        assert!(db.execute("select 1").await.is_err());

        db.rollback_to_savepoint("sp_check").await.unwrap();
        db.release_savepoint("sp_check").await.unwrap();
        assert!(db.has_object("table", "a"));
        db.commit().await.unwrap();
        assert_eq!(db.commits(), 1);
        assert!(db.has_object("table", "a"));
    }

    #[tokio::test]
    async fn commit_of_aborted_transaction_rolls_back() {
        let mut db = MemoryDatabase::new();
        db.begin().await.unwrap();
        db.execute("create table a (id int)").await.unwrap();
        db.fail_on("boom");
        assert!(db.execute("select boom").await.is_err());
        db.commit().await.unwrap();
        assert!(db.objects().is_empty());
        assert_eq!(db.rollbacks(), 1);
    }

    #[tokio::test]
    async fn savepoints_need_a_transaction() {
        let mut db = MemoryDatabase::new();
        assert!(db.savepoint("sp_check").await.is_err());
    }

    #[tokio::test]
    async fn injected_failure_reports_position() {
        let mut db = MemoryDatabase::new();
        db.fail_on("users");
        let err = db.execute("create table app.users (id int)").await.unwrap_err();
        let statement = err.statement().unwrap();
        assert_eq!(statement.position(), Some(18));
        assert_eq!(statement.highlighted(), "create table app.>>users<< (id int)");
        assert!(db.objects().is_empty());
    }

    #[tokio::test]
    async fn ledger_follows_its_table() {
        let mut db = MemoryDatabase::new();
        assert!(!db.ledger_exists().await.unwrap());
        assert!(db.insert_ledger_row(&row("a")).await.is_err());

        let mut db = with_ledger().await;
        assert!(db.ledger_exists().await.unwrap());
        db.insert_ledger_row(&row("b")).await.unwrap();
        db.insert_ledger_row(&row("a")).await.unwrap();
        assert!(db.insert_ledger_row(&row("a")).await.is_err());

        let hashes: Vec<String> = db
            .fetch_ledger()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.hash)
            .collect();
        assert_eq!(hashes, vec!["b", "a"]);

        db.delete_ledger_row("b").await.unwrap();
        assert_eq!(db.ledger().len(), 1);

        db.execute(&format!("drop table {}", LEDGER_TABLE)).await.unwrap();
        assert!(db.ledger().is_empty());
        assert!(!db.ledger_exists().await.unwrap());
    }

    #[tokio::test]
    async fn rows_of_one_transaction_share_a_timestamp() {
        let mut db = with_ledger().await;
        db.begin().await.unwrap();
        db.insert_ledger_row(&row("b")).await.unwrap();
        db.insert_ledger_row(&row("a")).await.unwrap();
        db.commit().await.unwrap();
        let rows = db.fetch_ledger().await.unwrap();
        assert_eq!(rows[0].date_applied, rows[1].date_applied);
        assert_eq!(rows[0].hash, "a");
    }

    #[tokio::test]
    async fn clones_share_state() {
        let db = MemoryDatabase::new();
        let mut handle = db.clone();
        handle.execute("create role reader").await.unwrap();
        assert!(db.has_object("role", "reader"));
        assert_eq!(db.journal(), vec!["create role reader"]);
        db.clear_journal();
        assert!(db.journal().is_empty());
    }
}
