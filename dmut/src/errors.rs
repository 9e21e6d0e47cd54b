use backtrace::Backtrace;
use regex::Regex;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::{Arc, LazyLock};

use crate::change_log::ChangeLog;

/// Error kinds for dmut operations
///
/// Each kind describes one category of failure. The first three are raised while
/// the mutation graph is built or checked, before the database is touched. The
/// others are raised while a reconciliation run talks to the database.
///
/// # Examples
///
/// ```rust,ignore
/// use dmut::errors::{DmutError, ErrorKind, DmutResult};
///
/// fn example() -> DmutResult<()> {
///     Err(DmutError::new("unknown parent 'users'", ErrorKind::UnresolvedDependency))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    /// A mutation referenced a parent that was not declared before it
    UnresolvedDependency,
    /// A locked mutation changed, or the lock-closure invariant was broken
    LockViolation,
    /// No auto-reversal rule recognized a statement
    UnrecognizedStatement,
    /// The database rejected a statement
    StatementError,
    /// One or more mutations could not be removed and reapplied
    ReversibilityFailure,
    /// The operation is not valid in the current context
    InvalidOperation,
    /// Error from the database driver (connection, protocol, decoding)
    DatabaseError,
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::UnresolvedDependency => write!(f, "Unresolved dependency"),
            ErrorKind::LockViolation => write!(f, "Lock violation"),
            ErrorKind::UnrecognizedStatement => write!(f, "Unrecognized statement"),
            ErrorKind::StatementError => write!(f, "Statement error"),
            ErrorKind::ReversibilityFailure => write!(f, "Reversibility failure"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::DatabaseError => write!(f, "Database error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[\w$."']+|[^\w\s]+"#).expect("token pattern is valid")
});

/// The statement a database rejected, with the position the server reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementContext {
    statement: String,
    position: Option<usize>,
}

impl StatementContext {
    /// Creates a context for `statement`.
    ///
    /// `position` is the 1-based character offset reported by the server, if any.
    pub fn new(statement: &str, position: Option<usize>) -> Self {
        StatementContext {
            statement: statement.to_string(),
            position,
        }
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    /// Renders the statement with the failing token wrapped in `>>` and `<<`.
    ///
    /// Without a usable position the statement is returned unchanged. When no
    /// token starts at the position, everything from the position onwards is
    /// marked.
    pub fn highlighted(&self) -> String {
        let offset = match self.position.and_then(|p| p.checked_sub(1)) {
            Some(char_index) => match self.statement.char_indices().nth(char_index) {
                Some((byte_index, _)) => byte_index,
                None => return self.statement.clone(),
            },
            None => return self.statement.clone(),
        };

        let (before, after) = self.statement.split_at(offset);
        match TOKEN.find_at(&self.statement, offset) {
            Some(token) if token.start() == offset => format!(
                "{}>>{}<<{}",
                before,
                token.as_str(),
                &self.statement[token.end()..]
            ),
            _ => format!("{}>>{}", before, after),
        }
    }
}

impl Display for StatementContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "On statement:\n  {}", self.highlighted())
    }
}

/// One mutation whose remove/reapply cycle failed during self-testing.
#[derive(Debug, Clone)]
pub struct MutationFailure {
    pub hash: String,
    pub identifier: String,
    pub error: DmutError,
}

impl Display for MutationFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}: {}",
            &self.hash[..self.hash.len().min(8)],
            self.identifier,
            self.error
        )
    }
}

/// Custom dmut error type.
///
/// `DmutError` carries a message, a kind and an optional cause. Errors raised by a
/// reconciliation run also carry diagnostics: the statement the database rejected,
/// the list of mutations that failed self-testing, and the change log written up
/// to the point of failure.
///
/// # Examples
///
/// ```rust,ignore
/// use dmut::errors::{DmutError, ErrorKind};
///
/// let cause = DmutError::new("relation \"users\" does not exist", ErrorKind::StatementError);
/// let err = DmutError::new_with_cause("mutation 'grants' failed", ErrorKind::StatementError, cause);
/// ```
#[derive(Clone)]
pub struct DmutError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<DmutError>>,
    statement: Option<StatementContext>,
    failures: Vec<MutationFailure>,
    change_log: Option<ChangeLog>,
    backtrace: Arc<Backtrace>,
}

impl DmutError {
    /// Creates a new `DmutError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        DmutError {
            message: message.to_string(),
            error_kind,
            cause: None,
            statement: None,
            failures: Vec::new(),
            change_log: None,
            backtrace: Arc::new(Backtrace::new()),
        }
    }

    /// Creates a new `DmutError` wrapping `cause`.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: DmutError) -> Self {
        let mut error = DmutError::new(message, error_kind);
        error.cause = Some(Box::new(cause));
        error
    }

    /// Attaches the statement the database rejected.
    pub fn with_statement(mut self, statement: StatementContext) -> Self {
        self.statement = Some(statement);
        self
    }

    /// Attaches the per-mutation failures of a self-test run.
    pub fn with_failures(mut self, failures: Vec<MutationFailure>) -> Self {
        self.failures = failures;
        self
    }

    /// Attaches the change log of the aborted run.
    pub fn with_change_log(mut self, change_log: ChangeLog) -> Self {
        self.change_log = Some(change_log);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&DmutError> {
        self.cause.as_deref()
    }

    /// The rejected statement, looked up along the cause chain.
    pub fn statement(&self) -> Option<&StatementContext> {
        self.statement
            .as_ref()
            .or_else(|| self.cause.as_ref().and_then(|c| c.statement()))
    }

    pub fn failures(&self) -> &[MutationFailure] {
        &self.failures
    }

    pub fn change_log(&self) -> Option<&ChangeLog> {
        self.change_log.as_ref()
    }
}

impl Display for DmutError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for DmutError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(statement) = &self.statement {
            write!(f, "\n{}", statement)?;
        }
        for failure in &self.failures {
            write!(f, "\n  - {}", failure)?;
        }
        match &self.cause {
            Some(cause) => write!(f, "\nCaused by: {:?}", cause),
            None => write!(f, "\n{:?}", self.backtrace),
        }
    }
}

impl Error for DmutError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for dmut operations.
pub type DmutResult<T> = Result<T, DmutError>;

impl From<sqlx::Error> for DmutError {
    fn from(err: sqlx::Error) -> Self {
        DmutError::new(&format!("Database error: {}", err), ErrorKind::DatabaseError)
    }
}

impl From<std::fmt::Error> for DmutError {
    fn from(err: std::fmt::Error) -> Self {
        DmutError::new(
            &format!("Formatting error: {}", err),
            ErrorKind::InternalError,
        )
    }
}

impl From<String> for DmutError {
    fn from(msg: String) -> Self {
        DmutError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for DmutError {
    fn from(msg: &str) -> Self {
        DmutError::new(msg, ErrorKind::InternalError)
    }
}
