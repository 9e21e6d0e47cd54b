//! Configuration of a reconciliation run.

/// Default name of the savepoint opened around each self-test iteration.
pub const DEFAULT_SAVEPOINT: &str = "dmut_testing";

/// Options of a [`MutationRunner`](crate::runner::MutationRunner).
///
/// # Examples
///
/// ```rust,ignore
/// use dmut::config::RunnerConfig;
///
/// let config = RunnerConfig::new()
///     .self_test(false)
///     .log_statements(false);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    self_test: bool,
    savepoint_name: String,
    log_statements: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerConfig {
    /// Creates a configuration with self-testing and statement logging enabled.
    pub fn new() -> Self {
        RunnerConfig {
            self_test: true,
            savepoint_name: DEFAULT_SAVEPOINT.to_string(),
            log_statements: true,
        }
    }

    /// Whether every live mutation is removed and reapplied before committing.
    ///
    /// Disabling this skips the reversibility proof. Changes are committed as soon
    /// as they are applied.
    pub fn self_test(mut self, enabled: bool) -> Self {
        self.self_test = enabled;
        self
    }

    /// Name of the savepoint used by the self-test harness.
    ///
    /// An empty name keeps the current one.
    pub fn savepoint_name(mut self, name: &str) -> Self {
        if name.is_empty() {
            log::warn!("Savepoint name cannot be empty, keeping {}", self.savepoint_name);
        } else {
            self.savepoint_name = name.to_string();
        }
        self
    }

    /// Whether executed statements are logged at debug level.
    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    pub fn is_self_test(&self) -> bool {
        self.self_test
    }

    pub fn savepoint(&self) -> &str {
        &self.savepoint_name
    }

    pub fn is_log_statements(&self) -> bool {
        self.log_statements
    }
}
