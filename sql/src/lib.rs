//! Interface to the relational engine workers and the result database sit
//! on. The engine itself is an external collaborator; this crate defines the
//! statement/query surface the core uses plus [`MemSql`], a recording fake
//! for tests.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use parking_lot::Mutex;
use snafu::Snafu;
use std::fmt;
use std::sync::Arc;

/// An engine rejection, carrying the engine's error code so callers can
/// relay it unmodified.
#[derive(Debug, Clone, Snafu)]
#[snafu(display("engine error {code}: {message}"))]
pub struct SqlError {
    /// Engine error code.
    pub code: i32,
    /// Engine error message.
    pub message: String,
}

impl SqlError {
    /// Build from parts.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Result type for engine calls.
pub type Result<T, E = SqlError> = std::result::Result<T, E>;

/// One result row; `None` is SQL NULL.
pub type SqlRow = Vec<Option<String>>;

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlResults {
    /// Column names, in select-list order.
    pub columns: Vec<String>,
    /// Rows.
    pub rows: Vec<SqlRow>,
}

impl SqlResults {
    /// An empty result set.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Connection parameters for a local engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlConfig {
    /// Login user.
    pub user: String,
    /// Default database.
    pub db: String,
    /// Unix socket path of the engine.
    pub socket: String,
}

/// A connection to the local relational engine. Implementations must be safe
/// to share across worker threads.
pub trait SqlConnection: Send + Sync + fmt::Debug {
    /// Execute a statement that returns no rows.
    fn run_statement(&self, stmt: &str) -> Result<()>;

    /// Execute a query and collect its rows.
    fn run_query(&self, stmt: &str) -> Result<SqlResults>;
}

/// Shared connection handle.
pub type SqlConnectionRef = Arc<dyn SqlConnection>;

#[derive(Debug, Default)]
struct MemSqlState {
    statements: Vec<String>,
    canned: Vec<(String, SqlResults)>,
    fail_on: Option<(String, SqlError)>,
}

/// A fake engine that records every statement and serves canned rows.
///
/// Queries are answered by substring match against the canned entries, in
/// insertion order, defaulting to an empty result set. An optional failure
/// trigger rejects any statement containing a marker substring.
#[derive(Debug, Default)]
pub struct MemSql {
    state: Mutex<MemSqlState>,
}

impl MemSql {
    /// New empty fake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `results` for queries containing `pattern`.
    pub fn serve(&self, pattern: impl Into<String>, results: SqlResults) {
        self.state.lock().canned.push((pattern.into(), results));
    }

    /// Reject any statement containing `pattern` with `error`.
    pub fn fail_on(&self, pattern: impl Into<String>, error: SqlError) {
        self.state.lock().fail_on = Some((pattern.into(), error));
    }

    /// Every statement run so far, queries included, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    fn check(&self, stmt: &str) -> Result<()> {
        let state = self.state.lock();
        if let Some((pattern, error)) = &state.fail_on {
            if stmt.contains(pattern.as_str()) {
                return Err(error.clone());
            }
        }
        Ok(())
    }
}

impl SqlConnection for MemSql {
    fn run_statement(&self, stmt: &str) -> Result<()> {
        self.check(stmt)?;
        self.state.lock().statements.push(stmt.to_string());
        Ok(())
    }

    fn run_query(&self, stmt: &str) -> Result<SqlResults> {
        self.check(stmt)?;
        let mut state = self.state.lock();
        state.statements.push(stmt.to_string());
        let found = state
            .canned
            .iter()
            .find(|(pattern, _)| stmt.contains(pattern.as_str()))
            .map(|(_, results)| results.clone());
        Ok(found.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn records_and_serves() {
        let fake = MemSql::new();
        fake.serve(
            "FROM Object",
            SqlResults {
                columns: vec!["objectId".into()],
                rows: vec![vec![Some("42".into())]],
            },
        );

        fake.run_statement("CREATE TABLE t (x INT)").unwrap();
        let rows = fake.run_query("SELECT objectId FROM Object_1234").unwrap();
        assert_eq!(rows.rows.len(), 1);

        let unmatched = fake.run_query("SELECT 1").unwrap();
        assert!(unmatched.rows.is_empty());

        assert_eq!(fake.statements().len(), 3);
    }

    #[test]
    fn failure_trigger() {
        let fake = MemSql::new();
        fake.fail_on("Overlap", SqlError::new(1146, "table missing"));
        assert_matches!(
            fake.run_query("SELECT * FROM ObjectSelfOverlap_77"),
            Err(SqlError { code: 1146, .. })
        );
        assert!(fake.statements().is_empty());
    }
}
