//! Analysis errors.

use query::RestrictorError;
use snafu::Snafu;

/// A semantic problem detected by the plugin pipeline. Any of these leaves
/// the session in an error state; iteration is not permitted afterwards.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AnalysisError {
    #[snafu(display("no such database: {db}"))]
    UnknownDb { db: String },

    #[snafu(display("no such table: {db}.{table}"))]
    UnknownTable { db: String, table: String },

    #[snafu(display("duplicate output alias {alias:?}"))]
    DuplicateSelectAlias { alias: String },

    #[snafu(display(
        "table {db}.{table} is outside the dominant chunked database {dominant}"
    ))]
    DominantDbMismatch {
        db: String,
        table: String,
        dominant: String,
    },

    #[snafu(display(
        "tables {a} and {b} have different partitionings and cannot be joined"
    ))]
    MismatchedPartitionings { a: String, b: String },

    #[snafu(display("match table {table} references missing or non-director table"))]
    BadMatchTable { table: String },

    #[snafu(display("child table {table} references missing or non-director table"))]
    BadChildTable { table: String },

    #[snafu(display("column {column:?} must be qualified when FROM lists several tables"))]
    AmbiguousColumn { column: String },

    #[snafu(display("column reference {column} does not match any FROM entry"))]
    UnresolvedColumn { column: String },

    #[snafu(display("restrictor must be a top-level conjunct of WHERE"))]
    RestrictorPlacement,

    #[snafu(display("bad restrictor: {source}"))]
    Restrictor { source: RestrictorError },

    #[snafu(display("cannot sub-chunk a join of more than two partitioned tables"))]
    TooManySubChunkedTables,

    #[snafu(display("table {table} cannot participate in a sub-chunked join"))]
    NotSubChunkable { table: String },

    #[snafu(display("internal query-processing bug: {message}"))]
    Bug { message: String },
}
