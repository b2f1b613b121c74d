//! Result processing.
//!
//! [`InfileMerger`] accumulates row bundles streamed back from workers into
//! a partials table on the result database, then applies the session's
//! [`MergeFixup`] to produce the user-visible result table.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use data_types::MergeFixup;
use observability_deps::tracing::{debug, info};
use parking_lot::Mutex;
use proto::RowBundleMsg;
use snafu::{ResultExt, Snafu};
use sql::SqlConnectionRef;

/// Merge failures. All are terminal for the query; the merge phase never
/// retries.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("merge error creating partials table: {source}"))]
    CreatePartials { source: sql::SqlError },

    #[snafu(display("merge error importing rows: {source}"))]
    Import { source: sql::SqlError },

    #[snafu(display("merge error finalizing result: {source}"))]
    Finalize { source: sql::SqlError },

    #[snafu(display("row bundle geometry is inconsistent"))]
    BadBundle,
}

/// Merger result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Where the merged result lands.
#[derive(Debug, Clone)]
pub struct InfileMergerConfig {
    /// Final result table name.
    pub target_table: String,
    /// Fixup rendered by the session.
    pub fixup: MergeFixup,
}

#[derive(Debug, Default)]
struct MergerState {
    table_created: bool,
    columns: Vec<String>,
    imported_rows: u64,
}

/// Accumulates per-chunk rows into `<target>_partials` and finishes with
/// the merge fixup. Safe for concurrent `merge` calls from transport
/// threads; only table creation is serialized.
#[derive(Debug)]
pub struct InfileMerger {
    config: InfileMergerConfig,
    conn: SqlConnectionRef,
    state: Mutex<MergerState>,
}

impl InfileMerger {
    /// New merger writing through `conn`.
    pub fn new(config: InfileMergerConfig, conn: SqlConnectionRef) -> Self {
        Self {
            config,
            conn,
            state: Mutex::new(MergerState::default()),
        }
    }

    fn partials_table(&self) -> String {
        format!("{}_partials", self.config.target_table)
    }

    /// Import one bundle of rows.
    pub fn merge(&self, bundle: &RowBundleMsg) -> Result<()> {
        if bundle.row_width == 0 && !bundle.cells.is_empty() {
            return BadBundleSnafu.fail();
        }
        if bundle.cells.len() != bundle.nulls.len() {
            return BadBundleSnafu.fail();
        }
        let width = bundle.row_width as usize;
        if width != 0 && bundle.cells.len() % width != 0 {
            return BadBundleSnafu.fail();
        }

        // First bundle wins table creation; the column list comes with it.
        {
            let mut state = self.state.lock();
            if !state.table_created {
                let columns = if bundle.columns.is_empty() {
                    (0..width.max(1)).map(|i| format!("c{i}")).collect()
                } else {
                    bundle.columns.clone()
                };
                let decl = columns
                    .iter()
                    .map(|c| format!("`{c}` TEXT"))
                    .collect::<Vec<_>>()
                    .join(",");
                self.conn
                    .run_statement(&format!(
                        "CREATE TABLE IF NOT EXISTS {} ({})",
                        self.partials_table(),
                        decl
                    ))
                    .context(CreatePartialsSnafu)?;
                state.table_created = true;
                state.columns = columns;
            }
        }

        if bundle.cells.is_empty() {
            return Ok(());
        }
        let rows = bundle.row_count();
        let mut values = Vec::with_capacity(rows);
        for r in 0..rows {
            let mut cells = Vec::with_capacity(width);
            for c in 0..width {
                let i = r * width + c;
                if bundle.nulls[i] {
                    cells.push("NULL".to_string());
                } else {
                    cells.push(format!("'{}'", bundle.cells[i].replace('\'', "''")));
                }
            }
            values.push(format!("({})", cells.join(",")));
        }
        self.conn
            .run_statement(&format!(
                "INSERT INTO {} VALUES {}",
                self.partials_table(),
                values.join(",")
            ))
            .context(ImportSnafu)?;

        let mut state = self.state.lock();
        state.imported_rows += rows as u64;
        debug!(rows, total = state.imported_rows, "imported bundle");
        Ok(())
    }

    /// Rows imported so far.
    pub fn imported_rows(&self) -> u64 {
        self.state.lock().imported_rows
    }

    /// Apply the merge fixup over the accumulated partials, producing the
    /// target table, and drop the partials.
    pub fn finalize(&self) -> Result<()> {
        // An untouched merger still produces an (empty) result table.
        {
            let state = self.state.lock();
            if !state.table_created {
                self.conn
                    .run_statement(&format!(
                        "CREATE TABLE IF NOT EXISTS {} (`c0` TEXT)",
                        self.partials_table()
                    ))
                    .context(CreatePartialsSnafu)?;
            }
        }
        let fixup = &self.config.fixup;
        let select = if fixup.needs_merge && !fixup.select.is_empty() {
            fixup.select.clone()
        } else {
            "*".to_string()
        };
        let mut stmt = format!(
            "CREATE TABLE {} SELECT {} FROM {}",
            self.config.target_table,
            select,
            self.partials_table()
        );
        if !fixup.post.is_empty() {
            stmt.push(' ');
            stmt.push_str(&fixup.post);
        }
        self.conn.run_statement(&stmt).context(FinalizeSnafu)?;
        self.conn
            .run_statement(&format!("DROP TABLE IF EXISTS {}", self.partials_table()))
            .context(FinalizeSnafu)?;
        info!(table = %self.config.target_table, "merge finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn bundle(columns: &[&str], rows: &[&[&str]]) -> RowBundleMsg {
        let width = columns.len() as u32;
        RowBundleMsg {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            cells: rows.iter().flat_map(|r| r.iter().map(|s| s.to_string())).collect(),
            nulls: vec![false; rows.len() * columns.len()],
            row_width: width,
        }
    }

    fn merger(fixup: MergeFixup) -> (InfileMerger, Arc<sql::MemSql>) {
        let conn = Arc::new(sql::MemSql::new());
        let dyn_conn: sql::SqlConnectionRef = Arc::clone(&conn) as _;
        let m = InfileMerger::new(
            InfileMergerConfig {
                target_table: "result_q1".into(),
                fixup,
            },
            dyn_conn,
        );
        (m, conn)
    }

    #[test]
    fn concat_merge_without_fixup() {
        let (m, conn) = merger(MergeFixup::default());
        m.merge(&bundle(&["a", "b"], &[&["1", "x"], &["2", "y"]])).unwrap();
        m.merge(&bundle(&["a", "b"], &[&["3", "z"]])).unwrap();
        m.finalize().unwrap();

        let stmts = conn.statements();
        assert!(stmts[0].starts_with("CREATE TABLE IF NOT EXISTS result_q1_partials"));
        assert!(stmts[1].contains("INSERT INTO result_q1_partials VALUES ('1','x'),('2','y')"));
        assert!(stmts[3].contains("CREATE TABLE result_q1 SELECT * FROM result_q1_partials"));
        assert_eq!(m.imported_rows(), 3);
    }

    #[test]
    fn aggregation_fixup_applied() {
        let (m, conn) = merger(MergeFixup {
            select: "SUM(QS1_SUM),(SUM(QS3_SUM)/SUM(QS2_COUNT))".into(),
            post: "GROUP BY chunkId".into(),
            needs_merge: true,
        });
        m.merge(&bundle(&["QS1_SUM", "QS2_COUNT", "QS3_SUM", "chunkId"], &[&["5", "2", "9", "1"]]))
            .unwrap();
        m.finalize().unwrap();
        let last = conn.statements();
        let create = last.iter().find(|s| s.starts_with("CREATE TABLE result_q1 ")).unwrap();
        assert_eq!(
            create,
            "CREATE TABLE result_q1 SELECT SUM(QS1_SUM),(SUM(QS3_SUM)/SUM(QS2_COUNT)) \
             FROM result_q1_partials GROUP BY chunkId"
        );
    }

    #[test]
    fn null_cells_and_quotes_escaped() {
        let (m, conn) = merger(MergeFixup::default());
        let mut b = bundle(&["v"], &[&["it's"]]);
        b.cells.push(String::new());
        b.nulls.push(true);
        m.merge(&b).unwrap();
        let stmts = conn.statements();
        assert!(stmts[1].contains("('it''s'),(NULL)"), "{}", stmts[1]);
    }

    #[test]
    fn inconsistent_bundle_rejected() {
        let (m, _conn) = merger(MergeFixup::default());
        let bad = RowBundleMsg {
            columns: vec!["a".into()],
            cells: vec!["1".into(), "2".into()],
            nulls: vec![false],
            row_width: 1,
        };
        assert_matches!(m.merge(&bad), Err(Error::BadBundle));
    }

    #[test]
    fn merge_error_is_terminal() {
        let (m, conn) = merger(MergeFixup::default());
        conn.fail_on("CREATE TABLE result_q1 ", sql::SqlError::new(1114, "table full"));
        m.merge(&bundle(&["a"], &[&["1"]])).unwrap();
        assert_matches!(m.finalize(), Err(Error::Finalize { .. }));
    }
}
