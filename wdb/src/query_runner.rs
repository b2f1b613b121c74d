//! Per-task fragment execution.

use crate::chunk_resource::{ChunkResourceMgr, ResourceError};
use crate::query_sql::{split_into_pieces, PIECE_TARGET_BYTES};
use observability_deps::tracing::{debug, info, warn};
use proto::{ResponseSummaryMsg, RowBundleMsg};
use sql::SqlConnectionRef;
use std::sync::Arc;
use wbase::Task;

/// Execution tuning.
#[derive(Debug, Clone)]
pub struct QueryRunnerConfig {
    /// Statement-piece size target.
    pub piece_target_bytes: usize,
    /// Rows per streamed bundle.
    pub bundle_rows: usize,
}

impl Default for QueryRunnerConfig {
    fn default() -> Self {
        Self {
            piece_target_bytes: PIECE_TARGET_BYTES,
            bundle_rows: 4096,
        }
    }
}

/// Error code used in the final envelope for a cancelled task.
const CANCELLED_CODE: i32 = -1;

/// Runs one task's fragments against the local engine and streams the rows
/// back on the task's reply channel.
#[derive(Debug)]
pub struct QueryRunner {
    task: Arc<Task>,
    mgr: Arc<ChunkResourceMgr>,
    conn: SqlConnectionRef,
    config: QueryRunnerConfig,
}

struct RunFailure {
    code: i32,
    message: String,
}

impl QueryRunner {
    /// Build a runner for `task`.
    pub fn new(
        task: Arc<Task>,
        mgr: Arc<ChunkResourceMgr>,
        conn: SqlConnectionRef,
        config: QueryRunnerConfig,
    ) -> Self {
        Self {
            task,
            mgr,
            conn,
            config,
        }
    }

    /// Execute the task to completion, always closing the reply channel
    /// with a final envelope. Returns `true` on success.
    pub fn run(&self) -> bool {
        match self.run_inner() {
            Ok(rows) => {
                debug!(chunk_id = self.task.chunk_id, rows, "task complete");
                self.task.send_channel().send_summary(ResponseSummaryMsg {
                    error_code: 0,
                    error_msg: String::new(),
                    row_count: rows,
                });
                true
            }
            Err(failure) => {
                warn!(
                    chunk_id = self.task.chunk_id,
                    code = failure.code,
                    message = %failure.message,
                    "task failed"
                );
                self.task.send_channel().send_summary(ResponseSummaryMsg {
                    error_code: failure.code,
                    error_msg: failure.message,
                    row_count: 0,
                });
                false
            }
        }
    }

    fn run_inner(&self) -> Result<u64, RunFailure> {
        let task = &self.task;
        let sub_chunks = task.all_subchunks();

        // Stage sub-chunks first; the guard releases the references even
        // if a fragment fails below.
        let _resource = if sub_chunks.is_empty() {
            None
        } else {
            info!(
                chunk_id = task.chunk_id,
                sub_chunks = sub_chunks.len(),
                tables = task.subchunk_tables.len(),
                "acquiring sub-chunk resources"
            );
            Some(
                self.mgr
                    .acquire(&task.db, task.chunk_id, &task.subchunk_tables, &sub_chunks)
                    .map_err(|e| match e {
                        ResourceError::Staging { source } => RunFailure {
                            code: source.code,
                            message: source.message,
                        },
                        other => RunFailure {
                            code: -2,
                            message: other.to_string(),
                        },
                    })?,
            )
        };

        let mut total_rows: u64 = 0;
        for fragment in &task.fragments {
            for query in &fragment.queries {
                for piece in split_into_pieces(query, self.config.piece_target_bytes) {
                    if task.is_poisoned() {
                        return Err(RunFailure {
                            code: CANCELLED_CODE,
                            message: "cancelled".into(),
                        });
                    }
                    let mut results = self.conn.run_query(&piece).map_err(|e| RunFailure {
                        code: e.code,
                        message: e.message,
                    })?;
                    self.apply_secondary_sort(&mut results);
                    total_rows += self.stream(results)?;
                }
            }
        }
        Ok(total_rows)
    }

    /// Order a result set by the requested secondary-sort column, when the
    /// column is present, so response batches stream deterministically.
    fn apply_secondary_sort(&self, results: &mut sql::SqlResults) {
        let Some(sort_col) = &self.task.secondary_sort else {
            return;
        };
        let Some(idx) = results.columns.iter().position(|c| c == sort_col) else {
            return;
        };
        results
            .rows
            .sort_by(|a, b| a.get(idx).cmp(&b.get(idx)));
    }

    /// Stream a result set as bounded row bundles.
    fn stream(&self, results: sql::SqlResults) -> Result<u64, RunFailure> {
        if results.rows.is_empty() {
            return Ok(0);
        }
        let width = results.columns.len().max(1);
        let mut sent: u64 = 0;
        for (i, chunk_of_rows) in results.rows.chunks(self.config.bundle_rows).enumerate() {
            let mut cells = Vec::with_capacity(chunk_of_rows.len() * width);
            let mut nulls = Vec::with_capacity(chunk_of_rows.len() * width);
            for row in chunk_of_rows {
                for c in 0..width {
                    match row.get(c).and_then(|v| v.as_ref()) {
                        Some(v) => {
                            cells.push(v.clone());
                            nulls.push(false);
                        }
                        None => {
                            cells.push(String::new());
                            nulls.push(true);
                        }
                    }
                }
            }
            let bundle = RowBundleMsg {
                // Column names ride on the first bundle only.
                columns: if i == 0 {
                    results.columns.clone()
                } else {
                    vec![]
                },
                cells,
                nulls,
                row_width: width as u32,
            };
            sent += chunk_of_rows.len() as u64;
            if !self.task.send_channel().send_bundle(bundle) {
                return Err(RunFailure {
                    code: CANCELLED_CODE,
                    message: "reply channel closed".into(),
                });
            }
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_resource::{BackendRef, SqlBackend};
    use proto::{FragmentMsg, TaskMsg};
    use std::sync::Arc;
    use wbase::{MemSendChannel, SendChannelRef};

    fn runner_parts(
        msg: &TaskMsg,
        conn: Arc<sql::MemSql>,
    ) -> (QueryRunner, Arc<MemSendChannel>) {
        let channel = Arc::new(MemSendChannel::new());
        let dyn_channel: SendChannelRef = Arc::clone(&channel) as _;
        let task = Task::new(msg, dyn_channel);
        let dyn_conn: SqlConnectionRef = Arc::clone(&conn) as _;
        let backend: BackendRef = Arc::new(SqlBackend::new(Arc::clone(&dyn_conn)));
        let mgr = ChunkResourceMgr::new(backend);
        (
            QueryRunner::new(task, mgr, dyn_conn, QueryRunnerConfig::default()),
            channel,
        )
    }

    fn plain_msg(query: &str) -> TaskMsg {
        TaskMsg {
            db: "LSST".into(),
            chunk_id: 42,
            protocol: proto::PROTOCOL_VERSION,
            fragments: vec![FragmentMsg {
                queries: vec![query.into()],
                subchunks: vec![],
                result_table: "r_42".into(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn streams_rows_and_success_summary() {
        let conn = Arc::new(sql::MemSql::new());
        conn.serve(
            "FROM LSST.Object_42",
            sql::SqlResults {
                columns: vec!["objectId".into()],
                rows: vec![vec![Some("1".into())], vec![None]],
            },
        );
        let (runner, channel) = runner_parts(
            &plain_msg("SELECT objectId FROM LSST.Object_42"),
            conn,
        );
        assert!(runner.run());

        let bundles = channel.bundles();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].row_count(), 2);
        assert_eq!(bundles[0].nulls, vec![false, true]);
        let summary = channel.summary().unwrap();
        assert!(summary.success());
        assert_eq!(summary.row_count, 2);
    }

    #[test]
    fn engine_error_propagates_code() {
        let conn = Arc::new(sql::MemSql::new());
        conn.fail_on("Object_42", sql::SqlError::new(1064, "syntax"));
        let (runner, channel) = runner_parts(
            &plain_msg("SELECT * FROM LSST.Object_42"),
            conn,
        );
        assert!(!runner.run());
        let summary = channel.summary().unwrap();
        assert_eq!(summary.error_code, 1064);
        assert!(summary.error_msg.contains("syntax"));
    }

    #[test]
    fn poisoned_task_aborts_between_pieces() {
        let conn = Arc::new(sql::MemSql::new());
        let msg = plain_msg("SELECT 1");
        let channel = Arc::new(MemSendChannel::new());
        let dyn_channel: SendChannelRef = Arc::clone(&channel) as _;
        let task = Task::new(&msg, dyn_channel);
        task.poison();
        let dyn_conn: SqlConnectionRef = Arc::clone(&conn) as _;
        let backend: BackendRef = Arc::new(SqlBackend::new(Arc::clone(&dyn_conn)));
        let runner = QueryRunner::new(
            task,
            ChunkResourceMgr::new(backend),
            dyn_conn,
            QueryRunnerConfig::default(),
        );
        assert!(!runner.run());
        assert_eq!(channel.summary().unwrap().error_code, CANCELLED_CODE);
        // The poisoned task never reached the engine.
        assert!(conn.statements().is_empty());
    }

    #[test]
    fn secondary_sort_orders_streamed_rows() {
        let conn = Arc::new(sql::MemSql::new());
        conn.serve(
            "FROM LSST.Object_42",
            sql::SqlResults {
                columns: vec!["objectId".into()],
                rows: vec![
                    vec![Some("3".into())],
                    vec![Some("1".into())],
                    vec![Some("2".into())],
                ],
            },
        );
        let mut msg = plain_msg("SELECT objectId FROM LSST.Object_42");
        msg.secondary_sort = Some("objectId".into());
        let (runner, channel) = runner_parts(&msg, conn);
        assert!(runner.run());
        assert_eq!(channel.bundles()[0].cells, ["1", "2", "3"]);
    }

    #[test]
    fn sub_chunked_task_stages_and_releases() {
        let conn = Arc::new(sql::MemSql::new());
        let msg = TaskMsg {
            db: "LSST".into(),
            chunk_id: 7,
            protocol: proto::PROTOCOL_VERSION,
            subchunk_tables: vec!["Object".into()],
            fragments: vec![FragmentMsg {
                queries: vec![
                    "SELECT count(*) FROM Subchunks_LSST_7.Object_7_1 AS o1".into(),
                ],
                subchunks: vec![1],
                result_table: "r_7".into(),
            }],
            ..Default::default()
        };
        let (runner, channel) = runner_parts(&msg, Arc::clone(&conn));
        assert!(runner.run());
        assert!(channel.summary().unwrap().success());

        let stmts = conn.statements();
        assert!(
            stmts[0].starts_with("CREATE TABLE IF NOT EXISTS Subchunks_LSST_7.Object_7_1"),
            "{stmts:?}"
        );
        assert!(stmts[1].contains("SELECT count(*)"), "{stmts:?}");
    }
}
