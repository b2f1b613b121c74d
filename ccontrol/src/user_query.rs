//! One user query from SQL text to merged result.

use crate::config::ClientConfig;
use crate::error::{self, Error};
use crate::merging_handler::MergingHandler;
use css::CssFacadeRef;
use data_types::{ChunkQuerySpec, ChunkSpec, JobId, QueryId};
use metric::Registry;
use observability_deps::tracing::{debug, info};
use proto::{FragmentMsg, ScanInfoMsg, ScanTableMsg, TaskMsg};
use qdisp::{Executive, ExecutiveConfig, JobDescription, QueryService, ResourceUnit};
use qproc::QuerySession;
use rproc::{InfileMerger, InfileMergerConfig};
use snafu::ResultExt;
use sql::SqlConnectionRef;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result type of the control layer.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Builds [`UserQuery`] instances over shared service handles.
#[derive(Debug)]
pub struct UserQueryFactory {
    config: ClientConfig,
    css: CssFacadeRef,
    service: Arc<dyn QueryService>,
    result_conn: SqlConnectionRef,
    registry: Arc<Registry>,
    query_seq: AtomicU64,
}

impl UserQueryFactory {
    /// New factory.
    pub fn new(
        config: ClientConfig,
        css: CssFacadeRef,
        service: Arc<dyn QueryService>,
        result_conn: SqlConnectionRef,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            config,
            css,
            service,
            result_conn,
            registry,
            query_seq: AtomicU64::new(1),
        }
    }

    /// Analyze `sql` and stage it against `chunks`. The chunk set normally
    /// comes from intersecting the session's constraints with the chunk
    /// inventory; passing it in keeps the index lookup external.
    pub fn new_user_query(&self, sql: &str, chunks: Vec<ChunkSpec>) -> Result<UserQuery> {
        let query_id = QueryId::new(self.query_seq.fetch_add(1, Ordering::SeqCst));
        let mut session = QuerySession::new(
            Arc::clone(&self.css),
            self.config.default_db.clone(),
            self.config.result_user.clone(),
        );
        session.set_query(sql).context(error::SessionSnafu)?;

        let dominant = session.dominant_db().context(error::SessionSnafu)?;
        if !self.config.db_allowed(&dominant) {
            return error::DbNotAllowedSnafu { db: dominant }.fail();
        }

        // Prune chunks the catalog knows hold no rows.
        let empty = session.empty_chunks().context(error::SessionSnafu)?;
        let pruned: Vec<ChunkSpec> = chunks
            .into_iter()
            .filter(|c| !empty.contains(&c.chunk_id))
            .collect();
        session.add_chunks(pruned);
        session.finalize().context(error::SessionSnafu)?;

        let mut hasher = DefaultHasher::new();
        sql.hash(&mut hasher);
        let target_table = format!("result_{}_{:08x}", query_id, hasher.finish() as u32);
        let fixup = session.make_merge_fixup().context(error::SessionSnafu)?;
        let merger = Arc::new(InfileMerger::new(
            InfileMergerConfig {
                target_table,
                fixup,
            },
            Arc::clone(&self.result_conn),
        ));
        let executive = Executive::new(
            ExecutiveConfig::default(),
            Arc::clone(&self.service),
            &self.registry,
        );
        info!(%query_id, "user query staged");
        Ok(UserQuery {
            user: self.config.result_user.clone(),
            query_id,
            session,
            executive,
            merger,
            submitted: 0,
        })
    }
}

/// A staged query: submit its chunk jobs, join, and collect the result.
#[derive(Debug)]
pub struct UserQuery {
    user: String,
    query_id: QueryId,
    session: QuerySession,
    executive: Arc<Executive>,
    merger: Arc<InfileMerger>,
    submitted: usize,
}

impl UserQuery {
    /// Query identity.
    pub fn id(&self) -> QueryId {
        self.query_id
    }

    /// The executive driving this query.
    pub fn executive(&self) -> &Arc<Executive> {
        &self.executive
    }

    /// Dispatch one job per chunk spec. Returns the job count.
    pub fn submit(&mut self) -> Result<usize> {
        let session_token = self.session.id().to_string();
        let mut count = 0usize;
        for spec in self.session.chunk_query_iter().context(error::SessionSnafu)? {
            let spec = spec.context(error::SessionSnafu)?;
            let job_id = JobId::new(count as i32);
            let request = task_msg(&spec, &self.user, &session_token);
            let handler = Arc::new(MergingHandler::new(Arc::clone(&self.merger)));
            debug!(%job_id, chunk = spec.chunk_id, fragments = request.fragments.len(), "submitting job");
            self.executive.add(
                job_id,
                JobDescription {
                    resource: ResourceUnit::query2(spec.chunk_id),
                    request,
                    handler,
                },
            );
            count += 1;
        }
        self.submitted = count;
        Ok(count)
    }

    /// Wait for every job, then run the merge phase. `Ok(true)` means the
    /// result table is ready; `Ok(false)` means the query failed (errors
    /// are on the executive's accumulator) and no merge ran.
    pub async fn join(&self) -> Result<bool> {
        let ok = self.executive.join().await;
        if !ok {
            info!(query_id = %self.query_id, errors = %self.executive.execution_error(), "query failed");
            return Ok(false);
        }
        self.merger.finalize().context(error::MergeSnafu)?;
        Ok(true)
    }

    /// Cancel the whole query.
    pub fn squash(&self) {
        self.executive.squash();
    }
}

/// Serialize one chunk spec into the wire request, flattening the linked
/// follow-on fragments.
fn task_msg(spec: &ChunkQuerySpec, user: &str, session: &str) -> TaskMsg {
    let mut fragments = Vec::new();
    let mut cursor = Some(spec);
    while let Some(s) = cursor {
        fragments.push(FragmentMsg {
            queries: s.queries.clone(),
            subchunks: s.sub_chunk_ids.clone(),
            result_table: format!("r_{}", s.chunk_id),
        });
        cursor = s.next_fragment.as_deref();
    }
    let scan_info = if spec.scan_info.is_empty() {
        None
    } else {
        Some(ScanInfoMsg {
            scan_rating: spec.scan_info.scan_rating,
            tables: spec
                .scan_info
                .tables
                .iter()
                .map(|t| ScanTableMsg {
                    db: t.db.clone(),
                    table: t.table.clone(),
                })
                .collect(),
        })
    };
    TaskMsg {
        db: spec.db.clone(),
        chunk_id: spec.chunk_id,
        protocol: proto::PROTOCOL_VERSION,
        scan_info,
        fragments,
        user: user.to_string(),
        session: session.to_string(),
        secondary_sort: spec.secondary_sort.clone(),
        subchunk_tables: spec.sub_chunk_tables.clone(),
    }
}
