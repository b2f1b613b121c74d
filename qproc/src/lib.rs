//! The query session.
//!
//! [`QuerySession`] owns one user query end to end on the analysis side:
//! it parses the text, drives the plugin pipeline, accepts the runnable
//! chunk set, and hands out one [`ChunkQuerySpec`] per chunk through a
//! forward iterator. Either `set_query` leaves the session valid and ready
//! for iteration, or the session is in an error state and iteration is
//! refused.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use css::CssFacadeRef;
use data_types::{
    ChunkQuerySpec, ChunkSpec, ChunkSpecFragmenter, ChunkSpecSingle, MergeFixup, ScanInfo,
};
use observability_deps::tracing::{debug, info};
use qana::{default_pipeline, Plan, QueryContext, QueryPlugin};
use query::{QsRestrictor, QueryTemplate, SelectStmt, ValueFactor};
use snafu::{ResultExt, Snafu};
use uuid::Uuid;

/// Session failures: the frontend rejecting the text, or the analysis
/// pipeline rejecting its meaning.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("parse error: {source}"))]
    Parse { source: query_parser::Error },

    #[snafu(display("analysis error: {source}"))]
    Analysis { source: qana::AnalysisError },

    #[snafu(display("catalog error: {source}"))]
    Catalog { source: css::Error },

    #[snafu(display("session is in an error state: {message}"))]
    InvalidSession { message: String },

    #[snafu(display("query-processing bug: {message}"))]
    Bug { message: String },
}

/// Session result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Analysis state for one user query.
#[derive(Debug)]
pub struct QuerySession {
    css: CssFacadeRef,
    default_db: String,
    username: String,
    session_id: Uuid,
    original: String,
    stmt: Option<SelectStmt>,
    stmt_parallel: Vec<SelectStmt>,
    stmt_merge: Option<SelectStmt>,
    context: Option<QueryContext>,
    plugins: Vec<Box<dyn QueryPlugin>>,
    chunks: Vec<ChunkSpec>,
    error: Option<String>,
    is_final: bool,
    is_dummy: bool,
}

impl QuerySession {
    /// New session bound to a catalog.
    pub fn new(css: CssFacadeRef, default_db: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            css,
            default_db: default_db.into(),
            username: username.into(),
            session_id: Uuid::new_v4(),
            original: String::new(),
            stmt: None,
            stmt_parallel: vec![],
            stmt_merge: None,
            context: None,
            plugins: vec![],
            chunks: vec![],
            error: None,
            is_final: false,
            is_dummy: false,
        }
    }

    /// Session identity, used to derive result table names.
    pub fn id(&self) -> Uuid {
        self.session_id
    }

    /// The last error recorded by `set_query`, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Parse `text` and run the plugin pipeline. All-or-nothing: on error
    /// the session records it and refuses iteration.
    pub fn set_query(&mut self, text: &str) -> Result<()> {
        self.reset();
        self.original = text.to_string();
        match self.analyze(text) {
            Ok(()) => {
                info!(session = %self.session_id, "query accepted");
                Ok(())
            }
            Err(e) => {
                self.error = Some(e.to_string());
                self.stmt = None;
                self.stmt_parallel.clear();
                self.stmt_merge = None;
                Err(e)
            }
        }
    }

    fn analyze(&mut self, text: &str) -> Result<()> {
        let mut stmt = query_parser::parse_select(text).context(ParseSnafu)?;
        let mut context = QueryContext::new(
            self.default_db.clone(),
            self.username.clone(),
            std::sync::Arc::clone(&self.css),
        );
        let mut plugins = default_pipeline();
        for p in &mut plugins {
            p.prepare().context(AnalysisSnafu)?;
        }
        for p in &mut plugins {
            p.apply_logical(&mut stmt, &mut context)
                .context(AnalysisSnafu)?;
        }

        // Concrete plan: one parallel copy to instantiate per chunk, plus
        // the merge skeleton.
        let mut stmt_parallel = vec![stmt.clone()];
        let mut stmt_merge = stmt.copy_merge();
        for p in &mut plugins {
            p.apply_physical(
                Plan {
                    stmt_original: &stmt,
                    stmt_parallel: &mut stmt_parallel,
                    stmt_merge: &mut stmt_merge,
                },
                &mut context,
            )
            .context(AnalysisSnafu)?;
        }

        self.stmt = Some(stmt);
        self.stmt_parallel = stmt_parallel;
        self.stmt_merge = Some(stmt_merge);
        self.context = Some(context);
        self.plugins = plugins;
        Ok(())
    }

    /// Drop all per-query state; the session can accept a new query.
    pub fn reset(&mut self) {
        self.original.clear();
        self.stmt = None;
        self.stmt_parallel.clear();
        self.stmt_merge = None;
        self.context = None;
        self.plugins = vec![];
        self.chunks.clear();
        self.error = None;
        self.is_final = false;
        self.is_dummy = false;
    }

    fn context(&self) -> Result<&QueryContext> {
        if let Some(e) = &self.error {
            return InvalidSessionSnafu { message: e.clone() }.fail();
        }
        self.context.as_ref().ok_or_else(|| Error::InvalidSession {
            message: "no query set".into(),
        })
    }

    /// Append one runnable chunk.
    pub fn add_chunk(&mut self, spec: ChunkSpec) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.chunk_count += 1;
        }
        self.chunks.push(spec);
    }

    /// Append several runnable chunks.
    pub fn add_chunks(&mut self, specs: impl IntoIterator<Item = ChunkSpec>) {
        for s in specs {
            self.add_chunk(s);
        }
    }

    /// Restrictors for the caller's chunk-set computation.
    pub fn get_constraints(&self) -> Result<Vec<QsRestrictor>> {
        Ok(self.context()?.restrictors.clone())
    }

    /// Does the plan touch chunked tables?
    pub fn has_chunks(&self) -> Result<bool> {
        Ok(self.context()?.has_chunks())
    }

    /// Does the plan need sub-chunk staging?
    pub fn has_sub_chunks(&self) -> Result<bool> {
        Ok(self.context()?.has_sub_chunks())
    }

    /// Does the query need a merge phase?
    pub fn needs_merge(&self) -> Result<bool> {
        Ok(self.context()?.needs_merge)
    }

    /// The chunked database the query runs over.
    pub fn dominant_db(&self) -> Result<String> {
        Ok(self.context()?.dominant_db.clone())
    }

    /// Chunks the catalog knows to be empty for the dominant database;
    /// the caller prunes these from the runnable set.
    pub fn empty_chunks(&self) -> Result<std::collections::BTreeSet<data_types::ChunkId>> {
        let ctx = self.context()?;
        if ctx.dominant_db.is_empty() || !self.css.contains_db(&ctx.dominant_db) {
            return Ok(Default::default());
        }
        self.css.empty_chunks(&ctx.dominant_db).context(CatalogSnafu)
    }

    /// The merge statement, present only when a merge phase is needed.
    pub fn merge_stmt(&self) -> Result<Option<&SelectStmt>> {
        if self.context()?.needs_merge {
            Ok(self.stmt_merge.as_ref())
        } else {
            Ok(None)
        }
    }

    /// Render the merge fixup applied by the result merger.
    pub fn make_merge_fixup(&self) -> Result<MergeFixup> {
        let merge = self.stmt_merge.as_ref().ok_or_else(|| Error::Bug {
            message: "merge fixup requested before set_query".into(),
        })?;
        let ctx = self.context()?;
        Ok(MergeFixup {
            select: merge.select_list.to_string(),
            post: merge.post_template().to_string(),
            needs_merge: ctx.needs_merge,
        })
    }

    /// Run the plugins' final pass, then backstop an empty chunk set with
    /// the dummy chunk so chunk-independent statements still execute once.
    pub fn finalize(&mut self) -> Result<()> {
        if self.is_final {
            return Ok(());
        }
        self.context()?;
        let Some(mut context) = self.context.take() else {
            return BugSnafu {
                message: "context vanished during finalize",
            }
            .fail();
        };
        let result = (|| {
            for p in &mut self.plugins {
                p.apply_final(&mut context).context(AnalysisSnafu)?;
            }
            Ok(())
        })();
        self.context = Some(context);
        result?;
        if self.chunks.is_empty() {
            self.set_dummy();
        }
        self.is_final = true;
        Ok(())
    }

    fn set_dummy(&mut self) {
        debug!("no chunks; injecting dummy chunk");
        self.is_dummy = true;
        if let Some(ctx) = self.context.as_mut() {
            ctx.chunk_count = 1;
        }
        self.chunks.clear();
        self.chunks.push(ChunkSpec::new(
            data_types::DUMMY_CHUNK_ID,
            vec![data_types::DUMMY_SUB_CHUNK_ID],
        ));
    }

    /// Was the dummy chunk injected?
    pub fn is_dummy(&self) -> bool {
        self.is_dummy
    }

    /// The runnable chunk set.
    pub fn chunks(&self) -> &[ChunkSpec] {
        &self.chunks
    }

    /// Forward iterator over per-chunk query specs. `finalize` must have
    /// run.
    pub fn chunk_query_iter(&self) -> Result<ChunkQuerySpecIter<'_>> {
        self.context()?;
        if !self.is_final {
            return BugSnafu {
                message: "iteration before finalize",
            }
            .fail();
        }
        Ok(ChunkQuerySpecIter {
            session: self,
            pos: 0,
        })
    }

    /// Column the workers should sort response batches by, when the user
    /// ordered by a plain column.
    fn secondary_sort(&self) -> Option<String> {
        let order_by = self.stmt.as_ref()?.order_by.as_ref()?;
        let first = order_by.terms.first()?;
        match first.expr.single_factor()? {
            ValueFactor::Column(c) => Some(c.column.clone()),
            _ => None,
        }
    }

    fn templates(&self) -> Vec<QueryTemplate> {
        self.stmt_parallel.iter().map(|s| s.query_template()).collect()
    }

    /// Concrete SQL for one chunk piece.
    fn build_chunk_queries(&self, spec: &ChunkSpec) -> Result<Vec<String>> {
        let ctx = self.context()?;
        let templates = self.templates();
        if templates.is_empty() {
            return BugSnafu {
                message: "no parallel statement to instantiate",
            }
            .fail();
        }
        let mapping = &ctx.query_mapping;
        let mut queries = Vec::new();
        if !mapping.has_sub_chunks() {
            for t in &templates {
                queries.push(mapping.apply(spec, t).context(AnalysisSnafu)?);
            }
        } else {
            let singles = ChunkSpecSingle::make_vec(spec).map_err(|e| Error::Bug {
                message: e.to_string(),
            })?;
            for single in singles {
                for t in &templates {
                    queries.push(mapping.apply_single(single, t));
                }
            }
        }
        Ok(queries)
    }

    fn build_spec(&self, spec: &ChunkSpec) -> Result<ChunkQuerySpec> {
        let ctx = self.context()?;
        let scan_info = ScanInfo {
            scan_rating: ctx.scan_rating,
            tables: ctx.scan_tables.clone(),
        };
        let sub_chunk_tables: Vec<String> =
            ctx.query_mapping.sub_chunk_tables().iter().cloned().collect();

        let (head, tail) = if ctx.has_sub_chunks() && spec.should_split() {
            let mut pieces = ChunkSpecFragmenter::new(spec.clone());
            let head = pieces.next().ok_or_else(|| Error::Bug {
                message: "fragmenter yielded nothing".into(),
            })?;
            (head, pieces.collect::<Vec<_>>())
        } else {
            (spec.clone(), vec![])
        };

        // Follow-on fragments link off the first spec, innermost last.
        let mut next_fragment = None;
        for piece in tail.into_iter().rev() {
            next_fragment = Some(Box::new(ChunkQuerySpec {
                db: ctx.dominant_db.clone(),
                chunk_id: piece.chunk_id,
                queries: self.build_chunk_queries(&piece)?,
                sub_chunk_ids: piece.sub_chunks.clone(),
                sub_chunk_tables: sub_chunk_tables.clone(),
                scan_info: scan_info.clone(),
                secondary_sort: self.secondary_sort(),
                next_fragment,
            }));
        }

        Ok(ChunkQuerySpec {
            db: ctx.dominant_db.clone(),
            chunk_id: head.chunk_id,
            queries: self.build_chunk_queries(&head)?,
            sub_chunk_ids: head.sub_chunks.clone(),
            sub_chunk_tables,
            scan_info,
            secondary_sort: self.secondary_sort(),
            next_fragment,
        })
    }
}

/// Pull-based forward iterator over chunk query specs; not restartable
/// after the session resets.
#[derive(Debug)]
pub struct ChunkQuerySpecIter<'a> {
    session: &'a QuerySession,
    pos: usize,
}

impl Iterator for ChunkQuerySpecIter<'_> {
    type Item = Result<ChunkQuerySpec>;

    fn next(&mut self) -> Option<Self::Item> {
        let spec = self.session.chunks.get(self.pos)?;
        self.pos += 1;
        Some(self.session.build_spec(spec))
    }
}
