//! Ambient state shared across the plugin pipeline.

use crate::mapping::QueryMapping;
use crate::table_info::TableInfoPool;
use css::CssFacadeRef;
use data_types::DbTable;
use query::QsRestrictor;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// State a plugin may consult or mutate. Created when a session accepts a
/// query, dropped when the session resets.
#[derive(Debug)]
pub struct QueryContext {
    /// Database unqualified tables resolve against.
    pub default_db: String,
    /// The chunked database this query runs over; empty until the table
    /// plugin finds a chunked table.
    pub dominant_db: String,
    /// Requesting user.
    pub username: String,
    /// Restrictors extracted from WHERE.
    pub restrictors: Vec<QsRestrictor>,
    /// Number of chunks added to the session so far.
    pub chunk_count: usize,
    /// Set when the query needs a merge phase (aggregation, DISTINCT,
    /// grouping).
    pub needs_merge: bool,
    /// Partitioned tables classified as shared-scan targets.
    pub scan_tables: Vec<DbTable>,
    /// Scan cost rating for the worker scheduler.
    pub scan_rating: i32,
    /// Placeholder bookkeeping for chunk instantiation.
    pub query_mapping: QueryMapping,
    /// Alias assigned by the table plugin -> table it names.
    pub table_aliases: BTreeMap<String, DbTable>,
    /// Every database the query references.
    pub referenced_dbs: BTreeSet<String>,
    /// Classification cache over the catalog.
    pub table_info: TableInfoPool,
    /// Catalog handle.
    pub css: CssFacadeRef,
}

impl QueryContext {
    /// Fresh context for one query.
    pub fn new(default_db: impl Into<String>, username: impl Into<String>, css: CssFacadeRef) -> Self {
        Self {
            default_db: default_db.into(),
            dominant_db: String::new(),
            username: username.into(),
            restrictors: vec![],
            chunk_count: 0,
            needs_merge: false,
            scan_tables: vec![],
            scan_rating: 0,
            query_mapping: QueryMapping::new(),
            table_aliases: BTreeMap::new(),
            referenced_dbs: BTreeSet::new(),
            table_info: TableInfoPool::new(Arc::clone(&css)),
            css,
        }
    }

    /// Does the statement touch any chunked table?
    pub fn has_chunks(&self) -> bool {
        self.query_mapping.has_chunks()
    }

    /// Does the statement need sub-chunk staging?
    pub fn has_sub_chunks(&self) -> bool {
        self.query_mapping.has_sub_chunks()
    }

    /// Does the query reference `db`?
    pub fn contains_db(&self, db: &str) -> bool {
        self.referenced_dbs.contains(db)
    }

    /// Alias -> table lookup.
    pub fn table_for_alias(&self, alias: &str) -> Option<&DbTable> {
        self.table_aliases.get(alias)
    }
}
