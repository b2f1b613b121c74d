//! Interface to the chunk-metadata catalog.
//!
//! The real catalog is an external service; the query-analysis crates only
//! need the lookups captured by [`CssFacade`]. [`MemCss`] provides the same
//! lookups from in-memory maps for tests and standalone tools.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use data_types::{ChunkId, DbTable};
use snafu::Snafu;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Catalog lookup failures.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("no such database: {db}"))]
    NoSuchDb { db: String },

    #[snafu(display("no such table: {db}.{table}"))]
    NoSuchTable { db: String, table: String },
}

/// Catalog result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Spatial partitioning geometry of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripingParams {
    /// Latitude stripe count.
    pub stripes: i32,
    /// Sub-stripes per stripe.
    pub sub_stripes: i32,
    /// Identifies the partitioning scheme; tables can only be joined on
    /// their partitioning keys when their ids match.
    pub partitioning_id: i32,
}

impl Default for StripingParams {
    fn default() -> Self {
        Self {
            stripes: 18,
            sub_stripes: 10,
            partitioning_id: 1,
        }
    }
}

/// How a table is distributed across workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableKind {
    /// Present in full on every worker.
    Replicated,
    /// Spatially partitioned by (longitude, latitude); sub-chunkable, with
    /// overlap storage.
    Director {
        /// Longitude column.
        lon_col: String,
        /// Latitude column.
        lat_col: String,
        /// Primary key; foreign-key target for child tables.
        key_col: String,
        /// Partitioning scheme id.
        partitioning_id: i32,
    },
    /// Partitioned by a foreign key referencing a director's primary key.
    /// No overlap, not sub-chunkable.
    Child {
        /// The director table the foreign key references.
        director: DbTable,
        /// Foreign-key column.
        key_col: String,
        /// Copy of the referenced position's longitude column.
        lon_col: String,
        /// Copy of the referenced position's latitude column.
        lat_col: String,
    },
    /// N-to-M between two directors of identical partitioning.
    Match {
        /// First director.
        director_a: DbTable,
        /// Second director.
        director_b: DbTable,
        /// Key column referencing `director_a`.
        key_a: String,
        /// Key column referencing `director_b`.
        key_b: String,
    },
}

/// Catalog record for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    /// The table.
    pub name: DbTable,
    /// Distribution kind.
    pub kind: TableKind,
}

impl TableMeta {
    /// True for any partitioned kind.
    pub fn is_chunked(&self) -> bool {
        !matches!(self.kind, TableKind::Replicated)
    }

    /// True when sub-chunk materialization is supported (directors only).
    pub fn is_sub_chunked(&self) -> bool {
        matches!(self.kind, TableKind::Director { .. })
    }
}

/// The catalog lookups the core needs. Implementations must be cheap; the
/// analysis pipeline calls these inline.
pub trait CssFacade: Send + Sync + std::fmt::Debug {
    /// Does the database exist?
    fn contains_db(&self, db: &str) -> bool;

    /// Metadata for a table.
    fn table_meta(&self, db: &str, table: &str) -> Result<TableMeta>;

    /// Partitioning geometry of a database.
    fn striping_params(&self, db: &str) -> Result<StripingParams>;

    /// Chunks known to hold no rows for the database; the dispatcher skips
    /// them.
    fn empty_chunks(&self, db: &str) -> Result<BTreeSet<ChunkId>>;
}

/// Shared handle to a catalog.
pub type CssFacadeRef = Arc<dyn CssFacade>;

#[derive(Debug, Default)]
struct MemDb {
    tables: BTreeMap<String, TableMeta>,
    striping: StripingParams,
    empty_chunks: BTreeSet<ChunkId>,
}

/// In-memory [`CssFacade`] built from explicit entries.
#[derive(Debug, Default)]
pub struct MemCss {
    dbs: BTreeMap<String, MemDb>,
}

impl MemCss {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a database with the given striping; idempotent.
    pub fn add_db(&mut self, db: impl Into<String>, striping: StripingParams) -> &mut Self {
        self.dbs.entry(db.into()).or_default().striping = striping;
        self
    }

    /// Add a table. The database is created with default striping if absent.
    pub fn add_table(&mut self, db: impl Into<String>, table: impl Into<String>, kind: TableKind) -> &mut Self {
        let db = db.into();
        let table = table.into();
        let meta = TableMeta {
            name: DbTable::new(db.clone(), table.clone()),
            kind,
        };
        self.dbs.entry(db).or_default().tables.insert(table, meta);
        self
    }

    /// Record a chunk known to be empty.
    pub fn add_empty_chunk(&mut self, db: &str, chunk_id: ChunkId) -> &mut Self {
        self.dbs.entry(db.to_string()).or_default().empty_chunks.insert(chunk_id);
        self
    }

    /// Finish building.
    pub fn build(self) -> CssFacadeRef {
        Arc::new(self)
    }
}

impl CssFacade for MemCss {
    fn contains_db(&self, db: &str) -> bool {
        self.dbs.contains_key(db)
    }

    fn table_meta(&self, db: &str, table: &str) -> Result<TableMeta> {
        let mem_db = self.dbs.get(db).ok_or_else(|| Error::NoSuchDb { db: db.into() })?;
        mem_db
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| Error::NoSuchTable {
                db: db.into(),
                table: table.into(),
            })
    }

    fn striping_params(&self, db: &str) -> Result<StripingParams> {
        self.dbs
            .get(db)
            .map(|d| d.striping)
            .ok_or_else(|| Error::NoSuchDb { db: db.into() })
    }

    fn empty_chunks(&self, db: &str) -> Result<BTreeSet<ChunkId>> {
        self.dbs
            .get(db)
            .map(|d| d.empty_chunks.clone())
            .ok_or_else(|| Error::NoSuchDb { db: db.into() })
    }
}

/// A catalog preloaded with the conventional test layout: an `Object`
/// director, a `Source` child, and a replicated `Filter` in database `LSST`.
pub fn lsst_test_css() -> CssFacadeRef {
    let mut css = MemCss::new();
    css.add_db("LSST", StripingParams::default())
        .add_table(
            "LSST",
            "Object",
            TableKind::Director {
                lon_col: "ra_PS".into(),
                lat_col: "decl_PS".into(),
                key_col: "objectId".into(),
                partitioning_id: 1,
            },
        )
        .add_table(
            "LSST",
            "Source",
            TableKind::Child {
                director: DbTable::new("LSST", "Object"),
                key_col: "objectId".into(),
                lon_col: "raObject".into(),
                lat_col: "declObject".into(),
            },
        )
        .add_table("LSST", "Filter", TableKind::Replicated);
    css.build()
}
