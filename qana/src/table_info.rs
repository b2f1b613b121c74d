//! Resolved table metadata for the analysis pipeline.

use crate::error::{self, AnalysisError};
use crate::Result;
use css::{CssFacadeRef, TableKind};
use data_types::DbTable;
use query::{CHUNK_TAG, SUBCHUNK_TAG};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metadata for a director table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirTableInfo {
    pub db: String,
    pub table: String,
    /// Primary key column; foreign-key target of children and matches.
    pub pk: String,
    pub lon: String,
    pub lat: String,
    pub partitioning_id: i32,
}

/// Classified metadata for a partitioned table. Replicated tables never get
/// a `TableInfo`; query analysis has nothing to do for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableInfo {
    /// A spatially-partitioned director.
    Director(Arc<DirTableInfo>),
    /// A child keyed into `director`.
    Child {
        db: String,
        table: String,
        director: Arc<DirTableInfo>,
        fk: String,
        lon: String,
        lat: String,
    },
    /// An N-to-M match between two directors of one partitioning.
    Match {
        db: String,
        table: String,
        director_a: Arc<DirTableInfo>,
        director_b: Arc<DirTableInfo>,
        fk_a: String,
        fk_b: String,
    },
}

impl TableInfo {
    /// Owning database.
    pub fn db(&self) -> &str {
        match self {
            Self::Director(d) => &d.db,
            Self::Child { db, .. } | Self::Match { db, .. } => db,
        }
    }

    /// Table name.
    pub fn table(&self) -> &str {
        match self {
            Self::Director(d) => &d.table,
            Self::Child { table, .. } | Self::Match { table, .. } => table,
        }
    }

    /// Spatial columns usable for restrictor predicates, when the table has
    /// a position.
    pub fn spatial_columns(&self) -> Option<(&str, &str)> {
        match self {
            Self::Director(d) => Some((&d.lon, &d.lat)),
            Self::Child { lon, lat, .. } => Some((lon, lat)),
            Self::Match { .. } => None,
        }
    }

    /// The key column an objectId restrictor binds to, when one exists.
    pub fn key_column(&self) -> Option<&str> {
        match self {
            Self::Director(d) => Some(&d.pk),
            Self::Child { fk, .. } => Some(fk),
            Self::Match { .. } => None,
        }
    }

    /// True for tables whose sub-chunks can be materialized on demand.
    pub fn is_sub_chunkable(&self) -> bool {
        matches!(self, Self::Director(_))
    }

    /// `<table>_<CHUNK_TAG>`.
    pub fn chunk_template(&self) -> String {
        format!("{}_{}", self.table(), CHUNK_TAG)
    }

    /// `Subchunks_<db>_<CHUNK_TAG>`, the scratch database sub-chunk tables
    /// are materialized into.
    pub fn sub_chunk_db_template(&self) -> String {
        format!("Subchunks_{}_{}", self.db(), CHUNK_TAG)
    }

    /// `<table>_<CHUNK_TAG>_<SUBCHUNK_TAG>`.
    pub fn sub_chunk_template(&self) -> String {
        format!("{}_{}_{}", self.table(), CHUNK_TAG, SUBCHUNK_TAG)
    }

    /// `<table>FullOverlap_<CHUNK_TAG>_<SUBCHUNK_TAG>`.
    pub fn overlap_template(&self) -> String {
        format!("{}FullOverlap_{}_{}", self.table(), CHUNK_TAG, SUBCHUNK_TAG)
    }
}

/// Memoized classification of referenced tables, with the structural
/// invariants between directors, children and matches enforced on first
/// lookup.
#[derive(Debug)]
pub struct TableInfoPool {
    css: CssFacadeRef,
    cache: BTreeMap<DbTable, Option<Arc<TableInfo>>>,
}

impl TableInfoPool {
    /// New pool over a catalog handle.
    pub fn new(css: CssFacadeRef) -> Self {
        Self {
            css,
            cache: BTreeMap::new(),
        }
    }

    /// Classify `db.table`. `None` means replicated (uninteresting for
    /// analysis); an error means the table or its referents are broken.
    pub fn get(&mut self, db: &str, table: &str) -> Result<Option<Arc<TableInfo>>> {
        let key = DbTable::new(db, table);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }
        let info = self.resolve(db, table)?;
        self.cache.insert(key, info.clone());
        Ok(info)
    }

    fn resolve(&self, db: &str, table: &str) -> Result<Option<Arc<TableInfo>>> {
        let meta = self.css.table_meta(db, table).map_err(map_css)?;
        let info = match meta.kind {
            TableKind::Replicated => return Ok(None),
            TableKind::Director {
                lon_col,
                lat_col,
                key_col,
                partitioning_id,
            } => TableInfo::Director(Arc::new(DirTableInfo {
                db: db.into(),
                table: table.into(),
                pk: key_col,
                lon: lon_col,
                lat: lat_col,
                partitioning_id,
            })),
            TableKind::Child {
                director,
                key_col,
                lon_col,
                lat_col,
            } => {
                let dir = self
                    .director_of(&director)
                    .ok_or_else(|| AnalysisError::BadChildTable {
                        table: format!("{db}.{table}"),
                    })?;
                TableInfo::Child {
                    db: db.into(),
                    table: table.into(),
                    director: dir,
                    fk: key_col,
                    lon: lon_col,
                    lat: lat_col,
                }
            }
            TableKind::Match {
                director_a,
                director_b,
                key_a,
                key_b,
            } => {
                if director_a == director_b {
                    return error::BadMatchTableSnafu {
                        table: format!("{db}.{table}"),
                    }
                    .fail();
                }
                let a = self
                    .director_of(&director_a)
                    .ok_or_else(|| AnalysisError::BadMatchTable {
                        table: format!("{db}.{table}"),
                    })?;
                let b = self
                    .director_of(&director_b)
                    .ok_or_else(|| AnalysisError::BadMatchTable {
                        table: format!("{db}.{table}"),
                    })?;
                if a.partitioning_id != b.partitioning_id {
                    return error::MismatchedPartitioningsSnafu {
                        a: director_a.to_string(),
                        b: director_b.to_string(),
                    }
                    .fail();
                }
                TableInfo::Match {
                    db: db.into(),
                    table: table.into(),
                    director_a: a,
                    director_b: b,
                    fk_a: key_a,
                    fk_b: key_b,
                }
            }
        };
        Ok(Some(Arc::new(info)))
    }

    fn director_of(&self, name: &DbTable) -> Option<Arc<DirTableInfo>> {
        let meta = self.css.table_meta(&name.db, &name.table).ok()?;
        match meta.kind {
            TableKind::Director {
                lon_col,
                lat_col,
                key_col,
                partitioning_id,
            } => Some(Arc::new(DirTableInfo {
                db: name.db.clone(),
                table: name.table.clone(),
                pk: key_col,
                lon: lon_col,
                lat: lat_col,
                partitioning_id,
            })),
            _ => None,
        }
    }
}

fn map_css(e: css::Error) -> AnalysisError {
    match e {
        css::Error::NoSuchDb { db } => AnalysisError::UnknownDb { db },
        css::Error::NoSuchTable { db, table } => AnalysisError::UnknownTable { db, table },
    }
}
