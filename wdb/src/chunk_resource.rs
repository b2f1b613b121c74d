//! Reference-counted sub-chunk table lifecycle.
//!
//! Sub-chunk materialization is expensive, so concurrent tasks on one
//! chunk share the staged tables; a table is dropped only after the last
//! holder releases it and a flush sweeps the chunk.

use data_types::{ChunkId, SubChunkId};
use observability_deps::tracing::{debug, info};
use parking_lot::Mutex;
use snafu::Snafu;
use sql::SqlConnectionRef;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use wbase::{cleanup_sub_chunk_stmt, create_sub_chunk_stmt};

/// Resource-manager failures.
#[derive(Debug, Snafu)]
pub enum ResourceError {
    #[snafu(display("sub-chunk staging failed: {source}"))]
    Staging { source: sql::SqlError },

    #[snafu(display(
        "refcount underflow for {db} chunk {chunk_id} {table}_{sub_chunk_id}"
    ))]
    Underflow {
        db: String,
        chunk_id: ChunkId,
        table: String,
        sub_chunk_id: SubChunkId,
    },
}

/// Resource result type.
pub type Result<T, E = ResourceError> = std::result::Result<T, E>;

/// One materialized sub-chunk table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScTable {
    pub db: String,
    pub chunk_id: ChunkId,
    pub table: String,
    pub sub_chunk_id: SubChunkId,
}

impl fmt::Display for ScTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Subchunks_{}_{}.{}_{}",
            self.db, self.chunk_id, self.table, self.sub_chunk_id
        )
    }
}

/// Physical staging of sub-chunk tables.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Materialize the listed tables.
    fn load(&self, tables: &[ScTable]) -> Result<(), sql::SqlError>;

    /// Drop the listed tables.
    fn discard(&self, tables: &[ScTable]) -> Result<(), sql::SqlError>;
}

/// Shared backend handle.
pub type BackendRef = Arc<dyn Backend>;

/// Stages through the local engine with the build/cleanup scripts.
#[derive(Debug)]
pub struct SqlBackend {
    conn: SqlConnectionRef,
}

impl SqlBackend {
    /// Backend over an engine connection.
    pub fn new(conn: SqlConnectionRef) -> Self {
        Self { conn }
    }
}

impl Backend for SqlBackend {
    fn load(&self, tables: &[ScTable]) -> Result<(), sql::SqlError> {
        for t in tables {
            self.conn.run_statement(&create_sub_chunk_stmt(
                &t.db,
                &t.table,
                t.chunk_id,
                t.sub_chunk_id,
            ))?;
        }
        Ok(())
    }

    fn discard(&self, tables: &[ScTable]) -> Result<(), sql::SqlError> {
        for t in tables {
            self.conn.run_statement(&cleanup_sub_chunk_stmt(
                &t.db,
                &t.table,
                t.chunk_id,
                t.sub_chunk_id,
            ))?;
        }
        Ok(())
    }
}

/// Records load/discard calls instead of touching an engine.
#[derive(Debug, Default)]
pub struct FakeBackend {
    log: Mutex<Vec<String>>,
}

impl FakeBackend {
    /// New empty fake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations so far, rendered as `load <t>` / `discard <t>`.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl Backend for FakeBackend {
    fn load(&self, tables: &[ScTable]) -> Result<(), sql::SqlError> {
        let mut log = self.log.lock();
        for t in tables {
            log.push(format!("load {t}"));
        }
        Ok(())
    }

    fn discard(&self, tables: &[ScTable]) -> Result<(), sql::SqlError> {
        let mut log = self.log.lock();
        for t in tables {
            log.push(format!("discard {t}"));
        }
        Ok(())
    }
}

type SubChunkCounts = HashMap<SubChunkId, u32>;

#[derive(Debug, Default)]
struct EntryState {
    // table name -> sub-chunk id -> holders
    tables: HashMap<String, SubChunkCounts>,
}

#[derive(Debug)]
struct ChunkEntry {
    db: String,
    chunk_id: ChunkId,
    state: Mutex<EntryState>,
}

/// The set of (table, sub-chunk) pairs one acquire holds.
#[derive(Debug, Clone)]
struct ResourceInfo {
    db: String,
    chunk_id: ChunkId,
    tables: Vec<String>,
    sub_chunk_ids: Vec<SubChunkId>,
}

/// Shared lifecycle manager for materialized sub-chunk tables.
#[derive(Debug)]
pub struct ChunkResourceMgr {
    backend: BackendRef,
    // db -> chunk -> entry; structural changes under this mutex,
    // per-entry refcounts under the entry's own.
    entries: Mutex<HashMap<String, HashMap<ChunkId, Arc<ChunkEntry>>>>,
}

impl ChunkResourceMgr {
    /// Manager over a staging backend.
    pub fn new(backend: BackendRef) -> Arc<Self> {
        Arc::new(Self {
            backend,
            entries: Mutex::new(HashMap::new()),
        })
    }

    fn entry(&self, db: &str, chunk_id: ChunkId) -> Arc<ChunkEntry> {
        let mut entries = self.entries.lock();
        let per_db = entries.entry(db.to_string()).or_default();
        Arc::clone(per_db.entry(chunk_id).or_insert_with(|| {
            Arc::new(ChunkEntry {
                db: db.to_string(),
                chunk_id,
                state: Mutex::new(EntryState::default()),
            })
        }))
    }

    /// Take references on every (table, sub-chunk) pair, staging the pairs
    /// nobody held yet. Blocks other acquirers of the same chunk for the
    /// duration of backend staging.
    pub fn acquire(
        self: &Arc<Self>,
        db: &str,
        chunk_id: ChunkId,
        tables: &[String],
        sub_chunk_ids: &[SubChunkId],
    ) -> Result<ChunkResource> {
        let entry = self.entry(db, chunk_id);
        let mut state = entry.state.lock();
        let mut newly_needed = Vec::new();
        for table in tables {
            let counts = state.tables.entry(table.clone()).or_default();
            for &sc in sub_chunk_ids {
                let count = counts.entry(sc).or_insert(0);
                if *count == 0 {
                    newly_needed.push(ScTable {
                        db: db.to_string(),
                        chunk_id,
                        table: table.clone(),
                        sub_chunk_id: sc,
                    });
                }
                *count += 1;
            }
        }
        if !newly_needed.is_empty() {
            debug!(db, chunk_id, staging = newly_needed.len(), "staging sub-chunks");
            if let Err(source) = self.backend.load(&newly_needed) {
                // Roll the increments back and drop whatever half-staged.
                for table in tables {
                    if let Some(counts) = state.tables.get_mut(table) {
                        for &sc in sub_chunk_ids {
                            if let Some(c) = counts.get_mut(&sc) {
                                *c = c.saturating_sub(1);
                            }
                        }
                    }
                }
                let _ = self.backend.discard(&newly_needed);
                return Err(ResourceError::Staging { source });
            }
        }
        Ok(ChunkResource {
            mgr: Arc::clone(self),
            info: ResourceInfo {
                db: db.to_string(),
                chunk_id,
                tables: tables.to_vec(),
                sub_chunk_ids: sub_chunk_ids.to_vec(),
            },
        })
    }

    fn release(&self, info: &ResourceInfo) -> Result<()> {
        let entry = self.entry(&info.db, info.chunk_id);
        let mut state = entry.state.lock();
        for table in &info.tables {
            let counts = state.tables.entry(table.clone()).or_default();
            for &sc in &info.sub_chunk_ids {
                let count = counts.entry(sc).or_insert(0);
                if *count == 0 {
                    return UnderflowSnafu {
                        db: info.db.clone(),
                        chunk_id: info.chunk_id,
                        table: table.clone(),
                        sub_chunk_id: sc,
                    }
                    .fail();
                }
                *count -= 1;
            }
        }
        Ok(())
    }

    /// Current holder count for one pair; absent pairs count zero.
    pub fn count(&self, db: &str, chunk_id: ChunkId, table: &str, sc: SubChunkId) -> u32 {
        let entry = self.entry(db, chunk_id);
        let state = entry.state.lock();
        state
            .tables
            .get(table)
            .and_then(|c| c.get(&sc).copied())
            .unwrap_or(0)
    }

    /// Drop every zero-count sub-chunk table of `db` and forget empty
    /// entries.
    pub fn flush(&self, db: &str) -> Result<(), sql::SqlError> {
        let chunks: Vec<Arc<ChunkEntry>> = {
            let entries = self.entries.lock();
            match entries.get(db) {
                Some(per_db) => per_db.values().map(Arc::clone).collect(),
                None => return Ok(()),
            }
        };
        for entry in chunks {
            let mut state = entry.state.lock();
            let mut droppable = Vec::new();
            for (table, counts) in &mut state.tables {
                counts.retain(|&sc, &mut count| {
                    if count == 0 {
                        droppable.push(ScTable {
                            db: entry.db.clone(),
                            chunk_id: entry.chunk_id,
                            table: table.clone(),
                            sub_chunk_id: sc,
                        });
                        false
                    } else {
                        true
                    }
                });
            }
            state.tables.retain(|_, counts| !counts.is_empty());
            if !droppable.is_empty() {
                info!(db, chunk_id = entry.chunk_id, dropping = droppable.len(), "flushing sub-chunks");
                self.backend.discard(&droppable)?;
            }
        }
        let mut entries = self.entries.lock();
        if let Some(per_db) = entries.get_mut(db) {
            per_db.retain(|_, entry| !entry.state.lock().tables.is_empty());
            if per_db.is_empty() {
                entries.remove(db);
            }
        }
        Ok(())
    }
}

/// A held acquisition; releasing happens on drop, so a task that fails
/// mid-processing still gives its references back.
#[derive(Debug)]
pub struct ChunkResource {
    mgr: Arc<ChunkResourceMgr>,
    info: ResourceInfo,
}

impl ChunkResource {
    /// The chunk this acquisition covers.
    pub fn chunk_id(&self) -> ChunkId {
        self.info.chunk_id
    }
}

impl Drop for ChunkResource {
    fn drop(&mut self) {
        if let Err(e) = self.mgr.release(&self.info) {
            // Underflow here is a bookkeeping bug; surface it loudly but
            // do not unwind out of drop.
            observability_deps::tracing::error!(error = %e, "chunk resource release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sharing_stages_once_and_flush_drops() {
        let backend = Arc::new(FakeBackend::new());
        let dyn_backend: BackendRef = Arc::clone(&backend) as _;
        let mgr = ChunkResourceMgr::new(dyn_backend);

        let r1 = mgr
            .acquire("LSST", 7, &strings(&["Object"]), &[1, 2])
            .unwrap();
        let r2 = mgr
            .acquire("LSST", 7, &strings(&["Object"]), &[2, 3])
            .unwrap();
        // Sub-chunk 2 was staged once, shared by both holders.
        assert_eq!(mgr.count("LSST", 7, "Object", 2), 2);
        let loads = backend
            .log()
            .iter()
            .filter(|l| l.starts_with("load"))
            .count();
        assert_eq!(loads, 3);

        drop(r1);
        assert_eq!(mgr.count("LSST", 7, "Object", 1), 0);
        // Still held by r2: flush must not drop sub-chunks 2 and 3.
        mgr.flush("LSST").unwrap();
        assert!(backend.log().iter().any(|l| l == "discard Subchunks_LSST_7.Object_1"));
        assert!(!backend.log().iter().any(|l| l == "discard Subchunks_LSST_7.Object_2"));

        drop(r2);
        mgr.flush("LSST").unwrap();
        assert!(backend.log().iter().any(|l| l == "discard Subchunks_LSST_7.Object_2"));
        assert!(backend.log().iter().any(|l| l == "discard Subchunks_LSST_7.Object_3"));
    }

    #[test]
    fn staging_failure_rolls_back() {
        let conn = Arc::new(sql::MemSql::new());
        conn.fail_on("Object_9_1", sql::SqlError::new(1146, "missing chunk table"));
        let dyn_conn: SqlConnectionRef = Arc::clone(&conn) as _;
        let backend: BackendRef = Arc::new(SqlBackend::new(dyn_conn));
        let mgr = ChunkResourceMgr::new(backend);

        let err = mgr
            .acquire("LSST", 9, &strings(&["Object"]), &[1])
            .map(|_| ())
            .unwrap_err();
        assert_matches!(err, ResourceError::Staging { .. });
        assert_eq!(mgr.count("LSST", 9, "Object", 1), 0);
    }

    #[test]
    fn sql_backend_emits_scripts() {
        let conn = Arc::new(sql::MemSql::new());
        let dyn_conn: SqlConnectionRef = Arc::clone(&conn) as _;
        let backend: BackendRef = Arc::new(SqlBackend::new(dyn_conn));
        let mgr = ChunkResourceMgr::new(backend);
        let r = mgr.acquire("LSST", 3, &strings(&["Object"]), &[4]).unwrap();
        drop(r);
        mgr.flush("LSST").unwrap();

        let stmts = conn.statements();
        assert!(stmts[0].starts_with("CREATE TABLE IF NOT EXISTS Subchunks_LSST_3.Object_3_4"));
        assert_eq!(stmts[1], "DROP TABLE IF EXISTS Subchunks_LSST_3.Object_3_4");
    }
}
