//! Sub-chunk table naming and the build/cleanup statement templates.

use data_types::{ChunkId, SubChunkId};

/// Column every director chunk table carries to identify sub-chunk
/// membership.
pub const SUB_CHUNK_COLUMN: &str = "subChunkId";

/// Prefix of per-chunk scratch databases holding materialized sub-chunks.
pub const SUBCHUNKDB_PREFIX: &str = "Subchunks_";

/// `Subchunks_<db>_<chunkId>`.
pub fn sub_chunk_db(db: &str, chunk_id: ChunkId) -> String {
    format!("{SUBCHUNKDB_PREFIX}{db}_{chunk_id}")
}

/// `<table>_<chunkId>_<subChunkId>`.
pub fn sub_chunk_table(table: &str, chunk_id: ChunkId, sub_chunk_id: SubChunkId) -> String {
    format!("{table}_{chunk_id}_{sub_chunk_id}")
}

/// `<table>FullOverlap_<chunkId>_<subChunkId>`.
pub fn overlap_table(table: &str, chunk_id: ChunkId, sub_chunk_id: SubChunkId) -> String {
    format!("{table}FullOverlap_{chunk_id}_{sub_chunk_id}")
}

/// The statement materializing one sub-chunk table out of its chunk table.
pub fn create_sub_chunk_stmt(
    db: &str,
    table: &str,
    chunk_id: ChunkId,
    sub_chunk_id: SubChunkId,
) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} ENGINE = MEMORY AS SELECT * FROM {}.{}_{} WHERE {} = {}",
        sub_chunk_db(db, chunk_id),
        sub_chunk_table(table, chunk_id, sub_chunk_id),
        db,
        table,
        chunk_id,
        SUB_CHUNK_COLUMN,
        sub_chunk_id,
    )
}

/// The paired cleanup statement.
pub fn cleanup_sub_chunk_stmt(
    db: &str,
    table: &str,
    chunk_id: ChunkId,
    sub_chunk_id: SubChunkId,
) -> String {
    format!(
        "DROP TABLE IF EXISTS {}.{}",
        sub_chunk_db(db, chunk_id),
        sub_chunk_table(table, chunk_id, sub_chunk_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_shapes() {
        assert_eq!(
            create_sub_chunk_stmt("LSST", "Object", 1234, 3),
            "CREATE TABLE IF NOT EXISTS Subchunks_LSST_1234.Object_1234_3 ENGINE = MEMORY \
             AS SELECT * FROM LSST.Object_1234 WHERE subChunkId = 3"
        );
        assert_eq!(
            cleanup_sub_chunk_stmt("LSST", "Object", 1234, 3),
            "DROP TABLE IF EXISTS Subchunks_LSST_1234.Object_1234_3"
        );
    }
}
