//! Placeholder substitution from templates to concrete chunk SQL.

use crate::error;
use crate::Result;
use data_types::{ChunkSpec, ChunkSpecSingle};
use query::{QueryTemplate, CHUNK_TAG, SUBCHUNK_TAG};
use std::collections::BTreeSet;

/// Records which placeholders the parallel statement family uses and which
/// tables need sub-chunk staging, then instantiates templates for concrete
/// chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMapping {
    has_chunks: bool,
    has_sub_chunks: bool,
    sub_chunk_tables: BTreeSet<String>,
}

impl QueryMapping {
    /// Empty mapping (chunk-independent statement).
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that templates carry [`CHUNK_TAG`].
    pub fn insert_chunk_entry(&mut self) {
        self.has_chunks = true;
    }

    /// Record that templates carry [`SUBCHUNK_TAG`] and that `table` needs
    /// staging.
    pub fn insert_sub_chunk_table(&mut self, table: impl Into<String>) {
        self.has_chunks = true;
        self.has_sub_chunks = true;
        self.sub_chunk_tables.insert(table.into());
    }

    /// Fold another mapping into this one.
    pub fn update(&mut self, other: &Self) {
        self.has_chunks |= other.has_chunks;
        self.has_sub_chunks |= other.has_sub_chunks;
        self.sub_chunk_tables
            .extend(other.sub_chunk_tables.iter().cloned());
    }

    /// Does any template mention a chunk?
    pub fn has_chunks(&self) -> bool {
        self.has_chunks
    }

    /// Does any template mention a sub-chunk?
    pub fn has_sub_chunks(&self) -> bool {
        self.has_sub_chunks
    }

    /// Tables needing sub-chunk materialization.
    pub fn sub_chunk_tables(&self) -> &BTreeSet<String> {
        &self.sub_chunk_tables
    }

    /// Instantiate a template for a whole chunk. Valid only for
    /// non-subchunked mappings.
    pub fn apply(&self, spec: &ChunkSpec, template: &QueryTemplate) -> Result<String> {
        if self.has_sub_chunks {
            return error::BugSnafu {
                message: "whole-chunk apply on a sub-chunked mapping",
            }
            .fail();
        }
        Ok(template
            .to_string()
            .replace(CHUNK_TAG, &spec.chunk_id.to_string()))
    }

    /// Instantiate a template for one (chunk, sub-chunk) pair.
    pub fn apply_single(&self, single: ChunkSpecSingle, template: &QueryTemplate) -> String {
        template
            .to_string()
            .replace(CHUNK_TAG, &single.chunk_id.to_string())
            .replace(SUBCHUNK_TAG, &single.sub_chunk_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_tags() {
        let mut m = QueryMapping::new();
        m.insert_chunk_entry();
        let mut t = QueryTemplate::new();
        t.append("SELECT * FROM");
        t.append(format!("LSST.Object_{CHUNK_TAG}"));
        let sql = m.apply(&ChunkSpec::new(1234, vec![]), &t).unwrap();
        assert_eq!(sql, "SELECT * FROM LSST.Object_1234");
    }

    #[test]
    fn sub_chunk_substitution() {
        let mut m = QueryMapping::new();
        m.insert_sub_chunk_table("Object");
        let mut t = QueryTemplate::new();
        t.append(format!(
            "SELECT count(*) FROM Subchunks_LSST_{CHUNK_TAG}.Object_{CHUNK_TAG}_{SUBCHUNK_TAG} AS o1"
        ));
        let sql = m.apply_single(
            data_types::ChunkSpecSingle {
                chunk_id: 77,
                sub_chunk_id: 3,
            },
            &t,
        );
        assert_eq!(
            sql,
            "SELECT count(*) FROM Subchunks_LSST_77.Object_77_3 AS o1"
        );
        assert!(m
            .apply(&ChunkSpec::new(77, vec![3]), &t)
            .is_err());
    }
}
