//! Shared data types for the Qserv core crates.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use snafu::Snafu;
use std::fmt;

/// Identifier of a chunk, the unit of horizontal partitioning.
pub type ChunkId = i32;

/// Identifier of a sub-chunk within a chunk.
pub type SubChunkId = i32;

/// Chunk id used when a query references no chunked table. The parallel
/// statement is still executed exactly once against this placeholder.
pub const DUMMY_CHUNK_ID: ChunkId = 1_234_567_890;

/// Sub-chunk id paired with [`DUMMY_CHUNK_ID`].
pub const DUMMY_SUB_CHUNK_ID: SubChunkId = 1;

/// Largest sub-chunk count a single [`ChunkQuerySpec`] should carry. A chunk
/// with more sub-chunks is fragmented into a linked list of follow-on specs.
pub const GOOD_SUBCHUNK_COUNT: usize = 20;

/// Errors for chunk-spec set operations.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("cannot restrict chunk {left} against chunk {right}"))]
    MismatchedChunkIds { left: ChunkId, right: ChunkId },

    #[snafu(display("chunk {chunk_id} has no sub-chunks to expand"))]
    NoSubChunks { chunk_id: ChunkId },
}

/// A runnable chunk: its id plus the sub-chunk ids a sub-chunked query needs
/// materialized inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkSpec {
    /// Chunk id.
    pub chunk_id: ChunkId,
    /// Sub-chunk ids; empty for non-subchunked queries.
    pub sub_chunks: Vec<SubChunkId>,
}

impl ChunkSpec {
    /// Create a spec with the given sub-chunk set.
    pub fn new(chunk_id: ChunkId, sub_chunks: Vec<SubChunkId>) -> Self {
        Self {
            chunk_id,
            sub_chunks,
        }
    }

    /// True when this spec carries more sub-chunks than one query spec
    /// should, so iteration must fragment it.
    pub fn should_split(&self) -> bool {
        self.sub_chunks.len() > GOOD_SUBCHUNK_COUNT
    }

    /// Intersect our sub-chunk set with `rhs`'s, in place.
    pub fn restrict(&mut self, rhs: &Self) -> Result<(), Error> {
        if self.chunk_id != rhs.chunk_id {
            return MismatchedChunkIdsSnafu {
                left: self.chunk_id,
                right: rhs.chunk_id,
            }
            .fail();
        }
        self.sub_chunks.sort_unstable();
        let mut rhs_sorted = rhs.sub_chunks.clone();
        rhs_sorted.sort_unstable();
        self.sub_chunks.retain(|s| rhs_sorted.binary_search(s).is_ok());
        Ok(())
    }

    /// Intersection of two specs for the same chunk.
    pub fn intersect(&self, rhs: &Self) -> Result<Self, Error> {
        let mut out = self.clone();
        out.restrict(rhs)?;
        Ok(out)
    }
}

impl fmt::Display for ChunkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkSpec({}; ", self.chunk_id)?;
        for s in &self.sub_chunks {
            write!(f, "{s},")?;
        }
        write!(f, ")")
    }
}

/// Intersect two chunk-spec sets. Each input may list a chunk id at most
/// once; the result contains one entry per chunk id present in both inputs,
/// with the sub-chunk sets intersected.
pub fn intersect(a: &[ChunkSpec], b: &[ChunkSpec]) -> Vec<ChunkSpec> {
    let mut a_sorted = a.to_vec();
    a_sorted.sort();
    let mut b_sorted = b.to_vec();
    b_sorted.sort();

    let mut out = Vec::new();
    let mut bi = b_sorted.iter().peekable();
    for spec in &a_sorted {
        while bi.peek().map_or(false, |s| s.chunk_id < spec.chunk_id) {
            bi.next();
        }
        if let Some(other) = bi.peek() {
            if other.chunk_id == spec.chunk_id {
                // Same chunk id means restrict cannot fail.
                let merged = spec
                    .intersect(other)
                    .expect("intersect with equal chunk ids");
                out.push(merged);
            }
        }
    }
    out
}

/// Splits an oversized [`ChunkSpec`] into pieces of at most
/// [`GOOD_SUBCHUNK_COUNT`] sub-chunks each.
#[derive(Debug)]
pub struct ChunkSpecFragmenter {
    original: ChunkSpec,
    pos: usize,
}

impl ChunkSpecFragmenter {
    /// Start fragmenting `spec`.
    pub fn new(spec: ChunkSpec) -> Self {
        Self {
            original: spec,
            pos: 0,
        }
    }
}

impl Iterator for ChunkSpecFragmenter {
    type Item = ChunkSpec;

    fn next(&mut self) -> Option<ChunkSpec> {
        if self.pos >= self.original.sub_chunks.len() {
            return None;
        }
        let end = (self.pos + GOOD_SUBCHUNK_COUNT).min(self.original.sub_chunks.len());
        let piece = ChunkSpec {
            chunk_id: self.original.chunk_id,
            sub_chunks: self.original.sub_chunks[self.pos..end].to_vec(),
        };
        self.pos = end;
        Some(piece)
    }
}

/// A (chunk, sub-chunk) pair, the unit a sub-chunked query template is
/// instantiated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpecSingle {
    /// Chunk id.
    pub chunk_id: ChunkId,
    /// Sub-chunk id.
    pub sub_chunk_id: SubChunkId,
}

impl ChunkSpecSingle {
    /// Expand a spec into one entry per sub-chunk. A spec without sub-chunks
    /// cannot be expanded.
    pub fn make_vec(spec: &ChunkSpec) -> Result<Vec<Self>, Error> {
        if spec.sub_chunks.is_empty() {
            return NoSubChunksSnafu {
                chunk_id: spec.chunk_id,
            }
            .fail();
        }
        Ok(spec
            .sub_chunks
            .iter()
            .map(|&sub_chunk_id| Self {
                chunk_id: spec.chunk_id,
                sub_chunk_id,
            })
            .collect())
    }
}

impl fmt::Display for ChunkSpecSingle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.chunk_id, self.sub_chunk_id)
    }
}

/// A fully-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DbTable {
    /// Database name.
    pub db: String,
    /// Table name.
    pub table: String,
}

impl DbTable {
    /// Build from name parts.
    pub fn new(db: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for DbTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.table)
    }
}

/// Shared-scan classification attached to a chunk query: the partitioned
/// tables it scans and how expensive the scan is expected to be.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanInfo {
    /// Larger means slower; the worker's scan scheduler buckets tasks into
    /// priority tiers by this value.
    pub scan_rating: i32,
    /// The partitioned tables being scanned. Empty means the query is not a
    /// shared-scan candidate.
    pub tables: Vec<DbTable>,
}

impl ScanInfo {
    /// Rating at or below which a scan joins the fast tier.
    pub const RATING_FAST: i32 = 10;
    /// Rating at or below which a scan joins the medium tier.
    pub const RATING_MEDIUM: i32 = 20;
    /// Upper bound of the slow tier.
    pub const RATING_SLOW: i32 = 30;

    /// True when no scan tables were recorded.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// One runnable per-chunk query: everything the dispatcher needs to send a
/// chunk's work to its worker.
#[derive(Debug, Clone, Default)]
pub struct ChunkQuerySpec {
    /// Dominant database the chunk belongs to.
    pub db: String,
    /// Chunk id.
    pub chunk_id: ChunkId,
    /// Concrete SQL fragments, in execution order.
    pub queries: Vec<String>,
    /// Sub-chunk ids the fragments reference; empty for non-subchunked
    /// queries.
    pub sub_chunk_ids: Vec<SubChunkId>,
    /// Tables needing sub-chunk materialization.
    pub sub_chunk_tables: Vec<String>,
    /// Shared-scan classification.
    pub scan_info: ScanInfo,
    /// Column the worker should order each response batch by, when
    /// deterministic streaming order matters.
    pub secondary_sort: Option<String>,
    /// Follow-on fragments for oversized sub-chunk sets.
    pub next_fragment: Option<Box<ChunkQuerySpec>>,
}

impl ChunkQuerySpec {
    /// Total fragment count including linked follow-on specs.
    pub fn total_fragments(&self) -> usize {
        let mut n = self.queries.len();
        let mut next = self.next_fragment.as_deref();
        while let Some(spec) = next {
            n += spec.queries.len();
            next = spec.next_fragment.as_deref();
        }
        n
    }
}

/// Everything the merge phase needs, rendered to plain SQL text by the
/// session: the merge select list, the post clauses (grouping, ordering,
/// the final LIMIT), and whether a merge select is required at all (when
/// not, partials concatenate directly into the result table).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeFixup {
    /// Merge-phase select list.
    pub select: String,
    /// Clauses appended after `FROM <partials>`, LIMIT included.
    pub post: String,
    /// False when rows concatenate without re-aggregation.
    pub needs_merge: bool,
}

/// Identifies one user query across the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryId(u64);

impl QueryId {
    /// Wrap a raw id.
    pub fn new(v: u64) -> Self {
        Self(v)
    }

    /// Raw value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one per-chunk job within a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(i32);

impl JobId {
    /// Wrap a raw id.
    pub fn new(v: i32) -> Self {
        Self(v)
    }

    /// Raw value.
    pub fn get(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn spec(chunk_id: ChunkId, sub_chunks: &[SubChunkId]) -> ChunkSpec {
        ChunkSpec::new(chunk_id, sub_chunks.to_vec())
    }

    #[test]
    fn restrict_intersects_sub_chunks() {
        let mut a = spec(7, &[1, 2, 3, 5]);
        a.restrict(&spec(7, &[2, 5, 9])).unwrap();
        assert_eq!(a.sub_chunks, vec![2, 5]);
    }

    #[test]
    fn restrict_rejects_mismatched_chunks() {
        let mut a = spec(7, &[1]);
        assert_matches!(
            a.restrict(&spec(8, &[1])),
            Err(Error::MismatchedChunkIds { left: 7, right: 8 })
        );
    }

    #[test]
    fn intersect_merges_sorted_sets() {
        let a = vec![spec(1, &[10, 11]), spec(3, &[30]), spec(5, &[50, 51])];
        let b = vec![spec(3, &[30, 31]), spec(4, &[40]), spec(5, &[51])];
        let out = intersect(&a, &b);
        assert_eq!(out, vec![spec(3, &[30]), spec(5, &[51])]);
    }

    #[test]
    fn fragmenter_respects_threshold() {
        // Exactly at the threshold: a single piece.
        let subs: Vec<i32> = (0..GOOD_SUBCHUNK_COUNT as i32).collect();
        let pieces: Vec<_> = ChunkSpecFragmenter::new(spec(2, &subs)).collect();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].sub_chunks.len(), GOOD_SUBCHUNK_COUNT);

        // One past the threshold: two pieces, split 20/1.
        let subs: Vec<i32> = (0..=GOOD_SUBCHUNK_COUNT as i32).collect();
        let oversized = spec(2, &subs);
        assert!(oversized.should_split());
        let pieces: Vec<_> = ChunkSpecFragmenter::new(oversized).collect();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].sub_chunks.len(), GOOD_SUBCHUNK_COUNT);
        assert_eq!(pieces[1].sub_chunks, vec![GOOD_SUBCHUNK_COUNT as i32]);
    }

    #[test]
    fn single_expansion_requires_sub_chunks() {
        let singles = ChunkSpecSingle::make_vec(&spec(4, &[8, 9])).unwrap();
        assert_eq!(singles.len(), 2);
        assert_eq!(singles[1].sub_chunk_id, 9);

        assert_matches!(
            ChunkSpecSingle::make_vec(&spec(4, &[])),
            Err(Error::NoSubChunks { chunk_id: 4 })
        );
    }

    #[test]
    fn chunk_query_spec_counts_linked_fragments() {
        let tail = ChunkQuerySpec {
            queries: vec!["SELECT 2".into()],
            ..Default::default()
        };
        let head = ChunkQuerySpec {
            queries: vec!["SELECT 0".into(), "SELECT 1".into()],
            next_fragment: Some(Box::new(tail)),
            ..Default::default()
        };
        assert_eq!(head.total_fragments(), 3);
    }
}
