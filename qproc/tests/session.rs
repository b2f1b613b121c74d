//! End-to-end analysis scenarios through the session.

use data_types::{ChunkSpec, DUMMY_CHUNK_ID, GOOD_SUBCHUNK_COUNT};
use qproc::QuerySession;

fn session() -> QuerySession {
    test_helpers::maybe_start_logging();
    QuerySession::new(css::lsst_test_css(), "LSST", "qsmaster")
}

fn collect_specs(qs: &QuerySession) -> Vec<data_types::ChunkQuerySpec> {
    qs.chunk_query_iter()
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
}

#[test]
fn trivial_sub() {
    let mut qs = session();
    qs.set_query("SELECT * FROM Object WHERE someField > 5.0;").unwrap();
    assert!(!qs.needs_merge().unwrap());
    assert!(qs.has_chunks().unwrap());
    assert!(!qs.has_sub_chunks().unwrap());

    qs.add_chunk(ChunkSpec::new(100, vec![]));
    qs.add_chunk(ChunkSpec::new(101, vec![]));
    qs.finalize().unwrap();

    let specs = collect_specs(&qs);
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].db, "LSST");
    assert_eq!(specs[0].chunk_id, 100);
    assert_eq!(specs[0].queries.len(), 1);
    assert_eq!(
        specs[0].queries[0],
        "SELECT * FROM LSST.Object_100 AS Object WHERE someField>5.0"
    );
    assert_eq!(
        specs[1].queries[0],
        "SELECT * FROM LSST.Object_101 AS Object WHERE someField>5.0"
    );
}

#[test]
fn no_sub_replicated_table_runs_once() {
    let mut qs = session();
    qs.set_query("SELECT * FROM Filter WHERE filterId=4;").unwrap();
    assert!(!qs.has_chunks().unwrap());
    assert!(!qs.needs_merge().unwrap());

    // No chunks added: finalize injects the dummy chunk so the statement
    // still runs exactly once.
    qs.finalize().unwrap();
    assert!(qs.is_dummy());

    let specs = collect_specs(&qs);
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].chunk_id, DUMMY_CHUNK_ID);
    assert_eq!(specs[0].queries, vec![
        "SELECT * FROM LSST.Filter WHERE filterId=4".to_string(),
    ]);
}

#[test]
fn aggregate_decomposition() {
    let mut qs = session();
    qs.set_query("SELECT SUM(x), AVG(y) FROM LSST.Object GROUP BY chunkId;").unwrap();
    assert!(qs.needs_merge().unwrap());

    qs.add_chunk(ChunkSpec::new(7, vec![]));
    qs.add_chunk(ChunkSpec::new(8, vec![]));
    qs.finalize().unwrap();

    let specs = collect_specs(&qs);
    assert_eq!(
        specs[0].queries[0],
        "SELECT SUM(x) AS QS1_SUM,COUNT(y) AS QS2_COUNT,SUM(y) AS QS3_SUM \
         FROM LSST.Object_7 AS Object GROUP BY chunkId"
    );

    let fixup = qs.make_merge_fixup().unwrap();
    assert!(fixup.needs_merge);
    assert_eq!(fixup.select, "SUM(QS1_SUM),(SUM(QS3_SUM)/SUM(QS2_COUNT))");
    assert_eq!(fixup.post, "GROUP BY chunkId");
}

#[test]
fn box_restrictor_populates_constraints_and_predicates() {
    let mut qs = session();
    qs.set_query("SELECT * FROM Object WHERE qserv_areaspec_box(0,0,1,1);").unwrap();

    let constraints = qs.get_constraints().unwrap();
    assert_eq!(constraints.len(), 1);
    assert_eq!(constraints[0].name(), "qserv_areaspec_box");
    assert_eq!(constraints[0].params(), ["0", "0", "1", "1"]);

    qs.add_chunk(ChunkSpec::new(42, vec![]));
    qs.finalize().unwrap();
    let specs = collect_specs(&qs);
    assert!(
        specs[0].queries[0]
            .contains("scisql_s2PtInBox(Object.ra_PS,Object.decl_PS,0,0,1,1) = 1"),
        "{}",
        specs[0].queries[0]
    );
}

#[test]
fn near_neighbor_self_join_sub_chunks_with_overlap() {
    let mut qs = session();
    qs.set_query(
        "SELECT count(*) FROM Object o1, Object o2 WHERE qserv_areaspec_box(6,6,7,7) \
         AND o1.ra_PS BETWEEN 6 AND 7 AND o1.decl_PS BETWEEN 6 AND 7;",
    )
    .unwrap();
    assert!(qs.has_sub_chunks().unwrap());
    assert!(qs.needs_merge().unwrap());

    qs.add_chunk(ChunkSpec::new(1234, vec![1, 2]));
    qs.finalize().unwrap();
    let specs = collect_specs(&qs);
    assert_eq!(specs.len(), 1);
    // Two templates (sub x sub, sub x overlap) across two sub-chunks.
    assert_eq!(specs[0].queries.len(), 4);
    assert_eq!(specs[0].sub_chunk_ids, vec![1, 2]);
    assert_eq!(specs[0].sub_chunk_tables, vec!["Object".to_string()]);
    assert!(
        specs[0].queries[0].contains("Subchunks_LSST_1234.Object_1234_1 AS o1"),
        "{}",
        specs[0].queries[0]
    );
    assert!(
        specs[0].queries[1].contains("Subchunks_LSST_1234.ObjectFullOverlap_1234_1 AS o2"),
        "{}",
        specs[0].queries[1]
    );
    assert!(
        specs[0].queries[2].contains("Object_1234_2 AS o1"),
        "{}",
        specs[0].queries[2]
    );
}

#[test]
fn fragmenter_boundary() {
    let mut qs = session();
    qs.set_query(
        "SELECT count(*) FROM Object o1, Object o2 WHERE o1.ra_PS BETWEEN 6 AND 7;",
    )
    .unwrap();

    // Exactly at the threshold: one spec, no follow-on.
    let at: Vec<i32> = (0..GOOD_SUBCHUNK_COUNT as i32).collect();
    qs.add_chunk(ChunkSpec::new(5, at));
    qs.finalize().unwrap();
    let specs = collect_specs(&qs);
    assert!(specs[0].next_fragment.is_none());
    assert_eq!(specs[0].sub_chunk_ids.len(), GOOD_SUBCHUNK_COUNT);

    // One more sub-chunk forces fragmentation into a linked follow-on.
    let mut qs = session();
    qs.set_query(
        "SELECT count(*) FROM Object o1, Object o2 WHERE o1.ra_PS BETWEEN 6 AND 7;",
    )
    .unwrap();
    let over: Vec<i32> = (0..=GOOD_SUBCHUNK_COUNT as i32).collect();
    qs.add_chunk(ChunkSpec::new(5, over));
    qs.finalize().unwrap();
    let specs = collect_specs(&qs);
    let head = &specs[0];
    assert_eq!(head.sub_chunk_ids.len(), GOOD_SUBCHUNK_COUNT);
    let tail = head.next_fragment.as_deref().unwrap();
    assert_eq!(tail.sub_chunk_ids, vec![GOOD_SUBCHUNK_COUNT as i32]);
    assert!(tail.next_fragment.is_none());
}

#[test]
fn chunks_covered_exactly_once() {
    let mut qs = session();
    qs.set_query("SELECT * FROM Object WHERE someField > 5.0;").unwrap();
    let added = vec![3, 1, 4, 1_5, 9_2];
    for c in &added {
        qs.add_chunk(ChunkSpec::new(*c, vec![]));
    }
    qs.finalize().unwrap();
    let seen: Vec<i32> = collect_specs(&qs).iter().map(|s| s.chunk_id).collect();
    assert_eq!(seen, added);
}

#[test]
fn reset_returns_session_to_fresh_state() {
    let mut qs = session();
    qs.set_query("SELECT * FROM Object WHERE someField > 5.0;").unwrap();
    qs.add_chunk(ChunkSpec::new(1, vec![]));
    qs.finalize().unwrap();
    let _ = collect_specs(&qs);

    qs.reset();
    assert!(qs.chunks().is_empty());
    assert!(qs.error().is_none());

    // The session accepts a new query afterwards.
    qs.set_query("SELECT * FROM Filter WHERE filterId=4;").unwrap();
    qs.finalize().unwrap();
    assert_eq!(collect_specs(&qs).len(), 1);
}

#[test]
fn error_state_refuses_iteration() {
    let mut qs = session();
    let err = qs.set_query("SELECT * FROM NoSuchTable;").unwrap_err();
    assert!(err.to_string().contains("no such table"), "{err}");
    assert!(qs.error().is_some());
    assert!(qs.get_constraints().is_err());
    assert!(qs.chunk_query_iter().is_err());
}

#[test]
fn scan_tables_attached_to_specs() {
    let mut qs = session();
    qs.set_query("SELECT * FROM Object WHERE someField > 5.0;").unwrap();
    qs.add_chunk(ChunkSpec::new(1, vec![]));
    qs.add_chunk(ChunkSpec::new(2, vec![]));
    qs.add_chunk(ChunkSpec::new(3, vec![]));
    qs.finalize().unwrap();
    let specs = collect_specs(&qs);
    assert_eq!(specs[0].scan_info.tables.len(), 1);
    assert_eq!(specs[0].scan_info.tables[0].table, "Object");
    assert!(specs[0].scan_info.scan_rating > 0);
}
