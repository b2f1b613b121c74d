//! End-to-end client-side scenarios over the scripted transport.

use ccontrol::{ClientConfig, UserQueryFactory};
use data_types::ChunkSpec;
use metric::Registry;
use qdisp::{MockQueryService, MockScript};
use std::sync::Arc;

struct Fixture {
    factory: UserQueryFactory,
    service: Arc<MockQueryService>,
    conn: Arc<sql::MemSql>,
}

fn fixture() -> Fixture {
    test_helpers::maybe_start_logging();
    let service = Arc::new(MockQueryService::new());
    let conn = Arc::new(sql::MemSql::new());
    let dyn_service: Arc<dyn qdisp::QueryService> = Arc::clone(&service) as _;
    let dyn_conn: sql::SqlConnectionRef = Arc::clone(&conn) as _;
    let config = ClientConfig {
        default_db: "LSST".into(),
        allowed_dbs: vec!["LSST".into()],
        ..Default::default()
    };
    let factory = UserQueryFactory::new(
        config,
        css::lsst_test_css(),
        dyn_service,
        dyn_conn,
        Arc::new(Registry::new()),
    );
    Fixture {
        factory,
        service,
        conn,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn plain_query_merges_rows() {
    let f = fixture();
    f.service.script(1, MockScript::Rows(vec!["10".into()]));
    f.service.script(2, MockScript::Rows(vec!["20".into(), "21".into()]));

    let mut q = f
        .factory
        .new_user_query(
            "SELECT * FROM Object WHERE someField > 5.0;",
            vec![ChunkSpec::new(1, vec![]), ChunkSpec::new(2, vec![])],
        )
        .unwrap();
    assert_eq!(q.submit().unwrap(), 2);
    assert!(q.join().await.unwrap());

    let stmts = f.conn.statements();
    // Three rows imported, a result table created, partials dropped.
    let inserts: Vec<_> = stmts.iter().filter(|s| s.starts_with("INSERT INTO")).collect();
    assert_eq!(inserts.len(), 2);
    assert!(stmts.iter().any(|s| s.starts_with("CREATE TABLE result_")), "{stmts:?}");
    assert!(stmts.iter().any(|s| s.starts_with("DROP TABLE IF EXISTS")), "{stmts:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn aggregate_query_applies_fixup() {
    let f = fixture();
    let mut q = f
        .factory
        .new_user_query(
            "SELECT SUM(x), AVG(y) FROM LSST.Object GROUP BY chunkId;",
            vec![ChunkSpec::new(5, vec![]), ChunkSpec::new(6, vec![])],
        )
        .unwrap();
    q.submit().unwrap();
    assert!(q.join().await.unwrap());

    let stmts = f.conn.statements();
    let merge_stmt = stmts
        .iter()
        .find(|s| s.contains("SELECT SUM(QS1_SUM)"))
        .unwrap();
    assert!(merge_stmt.contains("GROUP BY chunkId"), "{merge_stmt}");
}

#[tokio::test(flavor = "multi_thread")]
async fn squash_on_result_error() {
    let f = fixture();
    f.service.script(
        1,
        MockScript::ResultError {
            code: 1234,
            message: "chunk 1 exploded".into(),
        },
    );
    f.service.script(2, MockScript::Hang);

    let mut q = f
        .factory
        .new_user_query(
            "SELECT * FROM Object WHERE someField > 5.0;",
            vec![ChunkSpec::new(1, vec![]), ChunkSpec::new(2, vec![])],
        )
        .unwrap();
    q.submit().unwrap();
    assert!(!q.join().await.unwrap());

    let errors = q.executive().errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.message.contains("chunk 1 exploded"));
    // The merge never ran.
    assert!(!f
        .conn
        .statements()
        .iter()
        .any(|s| s.starts_with("CREATE TABLE result_")));
}

#[tokio::test(flavor = "multi_thread")]
async fn disallowed_db_rejected() {
    test_helpers::maybe_start_logging();
    let service = Arc::new(MockQueryService::new());
    let conn = Arc::new(sql::MemSql::new());
    let dyn_service: Arc<dyn qdisp::QueryService> = Arc::clone(&service) as _;
    let dyn_conn: sql::SqlConnectionRef = Arc::clone(&conn) as _;
    let config = ClientConfig {
        default_db: "LSST".into(),
        allowed_dbs: vec!["Winter2012".into()],
        ..Default::default()
    };
    let factory = UserQueryFactory::new(
        config,
        css::lsst_test_css(),
        dyn_service,
        dyn_conn,
        Arc::new(Registry::new()),
    );
    let err = factory
        .new_user_query("SELECT * FROM Object;", vec![])
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, ccontrol::Error::DbNotAllowed { .. }), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn catalog_empty_chunks_are_pruned() {
    test_helpers::maybe_start_logging();
    let service = Arc::new(MockQueryService::new());
    let conn = Arc::new(sql::MemSql::new());
    let dyn_service: Arc<dyn qdisp::QueryService> = Arc::clone(&service) as _;
    let dyn_conn: sql::SqlConnectionRef = Arc::clone(&conn) as _;

    let mut builder = css::MemCss::new();
    builder
        .add_db("LSST", css::StripingParams::default())
        .add_table(
            "LSST",
            "Object",
            css::TableKind::Director {
                lon_col: "ra_PS".into(),
                lat_col: "decl_PS".into(),
                key_col: "objectId".into(),
                partitioning_id: 1,
            },
        )
        .add_empty_chunk("LSST", 2);
    let factory = UserQueryFactory::new(
        ClientConfig {
            default_db: "LSST".into(),
            ..Default::default()
        },
        builder.build(),
        dyn_service,
        dyn_conn,
        Arc::new(Registry::new()),
    );

    let mut q = factory
        .new_user_query(
            "SELECT * FROM Object WHERE someField > 5.0;",
            vec![ChunkSpec::new(1, vec![]), ChunkSpec::new(2, vec![])],
        )
        .unwrap();
    // Chunk 2 is known empty and never dispatched.
    assert_eq!(q.submit().unwrap(), 1);
    assert!(q.join().await.unwrap());
    assert_eq!(service.dispatches(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn dummy_chunk_runs_once_for_replicated_table() {
    let f = fixture();
    let mut q = f
        .factory
        .new_user_query("SELECT * FROM Filter WHERE filterId=4;", vec![])
        .unwrap();
    assert_eq!(q.submit().unwrap(), 1);
    assert!(q.join().await.unwrap());
    assert_eq!(f.service.dispatches(), 1);
}
