// ABOUTME: Integration tests against live MySQL and PostgreSQL servers
// ABOUTME: Run with TEST_MYSQL_URL / TEST_POSTGRES_URL set and `cargo test -- --ignored`

use mysql_async::prelude::Queryable;
use std::env;
use std::sync::Arc;
use watermark_replicator::connectors::mysql::MySqlSource;
use watermark_replicator::connectors::postgres::{PostgresSource, PostgresTarget};
use watermark_replicator::watermark::{compute_new_watermark, MemoryCheckpointStore, WatermarkValue};
use watermark_replicator::{
    EndpointConfig, ExtractedRowSet, LoadMode, PipelineRunner, ReplicatorError, ScalarValue,
    SourceConnector, TableEntry, TargetConnector, WatermarkType,
};

fn endpoint_from_url(kind: &str, raw: &str) -> EndpointConfig {
    let url = url::Url::parse(raw).expect("invalid test database URL");
    let mut endpoint = EndpointConfig::new(
        kind,
        url.host_str().unwrap_or("localhost"),
        url.path().trim_start_matches('/'),
    );
    endpoint.port = url.port();
    endpoint.user = Some(url.username().to_string());
    endpoint.password = url.password().map(str::to_string);
    endpoint
}

fn mysql_endpoint() -> Option<(String, EndpointConfig)> {
    let raw = env::var("TEST_MYSQL_URL").ok()?;
    let endpoint = endpoint_from_url("mysql", &raw);
    Some((raw, endpoint))
}

fn postgres_endpoint() -> Option<(String, EndpointConfig)> {
    let raw = env::var("TEST_POSTGRES_URL").ok()?;
    let endpoint = endpoint_from_url("postgres", &raw);
    Some((raw, endpoint))
}

async fn postgres_client(url: &str) -> tokio_postgres::Client {
    let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls)
        .await
        .expect("connect to TEST_POSTGRES_URL");
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn setup_mysql_orders(url: &str, table: &str) -> mysql_async::Conn {
    let opts = mysql_async::Opts::from_url(url).expect("parse TEST_MYSQL_URL");
    let mut conn = mysql_async::Conn::new(opts).await.expect("connect to MySQL");
    let statements = [
        format!("DROP TABLE IF EXISTS {}", table),
        format!(
            "CREATE TABLE {} (
                 order_id INT PRIMARY KEY,
                 order_date DATETIME NOT NULL,
                 order_status VARCHAR(45) NOT NULL,
                 amount DECIMAL(10,2)
             )",
            table
        ),
        format!(
            "INSERT INTO {} VALUES
                 (1, '2024-01-01 00:00:00', 'CLOSED', 10.50),
                 (2, '2024-01-02 00:00:00', 'PENDING', NULL),
                 (3, '2024-01-03 08:30:00', 'COMPLETE', 99.99)",
            table
        ),
    ];
    for statement in statements {
        conn.query_drop(statement).await.expect("set up MySQL orders table");
    }
    conn
}

async fn setup_postgres_orders(client: &tokio_postgres::Client, table: &str) {
    client
        .batch_execute(&format!(
            r#"
            DROP TABLE IF EXISTS "public"."{table}";
            CREATE TABLE "public"."{table}" (
                order_id INTEGER PRIMARY KEY,
                order_date TIMESTAMP NOT NULL,
                order_status VARCHAR(45) NOT NULL,
                amount NUMERIC(10,2)
            )
            "#
        ))
        .await
        .expect("create Postgres orders table");
}

async fn row_count(client: &tokio_postgres::Client, schema: &str, table: &str) -> i64 {
    client
        .query_one(
            &format!(r#"SELECT COUNT(*) FROM "{}"."{}""#, schema, table),
            &[],
        )
        .await
        .unwrap()
        .get(0)
}

#[tokio::test]
#[ignore]
async fn test_mysql_incremental_excludes_boundary_row() {
    let Some((url, endpoint)) = mysql_endpoint() else {
        eprintln!("TEST_MYSQL_URL not set, skipping");
        return;
    };
    let conn = setup_mysql_orders(&url, "wm_orders_boundary").await;

    let mut source = MySqlSource::new(endpoint);
    source.connect().await.unwrap();

    let mode = LoadMode::Incremental {
        column: "order_date".to_string(),
        last_value: WatermarkValue::Timestamp("2024-01-02 00:00:00".to_string()),
    };
    let rows = source.extract("wm_orders_boundary", &mode).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.value(0, "order_id"), Some(&ScalarValue::Int(3)));

    let mode = LoadMode::Incremental {
        column: "order_id".to_string(),
        last_value: WatermarkValue::Id(1),
    };
    let rows = source.extract("wm_orders_boundary", &mode).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows.column_names(),
        &["order_id", "order_date", "order_status", "amount"]
    );

    let mode = LoadMode::Incremental {
        column: "order_id".to_string(),
        last_value: WatermarkValue::Id(3),
    };
    assert!(source.extract("wm_orders_boundary", &mode).await.unwrap().is_empty());

    let err = source.extract("no_such_table", &LoadMode::Full).await.unwrap_err();
    assert!(matches!(err, ReplicatorError::Query { .. }));

    source.close().await;
    source.close().await;
    let _ = conn.disconnect().await;
}

#[tokio::test]
#[ignore]
async fn test_postgres_load_rolls_back_on_failure() {
    let Some((url, endpoint)) = postgres_endpoint() else {
        eprintln!("TEST_POSTGRES_URL not set, skipping");
        return;
    };
    let client = postgres_client(&url).await;
    setup_postgres_orders(&client, "wm_orders_rollback").await;

    let columns = vec![
        "order_id".to_string(),
        "order_date".to_string(),
        "order_status".to_string(),
        "amount".to_string(),
    ];
    let row = |id: i64, date: &str| {
        vec![
            ScalarValue::Int(id),
            ScalarValue::Text(date.to_string()),
            ScalarValue::Text("PENDING".to_string()),
            ScalarValue::Null,
        ]
    };

    // Batch size 2: the duplicate key lands in the second batch.
    let mut target = PostgresTarget::new(endpoint, 2, false);
    target.connect().await.unwrap();
    let rows = ExtractedRowSet::new(
        columns.clone(),
        vec![
            row(1, "2024-01-01 00:00:00"),
            row(2, "2024-01-02 00:00:00"),
            row(3, "2024-01-03 00:00:00"),
            row(1, "2024-01-04 00:00:00"),
        ],
    )
    .unwrap();
    let err = target.load("wm_orders_rollback", &rows).await.unwrap_err();
    assert!(matches!(err, ReplicatorError::Load { .. }));
    assert_eq!(row_count(&client, "public", "wm_orders_rollback").await, 0);

    let rows = ExtractedRowSet::new(
        columns,
        vec![row(1, "2024-01-01 00:00:00"), row(2, "2024-01-02 00:00:00"), row(3, "2024-01-03")],
    )
    .unwrap();
    assert_eq!(target.load("wm_orders_rollback", &rows).await.unwrap(), 3);
    assert_eq!(row_count(&client, "public", "wm_orders_rollback").await, 3);

    target.close().await;
}

#[tokio::test]
#[ignore]
async fn test_postgres_source_incremental_id() {
    let Some((url, endpoint)) = postgres_endpoint() else {
        eprintln!("TEST_POSTGRES_URL not set, skipping");
        return;
    };
    let client = postgres_client(&url).await;
    setup_postgres_orders(&client, "wm_orders_pgsrc").await;
    client
        .batch_execute(
            "INSERT INTO wm_orders_pgsrc VALUES
                (1, '2024-01-01', 'CLOSED', 1.00),
                (2, '2024-01-02', 'PENDING', 2.00),
                (10, '2024-01-03', 'COMPLETE', NULL)",
        )
        .await
        .unwrap();

    let mut source = PostgresSource::new(endpoint, false);
    let mode = LoadMode::Incremental {
        column: "order_id".to_string(),
        last_value: WatermarkValue::Id(2),
    };
    let rows = source.extract("wm_orders_pgsrc", &mode).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.value(0, "order_id"), Some(&ScalarValue::Int(10)));

    let mode = LoadMode::Incremental {
        column: "order_date".to_string(),
        last_value: WatermarkValue::Timestamp("2024-01-01".to_string()),
    };
    assert_eq!(source.extract("wm_orders_pgsrc", &mode).await.unwrap().len(), 2);
    source.close().await;
}

#[tokio::test]
#[ignore]
async fn test_timestamptz_watermark_is_zone_independent() {
    let Some((url, endpoint)) = postgres_endpoint() else {
        eprintln!("TEST_POSTGRES_URL not set, skipping");
        return;
    };
    let client = postgres_client(&url).await;
    client
        .batch_execute(
            "DROP TABLE IF EXISTS wm_events;
             CREATE TABLE wm_events (id INTEGER PRIMARY KEY, updated_at TIMESTAMPTZ NOT NULL);
             INSERT INTO wm_events VALUES (1, '2024-01-10 15:00:00+00');",
        )
        .await
        .unwrap();

    let mut source = PostgresSource::new(endpoint, false);
    let rows = source.extract("wm_events", &LoadMode::Full).await.unwrap();
    let watermark = compute_new_watermark(
        "wm_events",
        &rows,
        Some("updated_at"),
        Some(WatermarkType::Timestamp),
    )
    .unwrap()
    .unwrap();
    assert_eq!(watermark.value, "2024-01-10 15:00:00+00");

    // The emitted text names the same instant in a session far from UTC.
    client
        .batch_execute("SET TIME ZONE 'America/New_York'")
        .await
        .unwrap();
    let same_instant: bool = client
        .query_one(
            "SELECT $1::text::timestamptz = '2024-01-10 15:00:00Z'::timestamptz",
            &[&watermark.value],
        )
        .await
        .unwrap()
        .get(0);
    assert!(same_instant);

    client
        .batch_execute("INSERT INTO wm_events VALUES (2, '2024-01-10 17:00:00+00')")
        .await
        .unwrap();
    let mode = LoadMode::Incremental {
        column: "updated_at".to_string(),
        last_value: WatermarkValue::Timestamp(watermark.value.clone()),
    };
    let rows = source.extract("wm_events", &mode).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.value(0, "id"), Some(&ScalarValue::Int(2)));

    // A watermark written without an offset is read as UTC.
    let mode = LoadMode::Incremental {
        column: "updated_at".to_string(),
        last_value: WatermarkValue::Timestamp("2024-01-10 15:00:00".to_string()),
    };
    assert_eq!(source.extract("wm_events", &mode).await.unwrap().len(), 1);
    source.close().await;
}

#[tokio::test]
#[ignore]
async fn test_postgres_columns_without_native_mapping_round_trip() {
    let Some((url, endpoint)) = postgres_endpoint() else {
        eprintln!("TEST_POSTGRES_URL not set, skipping");
        return;
    };
    let client = postgres_client(&url).await;
    client
        .batch_execute(
            r#"
            DROP TABLE IF EXISTS "public"."wm_odd";
            DROP SCHEMA IF EXISTS wm_replica CASCADE;
            DROP TYPE IF EXISTS "public"."wm_mood";
            CREATE TYPE "public"."wm_mood" AS ENUM ('calm', 'busy');
            CREATE TABLE "public"."wm_odd" (
                id INTEGER PRIMARY KEY,
                span INTERVAL,
                tags TEXT[],
                addr INET,
                mood "public"."wm_mood"
            );
            INSERT INTO "public"."wm_odd" VALUES
                (1, '1 hour', ARRAY['a', 'b'], '10.0.0.1', 'calm'),
                (2, NULL, NULL, NULL, 'busy');
            CREATE SCHEMA wm_replica;
            CREATE TABLE wm_replica.wm_odd (LIKE "public"."wm_odd");
            "#,
        )
        .await
        .unwrap();

    let mut source = PostgresSource::new(endpoint.clone(), false);
    let rows = source.extract("wm_odd", &LoadMode::Full).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows.value(0, "mood"),
        Some(&ScalarValue::Text("calm".to_string()))
    );
    assert_eq!(rows.value(1, "span"), Some(&ScalarValue::Null));
    source.close().await;

    let mut replica = endpoint;
    replica.schema = Some("wm_replica".to_string());
    let mut target = PostgresTarget::new(replica, 1000, false);
    assert_eq!(target.load("wm_odd", &rows).await.unwrap(), 2);
    target.close().await;

    let row = client
        .query_one(
            "SELECT span = INTERVAL '1 hour', tags = ARRAY['a', 'b'], \
                    addr = INET '10.0.0.1', mood::text
             FROM wm_replica.wm_odd WHERE id = 1",
            &[],
        )
        .await
        .unwrap();
    assert!(row.get::<_, bool>(0));
    assert!(row.get::<_, bool>(1));
    assert!(row.get::<_, bool>(2));
    assert_eq!(row.get::<_, String>(3), "calm");
}

#[tokio::test]
#[ignore]
async fn test_mysql_to_postgres_end_to_end() {
    let (Some((mysql_url, mysql)), Some((pg_url, pg))) = (mysql_endpoint(), postgres_endpoint())
    else {
        eprintln!("TEST_MYSQL_URL / TEST_POSTGRES_URL not set, skipping");
        return;
    };
    let conn = setup_mysql_orders(&mysql_url, "wm_orders_e2e").await;
    let client = postgres_client(&pg_url).await;
    setup_postgres_orders(&client, "wm_orders_e2e").await;

    let entry =
        TableEntry::new("wm_orders_e2e").with_watermark("order_date", WatermarkType::Timestamp);
    let checkpoints = Arc::new(MemoryCheckpointStore::with_values([(
        "wm_orders_e2e",
        "2024-01-01 00:00:00",
    )]));

    let summary = PipelineRunner::new(
        Box::new(MySqlSource::new(mysql)),
        Box::new(PostgresTarget::new(pg, 1000, false)),
        checkpoints.clone(),
    )
    .run(&[entry])
    .await
    .unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.rows_loaded(), 2);
    assert_eq!(row_count(&client, "public", "wm_orders_e2e").await, 2);
    assert_eq!(
        checkpoints
            .snapshot()
            .await
            .get("wm_orders_e2e")
            .map(String::as_str),
        Some("2024-01-03 08:30:00")
    );
    let _ = conn.disconnect().await;
}
