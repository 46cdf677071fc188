//! Fetch-and-persist pipeline against a mock price endpoint
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use energy_price_crawler::crawling::pipeline::{self, TaskOutcome};
use energy_price_crawler::crawling::{PostalTask, StaticPolicy, TaskQueue, TransformEngine, WorkerContext};
use energy_price_crawler::domain::PostalArea;
use energy_price_crawler::infrastructure::config::{ComponentAliases, FetchConfig, TransformConfig};
use energy_price_crawler::infrastructure::{HttpClient, PageFetcher, PayloadArchive, PriceRepository, Table};
use energy_price_crawler::test_utils::{RecordingSink, StubFetcher, TestDatabase};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn testland_payload() -> Value {
    json!({"energy": {"sectionA": [
        {"date": "2024-01-01", "hour": 1, "priceComponents": [{"type": "alias1", "priceExcludingVat": 12.5}]}
    ]}})
}

fn transform_config() -> TransformConfig {
    TransformConfig {
        sections: vec!["sectionA".into()],
        components: vec![ComponentAliases { name: "Energy".into(), aliases: vec!["alias1".into()] }],
    }
}

fn policy() -> StaticPolicy {
    StaticPolicy { transform_on_fetch: true, ..StaticPolicy::default() }
}

fn context(db: &TestDatabase, sink: &Arc<RecordingSink>, policy: StaticPolicy, archive: &Path) -> WorkerContext {
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpClient::new(&FetchConfig::default()).unwrap());
    context_with(db, sink, policy, archive, fetcher)
}

fn context_with(
    db: &TestDatabase,
    sink: &Arc<RecordingSink>,
    policy: StaticPolicy,
    archive: &Path,
    fetcher: Arc<dyn PageFetcher>,
) -> WorkerContext {
    WorkerContext {
        pool: db.pool(),
        fetcher,
        transform: Arc::new(TransformEngine::new(&transform_config(), db.repository(), sink.clone())),
        archive: PayloadArchive::new(archive),
        policy: Arc::new(policy),
        events: sink.clone(),
    }
}

fn fetch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
}

async fn run_one(
    ctx: &WorkerContext,
    db: &TestDatabase,
    server: &MockServer,
    sink: &Arc<RecordingSink>,
    area: &PostalArea,
) -> TaskOutcome {
    let task = PostalTask { area_id: area.id.clone(), code: area.code.clone() };
    let queue = TaskQueue::with_tasks("Testland", &format!("{}/", server.uri()), vec![task.clone()], sink.clone());
    let mut conn = db.pool().acquire().await.unwrap();
    pipeline::process_task(ctx, &mut conn, &queue, &task, fetch_date()).await
}

#[tokio::test]
async fn successful_fetch_persists_status_and_transforms() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(testland_payload()))
        .expect(1)
        .mount(&server)
        .await;

    let db = TestDatabase::new().await.unwrap();
    let area = db.seed_area("Testland", "1000").await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&db, &sink, policy(), dir.path());

    let outcome = run_one(&ctx, &db, &server, &sink, &area).await;

    assert_eq!(outcome, TaskOutcome::Stored { status: 200, transformed: true });
    assert_eq!(db.area_state(&area.id).await.unwrap(), (Some(200), None));
    let repo = db.repository();
    assert_eq!(repo.count_rows(Table::Values).await.unwrap(), 1);
    assert!(repo.eligible_areas("Testland").await.unwrap().is_empty());
}

#[tokio::test]
async fn payload_is_stored_when_enabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(testland_payload()))
        .mount(&server)
        .await;

    let db = TestDatabase::new().await.unwrap();
    let area = db.seed_area("Testland", "1000").await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&db, &sink, StaticPolicy { save_json_db: true, ..StaticPolicy::default() }, dir.path());

    let outcome = run_one(&ctx, &db, &server, &sink, &area).await;

    assert_eq!(outcome, TaskOutcome::Stored { status: 200, transformed: false });
    let (status, data) = db.area_state(&area.id).await.unwrap();
    assert_eq!(status, Some(200));
    let stored: Value = serde_json::from_str(&data.unwrap()).unwrap();
    assert_eq!(stored, testland_payload());
    assert_eq!(db.repository().count_rows(Table::Values).await.unwrap(), 0);
}

#[tokio::test]
async fn no_data_area_is_never_requested() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let db = TestDatabase::new().await.unwrap();
    let area = db.seed_area("Testland", "1000").await.unwrap();
    let mut conn = db.pool().acquire().await.unwrap();
    PriceRepository::set_status(&mut conn, &area.id, 400).await.unwrap();
    drop(conn);

    let sink = Arc::new(RecordingSink::default());
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&db, &sink, policy(), dir.path());

    assert_eq!(run_one(&ctx, &db, &server, &sink, &area).await, TaskOutcome::Skipped);
    assert!(sink.contains_log("NO DATA!"));
    assert_eq!(db.area_state(&area.id).await.unwrap(), (Some(400), None));
}

#[tokio::test]
async fn http_failure_persists_status_and_stays_eligible() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path("/1000")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

    let db = TestDatabase::new().await.unwrap();
    let area = db.seed_area("Testland", "1000").await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&db, &sink, policy(), dir.path());

    assert_eq!(run_one(&ctx, &db, &server, &sink, &area).await, TaskOutcome::HttpFailure { status: 404 });
    assert_eq!(db.area_state(&area.id).await.unwrap(), (Some(404), None));
    assert!(sink.contains_log("Status Code: 404"));

    let eligible = db.repository().eligible_areas("Testland").await.unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].status_code, Some(404));
}

#[tokio::test]
async fn archive_file_is_written_per_date_country_and_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(testland_payload()))
        .mount(&server)
        .await;

    let db = TestDatabase::new().await.unwrap();
    let area = db.seed_area("Testland", "1000").await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&db, &sink, StaticPolicy { save_json_file: true, ..StaticPolicy::default() }, dir.path());

    run_one(&ctx, &db, &server, &sink, &area).await;

    let file = dir.path().join("2024-01-02").join("Testland").join("1000.json");
    let written: Value = serde_json::from_str(&std::fs::read_to_string(file).unwrap()).unwrap();
    assert_eq!(written, testland_payload());
}

#[tokio::test]
async fn non_json_success_body_persists_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1000"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let db = TestDatabase::new().await.unwrap();
    let area = db.seed_area("Testland", "1000").await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&db, &sink, StaticPolicy { save_json_db: true, ..policy() }, dir.path());

    assert_eq!(run_one(&ctx, &db, &server, &sink, &area).await, TaskOutcome::InvalidBody { status: 200 });
    assert_eq!(db.area_state(&area.id).await.unwrap(), (None, None));
}

#[tokio::test]
async fn transport_failure_writes_nothing() {
    let db = TestDatabase::new().await.unwrap();
    let area = db.seed_area("Testland", "1000").await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&db, &sink, policy(), dir.path());

    // nothing listens on the discard port
    let task = PostalTask { area_id: area.id.clone(), code: area.code.clone() };
    let queue = TaskQueue::with_tasks("Testland", "http://127.0.0.1:9/", vec![task.clone()], sink.clone());
    let mut conn = db.pool().acquire().await.unwrap();
    let outcome = pipeline::process_task(&ctx, &mut conn, &queue, &task, fetch_date()).await;

    assert_eq!(outcome, TaskOutcome::TransportFailure);
    assert_eq!(db.area_state(&area.id).await.unwrap(), (None, None));
    assert!(sink.contains_log("Status Code: None"));
}

async fn run_stubbed(ctx: &WorkerContext, db: &TestDatabase, sink: &Arc<RecordingSink>, area: &PostalArea) -> TaskOutcome {
    let task = PostalTask { area_id: area.id.clone(), code: area.code.clone() };
    let queue = TaskQueue::with_tasks("Testland", "http://x/", vec![task.clone()], sink.clone());
    let mut conn = db.pool().acquire().await.unwrap();
    pipeline::process_task(ctx, &mut conn, &queue, &task, fetch_date()).await
}

#[tokio::test]
async fn body_read_failure_still_persists_the_status() {
    let db = TestDatabase::new().await.unwrap();
    let area = db.seed_area("Testland", "1000").await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let dir = tempfile::tempdir().unwrap();
    let fetcher: Arc<dyn PageFetcher> = Arc::new(StubFetcher::new(503, "").with_body_error());
    let ctx = context_with(&db, &sink, policy(), dir.path(), fetcher);

    let outcome = run_stubbed(&ctx, &db, &sink, &area).await;

    assert_eq!(outcome, TaskOutcome::BodyFailure { status: 503 });
    assert_eq!(db.area_state(&area.id).await.unwrap(), (Some(503), None));
    assert!(sink.contains_log("Status Code: 503"));
    assert_eq!(db.repository().eligible_areas("Testland").await.unwrap().len(), 1);
}

#[tokio::test]
async fn constraint_conflict_rolls_back_and_keeps_only_the_status() {
    let db = TestDatabase::new().await.unwrap();
    let stored = db.seed_area("Testland", "1000").await.unwrap();
    let area = db.seed_area("Testland", "1001").await.unwrap();
    // identical payloads now collide
    sqlx::query("CREATE UNIQUE INDEX ux_postal_areas_payload ON postal_areas(pa_data)")
        .execute(&db.pool())
        .await
        .unwrap();
    let body = json!({"energy": {}});
    let mut conn = db.pool().acquire().await.unwrap();
    PriceRepository::store_payload(&mut conn, &stored.id, &body.to_string()).await.unwrap();
    drop(conn);

    let sink = Arc::new(RecordingSink::default());
    let dir = tempfile::tempdir().unwrap();
    let fetcher: Arc<dyn PageFetcher> = Arc::new(StubFetcher::new(200, body.to_string()));
    let ctx = context_with(&db, &sink, StaticPolicy { save_json_db: true, ..policy() }, dir.path(), fetcher);

    let outcome = run_stubbed(&ctx, &db, &sink, &area).await;

    assert_eq!(outcome, TaskOutcome::Conflict { status: 200 });
    assert_eq!(db.area_state(&area.id).await.unwrap(), (Some(200), None));
    assert!(sink.contains_log("Duplicate"));
    assert_eq!(db.repository().count_rows(Table::Values).await.unwrap(), 0);
}
