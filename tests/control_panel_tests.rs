//! Control actions, connect snapshot and the `{action, data}` wire shape
use std::sync::Arc;

use energy_price_crawler::control::{
    ControlCommand, ControlEnvelope, ControlError, ControlHub, ControlPanel, SchedulerLoop,
};
use energy_price_crawler::crawling::Orchestrator;
use energy_price_crawler::domain::{BotEvent, EventTarget};
use energy_price_crawler::infrastructure::config::{AppConfig, CountryConfig};
use energy_price_crawler::infrastructure::{CsvGeoImporter, GeoImporter, PageFetcher};
use energy_price_crawler::test_utils::{RecordingSink, StubFetcher, TestDatabase};
use rstest::rstest;
use serde_json::{Value, json};
use uuid::Uuid;

struct Fixture {
    _db: TestDatabase,
    sink: Arc<RecordingSink>,
    hub: Arc<ControlHub>,
    scheduler: Arc<SchedulerLoop>,
    panel: ControlPanel,
}

async fn fixture() -> Fixture {
    let db = TestDatabase::new().await.unwrap();
    db.seed_area("Testland", "1000").await.unwrap();
    let sink = Arc::new(RecordingSink::default());

    let mut config = AppConfig::default();
    config.scheduler.interval_seconds = 600;
    config.countries = vec![CountryConfig::new("Testland", "http://x/")];
    let config = Arc::new(config);

    let fetcher: Arc<dyn PageFetcher> = Arc::new(StubFetcher::new(200, "{}"));
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&config), db.repository(), fetcher, sink.clone()));
    orchestrator.init_tasks().await.unwrap();

    let hub = Arc::new(ControlHub::new(false));
    let scheduler = Arc::new(SchedulerLoop::new(&config.scheduler, Arc::clone(&orchestrator), sink.clone()));
    let importer: Arc<dyn GeoImporter> = Arc::new(CsvGeoImporter::new(db.pool(), sink.clone()));
    let panel = ControlPanel::new(orchestrator, Arc::clone(&scheduler), Arc::clone(&hub), importer, sink.clone());
    Fixture { _db: db, sink, hub, scheduler, panel }
}

fn private_events(sink: &RecordingSink, connection: Uuid) -> Vec<BotEvent> {
    sink.events()
        .into_iter()
        .filter(|d| d.target == EventTarget::Connection(connection))
        .map(|d| d.event)
        .collect()
}

#[tokio::test]
async fn new_connection_receives_a_private_snapshot() {
    let fx = fixture().await;
    let connection = Uuid::new_v4();

    fx.panel.on_connect(connection).await;

    let actions: Vec<&str> = private_events(&fx.sink, connection)
        .iter()
        .map(BotEvent::action)
        .filter(|a| *a != "get_log")
        .collect();
    assert_eq!(
        actions,
        vec![
            "get_process",
            "get_num_task",
            "get_num_workers",
            "get_scheduler_interval",
            "get_pause_timer",
            "get_verbose_log",
            "get_save_json_db",
            "get_save_json_file",
        ]
    );
    let snapshot = private_events(&fx.sink, connection);
    assert!(snapshot.contains(&BotEvent::TaskProgress { country: "Testland".into(), cursor: 0, total: 1 }));
    assert!(snapshot.contains(&BotEvent::SchedulerInterval(600)));
}

#[tokio::test]
async fn unknown_action_is_reported_to_the_requester_only() {
    let fx = fixture().await;
    let connection = Uuid::new_v4();

    fx.panel.handle_text(connection, r#"{"action": "reboot", "data": null}"#).await;

    assert_eq!(private_events(&fx.sink, connection), vec![BotEvent::forced("Unknown action : reboot")]);
}

#[tokio::test]
async fn bad_data_and_bad_frames_produce_error_logs() {
    let fx = fixture().await;
    let connection = Uuid::new_v4();

    fx.panel.handle_text(connection, r#"{"action": "set_scheduler_interval", "data": 0}"#).await;
    fx.panel.handle_text(connection, r#"{"action": "set_process", "data": "yes"}"#).await;
    fx.panel.handle_text(connection, "not json at all").await;

    let errors: Vec<String> = private_events(&fx.sink, connection)
        .into_iter()
        .filter_map(|e| match e {
            BotEvent::Log { message, force: true } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|m| m.starts_with("Error: ")));
    assert_eq!(fx.scheduler.interval(), 600);
}

#[tokio::test]
async fn interval_and_pause_actions_drive_the_scheduler() {
    let fx = fixture().await;
    let connection = Uuid::new_v4();

    fx.panel.handle(connection, &ControlEnvelope::new("set_scheduler_interval", json!(120))).await;
    fx.panel.handle(connection, &ControlEnvelope::new("set_pause_timer", Value::Null)).await;

    assert_eq!(fx.scheduler.interval(), 120);
    assert_eq!(fx.scheduler.countdown(), 120);
    assert!(fx.scheduler.is_paused());
    let broadcast: Vec<BotEvent> = fx
        .sink
        .events()
        .into_iter()
        .filter(|d| d.target == EventTarget::Broadcast)
        .map(|d| d.event)
        .collect();
    assert!(broadcast.contains(&BotEvent::SchedulerInterval(120)));
    assert!(broadcast.contains(&BotEvent::PauseTimer(true)));
}

#[tokio::test]
async fn verbose_toggle_switches_the_hub_filter() {
    let fx = fixture().await;
    assert!(!fx.hub.is_verbose());

    fx.panel.execute(ControlCommand::ToggleVerboseLog).await.unwrap();

    assert!(fx.hub.is_verbose());
    assert!(fx.sink.events().iter().any(|d| d.event == BotEvent::VerboseLog(true)));
    assert!(fx.sink.contains_log("Verbose logging has been enabled."));
}

#[tokio::test]
async fn worker_actions_broadcast_the_new_count() {
    let fx = fixture().await;

    fx.panel.execute(ControlCommand::AddWorker).await.unwrap();
    fx.panel.execute(ControlCommand::RemoveWorker).await.unwrap();

    let counts: Vec<usize> = fx
        .sink
        .events()
        .into_iter()
        .filter_map(|d| match d.event {
            BotEvent::WorkerCount(n) => Some(n),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![2, 1]);
}

#[rstest]
#[case("set_scheduler_interval", json!(60), ControlCommand::SetSchedulerInterval(60))]
#[case("add_worker", Value::Null, ControlCommand::AddWorker)]
#[case("remove_worker", Value::Null, ControlCommand::RemoveWorker)]
#[case("set_process", json!(true), ControlCommand::SetProcess { fresh_session: true })]
#[case("set_pause_timer", Value::Null, ControlCommand::TogglePauseTimer)]
#[case("set_verbose_log", json!(true), ControlCommand::ToggleVerboseLog)]
#[case("set_tasks", Value::Null, ControlCommand::SetTasks)]
#[case("set_save_json_db", Value::Null, ControlCommand::ToggleSaveJsonDb)]
#[case("set_save_json_file", Value::Null, ControlCommand::ToggleSaveJsonFile)]
#[case("import_geos_from_csv", Value::Null, ControlCommand::ImportGeography)]
fn every_inbound_action_parses(#[case] action: &str, #[case] data: Value, #[case] expected: ControlCommand) {
    assert_eq!(ControlCommand::try_from(&ControlEnvelope::new(action, data)), Ok(expected));
}

#[test]
fn unknown_actions_are_rejected() {
    let envelope = ControlEnvelope::new("get_timer", Value::Null);
    assert_eq!(
        ControlCommand::try_from(&envelope),
        Err(ControlError::UnknownAction("get_timer".into()))
    );
}

#[rstest]
#[case(BotEvent::WorkerCount(3), json!({"action": "get_num_workers", "data": 3}))]
#[case(BotEvent::Timer(42), json!({"action": "get_timer", "data": 42}))]
#[case(BotEvent::ProcessState(true), json!({"action": "get_process", "data": true}))]
#[case(BotEvent::forced("hello"), json!({"action": "get_log", "data": "hello"}))]
#[case(
    BotEvent::TaskProgress { country: "Testland".into(), cursor: 3, total: 10 },
    json!({"action": "get_num_task", "data": {"id": "Testland", "data": "3/10"}})
)]
fn outbound_events_serialize_as_envelopes(#[case] event: BotEvent, #[case] expected: Value) {
    let wire: Value = serde_json::from_str(&ControlEnvelope::from(&event).to_json()).unwrap();
    assert_eq!(wire, expected);
}
