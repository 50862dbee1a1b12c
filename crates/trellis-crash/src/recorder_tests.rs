use super::*;
use std::time::Duration;
use tempfile::tempdir;
use trellis_bus::BusConfig;
use trellis_core::clock::FakeClock;
use trellis_core::output_parser::OutputParser;
use trellis_core::service::{Command as ServiceCommand, RestartPolicy, StopSignal};

fn descriptor(name: &str, shell: &str) -> trellis_core::service::ServiceDescriptor {
    trellis_core::service::ServiceDescriptor {
        name: ServiceName::new(name),
        command: ServiceCommand::Shell(shell.to_string()),
        working_dir: "/tmp".to_string(),
        env: Default::default(),
        watched_binary: None,
        watched_files: vec![],
        restart_policy: RestartPolicy::Never,
        max_restarts: 0,
        restart_delay: Duration::from_millis(10),
        stop_signal: StopSignal::Term,
        stop_timeout: Duration::from_secs(2),
        parser: OutputParser::GoTestJson,
    }
}

async fn seeded(reports_dir: std::path::PathBuf) -> (CrashRecorder<FakeClock>, EventBus<FakeClock>, Supervisor<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    let bus = EventBus::new(clock.clone(), BusConfig::default());
    let supervisor = Supervisor::new(bus.clone(), clock.clone());

    supervisor
        .update_configs(vec![
            descriptor(
                "api",
                r#"echo '{"Action":"output","Test":"req-1","Output":"starting"}'; echo '{"Action":"output","Test":"req-2","Output":"boom"}'"#,
            ),
            descriptor(
                "worker",
                r#"echo '{"Action":"output","Test":"req-1","Output":"handling"}'"#,
            ),
        ])
        .await
        .unwrap();
    supervisor.start(&ServiceName::new("api")).await.unwrap();
    supervisor
        .start(&ServiceName::new("worker"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let config = CrashConfig {
        reports_dir,
        default_id_field: "test".to_string(),
        stack_field: None,
        ..CrashConfig::default()
    };
    let recorder = CrashRecorder::new(supervisor.clone(), bus.clone(), clock.clone(), config);
    recorder.subscribe();
    (recorder, bus, supervisor, clock)
}

#[tokio::test]
async fn correlates_across_services_by_preferred_trace_id() {
    let dir = tempdir().unwrap();
    let (recorder, bus, _supervisor, clock) = seeded(dir.path().to_path_buf()).await;

    let event = Event::new("service.crashed")
        .with_payload("service", "api")
        .with_payload("exit_code", 1)
        .with_payload("reason", "exit code 1");
    let mut event = event;
    event.timestamp_ms = clock.epoch_ms();
    event.worktree = "main".to_string();
    bus.publish(event).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let record = recorder.newest().expect("crash recorded");
    assert_eq!(record.service, ServiceName::new("api"));
    assert_eq!(record.exit_code, Some(1));
    assert_eq!(record.trace_id, Some("req-1".to_string()));
    assert!(record
        .entries
        .iter()
        .any(|e| e.service == ServiceName::new("worker")));
    assert!(record
        .entries
        .iter()
        .all(|e| e.line.fields.get("test") == Some(&"req-1".to_string())));

    let path = dir.path().join(format!("{}.json", record.id));
    assert!(path.exists());
}

#[tokio::test]
async fn falls_back_to_crashing_service_only_when_no_trace_id() {
    let clock = FakeClock::new();
    let bus = EventBus::new(clock.clone(), BusConfig::default());
    let supervisor = Supervisor::new(bus.clone(), clock.clone());
    supervisor
        .update_configs(vec![descriptor("lonely", "echo plain output line")])
        .await
        .unwrap();
    supervisor
        .start(&ServiceName::new("lonely"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let dir = tempdir().unwrap();
    let config = CrashConfig {
        reports_dir: dir.path().to_path_buf(),
        default_id_field: "test".to_string(),
        stack_field: None,
        ..CrashConfig::default()
    };
    let recorder = CrashRecorder::new(supervisor, bus.clone(), clock.clone(), config);
    recorder.subscribe();

    let mut event = Event::new("service.crashed").with_payload("service", "lonely");
    event.timestamp_ms = clock.epoch_ms();
    event.worktree = "main".to_string();
    bus.publish(event).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let record = recorder.newest().expect("crash recorded");
    assert_eq!(record.trace_id, None);
    assert!(record
        .entries
        .iter()
        .all(|e| e.service == ServiceName::new("lonely")));
}

#[tokio::test]
async fn delete_removes_record_and_file() {
    let dir = tempdir().unwrap();
    let (recorder, bus, _supervisor, clock) = seeded(dir.path().to_path_buf()).await;
    let mut event = Event::new("service.crashed").with_payload("service", "api");
    event.timestamp_ms = clock.epoch_ms();
    event.worktree = "main".to_string();
    bus.publish(event).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let record = recorder.newest().unwrap();
    recorder.delete(&record.id).unwrap();
    assert!(recorder.get(&record.id).is_none());
    assert!(!dir.path().join(format!("{}.json", record.id)).exists());
}

#[tokio::test]
async fn delete_unknown_id_errors() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new();
    let bus = EventBus::new(clock.clone(), BusConfig::default());
    let supervisor = Supervisor::new(bus.clone(), clock.clone());
    let config = CrashConfig {
        reports_dir: dir.path().to_path_buf(),
        ..CrashConfig::default()
    };
    let recorder = CrashRecorder::new(supervisor, bus, clock, config);
    let result = recorder.delete(&trellis_core::id::CrashId::new("nope"));
    assert!(result.is_err());
}

fn crash_record(id: &str, timestamp_ms: u64) -> CrashRecord {
    CrashRecord {
        id: trellis_core::id::CrashId::new(id),
        schema_version: 1,
        service: ServiceName::new("api"),
        timestamp_ms,
        trigger: "t".to_string(),
        exit_code: None,
        worktree: "main".to_string(),
        stack: None,
        trace_id: None,
        entries: vec![],
        histogram: CrashHistogram::default(),
    }
}

#[yare::parameterized(
    well_within_max_age = { 3_600_000, 100_000, true },
    exactly_at_cutoff = { 3_600_000, 3_600_000, true },
    just_past_cutoff = { 3_600_000, 3_600_001, false },
    far_past_cutoff = { 3_600_000, 10_000_000, false },
)]
fn sweep_trims_by_age_at_the_cutoff_boundary(max_age_ms: u64, record_age_ms: u64, kept: bool) {
    let clock = FakeClock::new();
    let bus = EventBus::new(clock.clone(), BusConfig::default());
    let supervisor = Supervisor::new(bus.clone(), clock.clone());
    let now_ms = 20_000_000;
    clock.set_epoch_ms(now_ms);
    let config = CrashConfig {
        max_count: 100,
        max_age: Duration::from_millis(max_age_ms),
        ..CrashConfig::default()
    };
    let recorder = CrashRecorder::new(supervisor, bus, clock, config);
    recorder
        .inner
        .records
        .write()
        .push(crash_record("boundary", now_ms - record_age_ms));
    sweep(&recorder.inner);
    assert_eq!(recorder.list().len(), if kept { 1 } else { 0 });
}

#[test]
fn sweep_trims_to_max_count_keeping_newest() {
    let clock = FakeClock::new();
    let bus = EventBus::new(clock.clone(), BusConfig::default());
    let supervisor = Supervisor::new(bus.clone(), clock.clone());
    let config = CrashConfig {
        max_count: 1,
        max_age: Duration::from_secs(3600),
        ..CrashConfig::default()
    };
    let recorder = CrashRecorder::new(supervisor, bus, clock, config);
    let mut records = recorder.inner.records.write();
    records.push(CrashRecord {
        id: trellis_core::id::CrashId::new("old"),
        schema_version: 1,
        service: ServiceName::new("api"),
        timestamp_ms: 1,
        trigger: "t".to_string(),
        exit_code: None,
        worktree: "main".to_string(),
        stack: None,
        trace_id: None,
        entries: vec![],
        histogram: CrashHistogram::default(),
    });
    records.push(CrashRecord {
        id: trellis_core::id::CrashId::new("new"),
        schema_version: 1,
        service: ServiceName::new("api"),
        timestamp_ms: 2,
        trigger: "t".to_string(),
        exit_code: None,
        worktree: "main".to_string(),
        stack: None,
        trace_id: None,
        entries: vec![],
        histogram: CrashHistogram::default(),
    });
    drop(records);
    sweep(&recorder.inner);
    let records = recorder.list();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, trellis_core::id::CrashId::new("new"));
}
