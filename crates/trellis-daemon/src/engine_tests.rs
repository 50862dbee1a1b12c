use super::*;
use std::time::Duration as StdDuration;
use trellis_core::clock::FakeClock;
use trellis_core::id::WorktreeName;
use trellis_core::service::{Command, RestartPolicy, StopSignal};

fn service(name: &str) -> ServiceDescriptor {
    ServiceDescriptor {
        name: ServiceName::new(name),
        command: Command::Shell("pwd".to_string()),
        working_dir: "{{.Worktree.Root}}".to_string(),
        env: Default::default(),
        watched_binary: Some("{{.Worktree.Root}}/bin/app".to_string()),
        watched_files: vec![],
        restart_policy: RestartPolicy::Never,
        max_restarts: 0,
        restart_delay: StdDuration::from_millis(10),
        stop_signal: StopSignal::Term,
        stop_timeout: StdDuration::from_secs(2),
        parser: Default::default(),
    }
}

async fn new_engine() -> Engine<FakeClock> {
    Engine::new(FakeClock::new(), CrashConfig::default(), "/tmp".to_string()).unwrap()
}

fn worktree(dir: &std::path::Path) -> WorktreeDescriptor {
    WorktreeDescriptor {
        name: WorktreeName::new("wt-1"),
        path: dir.display().to_string(),
        branch: "wt-1".to_string(),
        template_context: Default::default(),
    }
}

#[tokio::test]
async fn apply_active_worktree_reconciles_watches_synchronously() {
    let engine = new_engine().await;
    let dir = tempfile::tempdir().unwrap();
    let wt = worktree(dir.path());
    engine.worktree.create(wt.clone()).unwrap();
    engine.worktree.set_active(&wt.name).unwrap();

    engine
        .set_raw_config(RawConfig {
            services: vec![service("api")],
            workflows: vec![],
            workflow_working_dir: String::new(),
        })
        .await;

    let watching = engine.watcher.watching();
    assert!(watching.iter().any(|n| n.as_str() == "api"));
}

#[tokio::test]
async fn worktree_activation_triggers_cascade_through_the_bus() {
    let engine = new_engine().await;
    let dir = tempfile::tempdir().unwrap();
    let wt = worktree(dir.path());
    engine.worktree.create(wt.clone()).unwrap();

    engine
        .set_raw_config(RawConfig {
            services: vec![service("api")],
            workflows: vec![],
            workflow_working_dir: String::new(),
        })
        .await;
    assert!(engine.watcher.watching().is_empty());

    engine.worktree.activate(&wt.name).await.unwrap();

    let mut saw_watch = false;
    for _ in 0..100 {
        if engine.watcher.watching().iter().any(|n| n.as_str() == "api") {
            saw_watch = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert!(saw_watch, "cascade did not reconcile watches in time");
}

#[tokio::test]
async fn start_all_starts_the_expanded_command_in_the_worktree_root() {
    let engine = new_engine().await;
    let dir = tempfile::tempdir().unwrap();
    let wt = worktree(dir.path());
    engine.worktree.create(wt.clone()).unwrap();
    engine.worktree.set_active(&wt.name).unwrap();

    engine
        .set_raw_config(RawConfig {
            services: vec![service("api")],
            workflows: vec![],
            workflow_working_dir: String::new(),
        })
        .await;

    let failures = engine.start_all().await;
    assert!(failures.is_empty(), "unexpected start failures: {failures:?}");
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    let logs = engine
        .supervisor
        .logs(&ServiceName::new("api"), 10)
        .unwrap();
    let canonical = dir.path().canonicalize().unwrap_or_else(|_| dir.path().to_path_buf());
    assert!(
        logs.iter().any(|line| line.contains(canonical.to_str().unwrap())),
        "expected logs {logs:?} to contain worktree root {canonical:?}"
    );
}

#[tokio::test]
async fn binary_change_triggers_a_supervisor_restart() {
    let engine = new_engine().await;
    let dir = tempfile::tempdir().unwrap();
    let binary = dir.path().join("api-binary");
    std::fs::write(&binary, b"v1").unwrap();

    engine
        .set_raw_config(RawConfig {
            services: vec![ServiceDescriptor {
                name: ServiceName::new("api"),
                command: Command::Shell("sleep 30".to_string()),
                working_dir: dir.path().display().to_string(),
                env: Default::default(),
                watched_binary: Some(binary.display().to_string()),
                watched_files: vec![],
                restart_policy: RestartPolicy::Never,
                max_restarts: 0,
                restart_delay: StdDuration::from_millis(10),
                stop_signal: StopSignal::Term,
                stop_timeout: StdDuration::from_secs(2),
                parser: Default::default(),
            }],
            workflows: vec![],
            workflow_working_dir: String::new(),
        })
        .await;

    engine.supervisor.start(&ServiceName::new("api")).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    let initial_pid = engine
        .supervisor
        .list()
        .into_iter()
        .find(|s| s.name.as_str() == "api")
        .and_then(|s| s.pid);

    std::fs::write(&binary, b"v2").unwrap();

    let mut restarted = false;
    for _ in 0..100 {
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let current = engine
            .supervisor
            .list()
            .into_iter()
            .find(|s| s.name.as_str() == "api")
            .and_then(|s| s.pid);
        if current.is_some() && current != initial_pid {
            restarted = true;
            break;
        }
    }
    assert!(restarted, "expected binary.changed to trigger a restart with a new pid");
}

#[tokio::test]
async fn no_active_worktree_still_applies_configuration() {
    let engine = new_engine().await;
    engine
        .set_raw_config(RawConfig {
            services: vec![service("api")],
            workflows: vec![],
            workflow_working_dir: String::new(),
        })
        .await;

    // `{{.Worktree.Root}}/bin/app` expands to `/bin/app` against an empty
    // context, so the watch is still registered even with nothing active.
    assert!(engine.watcher.watching().iter().any(|n| n.as_str() == "api"));
}
