use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use trellis_bus::BusConfig;
use trellis_core::clock::FakeClock;
use trellis_core::id::WorktreeName;

fn wt(name: &str) -> WorktreeDescriptor {
    WorktreeDescriptor {
        name: WorktreeName::new(name),
        path: format!("/worktrees/{name}"),
        branch: "main".to_string(),
        template_context: Default::default(),
    }
}

fn new_coordinator() -> (WorktreeCoordinator<FakeClock>, EventBus<FakeClock>) {
    let clock = FakeClock::new();
    let bus = EventBus::new(clock.clone(), BusConfig::default());
    (WorktreeCoordinator::new(bus.clone(), clock), bus)
}

#[test]
fn create_rejects_duplicate_name() {
    let (coord, _bus) = new_coordinator();
    coord.create(wt("a")).unwrap();
    let err = coord.create(wt("a")).unwrap_err();
    assert!(matches!(err, WorktreeError::AlreadyExists(_)));
}

#[yare::parameterized(
    set_active = { "set_active" },
    remove = { "remove" },
)]
fn operation_on_an_unknown_worktree_is_not_found(op: &str) {
    let (coord, _bus) = new_coordinator();
    let ghost = WorktreeName::new("ghost");
    let err = match op {
        "set_active" => coord.set_active(&ghost).unwrap_err(),
        "remove" => coord.remove(&ghost).unwrap_err(),
        _ => unreachable!(),
    };
    assert!(matches!(err, WorktreeError::NotFound(_)));
}

#[test]
fn remove_rejects_active_worktree() {
    let (coord, _bus) = new_coordinator();
    coord.create(wt("a")).unwrap();
    coord.set_active(&WorktreeName::new("a")).unwrap();
    let err = coord.remove(&WorktreeName::new("a")).unwrap_err();
    assert!(matches!(err, WorktreeError::RemoveActive(_)));
}

#[tokio::test]
async fn activate_swaps_active_and_publishes_both_events() {
    let (coord, bus) = new_coordinator();
    coord.create(wt("a")).unwrap();
    coord.create(wt("b")).unwrap();
    coord.set_active(&WorktreeName::new("a")).unwrap();

    let result = coord.activate(&WorktreeName::new("b")).await.unwrap();
    assert_eq!(result.previous, Some(WorktreeName::new("a")));
    assert_eq!(result.activated, WorktreeName::new("b"));
    assert_eq!(
        coord.active().map(|w| w.name),
        Some(WorktreeName::new("b"))
    );

    let history = bus.history(&trellis_core::EventFilter::default());
    let types: Vec<&str> = history.iter().map(|e| e.event_type.as_str()).collect();
    assert!(types.contains(&"worktree.deactivating"));
    assert!(types.contains(&"worktree.activated"));
}

#[tokio::test]
async fn activate_unknown_target_fails_without_touching_active() {
    let (coord, _bus) = new_coordinator();
    coord.create(wt("a")).unwrap();
    coord.set_active(&WorktreeName::new("a")).unwrap();

    let err = coord
        .activate(&WorktreeName::new("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorktreeError::NotFound(_)));
    assert_eq!(
        coord.active().map(|w| w.name),
        Some(WorktreeName::new("a"))
    );
}

#[tokio::test]
async fn activate_reruns_pre_activate_hooks_outside_data_lock() {
    struct CountingHook {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PreActivateHook for CountingHook {
        async fn call(&self, _target: &WorktreeDescriptor) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    let (coord, _bus) = new_coordinator();
    coord.create(wt("a")).unwrap();
    coord.create(wt("b")).unwrap();
    coord.set_active(&WorktreeName::new("a")).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    coord.register_pre_activate_hook(Arc::new(CountingHook {
        calls: calls.clone(),
    }));

    coord.activate(&WorktreeName::new("b")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn activate_target_removed_after_hooks_fails_with_removed_during_activation() {
    struct RemovingHook<C: Clock> {
        coordinator: WorktreeCoordinator<C>,
        target: WorktreeName,
    }

    #[async_trait]
    impl<C: Clock> PreActivateHook for RemovingHook<C> {
        async fn call(&self, _target: &WorktreeDescriptor) {
            // Not the active worktree, so removal succeeds.
            let _ = self.coordinator.remove(&self.target);
        }
    }

    let (coord, _bus) = new_coordinator();
    coord.create(wt("a")).unwrap();
    coord.create(wt("b")).unwrap();
    coord.set_active(&WorktreeName::new("a")).unwrap();
    coord.register_pre_activate_hook(Arc::new(RemovingHook {
        coordinator: coord.clone(),
        target: WorktreeName::new("b"),
    }));

    let err = coord.activate(&WorktreeName::new("b")).await.unwrap_err();
    assert!(matches!(err, WorktreeError::RemovedDuringActivation));
}
