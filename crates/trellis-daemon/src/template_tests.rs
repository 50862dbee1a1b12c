use super::*;
use std::collections::HashMap as StdHashMap;
use std::time::Duration;
use trellis_core::id::{ServiceName, WorktreeName};
use trellis_core::service::{RestartPolicy, StopSignal};

fn worktree() -> WorktreeDescriptor {
    let mut ctx = StdHashMap::new();
    ctx.insert("port_offset".to_string(), "100".to_string());
    WorktreeDescriptor {
        name: WorktreeName::new("feature-x"),
        path: "/work/feature-x".to_string(),
        branch: "feature-x".to_string(),
        template_context: ctx,
    }
}

fn raw_service() -> ServiceDescriptor {
    ServiceDescriptor {
        name: ServiceName::new("api"),
        command: Command::Argv(vec![
            "{{.Worktree.Root}}/bin/api".to_string(),
            "--name={{.Service.Name}}".to_string(),
        ]),
        working_dir: "{{.Worktree.Root}}".to_string(),
        env: [("BRANCH".to_string(), "{{.Worktree.Branch}}".to_string())]
            .into_iter()
            .collect(),
        watched_binary: Some("{{.Worktree.Root}}/bin/api".to_string()),
        watched_files: vec![],
        restart_policy: RestartPolicy::OnFailure,
        max_restarts: 5,
        restart_delay: Duration::from_secs(1),
        stop_signal: StopSignal::Term,
        stop_timeout: Duration::from_secs(5),
        parser: Default::default(),
    }
}

#[test]
fn expands_worktree_and_service_variables() {
    let hb = Handlebars::new();
    let wt = worktree();
    let expanded = expand_service(&hb, &raw_service(), Some(&wt));

    match expanded.command {
        Command::Argv(argv) => {
            assert_eq!(argv[0], "/work/feature-x/bin/api");
            assert_eq!(argv[1], "--name=api");
        }
        Command::Shell(_) => panic!("expected argv command"),
    }
    assert_eq!(expanded.working_dir, "/work/feature-x");
    assert_eq!(expanded.env.get("BRANCH").unwrap(), "feature-x");
    assert_eq!(
        expanded.watched_binary.as_deref(),
        Some("/work/feature-x/bin/api")
    );
}

#[test]
fn falls_back_to_raw_on_bad_template() {
    let hb = Handlebars::new();
    let mut raw = raw_service();
    raw.working_dir = "{{.Worktree.Root".to_string();
    let expanded = expand_service(&hb, &raw, Some(&worktree()));
    assert_eq!(expanded.working_dir, "{{.Worktree.Root");
}

#[test]
fn no_worktree_expands_to_empty_strings() {
    let hb = Handlebars::new();
    let expanded = expand_service(&hb, &raw_service(), None);
    assert_eq!(expanded.working_dir, "");
}

#[test]
fn plain_strings_without_braces_are_untouched() {
    let hb = Handlebars::new();
    let mut raw = raw_service();
    raw.working_dir = "/fixed/path".to_string();
    let expanded = expand_service(&hb, &raw, Some(&worktree()));
    assert_eq!(expanded.working_dir, "/fixed/path");
}
