use super::*;

fn worktree(path: &str) -> WorktreeDescriptor {
    WorktreeDescriptor {
        name: WorktreeName::new("feature-x"),
        path: path.to_string(),
        branch: "feature-x".to_string(),
        template_context: HashMap::new(),
    }
}

#[test]
fn project_name_is_last_path_segment() {
    assert_eq!(worktree("/home/dev/myproj-feature-x").project_name(), "myproj-feature-x");
}

#[test]
fn project_name_ignores_trailing_slash() {
    assert_eq!(worktree("/home/dev/myproj-feature-x/").project_name(), "myproj-feature-x");
}
