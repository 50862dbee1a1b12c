use super::*;
use yare::parameterized;

#[parameterized(
    star = { "*", "service.crashed", true },
    star_empty_type = { "*", "", false },
    prefix_match = { "service.*", "service.crashed", true },
    prefix_no_match = { "service.*", "workflow.finished", false },
    prefix_boundary = { "service.*", "service.", true },
    suffix_match = { "*.crashed", "service.crashed", true },
    suffix_no_match = { "*.crashed", "service.started", false },
    exact_match = { "service.crashed", "service.crashed", true },
    exact_no_match = { "service.crashed", "service.started", false },
    empty_pattern = { "", "service.crashed", false },
)]
fn pattern_matches(pattern: &str, event_type: &str, expected: bool) {
    assert_eq!(Pattern::compile(pattern).matches(event_type), expected);
}

#[test]
fn empty_event_type_never_matches_any_pattern() {
    assert!(!Pattern::compile("*").matches(""));
    assert!(!Pattern::compile("a.*").matches(""));
    assert!(!Pattern::compile("*.b").matches(""));
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prefix_pattern_matches_any_suffix(prefix in "[a-z]{1,8}", suffix in "[a-z]{0,8}") {
            let pattern = Pattern::compile(&format!("{prefix}.*"));
            prop_assert!(pattern.matches(&format!("{prefix}.{suffix}")));
        }

        #[test]
        fn suffix_pattern_matches_any_prefix(prefix in "[a-z]{0,8}", suffix in "[a-z]{1,8}") {
            let pattern = Pattern::compile(&format!("*.{suffix}"));
            prop_assert!(pattern.matches(&format!("{prefix}.{suffix}")));
        }

        #[test]
        fn exact_pattern_only_matches_itself(a in "[a-z.]{1,16}", b in "[a-z.]{1,16}") {
            let matches = Pattern::compile(&a).matches(&b);
            prop_assert_eq!(matches, a == b);
        }

        #[test]
        fn no_pattern_ever_matches_an_empty_event_type(raw in "[a-z.*]{0,16}") {
            prop_assert!(!Pattern::compile(&raw).matches(""));
        }
    }
}

#[test]
fn filter_ands_worktree_and_time_range_ors_type_patterns() {
    let mut event = Event::new("service.crashed");
    event.worktree = "main".into();
    event.timestamp_ms = 100;

    let filter = EventFilter {
        type_patterns: vec![Pattern::compile("service.*"), Pattern::compile("workflow.*")],
        worktree: Some("main".into()),
        since_ms: Some(50),
        until_ms: Some(150),
        limit: None,
    };
    assert!(filter.matches(&event));

    let mut wrong_worktree = filter.clone();
    wrong_worktree.worktree = Some("other".into());
    assert!(!wrong_worktree.matches(&event));
}
