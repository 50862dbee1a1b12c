use super::*;

fn text_input(name: &str, required: bool) -> InputSpec {
    InputSpec {
        name: name.to_string(),
        input_type: InputType::Text,
        allowed_values: vec![],
        pattern: None,
        required,
        default: None,
    }
}

#[test]
fn required_input_missing_is_reported() {
    let spec = text_input("branch", true);
    let err = spec.validate(None).expect("missing required input");
    assert_eq!(err.field, "branch");
}

#[test]
fn missing_optional_input_is_fine() {
    let spec = text_input("branch", false);
    assert!(spec.validate(None).is_none());
}

#[test]
fn default_is_used_when_value_not_provided() {
    let mut spec = text_input("branch", true);
    spec.default = Some("main".to_string());
    assert!(spec.validate(None).is_none());
}

#[test]
fn select_rejects_value_outside_allowed_set() {
    let spec = InputSpec {
        name: "env".to_string(),
        input_type: InputType::Select,
        allowed_values: vec!["dev".to_string(), "prod".to_string()],
        pattern: None,
        required: true,
        default: None,
    };
    assert!(spec.validate(Some(&"staging".to_string())).is_some());
    assert!(spec.validate(Some(&"prod".to_string())).is_none());
}

#[test]
fn pattern_is_enforced() {
    let spec = InputSpec {
        name: "version".to_string(),
        input_type: InputType::Text,
        allowed_values: vec![],
        pattern: Some(r"^v\d+\.\d+\.\d+$".to_string()),
        required: true,
        default: None,
    };
    assert!(spec.validate(Some(&"not-a-version".to_string())).is_some());
    assert!(spec.validate(Some(&"v1.2.3".to_string())).is_none());
}

#[test]
fn datepicker_requires_iso_date() {
    let spec = InputSpec {
        name: "start".to_string(),
        input_type: InputType::Datepicker,
        allowed_values: vec![],
        pattern: None,
        required: true,
        default: None,
    };
    assert!(spec.validate(Some(&"07/28/2026".to_string())).is_some());
    assert!(spec.validate(Some(&"2026-07-28".to_string())).is_none());
}

#[test]
fn checkbox_requires_true_or_false() {
    let spec = InputSpec {
        name: "force".to_string(),
        input_type: InputType::Checkbox,
        allowed_values: vec![],
        pattern: None,
        required: true,
        default: None,
    };
    assert!(spec.validate(Some(&"yes".to_string())).is_some());
    assert!(spec.validate(Some(&"true".to_string())).is_none());
}

fn descriptor_with_inputs(inputs: Vec<InputSpec>) -> WorkflowDescriptor {
    WorkflowDescriptor {
        id: WorkflowId::new("build"),
        display_name: "Build".to_string(),
        steps: vec![WorkflowStep {
            argv: vec!["go".to_string(), "build".to_string()],
        }],
        timeout: None,
        parser: OutputParser::GoCompiler,
        requires_stopped: vec![],
        restart_watched_on_success: false,
        inputs,
    }
}

#[test]
fn validate_inputs_collects_every_failing_field_all_or_nothing() {
    let descriptor = descriptor_with_inputs(vec![text_input("a", true), text_input("b", true)]);
    let errors = descriptor.validate_inputs(&HashMap::new());
    assert_eq!(errors.len(), 2);
}

#[test]
fn validate_inputs_empty_when_all_satisfied() {
    let descriptor = descriptor_with_inputs(vec![text_input("a", true)]);
    let mut provided = HashMap::new();
    provided.insert("a".to_string(), "value".to_string());
    assert!(descriptor.validate_inputs(&provided).is_empty());
}

#[test]
fn append_output_marks_truncated_past_cap() {
    let mut run = RunState::new(RunId::new("build-1"), descriptor_with_inputs(vec![]));
    let budget = RunState::MAX_OUTPUT_BYTES - RunState::TRUNCATION_MARKER.len();
    run.append_output(&vec![b'a'; budget - 1]);
    assert!(!run.output_truncated);
    run.append_output(b"xx");
    assert!(run.output_truncated);
    assert!(run.output.len() <= RunState::MAX_OUTPUT_BYTES);
    assert!(run.output.ends_with(RunState::TRUNCATION_MARKER));
}

#[test]
fn append_output_after_truncation_is_a_no_op() {
    let mut run = RunState::new(RunId::new("build-1"), descriptor_with_inputs(vec![]));
    run.output_truncated = true;
    run.append_output(b"more data");
    assert!(run.output.is_empty());
}

#[test]
fn mark_completed_sets_completed_fields_and_expiry() {
    let mut run = RunState::new(RunId::new("build-1"), descriptor_with_inputs(vec![]));
    let now = Instant::now();
    run.mark_completed(RunStatus::Success, now);
    assert!(run.completed);
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.finished_at, Some(now));
    assert_eq!(
        run.expires_at,
        Some(now + RunState::RETENTION_AFTER_EXPIRY)
    );
}
