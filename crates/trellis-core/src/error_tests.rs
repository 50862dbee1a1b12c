use super::*;
use yare::parameterized;

#[parameterized(
    not_found = { CoreError::NotFound("x".into()), "not_found" },
    conflict = { CoreError::Conflict("x".into()), "conflict" },
    validation = { CoreError::Validation(vec![]), "validation" },
    bus_closed = { CoreError::BusClosed, "bus_closed" },
    timeout = { CoreError::Timeout("x".into()), "timeout" },
    canceled = { CoreError::Canceled("x".into()), "canceled" },
    child_exit = { CoreError::ChildExit("x".into()), "child_exit" },
    io = { CoreError::Io("x".into()), "io" },
)]
fn code_returns_stable_string(err: CoreError, expected: &str) {
    assert_eq!(err.code(), expected);
}

#[test]
fn field_error_display_includes_field_and_message() {
    let e = FieldError {
        field: "name".into(),
        message: "required".into(),
    };
    assert_eq!(e.to_string(), "name: required");
}

#[test]
fn io_error_converts_into_core_error() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let core: CoreError = io_err.into();
    assert_eq!(core.code(), "io");
}
