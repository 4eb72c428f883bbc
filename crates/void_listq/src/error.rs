//! Errors from executing queued operations, plus panic containment helpers

use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use void_listops::ListOpError;

/// Why an operation failed to execute
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ListOpError),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Panicked: {0}")]
    Panicked(String),

    #[error("Completion dropped without being signalled")]
    Abandoned,
}

/// Result type for operation execution
pub type ExecuteResult = Result<(), ExecuteError>;

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Run a closure, turning a panic into an error message
///
/// Callers own the closures they pass here (callbacks, hooks, listeners), so
/// unwind safety is asserted rather than required.
pub fn catch_panic<F, R>(f: F) -> Result<R, String>
where
    F: FnOnce() -> R,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_panic() {
        assert_eq!(catch_panic(|| 42), Ok(42));

        let result: Result<i32, String> = catch_panic(|| panic!("Test panic"));
        assert_eq!(result.unwrap_err(), "Test panic");

        let result: Result<(), String> = catch_panic(|| panic!("code {}", 7));
        assert_eq!(result.unwrap_err(), "code 7");
    }

    #[test]
    fn test_validation_error_converts() {
        let err: ExecuteError = ListOpError::ItemNotFound.into();
        assert_eq!(err.to_string(), "Validation failed: Item not found in the list");
    }
}
