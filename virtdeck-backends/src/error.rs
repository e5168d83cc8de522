//! Error types for the backend abstraction layer.

use thiserror::Error;

use crate::types::BackendKind;

/// Errors that can occur during backend operations.
///
/// Adapters never panic and never let a foreign error type cross their
/// boundary; every public method returns this taxonomy so callers can tell
/// failure kinds apart.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The availability probe failed at construction; the operation was not
    /// attempted.
    #[error("{0} backend is not available")]
    Unavailable(BackendKind),

    /// An external command returned a non-zero exit status.
    #[error("command `{command}` failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// An external command exceeded its deadline. Distinct from
    /// [`AdapterError::CommandFailed`]: the operation may still be in
    /// progress on the backend.
    #[error("command `{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    /// Backend output did not match the expected shape.
    #[error("could not parse {what}: {detail}")]
    ParseFailed { what: &'static str, detail: String },

    /// The operation has no meaning for this backend.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: BackendKind,
        operation: &'static str,
    },

    /// No instance matched the given identifier or name.
    #[error("no instance matching `{0}` was found")]
    NotFound(String),

    /// A step of multi-step creation failed. Earlier steps are not rolled
    /// back; a partially created instance may remain on the backend.
    #[error("create step `{step}` failed: {source}")]
    CreateStep {
        step: &'static str,
        #[source]
        source: Box<AdapterError>,
    },

    /// The creation spec is missing a field this backend requires.
    #[error("invalid create spec: {0}")]
    InvalidSpec(String),

    /// Container engine client error.
    #[error("container engine error: {0}")]
    Client(String),
}

impl AdapterError {
    /// Wrap an error as the failing step of a creation sequence.
    pub fn at_step(self, step: &'static str) -> Self {
        AdapterError::CreateStep {
            step,
            source: Box::new(self),
        }
    }
}

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_step_names_the_step() {
        let err = AdapterError::CommandFailed {
            command: "VBoxManage createhd".to_string(),
            code: Some(1),
            stderr: "disk exists".to_string(),
        }
        .at_step("create disk");

        let msg = err.to_string();
        assert!(msg.contains("create disk"));
        match err {
            AdapterError::CreateStep { step, source } => {
                assert_eq!(step, "create disk");
                assert!(matches!(*source, AdapterError::CommandFailed { code: Some(1), .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn timeout_is_not_a_command_failure() {
        let err = AdapterError::Timeout {
            command: "powershell".to_string(),
            timeout_secs: 120,
        };
        assert!(!matches!(err, AdapterError::CommandFailed { .. }));
    }
}
