//! Error types for discim.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscimError {
    // Streaming transcription errors
    #[error("Failed to open recognition session: {message}")]
    SessionOpen { message: String },

    #[error("Recognition session closed: {message}")]
    SessionClosed { message: String },

    #[error("Recognition transport error: {message}")]
    Transport { message: String },

    #[error("Stream is no longer accepting audio")]
    StreamClosed,

    // Image search errors
    #[error("Image search rejected the request: {message}")]
    SearchRejected { message: String },

    #[error("Image search call failed: {message}")]
    Search { message: String },

    // Annotation pipeline errors
    #[error("Record skipped: {message}")]
    Record { message: String },

    #[error("Failed to write annotated record: {0}")]
    OutputSink(#[from] csv::Error),

    // Progress reporting errors
    #[error("Progress update failed: {message}")]
    Progress { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation canceled")]
    Canceled,
}

impl DiscimError {
    /// Whether the session loop must stop instead of reopening a session.
    ///
    /// Session-open failures are unrecoverable within the engine; a closed
    /// receive half or a transport hiccup only ends the current session and
    /// the loop rotates into a fresh one.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DiscimError::SessionOpen { .. } | DiscimError::StreamClosed | DiscimError::Canceled
        )
    }

    /// Whether this error only affects a single record of the annotation
    /// pipeline. Per-record errors are logged and the record is dropped; they
    /// never stop the pipeline. Rejected lookups count: a record whose search
    /// the service refused is skipped like any other failed lookup.
    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            DiscimError::Record { .. }
                | DiscimError::Search { .. }
                | DiscimError::SearchRejected { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, DiscimError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_session_open_display() {
        let error = DiscimError::SessionOpen {
            message: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to open recognition session: connection refused"
        );
    }

    #[test]
    fn test_session_closed_display() {
        let error = DiscimError::SessionClosed {
            message: "end of stream".to_string(),
        };
        assert_eq!(error.to_string(), "Recognition session closed: end of stream");
    }

    #[test]
    fn test_search_rejected_display() {
        let error = DiscimError::SearchRejected {
            message: "API key not valid".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Image search rejected the request: API key not valid"
        );
    }

    #[test]
    fn test_record_display() {
        let error = DiscimError::Record {
            message: "no results".to_string(),
        };
        assert_eq!(error.to_string(), "Record skipped: no results");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(DiscimError::SessionOpen {
            message: "x".to_string()
        }
        .is_fatal());
        assert!(DiscimError::StreamClosed.is_fatal());
        assert!(DiscimError::Canceled.is_fatal());

        assert!(!DiscimError::SessionClosed {
            message: "x".to_string()
        }
        .is_fatal());
        assert!(!DiscimError::Transport {
            message: "x".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_per_record_classification() {
        assert!(DiscimError::Record {
            message: "x".to_string()
        }
        .is_per_record());
        assert!(DiscimError::Search {
            message: "x".to_string()
        }
        .is_per_record());
        assert!(DiscimError::SearchRejected {
            message: "x".to_string()
        }
        .is_per_record());
        assert!(!DiscimError::Canceled.is_per_record());
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe");
        let error: DiscimError = io_error.into();
        assert!(error.to_string().contains("broken pipe"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: DiscimError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<DiscimError>();
        assert_sync::<DiscimError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
