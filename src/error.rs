use thiserror::Error;

/// Errors raised by the term index and its collaborators
#[derive(Error, Debug)]
pub enum IndexError {
    /// Corruption or version mismatch. The only remedy is to discard the
    /// index and rebuild it from the source documents.
    #[error("text index is corrupted: {message}; discard the index and rebuild it")]
    Format { message: String },

    /// The caller broke a usage contract (query before load, bad argument)
    #[error("precondition violated: {0}")]
    Precondition(&'static str),

    /// The component was closed, discarded or force-closed after a failure
    #[error("text index is closed")]
    Closed,

    /// A long scan observed the cancellation token
    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Build a format error from any message
    pub fn format(message: impl Into<String>) -> Self {
        IndexError::Format {
            message: message.into(),
        }
    }

    /// True when the caller has to discard and rebuild the whole index
    pub fn needs_rebuild(&self) -> bool {
        matches!(self, IndexError::Format { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_display() {
        let err = IndexError::format("bad version 15");
        assert_eq!(
            err.to_string(),
            "text index is corrupted: bad version 15; discard the index and rebuild it"
        );
        assert!(err.needs_rebuild());
    }

    #[test]
    fn test_other_errors_do_not_demand_rebuild() {
        assert!(!IndexError::Closed.needs_rebuild());
        assert!(!IndexError::Cancelled.needs_rebuild());
        assert!(!IndexError::Precondition("load first").needs_rebuild());
    }
}
