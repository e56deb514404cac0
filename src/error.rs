//! Error types for upload-bench
//!
//! Covers planning, coordination-service and object-store failures.

use thiserror::Error;

/// Primary error type for all upload operations
#[derive(Debug, Error)]
pub enum UploadError {
    // ========== Configuration Errors ==========

    /// Invalid size, part size or client setup
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    // ========== Coordination Errors ==========

    /// Coordination service answered with a non-success status or a bad payload
    #[error("Coordination service {operation} failed (status {status:?}): {message}")]
    Service {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    // ========== Transfer Errors ==========

    /// Object store rejected or failed a part transfer
    ///
    /// `status` is the store's HTTP status; `None` when no response arrived.
    #[error("Transfer of part {part_number} failed: {message}")]
    Transfer {
        part_number: u32,
        status: Option<u16>,
        message: String,
    },

    /// Presigned completion request rejected by the object store
    #[error("Object store completion failed (status {status}): {message}")]
    Completion { status: u16, message: String },

    // ========== Local Errors ==========

    /// Local file access failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Internal error (task panics, illegal state transitions)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl UploadError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        UploadError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn transfer(part_number: u32, message: impl Into<String>) -> Self {
        UploadError::Transfer {
            part_number,
            status: None,
            message: message.into(),
        }
    }

    /// Transfer failure answered by the store with `status`
    pub fn transfer_status(part_number: u32, status: u16, message: impl Into<String>) -> Self {
        UploadError::Transfer {
            part_number,
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn service(operation: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        UploadError::Service {
            operation,
            status,
            message: message.into(),
        }
    }

    /// Returns true if a later attempt could plausibly succeed.
    ///
    /// Nothing retries today; the pool uses this to label failures in logs.
    /// Transfers that never got a response count as transient, as do
    /// throttling and server-side statuses. Client errors such as an expired
    /// presigned URL do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Transfer { status: None, .. } => true,
            UploadError::Transfer { status: Some(s), .. } => is_transient_status(*s),
            UploadError::Completion { status, .. } => *status == 0 || is_transient_status(*status),
            UploadError::Service { status, .. } => matches!(status, Some(s) if is_transient_status(*s)),
            _ => false,
        }
    }

    /// Part number of the failing transfer, if any
    pub fn part_number(&self) -> Option<u32> {
        match self {
            UploadError::Transfer { part_number, .. } => Some(*part_number),
            _ => None,
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Result type alias for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(UploadError::transfer(3, "connection reset").is_retryable());
        assert!(UploadError::transfer_status(3, 503, "slow down").is_retryable());
        assert!(UploadError::transfer_status(3, 429, "throttled").is_retryable());
        assert!(!UploadError::transfer_status(3, 403, "expired url").is_retryable());
        assert!(!UploadError::transfer_status(3, 204, "no content").is_retryable());
        assert!(UploadError::service("initialize", Some(502), "bad gateway").is_retryable());
        assert!(!UploadError::service("initialize", Some(403), "forbidden").is_retryable());
        assert!(!UploadError::configuration("too large").is_retryable());
    }

    #[test]
    fn test_part_number() {
        assert_eq!(UploadError::transfer(7, "boom").part_number(), Some(7));
        assert_eq!(UploadError::configuration("x").part_number(), None);
    }

    #[test]
    fn test_display() {
        let err = UploadError::transfer(5, "status 500");
        assert_eq!(err.to_string(), "Transfer of part 5 failed: status 500");
    }
}
