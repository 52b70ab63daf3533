//! Error types for XSDB
//!
//! Provides a unified error type for all operations.
//!
//! The set is closed and versioned by the wire protocol: every failure a
//! guest can observe is one of these kinds, reported on the wire as a fixed
//! errno-style name (never a raw numeric code).

use thiserror::Error;

/// Result type alias using XsError
pub type Result<T> = std::result::Result<T, XsError>;

/// Unified error type for XSDB operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XsError {
    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Permission denied")]
    PermissionDenied,

    // -------------------------------------------------------------------------
    // Limit Errors
    // -------------------------------------------------------------------------
    #[error("Too large: {0}")]
    TooLarge(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    // -------------------------------------------------------------------------
    // Transaction / Watch Errors
    // -------------------------------------------------------------------------
    #[error("Already exists")]
    AlreadyExists,

    #[error("Transaction conflict")]
    Conflict,

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Not implemented")]
    NotImplemented,

    /// Fatal channel-level failure. Never sent as a wire error payload;
    /// the session is marked broken until reset.
    #[error("Channel error: {0}")]
    Channel(String),

    // -------------------------------------------------------------------------
    // Snapshot Errors
    // -------------------------------------------------------------------------
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl XsError {
    /// The fixed wire name for this error kind
    ///
    /// These strings are the entire error payload of an ERROR response
    /// (plus a trailing NUL added by the codec).
    pub fn wire_name(&self) -> &'static str {
        match self {
            XsError::MalformedRequest(_) => "EINVAL",
            XsError::NotFound => "ENOENT",
            XsError::PermissionDenied => "EACCES",
            XsError::TooLarge(_) => "E2BIG",
            XsError::QuotaExceeded(_) => "ENOSPC",
            XsError::AlreadyExists => "EEXIST",
            XsError::Conflict => "EAGAIN",
            XsError::NotImplemented => "ENOSYS",
            // Channel and snapshot failures are internal; EIO stands in if
            // one is ever asked for a wire name.
            XsError::Channel(_) => "EIO",
            XsError::Snapshot(_) => "EIO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_errno_style() {
        assert_eq!(XsError::NotFound.wire_name(), "ENOENT");
        assert_eq!(XsError::Conflict.wire_name(), "EAGAIN");
        assert_eq!(XsError::QuotaExceeded("nodes".into()).wire_name(), "ENOSPC");
        assert_eq!(XsError::NotImplemented.wire_name(), "ENOSYS");
    }
}
