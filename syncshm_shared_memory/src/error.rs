//! Error types for shared memory operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during shared memory operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment already exists
    #[error("Segment already exists: {name}")]
    AlreadyExists {
        /// Segment name
        name: String,
    },

    /// Segment not found
    #[error("Segment not found: {name}")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// Segment exists but its creator has not finished sizing or initializing it
    #[error("Segment not ready yet: {name}")]
    NotReady {
        /// Segment name
        name: String,
    },

    /// Mapping a valid segment failed
    #[error("Failed to map segment {name}: {source}")]
    MapFailed {
        /// Segment name
        name: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Permission denied
    #[error("Permission denied accessing segment: {name}")]
    PermissionDenied {
        /// Segment name
        name: String,
    },

    /// Segment name rejected before reaching the OS
    #[error("Invalid segment name '{name}': {reason}")]
    InvalidName {
        /// Segment name as given
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Payload does not fit the message buffer
    #[error("Payload of {len} bytes exceeds capacity of {capacity} bytes")]
    PayloadTooLarge {
        /// Payload length in bytes
        len: usize,
        /// Usable capacity in bytes
        capacity: usize,
    },

    /// Payload cannot be represented in the NUL-terminated buffer
    #[error("Invalid payload: {reason}")]
    InvalidPayload {
        /// Why it was rejected
        reason: &'static str,
    },

    /// Mapped segment is smaller than the buffer layout
    #[error("Segment {name} is {size} bytes, layout needs {required}")]
    SegmentTooSmall {
        /// Segment name
        name: String,
        /// Actual mapped size
        size: usize,
        /// Size of the buffer layout
        required: usize,
    },

    /// Readiness flag was already set for this segment
    #[error("Data already published on segment: {name}")]
    AlreadyPublished {
        /// Segment name
        name: String,
    },

    /// Message in this segment was already taken by a consumer
    #[error("Data on segment {name} was already consumed")]
    AlreadyConsumed {
        /// Segment name
        name: String,
    },

    /// Producer never signalled within the configured bound
    #[error("Timed out after {waited:?} waiting for producer on segment: {name}")]
    ProducerTimeout {
        /// Segment name
        name: String,
        /// How long the consumer waited
        waited: Duration,
    },

    /// Consumer gave up opening the segment
    #[error("Segment {name} still unavailable after {attempts} attempts")]
    RetriesExhausted {
        /// Segment name
        name: String,
        /// Failed open attempts
        attempts: u32,
    },

    /// Process-shared mutex or condition variable call failed
    #[error("{op} failed: {source}")]
    Sync {
        /// pthread operation that failed
        op: &'static str,
        /// Error code returned by the call
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },

    /// Configuration error
    #[error("Configuration error: {source}")]
    Config {
        /// Source configuration error
        #[from]
        source: syncshm::config::ConfigError,
    },
}

impl ShmError {
    /// Whether the consumer should sleep and retry rather than fail.
    ///
    /// Besides a missing or half-built segment, this covers leftovers of an
    /// earlier run (wrong size, already consumed) that the next producer's
    /// pre-cleanup will replace.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::NotReady { .. }
                | Self::SegmentTooSmall { .. }
                | Self::AlreadyConsumed { .. }
        )
    }
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let name = "seg".to_string();
        assert!(ShmError::NotFound { name: name.clone() }.is_transient());
        assert!(ShmError::NotReady { name: name.clone() }.is_transient());
        assert!(ShmError::AlreadyConsumed { name: name.clone() }.is_transient());
        assert!(
            ShmError::SegmentTooSmall {
                name: name.clone(),
                size: 16,
                required: 448,
            }
            .is_transient()
        );
        assert!(!ShmError::AlreadyExists { name: name.clone() }.is_transient());
        assert!(
            !ShmError::MapFailed {
                name: name.clone(),
                source: std::io::Error::from_raw_os_error(libc::ENOMEM),
            }
            .is_transient()
        );
        assert!(
            !ShmError::ProducerTimeout {
                name,
                waited: Duration::from_millis(10),
            }
            .is_transient()
        );
    }

    #[test]
    fn test_error_messages_name_the_segment() {
        let err = ShmError::NotFound {
            name: "/SyncShm".to_string(),
        };
        assert_eq!(err.to_string(), "Segment not found: /SyncShm");

        let err = ShmError::PayloadTooLarge {
            len: 300,
            capacity: 255,
        };
        assert!(err.to_string().contains("300"));
    }
}
