//! Protocol constants for the SyncShm handshake.
//!
//! Single source of truth for the segment name, payload capacity and the
//! default timings used by both roles.

/// Segment name both roles agree on when nothing else is configured.
pub const DEFAULT_SEGMENT_NAME: &str = "SyncShm";

/// Capacity of the message buffer in bytes, terminating NUL included.
pub const MESSAGE_CAPACITY: usize = 256;

/// Largest payload that still leaves room for the terminating NUL.
pub const MAX_PAYLOAD_LEN: usize = MESSAGE_CAPACITY - 1;

/// Payload written by the producer in the reference scenario.
pub const REFERENCE_MESSAGE: &str = "Hello from producer!";

/// Consumer sleep between failed open attempts, in milliseconds.
pub const DEFAULT_OPEN_BACKOFF_MS: u64 = 500;

/// Simulated producer preparation latency, in milliseconds.
pub const DEFAULT_PREPARE_DELAY_MS: u64 = 2000;

/// Upper bound on the consumer's wait for the readiness flag, in milliseconds.
pub const DEFAULT_DATA_TIMEOUT_MS: u64 = 30_000;

/// Number of remove+create attempts before a name collision is fatal.
pub const DEFAULT_CREATE_ATTEMPTS: u32 = 2;

/// Permission bits of the shared memory object (owner read/write only).
pub const SEGMENT_MODE: u32 = 0o600;

/// Longest segment name accepted by the POSIX shm namespace (NAME_MAX).
pub const MAX_SEGMENT_NAME_LEN: usize = 255;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_message_fits_in_buffer() {
        assert!(REFERENCE_MESSAGE.len() <= MAX_PAYLOAD_LEN);
        assert_eq!(MAX_PAYLOAD_LEN + 1, MESSAGE_CAPACITY);
    }

    #[test]
    fn timings_are_consistent() {
        assert!(DEFAULT_OPEN_BACKOFF_MS > 0);
        assert!(DEFAULT_DATA_TIMEOUT_MS > DEFAULT_PREPARE_DELAY_MS);
        assert!(DEFAULT_CREATE_ATTEMPTS >= 1);
    }

    #[test]
    fn default_name_is_valid() {
        assert!(!DEFAULT_SEGMENT_NAME.is_empty());
        assert!(!DEFAULT_SEGMENT_NAME.contains('/'));
        assert!(DEFAULT_SEGMENT_NAME.len() <= MAX_SEGMENT_NAME_LEN);
    }
}
