//! Prelude module for common re-exports.
//!
//! ```rust
//! use syncshm_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, ConfigLoader, ConsumerConfig, HandshakeConfig, LogLevel, ProducerConfig,
    SegmentConfig, SharedConfig,
};

// ─── Protocol Constants ─────────────────────────────────────────────
pub use crate::consts::{DEFAULT_SEGMENT_NAME, MESSAGE_CAPACITY, REFERENCE_MESSAGE};

