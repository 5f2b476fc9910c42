//! # SyncShm Shared Memory Handshake
//!
//! One-shot, one-message synchronization between two independent processes
//! over a named POSIX shared memory segment. A producer creates the segment
//! and constructs a mutex/condition-variable pair inside it; a consumer that
//! may start earlier or later retries until it can attach, waits on the
//! condition until the readiness flag is set, reads the payload and removes
//! the segment.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────────┐    ┌─────────────────┐
//! │   Producer      │    │  Shared Segment      │    │   Consumer      │
//! │                 │    │  "/SyncShm"          │    │                 │
//! │ remove (stale)  │    │ ┌──────────────────┐ │    │ open (retry)    │
//! │ create_exclusive├───►│ │ mutex            │ │◄───┤ map             │
//! │ map + construct │    │ │ condition        │ │    │ lock + wait     │
//! │ lock + publish  │    │ │ has_data         │ │    │ read            │
//! │ notify_one      │    │ │ message[256]     │ │    │ remove          │
//! └─────────────────┘    │ └──────────────────┘ │    └─────────────────┘
//!                        └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use syncshm_shared_memory::{Consumer, ConsumerConfig, Producer, ProducerConfig, ShmResult};
//!
//! # fn main() -> ShmResult<()> {
//! // Process A
//! Producer::new("SyncShm", ProducerConfig::default())?.run()?;
//!
//! // Process B
//! let report = Consumer::new("SyncShm", ConsumerConfig::default())?.run()?;
//! println!("{}", report.message);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust,no_run
//! use syncshm_shared_memory::{ShmError, segment};
//!
//! match segment::open_existing("SyncShm") {
//!     Ok(handle) => { /* map it */ }
//!     Err(ShmError::NotFound { name }) => {
//!         eprintln!("Segment '{}' not created yet - retry later", name);
//!     }
//!     Err(e) => eprintln!("Unexpected error: {}", e),
//! }
//! ```
//!
//! ## Lifecycle Rules
//!
//! - The producer removes any stale segment, then creates exclusively.
//! - Only the producer constructs the buffer, exactly once.
//! - Only the consumer removes the segment after a successful read.
//! - Dropping a mapping never unlinks the name.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod consumer;
pub mod error;
pub mod platform;
pub mod producer;
pub mod segment;
pub mod sync;

pub use buffer::{Message, SharedBuffer, SynchronizedBuffer};
pub use consumer::{Consumer, ConsumerReport, ConsumerState};
pub use error::{ShmError, ShmResult};
pub use producer::{Producer, ProducerReport};
pub use segment::{MappedRegion, SegmentHandle, SegmentId};
pub use sync::{ProcessCondvar, ProcessMutex, ProcessMutexGuard};
pub use syncshm::config::{ConsumerConfig, ProducerConfig};

/// Initialize tracing.
///
/// `RUST_LOG` directives take precedence over `level`. With `json` set,
/// events are emitted as one JSON object per line.
pub fn init_tracing(level: tracing::Level, json: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
