//! Consumer role: find the segment, wait for the readiness flag, read, tear down
//!
//! ```text
//! SeekingSegment ──open+map──► MappedWaiting ──has_data──► DataRead ──remove──► Done
//!      ▲   │                         │
//!      └───┘◄────────────────────────┘
//!   NotFound / NotReady / leftover     name now bound to a newer segment
//! ```
//!
//! While waiting, the consumer re-resolves the name every `open_backoff`.
//! If a producer's pre-cleanup has replaced the segment it is mapped to, it
//! drops that mapping and seeks again, so it never waits on an unlinked
//! object. Removal at the end only unlinks the segment that was read.

use crate::buffer::{Message, SynchronizedBuffer};
use crate::error::{ShmError, ShmResult};
use crate::platform::get_current_pid;
use crate::segment::{self, MappedRegion};
use std::time::Instant;
use syncshm::config::ConsumerConfig;
use tracing::{debug, info, warn};

/// Consumer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Retrying open until the producer has created the segment
    SeekingSegment,
    /// Mapped; holding the lock or suspended on the condition
    MappedWaiting,
    /// Payload copied out of the segment
    DataRead,
    /// Segment removed, run complete
    Done,
}

/// Outcome of a completed consumer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Payload received from the producer
    pub message: Message,
    /// Open attempts that failed transiently before connecting
    pub open_attempts: u32,
    /// Final state (always `Done` on success)
    pub state: ConsumerState,
}

/// Single-shot consumer
pub struct Consumer {
    name: String,
    config: ConsumerConfig,
    state: ConsumerState,
    open_attempts: u32,
}

impl Consumer {
    /// Create a consumer for segment `name`.
    pub fn new(name: &str, config: ConsumerConfig) -> ShmResult<Self> {
        let name = segment::normalize_name(name)?;
        if config.open_backoff_ms == 0 {
            return Err(syncshm::config::ConfigError::ValidationError(
                "consumer.open_backoff_ms must be greater than 0".to_string(),
            )
            .into());
        }
        Ok(Self {
            name,
            config,
            state: ConsumerState::SeekingSegment,
            open_attempts: 0,
        })
    }

    /// Segment this consumer reads from
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Failed open attempts so far
    pub fn open_attempts(&self) -> u32 {
        self.open_attempts
    }

    /// Run the consumer to completion.
    ///
    /// `NotFound`, `NotReady` and leftovers of earlier runs are absorbed by
    /// the retry loop. Mapping and lock failures, `ProducerTimeout` and
    /// `RetriesExhausted` end the run. The data timeout counts from the
    /// first successful connection.
    pub fn run(&mut self) -> ShmResult<ConsumerReport> {
        info!("Consumer: waiting for shared memory...");
        debug!("Consumer: pid {}", get_current_pid());

        let mut waiting_since: Option<Instant> = None;
        let (message, id) = loop {
            let region = self.connect()?;
            let since = *waiting_since.get_or_insert_with(Instant::now);
            match self.receive(&region, since) {
                Ok(message) => break (message, region.id()),
                Err(e) if e.is_transient() => {
                    self.state = ConsumerState::SeekingSegment;
                    self.back_off(&e)?;
                }
                Err(e) => return Err(e),
            }
        };
        info!("Consumer: received data: {}", message);

        match segment::remove_if_same(&self.name, id) {
            Ok(true) => debug!("Consumer: segment {} removed", self.name),
            Ok(false) => warn!("Consumer: segment {} already gone or replaced", self.name),
            Err(e) => warn!("Consumer: removing {} failed: {}", self.name, e),
        }
        self.state = ConsumerState::Done;
        info!("Consumer: finished");

        Ok(ConsumerReport {
            message,
            open_attempts: self.open_attempts,
            state: self.state,
        })
    }

    /// Retry open+map+attach until the producer's buffer is usable.
    fn connect(&mut self) -> ShmResult<MappedRegion> {
        loop {
            match self.try_connect() {
                Ok(region) => {
                    self.state = ConsumerState::MappedWaiting;
                    info!("Consumer: connected to shared memory {}", self.name);
                    return Ok(region);
                }
                Err(e) if e.is_transient() => self.back_off(&e)?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Count a transient failure and sleep, or give up once the bound is hit.
    fn back_off(&mut self, cause: &ShmError) -> ShmResult<()> {
        self.open_attempts += 1;
        debug!(
            "Consumer: {} (attempt {}), retrying in {:?}",
            cause,
            self.open_attempts,
            self.config.open_backoff()
        );
        if let Some(max) = self.config.max_open_attempts {
            if self.open_attempts >= max {
                return Err(ShmError::RetriesExhausted {
                    name: self.name.clone(),
                    attempts: self.open_attempts,
                });
            }
        }
        std::thread::sleep(self.config.open_backoff());
        Ok(())
    }

    fn try_connect(&self) -> ShmResult<MappedRegion> {
        let handle = segment::open_existing(&self.name)?;
        let region = handle.map()?;
        SynchronizedBuffer::attach(&region)?;
        Ok(region)
    }

    /// Wait for the payload in slices of `open_backoff`, checking after each
    /// slice that the name still refers to the mapped segment.
    fn receive(&mut self, region: &MappedRegion, since: Instant) -> ShmResult<Message> {
        let buffer = SynchronizedBuffer::attach(region)?;
        info!("Consumer: waiting for data...");
        let deadline = self.config.data_timeout().map(|timeout| since + timeout);

        loop {
            let slice = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(ShmError::ProducerTimeout {
                            name: self.name.clone(),
                            waited: since.elapsed(),
                        });
                    }
                    left.min(self.config.open_backoff())
                }
                None => self.config.open_backoff(),
            };

            let taken = buffer.take_message(slice)?;
            self.ensure_current(region)?;
            if let Some(message) = taken {
                self.state = ConsumerState::DataRead;
                return Ok(message);
            }
        }
    }

    /// `NotReady` once the name has been removed or bound to another segment.
    fn ensure_current(&self, region: &MappedRegion) -> ShmResult<()> {
        if segment::identify(&self.name)? == Some(region.id()) {
            return Ok(());
        }
        debug!("Consumer: segment {} was replaced, reconnecting", self.name);
        Err(ShmError::NotReady {
            name: self.name.clone(),
        })
    }
}
