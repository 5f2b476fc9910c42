//! Producer role: create the segment, construct the buffer, publish once

use crate::buffer::{Message, SharedBuffer, SynchronizedBuffer};
use crate::error::{ShmError, ShmResult};
use crate::platform::get_current_pid;
use crate::segment::{self, SegmentHandle};
use syncshm::config::ProducerConfig;
use tracing::{debug, info, warn};

/// Outcome of a completed producer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerReport {
    /// Normalized segment name
    pub name: String,
    /// Size the segment was created with
    pub segment_size: usize,
    /// Bytes of payload published
    pub payload_len: usize,
}

/// Single-shot producer
pub struct Producer {
    name: String,
    config: ProducerConfig,
    message: Message,
}

impl Producer {
    /// Create a producer for segment `name`.
    ///
    /// The payload is validated here so a bad message fails before any
    /// segment is touched.
    pub fn new(name: &str, config: ProducerConfig) -> ShmResult<Self> {
        let name = segment::normalize_name(name)?;
        let message = Message::try_from(config.message.as_str())?;
        if config.create_attempts == 0 {
            return Err(syncshm::config::ConfigError::ValidationError(
                "producer.create_attempts must be at least 1".to_string(),
            )
            .into());
        }
        Ok(Self {
            name,
            config,
            message,
        })
    }

    /// Segment this producer writes to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the producer sequence to completion.
    ///
    /// The segment is left in place for the consumer to remove. On any
    /// error after creation the segment is left as well; the next run's
    /// pre-cleanup reclaims it.
    pub fn run(&self) -> ShmResult<ProducerReport> {
        let handle = self.create_segment()?;
        info!("Producer: segment {} created", self.name);
        debug!("Producer: pid {}", get_current_pid());

        let mut region = handle.map()?;
        let buffer = SynchronizedBuffer::construct(&mut region)?;
        debug!("Producer: buffer constructed ({} bytes)", SharedBuffer::SIZE);

        info!("Producer: preparing data...");
        std::thread::sleep(self.config.prepare_delay());

        buffer.publish(&self.message)?;
        info!("Producer: data ready, consumer notified");

        info!("Producer: finished");
        Ok(ProducerReport {
            name: self.name.clone(),
            segment_size: handle.size(),
            payload_len: self.message.len(),
        })
    }

    /// Pre-cleanup followed by exclusive creation.
    ///
    /// A collision right after our own remove means another process
    /// recreated the name in between; the pair is retried up to
    /// `create_attempts` times before `AlreadyExists` is fatal.
    fn create_segment(&self) -> ShmResult<SegmentHandle> {
        let mut attempt = 1;
        loop {
            match segment::remove(&self.name) {
                Ok(true) => warn!("Producer: removed stale segment {}", self.name),
                Ok(false) => debug!("Producer: no stale segment {}", self.name),
                Err(e) => warn!("Producer: pre-cleanup of {} failed: {}", self.name, e),
            }

            match segment::create_exclusive(&self.name, SharedBuffer::SIZE) {
                Err(ShmError::AlreadyExists { .. }) if attempt < self.config.create_attempts => {
                    warn!(
                        "Producer: {} reappeared after cleanup (attempt {}/{}), retrying",
                        self.name, attempt, self.config.create_attempts
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{exists, open_existing, remove};
    use syncshm::consts::REFERENCE_MESSAGE;

    fn quick_config() -> ProducerConfig {
        ProducerConfig {
            prepare_delay_ms: 0,
            ..ProducerConfig::default()
        }
    }

    #[test]
    fn test_producer_rejects_oversized_message() {
        let config = ProducerConfig {
            message: "x".repeat(300),
            ..quick_config()
        };
        let result = Producer::new("syncshm_prod_oversized", config);
        assert!(matches!(result, Err(ShmError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_producer_rejects_zero_attempts() {
        let config = ProducerConfig {
            create_attempts: 0,
            ..quick_config()
        };
        let result = Producer::new("syncshm_prod_zero", config);
        assert!(matches!(result, Err(ShmError::Config { .. })));
    }

    #[test]
    fn test_producer_publishes_and_leaves_segment() {
        let name = format!("syncshm_prod_run_{}", std::process::id());
        let producer = Producer::new(&name, quick_config()).unwrap();

        let report = producer.run().unwrap();
        assert_eq!(report.segment_size, SharedBuffer::SIZE);
        assert_eq!(report.payload_len, REFERENCE_MESSAGE.len());

        // Teardown belongs to the consumer.
        assert!(exists(&name).unwrap());

        let region = open_existing(&name).unwrap().map().unwrap();
        let buffer = SynchronizedBuffer::attach(&region).unwrap();
        assert!(buffer.has_data().unwrap());
        assert_eq!(
            buffer.wait_for_data(None).unwrap().to_str().unwrap(),
            REFERENCE_MESSAGE
        );

        remove(&name).unwrap();
    }

    #[test]
    fn test_producer_publishes_configured_message() {
        let name = format!("syncshm_prod_custom_{}", std::process::id());
        let config = ProducerConfig {
            message: "custom payload".to_string(),
            ..quick_config()
        };
        let report = Producer::new(&name, config).unwrap().run().unwrap();
        assert_eq!(report.payload_len, "custom payload".len());

        let region = open_existing(&name).unwrap().map().unwrap();
        let buffer = SynchronizedBuffer::attach(&region).unwrap();
        assert_eq!(buffer.wait_for_data(None).unwrap().as_bytes(), b"custom payload");

        remove(&name).unwrap();
    }

    #[test]
    fn test_producer_reclaims_stale_segment() {
        let name = format!("syncshm_prod_stale_{}", std::process::id());
        let _ = remove(&name);
        drop(crate::segment::create_exclusive(&name, 16).unwrap());

        let producer = Producer::new(&name, quick_config()).unwrap();
        let report = producer.run().unwrap();
        assert_eq!(report.segment_size, SharedBuffer::SIZE);

        remove(&name).unwrap();
    }
}
