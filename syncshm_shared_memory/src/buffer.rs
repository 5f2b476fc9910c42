//! Synchronized buffer placed at the base of a mapped segment
//!
//! ```text
//! offset 0 ┌────────────────────────────┐
//!          │ mutex   (pthread_mutex_t)  │
//!          │ condition (pthread_cond_t) │
//!          │ has_data (bool)            │
//!          │ message  [u8; 256]         │
//!          │ consumed (bool)            │
//!          │ init_marker (u64)          │
//!          └────────────────────────────┘
//! ```
//!
//! The producer constructs the layout in place exactly once, then stores
//! `init_marker` with release ordering. A consumer that maps the segment
//! before the marker is visible gets `NotReady` and retries, so nobody ever
//! locks a mutex that has not been initialized yet.
//!
//! `has_data`, `message` and `consumed` are only touched while `mutex` is
//! held. `has_data` goes from false to true at most once per segment, and
//! `consumed` is set once a consumer has taken the message, so a segment
//! left behind after a read is never delivered a second time.

use crate::error::{ShmError, ShmResult};
use crate::platform::monotonic_deadline;
use crate::segment::MappedRegion;
use crate::sync::{ProcessCondvar, ProcessMutex};
use static_assertions::{const_assert, const_assert_eq};
use std::borrow::Cow;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use syncshm::consts::{MAX_PAYLOAD_LEN, MESSAGE_CAPACITY};

/// Marker stored once construction has finished: `"SYNCSHM\0"`.
pub const BUFFER_MAGIC: u64 = u64::from_le_bytes(*b"SYNCSHM\0");

/// Raw layout of the synchronized buffer in shared memory.
#[repr(C, align(64))]
pub struct SharedBuffer {
    mutex: ProcessMutex,
    condition: ProcessCondvar,
    has_data: UnsafeCell<bool>,
    message: UnsafeCell<[u8; MESSAGE_CAPACITY]>,
    consumed: UnsafeCell<bool>,
    init_marker: AtomicU64,
}

const_assert_eq!(core::mem::offset_of!(SharedBuffer, mutex), 0);
const_assert_eq!(core::mem::align_of::<SharedBuffer>(), 64);
const_assert!(
    core::mem::offset_of!(SharedBuffer, message) > core::mem::offset_of!(SharedBuffer, has_data)
);
const_assert!(
    core::mem::offset_of!(SharedBuffer, init_marker) > core::mem::offset_of!(SharedBuffer, message)
);
const_assert!(core::mem::size_of::<SharedBuffer>() < 4096);

// SAFETY: `has_data`, `message` and `consumed` are only accessed while `mutex` is held,
// and the sync primitives are themselves thread- and process-safe.
unsafe impl Sync for SharedBuffer {}

impl SharedBuffer {
    /// Bytes a segment needs to hold the buffer
    pub const SIZE: usize = core::mem::size_of::<Self>();
}

/// Protocol view over the [`SharedBuffer`] of one mapped segment
pub struct SynchronizedBuffer<'a> {
    name: &'a str,
    shared: &'a SharedBuffer,
}

impl<'a> SynchronizedBuffer<'a> {
    /// Placement-construct the buffer at the base of a freshly created region.
    ///
    /// Initializes mutex and condition, clears `has_data` and the message,
    /// then publishes the init marker. Refuses a region that already carries
    /// a constructed buffer.
    pub fn construct(region: &'a mut MappedRegion) -> ShmResult<Self> {
        check_size(region)?;
        let ptr = region.as_mut_ptr() as *mut SharedBuffer;
        debug_assert_eq!(ptr as usize % core::mem::align_of::<SharedBuffer>(), 0);

        unsafe {
            if (*ptr).init_marker.load(Ordering::Acquire) == BUFFER_MAGIC {
                return Err(ShmError::AlreadyExists {
                    name: region.name().to_string(),
                });
            }
            ProcessMutex::init_at(&raw mut (*ptr).mutex)?;
            ProcessCondvar::init_at(&raw mut (*ptr).condition)?;
            (&raw mut (*ptr).has_data).write(UnsafeCell::new(false));
            (&raw mut (*ptr).message).write(UnsafeCell::new([0; MESSAGE_CAPACITY]));
            (&raw mut (*ptr).consumed).write(UnsafeCell::new(false));
            (*ptr).init_marker.store(BUFFER_MAGIC, Ordering::Release);
        }

        let region: &'a MappedRegion = region;
        Ok(Self {
            name: region.name(),
            shared: unsafe { &*ptr },
        })
    }

    /// View a buffer some other process constructed.
    ///
    /// Returns `NotReady` until the constructor's init marker is visible.
    pub fn attach(region: &'a MappedRegion) -> ShmResult<Self> {
        check_size(region)?;
        let shared = unsafe { &*(region.as_ptr() as *const SharedBuffer) };
        if shared.init_marker.load(Ordering::Acquire) != BUFFER_MAGIC {
            return Err(ShmError::NotReady {
                name: region.name().to_string(),
            });
        }
        Ok(Self {
            name: region.name(),
            shared,
        })
    }

    /// Name of the segment holding the buffer
    pub fn name(&self) -> &str {
        self.name
    }

    /// Write the payload, set the readiness flag and wake the waiter.
    ///
    /// Everything happens under the mutex, including `notify_one`, so a
    /// consumer can never check the flag between the write and the signal.
    pub fn publish(&self, message: &Message) -> ShmResult<()> {
        let _guard = self.shared.mutex.lock()?;
        unsafe {
            if *self.shared.has_data.get() {
                return Err(ShmError::AlreadyPublished {
                    name: self.name.to_string(),
                });
            }
            *self.shared.message.get() = message.bytes;
            *self.shared.has_data.get() = true;
        }
        self.shared.condition.notify_one()
    }

    /// Block until the readiness flag is set, then copy the message out.
    ///
    /// The flag is re-checked under the lock after every wakeup, so spurious
    /// wakeups and a notify that happened before the wait are both handled.
    /// With a `timeout`, gives up with `ProducerTimeout`.
    pub fn wait_for_data(&self, timeout: Option<Duration>) -> ShmResult<Message> {
        let start = Instant::now();
        let deadline = timeout.map(monotonic_deadline).transpose()?;

        let mut guard = self.shared.mutex.lock()?;
        while !unsafe { *self.shared.has_data.get() } {
            let timed_out = match &deadline {
                Some(deadline) => self.shared.condition.wait_until(&mut guard, deadline)?,
                None => {
                    self.shared.condition.wait(&mut guard)?;
                    false
                }
            };
            if timed_out && !unsafe { *self.shared.has_data.get() } {
                return Err(ShmError::ProducerTimeout {
                    name: self.name.to_string(),
                    waited: start.elapsed(),
                });
            }
        }

        let message = Message::from_raw(unsafe { &*self.shared.message.get() });
        drop(guard);
        Ok(message)
    }

    /// Wait at most `timeout` for the readiness flag, then take the message.
    ///
    /// Returns `Ok(None)` if the flag is still clear when the timeout
    /// elapses. Taking marks the buffer consumed; a second take on the same
    /// segment fails with `AlreadyConsumed`.
    pub fn take_message(&self, timeout: Duration) -> ShmResult<Option<Message>> {
        let deadline = monotonic_deadline(timeout)?;

        let mut guard = self.shared.mutex.lock()?;
        loop {
            if unsafe { *self.shared.consumed.get() } {
                return Err(ShmError::AlreadyConsumed {
                    name: self.name.to_string(),
                });
            }
            if unsafe { *self.shared.has_data.get() } {
                break;
            }
            if self.shared.condition.wait_until(&mut guard, &deadline)?
                && !unsafe { *self.shared.has_data.get() }
            {
                return Ok(None);
            }
        }

        let message = unsafe {
            *self.shared.consumed.get() = true;
            Message::from_raw(&*self.shared.message.get())
        };
        drop(guard);
        Ok(Some(message))
    }

    /// Snapshot of the readiness flag, read under the lock.
    pub fn has_data(&self) -> ShmResult<bool> {
        let _guard = self.shared.mutex.lock()?;
        Ok(unsafe { *self.shared.has_data.get() })
    }
}

fn check_size(region: &MappedRegion) -> ShmResult<()> {
    if region.len() < SharedBuffer::SIZE {
        return Err(ShmError::SegmentTooSmall {
            name: region.name().to_string(),
            size: region.len(),
            required: SharedBuffer::SIZE,
        });
    }
    Ok(())
}

/// Fixed-capacity payload, NUL-terminated inside the buffer
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    bytes: [u8; MESSAGE_CAPACITY],
    len: usize,
}

impl Message {
    /// Build a message from payload bytes.
    ///
    /// Payloads longer than `MAX_PAYLOAD_LEN` or containing NUL are
    /// rejected rather than silently truncated.
    pub fn new(payload: &[u8]) -> ShmResult<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ShmError::PayloadTooLarge {
                len: payload.len(),
                capacity: MAX_PAYLOAD_LEN,
            });
        }
        if payload.contains(&0) {
            return Err(ShmError::InvalidPayload {
                reason: "payload contains NUL",
            });
        }
        let mut bytes = [0u8; MESSAGE_CAPACITY];
        bytes[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            bytes,
            len: payload.len(),
        })
    }

    /// Decode a raw buffer: the payload runs up to the first NUL.
    pub fn from_raw(raw: &[u8; MESSAGE_CAPACITY]) -> Self {
        let len = raw.iter().position(|&b| b == 0).unwrap_or(MESSAGE_CAPACITY);
        Self { bytes: *raw, len }
    }

    /// Payload bytes, terminator excluded
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Payload as UTF-8
    pub fn to_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }

    /// Payload as text, invalid UTF-8 replaced
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl TryFrom<&str> for Message {
    type Error = ShmError;

    fn try_from(text: &str) -> ShmResult<Self> {
        Self::new(text.as_bytes())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Message").field(&self.to_string_lossy()).finish()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}
