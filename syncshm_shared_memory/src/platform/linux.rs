//! Linux-specific process and clock helpers

use crate::error::ShmResult;
use nix::sys::time::TimeSpec;
use nix::time::{ClockId, clock_gettime};
use nix::unistd::getpid;
use std::time::Duration;

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

/// Absolute `CLOCK_MONOTONIC` time `timeout` from now.
///
/// Condition variables in the shared buffer are clocked on the monotonic
/// clock, so wall-clock jumps never shorten or stretch a bounded wait.
pub fn monotonic_deadline(timeout: Duration) -> ShmResult<libc::timespec> {
    let now = clock_gettime(ClockId::CLOCK_MONOTONIC)?;
    let deadline = now + TimeSpec::from_duration(timeout);
    Ok(*deadline.as_ref())
}
