//! Process-shared mutex and condition variable
//!
//! Both primitives are POSIX objects initialized in place inside a mapped
//! segment with `PTHREAD_PROCESS_SHARED`, so independent processes that map
//! the same segment contend on the same lock. They are never moved after
//! initialization and never destroyed: the segment is unlinked instead.

use crate::error::{ShmError, ShmResult};
use crate::platform::monotonic_deadline;
use std::cell::UnsafeCell;
use std::io;
use std::time::Duration;

macro_rules! check_err {
    ($op:literal, $call:expr) => {
        let err = $call;
        if err != 0 {
            return Err(ShmError::Sync {
                op: $op,
                source: io::Error::from_raw_os_error(err),
            });
        }
    };
}

/// Mutex whose storage lives in shared memory
#[repr(C)]
pub struct ProcessMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: the pthread mutex is designed for concurrent use from any thread
// (or process); all access goes through pthread calls.
unsafe impl Sync for ProcessMutex {}
unsafe impl Send for ProcessMutex {}

impl ProcessMutex {
    /// Initialize a process-shared mutex at `this`.
    ///
    /// On Linux the mutex is also robust: if its owner dies while holding
    /// it, the next `lock` recovers it instead of deadlocking.
    ///
    /// # Safety
    ///
    /// `this` must point to writable memory large enough for `Self`, and no
    /// other thread or process may touch it until this call returns.
    pub unsafe fn init_at(this: *mut Self) -> ShmResult<()> {
        unsafe {
            let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
            check_err!("pthread_mutexattr_init", libc::pthread_mutexattr_init(&mut attr));
            check_err!(
                "pthread_mutexattr_setpshared",
                libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED)
            );
            #[cfg(target_os = "linux")]
            check_err!(
                "pthread_mutexattr_setrobust",
                libc::pthread_mutexattr_setrobust(&mut attr, libc::PTHREAD_MUTEX_ROBUST)
            );
            let err = libc::pthread_mutex_init(UnsafeCell::raw_get(&raw const (*this).inner), &attr);
            libc::pthread_mutexattr_destroy(&mut attr);
            check_err!("pthread_mutex_init", err);
        }
        Ok(())
    }

    /// Acquire the lock, blocking until it is available.
    ///
    /// The returned guard releases the lock when dropped, on every exit path.
    pub fn lock(&self) -> ShmResult<ProcessMutexGuard<'_>> {
        let err = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        self.recover(err, "pthread_mutex_lock")?;
        Ok(ProcessMutexGuard { mutex: self })
    }

    /// Map an acquisition result to success, recovering a lock whose
    /// previous owner died while holding it.
    fn recover(&self, err: i32, op: &'static str) -> ShmResult<()> {
        match err {
            0 => Ok(()),
            #[cfg(target_os = "linux")]
            libc::EOWNERDEAD => {
                tracing::warn!("Previous lock owner died; marking shared mutex consistent");
                check_err!("pthread_mutex_consistent", unsafe {
                    libc::pthread_mutex_consistent(self.inner.get())
                });
                Ok(())
            }
            err => Err(ShmError::Sync {
                op,
                source: io::Error::from_raw_os_error(err),
            }),
        }
    }
}

/// Scoped lock on a [`ProcessMutex`]
pub struct ProcessMutexGuard<'a> {
    mutex: &'a ProcessMutex,
}

impl Drop for ProcessMutexGuard<'_> {
    fn drop(&mut self) {
        let err = unsafe { libc::pthread_mutex_unlock(self.mutex.inner.get()) };
        debug_assert_eq!(err, 0, "unlock of a held process mutex failed");
    }
}

/// Condition variable whose storage lives in shared memory
#[repr(C)]
pub struct ProcessCondvar {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

// SAFETY: see `ProcessMutex`.
unsafe impl Sync for ProcessCondvar {}
unsafe impl Send for ProcessCondvar {}

impl ProcessCondvar {
    /// Initialize a process-shared condition variable at `this`, clocked on
    /// `CLOCK_MONOTONIC`.
    ///
    /// # Safety
    ///
    /// Same contract as [`ProcessMutex::init_at`].
    pub unsafe fn init_at(this: *mut Self) -> ShmResult<()> {
        unsafe {
            let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
            check_err!("pthread_condattr_init", libc::pthread_condattr_init(&mut attr));
            check_err!(
                "pthread_condattr_setpshared",
                libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED)
            );
            check_err!(
                "pthread_condattr_setclock",
                libc::pthread_condattr_setclock(&mut attr, libc::CLOCK_MONOTONIC)
            );
            let err = libc::pthread_cond_init(UnsafeCell::raw_get(&raw const (*this).inner), &attr);
            libc::pthread_condattr_destroy(&mut attr);
            check_err!("pthread_cond_init", err);
        }
        Ok(())
    }

    /// Atomically release the guarded mutex and suspend until notified.
    ///
    /// Wakeups may be spurious: callers re-check their predicate.
    pub fn wait(&self, guard: &mut ProcessMutexGuard<'_>) -> ShmResult<()> {
        let err = unsafe { libc::pthread_cond_wait(self.inner.get(), guard.mutex.inner.get()) };
        guard.mutex.recover(err, "pthread_cond_wait")
    }

    /// Like [`wait`](Self::wait), but gives up at `deadline` (absolute
    /// `CLOCK_MONOTONIC` time). Returns `true` if the deadline passed.
    pub fn wait_until(
        &self,
        guard: &mut ProcessMutexGuard<'_>,
        deadline: &libc::timespec,
    ) -> ShmResult<bool> {
        let err = unsafe {
            libc::pthread_cond_timedwait(self.inner.get(), guard.mutex.inner.get(), deadline)
        };
        if err == libc::ETIMEDOUT {
            return Ok(true);
        }
        guard.mutex.recover(err, "pthread_cond_timedwait")?;
        Ok(false)
    }

    /// Wait at most `timeout`. Returns `true` if it elapsed.
    pub fn wait_timeout(
        &self,
        guard: &mut ProcessMutexGuard<'_>,
        timeout: Duration,
    ) -> ShmResult<bool> {
        let deadline = monotonic_deadline(timeout)?;
        self.wait_until(guard, &deadline)
    }

    /// Wake one waiter.
    pub fn notify_one(&self) -> ShmResult<()> {
        check_err!("pthread_cond_signal", unsafe {
            libc::pthread_cond_signal(self.inner.get())
        });
        Ok(())
    }

    /// Wake every waiter.
    pub fn notify_all(&self) -> ShmResult<()> {
        check_err!("pthread_cond_broadcast", unsafe {
            libc::pthread_cond_broadcast(self.inner.get())
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Instant;

    struct Pair {
        mutex: ProcessMutex,
        cond: ProcessCondvar,
    }

    fn new_pair() -> Arc<Pair> {
        let mut pair = Arc::new(MaybeUninit::<Pair>::uninit());
        let ptr = Arc::get_mut(&mut pair).unwrap().as_mut_ptr();
        unsafe {
            ProcessMutex::init_at(&raw mut (*ptr).mutex).unwrap();
            ProcessCondvar::init_at(&raw mut (*ptr).cond).unwrap();
            pair.assume_init()
        }
    }

    #[test]
    fn test_mutual_exclusion_counter() {
        let pair = new_pair();
        let holders = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pair = Arc::clone(&pair);
                let holders = Arc::clone(&holders);
                let max_seen = Arc::clone(&max_seen);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let _guard = pair.mutex.lock().unwrap();
                        let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        std::hint::spin_loop();
                        holders.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(holders.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wait_timeout_elapses() {
        let pair = new_pair();
        let mut guard = pair.mutex.lock().unwrap();

        let start = Instant::now();
        let mut timed_out = false;
        while !timed_out {
            timed_out = pair
                .cond
                .wait_timeout(&mut guard, Duration::from_millis(50))
                .unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_notify_wakes_waiter() {
        let pair = new_pair();
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let pair = Arc::clone(&pair);
            let flag = Arc::clone(&flag);
            std::thread::spawn(move || {
                let mut guard = pair.mutex.lock().unwrap();
                while !flag.load(Ordering::SeqCst) {
                    let timed_out = pair
                        .cond
                        .wait_timeout(&mut guard, Duration::from_secs(5))
                        .unwrap();
                    assert!(!timed_out || flag.load(Ordering::SeqCst));
                }
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        {
            let _guard = pair.mutex.lock().unwrap();
            flag.store(true, Ordering::SeqCst);
            pair.cond.notify_one().unwrap();
        }
        waiter.join().unwrap();
    }

    #[test]
    fn test_notify_all_wakes_every_waiter() {
        let pair = new_pair();
        let flag = Arc::new(AtomicBool::new(false));
        let woken = Arc::new(AtomicU32::new(0));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let pair = Arc::clone(&pair);
                let flag = Arc::clone(&flag);
                let woken = Arc::clone(&woken);
                std::thread::spawn(move || {
                    let mut guard = pair.mutex.lock().unwrap();
                    while !flag.load(Ordering::SeqCst) {
                        pair.cond
                            .wait_timeout(&mut guard, Duration::from_secs(5))
                            .unwrap();
                    }
                    woken.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        {
            let _guard = pair.mutex.lock().unwrap();
            flag.store(true, Ordering::SeqCst);
            pair.cond.notify_all().unwrap();
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 3);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_lock_recovers_after_owner_died() {
        let pair = new_pair();
        {
            let pair = Arc::clone(&pair);
            std::thread::spawn(move || {
                std::mem::forget(pair.mutex.lock().unwrap());
            })
            .join()
            .unwrap();
        }

        // Owner thread exited holding the lock; the robust mutex hands it over.
        let guard = pair.mutex.lock();
        assert!(guard.is_ok());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let pair = new_pair();
        drop(pair.mutex.lock().unwrap());
        // Relocking from the same thread would deadlock if the guard leaked.
        drop(pair.mutex.lock().unwrap());
    }
}
