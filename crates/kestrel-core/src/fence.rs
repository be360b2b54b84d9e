//! Synchronization fences.
//!
//! A [`Fence`] is a cheap cloneable handle to an underlying synchronization
//! primitive. The queue moves fences in both directions: the producer
//! attaches one when queueing (signalled once the frame contents are fully
//! written) and the consumer attaches one when releasing (signalled once its
//! last read has retired). `Fence::NO_FENCE` is the sentinel for
//! "already signalled".
//!
//! The primitive itself is pluggable via [`SyncFence`]; [`SoftFence`] is a
//! plain in-process implementation used by tests and examples.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Outcome of a bounded fence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence signalled within the timeout.
    Signaled,
    /// The timeout elapsed first.
    TimedOut,
    /// The underlying primitive failed.
    Error,
}

/// A synchronization primitive with a bounded wait.
pub trait SyncFence: Send + Sync {
    fn wait(&self, timeout: Duration) -> FenceStatus;
}

/// Handle to an optional [`SyncFence`].
#[derive(Clone, Default)]
pub struct Fence {
    inner: Option<Arc<dyn SyncFence>>,
}

impl Fence {
    /// The already-signalled sentinel.
    pub const NO_FENCE: Fence = Fence { inner: None };

    pub fn new(fence: Arc<dyn SyncFence>) -> Self {
        Self { inner: Some(fence) }
    }

    /// Whether there is an underlying primitive to wait on.
    pub fn is_pending(&self) -> bool {
        self.inner.is_some()
    }

    /// Wait for the fence to signal. `NO_FENCE` returns immediately.
    pub fn wait(&self, timeout: Duration) -> FenceStatus {
        match &self.inner {
            None => FenceStatus::Signaled,
            Some(fence) => fence.wait(timeout),
        }
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inner.is_some() {
            f.write_str("Fence(pending)")
        } else {
            f.write_str("Fence(none)")
        }
    }
}

/// An in-process fence backed by a mutex and condvar.
///
/// Created unsignalled; [`SoftFence::signal`] releases all current and
/// future waiters. Signalling is sticky.
pub struct SoftFence {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl SoftFence {
    pub fn new() -> Arc<SoftFence> {
        Arc::new(SoftFence {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_all();
    }

    /// Wrap this fence in a [`Fence`] handle.
    pub fn as_fence(self: &Arc<Self>) -> Fence {
        Fence::new(self.clone())
    }
}

impl SyncFence for SoftFence {
    fn wait(&self, timeout: Duration) -> FenceStatus {
        let mut signaled = self.signaled.lock();
        if *signaled {
            return FenceStatus::Signaled;
        }
        let result = self.cond.wait_for(&mut signaled, timeout);
        if *signaled {
            FenceStatus::Signaled
        } else {
            debug_assert!(result.timed_out());
            FenceStatus::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_fence_is_signaled() {
        assert!(!Fence::NO_FENCE.is_pending());
        assert_eq!(
            Fence::NO_FENCE.wait(Duration::from_millis(0)),
            FenceStatus::Signaled
        );
    }

    #[test]
    fn test_soft_fence_times_out_until_signaled() {
        let soft = SoftFence::new();
        let fence = soft.as_fence();
        assert!(fence.is_pending());
        assert_eq!(
            fence.wait(Duration::from_millis(10)),
            FenceStatus::TimedOut
        );
        soft.signal();
        assert_eq!(fence.wait(Duration::from_millis(10)), FenceStatus::Signaled);
    }

    #[test]
    fn test_soft_fence_releases_concurrent_waiter() {
        let soft = SoftFence::new();
        let fence = soft.as_fence();
        let waiter = std::thread::spawn(move || fence.wait(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        soft.signal();
        assert_eq!(waiter.join().unwrap(), FenceStatus::Signaled);
    }
}
