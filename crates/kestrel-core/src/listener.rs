//! Consumer-side event callbacks.

use std::sync::{Arc, Weak};

/// Events delivered to the consumer.
///
/// Callbacks are invoked with the queue lock released, so implementations
/// may call back into the queue. They are best-effort: the queue ignores
/// anything a listener does.
pub trait ConsumerListener: Send + Sync {
    /// A new frame is available for acquisition. Not delivered for frames
    /// that were dropped in place.
    fn on_frame_available(&self);

    /// One or more buffers were freed; cached handles should be dropped.
    fn on_buffers_released(&self) {}

    /// The producer switched the sideband stream.
    fn on_sideband_stream_changed(&self) {}
}

/// A listener proxy holding its target weakly.
///
/// The queue installs one of these around every registered listener, so
/// registration never keeps a consumer alive past its logical end of
/// life: each callback attempts an upgrade and silently skips if the
/// target is gone. Whoever wants callbacks delivered keeps their own
/// strong reference.
pub struct ProxyListener {
    inner: Weak<dyn ConsumerListener>,
}

impl ProxyListener {
    pub fn new(inner: Weak<dyn ConsumerListener>) -> Self {
        Self { inner }
    }

    /// Convenience constructor downgrading a live listener.
    pub fn wrapping(listener: &Arc<dyn ConsumerListener>) -> Self {
        Self {
            inner: Arc::downgrade(listener),
        }
    }
}

impl ConsumerListener for ProxyListener {
    fn on_frame_available(&self) {
        if let Some(listener) = self.inner.upgrade() {
            listener.on_frame_available();
        }
    }

    fn on_buffers_released(&self) {
        if let Some(listener) = self.inner.upgrade() {
            listener.on_buffers_released();
        }
    }

    fn on_sideband_stream_changed(&self) {
        if let Some(listener) = self.inner.upgrade() {
            listener.on_sideband_stream_changed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        frames: AtomicUsize,
    }

    impl ConsumerListener for Counting {
        fn on_frame_available(&self) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_proxy_forwards_while_alive() {
        let target = Arc::new(Counting {
            frames: AtomicUsize::new(0),
        });
        let as_listener: Arc<dyn ConsumerListener> = target.clone();
        let proxy = ProxyListener::wrapping(&as_listener);

        proxy.on_frame_available();
        assert_eq!(target.frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_proxy_skips_after_drop() {
        let target = Arc::new(Counting {
            frames: AtomicUsize::new(0),
        });
        let as_listener: Arc<dyn ConsumerListener> = target.clone();
        let proxy = ProxyListener::wrapping(&as_listener);

        drop(as_listener);
        drop(target);
        // Nothing to upgrade; must not panic.
        proxy.on_frame_available();
        proxy.on_buffers_released();
    }
}
