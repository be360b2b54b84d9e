//! Consumer endpoint.
//!
//! The consumer pops queued frames with [`Consumer::acquire_buffer`], reads
//! them (waiting on the item's fence), and returns the slots with
//! [`Consumer::release_buffer`]. It also owns queue configuration: default
//! geometry and format, usage bits, buffer-count policy, and the listener
//! registration.

use std::sync::Arc;

use tracing::{debug, trace};

use kestrel_core::{
    BufferUsage, ConsumerListener, Fence, PixelFormat, ProxyListener, QueueError, QueueResult,
    SlotState, TransformFlags,
};

use crate::core::{CoreSnapshot, QueueCore};
use crate::slot::BufferItem;
use crate::SLOT_COUNT;

/// Sanity window on presentation timestamps: anything further than this
/// from `present_when` is treated as using a different timebase and is
/// neither dropped nor deferred.
const PRESENT_SANITY_WINDOW_NS: i64 = 1_000_000_000;

/// The consumer half of a buffer queue. Created by
/// [`create_pair`](crate::create_pair).
pub struct Consumer {
    pub(crate) core: Arc<QueueCore>,
}

impl Consumer {
    /// Pop the head of the FIFO and take ownership of its slot.
    ///
    /// With a non-zero `present_when`, frames are acquired by due time:
    /// heads whose successor is also due are dropped (their slots return to
    /// free), and a head that is not yet due fails with `PresentLater`.
    /// `present_when == 0` acquires the head unconditionally.
    pub fn acquire_buffer(&self, present_when: i64) -> QueueResult<BufferItem> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }

        let acquired = st
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Acquired)
            .count();
        if acquired >= st.max_acquired_buffer_count {
            return Err(QueueError::MaxAcquiredExceeded {
                max: st.max_acquired_buffer_count,
            });
        }
        if st.queue.is_empty() {
            return Err(QueueError::NoBufferAvailable);
        }

        if present_when != 0 {
            // Catch up: while the second frame is also due, the head is
            // stale and can be dropped. Auto-timestamped heads are exempt;
            // their timestamps don't describe presentation time.
            while st.queue.len() > 1 && !st.queue[0].is_auto_timestamp {
                let next_ts = st.queue[1].timestamp;
                if next_ts > present_when || next_ts < present_when - PRESENT_SANITY_WINDOW_NS {
                    break;
                }
                let (head_slot, head_frame, tracked) = {
                    let head = &st.queue[0];
                    (head.slot, head.frame_number, st.still_tracking(head))
                };
                if tracked {
                    st.slots[head_slot].state = SlotState::Free;
                    st.slots[head_slot].frame_number = 0;
                }
                st.queue.pop_front();
                trace!(
                    slot = head_slot,
                    frame = head_frame,
                    "acquire_buffer: dropping stale frame"
                );
            }

            let head_ts = st.queue[0].timestamp;
            if head_ts > present_when && head_ts < present_when + PRESENT_SANITY_WINDOW_NS {
                return Err(QueueError::PresentLater {
                    timestamp: head_ts,
                    present_when,
                });
            }
        }

        let Some(mut item) = st.queue.pop_front() else {
            return Err(QueueError::NoBufferAvailable);
        };
        let slot = item.slot;
        if st.slots[slot].acquire_called {
            // The consumer already holds this handle; elide it.
            item.graphic_buffer = None;
        }
        st.slots[slot].state = SlotState::Acquired;
        st.slots[slot].acquire_called = true;
        trace!(slot, frame = item.frame_number, "acquire_buffer");
        Ok(item)
    }

    /// Return an acquired slot to the free list.
    ///
    /// `frame_number` must match the slot's current frame; a mismatch means
    /// the slot has been freed and recycled since the acquisition and the
    /// release is ignored with `StaleRelease`. The fence is stored on the
    /// slot for the next dequeuer to wait on.
    pub fn release_buffer(&self, slot: usize, frame_number: u64, fence: Fence) -> QueueResult<()> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        if slot >= SLOT_COUNT {
            return Err(QueueError::SlotOutOfRange {
                slot,
                limit: SLOT_COUNT,
            });
        }
        if st.slots[slot].frame_number != frame_number {
            return Err(QueueError::StaleRelease { slot, frame_number });
        }
        match st.slots[slot].state {
            SlotState::Acquired => {
                // The fence serves the next dequeuer twice: it is returned
                // as the out-fence, and the core itself waits on it
                // (bounded) before handing the slot back.
                st.slots[slot].fence = fence.clone();
                st.slots[slot].release_fence = fence;
                st.slots[slot].state = SlotState::Free;
                self.core.dequeue_cond.notify_all();
                trace!(slot, frame = frame_number, "release_buffer");
                Ok(())
            }
            // The slot was freed out from under the acquisition; the
            // consumer's release was expected and is quietly stale.
            _ if st.slots[slot].needs_cleanup_on_release => {
                st.slots[slot].needs_cleanup_on_release = false;
                Err(QueueError::StaleRelease { slot, frame_number })
            }
            state => Err(QueueError::SlotNotAcquired { slot, state }),
        }
    }

    /// Register the consumer listener. Reconnecting revives an abandoned
    /// queue.
    ///
    /// The queue holds the listener through a weak [`ProxyListener`], so
    /// registration does not keep the consumer alive: callbacks stop (and
    /// are silently skipped) once the caller drops its last `Arc`.
    pub fn consumer_connect(
        &self,
        listener: Arc<dyn ConsumerListener>,
        controlled_by_app: bool,
    ) -> QueueResult<()> {
        let proxy: Arc<dyn ConsumerListener> = Arc::new(ProxyListener::wrapping(&listener));
        let mut st = self.core.state.lock();
        st.abandoned = false;
        st.consumer_listener = Some(proxy);
        st.consumer_controlled_by_app = controlled_by_app;
        debug!(name = %st.consumer_name, controlled_by_app, "consumer connected");
        Ok(())
    }

    /// Unregister the listener and abandon the queue.
    pub fn consumer_disconnect(&self) -> QueueResult<()> {
        let mut st = self.core.state.lock();
        if st.consumer_listener.is_none() {
            return Err(QueueError::NoListener);
        }
        st.abandoned = true;
        st.consumer_listener = None;
        st.queue.clear();
        st.free_all_buffers();
        self.core.dequeue_cond.notify_all();
        debug!(name = %st.consumer_name, "consumer disconnected");
        Ok(())
    }

    /// Abandon the queue: every slot is freed, the FIFO is cleared, and all
    /// subsequent operations fail with `NoInit`. Idempotent.
    pub fn abandon(&self) {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return;
        }
        st.abandoned = true;
        st.queue.clear();
        st.free_all_buffers();
        self.core.dequeue_cond.notify_all();
        debug!(name = %st.consumer_name, "queue abandoned");
    }

    /// Bitmask of slots whose buffer handle the consumer must re-fetch on
    /// next acquisition (one bit per slot).
    pub fn get_released_buffers(&self) -> QueueResult<u64> {
        let st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        let mut mask: u64 = 0;
        for (i, slot) in st.slots.iter().enumerate() {
            if !slot.acquire_called {
                mask |= 1 << i;
            }
        }
        // Queued frames the consumer has seen before will still arrive with
        // their handle elided; don't report those slots.
        for item in &st.queue {
            if item.acquire_called {
                mask &= !(1 << item.slot);
            }
        }
        Ok(mask)
    }

    /// Default size substituted when the producer dequeues with (0, 0).
    pub fn set_default_buffer_size(&self, width: u32, height: u32) -> QueueResult<()> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        if width == 0 || height == 0 {
            return Err(QueueError::InvalidDimensions { width, height });
        }
        st.default_width = width;
        st.default_height = height;
        Ok(())
    }

    /// Default format substituted when the producer dequeues with format 0.
    pub fn set_default_buffer_format(&self, format: PixelFormat) -> QueueResult<()> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        st.default_format = format;
        Ok(())
    }

    /// Usage bits OR-ed into every allocation request.
    pub fn set_consumer_usage_bits(&self, usage: BufferUsage) -> QueueResult<()> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        st.consumer_usage = usage;
        Ok(())
    }

    /// Hint returned to the producer so it can pre-rotate frames.
    pub fn set_transform_hint(&self, hint: TransformFlags) -> QueueResult<()> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        st.transform_hint = hint;
        Ok(())
    }

    /// Name used in log output.
    pub fn set_consumer_name(&self, name: impl Into<String>) -> QueueResult<()> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        st.consumer_name = name.into();
        Ok(())
    }

    /// Buffer count used when the producer does not set an override.
    pub fn set_default_max_buffer_count(&self, count: usize) -> QueueResult<()> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        let min = if st.use_async_buffer { 2 } else { 1 };
        if count < min {
            return Err(QueueError::BufferCountTooSmall { count, min });
        }
        if count > SLOT_COUNT {
            return Err(QueueError::BufferCountTooLarge {
                count,
                max: SLOT_COUNT,
            });
        }
        st.default_max_buffer_count = count;
        self.core.dequeue_cond.notify_all();
        Ok(())
    }

    /// How many buffers the consumer may hold acquired at once. Only legal
    /// while no producer is connected.
    pub fn set_max_acquired_buffer_count(&self, count: usize) -> QueueResult<()> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        if let Some(api) = st.connected_api {
            return Err(QueueError::AlreadyConnected { api });
        }
        if count < 1 {
            return Err(QueueError::BufferCountTooSmall { count, min: 1 });
        }
        if count > SLOT_COUNT {
            return Err(QueueError::BufferCountTooLarge {
                count,
                max: SLOT_COUNT,
            });
        }
        st.max_acquired_buffer_count = count;
        self.core.dequeue_cond.notify_all();
        Ok(())
    }

    /// Give up the extra buffer reserved for async producers. Only legal
    /// before a listener is registered.
    pub fn disable_async_buffer(&self) -> QueueResult<()> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        if st.consumer_listener.is_some() {
            return Err(QueueError::ConsumerAlreadyConnected);
        }
        st.use_async_buffer = false;
        Ok(())
    }

    /// Point-in-time view of the core for diagnostics and tests.
    pub fn snapshot(&self) -> CoreSnapshot {
        self.core.state.lock().snapshot()
    }
}
