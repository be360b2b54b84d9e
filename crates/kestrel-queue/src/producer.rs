//! Producer endpoint.
//!
//! The producer obtains slots with [`Producer::dequeue_buffer`], fills the
//! backing buffer out of band, and hands frames to the consumer with
//! [`Producer::queue_buffer`]. All state lives in the shared core; this
//! type is a thin adapter that takes the core lock.

use std::mem;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use kestrel_core::{
    BufferUsage, DequeueFlags, Fence, FenceStatus, GraphicBuffer, PixelFormat, ProducerApi,
    QueryWhat, QueueError, QueueResult, Rect, ScalingMode, SlotState, TransformFlags,
};

use crate::core::QueueCore;
use crate::slot::BufferItem;
use crate::{FENCE_WAIT_TIMEOUT, SLOT_COUNT};

/// A successful dequeue.
#[derive(Debug)]
pub struct DequeuedBuffer {
    pub slot: usize,
    /// Fence left on the slot by its previous holder (the consumer's read
    /// fence after a release, or the producer's own write fence after a
    /// cancel or drop). Wait on it before writing into the buffer. The
    /// core has additionally made a bounded wait on the release fence.
    pub fence: Fence,
    pub flags: DequeueFlags,
}

/// Per-frame metadata supplied with [`Producer::queue_buffer`].
///
/// `scaling_mode` is carried raw; the queue validates it against
/// [`ScalingMode`] so a stale integer from a remote caller is rejected
/// rather than reinterpreted.
#[derive(Clone, Debug)]
pub struct QueueBufferInput {
    pub timestamp: i64,
    pub is_auto_timestamp: bool,
    pub crop: Rect,
    pub scaling_mode: u32,
    pub transform: TransformFlags,
    pub async_mode: bool,
    pub fence: Fence,
}

/// Snapshot of queue configuration returned by `queue_buffer` and
/// `connect`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueBufferOutput {
    pub width: u32,
    pub height: u32,
    pub transform_hint: TransformFlags,
    pub num_pending_buffers: usize,
}

/// The producer half of a buffer queue. Created by
/// [`create_pair`](crate::create_pair).
pub struct Producer {
    pub(crate) core: Arc<QueueCore>,
}

impl Producer {
    /// Obtain ownership of a free slot, allocating or reallocating its
    /// backing buffer as needed.
    ///
    /// `width` and `height` must be both zero (use the defaults) or both
    /// non-zero. A zero `format` selects the default format; `usage` is
    /// OR-ed with the consumer usage bits.
    ///
    /// Blocks while no slot is free, unless the queue is in cannot-block
    /// mode (then fails with `WouldBlock`). If the result carries
    /// `BUFFER_NEEDS_REALLOCATION` the caller must fetch the new handle
    /// with [`request_buffer`](Self::request_buffer) before queueing.
    pub fn dequeue_buffer(
        &self,
        async_mode: bool,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> QueueResult<DequeuedBuffer> {
        if (width == 0) != (height == 0) {
            return Err(QueueError::InvalidDimensions { width, height });
        }

        let mut flags = DequeueFlags::empty();
        let mut width = width;
        let mut height = height;
        let slot_idx;
        let out_fence;
        let release_fence;
        let effective_format;
        let effective_usage;
        {
            let mut st = self.core.state.lock();
            let async_mode = async_mode || st.async_mode;
            effective_format = if format.is_unspecified() {
                st.default_format
            } else {
                format
            };
            effective_usage = usage | st.consumer_usage;

            let found = loop {
                if st.abandoned {
                    return Err(QueueError::Abandoned);
                }
                if st.connected_api.is_none() {
                    return Err(QueueError::NotConnected);
                }

                let max_buffer_count = st.max_buffer_count(async_mode);

                // Free any buffers parked in free slots beyond the ceiling.
                // A non-free slot above the ceiling (dequeued under a larger
                // async ceiling) keeps its buffer until it comes back.
                for i in max_buffer_count..SLOT_COUNT {
                    if st.slots[i].state == SlotState::Free
                        && st.slots[i].graphic_buffer.is_some()
                    {
                        st.free_buffer(i);
                        flags |= DequeueFlags::RELEASE_ALL_BUFFERS;
                    }
                }

                let mut dequeued = 0usize;
                let mut acquired = 0usize;
                let mut found: Option<usize> = None;
                for i in 0..max_buffer_count {
                    match st.slots[i].state {
                        SlotState::Dequeued => dequeued += 1,
                        SlotState::Acquired => acquired += 1,
                        SlotState::Queued => {}
                        SlotState::Free => {
                            // Hand out the oldest free buffer: the consumer
                            // may still have reads in flight on the others.
                            match found {
                                Some(best)
                                    if st.slots[best].frame_number
                                        <= st.slots[i].frame_number => {}
                                _ => found = Some(i),
                            }
                        }
                    }
                }

                if st.override_max_buffer_count == 0 && dequeued > 0 {
                    return Err(QueueError::MultipleDequeue { dequeued });
                }

                if st.buffer_has_been_queued {
                    let min_undequeued = st.min_undequeued_count(async_mode);
                    let new_undequeued = max_buffer_count as isize - (dequeued as isize + 1);
                    if new_undequeued < min_undequeued as isize {
                        return Err(QueueError::MinUndequeuedExceeded {
                            min_undequeued,
                            dequeued,
                        });
                    }
                }

                if let Some(slot) = found {
                    break slot;
                }

                // The consumer is allowed to hold one acquisition briefly
                // past its limit; anything beyond that means the wait here
                // would be short, so cannot-block mode only fast-fails in
                // the ordinary case.
                if st.cannot_block && acquired <= st.max_acquired_buffer_count {
                    return Err(QueueError::WouldBlock);
                }
                self.core.dequeue_cond.wait(&mut st);
            };
            slot_idx = found;

            if width == 0 && height == 0 {
                width = st.default_width;
                height = st.default_height;
            }

            let slot = &mut st.slots[slot_idx];
            slot.state = SlotState::Dequeued;

            let needs_realloc = match &slot.graphic_buffer {
                Some(buffer) => !buffer.matches(width, height, effective_format, effective_usage),
                None => true,
            };
            if needs_realloc {
                slot.graphic_buffer = None;
                slot.request_buffer_called = false;
                slot.acquire_called = false;
                slot.fence = Fence::NO_FENCE;
                slot.release_fence = Fence::NO_FENCE;
                flags |= DequeueFlags::BUFFER_NEEDS_REALLOCATION;
            }

            out_fence = mem::replace(&mut slot.fence, Fence::NO_FENCE);
            release_fence = mem::replace(&mut slot.release_fence, Fence::NO_FENCE);
        } // lock released

        if flags.contains(DequeueFlags::BUFFER_NEEDS_REALLOCATION) {
            // Allocation may block; never hold the lock across it. On
            // failure the slot stays dequeued with no buffer and the caller
            // recovers with cancel_buffer.
            let buffer = self
                .core
                .allocator
                .allocate(width, height, effective_format, effective_usage)?;
            let mut st = self.core.state.lock();
            if st.abandoned {
                return Err(QueueError::Abandoned);
            }
            st.slots[slot_idx].frame_number = u64::MAX;
            st.slots[slot_idx].graphic_buffer = Some(buffer);
        }

        if release_fence.is_pending() {
            match release_fence.wait(FENCE_WAIT_TIMEOUT) {
                FenceStatus::Signaled => {}
                FenceStatus::TimedOut => {
                    warn!(slot = slot_idx, "dequeue_buffer: timeout waiting for release fence");
                }
                FenceStatus::Error => {
                    warn!(slot = slot_idx, "dequeue_buffer: error waiting for release fence");
                }
            }
        }

        trace!(slot = slot_idx, flags = flags.bits(), "dequeue_buffer");
        Ok(DequeuedBuffer {
            slot: slot_idx,
            fence: out_fence,
            flags,
        })
    }

    /// Fetch the backing buffer of a dequeued slot.
    pub fn request_buffer(&self, slot: usize) -> QueueResult<Arc<GraphicBuffer>> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        if st.connected_api.is_none() {
            return Err(QueueError::NotConnected);
        }
        if slot >= SLOT_COUNT {
            return Err(QueueError::SlotOutOfRange {
                slot,
                limit: SLOT_COUNT,
            });
        }
        if st.slots[slot].state != SlotState::Dequeued {
            return Err(QueueError::SlotNotDequeued {
                slot,
                state: st.slots[slot].state,
            });
        }
        let buffer = st.slots[slot]
            .graphic_buffer
            .clone()
            .ok_or(QueueError::NoBufferAllocated { slot })?;
        st.slots[slot].request_buffer_called = true;
        Ok(buffer)
    }

    /// Hand a filled slot to the consumer.
    ///
    /// Appends to the FIFO and fires `on_frame_available` (after the lock
    /// is released) — unless the FIFO head is droppable, in which case the
    /// head is replaced in place, its slot returns to free, and no callback
    /// fires.
    pub fn queue_buffer(
        &self,
        slot: usize,
        input: QueueBufferInput,
    ) -> QueueResult<QueueBufferOutput> {
        let scaling_mode = ScalingMode::from_raw(input.scaling_mode)
            .ok_or(QueueError::UnknownScalingMode {
                mode: input.scaling_mode,
            })?;

        let listener;
        let output;
        {
            let mut st = self.core.state.lock();
            if st.abandoned {
                return Err(QueueError::Abandoned);
            }
            if st.connected_api.is_none() {
                return Err(QueueError::NotConnected);
            }

            let async_mode = input.async_mode || st.async_mode;
            let max_buffer_count = st.max_buffer_count(async_mode);
            if slot >= max_buffer_count {
                return Err(QueueError::SlotOutOfRange {
                    slot,
                    limit: max_buffer_count,
                });
            }
            if st.slots[slot].state != SlotState::Dequeued {
                return Err(QueueError::SlotNotDequeued {
                    slot,
                    state: st.slots[slot].state,
                });
            }
            if !st.slots[slot].request_buffer_called {
                return Err(QueueError::BufferNotRequested { slot });
            }

            let buffer = st.slots[slot]
                .graphic_buffer
                .clone()
                .ok_or(QueueError::NoBufferAllocated { slot })?;
            let bounds = Rect::from_size(buffer.width(), buffer.height());
            if input.crop.intersect(&bounds) != input.crop {
                return Err(QueueError::CropOutOfBounds {
                    crop: input.crop,
                    bounds,
                });
            }

            st.frame_counter += 1;
            let frame_number = st.frame_counter;
            st.slots[slot].fence = input.fence.clone();
            st.slots[slot].state = SlotState::Queued;
            st.slots[slot].frame_number = frame_number;

            let item = BufferItem {
                slot,
                graphic_buffer: Some(buffer),
                crop: input.crop,
                transform: input.transform & !TransformFlags::INVERSE_DISPLAY,
                transform_to_display_inverse: input
                    .transform
                    .contains(TransformFlags::INVERSE_DISPLAY),
                scaling_mode,
                timestamp: input.timestamp,
                is_auto_timestamp: input.is_auto_timestamp,
                frame_number,
                fence: input.fence,
                is_droppable: st.cannot_block || async_mode,
                acquire_called: st.slots[slot].acquire_called,
            };

            let front = st
                .queue
                .front()
                .map(|f| (f.is_droppable, f.slot, st.still_tracking(f)));
            match front {
                Some((true, front_slot, tracked)) => {
                    // Replace the droppable head in place; its slot becomes
                    // the next dequeue candidate. No callback for the
                    // dropped frame.
                    if tracked {
                        st.slots[front_slot].state = SlotState::Free;
                        st.slots[front_slot].frame_number = 0;
                    }
                    if let Some(front) = st.queue.front_mut() {
                        *front = item;
                    }
                    listener = None;
                }
                _ => {
                    st.queue.push_back(item);
                    listener = st.consumer_listener.clone();
                }
            }

            st.buffer_has_been_queued = true;
            self.core.dequeue_cond.notify_all();

            output = QueueBufferOutput {
                width: st.default_width,
                height: st.default_height,
                transform_hint: st.transform_hint,
                num_pending_buffers: st.queue.len(),
            };
            trace!(
                slot,
                frame = frame_number,
                pending = st.queue.len(),
                "queue_buffer"
            );
        } // lock released

        if let Some(listener) = listener {
            listener.on_frame_available();
        }
        Ok(output)
    }

    /// Return a dequeued slot without queueing it. The fence is retained on
    /// the slot for the next dequeuer.
    pub fn cancel_buffer(&self, slot: usize, fence: Fence) -> QueueResult<()> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        if st.connected_api.is_none() {
            return Err(QueueError::NotConnected);
        }
        if slot >= SLOT_COUNT {
            return Err(QueueError::SlotOutOfRange {
                slot,
                limit: SLOT_COUNT,
            });
        }
        if st.slots[slot].state != SlotState::Dequeued {
            return Err(QueueError::SlotNotDequeued {
                slot,
                state: st.slots[slot].state,
            });
        }
        st.slots[slot].state = SlotState::Free;
        st.slots[slot].frame_number = 0;
        st.slots[slot].fence = fence;
        self.core.dequeue_cond.notify_all();
        trace!(slot, "cancel_buffer");
        Ok(())
    }

    /// Attach a producer to the queue. Requires a connected consumer and no
    /// other producer API.
    pub fn connect(
        &self,
        api: ProducerApi,
        producer_controlled_by_app: bool,
    ) -> QueueResult<QueueBufferOutput> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        if st.consumer_listener.is_none() {
            return Err(QueueError::NoListener);
        }
        if let Some(connected) = st.connected_api {
            return Err(QueueError::AlreadyConnected { api: connected });
        }
        st.connected_api = Some(api);
        st.buffer_has_been_queued = false;
        st.cannot_block = st.consumer_controlled_by_app && producer_controlled_by_app;
        debug!(name = %st.consumer_name, %api, cannot_block = st.cannot_block, "producer connected");
        Ok(QueueBufferOutput {
            width: st.default_width,
            height: st.default_height,
            transform_hint: st.transform_hint,
            num_pending_buffers: st.queue.len(),
        })
    }

    /// Detach the producer. Frees every slot, clears the FIFO, and fires
    /// `on_buffers_released`.
    pub fn disconnect(&self, api: ProducerApi) -> QueueResult<()> {
        let listener;
        {
            let mut st = self.core.state.lock();
            if st.abandoned {
                return Err(QueueError::Abandoned);
            }
            match st.connected_api {
                Some(connected) if connected == api => {}
                connected => {
                    return Err(QueueError::ApiMismatch {
                        connected,
                        requested: api,
                    });
                }
            }
            st.free_all_buffers();
            st.queue.clear();
            st.connected_api = None;
            self.core.dequeue_cond.notify_all();
            listener = st.consumer_listener.clone();
            debug!(name = %st.consumer_name, %api, "producer disconnected");
        }
        if let Some(listener) = listener {
            listener.on_buffers_released();
        }
        Ok(())
    }

    /// Set (or with 0, clear) the explicit buffer-count override.
    ///
    /// Fails while the producer owns dequeued slots. A non-zero count frees
    /// every slot — the producer holds none — and fires
    /// `on_buffers_released`.
    pub fn set_buffer_count(&self, count: usize) -> QueueResult<()> {
        let listener;
        {
            let mut st = self.core.state.lock();
            if st.abandoned {
                return Err(QueueError::Abandoned);
            }
            if count > SLOT_COUNT {
                return Err(QueueError::BufferCountTooLarge {
                    count,
                    max: SLOT_COUNT,
                });
            }
            if st.slots.iter().any(|s| s.state == SlotState::Dequeued) {
                return Err(QueueError::SlotsOwnedByProducer);
            }
            if count == 0 {
                st.override_max_buffer_count = 0;
                self.core.dequeue_cond.notify_all();
                return Ok(());
            }
            // Async mode may be assumed off: the producer sets the count
            // before it starts queueing.
            let min = st.min_max_buffer_count(false);
            if count < min {
                return Err(QueueError::BufferCountTooSmall { count, min });
            }
            st.free_all_buffers();
            st.queue.clear();
            st.override_max_buffer_count = count;
            self.core.dequeue_cond.notify_all();
            listener = st.consumer_listener.clone();
        }
        if let Some(listener) = listener {
            listener.on_buffers_released();
        }
        Ok(())
    }

    /// Latch async mode for every subsequent operation (OR-ed with the
    /// per-call flag).
    pub fn set_async_mode(&self, enabled: bool) -> QueueResult<()> {
        let mut st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        st.async_mode = enabled;
        Ok(())
    }

    /// Forward a byte-size floor to the allocator for subsequent
    /// allocations.
    pub fn set_buffers_size(&self, bytes: usize) -> QueueResult<()> {
        {
            let st = self.core.state.lock();
            if st.abandoned {
                return Err(QueueError::Abandoned);
            }
        }
        self.core.allocator.set_buffer_size(bytes);
        Ok(())
    }

    /// Read back queue configuration.
    pub fn query(&self, what: QueryWhat) -> QueueResult<u32> {
        let st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        let value = match what {
            QueryWhat::Width => st.default_width,
            QueryWhat::Height => st.default_height,
            QueryWhat::Format => st.default_format.0,
            QueryWhat::MinUndequeuedBuffers => st.min_undequeued_count(false) as u32,
            QueryWhat::ConsumerRunningBehind => (st.queue.len() >= 2) as u32,
            QueryWhat::ConsumerUsageBits => st.consumer_usage.bits(),
        };
        Ok(value)
    }

    /// Record the dirty rectangle of a slot. Advisory: not gated on the
    /// slot's state.
    pub fn update_dirty_region(
        &self,
        slot: usize,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
    ) -> QueueResult<()> {
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
        st.dirty_regions[slot] = Rect::new(left, top, right, bottom);
        Ok(())
    }

    /// Promote a slot's dirty rectangle to the current one and clear the
    /// slot's entry.
    pub fn set_current_dirty_region(&self, slot: usize) -> QueueResult<()> {
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
        st.current_dirty_region = st.dirty_regions[slot];
        if st.current_dirty_region.is_empty() {
            st.current_dirty_region = Rect::EMPTY;
        }
        st.dirty_regions[slot] = Rect::EMPTY;
        Ok(())
    }

    pub fn get_current_dirty_region(&self) -> QueueResult<Rect> {
        let st = self.core.state.lock();
        if st.abandoned {
            return Err(QueueError::Abandoned);
        }
        Ok(st.current_dirty_region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{connected_pair, NullListener};
    use crate::create_pair;
    use kestrel_core::ErrorCode;

    fn input(timestamp: i64, async_mode: bool) -> QueueBufferInput {
        QueueBufferInput {
            timestamp,
            is_auto_timestamp: false,
            crop: Rect::EMPTY,
            scaling_mode: ScalingMode::Freeze.as_raw(),
            transform: TransformFlags::empty(),
            async_mode,
            fence: Fence::NO_FENCE,
        }
    }

    #[test]
    fn test_connect_requires_listener() {
        let (producer, _consumer) = create_pair(None);
        let err = producer.connect(ProducerApi::Cpu, false).unwrap_err();
        assert_eq!(err, QueueError::NoListener);
        assert_eq!(err.code(), ErrorCode::NoInit);
    }

    #[test]
    fn test_duplicate_connect_rejected() {
        let (producer, _consumer) = connected_pair();
        let err = producer.connect(ProducerApi::Egl, false).unwrap_err();
        assert_eq!(
            err,
            QueueError::AlreadyConnected {
                api: ProducerApi::Cpu
            }
        );
    }

    #[test]
    fn test_dequeue_rejects_asymmetric_size() {
        let (producer, _consumer) = connected_pair();
        let err = producer
            .dequeue_buffer(false, 64, 0, PixelFormat::RGBA_8888, BufferUsage::empty())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadValue);
    }

    #[test]
    fn test_dequeue_requires_connect() {
        let (producer, consumer) = create_pair(None);
        consumer
            .consumer_connect(std::sync::Arc::new(NullListener), false)
            .unwrap();
        let err = producer
            .dequeue_buffer(false, 0, 0, PixelFormat::UNSPECIFIED, BufferUsage::empty())
            .unwrap_err();
        assert_eq!(err, QueueError::NotConnected);
    }

    #[test]
    fn test_multiple_dequeue_without_count_rejected() {
        let (producer, _consumer) = connected_pair();
        producer
            .dequeue_buffer(false, 0, 0, PixelFormat::UNSPECIFIED, BufferUsage::empty())
            .unwrap();
        let err = producer
            .dequeue_buffer(false, 0, 0, PixelFormat::UNSPECIFIED, BufferUsage::empty())
            .unwrap_err();
        assert_eq!(err, QueueError::MultipleDequeue { dequeued: 1 });
    }

    #[test]
    fn test_dequeue_reallocates_on_mismatch() {
        let (producer, consumer) = connected_pair();
        let a = producer
            .dequeue_buffer(false, 16, 16, PixelFormat::RGBA_8888, BufferUsage::empty())
            .unwrap();
        assert!(a.flags.contains(DequeueFlags::BUFFER_NEEDS_REALLOCATION));
        let buffer = producer.request_buffer(a.slot).unwrap();
        assert_eq!((buffer.width(), buffer.height()), (16, 16));
        producer.queue_buffer(a.slot, input(1, false)).unwrap();
        let frame = consumer.acquire_buffer(0).unwrap();
        consumer
            .release_buffer(frame.slot, frame.frame_number, Fence::NO_FENCE)
            .unwrap();

        // Same shape after a round trip: no reallocation.
        let b = producer
            .dequeue_buffer(false, 16, 16, PixelFormat::RGBA_8888, BufferUsage::empty())
            .unwrap();
        assert_eq!(b.slot, a.slot);
        assert!(!b.flags.contains(DequeueFlags::BUFFER_NEEDS_REALLOCATION));

        // A different shape forces a fresh buffer.
        producer.cancel_buffer(b.slot, Fence::NO_FENCE).unwrap();
        let c = producer
            .dequeue_buffer(false, 64, 64, PixelFormat::RGBA_8888, BufferUsage::empty())
            .unwrap();
        assert!(c.flags.contains(DequeueFlags::BUFFER_NEEDS_REALLOCATION));
        let reallocated = producer.request_buffer(c.slot).unwrap();
        assert_eq!((reallocated.width(), reallocated.height()), (64, 64));
    }

    #[test]
    fn test_queue_requires_request_buffer() {
        let (producer, _consumer) = connected_pair();
        let d = producer
            .dequeue_buffer(false, 8, 8, PixelFormat::RGBA_8888, BufferUsage::empty())
            .unwrap();
        let err = producer.queue_buffer(d.slot, input(1, false)).unwrap_err();
        assert_eq!(err, QueueError::BufferNotRequested { slot: d.slot });
    }

    #[test]
    fn test_queue_validates_scaling_mode() {
        let (producer, _consumer) = connected_pair();
        let d = producer
            .dequeue_buffer(false, 8, 8, PixelFormat::RGBA_8888, BufferUsage::empty())
            .unwrap();
        producer.request_buffer(d.slot).unwrap();
        let mut bad = input(1, false);
        bad.scaling_mode = 42;
        let err = producer.queue_buffer(d.slot, bad).unwrap_err();
        assert_eq!(err, QueueError::UnknownScalingMode { mode: 42 });
    }

    #[test]
    fn test_queue_validates_crop() {
        let (producer, _consumer) = connected_pair();
        let d = producer
            .dequeue_buffer(false, 8, 8, PixelFormat::RGBA_8888, BufferUsage::empty())
            .unwrap();
        producer.request_buffer(d.slot).unwrap();
        let mut bad = input(1, false);
        bad.crop = Rect::new(0, 0, 9, 9);
        let err = producer.queue_buffer(d.slot, bad).unwrap_err();
        assert!(matches!(err, QueueError::CropOutOfBounds { .. }));
        assert_eq!(err.code(), ErrorCode::BadValue);
    }

    #[test]
    fn test_queue_strips_inverse_display_transform() {
        let (producer, consumer) = connected_pair();
        let d = producer
            .dequeue_buffer(false, 8, 8, PixelFormat::RGBA_8888, BufferUsage::empty())
            .unwrap();
        producer.request_buffer(d.slot).unwrap();
        let mut i = input(1, false);
        i.transform = TransformFlags::ROTATE_90 | TransformFlags::INVERSE_DISPLAY;
        producer.queue_buffer(d.slot, i).unwrap();

        let frame = consumer.acquire_buffer(0).unwrap();
        assert_eq!(frame.transform, TransformFlags::ROTATE_90);
        assert!(frame.transform_to_display_inverse);
    }

    #[test]
    fn test_cancel_returns_slot_to_free() {
        let (producer, consumer) = connected_pair();
        let d = producer
            .dequeue_buffer(false, 8, 8, PixelFormat::RGBA_8888, BufferUsage::empty())
            .unwrap();
        producer.cancel_buffer(d.slot, Fence::NO_FENCE).unwrap();
        let snap = consumer.snapshot();
        assert_eq!(snap.slots[d.slot].state, SlotState::Free);
        assert_eq!(snap.slots[d.slot].frame_number, 0);
        // the buffer stays attached for reuse
        assert!(snap.slots[d.slot].has_buffer);
    }

    #[test]
    fn test_set_buffer_count_bounds() {
        let (producer, _consumer) = connected_pair();
        assert_eq!(
            producer.set_buffer_count(SLOT_COUNT + 1).unwrap_err(),
            QueueError::BufferCountTooLarge {
                count: SLOT_COUNT + 1,
                max: SLOT_COUNT
            }
        );
        assert_eq!(
            producer.set_buffer_count(1).unwrap_err(),
            QueueError::BufferCountTooSmall { count: 1, min: 2 }
        );
        producer.set_buffer_count(4).unwrap();
        producer.set_buffer_count(0).unwrap();
    }

    #[test]
    fn test_set_buffer_count_rejected_while_dequeued() {
        let (producer, _consumer) = connected_pair();
        producer
            .dequeue_buffer(false, 8, 8, PixelFormat::RGBA_8888, BufferUsage::empty())
            .unwrap();
        assert_eq!(
            producer.set_buffer_count(4).unwrap_err(),
            QueueError::SlotsOwnedByProducer
        );
    }

    #[test]
    fn test_shrinking_ceiling_releases_buffers() {
        let (producer, _consumer) = connected_pair();
        producer.set_buffer_count(3).unwrap();
        let mut slots = Vec::new();
        for _ in 0..3 {
            let d = producer
                .dequeue_buffer(false, 8, 8, PixelFormat::RGBA_8888, BufferUsage::empty())
                .unwrap();
            slots.push(d.slot);
        }
        for &slot in &slots {
            producer.cancel_buffer(slot, Fence::NO_FENCE).unwrap();
        }
        // Clearing the override shrinks the ceiling to the default of 2;
        // the buffer parked in slot 2 must be freed on the next dequeue.
        producer.set_buffer_count(0).unwrap();
        let d = producer
            .dequeue_buffer(false, 8, 8, PixelFormat::RGBA_8888, BufferUsage::empty())
            .unwrap();
        assert!(d.flags.contains(DequeueFlags::RELEASE_ALL_BUFFERS));
    }

    #[test]
    fn test_query_defaults() {
        let (producer, _consumer) = connected_pair();
        assert_eq!(producer.query(QueryWhat::Width).unwrap(), 1);
        assert_eq!(producer.query(QueryWhat::Height).unwrap(), 1);
        assert_eq!(
            producer.query(QueryWhat::Format).unwrap(),
            PixelFormat::RGBA_8888.0
        );
        assert_eq!(producer.query(QueryWhat::MinUndequeuedBuffers).unwrap(), 1);
        assert_eq!(
            producer.query(QueryWhat::ConsumerRunningBehind).unwrap(),
            0
        );
    }

    #[test]
    fn test_query_running_behind() {
        let (producer, _consumer) = connected_pair();
        producer.set_buffer_count(4).unwrap();
        for ts in 1..=2 {
            let d = producer
                .dequeue_buffer(false, 8, 8, PixelFormat::RGBA_8888, BufferUsage::empty())
                .unwrap();
            producer.request_buffer(d.slot).unwrap();
            producer.queue_buffer(d.slot, input(ts, false)).unwrap();
        }
        assert_eq!(producer.query(QueryWhat::ConsumerRunningBehind).unwrap(), 1);
    }

    #[test]
    fn test_dirty_region_roundtrip() {
        let (producer, _consumer) = connected_pair();
        producer.update_dirty_region(2, 1, 1, 5, 5).unwrap();
        producer.set_current_dirty_region(2).unwrap();
        assert_eq!(
            producer.get_current_dirty_region().unwrap(),
            Rect::new(1, 1, 5, 5)
        );
        // the slot's entry was consumed
        producer.set_current_dirty_region(2).unwrap();
        assert_eq!(producer.get_current_dirty_region().unwrap(), Rect::EMPTY);
    }

    #[test]
    fn test_queue_reports_pending_count() {
        let (producer, _consumer) = connected_pair();
        let d = producer
            .dequeue_buffer(false, 8, 8, PixelFormat::RGBA_8888, BufferUsage::empty())
            .unwrap();
        producer.request_buffer(d.slot).unwrap();
        let out = producer.queue_buffer(d.slot, input(100, false)).unwrap();
        assert_eq!(out.num_pending_buffers, 1);
        assert_eq!((out.width, out.height), (1, 1));
    }
}
