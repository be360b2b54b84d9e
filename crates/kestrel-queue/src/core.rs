//! Shared core state: slot table, FIFO, configuration, and the lock.
//!
//! A single mutex serializes every mutation and read; one condvar
//! (`dequeue_cond`) wakes blocked dequeuers. The operations are short and
//! the state interleaves heavily (queue length, slot states and counters
//! mutate together), so finer-grained locking would buy nothing. Consumer
//! listeners must never be invoked while the lock is held.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use kestrel_core::{
    BufferAllocator, BufferUsage, ConsumerListener, Fence, PixelFormat, ProducerApi, Rect,
    SlotState, TransformFlags,
};

use crate::slot::{BufferItem, BufferSlot};
use crate::SLOT_COUNT;

static NEXT_QUEUE_ID: AtomicU32 = AtomicU32::new(0);

pub(crate) struct QueueCore {
    pub state: Mutex<CoreState>,
    pub dequeue_cond: Condvar,
    pub allocator: Arc<dyn BufferAllocator>,
}

impl QueueCore {
    pub fn new(allocator: Arc<dyn BufferAllocator>) -> Arc<QueueCore> {
        Arc::new(QueueCore {
            state: Mutex::new(CoreState::new()),
            dequeue_cond: Condvar::new(),
            allocator,
        })
    }
}

pub(crate) struct CoreState {
    pub slots: [BufferSlot; SLOT_COUNT],
    pub queue: VecDeque<BufferItem>,

    pub default_width: u32,
    pub default_height: u32,
    pub default_format: PixelFormat,
    pub consumer_usage: BufferUsage,
    pub transform_hint: TransformFlags,
    pub consumer_name: String,
    pub default_max_buffer_count: usize,
    /// Explicit producer cap; 0 means unset.
    pub override_max_buffer_count: usize,
    pub max_acquired_buffer_count: usize,
    /// Whether the queue reserves an extra buffer for async producers.
    pub use_async_buffer: bool,
    /// Producer-side async latch; OR-ed with each operation's async flag.
    pub async_mode: bool,
    /// Producer and consumer live in the same application; dequeue fails
    /// with `WouldBlock` instead of waiting.
    pub cannot_block: bool,
    pub consumer_controlled_by_app: bool,
    pub connected_api: Option<ProducerApi>,
    pub abandoned: bool,
    /// Latch gating the minimum-undequeued check: a single dequeue is
    /// always permitted before the first queue.
    pub buffer_has_been_queued: bool,
    pub frame_counter: u64,
    /// Weak proxy installed by `consumer_connect`; each callback upgrades
    /// and silently skips a consumer that is already gone.
    pub consumer_listener: Option<Arc<dyn ConsumerListener>>,

    pub dirty_regions: [Rect; SLOT_COUNT],
    pub current_dirty_region: Rect,
}

impl CoreState {
    fn new() -> Self {
        let queue_id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            slots: std::array::from_fn(|_| BufferSlot::default()),
            queue: VecDeque::new(),
            default_width: 1,
            default_height: 1,
            default_format: PixelFormat::RGBA_8888,
            consumer_usage: BufferUsage::empty(),
            transform_hint: TransformFlags::empty(),
            consumer_name: format!("unnamed-{}-{}", std::process::id(), queue_id),
            default_max_buffer_count: 2,
            override_max_buffer_count: 0,
            max_acquired_buffer_count: 1,
            use_async_buffer: true,
            async_mode: false,
            cannot_block: false,
            consumer_controlled_by_app: false,
            connected_api: None,
            abandoned: false,
            buffer_has_been_queued: false,
            frame_counter: 0,
            consumer_listener: None,
            dirty_regions: [Rect::EMPTY; SLOT_COUNT],
            current_dirty_region: Rect::EMPTY,
        }
    }

    /// Floor on the slots the producer must leave to the consumer.
    pub fn min_undequeued_count(&self, async_mode: bool) -> usize {
        if self.use_async_buffer {
            if async_mode {
                2
            } else {
                1
            }
        } else if async_mode {
            2
        } else {
            0
        }
    }

    /// Smallest legal buffer count for the given async mode.
    pub fn min_max_buffer_count(&self, async_mode: bool) -> usize {
        self.min_undequeued_count(async_mode) + 1
    }

    /// Effective ceiling on usable slots, recomputed per operation.
    pub fn max_buffer_count(&self, async_mode: bool) -> usize {
        let count = if self.override_max_buffer_count != 0 {
            self.override_max_buffer_count
        } else {
            self.min_max_buffer_count(async_mode)
                .max(self.default_max_buffer_count)
        };
        count.min(SLOT_COUNT)
    }

    /// Return a slot to `Free` and drop its buffer reference.
    ///
    /// A slot freed out from under an acquisition is flagged so the
    /// consumer's eventual release is answered with a stale-slot error
    /// rather than an invalid-operation one.
    pub fn free_buffer(&mut self, slot: usize) {
        let s = &mut self.slots[slot];
        s.graphic_buffer = None;
        if s.state == SlotState::Acquired {
            s.needs_cleanup_on_release = true;
        }
        s.state = SlotState::Free;
        s.frame_number = 0;
        s.acquire_called = false;
        s.fence = Fence::NO_FENCE;
        s.release_fence = Fence::NO_FENCE;
    }

    /// Free every slot and reset the first-queue latch. The caller is
    /// responsible for clearing the FIFO alongside (every queued item must
    /// refer to a queued slot).
    pub fn free_all_buffers(&mut self) {
        self.buffer_has_been_queued = false;
        for slot in 0..SLOT_COUNT {
            self.free_buffer(slot);
        }
    }

    /// Whether a queued item still refers to the buffer its slot holds.
    pub fn still_tracking(&self, item: &BufferItem) -> bool {
        match (&item.graphic_buffer, &self.slots[item.slot].graphic_buffer) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        CoreSnapshot {
            slots: self
                .slots
                .iter()
                .map(|s| SlotSnapshot {
                    state: s.state,
                    frame_number: s.frame_number,
                    has_buffer: s.graphic_buffer.is_some(),
                    request_buffer_called: s.request_buffer_called,
                    acquire_called: s.acquire_called,
                })
                .collect(),
            queue: self
                .queue
                .iter()
                .map(|i| QueuedItemSnapshot {
                    slot: i.slot,
                    frame_number: i.frame_number,
                    timestamp: i.timestamp,
                    is_droppable: i.is_droppable,
                })
                .collect(),
            abandoned: self.abandoned,
            connected_api: self.connected_api,
            override_max_buffer_count: self.override_max_buffer_count,
            frame_counter: self.frame_counter,
            buffer_has_been_queued: self.buffer_has_been_queued,
        }
    }
}

/// Point-in-time view of the core, for diagnostics and tests.
#[derive(Clone, Debug)]
pub struct CoreSnapshot {
    pub slots: Vec<SlotSnapshot>,
    pub queue: Vec<QueuedItemSnapshot>,
    pub abandoned: bool,
    pub connected_api: Option<ProducerApi>,
    pub override_max_buffer_count: usize,
    pub frame_counter: u64,
    pub buffer_has_been_queued: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct SlotSnapshot {
    pub state: SlotState,
    pub frame_number: u64,
    pub has_buffer: bool,
    pub request_buffer_called: bool,
    pub acquire_called: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct QueuedItemSnapshot {
    pub slot: usize,
    pub frame_number: u64,
    pub timestamp: i64,
    pub is_droppable: bool,
}
