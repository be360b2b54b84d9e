//! kestrel-queue: a bounded producer/consumer exchange of graphic buffers.
//!
//! A fixed table of [`SLOT_COUNT`] slots mediates ownership of
//! reference-counted image buffers between one producer (a renderer or
//! decoder) and one consumer (a compositor or uploader). Slots move through
//! a four-state machine under a single lock; queued frames travel through a
//! FIFO that can replace its head in place when the producer runs ahead of
//! the consumer.
//!
//! ```text
//!  Producer                    Core                        Consumer
//!  ────────                    ────                        ────────
//!  dequeue_buffer ──────▶ ┌──────────────┐
//!  request_buffer         │  slot table   │
//!  (fill pixels)          │ FREE/DEQUEUED │
//!  queue_buffer ────────▶ │ QUEUED/ACQ'D  │ ◀────── acquire_buffer
//!  cancel_buffer          ├──────────────┤          release_buffer
//!                         │  frame FIFO   │ ───────▶ on_frame_available
//!                         └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use kestrel_core::{BufferUsage, ConsumerListener, Fence, PixelFormat, ProducerApi, Rect};
//! use kestrel_queue::{create_pair, QueueBufferInput};
//!
//! struct Listener;
//! impl ConsumerListener for Listener {
//!     fn on_frame_available(&self) {}
//! }
//!
//! let (producer, consumer) = create_pair(None);
//! // held weakly by the queue; keep the Arc alive for callbacks
//! let listener = Arc::new(Listener);
//! consumer.consumer_connect(listener.clone(), false).unwrap();
//! producer.connect(ProducerApi::Cpu, false).unwrap();
//!
//! let slot = producer
//!     .dequeue_buffer(false, 64, 64, PixelFormat::RGBA_8888, BufferUsage::CPU_WRITE)
//!     .unwrap();
//! let buffer = producer.request_buffer(slot.slot).unwrap();
//! buffer.with_bytes_mut(|px| px.fill(0xff));
//! producer
//!     .queue_buffer(slot.slot, QueueBufferInput {
//!         timestamp: 0,
//!         is_auto_timestamp: true,
//!         crop: Rect::EMPTY,
//!         scaling_mode: 0,
//!         transform: Default::default(),
//!         async_mode: false,
//!         fence: Fence::NO_FENCE,
//!     })
//!     .unwrap();
//!
//! let frame = consumer.acquire_buffer(0).unwrap();
//! consumer
//!     .release_buffer(frame.slot, frame.frame_number, Fence::NO_FENCE)
//!     .unwrap();
//! ```

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use kestrel_core::{BufferAllocator, HeapAllocator};

mod core;
mod consumer;
mod producer;
mod slot;

pub use crate::core::{CoreSnapshot, QueuedItemSnapshot, SlotSnapshot};
pub use consumer::Consumer;
pub use producer::{DequeuedBuffer, Producer, QueueBufferInput, QueueBufferOutput};
pub use slot::BufferItem;

/// Number of slots in the table. Buffer counts and slot indices are bounded
/// by this.
pub const SLOT_COUNT: usize = 32;

/// Bound on the wait for a consumer release fence during dequeue. Timeouts
/// are logged, not propagated.
pub const FENCE_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Build a queue and return its two endpoints.
///
/// `allocator` supplies backing buffers; `None` selects the heap allocator.
pub fn create_pair(allocator: Option<Arc<dyn BufferAllocator>>) -> (Producer, Consumer) {
    let allocator = allocator.unwrap_or_else(|| Arc::new(HeapAllocator::new()));
    let core = core::QueueCore::new(allocator);
    (
        Producer { core: core.clone() },
        Consumer { core },
    )
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::Arc;

    use kestrel_core::{ConsumerListener, ProducerApi};

    use crate::{create_pair, Consumer, Producer};

    pub struct NullListener;

    impl ConsumerListener for NullListener {
        fn on_frame_available(&self) {}
    }

    /// A queue with both sides connected (CPU producer, default config).
    pub fn connected_pair() -> (Producer, Consumer) {
        let (producer, consumer) = create_pair(None);
        consumer
            .consumer_connect(Arc::new(NullListener), false)
            .unwrap();
        producer.connect(ProducerApi::Cpu, false).unwrap();
        (producer, consumer)
    }
}
