//! kestrel: a bounded producer/consumer exchange of graphic buffers.
//!
//! # Quick Start
//!
//! Build a queue, connect both sides, and move frames through it:
//!
//! ```
//! use std::sync::Arc;
//! use kestrel::prelude::*;
//!
//! struct Compositor;
//!
//! impl ConsumerListener for Compositor {
//!     fn on_frame_available(&self) {
//!         // kick the render loop
//!     }
//! }
//!
//! let (producer, consumer) = kestrel::create_pair(None);
//! // The queue holds the listener weakly: keep this Arc alive for as
//! // long as callbacks should be delivered.
//! let compositor = Arc::new(Compositor);
//! consumer.consumer_connect(compositor.clone(), false).unwrap();
//! producer.connect(ProducerApi::Cpu, false).unwrap();
//!
//! let dequeued = producer
//!     .dequeue_buffer(false, 320, 240, PixelFormat::RGBA_8888, BufferUsage::CPU_WRITE)
//!     .unwrap();
//! let buffer = producer.request_buffer(dequeued.slot).unwrap();
//! buffer.with_bytes_mut(|px| px.fill(0));
//! producer
//!     .queue_buffer(dequeued.slot, QueueBufferInput {
//!         timestamp: 16_000_000,
//!         is_auto_timestamp: false,
//!         crop: Rect::from_size(320, 240),
//!         scaling_mode: ScalingMode::Freeze.as_raw(),
//!         transform: TransformFlags::empty(),
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
//!
//! # Ownership protocol
//!
//! Slots move `Free → Dequeued → Queued → Acquired → Free`. The producer
//! may opt into async mode, where queueing a frame while an unacquired one
//! sits at the FIFO head replaces that head in place instead of growing the
//! queue. Buffer counts, formats, and usage bits are negotiated through the
//! consumer-side setters and the producer-side `set_buffer_count` override.
//!
//! # Error Handling
//!
//! Operations return [`QueueError`]; remote callers match on the stable
//! [`ErrorCode`] classification:
//!
//! ```
//! use kestrel::prelude::*;
//!
//! let (producer, _consumer) = kestrel::create_pair(None);
//! match producer.connect(ProducerApi::Cpu, false) {
//!     Err(e) if e.code() == ErrorCode::NoInit => {
//!         // no consumer yet
//!     }
//!     other => panic!("expected NoInit, got {other:?}"),
//! }
//! ```

#![forbid(unsafe_code)]

pub use kestrel_core::{
    // errors
    AllocatorError,
    // allocator seam
    BufferAllocator,
    BufferUsage,
    ConsumerListener,
    DequeueFlags,
    ErrorCode,
    // fences
    Fence,
    FenceStatus,
    GraphicBuffer,
    HeapAllocator,
    PixelFormat,
    ProducerApi,
    ProxyListener,
    QueryWhat,
    QueueError,
    QueueResult,
    Rect,
    ScalingMode,
    SlotState,
    SoftFence,
    SyncFence,
    TransformFlags,
};

pub use kestrel_queue::{
    create_pair, BufferItem, Consumer, CoreSnapshot, DequeuedBuffer, Producer, QueueBufferInput,
    QueueBufferOutput, QueuedItemSnapshot, SlotSnapshot, FENCE_WAIT_TIMEOUT, SLOT_COUNT,
};

/// Prelude module for convenient imports.
///
/// ```
/// use kestrel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        create_pair, BufferItem, BufferUsage, Consumer, ConsumerListener, ErrorCode, Fence,
        PixelFormat, Producer, ProducerApi, QueueBufferInput, QueueError, Rect, ScalingMode,
        TransformFlags,
    };
}
