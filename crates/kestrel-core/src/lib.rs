//! kestrel-core: vocabulary types for the kestrel buffer queue.
//!
//! This crate defines everything the producer and consumer surfaces speak
//! in, without the queue itself:
//!
//! - [`GraphicBuffer`] and the [`BufferAllocator`] seam
//! - [`Fence`] handles and the [`SyncFence`] primitive trait
//! - [`Rect`] geometry
//! - flag and enum vocabulary ([`BufferUsage`], [`TransformFlags`],
//!   [`ScalingMode`], [`SlotState`], ...)
//! - [`QueueError`] / [`ErrorCode`]
//! - the [`ConsumerListener`] callback trait and its weak [`ProxyListener`]
//!
//! The queue machinery lives in `kestrel-queue`.

#![forbid(unsafe_code)]

mod buffer;
mod error;
mod fence;
mod flags;
mod geometry;
mod listener;

pub use buffer::{AllocatorError, BufferAllocator, GraphicBuffer, HeapAllocator, PixelFormat};
pub use error::{ErrorCode, QueueError, QueueResult};
pub use fence::{Fence, FenceStatus, SoftFence, SyncFence};
pub use flags::{
    BufferUsage, DequeueFlags, ProducerApi, QueryWhat, ScalingMode, SlotState, TransformFlags,
};
pub use geometry::Rect;
pub use listener::{ConsumerListener, ProxyListener};
