//! Slot records and queued items.

use std::sync::Arc;

use kestrel_core::{Fence, GraphicBuffer, Rect, ScalingMode, SlotState, TransformFlags};

/// One entry of the fixed slot table.
///
/// A slot owns at most one backing buffer and is always in exactly one
/// [`SlotState`]. Fences travel through the slot in both directions: `fence`
/// is the producer's write fence handed to the consumer at queue time,
/// `release_fence` is the consumer's read fence handed back to the next
/// dequeuer.
#[derive(Default)]
pub(crate) struct BufferSlot {
    pub state: SlotState,
    pub graphic_buffer: Option<Arc<GraphicBuffer>>,
    /// Set once the producer has fetched the backing handle after a
    /// (re)allocation.
    pub request_buffer_called: bool,
    /// Set once the consumer has ever received this slot's handle, so the
    /// handle can be elided from later acquisitions.
    pub acquire_called: bool,
    /// The slot was freed while the consumer held it acquired; the
    /// consumer's eventual release is stale but expected.
    pub needs_cleanup_on_release: bool,
    /// Frame number assigned at queue time; 0 on a freshly freed slot so it
    /// is the first dequeue candidate.
    pub frame_number: u64,
    pub fence: Fence,
    pub release_fence: Fence,
}

/// A queued frame, in queue order.
#[derive(Clone, Debug)]
pub struct BufferItem {
    /// Slot this frame occupies.
    pub slot: usize,
    /// Snapshot of the slot's buffer handle. `None` when returned from an
    /// acquisition of a slot the consumer has already seen.
    pub graphic_buffer: Option<Arc<GraphicBuffer>>,
    pub crop: Rect,
    /// Transform with the inverse-display bit stripped.
    pub transform: TransformFlags,
    /// The stripped inverse-display request.
    pub transform_to_display_inverse: bool,
    pub scaling_mode: ScalingMode,
    /// Presentation timestamp in nanoseconds.
    pub timestamp: i64,
    /// The timestamp was generated by the queue, not supplied by the
    /// producer.
    pub is_auto_timestamp: bool,
    pub frame_number: u64,
    /// Producer write fence; wait on it before reading the buffer.
    pub fence: Fence,
    /// The producer consents to this frame being replaced in place by a
    /// newer one before acquisition.
    pub is_droppable: bool,
    /// The consumer has received this slot's handle before.
    pub acquire_called: bool,
}
