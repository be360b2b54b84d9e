//! Queue errors.
//!
//! [`QueueError`] carries the specifics of a failure (which slot, which
//! limit, which state); [`ErrorCode`] is the stable classification that
//! remote callers and tests match on. Every variant maps onto exactly one
//! code via [`QueueError::code`].

use crate::buffer::AllocatorError;
use crate::flags::{ProducerApi, SlotState};
use crate::geometry::Rect;

/// Stable error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// The queue is abandoned, or the producer side is not connected.
    NoInit,
    /// An argument was out of range.
    BadValue,
    /// The operation is not legal in the current state.
    InvalidOperation,
    /// The operation would have blocked.
    WouldBlock,
    /// A release referred to a slot that has moved on.
    StaleBufferSlot,
    /// The allocator refused to manufacture a buffer.
    NoMemory,
    /// The head frame is not due yet.
    PresentLater,
}

/// A queue operation failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has been abandoned by its consumer.
    Abandoned,
    /// No producer API is connected.
    NotConnected,
    /// No consumer listener is registered.
    NoListener,
    /// A producer API is already connected.
    AlreadyConnected { api: ProducerApi },
    /// The consumer side is already connected.
    ConsumerAlreadyConnected,
    /// Disconnect named an API other than the connected one.
    ApiMismatch {
        connected: Option<ProducerApi>,
        requested: ProducerApi,
    },
    /// Slot index outside `[0, limit)`.
    SlotOutOfRange { slot: usize, limit: usize },
    /// Exactly one of width/height was zero.
    InvalidDimensions { width: u32, height: u32 },
    /// Requested buffer count above the slot-table size.
    BufferCountTooLarge { count: usize, max: usize },
    /// Requested buffer count below the current minimum.
    BufferCountTooSmall { count: usize, min: usize },
    /// The producer still owns dequeued slots.
    SlotsOwnedByProducer,
    /// The scaling mode did not decode.
    UnknownScalingMode { mode: u32 },
    /// The crop rectangle is not contained in the buffer bounds.
    CropOutOfBounds { crop: Rect, bounds: Rect },
    /// The slot is not in the `Dequeued` state.
    SlotNotDequeued { slot: usize, state: SlotState },
    /// The slot was queued without fetching its buffer via `request_buffer`.
    BufferNotRequested { slot: usize },
    /// The slot has no backing buffer attached.
    NoBufferAllocated { slot: usize },
    /// The slot is not in the `Acquired` state.
    SlotNotAcquired { slot: usize, state: SlotState },
    /// The consumer already holds the maximum number of acquired buffers.
    MaxAcquiredExceeded { max: usize },
    /// A second dequeue without an explicit buffer count.
    MultipleDequeue { dequeued: usize },
    /// Granting the dequeue would leave the consumer too few buffers.
    MinUndequeuedExceeded {
        min_undequeued: usize,
        dequeued: usize,
    },
    /// The dequeue would have blocked and the queue is in cannot-block mode.
    WouldBlock,
    /// Nothing is queued for acquisition.
    NoBufferAvailable,
    /// The released frame no longer matches the slot.
    StaleRelease { slot: usize, frame_number: u64 },
    /// The allocator failed.
    Allocation(AllocatorError),
    /// The head frame's timestamp is still in the future.
    PresentLater { timestamp: i64, present_when: i64 },
}

impl QueueError {
    /// The stable classification of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            QueueError::Abandoned | QueueError::NotConnected | QueueError::NoListener => {
                ErrorCode::NoInit
            }
            QueueError::AlreadyConnected { .. }
            | QueueError::ConsumerAlreadyConnected
            | QueueError::ApiMismatch { .. }
            | QueueError::SlotsOwnedByProducer
            | QueueError::SlotNotDequeued { .. }
            | QueueError::BufferNotRequested { .. }
            | QueueError::NoBufferAllocated { .. }
            | QueueError::SlotNotAcquired { .. }
            | QueueError::MaxAcquiredExceeded { .. }
            | QueueError::MultipleDequeue { .. }
            | QueueError::MinUndequeuedExceeded { .. } => ErrorCode::InvalidOperation,
            QueueError::SlotOutOfRange { .. }
            | QueueError::InvalidDimensions { .. }
            | QueueError::BufferCountTooLarge { .. }
            | QueueError::BufferCountTooSmall { .. }
            | QueueError::UnknownScalingMode { .. }
            | QueueError::CropOutOfBounds { .. } => ErrorCode::BadValue,
            QueueError::WouldBlock | QueueError::NoBufferAvailable => ErrorCode::WouldBlock,
            QueueError::StaleRelease { .. } => ErrorCode::StaleBufferSlot,
            QueueError::Allocation(_) => ErrorCode::NoMemory,
            QueueError::PresentLater { .. } => ErrorCode::PresentLater,
        }
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Abandoned => write!(f, "buffer queue has been abandoned"),
            QueueError::NotConnected => write!(f, "no producer API connected"),
            QueueError::NoListener => write!(f, "no consumer listener registered"),
            QueueError::AlreadyConnected { api } => {
                write!(f, "producer API already connected ({api})")
            }
            QueueError::ConsumerAlreadyConnected => {
                write!(f, "consumer side already connected")
            }
            QueueError::ApiMismatch {
                connected,
                requested,
            } => match connected {
                Some(api) => write!(f, "disconnect of {requested} but {api} is connected"),
                None => write!(f, "disconnect of {requested} but nothing is connected"),
            },
            QueueError::SlotOutOfRange { slot, limit } => {
                write!(f, "slot index {slot} out of range [0, {limit})")
            }
            QueueError::InvalidDimensions { width, height } => {
                write!(f, "invalid dimensions {width}x{height}")
            }
            QueueError::BufferCountTooLarge { count, max } => {
                write!(f, "buffer count {count} above maximum {max}")
            }
            QueueError::BufferCountTooSmall { count, min } => {
                write!(f, "buffer count {count} below minimum {min}")
            }
            QueueError::SlotsOwnedByProducer => {
                write!(f, "producer still owns dequeued buffers")
            }
            QueueError::UnknownScalingMode { mode } => {
                write!(f, "unknown scaling mode {mode}")
            }
            QueueError::CropOutOfBounds { crop, bounds } => {
                write!(f, "crop {crop} not contained in buffer bounds {bounds}")
            }
            QueueError::SlotNotDequeued { slot, state } => {
                write!(f, "slot {slot} is not dequeued (state {state})")
            }
            QueueError::BufferNotRequested { slot } => {
                write!(f, "slot {slot} queued without requesting its buffer")
            }
            QueueError::NoBufferAllocated { slot } => {
                write!(f, "slot {slot} has no backing buffer")
            }
            QueueError::SlotNotAcquired { slot, state } => {
                write!(f, "slot {slot} is not acquired (state {state})")
            }
            QueueError::MaxAcquiredExceeded { max } => {
                write!(f, "consumer already holds {max} acquired buffers")
            }
            QueueError::MultipleDequeue { dequeued } => {
                write!(
                    f,
                    "cannot dequeue multiple buffers ({dequeued} outstanding) without an explicit buffer count"
                )
            }
            QueueError::MinUndequeuedExceeded {
                min_undequeued,
                dequeued,
            } => {
                write!(
                    f,
                    "dequeue would exceed limit (minimum undequeued {min_undequeued}, dequeued {dequeued})"
                )
            }
            QueueError::WouldBlock => write!(f, "dequeue would block"),
            QueueError::NoBufferAvailable => write!(f, "no buffer is available for acquisition"),
            QueueError::StaleRelease { slot, frame_number } => {
                write!(f, "stale release of slot {slot} (frame {frame_number})")
            }
            QueueError::Allocation(e) => write!(f, "buffer allocation failed: {e}"),
            QueueError::PresentLater {
                timestamp,
                present_when,
            } => {
                write!(
                    f,
                    "head frame (timestamp {timestamp}) is not due at {present_when}"
                )
            }
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueError::Allocation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AllocatorError> for QueueError {
    fn from(e: AllocatorError) -> Self {
        QueueError::Allocation(e)
    }
}

/// Convenience alias used across the queue crates.
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(QueueError::Abandoned.code(), ErrorCode::NoInit);
        assert_eq!(
            QueueError::SlotOutOfRange { slot: 40, limit: 32 }.code(),
            ErrorCode::BadValue
        );
        assert_eq!(
            QueueError::StaleRelease {
                slot: 0,
                frame_number: 1
            }
            .code(),
            ErrorCode::StaleBufferSlot
        );
        assert_eq!(QueueError::WouldBlock.code(), ErrorCode::WouldBlock);
        assert_eq!(
            QueueError::Allocation(AllocatorError::OutOfMemory { requested: 16 }).code(),
            ErrorCode::NoMemory
        );
        assert_eq!(
            QueueError::PresentLater {
                timestamp: 10,
                present_when: 5
            }
            .code(),
            ErrorCode::PresentLater
        );
    }
}
