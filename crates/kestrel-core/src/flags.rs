//! Flag and enum vocabulary shared by the producer and consumer surfaces.
//!
//! Everything here is wire-stable: the integer enums keep fixed
//! discriminants and decode via `from_raw`, the bitfields are `bitflags`
//! types that tolerate unknown bits.

use bitflags::bitflags;

bitflags! {
    /// Usage bits describing how a graphic buffer will be accessed.
    ///
    /// The producer's requested usage is OR-ed with the consumer usage bits
    /// before allocation, so a buffer always satisfies both sides.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        const CPU_READ          = 1 << 0;
        const CPU_WRITE         = 1 << 1;
        const GPU_TEXTURE       = 1 << 2;
        const GPU_RENDER_TARGET = 1 << 3;
        const COMPOSER_OVERLAY  = 1 << 4;
        const PROTECTED         = 1 << 5;
    }
}

bitflags! {
    /// Per-frame transform applied by the consumer when displaying.
    ///
    /// `INVERSE_DISPLAY` is a request to undo the display transform; queueing
    /// strips it from the stored transform and records it as a separate
    /// boolean on the item.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct TransformFlags: u32 {
        const FLIP_HORIZONTAL = 1 << 0;
        const FLIP_VERTICAL   = 1 << 1;
        const ROTATE_90       = 1 << 2;
        const INVERSE_DISPLAY = 1 << 3;
    }
}

bitflags! {
    /// Result bits returned alongside a successful dequeue.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DequeueFlags: u32 {
        /// The slot's backing buffer was (re)allocated; the producer must
        /// fetch the new handle with `request_buffer` before queueing.
        const BUFFER_NEEDS_REALLOCATION = 0x1;
        /// Buffers above the current ceiling were freed; the producer should
        /// drop any cached handles.
        const RELEASE_ALL_BUFFERS = 0x2;
    }
}

/// How the consumer should scale a queued buffer to its window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ScalingMode {
    Freeze = 0,
    ScaleToWindow = 1,
    ScaleCrop = 2,
    NoScaleCrop = 3,
}

impl ScalingMode {
    pub fn from_raw(raw: u32) -> Option<ScalingMode> {
        match raw {
            0 => Some(ScalingMode::Freeze),
            1 => Some(ScalingMode::ScaleToWindow),
            2 => Some(ScalingMode::ScaleCrop),
            3 => Some(ScalingMode::NoScaleCrop),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

/// Codes accepted by `Producer::query`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum QueryWhat {
    Width = 0,
    Height = 1,
    Format = 2,
    MinUndequeuedBuffers = 3,
    ConsumerRunningBehind = 4,
    ConsumerUsageBits = 5,
}

impl QueryWhat {
    pub fn from_raw(raw: u32) -> Option<QueryWhat> {
        match raw {
            0 => Some(QueryWhat::Width),
            1 => Some(QueryWhat::Height),
            2 => Some(QueryWhat::Format),
            3 => Some(QueryWhat::MinUndequeuedBuffers),
            4 => Some(QueryWhat::ConsumerRunningBehind),
            5 => Some(QueryWhat::ConsumerUsageBits),
            _ => None,
        }
    }
}

/// The kind of producer attached to the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ProducerApi {
    Egl = 1,
    Cpu = 2,
    Media = 3,
    Camera = 4,
}

impl ProducerApi {
    pub fn from_raw(raw: u32) -> Option<ProducerApi> {
        match raw {
            1 => Some(ProducerApi::Egl),
            2 => Some(ProducerApi::Cpu),
            3 => Some(ProducerApi::Media),
            4 => Some(ProducerApi::Camera),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProducerApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProducerApi::Egl => "egl",
            ProducerApi::Cpu => "cpu",
            ProducerApi::Media => "media",
            ProducerApi::Camera => "camera",
        };
        f.write_str(name)
    }
}

/// Ownership state of a buffer slot.
///
/// ```text
/// Free --dequeue--> Dequeued --queue--> Queued --acquire--> Acquired
///   ^                  |                   |                    |
///   +------cancel------+------drop--------+------release-------+
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotState {
    #[default]
    Free,
    Dequeued,
    Queued,
    Acquired,
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SlotState::Free => "FREE",
            SlotState::Dequeued => "DEQUEUED",
            SlotState::Queued => "QUEUED",
            SlotState::Acquired => "ACQUIRED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling_mode_raw_roundtrip() {
        for raw in 0..4 {
            let mode = ScalingMode::from_raw(raw).unwrap();
            assert_eq!(mode.as_raw(), raw);
        }
        assert_eq!(ScalingMode::from_raw(4), None);
    }

    #[test]
    fn test_query_what_rejects_unknown() {
        assert_eq!(QueryWhat::from_raw(5), Some(QueryWhat::ConsumerUsageBits));
        assert_eq!(QueryWhat::from_raw(6), None);
    }

    #[test]
    fn test_producer_api_zero_is_not_connected() {
        // 0 is reserved for "no API connected" and must not decode.
        assert_eq!(ProducerApi::from_raw(0), None);
        assert_eq!(ProducerApi::from_raw(4), Some(ProducerApi::Camera));
    }

    #[test]
    fn test_transform_unknown_bits_are_retained() {
        let t = TransformFlags::from_bits_retain(0x8f);
        assert!(t.contains(TransformFlags::INVERSE_DISPLAY));
        assert_eq!(t.bits(), 0x8f);
    }
}
