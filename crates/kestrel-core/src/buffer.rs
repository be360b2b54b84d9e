//! Graphic buffers and the allocator seam.
//!
//! A [`GraphicBuffer`] is a reference-counted image allocation shared by the
//! producer, the consumer, and any in-flight queue items; its lifetime is
//! that of the longest holder. Allocation goes through the
//! [`BufferAllocator`] trait so platforms can plug in their own storage;
//! [`HeapAllocator`] is the default and backs buffers with plain heap
//! memory.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::flags::BufferUsage;

/// Pixel format of a graphic buffer. `PixelFormat(0)` is the "unspecified"
/// sentinel: a dequeue requesting it receives the queue's default format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    pub const UNSPECIFIED: PixelFormat = PixelFormat(0);
    pub const RGBA_8888: PixelFormat = PixelFormat(1);
    pub const RGBX_8888: PixelFormat = PixelFormat(2);
    pub const RGB_565: PixelFormat = PixelFormat(4);

    pub fn is_unspecified(self) -> bool {
        self.0 == 0
    }

    /// Bytes per pixel used to size backing storage.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::RGB_565 => 2,
            _ => 4,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            PixelFormat::UNSPECIFIED => f.write_str("unspecified"),
            PixelFormat::RGBA_8888 => f.write_str("RGBA_8888"),
            PixelFormat::RGBX_8888 => f.write_str("RGBX_8888"),
            PixelFormat::RGB_565 => f.write_str("RGB_565"),
            PixelFormat(other) => write!(f, "format#{other}"),
        }
    }
}

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// A reference-counted image allocation.
///
/// Held as `Arc<GraphicBuffer>` everywhere; identity comparisons (is this
/// queue item still tracking this slot's buffer?) use pointer equality, not
/// the attributes.
pub struct GraphicBuffer {
    id: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    usage: BufferUsage,
    data: Mutex<Vec<u8>>,
}

impl GraphicBuffer {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
        capacity: usize,
    ) -> Self {
        Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            width,
            height,
            format,
            usage,
            data: Mutex::new(vec![0u8; capacity]),
        }
    }

    /// Process-unique id, stable for the buffer's lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn size_bytes(&self) -> usize {
        self.data.lock().len()
    }

    /// Whether this buffer satisfies a dequeue request. Width, height and
    /// format must match exactly; the buffer's usage must cover every
    /// requested bit.
    pub fn matches(&self, width: u32, height: u32, format: PixelFormat, usage: BufferUsage) -> bool {
        self.width == width
            && self.height == height
            && self.format == format
            && self.usage.contains(usage)
    }

    /// Producer-side access to the pixel storage.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.data.lock())
    }

    /// Consumer-side access to the pixel storage.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.lock())
    }
}

impl std::fmt::Debug for GraphicBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicBuffer")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("usage", &self.usage)
            .finish()
    }
}

/// Allocation failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocatorError {
    /// The allocator refused to provide `requested` bytes.
    OutOfMemory { requested: usize },
    /// The allocator cannot manufacture this shape at all.
    Unsupported {
        width: u32,
        height: u32,
        format: PixelFormat,
    },
}

impl std::fmt::Display for AllocatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocatorError::OutOfMemory { requested } => {
                write!(f, "allocator out of memory ({requested} bytes requested)")
            }
            AllocatorError::Unsupported {
                width,
                height,
                format,
            } => {
                write!(f, "unsupported buffer shape {width}x{height} {format}")
            }
        }
    }
}

impl std::error::Error for AllocatorError {}

/// Manufactures graphic buffers for the queue.
///
/// The queue calls `allocate` without holding its lock, so implementations
/// may block.
pub trait BufferAllocator: Send + Sync {
    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> Result<Arc<GraphicBuffer>, AllocatorError>;

    /// Set a floor (in bytes) on the storage of subsequently allocated
    /// buffers. Zero clears the floor.
    fn set_buffer_size(&self, bytes: usize);
}

/// Default allocator backing buffers with heap memory.
pub struct HeapAllocator {
    min_bytes: AtomicUsize,
}

impl HeapAllocator {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            min_bytes: AtomicUsize::new(0),
        }
    }
}

impl BufferAllocator for HeapAllocator {
    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> Result<Arc<GraphicBuffer>, AllocatorError> {
        if width == 0 || height == 0 {
            return Err(AllocatorError::Unsupported {
                width,
                height,
                format,
            });
        }
        let pixel_bytes = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(format.bytes_per_pixel()))
            .ok_or(AllocatorError::Unsupported {
                width,
                height,
                format,
            })?;
        let capacity = pixel_bytes.max(self.min_bytes.load(Ordering::Relaxed));
        Ok(Arc::new(GraphicBuffer::new(
            width, height, format, usage, capacity,
        )))
    }

    fn set_buffer_size(&self, bytes: usize) {
        self.min_bytes.store(bytes, Ordering::Relaxed);
    }
}
