use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::memory::tracker::MemorySpace;
use crate::types::Stream;

/// Alignment used by the system backend for every buffer it hands out.
const BUFFER_ALIGN: usize = 64;

/// Per-memory-space acquire/release primitives the tracker dispatches to.
///
/// Managed and device-resident buffers share one release path; host-pinned
/// buffers use their own; stream-ordered buffers are released against the
/// stream they were acquired on.
pub trait MemoryBackend: Send + Sync {
    fn alloc_managed(&self, bytes: usize) -> Result<NonNull<u8>>;
    fn alloc_host_pinned(&self, bytes: usize) -> Result<NonNull<u8>>;
    fn alloc_device(&self, bytes: usize) -> Result<NonNull<u8>>;
    fn alloc_device_async(&self, bytes: usize, stream: Stream) -> Result<NonNull<u8>>;

    /// Release a managed or device-resident buffer.
    fn free_device(&self, ptr: NonNull<u8>, bytes: usize);
    fn free_host_pinned(&self, ptr: NonNull<u8>, bytes: usize);
    fn free_device_async(&self, ptr: NonNull<u8>, bytes: usize, stream: Stream);
}

/// Backend over the global Rust allocator.
///
/// Stands in for the device runtime so the tracker and the front ends run
/// without a GPU; a real device backend implements the same trait over the
/// native per-space primitives.
#[derive(Debug, Default)]
pub struct SystemBackend;

impl SystemBackend {
    pub fn new() -> Self {
        Self
    }

    fn acquire(&self, bytes: usize, space: MemorySpace) -> Result<NonNull<u8>> {
        let layout = Layout::from_size_align(bytes, BUFFER_ALIGN).map_err(|e| {
            Error::InvalidParameter(format!("invalid allocation layout for {} bytes: {}", bytes, e))
        })?;
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(Error::OutOfMemory { bytes, space })
    }

    fn release(&self, ptr: NonNull<u8>, bytes: usize) {
        // Round-trips the layout the buffer was acquired with.
        let layout = unsafe { Layout::from_size_align_unchecked(bytes, BUFFER_ALIGN) };
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

impl MemoryBackend for SystemBackend {
    fn alloc_managed(&self, bytes: usize) -> Result<NonNull<u8>> {
        self.acquire(bytes, MemorySpace::Managed)
    }

    fn alloc_host_pinned(&self, bytes: usize) -> Result<NonNull<u8>> {
        self.acquire(bytes, MemorySpace::HostPinned)
    }

    fn alloc_device(&self, bytes: usize) -> Result<NonNull<u8>> {
        self.acquire(bytes, MemorySpace::Device)
    }

    fn alloc_device_async(&self, bytes: usize, _stream: Stream) -> Result<NonNull<u8>> {
        self.acquire(bytes, MemorySpace::AsyncDevice)
    }

    fn free_device(&self, ptr: NonNull<u8>, bytes: usize) {
        self.release(ptr, bytes);
    }

    fn free_host_pinned(&self, ptr: NonNull<u8>, bytes: usize) {
        self.release(ptr, bytes);
    }

    fn free_device_async(&self, ptr: NonNull<u8>, bytes: usize, _stream: Stream) {
        self.release(ptr, bytes);
    }
}
