//! # Device Memory
//!
//! Owned, aligned and zero-initialized memory handed out by a backend for
//! packet rings and side buffers.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

use crate::error::{Error, Result};

/// A zeroed allocation released on drop
pub struct DeviceMemory {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: DeviceMemory uniquely owns its allocation; concurrent access to
// the bytes is mediated by the atomics its users overlay on top.
unsafe impl Send for DeviceMemory {}
// SAFETY: See above. The handle itself exposes no interior mutability.
unsafe impl Sync for DeviceMemory {}

impl DeviceMemory {
    /// Allocate `size` zeroed bytes aligned to `align` from the host heap
    pub fn host(size: usize, align: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidParameter);
        }
        let layout = Layout::from_size_align(size, align).map_err(|_| Error::InvalidParameter)?;

        // SAFETY: layout has a non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(Error::OutOfResources)?;

        Ok(Self { ptr, layout })
    }

    /// Base address
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Base address as an integer, as published to devices
    pub fn address(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Alignment in bytes
    pub fn align(&self) -> usize {
        self.layout.align()
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMemory")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_and_zeroing() {
        let mem = DeviceMemory::host(4096, 64).unwrap();
        assert_eq!(mem.address() % 64, 0);
        assert_eq!(mem.size(), 4096);
        // SAFETY: the allocation is 4096 bytes long
        let bytes = unsafe { std::slice::from_raw_parts(mem.as_ptr(), mem.size()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rejects_bad_layout() {
        assert_eq!(DeviceMemory::host(0, 64).unwrap_err(), Error::InvalidParameter);
        assert_eq!(DeviceMemory::host(64, 3).unwrap_err(), Error::InvalidParameter);
    }
}
