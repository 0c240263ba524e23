// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::os::fd::{FromRawFd, OwnedFd};

use crate::core::{LinkError, Result};

use super::{PixelFormat, SharedSurface, SurfaceDescriptor, SurfaceId};

/// Row alignment applied to every allocated surface.
const ROW_ALIGNMENT: u32 = 64;

/// Backend that creates shareable surfaces.
pub trait SurfaceAllocator: Send {
    fn allocate(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        generation: u32,
    ) -> Result<SharedSurface>;
}

/// Allocates surfaces as anonymous memfd regions.
#[derive(Debug, Default)]
pub struct MemfdSurfaceAllocator;

impl MemfdSurfaceAllocator {
    pub fn new() -> Self {
        Self
    }
}

impl SurfaceAllocator for MemfdSurfaceAllocator {
    fn allocate(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        generation: u32,
    ) -> Result<SharedSurface> {
        let stride = aligned_stride(width, format)?;
        let byte_len = u64::from(stride) * u64::from(height);

        // SAFETY: name is a NUL-terminated literal.
        let raw = unsafe { libc::memfd_create(c"surfacelink-surface".as_ptr(), libc::MFD_CLOEXEC) };
        if raw < 0 {
            return Err(LinkError::Allocation(format!(
                "memfd_create failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        // SAFETY: raw is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: fd is valid for the duration of the call.
        if unsafe { libc::ftruncate(raw, byte_len as libc::off_t) } != 0 {
            return Err(LinkError::Allocation(format!(
                "ftruncate to {} bytes failed: {}",
                byte_len,
                std::io::Error::last_os_error()
            )));
        }

        let descriptor = SurfaceDescriptor {
            id: SurfaceId::next(),
            width,
            height,
            stride,
            format,
            generation,
        };
        tracing::trace!(
            "[SurfaceManager] Allocated {} ({}x{}, stride {}, {} bytes)",
            descriptor.id,
            width,
            height,
            stride,
            byte_len
        );
        Ok(SharedSurface::from_parts(descriptor, fd))
    }
}

fn aligned_stride(width: u32, format: PixelFormat) -> Result<u32> {
    width
        .checked_mul(format.bytes_per_pixel())
        .and_then(|row| row.checked_next_multiple_of(ROW_ALIGNMENT))
        .ok_or_else(|| LinkError::Allocation(format!("row of {} pixels overflows", width)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_alignment() {
        assert_eq!(aligned_stride(1, PixelFormat::Bgra8).unwrap(), 64);
        assert_eq!(aligned_stride(16, PixelFormat::Bgra8).unwrap(), 64);
        assert_eq!(aligned_stride(17, PixelFormat::Bgra8).unwrap(), 128);
        assert_eq!(aligned_stride(800, PixelFormat::Rgba8).unwrap(), 3200);
        assert!(aligned_stride(u32::MAX, PixelFormat::Bgra8).is_err());
    }

    #[test]
    fn test_memfd_allocation() {
        let mut allocator = MemfdSurfaceAllocator::new();
        let surface = allocator.allocate(100, 50, PixelFormat::Bgra8, 7).unwrap();
        assert_eq!(surface.width(), 100);
        assert_eq!(surface.height(), 50);
        assert_eq!(surface.stride(), 448);
        assert_eq!(surface.generation(), 7);

        let mapping = surface.map().unwrap();
        assert_eq!(mapping.len(), 448 * 50);
        assert!(mapping.as_slice().iter().all(|&b| b == 0));
    }
}
