// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared surfaces: fd-backed pixel memory visible to both processes.

use std::fmt;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

use crate::core::{LinkError, Result};

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique surface identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    /// Allocate the next id. Ids are never reused within a process.
    pub fn next() -> Self {
        Self(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Bgra8,
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        4
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Self::Bgra8 => 0,
            Self::Rgba8 => 1,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Bgra8),
            1 => Some(Self::Rgba8),
            _ => None,
        }
    }
}

/// Metadata that travels with a surface capability.
///
/// Wire layout, little-endian: `id:u64 width:u32 height:u32 stride:u32
/// format:u32 generation:u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDescriptor {
    pub id: SurfaceId,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub generation: u32,
}

impl SurfaceDescriptor {
    pub const WIRE_SIZE: usize = 28;

    /// Encode in wire layout.
    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..8].copy_from_slice(&self.id.0.to_le_bytes());
        out[8..12].copy_from_slice(&self.width.to_le_bytes());
        out[12..16].copy_from_slice(&self.height.to_le_bytes());
        out[16..20].copy_from_slice(&self.stride.to_le_bytes());
        out[20..24].copy_from_slice(&self.format.to_u32().to_le_bytes());
        out[24..28].copy_from_slice(&self.generation.to_le_bytes());
        out
    }

    /// Decode from wire layout. Wrong lengths and unknown formats are
    /// handshake errors.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::WIRE_SIZE {
            return Err(LinkError::Handshake(format!(
                "surface descriptor is {} bytes, expected {}",
                bytes.len(),
                Self::WIRE_SIZE
            )));
        }
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[0..8]);

        let format = PixelFormat::from_u32(u32_at(20)).ok_or_else(|| {
            LinkError::Handshake(format!("unknown pixel format {}", u32_at(20)))
        })?;

        Ok(Self {
            id: SurfaceId(u64::from_le_bytes(id)),
            width: u32_at(8),
            height: u32_at(12),
            stride: u32_at(16),
            format,
            generation: u32_at(24),
        })
    }

    /// Bytes of pixel memory the descriptor claims.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

/// Borrowed, transferable reference to a surface.
#[derive(Debug, Clone, Copy)]
pub struct Capability<'a> {
    pub descriptor: SurfaceDescriptor,
    pub handle: BorrowedFd<'a>,
}

/// A shared pixel surface. Dropping it closes this process's handle; the
/// memory lives until every process has dropped its handle and mapping.
#[derive(Debug)]
pub struct SharedSurface {
    descriptor: SurfaceDescriptor,
    handle: OwnedFd,
}

impl SharedSurface {
    pub(crate) fn from_parts(descriptor: SurfaceDescriptor, handle: OwnedFd) -> Self {
        Self { descriptor, handle }
    }

    /// Adopt a surface received from the host, checking the backing object
    /// is at least as large as the descriptor claims.
    pub fn import(descriptor: SurfaceDescriptor, handle: OwnedFd) -> Result<Self> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(LinkError::Handshake(format!(
                "imported {} has zero extent",
                descriptor.id
            )));
        }
        let min_stride = descriptor
            .width
            .checked_mul(descriptor.format.bytes_per_pixel())
            .ok_or_else(|| {
                LinkError::InvalidArgument(format!(
                    "imported {} width {} overflows a row",
                    descriptor.id, descriptor.width
                ))
            })?;
        if descriptor.stride < min_stride {
            return Err(LinkError::Handshake(format!(
                "imported {} stride {} too small for width {}",
                descriptor.id, descriptor.stride, descriptor.width
            )));
        }
        let needed = (descriptor.stride as usize)
            .checked_mul(descriptor.height as usize)
            .ok_or_else(|| {
                LinkError::InvalidArgument(format!(
                    "imported {} size {}x{} overflows the address space",
                    descriptor.id, descriptor.stride, descriptor.height
                ))
            })?;

        // SAFETY: fstat only writes into the zeroed stat buffer.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(handle.as_raw_fd(), &mut stat) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        if (stat.st_size as u64) < needed as u64 {
            return Err(LinkError::Handshake(format!(
                "imported {} backing object is {} bytes, descriptor needs {}",
                descriptor.id, stat.st_size, needed
            )));
        }

        Ok(Self { descriptor, handle })
    }

    /// Process-unique id assigned at allocation.
    pub fn id(&self) -> SurfaceId {
        self.descriptor.id
    }

    /// Width in device pixels.
    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    /// Height in device pixels.
    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    /// Bytes per row, a multiple of 64.
    pub fn stride(&self) -> u32 {
        self.descriptor.stride
    }

    /// Pixel layout.
    pub fn format(&self) -> PixelFormat {
        self.descriptor.format
    }

    /// Allocation generation from the owning manager.
    pub fn generation(&self) -> u32 {
        self.descriptor.generation
    }

    /// Metadata that travels with the capability.
    pub fn descriptor(&self) -> SurfaceDescriptor {
        self.descriptor
    }

    /// Borrowed capability for pushing this surface to another process.
    pub fn capability(&self) -> Capability<'_> {
        Capability {
            descriptor: self.descriptor,
            handle: self.handle.as_fd(),
        }
    }

    /// Map the pixel memory read/write, shared with every other mapping.
    pub fn map(&self) -> Result<SurfaceMapping> {
        let len = self.descriptor.byte_len();
        // SAFETY: a fresh shared mapping of a descriptor we own; the kernel
        // picks the address.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.handle.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(LinkError::Allocation(format!(
                "mmap of {} failed: {}",
                self.descriptor.id,
                std::io::Error::last_os_error()
            )));
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| LinkError::Allocation("mmap returned null".into()))?;

        Ok(SurfaceMapping {
            ptr,
            len,
            stride: self.descriptor.stride as usize,
        })
    }
}

impl AsFd for SharedSurface {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.handle.as_fd()
    }
}

/// CPU view of a surface. Unmapped on drop.
pub struct SurfaceMapping {
    ptr: NonNull<u8>,
    len: usize,
    stride: usize,
}

// SAFETY: the mapping is plain shared memory owned by this value.
unsafe impl Send for SurfaceMapping {}

impl SurfaceMapping {
    /// Whole mapping, `stride * height` bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live mapping for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self prevents aliasing within this process.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Row `y`, including stride padding.
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.as_slice()[start..start + self.stride]
    }

    /// Fill every pixel with one 4-byte value.
    pub fn fill(&mut self, pixel: [u8; 4]) {
        for chunk in self.as_mut_slice().chunks_exact_mut(4) {
            chunk.copy_from_slice(&pixel);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for SurfaceMapping {
    fn drop(&mut self) {
        // SAFETY: unmapping the region created in SharedSurface::map.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}
