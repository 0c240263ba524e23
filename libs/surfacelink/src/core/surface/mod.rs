// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared surfaces and their resize lifecycle.

mod allocator;
mod manager;
mod shared_surface;
mod view;

pub use allocator::{MemfdSurfaceAllocator, SurfaceAllocator};
pub use manager::SurfaceManager;
pub use shared_surface::{
    Capability, PixelFormat, SharedSurface, SurfaceDescriptor, SurfaceId, SurfaceMapping,
};
pub use view::{HostWindowHandle, SurfaceView, ViewBounds};
