// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Double-buffered surface lifecycle.
//!
//! Three named slots: `current` is what the view displays, `pending` is being
//! rendered into by the child after a resize, `previous` is the old current
//! kept alive until the view has switched away from it.

use crate::core::{LinkError, Result};

use super::{PixelFormat, SharedSurface, SurfaceAllocator, SurfaceId};

pub struct SurfaceManager {
    allocator: Box<dyn SurfaceAllocator>,
    format: PixelFormat,
    max_dimension: u32,
    current: Option<SharedSurface>,
    pending: Option<SharedSurface>,
    previous: Option<SharedSurface>,
    generation: u32,
    commit_count: u64,
}

impl SurfaceManager {
    /// Empty manager. Every surface comes from `allocator` in `format`;
    /// neither dimension may exceed `max_dimension`.
    pub fn new(allocator: Box<dyn SurfaceAllocator>, format: PixelFormat, max_dimension: u32) -> Self {
        Self {
            allocator,
            format,
            max_dimension,
            current: None,
            pending: None,
            previous: None,
            generation: 0,
            commit_count: 0,
        }
    }

    /// Allocate a surface and make it current, releasing everything held.
    pub fn create(&mut self, width: u32, height: u32) -> Result<SurfaceId> {
        let surface = self.allocate(width, height)?;
        let id = surface.id();
        self.release();
        self.current = Some(surface);
        tracing::debug!("[SurfaceManager] Created current {} ({}x{})", id, width, height);
        Ok(id)
    }

    /// Allocate a pending surface for a resize. The current surface is not
    /// touched; an earlier pending surface is discarded. On failure the
    /// existing pending surface is kept.
    pub fn begin_resize(&mut self, width: u32, height: u32) -> Result<SurfaceId> {
        let surface = self.allocate(width, height)?;
        let id = surface.id();
        if let Some(discarded) = self.pending.replace(surface) {
            tracing::debug!(
                "[SurfaceManager] Pending {} superseded by {}",
                discarded.id(),
                id
            );
        }
        tracing::debug!("[SurfaceManager] Pending {} ({}x{})", id, width, height);
        Ok(id)
    }

    /// Promote pending to current. The old current becomes previous.
    /// Returns `None` when nothing is pending.
    pub fn commit_resize(&mut self) -> Option<SurfaceId> {
        let pending = self.pending.take()?;
        let id = pending.id();
        let old = self.current.replace(pending);
        if let Some(stale) = std::mem::replace(&mut self.previous, old) {
            tracing::debug!("[SurfaceManager] Releasing stale previous {}", stale.id());
        }
        self.commit_count += 1;
        tracing::debug!(
            "[SurfaceManager] Committed {} (commit #{})",
            id,
            self.commit_count
        );
        Some(id)
    }

    /// Discard the pending surface without touching current. Used when the
    /// child never learned about it. Returns the discarded id.
    pub fn cancel_resize(&mut self) -> Option<SurfaceId> {
        let discarded = self.pending.take()?;
        let id = discarded.id();
        tracing::debug!("[SurfaceManager] Cancelled pending {}", id);
        Some(id)
    }

    /// Drop the previous surface. Returns whether one was held.
    pub fn release_previous(&mut self) -> bool {
        match self.previous.take() {
            Some(surface) => {
                tracing::trace!("[SurfaceManager] Released previous {}", surface.id());
                true
            }
            None => false,
        }
    }

    /// Free every surface.
    pub fn release(&mut self) {
        self.current = None;
        self.pending = None;
        self.previous = None;
    }

    /// Surface the view displays.
    pub fn current(&self) -> Option<&SharedSurface> {
        self.current.as_ref()
    }

    /// Surface allocated by the latest uncommitted resize.
    pub fn pending(&self) -> Option<&SharedSurface> {
        self.pending.as_ref()
    }

    /// Old current surface, held until [`release_previous`](Self::release_previous).
    pub fn previous(&self) -> Option<&SharedSurface> {
        self.previous.as_ref()
    }

    /// Id of [`current`](Self::current).
    pub fn displayed_id(&self) -> Option<SurfaceId> {
        self.current.as_ref().map(SharedSurface::id)
    }

    /// Number of successful [`commit_resize`](Self::commit_resize) calls.
    pub fn commit_count(&self) -> u64 {
        self.commit_count
    }

    /// Generation of the most recent allocation.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn allocate(&mut self, width: u32, height: u32) -> Result<SharedSurface> {
        if width == 0 || height == 0 {
            return Err(LinkError::Allocation(format!(
                "invalid surface size {}x{}",
                width, height
            )));
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(LinkError::Allocation(format!(
                "surface size {}x{} exceeds maximum dimension {}",
                width, height, self.max_dimension
            )));
        }

        let generation = self.generation.wrapping_add(1);
        let surface = self
            .allocator
            .allocate(width, height, self.format, generation)
            .inspect_err(|e| {
                tracing::warn!("[SurfaceManager] Allocation of {}x{} failed: {}", width, height, e)
            })?;
        self.generation = generation;
        Ok(surface)
    }
}

impl Drop for SurfaceManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::core::surface::MemfdSurfaceAllocator;

    /// Allocator that can be switched to fail on demand.
    struct FlakyAllocator {
        inner: MemfdSurfaceAllocator,
        fail: Arc<AtomicBool>,
    }

    impl SurfaceAllocator for FlakyAllocator {
        fn allocate(
            &mut self,
            width: u32,
            height: u32,
            format: PixelFormat,
            generation: u32,
        ) -> Result<SharedSurface> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(LinkError::Allocation("out of memory".into()));
            }
            self.inner.allocate(width, height, format, generation)
        }
    }

    fn manager() -> (SurfaceManager, Arc<AtomicBool>) {
        let fail = Arc::new(AtomicBool::new(false));
        let allocator = FlakyAllocator {
            inner: MemfdSurfaceAllocator::new(),
            fail: Arc::clone(&fail),
        };
        (
            SurfaceManager::new(Box::new(allocator), PixelFormat::Bgra8, 4096),
            fail,
        )
    }

    #[test]
    fn test_displayed_stays_until_commit() {
        let (mut surfaces, _) = manager();
        let original = surfaces.create(800, 600).unwrap();
        assert_eq!(surfaces.displayed_id(), Some(original));

        let pending = surfaces.begin_resize(1024, 768).unwrap();
        assert_ne!(pending, original);
        assert_eq!(surfaces.displayed_id(), Some(original));
        assert_eq!(surfaces.pending().map(SharedSurface::id), Some(pending));

        assert_eq!(surfaces.commit_resize(), Some(pending));
        assert_eq!(surfaces.displayed_id(), Some(pending));
        assert_eq!(surfaces.previous().map(SharedSurface::id), Some(original));
        assert!(surfaces.pending().is_none());

        assert!(surfaces.release_previous());
        assert!(!surfaces.release_previous());
        assert_eq!(surfaces.commit_count(), 1);
    }

    #[test]
    fn test_overlapping_resize_replaces_pending() {
        let (mut surfaces, _) = manager();
        let original = surfaces.create(800, 600).unwrap();
        surfaces.begin_resize(900, 700).unwrap();
        let latest = surfaces.begin_resize(1000, 800).unwrap();

        assert_eq!(surfaces.displayed_id(), Some(original));
        assert_eq!(surfaces.commit_resize(), Some(latest));
        assert_eq!(surfaces.commit_resize(), None);
        assert_eq!(surfaces.commit_count(), 1);
        assert_eq!(surfaces.current().map(SharedSurface::width), Some(1000));
    }

    #[test]
    fn test_failed_resize_keeps_state() {
        let (mut surfaces, fail) = manager();
        let original = surfaces.create(800, 600).unwrap();
        let pending = surfaces.begin_resize(1024, 768).unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            surfaces.begin_resize(1280, 720),
            Err(LinkError::Allocation(_))
        ));
        assert_eq!(surfaces.displayed_id(), Some(original));
        assert_eq!(surfaces.pending().map(SharedSurface::id), Some(pending));
    }

    #[test]
    fn test_cancel_resize_keeps_current() {
        let (mut surfaces, _) = manager();
        let original = surfaces.create(800, 600).unwrap();
        let pending = surfaces.begin_resize(1024, 768).unwrap();

        assert_eq!(surfaces.cancel_resize(), Some(pending));
        assert_eq!(surfaces.cancel_resize(), None);
        assert_eq!(surfaces.commit_resize(), None);
        assert_eq!(surfaces.displayed_id(), Some(original));
        assert_eq!(surfaces.commit_count(), 0);
    }

    #[test]
    fn test_invalid_dimensions() {
        let (mut surfaces, _) = manager();
        assert!(matches!(surfaces.create(0, 600), Err(LinkError::Allocation(_))));
        assert!(matches!(surfaces.create(800, 0), Err(LinkError::Allocation(_))));
        assert!(matches!(
            surfaces.create(4097, 600),
            Err(LinkError::Allocation(_))
        ));
        assert!(surfaces.current().is_none());
    }

    #[test]
    fn test_create_releases_everything() {
        let (mut surfaces, _) = manager();
        surfaces.create(10, 10).unwrap();
        surfaces.begin_resize(20, 20).unwrap();
        surfaces.commit_resize();
        surfaces.begin_resize(30, 30).unwrap();

        let fresh = surfaces.create(40, 40).unwrap();
        assert_eq!(surfaces.displayed_id(), Some(fresh));
        assert!(surfaces.pending().is_none());
        assert!(surfaces.previous().is_none());
    }

    #[test]
    fn test_generation_increments_per_allocation() {
        let (mut surfaces, _) = manager();
        surfaces.create(10, 10).unwrap();
        assert_eq!(surfaces.current().map(SharedSurface::generation), Some(1));
        surfaces.begin_resize(20, 20).unwrap();
        assert_eq!(surfaces.pending().map(SharedSurface::generation), Some(2));
        assert_eq!(surfaces.generation(), 2);
    }

    #[test]
    fn test_release() {
        let (mut surfaces, _) = manager();
        surfaces.create(10, 10).unwrap();
        surfaces.begin_resize(20, 20).unwrap();
        surfaces.release();
        assert!(surfaces.current().is_none());
        assert!(surfaces.pending().is_none());
        assert!(surfaces.displayed_id().is_none());
    }
}
