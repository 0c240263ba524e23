// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Display-layer model of the host view that shows the current surface.

use super::SurfaceId;

/// Opaque handle of the embedding host's native window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostWindowHandle(pub u64);

/// View frame in host points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewBounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ViewBounds {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug)]
pub struct SurfaceView {
    parent: Option<HostWindowHandle>,
    displayed: Option<SurfaceId>,
    pending: Option<SurfaceId>,
    bounds: ViewBounds,
    backing_scale: f64,
    present_count: u64,
}

impl Default for SurfaceView {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl SurfaceView {
    pub fn new(backing_scale: f64) -> Self {
        Self {
            parent: None,
            displayed: None,
            pending: None,
            bounds: ViewBounds::default(),
            backing_scale,
            present_count: 0,
        }
    }

    /// Show `id`. Clears the pending marker if it referred to the same surface.
    pub fn set_surface(&mut self, id: SurfaceId) {
        self.displayed = Some(id);
        if self.pending == Some(id) {
            self.pending = None;
        }
        self.present_count += 1;
    }

    /// Record the surface the child is rendering into for the next swap.
    pub fn set_pending_surface(&mut self, id: SurfaceId) {
        self.pending = Some(id);
    }

    /// Forget the pending surface; the displayed one stays.
    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }

    /// Embed the view in `parent`, replacing any earlier parent.
    pub fn attach(&mut self, parent: HostWindowHandle) {
        if let Some(old) = self.parent.replace(parent) {
            if old != parent {
                tracing::debug!("[SurfaceView] Re-parented from {:?} to {:?}", old, parent);
            }
        }
    }

    /// Remove the view from its parent and return the old parent.
    pub fn detach(&mut self) -> Option<HostWindowHandle> {
        self.parent.take()
    }

    pub fn set_frame(&mut self, bounds: ViewBounds) {
        self.bounds = bounds;
    }

    pub fn set_backing_scale(&mut self, scale: f64) {
        self.backing_scale = scale;
    }

    /// Drop every surface reference; the parent stays attached.
    pub fn clear(&mut self) {
        self.displayed = None;
        self.pending = None;
    }

    pub fn parent(&self) -> Option<HostWindowHandle> {
        self.parent
    }

    pub fn is_attached(&self) -> bool {
        self.parent.is_some()
    }

    pub fn displayed(&self) -> Option<SurfaceId> {
        self.displayed
    }

    pub fn pending(&self) -> Option<SurfaceId> {
        self.pending
    }

    pub fn bounds(&self) -> ViewBounds {
        self.bounds
    }

    pub fn backing_scale(&self) -> f64 {
        self.backing_scale
    }

    /// Number of surface swaps presented so far.
    pub fn present_count(&self) -> u64 {
        self.present_count
    }
}
