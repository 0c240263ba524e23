// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Orchestrates surfaces, the capability channel, the event channel and the
//! UI process behind one lifecycle API.
//!
//! Resize protocol:
//!
//! 1. allocate a pending surface (the view keeps showing the current one)
//! 2. push its capability, then send `INPUT(resize)`
//! 3. the child renders into it and replies `STATUS(frame ready)`
//! 4. on that frame-ready, commit the pending surface, present it and
//!    release the old one in the same dispatch tick
//!
//! The child renders into the newest surface it has received, so only the
//! latest push owes a frame-ready. A resize that supersedes an uncommitted
//! one replaces the debt instead of adding to it: two overlapping resizes
//! commit once, on the next frame-ready. If the push or the resize
//! notification fails, the pending surface is discarded and the child is
//! treated as lost.

use std::time::{Duration, Instant};

use crate::core::capability::{CapabilityChannel, UnixCapabilityChannel};
use crate::core::config::ProviderConfig;
use crate::core::params::{param_tree, ParameterRegistry};
use crate::core::protocol::{ChannelEvent, EventChannel, FrameLimits, InputEvent, Message, StatusKind};
use crate::core::subprocess::{ChildProcess, SubprocessConfig};
use crate::core::surface::{
    HostWindowHandle, MemfdSurfaceAllocator, SurfaceAllocator, SurfaceId, SurfaceManager,
    SurfaceView, ViewBounds,
};
use crate::core::tree::TreeNode;
use crate::core::{LinkError, Result};

use super::coalesce::coalesce_trees;
use super::ProviderListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    /// Constructed, not started.
    Idle,
    Running,
    /// The child went away; surfaces are kept so the last frame stays up.
    Disconnected,
    /// Stopped or failed to start. Terminal.
    Stopped,
}

pub struct Provider {
    config: ProviderConfig,
    listener: Box<dyn ProviderListener>,
    surfaces: SurfaceManager,
    capability: Box<dyn CapabilityChannel>,
    child: Option<ChildProcess>,
    channel: Option<EventChannel>,
    view: SurfaceView,
    parameters: ParameterRegistry,
    state: ProviderState,
    scale: f64,
    started_at: Option<Instant>,
    acks_outstanding: u32,
    first_frame_seen: bool,
    pending_bounds: Option<ViewBounds>,
}

impl Provider {
    /// Provider backed by memfd surfaces and the Unix capability channel.
    pub fn new(config: ProviderConfig, listener: Box<dyn ProviderListener>) -> Self {
        let capability = UnixCapabilityChannel::new(config.capability.rendezvous_prefix.clone());
        Self::with_backends(
            config,
            listener,
            Box::new(MemfdSurfaceAllocator::new()),
            Box::new(capability),
        )
    }

    /// Provider with caller-supplied surface and capability backends.
    pub fn with_backends(
        config: ProviderConfig,
        listener: Box<dyn ProviderListener>,
        allocator: Box<dyn SurfaceAllocator>,
        capability: Box<dyn CapabilityChannel>,
    ) -> Self {
        let surfaces = SurfaceManager::new(
            allocator,
            config.surface.pixel_format,
            config.surface.max_dimension,
        );
        Self {
            config,
            listener,
            surfaces,
            capability,
            child: None,
            channel: None,
            view: SurfaceView::default(),
            parameters: ParameterRegistry::new(),
            state: ProviderState::Idle,
            scale: 1.0,
            started_at: None,
            acks_outstanding: 0,
            first_frame_seen: false,
            pending_bounds: None,
        }
    }

    /// Allocate the initial surface, launch the child, complete the
    /// handshake and present the surface. Any failure tears everything
    /// down and leaves the provider `Stopped`.
    pub fn start(
        &mut self,
        width: u32,
        height: u32,
        scale: f64,
        host_window: Option<HostWindowHandle>,
    ) -> Result<()> {
        if self.state != ProviderState::Idle {
            return Err(LinkError::InvalidState(format!(
                "cannot start provider in state {:?}",
                self.state
            )));
        }
        if width == 0 || height == 0 || !(scale.is_finite() && scale > 0.0) {
            return Err(LinkError::InvalidArgument(format!(
                "invalid start geometry {}x{} @ {}",
                width, height, scale
            )));
        }

        match self.try_start(width, height, scale, host_window) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("[Provider] Start failed: {}", e);
                self.teardown();
                Err(e)
            }
        }
    }

    fn try_start(
        &mut self,
        width: u32,
        height: u32,
        scale: f64,
        host_window: Option<HostWindowHandle>,
    ) -> Result<()> {
        self.config.validate()?;
        let executable = self.config.child.executable.clone().ok_or_else(|| {
            LinkError::Configuration("no UI executable configured (child.executable)".into())
        })?;

        self.scale = scale;
        self.view.set_backing_scale(scale);
        self.view
            .set_frame(ViewBounds::new(0, 0, width as i32, height as i32));
        if let Some(handle) = host_window {
            self.view.attach(handle);
        }

        let (device_width, device_height) = self.device_size(width, height);
        let initial = self.surfaces.create(device_width, device_height)?;

        let rendezvous = self.capability.publish()?;
        let launch_args = vec![
            format!("--rendezvous={}", rendezvous),
            format!("--scale={}", scale),
        ];
        let subprocess = SubprocessConfig::from_child_config(executable, &self.config.child);
        let child = ChildProcess::launch(&subprocess, launch_args)?;
        self.capability.expect_peer(child.pid());
        let stream = child.try_clone_stream()?;
        self.child = Some(child);

        let limits = FrameLimits {
            max_tree_payload: self.config.channel.max_tree_payload,
            max_tree_depth: self.config.tree.max_depth,
        };
        self.channel = Some(EventChannel::start(stream, limits)?);
        self.started_at = Some(Instant::now());

        self.capability
            .await_peer(Some(self.config.handshake_timeout()))?;

        let surface = self
            .surfaces
            .current()
            .ok_or_else(|| LinkError::InvalidState("initial surface missing".into()))?;
        self.capability.push(&surface.capability())?;
        self.acks_outstanding = 1;
        self.state = ProviderState::Running;

        tracing::info!(
            "[Provider] Started: {}x{} @ {} ({}x{} device pixels), child pid {}",
            width,
            height,
            scale,
            device_width,
            device_height,
            self.child_pid().unwrap_or_default()
        );
        self.present(initial);
        Ok(())
    }

    /// Request a new logical size. Non-positive sizes are ignored.
    pub fn resize(&mut self, width: i32, height: i32) -> Result<()> {
        if width <= 0 || height <= 0 {
            tracing::debug!("[Provider] Ignoring resize to {}x{}", width, height);
            return Ok(());
        }
        self.ensure_running()?;

        let (device_width, device_height) = self.device_size(width as u32, height as u32);
        let latest = self.surfaces.pending().or(self.surfaces.current());
        if latest.is_some_and(|s| s.width() == device_width && s.height() == device_height) {
            tracing::trace!("[Provider] Resize to {}x{} is a no-op", width, height);
            let origin = self.pending_bounds.unwrap_or(self.view.bounds());
            self.pending_bounds = Some(ViewBounds::new(origin.x, origin.y, width, height));
            if self.surfaces.pending().is_none() {
                self.apply_pending_bounds();
            }
            return Ok(());
        }

        let pending = self.surfaces.begin_resize(device_width, device_height)?;
        if let Err(e) = self.announce_pending(device_width, device_height) {
            // The child may not know this surface; it must never be shown.
            self.surfaces.cancel_resize();
            self.view.cancel_pending();
            self.pending_bounds = None;
            tracing::error!("[Provider] Resize to {}x{} failed: {}", width, height, e);
            self.handle_disconnect(LinkError::ChannelBroken(format!(
                "resize to {}x{} failed: {}",
                width, height, e
            )));
            return Err(e);
        }

        // Only the newest surface owes a frame; a superseded one is forgiven.
        self.acks_outstanding = 1;
        self.view.set_pending_surface(pending);
        let origin = self.pending_bounds.unwrap_or(self.view.bounds());
        self.pending_bounds = Some(ViewBounds::new(origin.x, origin.y, width, height));
        tracing::debug!(
            "[Provider] Resize to {}x{} pending as {} ({} acks outstanding)",
            width,
            height,
            pending,
            self.acks_outstanding
        );
        Ok(())
    }

    /// Push the pending surface to the child, then tell it the new size.
    fn announce_pending(&mut self, device_width: u32, device_height: u32) -> Result<()> {
        match self.surfaces.pending() {
            Some(surface) => self.capability.push(&surface.capability())?,
            None => return Err(LinkError::InvalidState("pending surface missing".into())),
        }
        let event = InputEvent::resize(device_width, device_height, self.scale)
            .with_timestamp(self.timestamp_ms());
        self.channel()?.send_input(&event)
    }

    /// Move or resize the view. A size change goes through [`resize`](Self::resize)
    /// and takes effect when the child has rendered the new surface.
    pub fn update_bounds(&mut self, x: i32, y: i32, width: i32, height: i32) -> Result<()> {
        let current = self.pending_bounds.unwrap_or(self.view.bounds());
        let size_changed = current.width != width || current.height != height;

        if self.state != ProviderState::Running || !size_changed || width <= 0 || height <= 0 {
            self.view.set_frame(ViewBounds::new(x, y, width, height));
            if let Some(pending) = self.pending_bounds.as_mut() {
                pending.x = x;
                pending.y = y;
            }
            return Ok(());
        }

        self.pending_bounds = Some(ViewBounds::new(x, y, current.width, current.height));
        self.resize(width, height)
    }

    pub fn attach_view(&mut self, handle: HostWindowHandle) {
        self.view.attach(handle);
    }

    pub fn detach_view(&mut self) -> Option<HostWindowHandle> {
        self.view.detach()
    }

    /// Forward an input event, stamped with milliseconds since start.
    pub fn send_input(&mut self, event: InputEvent) -> Result<()> {
        self.ensure_running()?;
        let event = event.with_timestamp(self.timestamp_ms());
        self.channel()?.send_input(&event)
    }

    pub fn send_tree(&mut self, node: &TreeNode) -> Result<()> {
        self.ensure_running()?;
        self.channel()?.send_tree(node)
    }

    pub fn send_app_event(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_running()?;
        self.channel()?.send_app_event(payload)
    }

    /// Record a parameter locally and, while running, tell the child.
    pub fn set_parameter(&mut self, id: i32, value: f64) -> Result<()> {
        self.parameters.set(id, value);
        if self.state == ProviderState::Running {
            self.channel()?.send_tree(&param_tree(id, value))?;
        }
        Ok(())
    }

    /// Handle every queued event without blocking. Returns the number of
    /// events handled.
    pub fn dispatch_pending(&mut self) -> usize {
        let batch = self.drain(None);
        self.dispatch_batch(batch)
    }

    /// Wait up to `timeout` for the first event, then handle everything
    /// queued.
    pub fn dispatch_timeout(&mut self, timeout: Duration) -> usize {
        let batch = self.drain(Some(timeout));
        self.dispatch_batch(batch)
    }

    /// Close the capability channel, stop the child, join the reader and
    /// release every surface. Idempotent.
    pub fn stop(&mut self) {
        if self.state == ProviderState::Stopped {
            return;
        }
        tracing::info!("[Provider] Stopping");
        self.teardown();
    }

    pub fn state(&self) -> ProviderState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ProviderState::Running
    }

    pub fn surfaces(&self) -> &SurfaceManager {
        &self.surfaces
    }

    pub fn view(&self) -> &SurfaceView {
        &self.view
    }

    /// Shared handle to the parameter registry.
    pub fn parameters(&self) -> ParameterRegistry {
        self.parameters.clone()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn child_pid(&self) -> Option<u32> {
        self.child.as_ref().map(ChildProcess::pid)
    }

    pub fn rendezvous_name(&self) -> Option<&str> {
        self.capability.rendezvous_name()
    }

    /// Frame-ready acknowledgements still owed by the child.
    pub fn acks_outstanding(&self) -> u32 {
        self.acks_outstanding
    }

    fn drain(&mut self, timeout: Option<Duration>) -> Vec<ChannelEvent> {
        let mut batch = Vec::new();
        if let Some(channel) = self.channel.as_ref() {
            let first = match timeout {
                Some(timeout) => channel.recv_timeout(timeout),
                None => channel.try_recv(),
            };
            if let Some(event) = first {
                batch.push(event);
                while let Some(event) = channel.try_recv() {
                    batch.push(event);
                }
            }
        }
        batch
    }

    fn dispatch_batch(&mut self, batch: Vec<ChannelEvent>) -> usize {
        let batch = if self.config.tree.coalesce {
            coalesce_trees(batch)
        } else {
            batch
        };

        let handled = batch.len();
        for event in batch {
            self.handle_event(event);
        }
        self.check_liveness();
        handled
    }

    fn handle_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(Message::Status(StatusKind::FrameReady)) => self.on_frame_ready(),
            ChannelEvent::Message(Message::Status(StatusKind::Unknown(subtype))) => {
                tracing::debug!("[Provider] Ignoring STATUS subtype {}", subtype);
            }
            ChannelEvent::Message(Message::Input(_)) => {
                tracing::debug!("[Provider] Ignoring INPUT from child");
            }
            ChannelEvent::Message(Message::Tree(node)) => {
                self.parameters.apply_tree(&node);
                self.listener.on_tree_message(&node);
            }
            ChannelEvent::Message(Message::AppEvent(payload)) => {
                self.listener.on_app_event(&payload);
            }
            ChannelEvent::Closed(reason) => self.handle_disconnect(reason),
        }
    }

    fn on_frame_ready(&mut self) {
        if self.state != ProviderState::Running {
            return;
        }
        if self.acks_outstanding > 0 {
            self.acks_outstanding -= 1;
        } else {
            tracing::debug!("[Provider] Unsolicited frame-ready");
        }

        if !self.first_frame_seen {
            self.first_frame_seen = true;
            tracing::info!("[Provider] First frame ready");
            self.listener.on_first_frame_ready();
        }

        if self.acks_outstanding == 0 {
            if let Some(committed) = self.surfaces.commit_resize() {
                self.present(committed);
                self.surfaces.release_previous();
            }
        }
    }

    fn present(&mut self, surface: SurfaceId) {
        self.view.set_surface(surface);
        self.apply_pending_bounds();
        let (width, height) = self
            .surfaces
            .current()
            .map(|s| (s.width(), s.height()))
            .unwrap_or_default();
        tracing::debug!("[Provider] Presenting {} ({}x{})", surface, width, height);
        self.listener.on_surface_presented(surface, width, height);
    }

    fn apply_pending_bounds(&mut self) {
        if let Some(bounds) = self.pending_bounds.take() {
            self.view.set_frame(bounds);
        }
    }

    fn check_liveness(&mut self) {
        if self.state != ProviderState::Running {
            return;
        }
        let exited = match self.child.as_ref() {
            Some(child) if !child.is_running() => {
                format!("'{}' (pid {}) is no longer running", child.name(), child.pid())
            }
            _ => return,
        };
        self.handle_disconnect(LinkError::ChildExited(exited));
    }

    fn handle_disconnect(&mut self, reason: LinkError) {
        if self.state != ProviderState::Running {
            return;
        }
        tracing::warn!("[Provider] Child lost: {}", reason);
        self.state = ProviderState::Disconnected;
        self.acks_outstanding = 0;

        self.capability.close();
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.stop() {
                tracing::warn!("[Provider] {}", e);
            }
        }
        self.listener.on_disconnected(&reason);
    }

    fn teardown(&mut self) {
        self.capability.close();
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.stop() {
                tracing::warn!("[Provider] {}", e);
            }
        }
        self.surfaces.release();
        self.view.clear();
        self.acks_outstanding = 0;
        self.pending_bounds = None;
        self.state = ProviderState::Stopped;
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state {
            ProviderState::Running => Ok(()),
            ProviderState::Disconnected => Err(LinkError::ChannelBroken(
                "child is disconnected".into(),
            )),
            other => Err(LinkError::InvalidState(format!(
                "provider is {:?}",
                other
            ))),
        }
    }

    fn channel(&self) -> Result<&EventChannel> {
        self.channel
            .as_ref()
            .ok_or_else(|| LinkError::InvalidState("event channel not started".into()))
    }

    fn device_size(&self, width: u32, height: u32) -> (u32, u32) {
        let scaled = |v: u32| ((f64::from(v) * self.scale).round() as u32).max(1);
        (scaled(width), scaled(height))
    }

    fn timestamp_ms(&self) -> u32 {
        self.started_at
            .map(|t| t.elapsed().as_millis() as u32)
            .unwrap_or(0)
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.stop();
    }
}
