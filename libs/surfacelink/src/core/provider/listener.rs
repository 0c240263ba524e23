// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crossbeam_channel::{Receiver, Sender};

use crate::core::surface::SurfaceId;
use crate::core::tree::TreeNode;
use crate::core::LinkError;

/// Callbacks raised by [`Provider`](super::Provider) on the thread that
/// calls its dispatch methods. Every method defaults to doing nothing.
pub trait ProviderListener: Send {
    /// A tree arrived from the child. `param` trees have already been
    /// applied to the parameter registry.
    fn on_tree_message(&mut self, _tree: &TreeNode) {}

    /// The child rendered its first frame.
    fn on_first_frame_ready(&mut self) {}

    /// The view switched to a new surface.
    fn on_surface_presented(&mut self, _surface: SurfaceId, _width: u32, _height: u32) {}

    fn on_app_event(&mut self, _payload: &[u8]) {}

    /// The child is gone. Raised at most once per provider.
    fn on_disconnected(&mut self, _reason: &LinkError) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default)]
pub struct NoopListener;

impl ProviderListener for NoopListener {}

/// Provider callbacks as values.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    TreeMessage(TreeNode),
    FirstFrameReady,
    SurfacePresented {
        surface: SurfaceId,
        width: u32,
        height: u32,
    },
    AppEvent(Vec<u8>),
    Disconnected(String),
}

/// Forwards every callback into a crossbeam queue, for hosts that prefer
/// draining events over implementing the trait.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: Sender<ProviderEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, Receiver<ProviderEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ProviderEvent) {
        // The host dropped its receiver; nothing left to notify.
        let _ = self.tx.send(event);
    }
}

impl ProviderListener for ChannelListener {
    fn on_tree_message(&mut self, tree: &TreeNode) {
        self.forward(ProviderEvent::TreeMessage(tree.clone()));
    }

    fn on_first_frame_ready(&mut self) {
        self.forward(ProviderEvent::FirstFrameReady);
    }

    fn on_surface_presented(&mut self, surface: SurfaceId, width: u32, height: u32) {
        self.forward(ProviderEvent::SurfacePresented {
            surface,
            width,
            height,
        });
    }

    fn on_app_event(&mut self, payload: &[u8]) {
        self.forward(ProviderEvent::AppEvent(payload.to_vec()));
    }

    fn on_disconnected(&mut self, reason: &LinkError) {
        self.forward(ProviderEvent::Disconnected(reason.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_listener_forwards() {
        let (mut listener, events) = ChannelListener::new();
        listener.on_first_frame_ready();
        listener.on_app_event(b"x");
        listener.on_disconnected(&LinkError::ChildExited("gone".into()));

        assert_eq!(events.try_recv().unwrap(), ProviderEvent::FirstFrameReady);
        assert_eq!(events.try_recv().unwrap(), ProviderEvent::AppEvent(b"x".to_vec()));
        match events.try_recv().unwrap() {
            ProviderEvent::Disconnected(reason) => assert!(reason.contains("gone")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (mut listener, events) = ChannelListener::new();
        drop(events);
        listener.on_first_frame_ready();
    }
}
