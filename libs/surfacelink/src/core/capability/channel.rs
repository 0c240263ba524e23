// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Host side of the capability exchange.

use std::time::Duration;

use crate::core::surface::Capability;
use crate::core::Result;

/// First four bytes of the child's handshake message.
pub const HELLO_MAGIC: [u8; 4] = *b"SLHI";

/// Handshake message length: magic followed by the child's pid (u32 LE).
pub const HELLO_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityState {
    /// No rendezvous name registered yet.
    Unregistered,
    /// Rendezvous name registered, waiting for the child.
    Listening,
    /// Child endpoint received; pushes are possible.
    Connected,
    Closed,
}

/// One-time rendezvous handshake plus host-to-child capability pushes.
///
/// The host publishes a process-discoverable name, hands it to the child on
/// its command line and waits for the child to connect and deliver its own
/// receive endpoint. After that, every surface the child should render into
/// is pushed over that endpoint. Nothing flows child-to-host after the
/// handshake.
pub trait CapabilityChannel: Send {
    fn state(&self) -> CapabilityState;

    /// Name registered by [`publish`](Self::publish), if any.
    fn rendezvous_name(&self) -> Option<&str>;

    /// Register the rendezvous name. Valid only once, from `Unregistered`.
    fn publish(&mut self) -> Result<String>;

    /// Accept the handshake only from process `pid`. Connections from any
    /// other process are dropped while waiting.
    fn expect_peer(&mut self, pid: u32);

    /// Block until the child's endpoint arrives. `None` waits forever.
    /// On success the rendezvous registration is dropped.
    fn await_peer(&mut self, timeout: Option<Duration>) -> Result<()>;

    /// Send a surface capability to the child. Valid only when connected.
    fn push(&mut self, capability: &Capability<'_>) -> Result<()>;

    /// Release the registration and the peer endpoint. Idempotent.
    fn close(&mut self);

    fn is_connected(&self) -> bool {
        self.state() == CapabilityState::Connected
    }
}
