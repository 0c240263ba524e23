// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Abstract-namespace Unix socket capability channel.

use std::os::fd::AsFd;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixDatagram, UnixListener};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::channel::{CapabilityChannel, CapabilityState, HELLO_LEN, HELLO_MAGIC};
use super::scm;
use crate::core::surface::Capability;
use crate::core::{LinkError, Result};

static RENDEZVOUS_SEQ: AtomicU64 = AtomicU64::new(0);

/// Rendezvous over a listening socket named `{prefix}.{pid}.{seq}` in the
/// abstract namespace; capabilities travel as `SCM_RIGHTS` datagrams.
pub struct UnixCapabilityChannel {
    prefix: String,
    state: CapabilityState,
    name: Option<String>,
    listener: Option<UnixListener>,
    peer: Option<UnixDatagram>,
    peer_pid: Option<u32>,
    expected_pid: Option<u32>,
    pushed: u64,
}

impl UnixCapabilityChannel {
    /// Channel whose rendezvous names start with `prefix`. Nothing is
    /// registered until [`publish`](CapabilityChannel::publish).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            state: CapabilityState::Unregistered,
            name: None,
            listener: None,
            peer: None,
            peer_pid: None,
            expected_pid: None,
            pushed: 0,
        }
    }

    /// Pid the child reported in its handshake.
    pub fn peer_pid(&self) -> Option<u32> {
        self.peer_pid
    }

    /// Capabilities pushed since the handshake.
    pub fn push_count(&self) -> u64 {
        self.pushed
    }

    fn next_name(&self) -> String {
        format!(
            "{}.{}.{}",
            self.prefix,
            std::process::id(),
            RENDEZVOUS_SEQ.fetch_add(1, Ordering::Relaxed)
        )
    }
}

impl CapabilityChannel for UnixCapabilityChannel {
    fn state(&self) -> CapabilityState {
        self.state
    }

    fn rendezvous_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn publish(&mut self) -> Result<String> {
        if self.state != CapabilityState::Unregistered {
            return Err(LinkError::InvalidState(format!(
                "cannot publish rendezvous in state {:?}",
                self.state
            )));
        }

        let name = self.next_name();
        let addr = SocketAddr::from_abstract_name(name.as_bytes())
            .map_err(|e| LinkError::Handshake(format!("invalid rendezvous name {}: {}", name, e)))?;
        let listener = UnixListener::bind_addr(&addr)
            .map_err(|e| LinkError::Handshake(format!("failed to register {}: {}", name, e)))?;

        tracing::info!("[Capability] Registered rendezvous {}", name);
        self.listener = Some(listener);
        self.name = Some(name.clone());
        self.state = CapabilityState::Listening;
        Ok(name)
    }

    fn expect_peer(&mut self, pid: u32) {
        self.expected_pid = Some(pid);
    }

    fn await_peer(&mut self, timeout: Option<Duration>) -> Result<()> {
        if self.state != CapabilityState::Listening {
            return Err(LinkError::InvalidState(format!(
                "cannot await peer in state {:?}",
                self.state
            )));
        }
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| LinkError::InvalidState("rendezvous listener missing".into()))?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let remaining = || deadline.map(|d| d.saturating_duration_since(Instant::now()));

        let (stream, credential_pid) = loop {
            if !scm::poll_readable(listener.as_fd(), remaining())? {
                return Err(LinkError::Handshake(format!(
                    "no child connected to {} within {:?}",
                    self.name.as_deref().unwrap_or("?"),
                    timeout.unwrap_or_default()
                )));
            }
            let (stream, _) = listener
                .accept()
                .map_err(|e| LinkError::Handshake(format!("accept failed: {}", e)))?;

            let credential_pid = scm::peer_pid(stream.as_fd())
                .map_err(|e| LinkError::Handshake(format!("SO_PEERCRED failed: {}", e)))?;
            match self.expected_pid {
                Some(expected) if expected != credential_pid => {
                    tracing::warn!(
                        "[Capability] Rejected connection from pid {} on {} (expecting {})",
                        credential_pid,
                        self.name.as_deref().unwrap_or("?"),
                        expected
                    );
                }
                _ => break (stream, credential_pid),
            }
        };

        if !scm::poll_readable(stream.as_fd(), remaining())? {
            return Err(LinkError::Handshake(
                "child connected but sent no hello".into(),
            ));
        }
        let mut hello = [0u8; 16];
        let (len, fd) = scm::recv_with_fd(stream.as_fd(), &mut hello)
            .map_err(|e| LinkError::Handshake(format!("failed to read hello: {}", e)))?;

        if len != HELLO_LEN || hello[..4] != HELLO_MAGIC {
            return Err(LinkError::Handshake(format!(
                "malformed hello ({} bytes)",
                len
            )));
        }
        let fd = fd.ok_or_else(|| LinkError::Handshake("hello carried no endpoint".into()))?;
        let pid = u32::from_le_bytes([hello[4], hello[5], hello[6], hello[7]]);
        if pid != credential_pid {
            return Err(LinkError::Handshake(format!(
                "hello claims pid {} but the socket belongs to pid {}",
                pid, credential_pid
            )));
        }

        self.peer = Some(UnixDatagram::from(fd));
        self.peer_pid = Some(pid);
        // Unregister: nobody else may rendezvous with this name.
        self.listener = None;
        self.state = CapabilityState::Connected;
        tracing::info!(
            "[Capability] Child pid {} connected via {}",
            pid,
            self.name.as_deref().unwrap_or("?")
        );
        Ok(())
    }

    fn push(&mut self, capability: &Capability<'_>) -> Result<()> {
        let peer = match (&self.peer, self.state) {
            (Some(peer), CapabilityState::Connected) => peer,
            _ => {
                return Err(LinkError::InvalidState(format!(
                    "cannot push capability in state {:?}",
                    self.state
                )));
            }
        };

        let descriptor = capability.descriptor;
        scm::send_with_fd(peer.as_fd(), &descriptor.to_bytes(), capability.handle).map_err(|e| {
            LinkError::ChannelBroken(format!("capability push of {} failed: {}", descriptor.id, e))
        })?;

        self.pushed += 1;
        tracing::debug!(
            "[Capability] Pushed {} ({}x{}, generation {})",
            descriptor.id,
            descriptor.width,
            descriptor.height,
            descriptor.generation
        );
        Ok(())
    }

    fn close(&mut self) {
        if self.state == CapabilityState::Closed {
            return;
        }
        self.listener = None;
        self.peer = None;
        self.state = CapabilityState::Closed;
        tracing::debug!(
            "[Capability] Closed {}",
            self.name.as_deref().unwrap_or("unregistered channel")
        );
    }
}

impl Drop for UnixCapabilityChannel {
    fn drop(&mut self) {
        self.close();
    }
}
