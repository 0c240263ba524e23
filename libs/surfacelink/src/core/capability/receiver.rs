// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Child side of the capability exchange.

use std::os::fd::AsFd;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixDatagram, UnixStream};
use std::time::Duration;

use super::channel::{HELLO_LEN, HELLO_MAGIC};
use super::scm;
use crate::core::surface::{SharedSurface, SurfaceDescriptor};
use crate::core::{LinkError, Result};

/// Receives surfaces pushed by the host.
pub struct CapabilityReceiver {
    endpoint: UnixDatagram,
}

impl CapabilityReceiver {
    /// Connect to the host's rendezvous name and hand over a fresh receive
    /// endpoint.
    pub fn connect(rendezvous_name: &str) -> Result<Self> {
        let addr = SocketAddr::from_abstract_name(rendezvous_name.as_bytes()).map_err(|e| {
            LinkError::Handshake(format!("invalid rendezvous name {}: {}", rendezvous_name, e))
        })?;
        let stream = UnixStream::connect_addr(&addr).map_err(|e| {
            LinkError::Handshake(format!("rendezvous {} not found: {}", rendezvous_name, e))
        })?;

        let (local, remote) = UnixDatagram::pair()?;

        let mut hello = [0u8; HELLO_LEN];
        hello[..4].copy_from_slice(&HELLO_MAGIC);
        hello[4..].copy_from_slice(&std::process::id().to_le_bytes());
        scm::send_with_fd(stream.as_fd(), &hello, remote.as_fd())
            .map_err(|e| LinkError::Handshake(format!("failed to send hello: {}", e)))?;

        tracing::debug!("[Capability] Sent hello to {}", rendezvous_name);
        Ok(Self { endpoint: local })
    }

    /// Wait for the next pushed surface. Returns `None` on timeout; `None`
    /// as the timeout waits forever.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<Option<SharedSurface>> {
        if !scm::poll_readable(self.endpoint.as_fd(), timeout)? {
            return Ok(None);
        }

        let mut buf = [0u8; SurfaceDescriptor::WIRE_SIZE];
        let (len, fd) = scm::recv_with_fd(self.endpoint.as_fd(), &mut buf)
            .map_err(|e| LinkError::ChannelBroken(format!("capability receive failed: {}", e)))?;

        let fd = match fd {
            Some(fd) => fd,
            None if len == 0 => {
                return Err(LinkError::ChannelBroken("capability channel closed".into()));
            }
            None => {
                return Err(LinkError::ProtocolViolation(format!(
                    "capability message of {} bytes without a handle",
                    len
                )));
            }
        };

        let descriptor = SurfaceDescriptor::from_bytes(&buf[..len])?;
        let surface = SharedSurface::import(descriptor, fd)?;
        tracing::debug!(
            "[Capability] Received {} ({}x{})",
            descriptor.id,
            descriptor.width,
            descriptor.height
        );
        Ok(Some(surface))
    }
}
