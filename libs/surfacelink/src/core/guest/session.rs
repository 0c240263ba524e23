// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::core::capability::CapabilityReceiver;
use crate::core::protocol::{ChannelEvent, EventChannel, FrameLimits};
use crate::core::subprocess::{CHANNEL_FD, CHANNEL_FD_ENV};
use crate::core::surface::SharedSurface;
use crate::core::tree::TreeNode;
use crate::core::{LinkError, Result};

/// Launch arguments the provider passes to the UI process.
#[derive(Debug, Clone, PartialEq)]
pub struct GuestArgs {
    pub rendezvous: String,
    pub scale: f64,
    /// Arguments not recognized here, in their original order.
    pub extra: Vec<String>,
}

impl GuestArgs {
    /// Parse `--rendezvous=NAME` and `--scale=S` out of an argument list
    /// that excludes the program name.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut rendezvous = None;
        let mut scale = 1.0;
        let mut extra = Vec::new();

        for arg in args {
            let arg = arg.into();
            if let Some(name) = arg.strip_prefix("--rendezvous=") {
                rendezvous = Some(name.to_string());
            } else if let Some(value) = arg.strip_prefix("--scale=") {
                scale = value.parse::<f64>().map_err(|e| {
                    LinkError::InvalidArgument(format!("bad --scale value '{}': {}", value, e))
                })?;
            } else {
                extra.push(arg);
            }
        }

        let rendezvous = rendezvous
            .filter(|name| !name.is_empty())
            .ok_or_else(|| LinkError::InvalidArgument("missing --rendezvous=NAME".into()))?;

        Ok(Self {
            rendezvous,
            scale,
            extra,
        })
    }

    /// Parse the current process's arguments.
    pub fn from_env() -> Result<Self> {
        Self::parse(std::env::args().skip(1))
    }
}

/// The UI process's end of the link: the inherited event stream plus the
/// capability receiver.
pub struct GuestSession {
    args: GuestArgs,
    channel: EventChannel,
    receiver: CapabilityReceiver,
}

impl GuestSession {
    /// Adopt the inherited event stream and complete the capability
    /// handshake.
    pub fn connect(args: GuestArgs) -> Result<Self> {
        Self::connect_with_limits(args, FrameLimits::default())
    }

    /// Like [`connect`](Self::connect) with explicit frame limits. The TREE
    /// limit should match the host's `channel.max_tree_payload`.
    pub fn connect_with_limits(args: GuestArgs, limits: FrameLimits) -> Result<Self> {
        let stream = inherited_stream()?;
        let channel = EventChannel::start(stream, limits)?;
        let receiver = CapabilityReceiver::connect(&args.rendezvous)?;
        tracing::debug!("[Guest] Connected to {}", args.rendezvous);
        Ok(Self {
            args,
            channel,
            receiver,
        })
    }

    /// Arguments this session was started with.
    pub fn args(&self) -> &GuestArgs {
        &self.args
    }

    /// Next surface pushed by the host, or `None` on timeout.
    pub fn recv_surface(&self, timeout: Option<Duration>) -> Result<Option<SharedSurface>> {
        self.receiver.recv(timeout)
    }

    /// Inbound event receiver, for use in a `select!`.
    pub fn events(&self) -> &crossbeam_channel::Receiver<ChannelEvent> {
        self.channel.events()
    }

    /// Next inbound event without blocking.
    pub fn try_recv(&self) -> Option<ChannelEvent> {
        self.channel.try_recv()
    }

    /// Next inbound event, or `None` once `timeout` elapses.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChannelEvent> {
        self.channel.recv_timeout(timeout)
    }

    /// Report that the most recently received surface holds a frame.
    pub fn send_frame_ready(&self) -> Result<()> {
        self.channel.send_frame_ready()
    }

    /// Send a tree message. Oversized trees are rejected before writing.
    pub fn send_tree(&self, node: &TreeNode) -> Result<()> {
        self.channel.send_tree(node)
    }

    /// Send an opaque application event of at most 255 bytes.
    pub fn send_app_event(&self, payload: &[u8]) -> Result<()> {
        self.channel.send_app_event(payload)
    }

    /// Close the event stream. The host sees EOF and treats the child as
    /// gone.
    pub fn close(&mut self) {
        self.channel.close();
    }
}

fn inherited_stream() -> Result<UnixStream> {
    let fd: RawFd = match std::env::var(CHANNEL_FD_ENV) {
        Ok(value) => value.parse().map_err(|_| {
            LinkError::Configuration(format!("{}={} is not a descriptor", CHANNEL_FD_ENV, value))
        })?,
        Err(_) => CHANNEL_FD,
    };

    // SAFETY: F_GETFD only inspects the descriptor table.
    if fd < 0 || unsafe { libc::fcntl(fd, libc::F_GETFD) } < 0 {
        return Err(LinkError::ChannelBroken(format!(
            "inherited event stream fd {} is not open",
            fd
        )));
    }

    // SAFETY: the descriptor is open and was handed to this process for
    // exclusive use by the host; nothing else in the process owns it.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    Ok(UnixStream::from(owned))
}
