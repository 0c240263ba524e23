// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Display surfaces rendered by a separate UI process.
//!
//! The host ([`Provider`]) allocates shared surfaces, launches the UI
//! process, passes it surface handles over a capability channel and talks
//! to it over a framed event stream. The UI process side lives in
//! [`GuestSession`].

#[cfg(not(target_os = "linux"))]
compile_error!("surfacelink currently supports Linux only");

pub mod core;

pub use crossbeam_channel;

pub use core::{
    capability::{CapabilityChannel, CapabilityReceiver, CapabilityState, UnixCapabilityChannel},
    config::ProviderConfig,
    guest::{GuestArgs, GuestSession},
    param_tree,
    protocol::{
        ChannelEvent, EventChannel, FrameLimits, InputAction, InputEvent, InputKind, Message,
        Modifiers, MouseButton, StatusKind,
    },
    provider::{
        ChannelListener, NoopListener, Provider, ProviderEvent, ProviderListener, ProviderState,
    },
    subprocess::{ChildProcess, SubprocessConfig},
    surface::{
        HostWindowHandle, MemfdSurfaceAllocator, PixelFormat, SharedSurface, SurfaceAllocator,
        SurfaceDescriptor, SurfaceId, SurfaceManager, SurfaceView, ViewBounds,
    },
    tree::{TreeNode, Variant},
    LinkError, ParameterRegistry, Result,
};
