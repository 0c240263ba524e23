// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Provider configuration.

mod provider_config;

pub use provider_config::{
    CapabilityConfig, ChannelConfig, ChildConfig, ProviderConfig, SurfaceConfig, TreeConfig,
};
