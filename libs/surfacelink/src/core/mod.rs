// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod capability;
pub mod config;
pub mod error;
pub mod guest;
pub mod params;
pub mod protocol;
pub mod provider;
pub mod subprocess;
pub mod surface;
pub mod tree;

pub use config::ProviderConfig;
pub use error::*;
pub use params::{param_tree, ParameterRegistry, PARAM_NODE_TYPE};
