// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Host-side orchestration of one UI process.

mod coalesce;
mod listener;
#[allow(clippy::module_inception)]
mod provider;

pub use listener::{ChannelListener, NoopListener, ProviderEvent, ProviderListener};
pub use provider::{Provider, ProviderState};
