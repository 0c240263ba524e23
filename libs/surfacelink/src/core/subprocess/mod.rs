// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! UI process supervision.

mod process_handle;

pub use process_handle::{ChildProcess, SubprocessConfig, CHANNEL_FD, CHANNEL_FD_ENV};
