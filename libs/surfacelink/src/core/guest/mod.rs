// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Child side of a provider session, for UI processes written in Rust.

mod session;

pub use session::{GuestArgs, GuestSession};
