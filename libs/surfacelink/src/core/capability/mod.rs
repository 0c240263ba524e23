// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Cross-process capability exchange.

mod channel;
mod receiver;
pub(crate) mod scm;
mod unix_channel;

pub use channel::{CapabilityChannel, CapabilityState, HELLO_LEN, HELLO_MAGIC};
pub use receiver::CapabilityReceiver;
pub use unix_channel::UnixCapabilityChannel;
