// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Framed, multiplexed event protocol between host and UI process.

mod event_channel;
mod input;
mod message;

pub use event_channel::{ChannelEvent, EventChannel};
pub use input::{InputAction, InputEvent, InputKind, Modifiers, MouseButton};
pub use message::{
    encode_app_event_frame, encode_tree_frame, read_message, FrameLimits, Message, StatusKind,
    MAX_APP_EVENT_LEN, STATUS_FRAME_READY, TAG_APP_EVENT, TAG_INPUT, TAG_STATUS, TAG_TREE,
};
