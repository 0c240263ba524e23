// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

use crate::core::tree::TreeCodecError;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Surface allocation failed: {0}")]
    Allocation(String),

    #[error("Capability handshake failed: {0}")]
    Handshake(String),

    #[error("Event channel broken: {0}")]
    ChannelBroken(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Child process exited unexpectedly: {0}")]
    ChildExited(String),

    #[error("Child process error: {0}")]
    Process(String),

    #[error("Tree codec error: {0}")]
    TreeCodec(#[from] TreeCodecError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LinkError {
    /// Errors that mean the child is lost: the provider stops supervision and
    /// reports a disconnect for any of them.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ChannelBroken(_) | Self::ProtocolViolation(_) | Self::ChildExited(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
