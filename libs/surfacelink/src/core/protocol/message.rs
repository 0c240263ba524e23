// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Framed messages carried by the event stream.
//!
//! Every message starts with a one-byte tag:
//!
//! | tag | message     | payload                           |
//! |-----|-------------|-----------------------------------|
//! | 0   | `STATUS`    | subtype `u8` (0 = frame ready)    |
//! | 1   | `INPUT`     | 16-byte [`InputEvent`]            |
//! | 2   | `TREE`      | `u32` LE length + encoded tree    |
//! | 3   | `APP_EVENT` | `u8` length + raw bytes           |

use std::io::{self, Read};

use super::InputEvent;
use crate::core::tree::{self, TreeNode};
use crate::core::{LinkError, Result};

pub const TAG_STATUS: u8 = 0;
pub const TAG_INPUT: u8 = 1;
pub const TAG_TREE: u8 = 2;
pub const TAG_APP_EVENT: u8 = 3;

pub const STATUS_FRAME_READY: u8 = 0;

/// Largest APP_EVENT payload.
pub const MAX_APP_EVENT_LEN: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// The child finished rendering into the most recently pushed surface.
    FrameReady,
    /// Subtype this side does not know; ignored by receivers.
    Unknown(u8),
}

impl StatusKind {
    pub fn from_u8(value: u8) -> Self {
        match value {
            STATUS_FRAME_READY => Self::FrameReady,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::FrameReady => STATUS_FRAME_READY,
            Self::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Status(StatusKind),
    Input(InputEvent),
    Tree(TreeNode),
    AppEvent(Vec<u8>),
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Status(_) => TAG_STATUS,
            Self::Input(_) => TAG_INPUT,
            Self::Tree(_) => TAG_TREE,
            Self::AppEvent(_) => TAG_APP_EVENT,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status(_) => "STATUS",
            Self::Input(_) => "INPUT",
            Self::Tree(_) => "TREE",
            Self::AppEvent(_) => "APP_EVENT",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(32);
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Append the complete frame, tag included, to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Status(kind) => out.extend_from_slice(&[TAG_STATUS, kind.to_u8()]),
            Self::Input(event) => {
                out.push(TAG_INPUT);
                out.extend_from_slice(&event.to_bytes());
            }
            Self::Tree(node) => return encode_tree_frame(node, out),
            Self::AppEvent(bytes) => return encode_app_event_frame(bytes, out),
        }
        Ok(())
    }
}

/// Append a TREE frame without wrapping the node in a [`Message`].
pub fn encode_tree_frame(node: &TreeNode, out: &mut Vec<u8>) -> Result<()> {
    out.push(TAG_TREE);
    let len_at = out.len();
    out.extend_from_slice(&[0; 4]);
    tree::encode_into(node, out)?;
    let payload_len = out.len() - len_at - 4;
    let len = u32::try_from(payload_len).map_err(|_| {
        LinkError::InvalidArgument(format!("tree of {} bytes is too large", payload_len))
    })?;
    out[len_at..len_at + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

pub fn encode_app_event_frame(bytes: &[u8], out: &mut Vec<u8>) -> Result<()> {
    if bytes.len() > MAX_APP_EVENT_LEN {
        return Err(LinkError::InvalidArgument(format!(
            "app event of {} bytes exceeds {}",
            bytes.len(),
            MAX_APP_EVENT_LEN
        )));
    }
    out.push(TAG_APP_EVENT);
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    Ok(())
}

/// Bounds applied while reading frames from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_tree_payload: u32,
    pub max_tree_depth: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_tree_payload: 1024 * 1024,
            max_tree_depth: tree::DEFAULT_MAX_DEPTH,
        }
    }
}

/// Read one frame.
///
/// Returns `Ok(None)` for a well-framed TREE whose payload does not decode;
/// the stream is still aligned and reading may continue. Framing errors
/// (unknown tag, zero or oversized TREE length) and I/O failures are errors
/// after which the stream must be abandoned.
pub fn read_message<R: Read>(reader: &mut R, limits: &FrameLimits) -> Result<Option<Message>> {
    let tag = read_tag(reader)?;

    match tag {
        TAG_STATUS => {
            let [subtype] = read_array::<_, 1>(reader)?;
            Ok(Some(Message::Status(StatusKind::from_u8(subtype))))
        }
        TAG_INPUT => {
            let bytes = read_array::<_, { InputEvent::WIRE_SIZE }>(reader)?;
            Ok(Some(Message::Input(InputEvent::from_bytes(&bytes))))
        }
        TAG_TREE => {
            let len = u32::from_le_bytes(read_array(reader)?);
            if len == 0 || len > limits.max_tree_payload {
                return Err(LinkError::ProtocolViolation(format!(
                    "TREE length {} outside 1..={}",
                    len, limits.max_tree_payload
                )));
            }

            let mut payload = vec![0u8; len as usize];
            read_exact(reader, &mut payload)?;
            match tree::decode_with_max_depth(&payload, limits.max_tree_depth) {
                Ok(node) => Ok(Some(Message::Tree(node))),
                Err(e) => {
                    tracing::warn!(
                        "[EventChannel] Dropping malformed TREE payload ({} bytes): {}",
                        len,
                        e
                    );
                    Ok(None)
                }
            }
        }
        TAG_APP_EVENT => {
            let [len] = read_array::<_, 1>(reader)?;
            let mut payload = vec![0u8; usize::from(len)];
            read_exact(reader, &mut payload)?;
            Ok(Some(Message::AppEvent(payload)))
        }
        other => Err(LinkError::ProtocolViolation(format!(
            "unknown message tag {}",
            other
        ))),
    }
}

fn read_tag<R: Read>(reader: &mut R) -> Result<u8> {
    let mut tag = [0u8; 1];
    loop {
        match reader.read(&mut tag) {
            Ok(0) => {
                return Err(LinkError::ChildExited(
                    "peer closed the event stream".into(),
                ));
            }
            Ok(_) => return Ok(tag[0]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(LinkError::ChannelBroken(format!("read failed: {}", e))),
        }
    }
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    read_exact(reader, &mut buf)?;
    Ok(buf)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            LinkError::ChannelBroken("stream closed mid-message".into())
        } else {
            LinkError::ChannelBroken(format!("read failed: {}", e))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::Modifiers;
    use std::io::Cursor;

    fn read_all(bytes: &[u8]) -> Vec<Result<Option<Message>>> {
        let mut cursor = Cursor::new(bytes);
        let mut out = Vec::new();
        loop {
            let result = read_message(&mut cursor, &FrameLimits::default());
            let stop = result.is_err();
            out.push(result);
            if stop {
                return out;
            }
        }
    }

    #[test]
    fn test_frames_in_sequence() {
        let messages = vec![
            Message::Status(StatusKind::FrameReady),
            Message::Input(InputEvent::pointer_move(10, 20, Modifiers::ALT)),
            Message::Tree(TreeNode::new("param").with_property("id", 1).with_property("value", 0.5)),
            Message::AppEvent(b"ping".to_vec()),
            Message::AppEvent(Vec::new()),
        ];
        let mut stream = Vec::new();
        for message in &messages {
            message.encode_into(&mut stream).unwrap();
        }

        let mut results = read_all(&stream);
        let last = results.pop().unwrap();
        assert!(matches!(last, Err(LinkError::ChildExited(_))));
        let decoded: Vec<Message> = results.into_iter().map(|r| r.unwrap().unwrap()).collect();
        assert_eq!(decoded, messages);
    }

    #[test]
    fn test_status_and_app_event_bytes() {
        assert_eq!(Message::Status(StatusKind::FrameReady).encode().unwrap(), vec![0, 0]);
        assert_eq!(
            Message::AppEvent(vec![7, 8]).encode().unwrap(),
            vec![TAG_APP_EVENT, 2, 7, 8]
        );
    }

    #[test]
    fn test_tree_length_prefix() {
        let node = TreeNode::new("t");
        let frame = Message::Tree(node.clone()).encode().unwrap();
        let body = tree::encode(&node).unwrap();
        assert_eq!(frame[0], TAG_TREE);
        assert_eq!(frame[1..5], (body.len() as u32).to_le_bytes());
        assert_eq!(frame[5..], body[..]);
    }

    #[test]
    fn test_oversized_app_event_rejected() {
        let result = Message::AppEvent(vec![0; 256]).encode();
        assert!(matches!(result, Err(LinkError::InvalidArgument(_))));
    }

    #[test]
    fn test_unknown_tag_is_violation() {
        let results = read_all(&[9, 0, 0]);
        assert!(matches!(results[0], Err(LinkError::ProtocolViolation(_))));
    }

    #[test]
    fn test_tree_length_bounds() {
        let zero = [TAG_TREE, 0, 0, 0, 0];
        assert!(matches!(read_all(&zero)[0], Err(LinkError::ProtocolViolation(_))));

        let mut oversized = vec![TAG_TREE];
        oversized.extend_from_slice(&(1024 * 1024 + 1u32).to_le_bytes());
        assert!(matches!(
            read_all(&oversized)[0],
            Err(LinkError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_malformed_tree_is_dropped_and_stream_continues() {
        let mut stream = vec![TAG_TREE];
        stream.extend_from_slice(&3u32.to_le_bytes());
        stream.extend_from_slice(b"abc");
        Message::Status(StatusKind::FrameReady)
            .encode_into(&mut stream)
            .unwrap();

        let results = read_all(&stream);
        assert!(matches!(results[0], Ok(None)));
        assert!(matches!(
            results[1],
            Ok(Some(Message::Status(StatusKind::FrameReady)))
        ));
    }

    #[test]
    fn test_truncated_frame_is_broken() {
        let results = read_all(&[TAG_INPUT, 1, 2, 3]);
        assert!(matches!(results[0], Err(LinkError::ChannelBroken(_))));
    }

    #[test]
    fn test_unknown_status_subtype_survives() {
        let results = read_all(&[TAG_STATUS, 42]);
        assert!(matches!(
            results[0],
            Ok(Some(Message::Status(StatusKind::Unknown(42))))
        ));
    }
}
