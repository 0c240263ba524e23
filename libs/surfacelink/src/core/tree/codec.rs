// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Byte-exact tree serialization.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! String        := utf8 bytes, 0x00
//! CompressedInt := N:u8 (1..=4, negatives always 4), N bytes
//! Variant       := CompressedInt(payloadSize) tag:u8 data   (void: CompressedInt(0), no tag)
//! Node          := String(type) CompressedInt(propCount) {String(name) Variant}
//!                  CompressedInt(childCount) {Node}
//! ```
//!
//! `payloadSize` counts the tag byte but not itself. The peer's decoder
//! reproduces these offsets exactly, so every size below is load-bearing.

use thiserror::Error;

use super::{TreeNode, Variant};

/// Nesting limit applied by [`decode`].
pub const DEFAULT_MAX_DEPTH: usize = 64;

const TAG_INT32: u8 = 1;
const TAG_BOOL_TRUE: u8 = 2;
const TAG_BOOL_FALSE: u8 = 3;
const TAG_DOUBLE: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_INT64: u8 = 6;
const TAG_BINARY: u8 = 8;
const TAG_VOID: u8 = 9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeCodecError {
    #[error("unexpected end of data at offset {offset} ({needed} more bytes needed)")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("invalid compressed int size byte {0:#04x}")]
    InvalidCompressedInt(u8),

    #[error("negative {what} ({value})")]
    NegativeCount { what: &'static str, value: i32 },

    #[error("nesting deeper than {0} levels")]
    DepthExceeded(usize),

    #[error("string at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),

    #[error("unterminated string at offset {0}")]
    UnterminatedString(usize),

    #[error("string contains an interior NUL byte")]
    InteriorNul,

    #[error("{what} too large to encode ({len})")]
    TooLarge { what: &'static str, len: usize },

    #[error("variant with tag {tag} has a {size}-byte payload")]
    TruncatedVariant { tag: u8, size: usize },
}

type CodecResult<T> = std::result::Result<T, TreeCodecError>;

// ============================================================================
// Encoding
// ============================================================================

/// Serialize a node into a fresh buffer.
pub fn encode(node: &TreeNode) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    encode_into(node, &mut out)?;
    Ok(out)
}

/// Append the serialized node to `out`.
pub fn encode_into(node: &TreeNode, out: &mut Vec<u8>) -> CodecResult<()> {
    write_string(out, node.node_type())?;
    write_compressed_int(out, count_to_i32("property count", node.num_properties())?);
    for (name, value) in node.properties() {
        write_string(out, name)?;
        write_variant(out, value)?;
    }
    write_compressed_int(out, count_to_i32("child count", node.children().len())?);
    for child in node.children() {
        encode_into(child, out)?;
    }
    Ok(())
}

pub fn write_compressed_int(out: &mut Vec<u8>, value: i32) {
    if value < 0 {
        out.push(4);
        out.extend_from_slice(&value.to_le_bytes());
        return;
    }

    let num_bytes = match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    };
    out.push(num_bytes as u8);
    out.extend_from_slice(&value.to_le_bytes()[..num_bytes]);
}

pub fn write_string(out: &mut Vec<u8>, s: &str) -> CodecResult<()> {
    if s.as_bytes().contains(&0) {
        return Err(TreeCodecError::InteriorNul);
    }
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    Ok(())
}

pub fn write_variant(out: &mut Vec<u8>, value: &Variant) -> CodecResult<()> {
    match value {
        Variant::Void => write_compressed_int(out, 0),
        Variant::Int32(v) => {
            write_compressed_int(out, 5);
            out.push(TAG_INT32);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Variant::Bool(v) => {
            write_compressed_int(out, 1);
            out.push(if *v { TAG_BOOL_TRUE } else { TAG_BOOL_FALSE });
        }
        Variant::Double(v) => {
            write_compressed_int(out, 9);
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Variant::Int64(v) => {
            write_compressed_int(out, 9);
            out.push(TAG_INT64);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Variant::String(s) => {
            if s.as_bytes().contains(&0) {
                return Err(TreeCodecError::InteriorNul);
            }
            // tag + utf8 + NUL
            write_compressed_int(out, count_to_i32("string", s.len() + 2)?);
            out.push(TAG_STRING);
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        Variant::Binary(bytes) => {
            write_compressed_int(out, count_to_i32("binary", bytes.len() + 1)?);
            out.push(TAG_BINARY);
            out.extend_from_slice(bytes);
        }
    }
    Ok(())
}

fn count_to_i32(what: &'static str, len: usize) -> CodecResult<i32> {
    i32::try_from(len).map_err(|_| TreeCodecError::TooLarge { what, len })
}

// ============================================================================
// Decoding
// ============================================================================

/// Deserialize a node, rejecting nesting deeper than [`DEFAULT_MAX_DEPTH`].
/// Bytes after the root node are ignored.
pub fn decode(data: &[u8]) -> CodecResult<TreeNode> {
    decode_with_max_depth(data, DEFAULT_MAX_DEPTH)
}

pub fn decode_with_max_depth(data: &[u8], max_depth: usize) -> CodecResult<TreeNode> {
    TreeReader::new(data, max_depth).read_node()
}

/// Cursor over serialized tree bytes.
pub struct TreeReader<'a> {
    data: &'a [u8],
    pos: usize,
    max_depth: usize,
}

impl<'a> TreeReader<'a> {
    pub fn new(data: &'a [u8], max_depth: usize) -> Self {
        Self {
            data,
            pos: 0,
            max_depth,
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_node(&mut self) -> CodecResult<TreeNode> {
        self.read_node_at_depth(1)
    }

    fn read_node_at_depth(&mut self, depth: usize) -> CodecResult<TreeNode> {
        if depth > self.max_depth {
            return Err(TreeCodecError::DepthExceeded(self.max_depth));
        }

        let mut node = TreeNode::new(self.read_string()?);

        let num_properties = self.read_count("property count")?;
        for _ in 0..num_properties {
            let name = self.read_string()?;
            let value = self.read_variant()?;
            node.set_property(name, value);
        }

        let num_children = self.read_count("child count")?;
        for _ in 0..num_children {
            let child = self.read_node_at_depth(depth + 1)?;
            node.add_child(child);
        }

        Ok(node)
    }

    /// Accepts the canonical form plus the legacy sign/magnitude form (size
    /// byte `0` for zero, high bit set for a negated magnitude).
    pub fn read_compressed_int(&mut self) -> CodecResult<i32> {
        let size_byte = self.take(1)?[0];
        if size_byte == 0 {
            return Ok(0);
        }

        let num_bytes = usize::from(size_byte & 0x7F);
        if num_bytes > 4 {
            return Err(TreeCodecError::InvalidCompressedInt(size_byte));
        }

        let mut raw = [0u8; 4];
        raw[..num_bytes].copy_from_slice(self.take(num_bytes)?);
        let value = u32::from_le_bytes(raw) as i32;

        if size_byte & 0x80 != 0 {
            Ok(value.wrapping_neg())
        } else {
            Ok(value)
        }
    }

    pub fn read_string(&mut self) -> CodecResult<String> {
        let start = self.pos;
        let rest = &self.data[start..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(TreeCodecError::UnterminatedString(start))?;
        let s = std::str::from_utf8(&rest[..len])
            .map_err(|_| TreeCodecError::InvalidUtf8(start))?
            .to_string();
        self.pos += len + 1;
        Ok(s)
    }

    pub fn read_variant(&mut self) -> CodecResult<Variant> {
        let size = self.read_compressed_int()?;
        if size < 0 {
            return Err(TreeCodecError::NegativeCount {
                what: "variant payload size",
                value: size,
            });
        }
        if size == 0 {
            return Ok(Variant::Void);
        }

        let data_offset = self.pos + 1;
        let payload = self.take(size as usize)?;
        let (tag, data) = (payload[0], &payload[1..]);

        let value = match tag {
            TAG_INT32 => Variant::Int32(i32::from_le_bytes(fixed(tag, data)?)),
            TAG_BOOL_TRUE => Variant::Bool(true),
            TAG_BOOL_FALSE => Variant::Bool(false),
            TAG_DOUBLE => Variant::Double(f64::from_le_bytes(fixed(tag, data)?)),
            TAG_INT64 => Variant::Int64(i64::from_le_bytes(fixed(tag, data)?)),
            TAG_STRING => {
                let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                let s = std::str::from_utf8(&data[..len])
                    .map_err(|_| TreeCodecError::InvalidUtf8(data_offset))?;
                Variant::String(s.to_string())
            }
            TAG_BINARY => Variant::Binary(data.to_vec()),
            TAG_VOID => Variant::Void,
            other => {
                tracing::debug!(
                    "[TreeCodec] Skipping unsupported variant tag {} ({} bytes)",
                    other,
                    data.len()
                );
                Variant::Void
            }
        };
        Ok(value)
    }

    fn read_count(&mut self, what: &'static str) -> CodecResult<usize> {
        let value = self.read_compressed_int()?;
        usize::try_from(value).map_err(|_| TreeCodecError::NegativeCount { what, value })
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let available = self.data.len() - self.pos;
        if len > available {
            return Err(TreeCodecError::UnexpectedEof {
                offset: self.pos,
                needed: len - available,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

fn fixed<const N: usize>(tag: u8, data: &[u8]) -> CodecResult<[u8; N]> {
    data.get(..N)
        .and_then(|s| s.try_into().ok())
        .ok_or(TreeCodecError::TruncatedVariant {
            tag,
            size: data.len() + 1,
        })
}
