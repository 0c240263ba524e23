// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Hierarchical key/value trees exchanged with the UI process.

mod codec;
mod node;
mod variant;

pub use codec::{
    decode, decode_with_max_depth, encode, encode_into, write_compressed_int, write_string,
    write_variant, TreeCodecError, TreeReader, DEFAULT_MAX_DEPTH,
};
pub use node::TreeNode;
pub use variant::Variant;
