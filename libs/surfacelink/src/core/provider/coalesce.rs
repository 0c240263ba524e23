// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Collapsing of repeated tree messages within one dispatch batch.

use std::collections::HashMap;

use crate::core::protocol::{ChannelEvent, Message};
use crate::core::tree::{TreeNode, Variant};

#[derive(Debug, PartialEq, Eq, Hash)]
enum IdKey {
    Int(i64),
    Text(String),
}

/// Trees with equal keys describe the same piece of state.
#[derive(Debug, PartialEq, Eq, Hash)]
struct TreeKey {
    node_type: String,
    id: Option<IdKey>,
}

impl TreeKey {
    fn of(node: &TreeNode) -> Self {
        let id = match node.property("id") {
            Some(Variant::Int32(v)) => Some(IdKey::Int(i64::from(*v))),
            Some(Variant::Int64(v)) => Some(IdKey::Int(*v)),
            Some(Variant::String(s)) => Some(IdKey::Text(s.clone())),
            _ => None,
        };
        Self {
            node_type: node.node_type().to_string(),
            id,
        }
    }
}

/// Keep only the latest tree per key, at the position of the key's first
/// occurrence. Other events keep their order.
pub(crate) fn coalesce_trees(batch: Vec<ChannelEvent>) -> Vec<ChannelEvent> {
    let mut out: Vec<ChannelEvent> = Vec::with_capacity(batch.len());
    let mut slots: HashMap<TreeKey, usize> = HashMap::new();
    let mut collapsed = 0usize;

    for event in batch {
        if let ChannelEvent::Message(Message::Tree(node)) = &event {
            let key = TreeKey::of(node);
            if let Some(&slot) = slots.get(&key) {
                out[slot] = event;
                collapsed += 1;
                continue;
            }
            slots.insert(key, out.len());
        }
        out.push(event);
    }

    if collapsed > 0 {
        tracing::trace!("[Provider] Coalesced {} tree messages", collapsed);
    }
    out
}
