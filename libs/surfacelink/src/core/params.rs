// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Parameter values shared between the control thread and readers such as
//! an audio callback.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::tree::{TreeNode, Variant};

/// Node type of parameter trees.
pub const PARAM_NODE_TYPE: &str = "param";

/// Build the tree announcing a parameter change: `param {id, value}`.
pub fn param_tree(id: i32, value: f64) -> TreeNode {
    TreeNode::new(PARAM_NODE_TYPE)
        .with_property("id", Variant::Int32(id))
        .with_property("value", Variant::Double(value))
}

/// Cheaply cloneable handle to one provider's parameter map.
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    values: Arc<RwLock<BTreeMap<i32, f64>>>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: i32, value: f64) {
        self.values.write().insert(id, value);
    }

    pub fn get(&self, id: i32) -> Option<f64> {
        self.values.read().get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Values ordered by id.
    pub fn snapshot(&self) -> Vec<(i32, f64)> {
        self.values.read().iter().map(|(&id, &v)| (id, v)).collect()
    }

    /// Apply a `param` tree. Returns the change, or `None` for any other
    /// tree or one missing a numeric id/value.
    pub fn apply_tree(&self, node: &TreeNode) -> Option<(i32, f64)> {
        if !node.has_type(PARAM_NODE_TYPE) {
            return None;
        }
        let id = node.property("id").and_then(Variant::as_i32)?;
        let value = node.property("value").and_then(Variant::as_f64)?;
        self.set(id, value);
        tracing::trace!("[Provider] Parameter {} = {}", id, value);
        Some((id, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_param_tree() {
        let registry = ParameterRegistry::new();
        assert_eq!(registry.apply_tree(&param_tree(3, 0.75)), Some((3, 0.75)));
        assert_eq!(registry.get(3), Some(0.75));

        let other = TreeNode::new("meter").with_property("id", 3);
        assert_eq!(registry.apply_tree(&other), None);

        let incomplete = TreeNode::new("param").with_property("id", 4);
        assert_eq!(registry.apply_tree(&incomplete), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let registry = ParameterRegistry::new();
        let reader = registry.clone();
        registry.set(2, 0.5);
        registry.set(1, 0.25);
        assert_eq!(reader.snapshot(), vec![(1, 0.25), (2, 0.5)]);
    }
}
