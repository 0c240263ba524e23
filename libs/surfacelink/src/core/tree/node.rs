// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::Variant;

/// Named node with ordered, uniquely-named properties and ordered children.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TreeNode {
    node_type: String,
    properties: Vec<(String, Variant)>,
    children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder form of [`set_property`](Self::set_property).
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.set_property(name, value);
        self
    }

    /// Builder form of [`add_child`](Self::add_child).
    pub fn with_child(mut self, child: TreeNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn has_type(&self, node_type: &str) -> bool {
        self.node_type == node_type
    }

    /// Set a property. An existing property keeps its position; a new one is
    /// appended.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Variant>) {
        let name = name.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.properties.push((name, value)),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Variant> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Variant> {
        let index = self.properties.iter().position(|(n, _)| n == name)?;
        Some(self.properties.remove(index).1)
    }

    /// Properties in insertion order.
    pub fn properties(&self) -> impl ExactSizeIterator<Item = (&str, &Variant)> {
        self.properties.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn num_properties(&self) -> usize {
        self.properties.len()
    }

    pub fn add_child(&mut self, child: TreeNode) {
        self.children.push(child);
    }

    pub fn children(&self) -> &[TreeNode] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<TreeNode> {
        &mut self.children
    }

    /// First direct child with the given type.
    pub fn child_with_type(&self, node_type: &str) -> Option<&TreeNode> {
        self.children.iter().find(|c| c.has_type(node_type))
    }

    /// Depth of the deepest node, counting this node as 1.
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(TreeNode::depth).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_order_and_uniqueness() {
        let mut node = TreeNode::new("param")
            .with_property("id", 3)
            .with_property("value", 0.25);
        node.set_property("label", "gain");
        node.set_property("id", 4);

        let names: Vec<&str> = node.properties().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["id", "value", "label"]);
        assert_eq!(node.property("id"), Some(&Variant::Int32(4)));
        assert_eq!(node.num_properties(), 3);
    }

    #[test]
    fn test_remove_property() {
        let mut node = TreeNode::new("x").with_property("a", 1).with_property("b", 2);
        assert_eq!(node.remove_property("a"), Some(Variant::Int32(1)));
        assert_eq!(node.remove_property("a"), None);
        assert_eq!(node.properties().next().map(|(n, _)| n), Some("b"));
    }

    #[test]
    fn test_children_and_depth() {
        let node = TreeNode::new("root")
            .with_child(TreeNode::new("a").with_child(TreeNode::new("leaf")))
            .with_child(TreeNode::new("b"));
        assert_eq!(node.depth(), 3);
        assert_eq!(node.child_with_type("b").map(TreeNode::node_type), Some("b"));
        assert!(node.child_with_type("leaf").is_none());
    }

    #[test]
    fn test_children_mut_edits_in_place() {
        let mut node = TreeNode::new("root").with_child(TreeNode::new("a"));
        node.children_mut().push(TreeNode::new("b"));
        node.children_mut().retain(|c| c.node_type() != "a");
        assert_eq!(node.children().len(), 1);
        assert!(node.child_with_type("b").is_some());
    }
}
