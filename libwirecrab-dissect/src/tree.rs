use std::ops::Range;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Names given to layers that could not be decoded
pub const UNRESOLVED_NAMES: &[&str] = &["data", "unknown", "raw"];

/// Value of a decoded field, with its position in the frame when known
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_length: Option<usize>,
}

impl FieldValue {
    pub fn new<S: Into<String>>(value: S) -> Self {
        FieldValue {
            value: value.into(),
            byte_offset: None,
            byte_length: None,
        }
    }

    pub fn positioned<S: Into<String>>(value: S, offset: usize, length: usize) -> Self {
        FieldValue {
            value: value.into(),
            byte_offset: Some(offset),
            byte_length: Some(length),
        }
    }

    /// Byte range of the field, if positioned
    pub fn range(&self) -> Option<Range<usize>> {
        let offset = self.byte_offset?;
        Some(offset..offset.saturating_add(self.byte_length.unwrap_or(0)))
    }
}

/// Map of field key (`ip.src`) to value. Insertion order is kept for display.
pub type Fields = IndexMap<String, FieldValue>;

/// One decoded protocol layer, owning the next (inner) layer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolNode {
    pub name: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<Box<ProtocolNode>>,
}

impl ProtocolNode {
    pub fn new<S: Into<String>>(name: S) -> Self {
        ProtocolNode {
            name: name.into(),
            fields: Fields::new(),
            child: None,
        }
    }

    pub fn with_child(mut self, child: ProtocolNode) -> Self {
        self.child = Some(Box::new(child));
        self
    }

    /// Add a field without position. If the key already exists, the first value is kept.
    pub fn add_field<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.fields
            .entry(key.into())
            .or_insert_with(|| FieldValue::new(value));
    }

    /// Add a field located at `offset..offset+length`. If the key already exists, the first
    /// value is kept.
    pub fn add_positioned_field<K: Into<String>, V: Into<String>>(
        &mut self,
        key: K,
        value: V,
        offset: usize,
        length: usize,
    ) {
        self.fields
            .entry(key.into())
            .or_insert_with(|| FieldValue::positioned(value, offset, length));
    }

    /// Get the value of a field
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|f| f.value.as_str())
    }

    /// Return true if this layer was not decoded (sentinel or empty name)
    pub fn is_unresolved(&self) -> bool {
        self.name.is_empty() || UNRESOLVED_NAMES.contains(&self.name.as_str())
    }

    /// Byte range covered by the positioned fields of this node
    pub fn span(&self) -> Option<Range<usize>> {
        self.fields
            .values()
            .filter_map(FieldValue::range)
            .reduce(|a, b| a.start.min(b.start)..a.end.max(b.end))
    }

    /// Iterate over this node and all its descendants, outermost first
    pub fn iter(&self) -> NodeIter<'_> {
        NodeIter { next: Some(self) }
    }

    /// Number of layers in the tree rooted at this node
    pub fn depth(&self) -> usize {
        self.iter().count()
    }

    /// Find the first layer with the given name
    pub fn find(&self, name: &str) -> Option<&ProtocolNode> {
        self.iter().find(|n| n.name == name)
    }

    /// Innermost layer
    pub fn leaf(&self) -> &ProtocolNode {
        let mut node = self;
        while let Some(child) = node.child.as_deref() {
            node = child;
        }
        node
    }

    /// Names of all layers, separated by `:` (as in the `frame.protocols` column)
    pub fn protocols(&self) -> String {
        self.iter()
            .map(|n| n.name.as_str())
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Iterator over the layers of a protocol tree
pub struct NodeIter<'a> {
    next: Option<&'a ProtocolNode>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = &'a ProtocolNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        self.next = node.child.as_deref();
        Some(node)
    }
}
