// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema descriptors attached to every mirrored node.

use serde::{Deserialize, Serialize};

use crate::node::Node;

/// Kind of a schema node.
///
/// The wire encoding is a bit value: Container `1`, Leaf `4`, LeafList `8`,
/// List `16`. Repeatable kinds are exactly those matching `bits & 0x18`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Non-repeatable structural node.
    Container,
    /// Single scalar value.
    Leaf,
    /// Repeatable scalar value, instances identified by value.
    LeafList,
    /// Repeatable structural node, instances identified by key leaves.
    List,
}

/// Bit mask selecting repeatable kinds.
pub const REPEATABLE_MASK: u8 = 0x18;

impl NodeKind {
    /// Wire bit value of this kind.
    pub const fn bits(self) -> u8 {
        match self {
            Self::Container => 1,
            Self::Leaf => 4,
            Self::LeafList => 8,
            Self::List => 16,
        }
    }

    /// Decodes a wire bit value.
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(Self::Container),
            4 => Some(Self::Leaf),
            8 => Some(Self::LeafList),
            16 => Some(Self::List),
            _ => None,
        }
    }

    /// Lists and leaf-lists may be instantiated many times.
    pub const fn is_repeatable(self) -> bool {
        self.bits() & REPEATABLE_MASK != 0
    }

    /// Containers and lists hold children.
    pub const fn is_expandable(self) -> bool {
        matches!(self, Self::Container | Self::List)
    }

    /// Leaves and leaf-lists carry a value.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Leaf | Self::LeafList)
    }
}

/// Immutable schema descriptor of a node (plus a lazily cached value set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    /// Node kind.
    pub kind: NodeKind,
    /// Owning module (may carry a `@revision` suffix).
    pub module: String,
    /// Schema node name.
    pub name: String,
    /// Schema path used when asking the backend about this node.
    #[serde(default)]
    pub path: String,
    /// Configuration (writable) node.
    #[serde(default = "default_true")]
    pub config: bool,
    /// Key leaf of its parent list.
    #[serde(default)]
    pub key: bool,
    /// User-ordered list or leaf-list.
    #[serde(default)]
    pub ordered: bool,
    /// Key leaf names in declared order (lists only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    /// Base datatype name (`string`, `boolean`, `enumeration`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype_base: Option<String>,
    /// Schema default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Legal value set, cached once fetched (`bits`, `enumeration`, `boolean`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

impl SchemaInfo {
    /// Descriptor with defaults for every optional attribute.
    pub fn new(kind: NodeKind, module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            module: module.into(),
            name: name.into(),
            path: String::new(),
            config: true,
            key: false,
            ordered: false,
            keys: Vec::new(),
            datatype_base: None,
            default: None,
            values: None,
        }
    }

    /// Descriptor of the synthetic `/` root.
    pub fn root() -> Self {
        let mut info = Self::new(NodeKind::Container, "", "");
        info.path = "/".to_owned();
        info
    }

    /// Same schema node (module and name match).
    pub fn same_schema(&self, other: &Self) -> bool {
        self.name == other.name && self.module == other.module
    }

    fn datatype_is(&self, base: &str) -> bool {
        self.datatype_base.as_deref() == Some(base)
    }

    /// `empty`-typed leaves carry no value.
    pub fn is_empty_type(&self) -> bool {
        self.datatype_is("empty")
    }
}

/// How the legal value set of a terminal node is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Already known (cached or free-form).
    Ready,
    /// Static `{true, false}`.
    Boolean,
    /// Must be fetched from the backend (`bits`, `enumeration`).
    Fetch,
}

impl SchemaInfo {
    /// Determines how this node's value set becomes available.
    pub fn value_source(&self) -> ValueSource {
        if self.values.is_some() {
            return ValueSource::Ready;
        }
        match self.datatype_base.as_deref() {
            Some("bits" | "enumeration") => ValueSource::Fetch,
            Some("boolean") => ValueSource::Boolean,
            _ => ValueSource::Ready,
        }
    }
}

/// Drops schemas that cannot be instantiated under `parent`.
///
/// Read-only schemas are removed. Non-repeatable schemas are removed when an
/// instance already exists among the parent's `children` or `new_children`;
/// instances marked deleted do not count, so a deleted node can be replaced.
/// Lists and leaf-lists are never filtered by instantiation.
pub fn filter_creatable(parent: &Node, schemas: &mut Vec<SchemaInfo>) {
    schemas.retain(|schema| {
        if schema.kind.is_repeatable() {
            return true;
        }
        if !schema.config {
            return false;
        }
        !parent
            .children
            .iter()
            .chain(parent.new_children.iter())
            .any(|item| !item.flags.deleted && item.info.same_schema(schema))
    });
}
