// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Mirrored configuration tree nodes.

use serde::{Deserialize, Serialize};

use crate::path;
use crate::schema::{NodeKind, SchemaInfo};

/// Transient per-node state. Every flag defaults to `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFlags {
    /// Created locally, not yet committed.
    pub new: bool,
    /// Marked for deletion; stays in the tree until commit or cancel.
    pub deleted: bool,
    /// Differs from the last known committed state.
    pub dirty: bool,
    /// Canonical representative of its leaf-list instances.
    pub first: bool,
    /// Last among its rendered siblings.
    pub last: bool,
    /// Value editor is open.
    pub editing: bool,
    /// Child creation dialog is open.
    pub creating: bool,
    /// Children were never fetched from the device.
    pub subtree_root: bool,
    /// Cached result of [`Node::has_hidden_child`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_hidden_child: Option<bool>,
}

/// A vertex of a session's mirrored configuration tree.
///
/// `children` holds confirmed nodes (for a new node: everything created under
/// it). `new_children` holds nodes created under a confirmed node and not yet
/// committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Canonical path, unique within the tree.
    pub path: String,
    /// Schema descriptor.
    pub info: SchemaInfo,
    /// Current (staged or confirmed) value of a leaf or leaf-list instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Confirmed children.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
    /// Uncommitted children of a confirmed node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_children: Vec<Node>,
    /// Position among same-schema siblings of a user-ordered collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<usize>,
    /// Pool of schemas still creatable under this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_children: Option<Vec<SchemaInfo>>,
    /// Transient state.
    #[serde(default)]
    pub flags: NodeFlags,
}

impl Node {
    /// Node as received from the device.
    pub fn confirmed(path: impl Into<String>, info: SchemaInfo) -> Self {
        Self {
            path: path.into(),
            info,
            value: None,
            children: Vec::new(),
            new_children: Vec::new(),
            order: None,
            schema_children: None,
            flags: NodeFlags::default(),
        }
    }

    /// Locally created node: `new` and `dirty`.
    pub fn staged(path: impl Into<String>, info: SchemaInfo) -> Self {
        let mut node = Self::confirmed(path, info);
        node.flags.new = true;
        node.flags.dirty = true;
        node
    }

    /// The synthetic `/` root of a session tree.
    pub fn root() -> Self {
        Self::confirmed("/", SchemaInfo::root())
    }

    /// Builder-style value setter.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Builder-style order setter.
    #[must_use]
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = Some(order);
        self
    }

    /// Builder-style child appender.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Shorthand for the node kind.
    pub fn kind(&self) -> NodeKind {
        self.info.kind
    }

    /// Locally created and not yet committed.
    pub fn is_new(&self) -> bool {
        self.flags.new
    }

    /// Direct children in document order: `children`, then `new_children`.
    pub fn all_children(&self) -> impl Iterator<Item = &Self> {
        self.children.iter().chain(self.new_children.iter())
    }

    /// Key leaf children of a list instance, in declared key order.
    ///
    /// Missing keys are skipped.
    pub fn key_leaves(&self) -> Vec<&Self> {
        self.info
            .keys
            .iter()
            .filter_map(|key| {
                self.all_children()
                    .find(|c| c.info.name == *key && c.info.module == self.info.module)
            })
            .collect()
    }

    /// Key predicate of a list instance with module-qualified key names,
    /// e.g. `[if:name='eth0']`.
    ///
    /// The brackets are kept: this string is the `key` attribute of a
    /// `before`/`after` insert, which RFC 7950 (section 7.8.6) defines as a
    /// bracketed key predicate rather than a bare `module:key='value'` list.
    ///
    /// Falls back to the predicate already present in the path when a key
    /// leaf has no confirmed value.
    pub fn qualified_key_predicate(&self) -> String {
        let module = path::module_name(&self.info.module);
        let leaves = self.key_leaves();
        if leaves.len() != self.info.keys.len() || leaves.iter().any(|l| l.value.is_none()) {
            return path::predicate_of(&self.path).to_owned();
        }
        let names: Vec<String> = leaves
            .iter()
            .map(|l| format!("{module}:{}", l.info.name))
            .collect();
        path::build_predicate(
            names
                .iter()
                .zip(leaves.iter())
                .map(|(n, l)| (n.as_str(), l.value.as_deref().unwrap_or_default())),
        )
    }

    /// Whether part of this subtree was never fetched. Cached in
    /// [`NodeFlags::has_hidden_child`] unless `clean` forces recomputation.
    pub fn has_hidden_child(&mut self, clean: bool) -> bool {
        if !clean {
            if let Some(cached) = self.flags.has_hidden_child {
                return cached;
            }
        }
        let hidden = if !self.kind().is_expandable() {
            false
        } else if self.flags.subtree_root {
            true
        } else {
            let mut any = false;
            for child in &mut self.children {
                if child.has_hidden_child(clean) {
                    any = true;
                    break;
                }
            }
            any
        };
        self.flags.has_hidden_child = Some(hidden);
        hidden
    }

    /// Rewrites this node's path and every descendant path from `old` to `new`.
    pub(crate) fn rebase_paths(&mut self, old: &str, new: &str) {
        if let Some(rebased) = path::rebase(&self.path, old, new) {
            self.path = rebased;
        }
        for child in self.children.iter_mut().chain(self.new_children.iter_mut()) {
            child.rebase_paths(old, new);
        }
    }
}
