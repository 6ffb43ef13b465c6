// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Staged modification records keyed by node path.
//!
//! # Invariants
//! - At most one record per path.
//! - No record without a [`ModificationKind`] survives a mutation.
//! - An empty store drops its map, so "anything pending?" is
//!   [`ModificationStore::is_empty`], not a count.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::node::Node;

/// What a record stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationKind {
    /// New node.
    Create,
    /// New leaf value.
    Change,
    /// Node removal.
    Delete,
    /// Deleted node re-created at the same path.
    Replace,
    /// Permutation of a user-ordered collection.
    Reorder,
}

/// Prior state captured by a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Original {
    /// Prior leaf value.
    Value(Option<String>),
    /// Snapshot of the prior node.
    Node(Box<Node>),
}

/// Where a move transaction puts the moved instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertPosition {
    /// Head of the collection.
    First,
    /// Tail of the collection.
    Last,
    /// Before the referenced neighbour.
    Before,
    /// After the referenced neighbour.
    After,
}

/// One primitive move of an ordered-collection instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveTransaction {
    /// Path of the moved instance.
    pub node: String,
    /// Placement.
    pub insert: InsertPosition,
    /// Neighbour value (leaf-list members).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Neighbour key predicate (list members).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// A pending, uncommitted change to one path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationRecord {
    /// Record kind; `None` only transiently while a record is being built.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ModificationKind>,
    /// Prior value or node (Change, Delete).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<Original>,
    /// New leaf value (Change).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Path of the node being created or replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// `reorder[new_position] = original_position` (Reorder).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reorder: Option<Vec<usize>>,
    /// Compiled moves, filled in at commit time (Reorder).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<MoveTransaction>>,
}

impl ModificationRecord {
    /// Record of the given kind with no payload.
    pub fn of(kind: ModificationKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Carries an actionable kind.
    pub fn is_actionable(&self) -> bool {
        self.kind.is_some()
    }

    /// True for the given kind.
    pub fn is(&self, kind: ModificationKind) -> bool {
        self.kind == Some(kind)
    }
}

/// Path-keyed store of modification records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModificationStore {
    records: Option<BTreeMap<String, ModificationRecord>>,
}

impl ModificationStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Nothing pending.
    pub fn is_empty(&self) -> bool {
        self.records.is_none()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.as_ref().map_or(0, BTreeMap::len)
    }

    /// Returns the record at `path`, inserting an empty one if needed.
    ///
    /// A caller that leaves the returned record without a kind must call
    /// [`ModificationStore::remove`] before returning.
    pub fn create(&mut self, path: &str) -> &mut ModificationRecord {
        self.records
            .get_or_insert_with(BTreeMap::new)
            .entry(path.to_owned())
            .or_default()
    }

    /// Record at `path`.
    pub fn get(&self, path: &str) -> Option<&ModificationRecord> {
        self.records.as_ref()?.get(path)
    }

    /// Mutable record at `path`.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut ModificationRecord> {
        self.records.as_mut()?.get_mut(path)
    }

    /// True if a record of `kind` exists at `path`.
    pub fn has(&self, path: &str, kind: ModificationKind) -> bool {
        self.get(path).is_some_and(|r| r.is(kind))
    }

    /// Removes the record at `path` (when given) and drops the map once it is
    /// empty. Returns the removed record.
    pub fn remove(&mut self, path: Option<&str>) -> Option<ModificationRecord> {
        let records = self.records.as_mut()?;
        let removed = path.and_then(|p| records.remove(p));
        if records.is_empty() {
            self.records = None;
        }
        removed
    }

    /// Moves the record at `old` to `new` without touching its contents,
    /// except that a `data` reference to `old` follows the move.
    ///
    /// Returns `false` when there is no record at `old`.
    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        if old == new {
            return self.get(old).is_some();
        }
        let Some(records) = self.records.as_mut() else {
            return false;
        };
        let Some(mut record) = records.remove(old) else {
            return false;
        };
        if record.data.as_deref() == Some(old) {
            record.data = Some(new.to_owned());
        }
        records.insert(new.to_owned(), record);
        true
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.records = None;
    }

    /// Records in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModificationRecord)> {
        self.records.iter().flat_map(|r| r.iter())
    }

    /// Paths of all records, in path order.
    pub fn paths(&self) -> Vec<String> {
        self.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Removes a kind-less record at `path` left over by a mutation.
    pub fn discard_if_empty(&mut self, path: &str) {
        if self.get(path).is_some_and(|r| !r.is_actionable()) {
            self.remove(Some(path));
        }
    }

    /// Checks the store invariants; returns the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        let Some(records) = &self.records else {
            return Ok(());
        };
        if records.is_empty() {
            return Err("empty record map is kept alive".to_owned());
        }
        for (path, record) in records {
            let Some(kind) = record.kind else {
                return Err(format!("record without a kind at {path}"));
            };
            if kind == ModificationKind::Reorder && record.reorder.is_none() {
                return Err(format!("reorder record without a permutation at {path}"));
            }
        }
        Ok(())
    }
}
