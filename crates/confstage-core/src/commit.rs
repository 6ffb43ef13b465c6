// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Commit compilation and submission.
//!
//! Compilation runs on a copy of the session's tree and records, so a
//! validation failure or a rejected commit leaves the live session exactly
//! as it was.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::CoreError;
use crate::modification::{ModificationKind, ModificationStore, MoveTransaction, Original};
use crate::mutator;
use crate::node::Node;
use crate::path;
use crate::reorder::{self, Identifier, ReorderItem};
use crate::schema::NodeKind;
use crate::session::Session;
use crate::transport::Transport;
use crate::tree;

/// One resolved modification as sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    /// Record kind.
    #[serde(rename = "type")]
    pub kind: ModificationKind,
    /// Prior value or node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<Original>,
    /// New leaf value (Change).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// The node the entry applies to, fully resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Node>,
    /// Moves to replay in order (Reorder).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<MoveTransaction>>,
}

/// Everything a commit sends, keyed by resolved path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBatch {
    /// Session the batch belongs to.
    pub session: String,
    /// Entries by path.
    pub entries: BTreeMap<String, CommitEntry>,
}

impl CommitBatch {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nothing to send.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `path`.
    pub fn get(&self, path: &str) -> Option<&CommitEntry> {
        self.entries.get(path)
    }
}

/// Moves the key leaves of a list instance to the front, in declared key
/// order. Returns how many were found.
fn sort_keys(list: &mut Node) -> usize {
    let mut placed = 0;
    for key in &list.info.keys {
        let found = list.children[placed..]
            .iter()
            .position(|c| c.info.name == *key && c.info.module == list.info.module);
        if let Some(offset) = found {
            let child = list.children.remove(placed + offset);
            list.children.insert(placed, child);
            placed += 1;
        }
    }
    placed
}

/// Validates a new subtree and derives list predicates from key values.
///
/// Terminal children without a value are pruned unless they are keys. At
/// the top level a list instance's path predicate is rebuilt from its keys
/// and every descendant path follows.
pub fn resolve_keys(node: &mut Node, top: bool) -> Result<(), CoreError> {
    let kind = node.kind();
    if kind == NodeKind::List {
        if node.children.is_empty() {
            return Err(CoreError::MissingKeys {
                path: node.path.clone(),
            });
        }
        let found = sort_keys(node);
        if found != node.info.keys.len() {
            return Err(CoreError::InvalidKeyCount {
                path: node.path.clone(),
                found,
                expected: node.info.keys.len(),
            });
        }
    }
    if kind.is_expandable() {
        let mut i = 0;
        while i < node.children.len() {
            let child = &mut node.children[i];
            if child.kind().is_terminal() {
                if child.value.is_none() {
                    if child.info.key {
                        return Err(CoreError::UnconfirmedKey {
                            path: child.path.clone(),
                        });
                    }
                    warn!(path = %child.path, "pruning node without a confirmed value");
                    node.children.remove(i);
                    continue;
                }
            } else {
                resolve_keys(child, false)?;
            }
            i += 1;
        }
    }
    if kind == NodeKind::List && top {
        let predicate = path::build_predicate(
            node.info
                .keys
                .iter()
                .zip(node.children.iter())
                .map(|(key, child)| (key.as_str(), child.value.as_deref().unwrap_or_default())),
        );
        let old = node.path.clone();
        let resolved = format!("{}{predicate}", path::strip_predicate(&old));
        if resolved != old {
            node.rebase_paths(&old, &resolved);
            debug!(from = %old, to = %resolved, "list instance resolved");
        }
    }
    Ok(())
}

/// Drops Create/Replace records whose leaf never got a value.
fn discard_unconfirmed(root: &mut Node, store: &mut ModificationStore) -> Result<(), CoreError> {
    let targets: Vec<(String, String)> = store
        .iter()
        .filter_map(|(key, r)| r.data.clone().map(|d| (key.clone(), d)))
        .collect();
    for (key, data) in targets {
        match tree::locate(root, &data) {
            None => {
                warn!(path = %key, "dropping record for missing node");
                store.remove(Some(&key));
            }
            Some(location) => {
                let unconfirmed = tree::node_at(root, &location)
                    .is_some_and(|n| n.kind().is_terminal() && n.value.is_none());
                if unconfirmed {
                    warn!(path = %data, "discarding unconfirmed new node");
                    mutator::cancel_at(root, store, &location, true)?;
                }
            }
        }
    }
    Ok(())
}

/// Instances of the ordered collection keyed at `group`, in display order.
fn collection<'a>(root: &'a Node, group: &str) -> Vec<&'a Node> {
    let Some(location) = tree::locate(root, group) else {
        return Vec::new();
    };
    let (Some(parent), Some(probe)) = (
        tree::node_at(root, &location.parent()),
        tree::node_at(root, &location),
    ) else {
        return Vec::new();
    };
    tree::instance_slots(parent, probe)
        .into_iter()
        .filter_map(|slot| tree::child_at(parent, slot))
        .collect()
}

/// Removes deleted instances from every Reorder permutation.
fn compact_reorders(root: &Node, store: &mut ModificationStore) {
    for group in store.paths() {
        let Some(permutation) = store
            .get_mut(&group)
            .filter(|r| r.is(ModificationKind::Reorder))
            .and_then(|r| r.reorder.as_mut())
        else {
            continue;
        };
        let instances = collection(root, &group);
        let mut removed: Vec<usize> = instances
            .iter()
            .enumerate()
            .filter(|(_, n)| n.flags.deleted)
            .filter_map(|(position, _)| permutation.get(position).copied())
            .collect();
        removed.sort_unstable_by(|a, b| b.cmp(a));
        for original in removed {
            reorder::remove_position(permutation, original);
        }
    }
}

/// Resolves every new subtree and re-keys its record.
fn resolve_records(root: &mut Node, store: &mut ModificationStore) -> Result<(), CoreError> {
    let targets: Vec<(String, String)> = store
        .iter()
        .filter(|(_, r)| r.is(ModificationKind::Create) || r.is(ModificationKind::Replace))
        .filter_map(|(key, r)| r.data.clone().map(|d| (key.clone(), d)))
        .collect();
    for (key, data) in targets {
        let location = tree::locate(root, &data).ok_or_else(|| CoreError::NodeNotFound(data.clone()))?;
        let node = tree::node_at_mut(root, &location).ok_or_else(|| CoreError::NodeNotFound(data.clone()))?;
        resolve_keys(node, true)?;
        let resolved = node.path.clone();
        if resolved == key {
            continue;
        }
        if store.has(&resolved, ModificationKind::Delete) {
            // Same key deleted and re-created: the device sees a replace.
            let displaced = store.remove(Some(&resolved)).and_then(|r| r.original);
            if let Some(parent) = tree::node_at_mut(root, &location.parent()) {
                parent.children.retain(|c| !(c.path == resolved && c.flags.deleted));
            }
            store.rename(&key, &resolved);
            if let Some(record) = store.get_mut(&resolved) {
                record.kind = Some(ModificationKind::Replace);
                record.original = displaced;
            }
        } else if store.get(&resolved).is_some() {
            return Err(CoreError::DuplicateInstance(resolved));
        } else {
            store.rename(&key, &resolved);
        }
    }
    Ok(())
}

/// Compiles the moves of every Reorder record.
fn compile_reorders(root: &Node, store: &mut ModificationStore) -> Result<(), CoreError> {
    for group in store.paths() {
        let Some(record) = store
            .get_mut(&group)
            .filter(|r| r.is(ModificationKind::Reorder))
        else {
            continue;
        };
        let items: Vec<ReorderItem> = collection(root, &group)
            .into_iter()
            .map(|node| ReorderItem {
                path: node.path.clone(),
                ident: if node.kind() == NodeKind::List {
                    Identifier::Key(node.qualified_key_predicate())
                } else {
                    Identifier::Value(node.value.clone().unwrap_or_default())
                },
                deleted: node.flags.deleted,
            })
            .collect();
        let permutation = record.reorder.clone().unwrap_or_default();
        let transactions = reorder::compile(&items, &permutation).map_err(|err| {
            warn!(path = %group, %err, "reorder does not match collection");
            CoreError::InvalidPermutation {
                path: group.clone(),
            }
        })?;
        record.transactions = Some(transactions);
    }
    Ok(())
}

/// Validates and resolves the session's staged changes into a batch.
///
/// Nothing in `session` is modified.
pub fn compile_commit(session: &Session) -> Result<CommitBatch, CoreError> {
    let mut root = session.root()?.clone();
    let mut store = session.modifications.clone();

    discard_unconfirmed(&mut root, &mut store)?;
    compact_reorders(&root, &mut store);
    resolve_records(&mut root, &mut store)?;
    compile_reorders(&root, &mut store)?;

    let mut batch = CommitBatch {
        session: session.key.clone(),
        entries: BTreeMap::new(),
    };
    for (path, record) in store.iter() {
        let Some(kind) = record.kind else {
            continue;
        };
        if kind == ModificationKind::Reorder {
            if record.transactions.as_ref().is_none_or(Vec::is_empty) {
                continue;
            }
            batch.entries.insert(
                path.clone(),
                CommitEntry {
                    kind,
                    original: None,
                    value: None,
                    data: None,
                    transactions: record.transactions.clone(),
                },
            );
            continue;
        }
        let lookup = record.data.as_deref().unwrap_or(path);
        batch.entries.insert(
            path.clone(),
            CommitEntry {
                kind,
                original: record.original.clone(),
                value: record.value.clone(),
                data: tree::find_node(&root, lookup).cloned(),
                transactions: None,
            },
        );
    }
    debug!(session = %session.key, entries = batch.len(), "commit compiled");
    Ok(batch)
}

/// Compiles and submits the session's staged changes.
///
/// On success the session's records are cleared. On rejection they are kept
/// and the device's messages are returned verbatim.
#[instrument(skip(session, transport), fields(key = %session.key))]
pub async fn commit<T: Transport>(
    session: &mut Session,
    transport: &T,
) -> Result<CommitBatch, CoreError> {
    let batch = compile_commit(session)?;
    if batch.is_empty() {
        debug!("nothing to commit");
        session.modifications.clear();
        return Ok(batch);
    }
    info!(entries = batch.len(), "submitting commit");
    let reply = transport
        .commit(&session.key, &batch)
        .await
        .map_err(CoreError::TransportFailed)?;
    if reply.success {
        session.modifications.clear();
        info!("commit accepted");
        Ok(batch)
    } else {
        warn!(errors = reply.errors.len(), "commit rejected");
        Err(CoreError::CommitRejected(reply.errors))
    }
}
