// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! User-facing tree edits.
//!
//! Every operation keeps three things consistent: the node state in the
//! session tree, the session's [`ModificationStore`], and the derived
//! `first`/`last`/`dirty` markers.
//!
//! Operations that need the backend do not await it. They return a request
//! describing the fetch, leave the node in a safe state, and expect the
//! caller to hand the result back through [`finish_editing`] or
//! [`finish_child_schemas`]. A result for a node that is gone by then is
//! reported as [`Completion::Stale`] and otherwise ignored.

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::modification::{ModificationKind, ModificationRecord, ModificationStore, Original};
use crate::node::Node;
use crate::path;
use crate::reorder;
use crate::schema::{self, NodeKind, SchemaInfo, ValueSource};
use crate::session::Session;
use crate::transport::TransportError;
use crate::tree::{self, Location, Slot};

/// A backend lookup the caller has to perform on behalf of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRequest {
    /// Node waiting for the result.
    pub path: String,
    /// Schema path to query.
    pub schema_path: String,
}

impl SchemaRequest {
    fn for_node(node: &Node) -> Self {
        Self {
            path: node.path.clone(),
            schema_path: node.info.path.clone(),
        }
    }
}

/// Result of enabling the value editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditReadiness {
    /// Editor state is final.
    Ready,
    /// Legal values must be fetched first; the node is not editable yet.
    NeedsValues(SchemaRequest),
}

/// Follow-up fetch required by a freshly created node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingFetch {
    /// Child schemas of a new container or list.
    ChildSchemas(SchemaRequest),
    /// Legal values of a new leaf or leaf-list instance.
    SchemaValues(SchemaRequest),
}

/// Result of [`create_child`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    /// Path of the new node.
    pub path: String,
    /// Fetch to perform before the node is complete.
    pub pending: Option<PendingFetch>,
}

/// Outcome of handing a fetch result back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The result was applied. Value sets still to fetch for auto-created
    /// key leaves are listed.
    Applied(Vec<SchemaRequest>),
    /// The node is gone; nothing was changed.
    Stale,
}

/// Why a creation dialog is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The user dismissed it.
    Abort,
    /// The pool of creatable schemas is exhausted.
    Success,
}

fn locate(root: &Node, path: &str) -> Result<Location, CoreError> {
    tree::locate(root, path).ok_or_else(|| CoreError::NodeNotFound(path.to_owned()))
}

fn at<'a>(root: &'a Node, location: &Location) -> Result<&'a Node, CoreError> {
    tree::node_at(root, location).ok_or_else(|| CoreError::NodeNotFound(format!("{location:?}")))
}

fn at_mut<'a>(root: &'a mut Node, location: &Location) -> Result<&'a mut Node, CoreError> {
    tree::node_at_mut(root, location)
        .ok_or_else(|| CoreError::NodeNotFound(format!("{location:?}")))
}

/// Node state worth keeping in a record: transient flags dropped.
fn snapshot(node: &Node) -> Node {
    let mut copy = node.clone();
    copy.flags.deleted = false;
    copy.flags.dirty = false;
    copy.flags.editing = false;
    copy.flags.creating = false;
    copy
}

/// Enables the editor on `node` as far as possible without the backend.
fn begin_edit(node: &mut Node) -> Option<SchemaRequest> {
    if node.info.is_empty_type() {
        node.value = Some(String::new());
        node.flags.editing = false;
        return None;
    }
    match node.info.value_source() {
        ValueSource::Ready => {}
        ValueSource::Boolean => {
            node.info.values = Some(vec!["true".to_owned(), "false".to_owned()]);
        }
        ValueSource::Fetch => {
            node.flags.editing = false;
            return Some(SchemaRequest::for_node(node));
        }
    }
    node.flags.editing = true;
    None
}

/// Marks the final rendered child of `node` as `last` (or clears it).
fn mark_final_child(node: &mut Node, last: bool) {
    let final_child = if node.new_children.is_empty() {
        node.children.last_mut()
    } else {
        node.new_children.last_mut()
    };
    if let Some(child) = final_child {
        child.flags.last = last;
    }
}

fn open_pool(node: &mut Node, schemas: Vec<SchemaInfo>) {
    if !schemas.is_empty() {
        mark_final_child(node, false);
    }
    node.schema_children = Some(schemas);
    node.flags.creating = true;
}

fn close_pool(node: &mut Node, reason: CloseReason) {
    if reason == CloseReason::Abort && node.schema_children.as_ref().is_some_and(|p| !p.is_empty()) {
        mark_final_child(node, true);
    }
    node.schema_children = None;
    node.flags.creating = false;
}

/// Enables or disables the value editor of the node at `path`.
///
/// `empty`-typed leaves get the value `""` and no editor. `boolean` leaves
/// get the static value set. `bits`/`enumeration` leaves without a cached
/// value set stay non-editable until [`finish_editing`] delivers it.
pub fn set_editing(
    session: &mut Session,
    path: &str,
    enabling: bool,
) -> Result<EditReadiness, CoreError> {
    let (root, _) = session.split()?;
    let location = locate(root, path)?;
    let node = at_mut(root, &location)?;
    if !enabling {
        node.flags.editing = false;
        return Ok(EditReadiness::Ready);
    }
    if node.flags.deleted {
        return Err(CoreError::NodeDeleted(node.path.clone()));
    }
    Ok(match begin_edit(node) {
        Some(request) => EditReadiness::NeedsValues(request),
        None => EditReadiness::Ready,
    })
}

/// Applies a fetched value set and opens the editor.
///
/// On a fetch error the node stays non-editable and the error is returned
/// as [`CoreError::SchemaFetchFailed`].
pub fn finish_editing(
    session: &mut Session,
    request: &SchemaRequest,
    result: Result<Vec<String>, TransportError>,
) -> Result<Completion, CoreError> {
    let Some(node) = session
        .data
        .as_mut()
        .and_then(|root| tree::find_node_mut(root, &request.path))
        .filter(|node| !node.flags.deleted)
    else {
        warn!(path = %request.path, "value set arrived for a node that is gone");
        return Ok(Completion::Stale);
    };
    match result {
        Ok(values) => {
            node.info.values = Some(values);
            node.flags.editing = true;
            Ok(Completion::Applied(Vec::new()))
        }
        Err(err) => {
            node.flags.editing = false;
            Err(CoreError::SchemaFetchFailed(err))
        }
    }
}

/// Sets the value of the node at `path`, staging a change where needed.
///
/// Confirmed nodes get a Change record, which is removed again when the
/// value returns to the original. New leaf-list instances take their value
/// as identity: the path predicate becomes `[.='value']` and a record keyed
/// on the old path follows. Other new nodes, key leaves of new list
/// instances included, only store the value.
pub fn change_value(session: &mut Session, path: &str, value: &str) -> Result<(), CoreError> {
    let (root, store) = session.split()?;
    let location = locate(root, path)?;
    let node = at(root, &location)?;
    if node.flags.deleted {
        return Err(CoreError::NodeDeleted(node.path.clone()));
    }
    if node.is_new() {
        if node.kind() == NodeKind::LeafList {
            return rename_leaf_list(root, store, &location, value);
        }
        let node = at_mut(root, &location)?;
        node.value = Some(value.to_owned());
        node.flags.editing = false;
        debug!(path = %node.path, key = node.info.key, "value of new node set");
        return Ok(());
    }

    let node = at_mut(root, &location)?;
    let node_path = node.path.clone();
    match store.get(&node_path).and_then(|r| r.kind) {
        None => {
            if node.value.as_deref() == Some(value) {
                store.discard_if_empty(&node_path);
                node.flags.editing = false;
                return Ok(());
            }
            let record = store.create(&node_path);
            record.kind = Some(ModificationKind::Change);
            record.original = Some(Original::Value(node.value.clone()));
            record.value = Some(value.to_owned());
            node.flags.dirty = true;
            debug!(path = %node_path, "change staged");
        }
        Some(ModificationKind::Change) => {
            let reverts = store.get(&node_path).is_some_and(|r| {
                matches!(&r.original, Some(Original::Value(o)) if o.as_deref() == Some(value))
            });
            if reverts {
                store.remove(Some(&node_path));
                node.flags.dirty = false;
                debug!(path = %node_path, "change reverted");
            } else if let Some(record) = store.get_mut(&node_path) {
                record.value = Some(value.to_owned());
                node.flags.dirty = true;
                debug!(path = %node_path, "change updated");
            }
        }
        Some(ModificationKind::Delete) => return Err(CoreError::NodeDeleted(node_path)),
        Some(_) => {}
    }
    node.value = Some(value.to_owned());
    node.flags.editing = false;
    Ok(())
}

fn rename_leaf_list(
    root: &mut Node,
    store: &mut ModificationStore,
    location: &Location,
    value: &str,
) -> Result<(), CoreError> {
    let parent = at(root, &location.parent())?;
    let old = at(root, location)?.path.clone();
    let renamed = format!(
        "{}{}",
        path::strip_predicate(&old),
        path::leaf_list_predicate(value)
    );
    if renamed != old && parent.all_children().any(|c| c.path == renamed) {
        return Err(CoreError::DuplicateInstance(renamed));
    }
    let parent_new = parent.is_new();
    let node = at_mut(root, location)?;
    node.value = Some(value.to_owned());
    node.flags.editing = false;
    node.rebase_paths(&old, &renamed);
    if !parent_new {
        store.rename(&old, &renamed);
    }
    debug!(from = %old, to = %renamed, "leaf-list instance renamed");
    Ok(())
}

/// Detaches a new node, undoing everything its creation staged.
///
/// Ordered siblings are renumbered and the collection's permutation loses
/// the entry. The schema goes back to the parent's pool if that pool is
/// open, and the `first`/`last` markers move to a neighbour. Returns the
/// node and the record that was keyed on it.
fn detach_new(
    root: &mut Node,
    store: &mut ModificationStore,
    location: &Location,
) -> Result<(Node, Option<ModificationRecord>), CoreError> {
    let slot = location
        .slot()
        .ok_or_else(|| CoreError::NodeNotFound("/".to_owned()))?;
    let parent = at_mut(root, &location.parent())?;
    let parent_new = parent.is_new();
    let (info, order, node_path) = {
        let node = tree::child_at(parent, slot)
            .ok_or_else(|| CoreError::NodeNotFound(format!("{location:?}")))?;
        (node.info.clone(), node.order, node.path.clone())
    };

    if let (true, Some(removed)) = (info.ordered, order) {
        for sibling in parent.children.iter_mut().chain(parent.new_children.iter_mut()) {
            if sibling.info.same_schema(&info) {
                if let Some(o) = sibling.order.as_mut() {
                    if *o > removed {
                        *o -= 1;
                    }
                }
            }
        }
        let group = path::strip_predicate(&node_path);
        let mut identity = false;
        if let Some(permutation) = store
            .get_mut(group)
            .filter(|r| r.is(ModificationKind::Reorder))
            .and_then(|r| r.reorder.as_mut())
        {
            if let Some(&original) = permutation.get(removed) {
                reorder::remove_position(permutation, original);
            }
            identity = reorder::is_identity(permutation);
        }
        if identity {
            store.remove(Some(group));
        }
    }

    let detached = tree::detach(parent, slot)
        .ok_or_else(|| CoreError::NodeNotFound(node_path.clone()))?;

    if detached.flags.first {
        if let Some(next) = tree::instance_slots(parent, &detached).first().copied() {
            if let Some(node) = tree::child_at_mut(parent, next) {
                node.flags.first = true;
            }
        }
    }
    if detached.flags.last {
        let previous = match slot {
            Slot::Child(i) if i > 0 => parent.children.get_mut(i - 1),
            Slot::New(i) if i > 0 => parent.new_children.get_mut(i - 1),
            Slot::New(_) => parent.children.last_mut(),
            Slot::Child(_) => None,
        };
        if let Some(node) = previous {
            node.flags.last = true;
        }
    }
    if matches!(info.kind, NodeKind::Container | NodeKind::Leaf) {
        if let Some(pool) = parent.schema_children.as_mut() {
            if !pool.iter().any(|s| s.same_schema(&info)) {
                pool.push(info);
            }
        }
    }

    let record = if parent_new {
        None
    } else {
        store.remove(Some(&node_path))
    };
    debug!(path = %node_path, "new node detached");
    Ok((detached, record))
}

/// Puts the node a Replace record displaced back into the tree.
fn restore_replaced(
    root: &mut Node,
    store: &mut ModificationStore,
    parent: &Location,
    path: &str,
    record: ModificationRecord,
    keep_deleted: bool,
) -> Result<(), CoreError> {
    let Some(Original::Node(original)) = record.original else {
        return Ok(());
    };
    let mut node = *original;
    if keep_deleted {
        let staged = store.create(path);
        staged.kind = Some(ModificationKind::Delete);
        staged.original = Some(Original::Node(Box::new(node.clone())));
        node.flags.deleted = true;
        node.flags.dirty = true;
    }
    let children = &mut at_mut(root, parent)?.children;
    children.push(node);
    tree::set_last(children);
    Ok(())
}

/// Deletes the node at `path`.
///
/// New nodes are detached and leave no trace. Confirmed nodes stay in the
/// tree marked `deleted` and get a Delete record whose `original` is the
/// node as last confirmed; a pending Change is folded into it.
pub fn delete_node(session: &mut Session, path: &str) -> Result<(), CoreError> {
    let (root, store) = session.split()?;
    let location = locate(root, path)?;
    if location.is_root() {
        return Err(CoreError::NodeNotFound(path.to_owned()));
    }
    if at(root, &location)?.is_new() {
        let (node, record) = detach_new(root, store, &location)?;
        if let Some(record) = record.filter(|r| r.is(ModificationKind::Replace)) {
            restore_replaced(root, store, &location.parent(), &node.path, record, true)?;
        }
        return Ok(());
    }

    let node = at_mut(root, &location)?;
    let node_path = node.path.clone();
    match store.get(&node_path).and_then(|r| r.kind) {
        Some(ModificationKind::Delete) => return Ok(()),
        Some(ModificationKind::Change) => {
            let record = store.create(&node_path);
            if let Some(Original::Value(original)) = record.original.take() {
                node.value = original;
            }
            record.value = None;
            record.kind = Some(ModificationKind::Delete);
            record.original = Some(Original::Node(Box::new(snapshot(node))));
        }
        _ => {
            let record = store.create(&node_path);
            record.kind = Some(ModificationKind::Delete);
            record.original = Some(Original::Node(Box::new(snapshot(node))));
        }
    }
    node.flags.deleted = true;
    node.flags.dirty = true;
    node.flags.editing = false;
    debug!(path = %node_path, "delete staged");
    Ok(())
}

/// Opens the creation dialog of the node at `path` with the given pool.
pub fn open_creation(
    session: &mut Session,
    path: &str,
    schemas: Vec<SchemaInfo>,
) -> Result<(), CoreError> {
    let (root, _) = session.split()?;
    let location = locate(root, path)?;
    open_pool(at_mut(root, &location)?, schemas);
    Ok(())
}

/// Closes the creation dialog of the node at `path`.
///
/// An aborted dialog with schemas left hands the `last` marker back to the
/// final child.
pub fn close_creation(session: &mut Session, path: &str, reason: CloseReason) -> Result<(), CoreError> {
    let (root, _) = session.split()?;
    let location = locate(root, path)?;
    close_pool(at_mut(root, &location)?, reason);
    Ok(())
}

/// Instantiates `parent.schema_children[index]` under the node at
/// `parent_path`.
///
/// Containers and leaves consume their schema; leaf-lists and lists stay
/// creatable and get a provisional positional predicate. A Create record is
/// staged when the parent is confirmed, or a Delete at the same path is
/// upgraded to Replace.
pub fn create_child(
    session: &mut Session,
    parent_path: &str,
    index: usize,
) -> Result<CreateOutcome, CoreError> {
    let (root, store) = session.split()?;
    let parent_location = locate(root, parent_path)?;
    let parent = at_mut(root, &parent_location)?;
    let schema = parent
        .schema_children
        .as_ref()
        .ok_or_else(|| CoreError::NotCreating(parent.path.clone()))?
        .get(index)
        .cloned()
        .ok_or_else(|| CoreError::SchemaIndexOutOfRange {
            path: parent.path.clone(),
            index,
        })?;
    let parent_new = parent.is_new();
    let base = path::join(
        &parent.path,
        &path::segment_name(&parent.info.module, &schema.module, &schema.name),
    );
    let mut node = Node::staged(base.clone(), schema.clone());

    let pending = match schema.kind {
        NodeKind::Container | NodeKind::Leaf => {
            if let Some(pool) = parent.schema_children.as_mut() {
                pool.remove(index);
            }
            if schema.kind == NodeKind::Container {
                Some(PendingFetch::ChildSchemas(SchemaRequest::for_node(&node)))
            } else {
                node.value.clone_from(&schema.default);
                begin_edit(&mut node).map(PendingFetch::SchemaValues)
            }
        }
        NodeKind::LeafList | NodeKind::List => {
            let count = parent
                .all_children()
                .filter(|c| c.info.same_schema(&schema))
                .count();
            if schema.kind == NodeKind::LeafList && count == 0 {
                node.flags.first = true;
            }
            if schema.ordered {
                node.order = Some(count);
                if !parent_new {
                    if let Some(permutation) = store
                        .get_mut(&base)
                        .filter(|r| r.is(ModificationKind::Reorder))
                        .and_then(|r| r.reorder.as_mut())
                    {
                        permutation.push(permutation.len());
                    }
                }
            }
            let search = if parent_new {
                &parent.children
            } else {
                &parent.new_children
            };
            let position = search
                .iter()
                .filter_map(|s| path::positional_index(&s.path, &base))
                .fold(1, |pos, n| if n >= pos { n + 1 } else { pos });
            node.path = format!("{base}[{position}]");
            if schema.kind == NodeKind::List {
                Some(PendingFetch::ChildSchemas(SchemaRequest::for_node(&node)))
            } else {
                begin_edit(&mut node).map(PendingFetch::SchemaValues)
            }
        }
    };

    let new_path = node.path.clone();
    let exhausted = parent.schema_children.as_ref().is_some_and(Vec::is_empty);
    if exhausted {
        node.flags.last = true;
    }
    if parent_new {
        parent.children.push(node);
    } else {
        parent.new_children.push(node);
    }
    if exhausted {
        close_pool(parent, CloseReason::Success);
    }

    if !parent_new {
        let replaces = store.has(&new_path, ModificationKind::Delete);
        if replaces {
            parent
                .children
                .retain(|c| !(c.path == new_path && c.flags.deleted));
        }
        let record = store.create(&new_path);
        record.kind = Some(if replaces {
            ModificationKind::Replace
        } else {
            ModificationKind::Create
        });
        record.data = Some(new_path.clone());
        debug!(path = %new_path, replaces, "creation staged");
    } else {
        debug!(path = %new_path, "node created under new parent");
    }
    Ok(CreateOutcome {
        path: new_path,
        pending,
    })
}

/// Applies fetched child schemas to the node at `request.path` and opens its
/// creation dialog.
///
/// For a new list instance every key schema is instantiated right away as
/// an editable leaf and removed from the pool.
pub fn finish_child_schemas(
    session: &mut Session,
    request: &SchemaRequest,
    result: Result<Vec<SchemaInfo>, TransportError>,
) -> Result<Completion, CoreError> {
    let Some(node) = session
        .data
        .as_mut()
        .and_then(|root| tree::find_node_mut(root, &request.path))
        .filter(|node| !node.flags.deleted)
    else {
        warn!(path = %request.path, "child schemas arrived for a node that is gone");
        return Ok(Completion::Stale);
    };
    let mut schemas = result.map_err(CoreError::SchemaFetchFailed)?;
    schema::filter_creatable(node, &mut schemas);
    open_pool(node, schemas);

    let mut pending = Vec::new();
    let needs_keys = node.is_new()
        && node.kind() == NodeKind::List
        && !node.children.iter().any(|c| c.info.key);
    if needs_keys {
        let mut i = 0;
        while let Some(info) = node.schema_children.as_ref().and_then(|p| p.get(i)).cloned() {
            if !info.key {
                i += 1;
                continue;
            }
            if let Some(pool) = node.schema_children.as_mut() {
                pool.remove(i);
            }
            let key_path = path::join(
                &node.path,
                &path::segment_name(&node.info.module, &info.module, &info.name),
            );
            let mut key = Node::staged(key_path, info);
            pending.extend(begin_edit(&mut key));
            node.children.push(key);
            if node.schema_children.as_ref().is_some_and(Vec::is_empty) {
                if let Some(last) = node.children.last_mut() {
                    last.flags.last = true;
                }
                close_pool(node, CloseReason::Success);
                break;
            }
        }
    }
    Ok(Completion::Applied(pending))
}

/// Moves an ordered instance from display position `from` to `to`.
///
/// Every instance's `order` is renumbered. Under a confirmed parent the
/// move is folded into a Reorder record keyed at the predicate-stripped
/// path; a permutation back at the identity removes the record.
pub fn move_instance(session: &mut Session, path: &str, from: usize, to: usize) -> Result<(), CoreError> {
    let (root, store) = session.split()?;
    let location = locate(root, path)?;
    let probe = at(root, &location)?.clone();
    let group = path::strip_predicate(&probe.path).to_owned();
    if !probe.info.ordered || !probe.kind().is_repeatable() {
        return Err(CoreError::InvalidPermutation { path: group });
    }
    let parent = at_mut(root, &location.parent())?;
    let mut slots = tree::instance_slots(parent, &probe);
    let count = slots.len();
    if from >= count || to >= count {
        return Err(CoreError::InvalidPermutation { path: group });
    }
    if from == to {
        return Ok(());
    }
    let moved = slots.remove(from);
    slots.insert(to, moved);

    let maintain_last = probe.kind() == NodeKind::List;
    let mut had_last = false;
    for (i, slot) in slots.iter().enumerate() {
        if let Some(node) = tree::child_at_mut(parent, *slot) {
            node.order = Some(i);
            if maintain_last && node.flags.last {
                had_last = true;
                node.flags.last = false;
            }
        }
    }
    if had_last {
        if let Some(node) = slots.last().and_then(|s| tree::child_at_mut(parent, *s)) {
            node.flags.last = true;
        }
    }

    if parent.is_new() {
        return Ok(());
    }
    let record = store.create(&group);
    if record.kind.is_none() {
        record.kind = Some(ModificationKind::Reorder);
        record.reorder = Some((0..count).collect());
    }
    let Some(permutation) = record.reorder.as_mut().filter(|p| p.len() == count) else {
        store.discard_if_empty(&group);
        return Err(CoreError::InvalidPermutation { path: group });
    };
    let original = permutation.remove(from);
    permutation.insert(to, original);
    if reorder::is_identity(permutation) {
        store.remove(Some(&group));
        debug!(path = %group, "reorder returned to identity");
    } else {
        debug!(path = %group, from, to, "reorder staged");
    }
    Ok(())
}

/// Reverts the subtree at `path` (the whole tree when `None`).
///
/// Open creation dialogs are aborted. New nodes are detached. Confirmed nodes
/// lose their deletion mark and get their original value back. Reorder
/// records of child collections are unwound when recursing. Every processed
/// record is removed.
pub fn cancel_all(session: &mut Session, path: Option<&str>, recurse: bool) -> Result<(), CoreError> {
    let (root, store) = session.split()?;
    let location = match path {
        Some(p) => locate(root, p)?,
        None => Location::root(),
    };
    cancel_at(root, store, &location, recurse)
}

pub(crate) fn cancel_at(
    root: &mut Node,
    store: &mut ModificationStore,
    location: &Location,
    recurse: bool,
) -> Result<(), CoreError> {
    let node = at_mut(root, location)?;
    if node.flags.creating {
        close_pool(node, CloseReason::Abort);
    }
    node.flags.editing = false;
    if node.flags.deleted {
        node.flags.deleted = false;
        node.flags.dirty = false;
    }

    if node.is_new() {
        let (node, record) = detach_new(root, store, location)?;
        if let Some(record) = record.filter(|r| r.is(ModificationKind::Replace)) {
            restore_replaced(root, store, &location.parent(), &node.path, record, false)?;
        }
        return Ok(());
    }

    let node_path = node.path.clone();
    if let Some(record) = store.remove(Some(&node_path)) {
        node.flags.dirty = false;
        if let (Some(ModificationKind::Change), Some(Original::Value(original))) =
            (record.kind, record.original)
        {
            node.value = original;
        }
        debug!(path = %node_path, "record cancelled");
    }
    if !recurse {
        return Ok(());
    }

    for _ in 0..node.new_children.len() {
        cancel_at(root, store, &location.child(Slot::New(0)), true)?;
    }

    let node = at_mut(root, location)?;
    let mut groups: Vec<String> = Vec::new();
    for child in &node.children {
        let group = path::strip_predicate(&child.path);
        if child.info.ordered && !groups.iter().any(|g| g == group) {
            groups.push(group.to_owned());
        }
    }
    for group in groups {
        if !store.has(&group, ModificationKind::Reorder) {
            continue;
        }
        let permutation = store
            .remove(Some(&group))
            .and_then(|r| r.reorder)
            .unwrap_or_default();
        for child in &mut node.children {
            if path::strip_predicate(&child.path) != group {
                continue;
            }
            if let Some(original) = child.order.and_then(|o| permutation.get(o).copied()) {
                child.order = Some(original);
            }
        }
        debug!(path = %group, "reorder cancelled");
    }

    let count = node.children.len();
    for i in 0..count {
        cancel_at(root, store, &location.child(Slot::Child(i)), true)?;
    }
    tree::set_last(&mut at_mut(root, location)?.children);
    Ok(())
}

/// Overlays staged edits onto a freshly fetched subtree.
///
/// Nodes with a record are marked dirty; a Change record's `original` is
/// refreshed from the fetched value and the staged value is shown instead.
/// Confirmed nodes displaced by a Replace record are dropped and staged
/// reorders are laid out again.
pub fn apply_pending(store: &mut ModificationStore, node: &mut Node) {
    if store.is_empty() {
        return;
    }
    if let Some(record) = store.get_mut(&node.path) {
        match record.kind {
            Some(ModificationKind::Change) => {
                record.original = Some(Original::Value(node.value.clone()));
                node.value.clone_from(&record.value);
                node.flags.dirty = true;
            }
            Some(ModificationKind::Delete) => {
                node.flags.deleted = true;
                node.flags.dirty = true;
            }
            _ => {}
        }
    }
    node.children
        .retain(|c| !store.has(&c.path, ModificationKind::Replace));
    apply_reorders(store, node);
    for child in &mut node.children {
        apply_pending(store, child);
    }
}

/// Lays the ordered instances below `node` out in their staged order.
///
/// Fetched instances carry their position on the device (their encounter
/// order when unset); a Reorder record maps each staged position to one of
/// those. A record that no longer fits the instances is dropped.
pub(crate) fn apply_reorders(store: &mut ModificationStore, node: &mut Node) {
    let mut groups: Vec<String> = Vec::new();
    for child in node.all_children() {
        let group = path::strip_predicate(&child.path);
        if child.info.ordered && !groups.iter().any(|g| g == group) {
            groups.push(group.to_owned());
        }
    }
    if groups.is_empty() {
        return;
    }

    for group in groups {
        let Some(permutation) = store
            .get(&group)
            .filter(|r| r.is(ModificationKind::Reorder))
            .and_then(|r| r.reorder.clone())
        else {
            continue;
        };
        let mut instances: Vec<&mut Node> = node
            .children
            .iter_mut()
            .chain(node.new_children.iter_mut())
            .filter(|c| c.info.ordered && path::strip_predicate(&c.path) == group)
            .collect();
        let device: Vec<usize> = instances
            .iter()
            .enumerate()
            .map(|(i, c)| c.order.unwrap_or(i))
            .collect();
        let mut sorted = device.clone();
        sorted.sort_unstable();
        let fits = reorder::is_permutation(&permutation)
            && sorted.len() == permutation.len()
            && sorted.iter().enumerate().all(|(i, &o)| i == o);
        if !fits {
            warn!(path = %group, "staged reorder no longer matches the fetched instances, dropped");
            store.remove(Some(&group));
            continue;
        }

        let mut staged = vec![0; permutation.len()];
        for (position, &original) in permutation.iter().enumerate() {
            staged[original] = position;
        }
        for (child, original) in instances.iter_mut().zip(device) {
            child.order = Some(staged[original]);
        }
        debug!(path = %group, "staged reorder reapplied");
    }
    tree::sort_instances(&mut node.children);
    tree::sort_instances(&mut node.new_children);
}
