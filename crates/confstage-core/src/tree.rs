// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Path-based lookup over a session tree.
//!
//! Lookups return a [`Location`], a list of child slots from the root, so
//! callers can re-borrow mutably and splice siblings by index instead of
//! holding references across mutations.

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::path;

/// Position of a node within its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Index into `children`.
    Child(usize),
    /// Index into `new_children`.
    New(usize),
}

/// Route from the root to a node; empty for the root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location(Vec<Slot>);

impl Location {
    /// The root location.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// True for the root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Location of the containing node (the root is its own parent).
    #[must_use]
    pub fn parent(&self) -> Self {
        let mut steps = self.0.clone();
        steps.pop();
        Self(steps)
    }

    /// Last slot, `None` for the root.
    pub fn slot(&self) -> Option<Slot> {
        self.0.last().copied()
    }

    /// Location of a child of this node.
    #[must_use]
    pub fn child(&self, slot: Slot) -> Self {
        let mut steps = self.0.clone();
        steps.push(slot);
        Self(steps)
    }

    /// Number of steps from the root.
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

/// Resolves a location to a node.
pub fn node_at<'a>(root: &'a Node, location: &Location) -> Option<&'a Node> {
    let mut node = root;
    for slot in &location.0 {
        node = match *slot {
            Slot::Child(i) => node.children.get(i)?,
            Slot::New(i) => node.new_children.get(i)?,
        };
    }
    Some(node)
}

/// Resolves a location to a mutable node.
pub fn node_at_mut<'a>(root: &'a mut Node, location: &Location) -> Option<&'a mut Node> {
    let mut node = root;
    for slot in &location.0 {
        node = match *slot {
            Slot::Child(i) => node.children.get_mut(i)?,
            Slot::New(i) => node.new_children.get_mut(i)?,
        };
    }
    Some(node)
}

/// Child of `parent` at `slot`.
pub fn child_at(parent: &Node, slot: Slot) -> Option<&Node> {
    match slot {
        Slot::Child(i) => parent.children.get(i),
        Slot::New(i) => parent.new_children.get(i),
    }
}

/// Mutable child of `parent` at `slot`.
pub fn child_at_mut(parent: &mut Node, slot: Slot) -> Option<&mut Node> {
    match slot {
        Slot::Child(i) => parent.children.get_mut(i),
        Slot::New(i) => parent.new_children.get_mut(i),
    }
}

/// Removes and returns the child at `slot`.
pub(crate) fn detach(parent: &mut Node, slot: Slot) -> Option<Node> {
    match slot {
        Slot::Child(i) if i < parent.children.len() => Some(parent.children.remove(i)),
        Slot::New(i) if i < parent.new_children.len() => Some(parent.new_children.remove(i)),
        _ => None,
    }
}

/// Outcome of a single-level scan.
enum Step {
    Found(Slot),
    Descend(Slot),
}

fn scan(nodes: &[Node], query: &str, exact: bool, wrap: fn(usize) -> Slot) -> Option<Step> {
    for (i, iter) in nodes.iter().enumerate() {
        let compare = if exact {
            iter.path.as_str()
        } else {
            path::strip_predicate(&iter.path)
        };
        if compare == query {
            return Some(Step::Found(wrap(i)));
        }
        if path::is_descendant(query, &iter.path) {
            return Some(Step::Descend(wrap(i)));
        }
    }
    None
}

/// Walks from the root towards `query`.
///
/// At each level `children` are scanned before `new_children`. A query whose
/// last segment has no predicate matches instances by their predicate-stripped
/// path, so the earliest instance in document order wins.
///
/// Returns the location of the match (if any) and of the deepest node
/// descended into.
fn walk(root: &Node, query: &str) -> (Option<Location>, Location) {
    if query == "/" {
        return (Some(Location::root()), Location::root());
    }
    let exact = path::has_predicate(query);
    let mut parent = Location::root();
    let mut node = root;
    loop {
        let step = scan(&node.children, query, exact, Slot::Child)
            .or_else(|| scan(&node.new_children, query, exact, Slot::New));
        match step {
            Some(Step::Found(slot)) => return (Some(parent.child(slot)), parent),
            Some(Step::Descend(slot)) => {
                parent = parent.child(slot);
                match child_at(node, slot) {
                    Some(next) => node = next,
                    None => return (None, parent),
                }
            }
            None => return (None, parent),
        }
    }
}

/// Locates the node at `query`.
pub fn locate(root: &Node, query: &str) -> Option<Location> {
    walk(root, query).0
}

/// Finds the node at `query`.
pub fn find_node<'a>(root: &'a Node, query: &str) -> Option<&'a Node> {
    locate(root, query).and_then(|loc| node_at(root, &loc))
}

/// Finds the node at `query` for mutation.
pub fn find_node_mut<'a>(root: &'a mut Node, query: &str) -> Option<&'a mut Node> {
    let loc = locate(root, query)?;
    node_at_mut(root, &loc)
}

/// Location of the node containing `query`; the root when there is none.
pub fn parent_location(root: &Node, query: &str) -> Location {
    walk(root, query).1
}

/// The node containing `query`; never `None`, collapses to the root.
pub fn find_parent<'a>(root: &'a Node, query: &str) -> &'a Node {
    node_at(root, &parent_location(root, query)).unwrap_or(root)
}

/// All instances sharing `node`'s schema under `parent`, as slots, ordered by
/// ascending `order` where present and by encounter order otherwise.
pub fn instance_slots(parent: &Node, node: &Node) -> Vec<Slot> {
    let mut result: Vec<(Slot, Option<usize>)> = Vec::new();
    let candidates = parent
        .children
        .iter()
        .enumerate()
        .map(|(i, c)| (Slot::Child(i), c))
        .chain(
            parent
                .new_children
                .iter()
                .enumerate()
                .map(|(i, c)| (Slot::New(i), c)),
        );
    for (slot, child) in candidates {
        if !child.info.same_schema(&node.info) {
            continue;
        }
        let at = child.order.and_then(|order| {
            result
                .iter()
                .position(|(_, o)| o.is_some_and(|other| other > order))
        });
        match at {
            Some(i) => result.insert(i, (slot, child.order)),
            None => result.push((slot, child.order)),
        }
    }
    result.into_iter().map(|(slot, _)| slot).collect()
}

/// Sibling instances of a repeatable node, in display order.
///
/// Lists always yield their instances. Leaf-lists yield them only when
/// queried through the instance flagged `first`; any other instance yields
/// nothing. Non-repeatable nodes yield themselves.
pub fn list_instances<'a>(root: &'a Node, node: &Node) -> Vec<&'a Node> {
    use crate::schema::NodeKind;

    let Some(loc) = locate(root, &node.path) else {
        return Vec::new();
    };
    let Some(this) = node_at(root, &loc) else {
        return Vec::new();
    };
    match this.kind() {
        NodeKind::List => {}
        NodeKind::LeafList if this.flags.first => {}
        NodeKind::LeafList => return Vec::new(),
        NodeKind::Container | NodeKind::Leaf => return vec![this],
    }
    let parent_loc = loc.parent();
    let Some(parent) = node_at(root, &parent_loc) else {
        return Vec::new();
    };
    instance_slots(parent, this)
        .into_iter()
        .filter_map(|slot| child_at(parent, slot))
        .collect()
}

/// Marks the final node of `list` as `last` and clears the marker elsewhere.
pub fn set_last(list: &mut [Node]) {
    for node in list.iter_mut() {
        node.flags.last = false;
    }
    if let Some(last) = list.last_mut() {
        last.flags.last = true;
    }
}

/// Brings same-schema ordered instances into ascending `order`, in place.
///
/// Unordered nodes keep their positions; an ordered group occupies the slots
/// its members already held. `first`/`last` markers stay with the slot.
pub fn sort_instances(list: &mut [Node]) {
    let mut handled: Vec<(String, String)> = Vec::new();
    for start in 0..list.len() {
        if !list[start].info.ordered {
            continue;
        }
        let id = (list[start].info.module.clone(), list[start].info.name.clone());
        if handled.contains(&id) {
            continue;
        }
        let slots: Vec<usize> = (start..list.len())
            .filter(|&i| list[i].info.module == id.0 && list[i].info.name == id.1)
            .collect();
        handled.push(id);

        let markers: Vec<(bool, bool)> = slots
            .iter()
            .map(|&i| (list[i].flags.first, list[i].flags.last))
            .collect();
        let mut group: Vec<Node> = slots.iter().map(|&i| list[i].clone()).collect();
        group.sort_by_key(|n| n.order.unwrap_or(usize::MAX));
        for ((&slot, mut node), (first, last)) in slots.iter().zip(group).zip(markers) {
            node.flags.first = first;
            node.flags.last = last;
            list[slot] = node;
        }
    }
}

/// Prepares freshly fetched nodes for display: ordered instances sorted,
/// `last` markers set, at every level.
pub fn normalize(list: &mut [Node]) {
    sort_instances(list);
    set_last(list);
    for node in list.iter_mut() {
        normalize(&mut node.children);
    }
}

/// Coarse visibility of a session's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataPresence {
    /// Nothing loaded.
    #[default]
    None,
    /// Only the roots are loaded.
    Root,
    /// Some roots are partially loaded.
    Mixed,
    /// Everything is loaded.
    All,
}

/// Recomputes the hidden-child cache of every root subtree.
pub fn update_hidden_flags(root: &mut Node) -> DataPresence {
    let mut any_hidden = false;
    let mut all_hidden = true;
    for child in &mut root.children {
        if child.has_hidden_child(true) {
            any_hidden = true;
        } else {
            all_hidden = false;
        }
    }
    match (any_hidden, all_hidden) {
        (false, _) => DataPresence::All,
        (true, true) => DataPresence::Root,
        (true, false) => DataPresence::Mixed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NodeKind, SchemaInfo};

    fn leaf_list(path: &str, value: &str, order: usize) -> Node {
        let mut info = SchemaInfo::new(NodeKind::LeafList, "t", "ll");
        info.ordered = true;
        Node::confirmed(path, info).with_value(value).with_order(order)
    }

    fn sample() -> Node {
        let top = Node::confirmed("/t:top", SchemaInfo::new(NodeKind::Container, "t", "top"))
            .with_child(leaf_list("/t:top/ll[.='b']", "b", 1))
            .with_child(leaf_list("/t:top/ll[.='a']", "a", 0))
            .with_child(
                Node::confirmed("/t:top/name", SchemaInfo::new(NodeKind::Leaf, "t", "name"))
                    .with_value("x"),
            );
        let mut root = Node::root().with_child(top);
        root.children[0].children[0].flags.first = true;
        root
    }

    #[test]
    fn exact_predicate_selects_instance() {
        let root = sample();
        let node = find_node(&root, "/t:top/ll[.='a']");
        assert_eq!(node.and_then(|n| n.value.as_deref()), Some("a"));
    }

    #[test]
    fn missing_predicate_returns_first_in_document_order() {
        let root = sample();
        let node = find_node(&root, "/t:top/ll");
        assert_eq!(node.map(|n| n.path.as_str()), Some("/t:top/ll[.='b']"));
    }

    #[test]
    fn new_children_are_searched_after_children() {
        let mut root = sample();
        let mut staged = Node::staged(
            "/t:top/extra",
            SchemaInfo::new(NodeKind::Leaf, "t", "extra"),
        );
        staged.value = Some("1".into());
        root.children[0].new_children.push(staged);
        let loc = locate(&root, "/t:top/extra");
        assert_eq!(loc.and_then(|l| l.slot()), Some(Slot::New(0)));
    }

    #[test]
    fn parent_collapses_to_root() {
        let root = sample();
        assert_eq!(find_parent(&root, "/t:top").path, "/");
        assert_eq!(find_parent(&root, "/t:top/name").path, "/t:top");
        assert_eq!(find_parent(&root, "/nowhere").path, "/");
    }

    #[test]
    fn instances_follow_order() {
        let root = sample();
        let first = find_node(&root, "/t:top/ll[.='b']").cloned();
        let values: Vec<_> = first
            .map(|n| list_instances(&root, &n))
            .unwrap_or_default()
            .iter()
            .filter_map(|n| n.value.clone())
            .collect();
        assert_eq!(values, vec!["a", "b"]);

        let other = find_node(&root, "/t:top/ll[.='a']").cloned();
        assert!(other.map(|n| list_instances(&root, &n)).unwrap_or_default().is_empty());
    }

    #[test]
    fn sort_moves_ordered_group_only() {
        let mut root = sample();
        let list = &mut root.children[0].children;
        sort_instances(list);
        let paths: Vec<_> = list.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["/t:top/ll[.='a']", "/t:top/ll[.='b']", "/t:top/name"]);
        assert!(list[0].flags.first);
    }

    #[test]
    fn last_marker_is_unique() {
        let mut root = sample();
        set_last(&mut root.children[0].children);
        let flags: Vec<_> = root.children[0].children.iter().map(|n| n.flags.last).collect();
        assert_eq!(flags, vec![false, false, true]);
    }

    #[test]
    fn normalize_sorts_and_marks_every_level() {
        let mut root = sample();
        for node in &mut root.children[0].children {
            node.flags.last = false;
        }
        normalize(&mut root.children);
        let top = &root.children[0];
        assert!(top.flags.last);
        assert_eq!(top.children[0].path, "/t:top/ll[.='a']");
        assert!(top.children[2].flags.last);
        assert!(!top.children[1].flags.last);
    }

    #[test]
    fn presence_reflects_hidden_roots() {
        let mut root = sample();
        assert_eq!(update_hidden_flags(&mut root), DataPresence::All);
        root.children[0].flags.subtree_root = true;
        assert_eq!(update_hidden_flags(&mut root), DataPresence::Root);
    }
}
