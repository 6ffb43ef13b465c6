// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema and tree builders for engine tests.
//!
//! Schema paths follow `/<module>:<name>/<module>:<name>...`, which is what
//! [`FakeTransport`](crate::FakeTransport) scripts are keyed by.

use confstage_core::node::Node;
use confstage_core::schema::{NodeKind, SchemaInfo};
use confstage_core::session::{Device, Session};
use confstage_core::tree;

/// Module of the interface fixtures.
pub const IF: &str = "if";
/// Module of the system fixtures.
pub const SYS: &str = "sys";

/// Builder for [`SchemaInfo`] values.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    info: SchemaInfo,
}

impl SchemaBuilder {
    fn new(kind: NodeKind, module: &str, name: &str, parent_schema: &str) -> Self {
        let mut info = SchemaInfo::new(kind, module, name);
        let parent = parent_schema.trim_end_matches('/');
        info.path = format!("{parent}/{module}:{name}");
        Self { info }
    }

    /// Container schema under `parent_schema` (`""` for top level).
    pub fn container(module: &str, name: &str, parent_schema: &str) -> Self {
        Self::new(NodeKind::Container, module, name, parent_schema)
    }

    /// Leaf schema.
    pub fn leaf(module: &str, name: &str, parent_schema: &str) -> Self {
        Self::new(NodeKind::Leaf, module, name, parent_schema).datatype("string")
    }

    /// Leaf-list schema.
    pub fn leaf_list(module: &str, name: &str, parent_schema: &str) -> Self {
        Self::new(NodeKind::LeafList, module, name, parent_schema).datatype("string")
    }

    /// List schema keyed by `keys`.
    pub fn list(module: &str, name: &str, parent_schema: &str, keys: &[&str]) -> Self {
        let mut builder = Self::new(NodeKind::List, module, name, parent_schema);
        builder.info.keys = keys.iter().map(|k| (*k).to_owned()).collect();
        builder
    }

    /// Marks a key leaf.
    #[must_use]
    pub fn key(mut self) -> Self {
        self.info.key = true;
        self
    }

    /// Marks a user-ordered collection.
    #[must_use]
    pub fn ordered(mut self) -> Self {
        self.info.ordered = true;
        self
    }

    /// Marks a read-only node.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.info.config = false;
        self
    }

    /// Sets the base datatype.
    #[must_use]
    pub fn datatype(mut self, base: &str) -> Self {
        self.info.datatype_base = Some(base.to_owned());
        self
    }

    /// Sets the schema default.
    #[must_use]
    pub fn default_value(mut self, value: &str) -> Self {
        self.info.default = Some(value.to_owned());
        self
    }

    /// Finished descriptor.
    pub fn build(self) -> SchemaInfo {
        self.info
    }
}

/// Confirmed leaf node at `path` with `value`.
pub fn leaf_node(path: &str, info: SchemaInfo, value: &str) -> Node {
    Node::confirmed(path, info).with_value(value)
}

/// `/if:interfaces` schema.
pub fn interfaces_schema() -> SchemaInfo {
    SchemaBuilder::container(IF, "interfaces", "").build()
}

/// `interface` list schema, keyed by `name`, unordered.
pub fn interface_schema() -> SchemaInfo {
    SchemaBuilder::list(IF, "interface", "/if:interfaces", &["name"]).build()
}

/// `name` key leaf of `interface`.
pub fn interface_name_schema() -> SchemaInfo {
    SchemaBuilder::leaf(IF, "name", "/if:interfaces/if:interface")
        .key()
        .build()
}

/// `mtu` leaf of `interface`.
pub fn interface_mtu_schema() -> SchemaInfo {
    SchemaBuilder::leaf(IF, "mtu", "/if:interfaces/if:interface")
        .datatype("uint16")
        .build()
}

/// `enabled` boolean leaf of `interface`.
pub fn interface_enabled_schema() -> SchemaInfo {
    SchemaBuilder::leaf(IF, "enabled", "/if:interfaces/if:interface")
        .datatype("boolean")
        .build()
}

/// `type` enumeration leaf of `interface`.
pub fn interface_type_schema() -> SchemaInfo {
    SchemaBuilder::leaf(IF, "type", "/if:interfaces/if:interface")
        .datatype("enumeration")
        .build()
}

/// `/sys:system` schema.
pub fn system_schema() -> SchemaInfo {
    SchemaBuilder::container(SYS, "system", "").build()
}

/// Ordered `server` leaf-list under `/sys:system`.
pub fn server_schema() -> SchemaInfo {
    SchemaBuilder::leaf_list(SYS, "server", "/sys:system")
        .ordered()
        .build()
}

/// `hostname` leaf under `/sys:system`.
pub fn hostname_schema() -> SchemaInfo {
    SchemaBuilder::leaf(SYS, "hostname", "/sys:system").build()
}

/// Ordered `user` list under `/sys:system`, keyed by `name`.
pub fn user_schema() -> SchemaInfo {
    SchemaBuilder::list(SYS, "user", "/sys:system", &["name"])
        .ordered()
        .build()
}

/// `name` key leaf of `user`.
pub fn user_name_schema() -> SchemaInfo {
    SchemaBuilder::leaf(SYS, "name", "/sys:system/sys:user")
        .key()
        .build()
}

/// Confirmed `interface` instance with `name` and `mtu`.
pub fn interface(name: &str, mtu: &str) -> Node {
    let path = format!("/if:interfaces/interface[name='{name}']");
    Node::confirmed(path.clone(), interface_schema())
        .with_child(leaf_node(
            &format!("{path}/name"),
            interface_name_schema(),
            name,
        ))
        .with_child(leaf_node(
            &format!("{path}/mtu"),
            interface_mtu_schema(),
            mtu,
        ))
}

/// Confirmed ordered `server` instances, in order. The first one carries
/// the `first` marker.
pub fn servers(values: &[&str]) -> Vec<Node> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let mut node =
                Node::confirmed(format!("/sys:system/server[.='{v}']"), server_schema())
                    .with_value(*v)
                    .with_order(i);
            node.flags.first = i == 0;
            node
        })
        .collect()
}

/// Confirmed ordered `user` instances, in order.
pub fn users(names: &[&str]) -> Vec<Node> {
    names
        .iter()
        .enumerate()
        .map(|(i, n)| {
            let path = format!("/sys:system/user[name='{n}']");
            Node::confirmed(path.clone(), user_schema())
                .with_order(i)
                .with_child(leaf_node(&format!("{path}/name"), user_name_schema(), n))
        })
        .collect()
}

/// Top-level nodes of the sample device configuration:
///
/// ```text
/// /if:interfaces
///   interface[name='eth0'] { name, mtu=1500 }
/// /sys:system
///   hostname=edge
///   server[.='a'] server[.='b'] server[.='c']   (ordered)
///   user[name='alice'] user[name='bob']         (ordered)
/// ```
pub fn sample_config() -> Vec<Node> {
    let mut system = Node::confirmed("/sys:system", system_schema()).with_child(leaf_node(
        "/sys:system/hostname",
        hostname_schema(),
        "edge",
    ));
    system.children.extend(servers(&["a", "b", "c"]));
    system.children.extend(users(&["alice", "bob"]));
    let mut nodes = vec![
        Node::confirmed("/if:interfaces", interfaces_schema()).with_child(interface("eth0", "1500")),
        system,
    ];
    for node in &mut nodes {
        mark_last(node);
    }
    nodes
}

/// Sets the `last` marker on the final child at every level, as a freshly
/// rendered tree has it.
pub fn mark_last(node: &mut Node) {
    tree::set_last(&mut node.children);
    for child in &mut node.children {
        mark_last(child);
    }
}

/// Sample root with [`sample_config`] as children.
pub fn sample_root() -> Node {
    let mut root = Node::root();
    root.info.config = true;
    root.children = sample_config();
    tree::set_last(&mut root.children);
    root
}

/// Lab device descriptor.
pub fn device(name: &str) -> Device {
    Device {
        name: name.to_owned(),
        hostname: format!("{name}.lab"),
        port: 830,
        username: "admin".to_owned(),
    }
}

/// Session `key` with [`sample_root`] loaded.
pub fn loaded_session(key: &str) -> Session {
    let mut session = Session::new(key, device(key));
    session.data = Some(sample_root());
    session
}
