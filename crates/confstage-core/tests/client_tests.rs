// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! The async driver against a scripted transport.

use confstage_app_core::config::ConfigService;
use confstage_app_core::prefs::{ClientPrefs, CLIENT_PREFS_KEY};
use confstage_core::mutator::{create_child, open_creation};
use confstage_core::tree::find_node;
use confstage_core::{
    compile_commit, CommitReply, ConfigClient, CoreError, DataPresence, InsertPosition,
    ModificationKind, Node, Original, TransportError,
};
use confstage_dry_tests::fixtures::{
    device, hostname_schema, interface_mtu_schema, interface_name_schema,
    interface_type_schema, leaf_node, sample_config, servers, SchemaBuilder,
};
use confstage_dry_tests::{Call, FakeTransport, InMemoryConfigStore};

const ETH0: &str = "/if:interfaces/interface[name='eth0']";
const TYPE_SCHEMA: &str = "/if:interfaces/if:interface/if:type";

type Client = ConfigClient<FakeTransport, InMemoryConfigStore>;

async fn loaded_client(transport: &FakeTransport) -> Client {
    transport.set_root(sample_config());
    let mut client = Client::in_memory(transport.clone());
    client.open_session("s1", device("r1"));
    client.load_root("s1").await.unwrap();
    client
}

fn value_at(client: &Client, path: &str) -> Option<String> {
    let root = client.sessions().get("s1").unwrap().root().unwrap();
    find_node(root, path).and_then(|n| n.value.clone())
}

#[tokio::test]
async fn load_root_installs_the_configuration() {
    let transport = FakeTransport::new();
    let client = loaded_client(&transport).await;
    let session = client.sessions().get("s1").unwrap();
    let root = session.root().unwrap();
    assert_eq!(root.path, "/");
    assert_eq!(root.children.len(), 2);
    assert_eq!(session.data_presence, DataPresence::All);
    assert_eq!(transport.call_count(Call::Subtree), 1);
}

#[tokio::test]
async fn reload_overlays_staged_changes() {
    let transport = FakeTransport::new();
    let mut client = loaded_client(&transport).await;
    client
        .change_value("s1", "/sys:system/hostname", "core")
        .unwrap();

    let mut fresh = sample_config();
    fresh[1].children[0] = leaf_node("/sys:system/hostname", hostname_schema(), "edge2");
    transport.set_root(fresh);
    client.load_root("s1").await.unwrap();

    assert_eq!(value_at(&client, "/sys:system/hostname").as_deref(), Some("core"));
    let record = client
        .sessions()
        .get("s1")
        .unwrap()
        .modifications
        .get("/sys:system/hostname")
        .unwrap()
        .clone();
    assert_eq!(record.original, Some(Original::Value(Some("edge2".into()))));
}

#[tokio::test]
async fn expanding_a_hidden_subtree_sets_filters() {
    let transport = FakeTransport::new();
    let mut top = sample_config();
    let system = top[1].clone();
    top[1].children.clear();
    top[1].flags.subtree_root = true;
    transport.set_root(top);
    transport.set_subtree("/sys:system", system.children);

    let mut client = Client::in_memory(transport.clone());
    client.open_session("s1", device("r1"));
    client.load_root("s1").await.unwrap();
    assert_eq!(
        client.sessions().get("s1").unwrap().data_presence,
        DataPresence::Mixed
    );

    client.expand("s1", "/sys:system", false).await.unwrap();
    let session = client.sessions().get("s1").unwrap();
    assert_eq!(session.data_presence, DataPresence::All);
    assert!(session
        .tree_filters
        .contains(&"/sys:system/hostname".to_owned()));
    assert_eq!(value_at(&client, "/sys:system/hostname").as_deref(), Some("edge"));
}

#[tokio::test]
async fn creating_an_enumeration_leaf_fetches_its_values() {
    let transport = FakeTransport::new();
    transport.set_child_schemas(
        "/if:interfaces/if:interface",
        vec![
            interface_name_schema(),
            interface_mtu_schema(),
            interface_type_schema(),
        ],
    );
    transport.set_values(TYPE_SCHEMA, ["ethernet", "loopback"]);
    let mut client = loaded_client(&transport).await;

    client.open_create_dialog("s1", ETH0).await.unwrap();
    let pool = {
        let root = client.sessions().get("s1").unwrap().root().unwrap();
        find_node(root, ETH0).unwrap().schema_children.clone().unwrap()
    };
    assert_eq!(pool.len(), 1);
    assert_eq!(pool[0].name, "type");

    let path = client.create_child("s1", ETH0, 0).await.unwrap();
    assert_eq!(path, format!("{ETH0}/type"));
    let root = client.sessions().get("s1").unwrap().root().unwrap();
    let node: &Node = find_node(root, &path).unwrap();
    assert!(node.flags.editing);
    assert_eq!(
        node.info.values,
        Some(vec!["ethernet".to_owned(), "loopback".to_owned()])
    );
    assert!(!find_node(root, ETH0).unwrap().flags.creating);
    assert_eq!(transport.call_count(Call::SchemaValues), 1);
}

#[tokio::test]
async fn failed_value_fetch_leaves_the_editor_closed() {
    let transport = FakeTransport::new();
    transport.set_child_schemas("/if:interfaces/if:interface", vec![interface_type_schema()]);
    transport.fail(Call::SchemaValues, TransportError::Backend("no schema".into()));
    let mut client = loaded_client(&transport).await;
    client.open_create_dialog("s1", ETH0).await.unwrap();

    let err = client.create_child("s1", ETH0, 0).await.unwrap_err();
    assert!(matches!(err, CoreError::SchemaFetchFailed(_)));
    let root = client.sessions().get("s1").unwrap().root().unwrap();
    let node = find_node(root, &format!("{ETH0}/type")).unwrap();
    assert!(!node.flags.editing);
    assert!(node.info.values.is_none());
}

#[tokio::test]
async fn commit_submits_then_reloads() {
    let transport = FakeTransport::new();
    let mut client = loaded_client(&transport).await;
    client
        .change_value("s1", "/sys:system/hostname", "core")
        .unwrap();

    let batch = client.commit("s1").await.unwrap();
    assert!(batch
        .get("/sys:system/hostname")
        .is_some_and(|e| e.kind == ModificationKind::Change));
    assert!(client.sessions().get("s1").unwrap().modifications.is_empty());
    assert_eq!(transport.call_count(Call::Subtree), 2);
    // The fake still serves the old configuration.
    assert_eq!(value_at(&client, "/sys:system/hostname").as_deref(), Some("edge"));
}

#[tokio::test]
async fn rejected_commit_keeps_the_staged_tree() {
    let transport = FakeTransport::new();
    transport.push_reply(CommitReply::rejected(["hostname is locked"]));
    let mut client = loaded_client(&transport).await;
    client
        .change_value("s1", "/sys:system/hostname", "core")
        .unwrap();

    let err = client.commit("s1").await.unwrap_err();
    assert_eq!(err.to_string(), "commit rejected: hostname is locked");
    assert_eq!(value_at(&client, "/sys:system/hostname").as_deref(), Some("core"));
    assert_eq!(client.sessions().get("s1").unwrap().modifications.len(), 1);
    assert_eq!(transport.call_count(Call::Subtree), 1);
}

#[tokio::test]
async fn unreachable_commit_leaves_the_session_untouched() {
    let transport = FakeTransport::new();
    let mut client = loaded_client(&transport).await;
    client
        .change_value("s1", "/sys:system/hostname", "core")
        .unwrap();
    transport.fail(Call::Commit, TransportError::Unreachable("link down".into()));

    let err = client.commit("s1").await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::TransportFailed(TransportError::Unreachable(_))
    ));
    let session = client.sessions().get("s1").unwrap();
    assert!(session
        .modifications
        .has("/sys:system/hostname", ModificationKind::Change));
    assert_eq!(session.modifications.len(), 1);
    assert_eq!(value_at(&client, "/sys:system/hostname").as_deref(), Some("core"));
    assert!(find_node(session.root().unwrap(), "/sys:system/hostname")
        .unwrap()
        .flags
        .dirty);
    assert_eq!(transport.call_count(Call::Commit), 1);
    assert_eq!(transport.call_count(Call::Subtree), 1);
}

#[tokio::test]
async fn committed_top_level_nodes_are_replaced_by_the_device_copy() {
    let transport = FakeTransport::new();
    let mut client = loaded_client(&transport).await;
    let top = SchemaBuilder::leaf("x", "top", "").build();
    {
        let session = client.sessions_mut().get_mut("s1").unwrap();
        open_creation(session, "/", vec![top.clone()]).unwrap();
        create_child(session, "/", 0).unwrap();
    }
    client.change_value("s1", "/x:top", "v").unwrap();

    client.load_root("s1").await.unwrap();
    let root = client.sessions().get("s1").unwrap().root().unwrap();
    assert_eq!(root.new_children.len(), 1);
    assert!(root.new_children[0].is_new());

    let mut confirmed = sample_config();
    confirmed.push(leaf_node("/x:top", top, "v"));
    transport.set_root(confirmed);
    client.commit("s1").await.unwrap();

    let session = client.sessions().get("s1").unwrap();
    assert!(session.modifications.is_empty());
    let root = session.root().unwrap();
    assert!(root.new_children.is_empty());
    let copies: Vec<&Node> = root.all_children().filter(|c| c.path == "/x:top").collect();
    assert_eq!(copies.len(), 1);
    assert!(!copies[0].is_new());
    assert_eq!(copies[0].value.as_deref(), Some("v"));
}

#[tokio::test]
async fn staged_moves_survive_a_reload() {
    let transport = FakeTransport::new();
    let mut client = loaded_client(&transport).await;
    client
        .move_instance("s1", "/sys:system/server[.='c']", 2, 0)
        .unwrap();
    client.load_root("s1").await.unwrap();

    let session = client.sessions().get("s1").unwrap();
    let record = session.modifications.get("/sys:system/server").unwrap();
    assert_eq!(record.reorder, Some(vec![2, 0, 1]));
    let root = session.root().unwrap();
    let system = find_node(root, "/sys:system").unwrap();
    let shown: Vec<&str> = system
        .children
        .iter()
        .filter(|c| c.info.name == "server")
        .map(|c| c.value.as_deref().unwrap())
        .collect();
    assert_eq!(shown, vec!["c", "a", "b"]);
    assert_eq!(
        find_node(root, "/sys:system/server[.='c']").unwrap().order,
        Some(0)
    );

    let batch = compile_commit(session).unwrap();
    let transactions = batch
        .get("/sys:system/server")
        .unwrap()
        .transactions
        .clone()
        .unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].node, "/sys:system/server[.='c']");
    assert_eq!(transactions[0].insert, InsertPosition::First);
}

#[tokio::test]
async fn staged_moves_are_dropped_when_the_device_list_changed() {
    let transport = FakeTransport::new();
    let mut client = loaded_client(&transport).await;
    client
        .move_instance("s1", "/sys:system/server[.='c']", 2, 0)
        .unwrap();

    let mut fresh = sample_config();
    fresh[1].children.retain(|c| c.info.name != "server");
    fresh[1].children.extend(servers(&["a", "b", "c", "d"]));
    transport.set_root(fresh);
    client.load_root("s1").await.unwrap();

    let session = client.sessions().get("s1").unwrap();
    assert!(session.modifications.is_empty());
    let root = session.root().unwrap();
    assert_eq!(
        find_node(root, "/sys:system/server[.='a']").unwrap().order,
        Some(0)
    );
}

#[tokio::test]
async fn dead_sessions_are_dropped_newest_first() {
    let transport = FakeTransport::new();
    let mut client = Client::in_memory(transport.clone());
    client.open_session("s1", device("r1"));
    client.open_session("s2", device("r2"));
    client.open_session("s3", device("r3"));
    transport.set_alive("s3", false);
    transport.set_alive("s1", false);

    let dropped = client.check_sessions().await;
    assert_eq!(dropped, vec!["s3".to_owned(), "s1".to_owned()]);
    assert_eq!(client.sessions().keys(), vec!["s2".to_owned()]);
    assert_eq!(client.sessions().active_key(), Some("s2"));
}

#[tokio::test]
async fn unreachable_backend_drops_sessions_but_backend_errors_do_not() {
    let transport = FakeTransport::new();
    let mut client = Client::in_memory(transport.clone());
    client.open_session("s1", device("r1"));

    transport.fail(Call::CheckAlive, TransportError::Backend("busy".into()));
    assert!(client.check_sessions().await.is_empty());

    transport.fail(Call::CheckAlive, TransportError::Unreachable("down".into()));
    assert_eq!(client.check_sessions().await, vec!["s1".to_owned()]);
    assert!(client.sessions().is_empty());
}

#[tokio::test]
async fn sessions_and_prefs_persist_through_the_config_store() {
    let transport = FakeTransport::new();
    transport.set_root(sample_config());
    let store = InMemoryConfigStore::new();

    let mut client = Client::with_config(transport.clone(), ConfigService::new(store.clone())).unwrap();
    client.open_session("s1", device("r1"));
    client.load_root("s1").await.unwrap();
    client
        .change_value("s1", "/sys:system/hostname", "core")
        .unwrap();
    client
        .set_prefs(ClientPrefs {
            check_alive_on_load: false,
            ..ClientPrefs::default()
        })
        .unwrap();
    assert!(store.contains_key(CLIENT_PREFS_KEY));

    let mut restored = Client::with_config(transport.clone(), ConfigService::new(store)).unwrap();
    assert!(!restored.prefs().check_alive_on_load);
    assert!(restored.start().await.is_empty());
    assert_eq!(transport.call_count(Call::CheckAlive), 0);
    let session = restored.sessions().get("s1").unwrap();
    assert!(session
        .modifications
        .has("/sys:system/hostname", ModificationKind::Change));
    assert_eq!(restored.sessions().active_key(), Some("s1"));
}

#[tokio::test]
async fn save_failures_do_not_fail_edits() {
    let transport = FakeTransport::new();
    transport.set_root(sample_config());
    let store = InMemoryConfigStore::new();
    let mut client = Client::with_config(transport, ConfigService::new(store.clone())).unwrap();
    client.open_session("s1", device("r1"));
    client.load_root("s1").await.unwrap();

    store.set_fail_on_save(true);
    client
        .change_value("s1", "/sys:system/hostname", "core")
        .unwrap();
    assert!(matches!(client.save(), Err(CoreError::Persist(_))));
}

#[tokio::test]
async fn unknown_sessions_are_rejected() {
    let transport = FakeTransport::new();
    let mut client = Client::in_memory(transport);
    assert!(matches!(
        client.load_root("nope").await,
        Err(CoreError::UnknownSession(_))
    ));
    assert!(matches!(
        client.close_session("nope"),
        Err(CoreError::UnknownSession(_))
    ));
}
