// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Moves within ordered collections and their compilation into inserts.

use confstage_core::mutator::{delete_node, move_instance};
use confstage_core::reorder::{compile, Identifier, ReorderItem};
use confstage_core::tree::find_node;
use confstage_core::{compile_commit, CoreError, InsertPosition, ModificationKind, MoveTransaction};
use confstage_dry_tests::loaded_session;
use proptest::prelude::*;

const SERVERS: &str = "/sys:system/server";
const USERS: &str = "/sys:system/user";

/// Replays `transactions` against `original` the way a device would.
fn replay(original: &[String], transactions: &[MoveTransaction]) -> Vec<String> {
    let mut list: Vec<String> = original.to_vec();
    for tx in transactions {
        let Some(from) = list.iter().position(|v| *v == tx.node) else {
            continue;
        };
        let moved = list.remove(from);
        let neighbour = tx.value.as_ref().or(tx.key.as_ref());
        let at = match (tx.insert, neighbour) {
            (InsertPosition::First, _) => 0,
            (InsertPosition::Last, _) => list.len(),
            (InsertPosition::Before, Some(n)) => list.iter().position(|v| v == n).unwrap(),
            (InsertPosition::After, Some(n)) => list.iter().position(|v| v == n).unwrap() + 1,
            (_, None) => list.len(),
        };
        list.insert(at, moved);
    }
    list
}

fn items(current: &[String]) -> Vec<ReorderItem> {
    current
        .iter()
        .map(|v| ReorderItem {
            path: v.clone(),
            ident: Identifier::Value(v.clone()),
            deleted: false,
        })
        .collect()
}

#[test]
fn moving_the_last_server_first_compiles_to_one_insert() {
    let mut session = loaded_session("s1");
    move_instance(&mut session, "/sys:system/server[.='c']", 2, 0).unwrap();

    let record = session.modifications.get(SERVERS).unwrap();
    assert!(record.is(ModificationKind::Reorder));
    assert_eq!(record.reorder, Some(vec![2, 0, 1]));

    let batch = compile_commit(&session).unwrap();
    let entry = batch.get(SERVERS).unwrap();
    assert_eq!(entry.kind, ModificationKind::Reorder);
    let transactions = entry.transactions.as_ref().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].node, "/sys:system/server[.='c']");
    assert_eq!(transactions[0].insert, InsertPosition::First);
}

#[test]
fn moving_back_removes_the_record() {
    let mut session = loaded_session("s1");
    move_instance(&mut session, "/sys:system/server[.='a']", 0, 2).unwrap();
    move_instance(&mut session, "/sys:system/server[.='a']", 2, 0).unwrap();
    assert!(session.modifications.is_empty());
    let root = session.root().unwrap();
    assert_eq!(find_node(root, "/sys:system/server[.='a']").unwrap().order, Some(0));
    assert_eq!(find_node(root, "/sys:system/server[.='c']").unwrap().order, Some(2));
}

#[test]
fn list_moves_use_qualified_keys_and_move_last() {
    let mut session = loaded_session("s1");
    move_instance(&mut session, "/sys:system/user[name='bob']", 1, 0).unwrap();
    let root = session.root().unwrap();
    assert!(find_node(root, "/sys:system/user[name='alice']").unwrap().flags.last);
    assert!(!find_node(root, "/sys:system/user[name='bob']").unwrap().flags.last);

    let batch = compile_commit(&session).unwrap();
    let transactions = batch.get(USERS).unwrap().transactions.clone().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].node, "/sys:system/user[name='bob']");
    assert_eq!(transactions[0].insert, InsertPosition::First);

    move_instance(&mut session, "/sys:system/user[name='alice']", 0, 1).unwrap();
    assert!(session.modifications.is_empty());
}

#[test]
fn neighbour_inserts_carry_the_list_key() {
    let items = vec![
        ReorderItem {
            path: "/l[name='a']".into(),
            ident: Identifier::Key("[m:name='a']".into()),
            deleted: false,
        },
        ReorderItem {
            path: "/l[name='c']".into(),
            ident: Identifier::Key("[m:name='c']".into()),
            deleted: false,
        },
        ReorderItem {
            path: "/l[name='b']".into(),
            ident: Identifier::Key("[m:name='b']".into()),
            deleted: false,
        },
    ];
    let transactions = compile(&items, &[0, 2, 1]).unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].node, "/l[name='c']");
    assert_eq!(transactions[0].insert, InsertPosition::Before);
    assert_eq!(transactions[0].key.as_deref(), Some("[m:name='b']"));
    assert!(transactions[0].value.is_none());
}

#[test]
fn deleted_instances_drop_out_of_the_permutation() {
    let mut session = loaded_session("s1");
    move_instance(&mut session, "/sys:system/server[.='c']", 2, 0).unwrap();
    delete_node(&mut session, "/sys:system/server[.='a']").unwrap();

    let batch = compile_commit(&session).unwrap();
    let transactions = batch.get(SERVERS).unwrap().transactions.clone().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].node, "/sys:system/server[.='c']");
    assert_eq!(transactions[0].insert, InsertPosition::First);
    assert!(batch
        .get("/sys:system/server[.='a']")
        .is_some_and(|e| e.kind == ModificationKind::Delete));
}

#[test]
fn unordered_and_out_of_range_moves_are_rejected() {
    let mut session = loaded_session("s1");
    assert!(matches!(
        move_instance(&mut session, "/sys:system/hostname", 0, 1),
        Err(CoreError::InvalidPermutation { .. })
    ));
    assert!(matches!(
        move_instance(&mut session, "/sys:system/server[.='a']", 0, 3),
        Err(CoreError::InvalidPermutation { .. })
    ));
    assert!(session.modifications.is_empty());
}

#[test]
fn mismatched_permutation_is_reported() {
    let values: Vec<String> = ["a", "b"].iter().map(|s| (*s).to_owned()).collect();
    let err = compile(&items(&values), &[0, 1, 2]).unwrap_err();
    assert_eq!(err.permutation, 3);
    assert_eq!(err.instances, 2);
}

fn shuffled() -> impl Strategy<Value = Vec<usize>> {
    (0usize..9).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
}

proptest! {
    #[test]
    fn compiled_moves_replay_to_the_new_order(reorder in shuffled()) {
        let original: Vec<String> = (0..reorder.len()).map(|i| format!("v{i}")).collect();
        let current: Vec<String> = reorder.iter().map(|&o| original[o].clone()).collect();
        let transactions = compile(&items(&current), &reorder).unwrap();
        if reorder.iter().enumerate().all(|(i, &o)| i == o) {
            prop_assert!(transactions.is_empty());
        }
        prop_assert_eq!(replay(&original, &transactions), current);
    }
}
