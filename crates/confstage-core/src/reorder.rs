// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Compiles a reorder permutation into primitive move transactions.
//!
//! The working sequence starts in the new (displayed) layout and is walked
//! back to the original layout one settlement at a time. Each settlement
//! emits the inverse move, prepended to the output, so replaying the output
//! front-to-back against the original layout yields the new layout.
//!
//! Selection picks the largest absolute displacement, ties to the lowest
//! index. Receivers depend on this exact sequence.

use thiserror::Error;

use crate::modification::{InsertPosition, MoveTransaction};

/// How a neighbour is named in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// Leaf-list member, identified by value.
    Value(String),
    /// List member, identified by its key predicate.
    Key(String),
}

/// One visible instance of an ordered collection, in current display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderItem {
    /// Instance path.
    pub path: String,
    /// Identifier used when this instance is a neighbour.
    pub ident: Identifier,
    /// Marked for deletion; excluded from compilation.
    pub deleted: bool,
}

/// The permutation does not describe the visible instances.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("permutation of length {permutation} does not match {instances} instances")]
pub struct PermutationMismatch {
    /// Length of the permutation.
    pub permutation: usize,
    /// Instances that are not deleted.
    pub instances: usize,
}

/// True if `reorder` is a permutation of `0..reorder.len()`.
pub fn is_permutation(reorder: &[usize]) -> bool {
    let mut seen = vec![false; reorder.len()];
    for &i in reorder {
        match seen.get_mut(i) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

/// True if `reorder` maps every position to itself.
pub fn is_identity(reorder: &[usize]) -> bool {
    reorder.iter().enumerate().all(|(i, &o)| i == o)
}

/// Drops position `removed` from a permutation and re-ranks the remainder.
///
/// `removed` is an original position; the entry mapping to it is spliced out
/// and larger original positions shift down by one.
pub fn remove_position(reorder: &mut Vec<usize>, removed: usize) {
    reorder.retain(|&o| o != removed);
    for o in reorder.iter_mut() {
        if *o > removed {
            *o -= 1;
        }
    }
}

fn neighbour(mut tx: MoveTransaction, ident: &Identifier) -> MoveTransaction {
    match ident {
        Identifier::Value(v) => tx.value = Some(v.clone()),
        Identifier::Key(k) => tx.key = Some(k.clone()),
    }
    tx
}

/// Compiles `reorder` (`reorder[new] = original`) over `items` into moves.
///
/// Deleted items are dropped first; the permutation must cover exactly the
/// remaining items. The identity yields no transactions.
#[allow(clippy::cast_possible_wrap)]
pub fn compile(
    items: &[ReorderItem],
    reorder: &[usize],
) -> Result<Vec<MoveTransaction>, PermutationMismatch> {
    let mut arr: Vec<&ReorderItem> = items.iter().filter(|i| !i.deleted).collect();
    if arr.len() != reorder.len() || !is_permutation(reorder) {
        return Err(PermutationMismatch {
            permutation: reorder.len(),
            instances: arr.len(),
        });
    }
    let n = arr.len();
    let mut dist: Vec<isize> = reorder
        .iter()
        .enumerate()
        .map(|(j, &o)| j as isize - o as isize)
        .collect();
    let mut transactions: Vec<MoveTransaction> = Vec::new();

    loop {
        let mut pick: Option<(usize, isize)> = None;
        for (j, &d) in dist.iter().enumerate() {
            if d != 0 && pick.is_none_or(|(_, best)| d.abs() > best.abs()) {
                pick = Some((j, d));
            }
        }
        let Some((j, d)) = pick else {
            break;
        };
        let steps = d.unsigned_abs();
        let base = MoveTransaction {
            node: arr[j].path.clone(),
            insert: InsertPosition::First,
            value: None,
            key: None,
        };
        let (tx, target) = if d < 0 {
            let tx = if j == 0 {
                base
            } else {
                neighbour(
                    MoveTransaction {
                        insert: InsertPosition::Before,
                        ..base
                    },
                    &arr[j + 1].ident,
                )
            };
            for passed in &mut dist[j + 1..=j + steps] {
                *passed -= 1;
            }
            (tx, j + steps)
        } else {
            let tx = if j == n - 1 {
                MoveTransaction {
                    insert: InsertPosition::Last,
                    ..base
                }
            } else {
                neighbour(
                    MoveTransaction {
                        insert: InsertPosition::After,
                        ..base
                    },
                    &arr[j - 1].ident,
                )
            };
            for passed in &mut dist[j - steps..j] {
                *passed += 1;
            }
            (tx, j - steps)
        };
        let moved = arr.remove(j);
        arr.insert(target, moved);
        dist.remove(j);
        dist.insert(target, 0);
        transactions.insert(0, tx);
    }
    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(values: &[&str]) -> Vec<ReorderItem> {
        values
            .iter()
            .map(|v| ReorderItem {
                path: format!("/t:top/ll[.='{v}']"),
                ident: Identifier::Value((*v).to_owned()),
                deleted: false,
            })
            .collect()
    }

    #[test]
    fn identity_emits_nothing() {
        let tx = compile(&values(&["a", "b", "c"]), &[0, 1, 2]);
        assert_eq!(tx, Ok(Vec::new()));
    }

    #[test]
    fn rotation_to_front_is_single_move() {
        let tx = compile(&values(&["c", "a", "b"]), &[2, 0, 1]).unwrap_or_default();
        assert_eq!(tx.len(), 1);
        assert_eq!(tx[0].node, "/t:top/ll[.='c']");
        assert_eq!(tx[0].insert, InsertPosition::First);
    }

    #[test]
    fn rotation_to_back_uses_last() {
        let tx = compile(&values(&["b", "c", "a"]), &[1, 2, 0]).unwrap_or_default();
        assert_eq!(tx.len(), 1);
        assert_eq!(tx[0].node, "/t:top/ll[.='a']");
        assert_eq!(tx[0].insert, InsertPosition::Last);
    }

    #[test]
    fn swap_names_neighbour() {
        let tx = compile(&values(&["a", "c", "b"]), &[0, 2, 1]).unwrap_or_default();
        assert_eq!(tx.len(), 1);
        assert_eq!(tx[0].node, "/t:top/ll[.='c']");
        assert_eq!(tx[0].insert, InsertPosition::Before);
        assert_eq!(tx[0].value.as_deref(), Some("b"));
    }

    #[test]
    fn deleted_items_do_not_count() {
        let mut items = values(&["b", "x", "a"]);
        items[1].deleted = true;
        assert!(compile(&items, &[1, 0]).is_ok());
        assert!(compile(&items, &[2, 1, 0]).is_err());
    }

    #[test]
    fn malformed_permutation_is_rejected() {
        assert!(!is_permutation(&[0, 0]));
        assert!(!is_permutation(&[0, 2]));
        assert!(compile(&values(&["a", "b"]), &[1, 1]).is_err());
    }

    #[test]
    fn removing_position_reranks() {
        let mut reorder = vec![2, 0, 3, 1];
        remove_position(&mut reorder, 0);
        assert_eq!(reorder, vec![1, 2, 0]);
        assert!(is_permutation(&reorder));
    }
}
