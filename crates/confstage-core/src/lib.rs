// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! confstage-core: staged modification and tree reconciliation for a
//! NETCONF/YANG configuration client.
//!
//! A session mirrors a device's configuration as a [`Node`] tree. User edits
//! (value changes, creations, deletions, moves within ordered collections)
//! are applied to the tree immediately and recorded in a
//! [`ModificationStore`] keyed by data path. On commit the records are
//! validated, their placeholder paths are rewritten to key predicates, moves
//! are compiled into insert transactions, and the resulting
//! [`CommitBatch`] is handed to a [`Transport`].
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate
)]

pub mod client;
pub mod commit;
pub mod error;
pub mod modification;
pub mod mutator;
pub mod node;
pub mod path;
pub mod reorder;
pub mod schema;
pub mod session;
pub mod transport;
pub mod tree;

pub use client::ConfigClient;
pub use commit::{commit, compile_commit, CommitBatch, CommitEntry};
pub use error::CoreError;
pub use modification::{
    InsertPosition, ModificationKind, ModificationRecord, ModificationStore, MoveTransaction,
    Original,
};
pub use mutator::{CloseReason, Completion, CreateOutcome, EditReadiness, PendingFetch, SchemaRequest};
pub use node::{Node, NodeFlags};
pub use schema::{NodeKind, SchemaInfo};
pub use session::{Device, Session, SessionStore};
pub use transport::{CommitReply, ServerError, Transport, TransportError};
pub use tree::DataPresence;
