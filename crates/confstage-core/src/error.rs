// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types for staging, validation and commit.

use confstage_app_core::config::ConfigError;
use thiserror::Error;

use crate::transport::{ServerError, TransportError};

/// Errors surfaced by the staging engine and the client driver.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A key leaf of a new list instance was never given a value.
    #[error("not confirmed value of the {path} key.")]
    UnconfirmedKey {
        /// Path of the key leaf.
        path: String,
    },
    /// A list instance does not carry exactly its declared keys.
    #[error("invalid number ({found}) of keys in {path}")]
    InvalidKeyCount {
        /// Path of the list instance.
        path: String,
        /// Key leaves found among the children.
        found: usize,
        /// Keys declared by the schema.
        expected: usize,
    },
    /// A list instance has no children at all.
    #[error("no key in {path}")]
    MissingKeys {
        /// Path of the list instance.
        path: String,
    },
    /// Child schemas or a value set could not be fetched.
    #[error("schema fetch failed: {0}")]
    SchemaFetchFailed(#[source] TransportError),
    /// A commit or subtree fetch failed on the wire.
    #[error("transport failed: {0}")]
    TransportFailed(#[source] TransportError),
    /// The device refused the commit; messages are passed through verbatim.
    #[error("commit rejected: {}", join_messages(.0))]
    CommitRejected(Vec<ServerError>),
    /// No node at the given path.
    #[error("node not found: {0}")]
    NodeNotFound(String),
    /// Creation index outside the parent's creatable schema list.
    #[error("schema index {index} out of range under {path}")]
    SchemaIndexOutOfRange {
        /// Parent path.
        path: String,
        /// Requested index.
        index: usize,
    },
    /// The node has no open creation dialog.
    #[error("no creation in progress under {0}")]
    NotCreating(String),
    /// No session with the given key.
    #[error("unknown session: {0}")]
    UnknownSession(String),
    /// The session has no data tree yet.
    #[error("session {0} has no data loaded")]
    NotLoaded(String),
    /// The node is marked for deletion and cannot be edited.
    #[error("node is marked for deletion: {0}")]
    NodeDeleted(String),
    /// Another instance already carries the requested identity.
    #[error("duplicate instance: {0}")]
    DuplicateInstance(String),
    /// A reorder permutation does not match its collection.
    #[error("invalid permutation for {path}")]
    InvalidPermutation {
        /// Record path.
        path: String,
    },
    /// Session persistence failed.
    #[error("persistence failed: {0}")]
    Persist(#[from] ConfigError),
}

impl CoreError {
    /// Commit-time validation failure (nothing was sent).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnconfirmedKey { .. }
                | Self::InvalidKeyCount { .. }
                | Self::MissingKeys { .. }
                | Self::InvalidPermutation { .. }
                | Self::DuplicateInstance(_)
        )
    }
}

fn join_messages(errors: &[ServerError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
