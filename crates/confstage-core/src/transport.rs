// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Port to the device backend (subtree fetches, schema queries, commit).
//!
//! The engine never talks to the network directly. A [`Transport`] owns the
//! wire format; the driver in [`crate::client`] awaits its futures on a
//! single logical thread, so no `Send` bound is required.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commit::CommitBatch;
use crate::node::Node;
use crate::schema::SchemaInfo;

/// Failure reported by a transport implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Backend or device could not be reached.
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// Backend answered with a failure.
    #[error("backend error: {0}")]
    Backend(String),
    /// Response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// One server-side error entry, surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Error entry with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Reply to a commit request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReply {
    /// Whether the device accepted the batch.
    pub success: bool,
    /// Errors reported by the device on failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ServerError>,
}

impl CommitReply {
    /// Successful reply.
    pub fn accepted() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    /// Failed reply carrying the given messages.
    pub fn rejected<I, M>(messages: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        Self {
            success: false,
            errors: messages.into_iter().map(ServerError::new).collect(),
        }
    }
}

/// Backend operations consumed by the engine.
pub trait Transport {
    /// Fetches the children of the node at `path`, or the top-level nodes of
    /// the whole configuration when `None`.
    fn fetch_subtree(
        &self,
        session: &str,
        path: Option<&str>,
        recursive: bool,
    ) -> impl Future<Output = Result<Vec<Node>, TransportError>>;

    /// Candidate child schemas of the schema node at `schema_path`.
    fn fetch_child_schemas(
        &self,
        session: &str,
        schema_path: &str,
    ) -> impl Future<Output = Result<Vec<SchemaInfo>, TransportError>>;

    /// Legal values of an enumeration or bits leaf.
    fn fetch_schema_values(
        &self,
        session: &str,
        schema_path: &str,
    ) -> impl Future<Output = Result<Vec<String>, TransportError>>;

    /// Submits a compiled batch.
    fn commit(
        &self,
        session: &str,
        batch: &CommitBatch,
    ) -> impl Future<Output = Result<CommitReply, TransportError>>;

    /// Whether the device session is still alive.
    fn check_alive(&self, session: &str) -> impl Future<Output = Result<bool, TransportError>>;
}
