// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted [`Transport`] fake.
//!
//! Responses are registered up front. Unscripted subtree, schema and value
//! lookups answer with an empty list; unscripted sessions are alive and
//! commits are accepted. Every submitted batch is recorded.

use confstage_core::commit::CommitBatch;
use confstage_core::node::Node;
use confstage_core::schema::SchemaInfo;
use confstage_core::transport::{CommitReply, Transport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Which transport call a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    /// [`Transport::fetch_subtree`].
    Subtree,
    /// [`Transport::fetch_child_schemas`].
    ChildSchemas,
    /// [`Transport::fetch_schema_values`].
    SchemaValues,
    /// [`Transport::commit`].
    Commit,
    /// [`Transport::check_alive`].
    CheckAlive,
}

/// In-memory transport with scripted answers. Clones share state.
#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    subtrees: HashMap<Option<String>, Vec<Node>>,
    child_schemas: HashMap<String, Vec<SchemaInfo>>,
    values: HashMap<String, Vec<String>>,
    alive: HashMap<String, bool>,
    replies: VecDeque<CommitReply>,
    failures: HashMap<Call, TransportError>,
    commits: Vec<(String, CommitBatch)>,
    calls: Vec<Call>,
}

impl FakeTransport {
    /// Transport with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Top-level nodes returned for a whole-configuration fetch.
    pub fn set_root(&self, nodes: Vec<Node>) {
        self.lock().subtrees.insert(None, nodes);
    }

    /// Children returned when the node at `path` is expanded.
    pub fn set_subtree(&self, path: &str, nodes: Vec<Node>) {
        self.lock().subtrees.insert(Some(path.to_owned()), nodes);
    }

    /// Child schemas returned for `schema_path`.
    pub fn set_child_schemas(&self, schema_path: &str, schemas: Vec<SchemaInfo>) {
        self.lock()
            .child_schemas
            .insert(schema_path.to_owned(), schemas);
    }

    /// Legal values returned for `schema_path`.
    pub fn set_values<I, V>(&self, schema_path: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.lock().values.insert(
            schema_path.to_owned(),
            values.into_iter().map(Into::into).collect(),
        );
    }

    /// Liveness answered for `session`.
    pub fn set_alive(&self, session: &str, alive: bool) {
        self.lock().alive.insert(session.to_owned(), alive);
    }

    /// Queues the reply to the next commit.
    pub fn push_reply(&self, reply: CommitReply) {
        self.lock().replies.push_back(reply);
    }

    /// Makes every `call` fail with `error` until [`Self::clear_failure`].
    pub fn fail(&self, call: Call, error: TransportError) {
        self.lock().failures.insert(call, error);
    }

    /// Lifts a scripted failure.
    pub fn clear_failure(&self, call: Call) {
        self.lock().failures.remove(&call);
    }

    /// Batches submitted so far, with their session keys.
    pub fn commits(&self) -> Vec<(String, CommitBatch)> {
        self.lock().commits.clone()
    }

    /// Number of times `call` was made.
    pub fn call_count(&self, call: Call) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }

    fn enter(&self, call: Call) -> Result<MutexGuard<'_, Inner>, TransportError> {
        let mut inner = self.lock();
        inner.calls.push(call);
        match inner.failures.get(&call) {
            Some(err) => Err(err.clone()),
            None => Ok(inner),
        }
    }
}

impl Transport for FakeTransport {
    async fn fetch_subtree(
        &self,
        _session: &str,
        path: Option<&str>,
        _recursive: bool,
    ) -> Result<Vec<Node>, TransportError> {
        let inner = self.enter(Call::Subtree)?;
        Ok(inner
            .subtrees
            .get(&path.map(str::to_owned))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_child_schemas(
        &self,
        _session: &str,
        schema_path: &str,
    ) -> Result<Vec<SchemaInfo>, TransportError> {
        let inner = self.enter(Call::ChildSchemas)?;
        Ok(inner
            .child_schemas
            .get(schema_path)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_schema_values(
        &self,
        _session: &str,
        schema_path: &str,
    ) -> Result<Vec<String>, TransportError> {
        let inner = self.enter(Call::SchemaValues)?;
        Ok(inner.values.get(schema_path).cloned().unwrap_or_default())
    }

    async fn commit(&self, session: &str, batch: &CommitBatch) -> Result<CommitReply, TransportError> {
        let mut inner = self.enter(Call::Commit)?;
        inner.commits.push((session.to_owned(), batch.clone()));
        Ok(inner.replies.pop_front().unwrap_or_else(CommitReply::accepted))
    }

    async fn check_alive(&self, session: &str) -> Result<bool, TransportError> {
        let inner = self.enter(Call::CheckAlive)?;
        Ok(inner.alive.get(session).copied().unwrap_or(true))
    }
}
