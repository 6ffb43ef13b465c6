// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Async driver tying sessions, the engine and a [`Transport`] together.
//!
//! The driver owns the [`SessionStore`] and performs the fetches the engine
//! asks for. All methods take `&mut self`, so one session tree is never
//! mutated from two places at once. Sessions are persisted after every
//! mutating call when [`ClientPrefs::persist_on_mutation`] is set.

use confstage_app_core::config::{ConfigService, ConfigStore};
use confstage_app_core::prefs::{ClientPrefs, CLIENT_PREFS_KEY};
use tracing::{debug, info, instrument, warn};

use crate::commit::{self, CommitBatch};
use crate::error::CoreError;
use crate::modification::ModificationKind;
use crate::mutator::{self, CloseReason, Completion, EditReadiness, PendingFetch, SchemaRequest};
use crate::node::Node;
use crate::session::{Device, SessionStore};
use crate::transport::{Transport, TransportError};
use crate::tree;

/// Configuration client over one transport.
pub struct ConfigClient<T, S> {
    transport: T,
    sessions: SessionStore,
    config: Option<ConfigService<S>>,
    prefs: ClientPrefs,
}

impl<T, S> ConfigClient<T, S>
where
    T: Transport,
    S: ConfigStore,
{
    /// Client without persistence.
    pub fn in_memory(transport: T) -> Self {
        Self {
            transport,
            sessions: SessionStore::new(),
            config: None,
            prefs: ClientPrefs::default(),
        }
    }

    /// Client restoring its preferences and sessions from `config`.
    pub fn with_config(transport: T, config: ConfigService<S>) -> Result<Self, CoreError> {
        let prefs = config.load(CLIENT_PREFS_KEY)?.unwrap_or_default();
        let sessions = SessionStore::load(&config)?;
        Ok(Self {
            transport,
            sessions,
            config: Some(config),
            prefs,
        })
    }

    /// Runs the start-up liveness check if enabled. Returns dropped keys.
    pub async fn start(&mut self) -> Vec<String> {
        if self.prefs.check_alive_on_load {
            self.check_sessions().await
        } else {
            Vec::new()
        }
    }

    /// Open sessions.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Mutable access to the sessions, bypassing persistence.
    pub fn sessions_mut(&mut self) -> &mut SessionStore {
        &mut self.sessions
    }

    /// Active preferences.
    pub fn prefs(&self) -> &ClientPrefs {
        &self.prefs
    }

    /// Replaces the preferences and stores them.
    pub fn set_prefs(&mut self, prefs: ClientPrefs) -> Result<(), CoreError> {
        if let Some(config) = &self.config {
            config.save(CLIENT_PREFS_KEY, &prefs)?;
        }
        self.prefs = prefs;
        Ok(())
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Writes all sessions now.
    pub fn save(&self) -> Result<(), CoreError> {
        match &self.config {
            Some(config) => self.sessions.persist(config),
            None => Ok(()),
        }
    }

    fn checkpoint(&self) {
        if !self.prefs.persist_on_mutation {
            return;
        }
        if let Err(err) = self.save() {
            warn!(%err, "persisting sessions failed");
        }
    }

    /// Registers a connected session and makes it active.
    pub fn open_session(&mut self, key: &str, device: Device) {
        self.sessions.open(key, device);
        self.checkpoint();
    }

    /// Forgets a session.
    pub fn close_session(&mut self, key: &str) -> Result<(), CoreError> {
        self.sessions
            .close(key)
            .ok_or_else(|| CoreError::UnknownSession(key.to_owned()))?;
        self.checkpoint();
        Ok(())
    }

    /// Fetches the whole configuration and installs it under a `/` root.
    ///
    /// The root keeps the uncommitted children that still have a Create or
    /// Replace record; staged edits are overlaid on the fetched nodes.
    #[instrument(skip(self))]
    pub async fn load_root(&mut self, key: &str) -> Result<(), CoreError> {
        self.sessions
            .get(key)
            .ok_or_else(|| CoreError::UnknownSession(key.to_owned()))?;
        let nodes = self
            .transport
            .fetch_subtree(key, None, true)
            .await
            .map_err(CoreError::TransportFailed)?;
        let session = self.sessions.require_mut(key)?;
        let mut root = session.data.take().unwrap_or_else(Node::root);
        let store = &session.modifications;
        root.new_children.retain(|c| {
            store.has(&c.path, ModificationKind::Create)
                || store.has(&c.path, ModificationKind::Replace)
        });
        root.info.config = true;
        root.children = nodes;
        tree::normalize(&mut root.children);
        mutator::apply_pending(&mut session.modifications, &mut root);
        session.data_presence = tree::update_hidden_flags(&mut root);
        session.tree_filters.clear();
        session.data = Some(root);
        session.revalidate();
        info!(presence = ?session.data_presence, "configuration loaded");
        self.checkpoint();
        Ok(())
    }

    /// Fetches the children of a node whose subtree was never loaded.
    ///
    /// With `all == false` the fetched children become tree filters.
    #[instrument(skip(self))]
    pub async fn expand(&mut self, key: &str, path: &str, all: bool) -> Result<(), CoreError> {
        let nodes = self
            .transport
            .fetch_subtree(key, Some(path), true)
            .await
            .map_err(CoreError::TransportFailed)?;
        let session = self.sessions.require_mut(key)?;
        let (root, store) = session.split()?;
        let Some(node) = tree::find_node_mut(root, path) else {
            warn!(path, "subtree arrived for a node that is gone");
            return Ok(());
        };
        node.children = nodes;
        node.flags.subtree_root = false;
        tree::normalize(&mut node.children);
        node.children
            .retain(|c| !store.has(&c.path, ModificationKind::Replace));
        mutator::apply_reorders(store, node);
        for child in &mut node.children {
            mutator::apply_pending(store, child);
        }
        let filters: Vec<String> = if all {
            Vec::new()
        } else {
            node.children.iter().map(|c| c.path.clone()).collect()
        };
        let presence = tree::update_hidden_flags(root);
        session.tree_filters.extend(filters);
        session.data_presence = presence;
        session.revalidate();
        debug!(?presence, "subtree expanded");
        self.checkpoint();
        Ok(())
    }

    async fn fetch_values(&mut self, key: &str, requests: Vec<SchemaRequest>) -> Result<(), CoreError> {
        for request in requests {
            let result = self
                .transport
                .fetch_schema_values(key, &request.schema_path)
                .await;
            let session = self.sessions.require_mut(key)?;
            mutator::finish_editing(session, &request, result)?;
        }
        Ok(())
    }

    async fn fetch_child_schemas(&mut self, key: &str, request: SchemaRequest) -> Result<(), CoreError> {
        let result = self
            .transport
            .fetch_child_schemas(key, &request.schema_path)
            .await;
        let session = self.sessions.require_mut(key)?;
        let completion = mutator::finish_child_schemas(session, &request, result);
        self.checkpoint();
        if let Completion::Applied(pending) = completion? {
            self.fetch_values(key, pending).await?;
        }
        Ok(())
    }

    /// Opens or closes the value editor, fetching the legal values first when
    /// needed.
    #[instrument(skip(self))]
    pub async fn set_editing(&mut self, key: &str, path: &str, enabling: bool) -> Result<(), CoreError> {
        let session = self.sessions.require_mut(key)?;
        if let EditReadiness::NeedsValues(request) = mutator::set_editing(session, path, enabling)? {
            self.fetch_values(key, vec![request]).await?;
        }
        Ok(())
    }

    /// Fetches the creatable child schemas of `path` and opens its creation
    /// dialog.
    #[instrument(skip(self))]
    pub async fn open_create_dialog(&mut self, key: &str, path: &str) -> Result<(), CoreError> {
        let session = self.sessions.require_mut(key)?;
        let node = tree::find_node(session.root()?, path)
            .ok_or_else(|| CoreError::NodeNotFound(path.to_owned()))?;
        let request = SchemaRequest {
            path: node.path.clone(),
            schema_path: node.info.path.clone(),
        };
        self.fetch_child_schemas(key, request).await
    }

    /// Closes the creation dialog of `path`.
    pub fn close_create_dialog(&mut self, key: &str, path: &str, reason: CloseReason) -> Result<(), CoreError> {
        let session = self.sessions.require_mut(key)?;
        mutator::close_creation(session, path, reason)?;
        self.checkpoint();
        Ok(())
    }

    /// Creates a child from the creatable pool of `parent` and completes it.
    ///
    /// Returns the new node's path. A failed schema fetch leaves the new node
    /// in place without an open dialog.
    #[instrument(skip(self))]
    pub async fn create_child(&mut self, key: &str, parent: &str, index: usize) -> Result<String, CoreError> {
        let session = self.sessions.require_mut(key)?;
        let outcome = mutator::create_child(session, parent, index)?;
        self.checkpoint();
        match outcome.pending {
            None => {}
            Some(PendingFetch::ChildSchemas(request)) => {
                self.fetch_child_schemas(key, request).await?;
            }
            Some(PendingFetch::SchemaValues(request)) => {
                self.fetch_values(key, vec![request]).await?;
            }
        }
        Ok(outcome.path)
    }

    /// Stages a new value.
    pub fn change_value(&mut self, key: &str, path: &str, value: &str) -> Result<(), CoreError> {
        mutator::change_value(self.sessions.require_mut(key)?, path, value)?;
        self.checkpoint();
        Ok(())
    }

    /// Stages a deletion.
    pub fn delete_node(&mut self, key: &str, path: &str) -> Result<(), CoreError> {
        mutator::delete_node(self.sessions.require_mut(key)?, path)?;
        self.checkpoint();
        Ok(())
    }

    /// Stages a move within an ordered collection.
    pub fn move_instance(&mut self, key: &str, path: &str, from: usize, to: usize) -> Result<(), CoreError> {
        mutator::move_instance(self.sessions.require_mut(key)?, path, from, to)?;
        self.checkpoint();
        Ok(())
    }

    /// Reverts staged changes below `path` (everything when `None`).
    pub fn cancel_all(&mut self, key: &str, path: Option<&str>) -> Result<(), CoreError> {
        mutator::cancel_all(self.sessions.require_mut(key)?, path, true)?;
        self.checkpoint();
        Ok(())
    }

    /// Compiles and submits the staged changes, then reloads the tree.
    ///
    /// The reload is best effort; its failure is logged, not returned.
    #[instrument(skip(self))]
    pub async fn commit(&mut self, key: &str) -> Result<CommitBatch, CoreError> {
        let session = self.sessions.require_mut(key)?;
        let batch = commit::commit(session, &self.transport).await?;
        self.checkpoint();
        if let Err(err) = self.load_root(key).await {
            warn!(%err, "reload after commit failed");
        }
        Ok(batch)
    }

    /// Asks the transport whether every session is alive, newest first, and
    /// drops the dead ones. Returns the dropped keys.
    #[instrument(skip(self))]
    pub async fn check_sessions(&mut self) -> Vec<String> {
        let mut dropped = Vec::new();
        for key in self.sessions.keys().into_iter().rev() {
            match self.transport.check_alive(&key).await {
                Ok(true) => {}
                Ok(false) | Err(TransportError::Unreachable(_)) => {
                    self.sessions.drop_dead(&key);
                    dropped.push(key);
                }
                Err(err) => warn!(session = %key, %err, "liveness check failed"),
            }
        }
        if !dropped.is_empty() {
            self.checkpoint();
        }
        dropped
    }
}
