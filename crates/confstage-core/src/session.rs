// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Device sessions and their explicit, persisted store.

use confstage_app_core::config::{ConfigService, ConfigStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::modification::ModificationStore;
use crate::node::Node;
use crate::tree::{self, DataPresence};

/// Config key holding the session list.
pub const SESSIONS_KEY: &str = "sessions";
/// Config key holding the active session key.
pub const ACTIVE_SESSION_KEY: &str = "active_session";

/// Connection parameters of a device, carried opaquely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Display name.
    pub name: String,
    /// Host name or address.
    pub hostname: String,
    /// Port.
    pub port: u16,
    /// Login user.
    pub username: String,
}

/// One connection to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque transport handle.
    pub key: String,
    /// Device the session is connected to.
    pub device: Device,
    /// Root of the mirrored configuration tree, once loaded.
    #[serde(default)]
    pub data: Option<Node>,
    /// Staged, uncommitted changes.
    #[serde(default)]
    pub modifications: ModificationStore,
    /// Paths whose subtrees are shown in isolation.
    #[serde(default)]
    pub tree_filters: Vec<String>,
    /// How much of the tree has been fetched.
    #[serde(default)]
    pub data_presence: DataPresence,
}

impl Session {
    /// Fresh session with no data.
    pub fn new(key: impl Into<String>, device: Device) -> Self {
        Self {
            key: key.into(),
            device,
            data: None,
            modifications: ModificationStore::new(),
            tree_filters: Vec::new(),
            data_presence: DataPresence::None,
        }
    }

    /// Root node, or [`CoreError::NotLoaded`].
    pub fn root(&self) -> Result<&Node, CoreError> {
        self.data
            .as_ref()
            .ok_or_else(|| CoreError::NotLoaded(self.key.clone()))
    }

    /// Root node and modification store, borrowed together for mutation.
    pub(crate) fn split(&mut self) -> Result<(&mut Node, &mut ModificationStore), CoreError> {
        match self.data.as_mut() {
            Some(root) => Ok((root, &mut self.modifications)),
            None => Err(CoreError::NotLoaded(self.key.clone())),
        }
    }

    /// Drops records whose node reference no longer resolves in the tree.
    ///
    /// Returns the dropped paths.
    pub fn revalidate(&mut self) -> Vec<String> {
        let stale: Vec<String> = self
            .modifications
            .iter()
            .filter(|(_, record)| {
                record.data.as_deref().is_some_and(|data| {
                    self.data
                        .as_ref()
                        .and_then(|root| tree::find_node(root, data))
                        .is_none()
                })
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in &stale {
            warn!(session = %self.key, path = %path, "dropping record for missing node");
            self.modifications.remove(Some(path));
        }
        stale
    }
}

/// All open sessions plus the active selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStore {
    sessions: Vec<Session>,
    active: Option<String>,
}

impl SessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads sessions persisted under [`SESSIONS_KEY`] and
    /// [`ACTIVE_SESSION_KEY`], re-validating every record's node reference.
    pub fn load<S: ConfigStore>(config: &ConfigService<S>) -> Result<Self, CoreError> {
        let mut sessions: Vec<Session> = config.load(SESSIONS_KEY)?.unwrap_or_default();
        let active: Option<String> = config.load::<Option<String>>(ACTIVE_SESSION_KEY)?.flatten();
        for session in &mut sessions {
            session.revalidate();
        }
        let active = active.filter(|key| sessions.iter().any(|s| s.key == *key));
        debug!(count = sessions.len(), "loaded sessions");
        Ok(Self { sessions, active })
    }

    /// Writes the sessions and the active selection.
    pub fn persist<S: ConfigStore>(&self, config: &ConfigService<S>) -> Result<(), CoreError> {
        config.save(SESSIONS_KEY, &self.sessions)?;
        config.save(ACTIVE_SESSION_KEY, &self.active)?;
        Ok(())
    }

    /// Opens (or replaces) a session and makes it active.
    pub fn open(&mut self, key: impl Into<String>, device: Device) -> &mut Session {
        let key = key.into();
        info!(session = %key, device = %device.name, "session opened");
        let index = match self.sessions.iter().position(|s| s.key == key) {
            Some(i) => {
                self.sessions[i] = Session::new(key.clone(), device);
                i
            }
            None => {
                self.sessions.push(Session::new(key.clone(), device));
                self.sessions.len() - 1
            }
        };
        self.active = Some(key);
        &mut self.sessions[index]
    }

    /// Removes a session. If it was active, the left neighbour becomes
    /// active, else the right one, else none.
    pub fn close(&mut self, key: &str) -> Option<Session> {
        let index = self.sessions.iter().position(|s| s.key == key)?;
        let removed = self.sessions.remove(index);
        if self.active.as_deref() == Some(key) {
            let next = if index > 0 {
                self.sessions.get(index - 1)
            } else {
                self.sessions.get(index)
            };
            self.active = next.map(|s| s.key.clone());
        }
        info!(session = %key, "session closed");
        Some(removed)
    }

    /// Drops a session whose device stopped answering.
    pub fn drop_dead(&mut self, key: &str) -> Option<Session> {
        warn!(session = %key, "device unreachable, dropping session");
        self.close(key)
    }

    /// Session by key.
    pub fn get(&self, key: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.key == key)
    }

    /// Mutable session by key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.key == key)
    }

    /// Session by key, or [`CoreError::UnknownSession`].
    pub fn require_mut(&mut self, key: &str) -> Result<&mut Session, CoreError> {
        self.get_mut(key)
            .ok_or_else(|| CoreError::UnknownSession(key.to_owned()))
    }

    /// Selects the active session; unknown keys are rejected.
    pub fn set_active(&mut self, key: &str) -> Result<(), CoreError> {
        if self.get(key).is_none() {
            return Err(CoreError::UnknownSession(key.to_owned()));
        }
        self.active = Some(key.to_owned());
        Ok(())
    }

    /// Key of the active session.
    pub fn active_key(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// The active session.
    pub fn active(&self) -> Option<&Session> {
        self.active.as_deref().and_then(|key| self.get(key))
    }

    /// Sessions in opening order.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Session keys in opening order.
    pub fn keys(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.key.clone()).collect()
    }

    /// No open sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
