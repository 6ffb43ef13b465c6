// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client preferences persisted next to the sessions.

use serde::{Deserialize, Serialize};

/// Config key holding [`ClientPrefs`].
pub const CLIENT_PREFS_KEY: &str = "client_prefs";

/// Default backend endpoint.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5555";

/// Saved preferences of a configuration client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientPrefs {
    /// Base URL of the backend serving the device sessions.
    pub backend_url: String,
    /// Write sessions to the config store after every staged edit.
    pub persist_on_mutation: bool,
    /// Ask the backend whether restored sessions are alive on start-up.
    pub check_alive_on_load: bool,
}

impl Default for ClientPrefs {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_owned(),
            persist_on_mutation: true,
            check_alive_on_load: true,
        }
    }
}
