// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing session persistence without
//! filesystem I/O.

use confstage_app_core::config::{ConfigError, ConfigStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory implementation of [`ConfigStore`].
///
/// Clones share state, so a test can hand one clone to a
/// `ConfigService` and inspect the other. Load and save attempts are
/// counted, and either direction can be made to fail.
///
/// # Example
///
/// ```
/// use confstage_dry_tests::InMemoryConfigStore;
/// use confstage_app_core::config::ConfigService;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
///
/// service.save("active_session", &Some("s1")).unwrap();
/// assert_eq!(store.save_count(), 1);
/// assert!(store.contains_key("active_session"));
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: HashMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemoryConfigStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with JSON text per key.
    pub fn with_json<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let data = entries
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.as_bytes().to_vec()))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data,
                ..Inner::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make subsequent loads fail.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Make subsequent saves fail.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_on_save = fail;
    }

    /// Number of `load_raw` attempts, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Number of `save_raw` attempts, failed ones included.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Whether a blob is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }

    /// Stored blob under `key` parsed as JSON.
    pub fn json(&self, key: &str) -> Option<serde_json::Value> {
        self.lock()
            .data
            .get(key)
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.load_count += 1;
        if inner.fail_on_load {
            return Err(ConfigError::Other("simulated load failure".into()));
        }
        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.save_count += 1;
        if inner.fail_on_save {
            return Err(ConfigError::Other("simulated save failure".into()));
        }
        inner.data.insert(key.to_owned(), data.to_vec());
        Ok(())
    }

    fn delete_raw(&self, key: &str) -> Result<(), ConfigError> {
        self.lock().data.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn clones_share_blobs_and_counters() {
        let a = InMemoryConfigStore::new();
        let b = a.clone();
        a.save_raw("sessions", b"[]").unwrap();
        assert_eq!(b.load_raw("sessions").unwrap(), b"[]");
        assert_eq!(a.load_count(), 1);
        assert_eq!(b.save_count(), 1);
    }

    #[test]
    fn failed_save_is_counted_but_not_stored() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_save(true);
        assert!(matches!(
            store.save_raw("k", b"1"),
            Err(ConfigError::Other(_))
        ));
        assert_eq!(store.save_count(), 1);
        assert!(!store.contains_key("k"));
        store.set_fail_on_save(false);
        store.save_raw("k", b"1").unwrap();
        assert!(store.contains_key("k"));
    }

    #[test]
    fn load_failure_and_missing_keys_are_distinct() {
        let store = InMemoryConfigStore::with_json([("k", "1")]);
        assert!(matches!(store.load_raw("x"), Err(ConfigError::NotFound)));
        store.set_fail_on_load(true);
        assert!(matches!(store.load_raw("k"), Err(ConfigError::Other(_))));
    }

    #[test]
    fn delete_forgets_the_blob() {
        let store = InMemoryConfigStore::with_json([("k", "{\"a\":1}")]);
        assert_eq!(store.json("k"), Some(serde_json::json!({"a": 1})));
        store.delete_raw("k").unwrap();
        store.delete_raw("k").unwrap();
        assert!(store.json("k").is_none());
    }
}
