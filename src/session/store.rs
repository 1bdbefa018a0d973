//! Phone-keyed JSON session store.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::mask_phone;

/// Opaque serialized client session.
///
/// The contents are a credential; `Debug` never prints them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionBlob(String);

impl SessionBlob {
    #[must_use]
    pub fn new(blob: impl Into<String>) -> Self {
        Self(blob.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SessionBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionBlob(<{} bytes>)", self.0.len())
    }
}

/// Errors that can occur while writing the session file.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("Failed to write session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize sessions: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persists session blobs in one JSON object mapping phone → blob.
///
/// Every write re-reads the file, changes one key and rewrites the whole
/// map, so entries of other accounts survive. Writes are serialized by an
/// internal lock; share one store per file across the process.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SessionStore {
    /// Creates a store backed by the given file. The file need not exist.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the session for a phone number.
    ///
    /// A missing, unreadable or corrupt file is treated as an empty store.
    pub fn load(&self, phone: &str) -> Option<SessionBlob> {
        let _guard = self.lock.lock();
        let blob = self.read_map().remove(phone).filter(|b| !b.is_empty());
        debug!(
            "Session for {}: {}",
            mask_phone(phone),
            if blob.is_some() { "found" } else { "absent" }
        );
        blob
    }

    /// Stores the session for a phone number, keeping all other entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, phone: &str, blob: &SessionBlob) -> Result<(), SessionStoreError> {
        let _guard = self.lock.lock();
        let mut map = self.read_map();
        map.insert(phone.to_owned(), blob.clone());
        self.write_map(&map)?;
        debug!("Saved session for {}", mask_phone(phone));
        Ok(())
    }

    /// Removes the session for a phone number. Removing an absent entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn delete(&self, phone: &str) -> Result<(), SessionStoreError> {
        let _guard = self.lock.lock();
        let mut map = self.read_map();
        if map.remove(phone).is_none() {
            return Ok(());
        }
        self.write_map(&map)?;
        debug!("Deleted session for {}", mask_phone(phone));
        Ok(())
    }

    /// Phone numbers that currently have a stored session.
    pub fn phones(&self) -> Vec<String> {
        let _guard = self.lock.lock();
        self.read_map().into_keys().collect()
    }

    fn read_map(&self) -> BTreeMap<String, SessionBlob> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!("Failed to read session file {}: {}", self.path.display(), e);
                return BTreeMap::new();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(
                "Session file {} is corrupt, treating as empty: {}",
                self.path.display(),
                e
            );
            BTreeMap::new()
        })
    }

    fn write_map(&self, map: &BTreeMap<String, SessionBlob>) -> Result<(), SessionStoreError> {
        let json = serde_json::to_string_pretty(map)?;
        let io_err = |source| SessionStoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        // Rename over the original so a failed write leaves the old map intact.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SessionStore {
        SessionStore::new(dir.path().join("sessions.json"))
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let blob = SessionBlob::new("AQAAAbase64blob==");

        store.save("+15551234567", &blob).unwrap();
        assert_eq!(store.load("+15551234567"), Some(blob));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.load("+15551234567"), None);
        assert!(store.phones().is_empty());
    }

    #[test]
    fn test_save_keeps_other_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.save("+1111111", &SessionBlob::new("first")).unwrap();
        store.save("+2222222", &SessionBlob::new("second")).unwrap();

        assert_eq!(store.load("+1111111"), Some(SessionBlob::new("first")));
        assert_eq!(store.load("+2222222"), Some(SessionBlob::new("second")));
        assert_eq!(store.phones(), vec!["+1111111".to_owned(), "+2222222".to_owned()]);
    }

    #[test]
    fn test_corrupt_file_is_tolerated_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{not json").unwrap();

        assert_eq!(store.load("+1111111"), None);

        store.save("+1111111", &SessionBlob::new("fresh")).unwrap();
        assert_eq!(store.load("+1111111"), Some(SessionBlob::new("fresh")));
    }

    #[test]
    fn test_delete_only_removes_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.save("+1111111", &SessionBlob::new("first")).unwrap();
        store.save("+2222222", &SessionBlob::new("second")).unwrap();
        store.delete("+1111111").unwrap();
        store.delete("+3333333").unwrap();

        assert_eq!(store.load("+1111111"), None);
        assert_eq!(store.load("+2222222"), Some(SessionBlob::new("second")));
    }

    #[test]
    fn test_file_is_phone_keyed_json_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save("+1111111", &SessionBlob::new("blob")).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["+1111111"], "blob");
    }

    #[test]
    fn test_concurrent_saves_do_not_lose_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .save(&format!("+100000{i}"), &SessionBlob::new(format!("blob{i}")))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.phones().len(), 8);
    }

    #[test]
    fn test_blob_debug_is_redacted() {
        let blob = SessionBlob::new("secret-session");
        assert_eq!(format!("{blob:?}"), "SessionBlob(<14 bytes>)");
    }
}
