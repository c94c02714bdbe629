use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::KeeperError;

#[derive(Serialize, Deserialize, Default)]
struct SessionState {
    #[serde(default)]
    token: String,
    #[serde(with = "id_set", default)]
    deleted_ids: HashSet<i64>,
    #[serde(with = "id_set", default)]
    edited_ids: HashSet<i64>,
}

/// The journal sets sit on disk as `{id: {}}` objects, so the file stays
/// readable by anything that indexes by id.
mod id_set {
    use std::collections::{BTreeMap, HashSet};

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Empty {}

    pub fn serialize<S: Serializer>(ids: &HashSet<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        let map: BTreeMap<i64, Empty> = ids.iter().map(|id| (*id, Empty {})).collect();
        map.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashSet<i64>, D::Error> {
        let map = BTreeMap::<i64, Empty>::deserialize(deserializer)?;
        Ok(map.into_keys().collect())
    }
}

struct Inner {
    file: File,
    state: SessionState,
}

/// The session journal: the bearer token plus the sets of server-assigned
/// ids deleted or edited since the last successful sync. Readers take the
/// read lock; writers mutate and flush to disk under the write lock.
///
/// Only the journal can distinguish "absent locally because deleted" from
/// "absent locally because never received". Purely local records (negative
/// ids) never enter it.
pub struct ClientSession {
    inner: RwLock<Inner>,
}

impl ClientSession {
    pub fn open(path: &Path) -> Result<Self, KeeperError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let mut raw = String::new();
        file.read_to_string(&mut raw)?;

        let mut state: SessionState = if raw.trim().is_empty() {
            SessionState::default()
        } else {
            serde_json::from_str(&raw).map_err(|e| {
                tracing::error!(error = %e, "Failed to parse session file");
                KeeperError::Integrity("session-parse-failed")
            })?
        };

        // A persisted token is never trusted across launches; the user logs
        // in again.
        state.token.clear();

        Ok(Self {
            inner: RwLock::new(Inner { file, state }),
        })
    }

    pub fn set_token(&self, token: String) -> Result<(), KeeperError> {
        let mut inner = self.write_lock()?;
        inner.state.token = token;
        persist(&mut inner)
    }

    pub fn token(&self) -> String {
        self.read_lock()
            .map(|inner| inner.state.token.clone())
            .unwrap_or_default()
    }

    pub fn is_auth(&self) -> bool {
        self.read_lock()
            .map(|inner| !inner.state.token.is_empty())
            .unwrap_or(false)
    }

    pub fn add_deleted(&self, id: i64) -> Result<(), KeeperError> {
        if id < 0 {
            return Ok(());
        }
        let mut inner = self.write_lock()?;
        inner.state.deleted_ids.insert(id);
        persist(&mut inner)
    }

    pub fn is_deleted(&self, id: i64) -> bool {
        self.read_lock()
            .map(|inner| inner.state.deleted_ids.contains(&id))
            .unwrap_or(false)
    }

    pub fn clear_deleted(&self) -> Result<(), KeeperError> {
        let mut inner = self.write_lock()?;
        inner.state.deleted_ids.clear();
        persist(&mut inner)
    }

    pub fn add_edited(&self, id: i64) -> Result<(), KeeperError> {
        if id < 0 {
            return Ok(());
        }
        let mut inner = self.write_lock()?;
        inner.state.edited_ids.insert(id);
        persist(&mut inner)
    }

    pub fn is_edited(&self, id: i64) -> bool {
        self.read_lock()
            .map(|inner| inner.state.edited_ids.contains(&id))
            .unwrap_or(false)
    }

    pub fn clear_edited(&self) -> Result<(), KeeperError> {
        let mut inner = self.write_lock()?;
        inner.state.edited_ids.clear();
        persist(&mut inner)
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, KeeperError> {
        self.inner
            .read()
            .map_err(|_| KeeperError::Internal("session lock poisoned".to_string()))
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, KeeperError> {
        self.inner
            .write()
            .map_err(|_| KeeperError::Internal("session lock poisoned".to_string()))
    }
}

fn persist(inner: &mut Inner) -> Result<(), KeeperError> {
    let encoded = serde_json::to_vec(&inner.state).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialize session");
        KeeperError::Integrity("session-encode-failed")
    })?;

    inner.file.set_len(0)?;
    inner.file.seek(SeekFrom::Start(0))?;
    inner.file.write_all(&encoded)?;
    inner.file.flush()?;

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────
