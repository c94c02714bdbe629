use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::KeeperError;
use crate::record::{now_secs, ListFilters, Record, RecordKind};

/// On-disk row shape of `user_stored_data.json`. The owner is implicit: the
/// replica only ever holds the current user's records.
#[derive(Serialize, Deserialize)]
struct DiskRecord {
    id: i64,
    data_type: RecordKind,
    crypted_data: String,
    meta: String,
    version: i64,
    created_at: u64,
}

impl From<DiskRecord> for Record {
    fn from(disk: DiskRecord) -> Self {
        Record {
            id: disk.id,
            owner_id: 0,
            kind: disk.data_type,
            ciphertext: disk.crypted_data,
            meta: disk.meta,
            version: disk.version,
            created_at: disk.created_at,
        }
    }
}

impl From<&Record> for DiskRecord {
    fn from(record: &Record) -> Self {
        DiskRecord {
            id: record.id,
            data_type: record.kind,
            crypted_data: record.ciphertext.clone(),
            meta: record.meta.clone(),
            version: record.version,
            created_at: record.created_at,
        }
    }
}

/// The client's offline replica. The whole structure is rewritten to disk on
/// every mutation; the file handle stays open for the store's lifetime.
pub struct LocalStore {
    file: File,
    records: Vec<Record>,
    next_local_id: i64,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self, KeeperError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let mut raw = String::new();
        file.read_to_string(&mut raw)?;

        let records: Vec<Record> = if raw.trim().is_empty() {
            Vec::new()
        } else {
            let disk: Vec<DiskRecord> = serde_json::from_str(&raw).map_err(|e| {
                tracing::error!(error = %e, "Failed to parse stored data file");
                KeeperError::Integrity("store-parse-failed")
            })?;
            disk.into_iter().map(Record::from).collect()
        };

        // The counter only ever grows, so deleted local ids are never reused
        // within a session.
        let next_local_id = records.len() as i64;

        Ok(Self {
            file,
            records,
            next_local_id,
        })
    }

    pub fn get_all(&self) -> Vec<Record> {
        self.records.clone()
    }

    pub fn get_by_id(&self, id: i64) -> Result<Record, KeeperError> {
        self.records
            .iter()
            .find(|record| record.id == id)
            .cloned()
            .ok_or(KeeperError::NotFound)
    }

    /// Insert a new, not-yet-uploaded record under a freshly minted negative
    /// id. Returns the minted id.
    pub fn add(
        &mut self,
        kind: RecordKind,
        ciphertext: String,
        meta: String,
    ) -> Result<i64, KeeperError> {
        let id = self.mint_local_id();
        self.records.push(Record {
            id,
            owner_id: 0,
            kind,
            ciphertext,
            meta,
            version: -1,
            created_at: now_secs(),
        });
        self.save()?;

        Ok(id)
    }

    pub fn update_by_id(
        &mut self,
        id: i64,
        ciphertext: String,
        meta: String,
    ) -> Result<Record, KeeperError> {
        let record = self
            .records
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or(KeeperError::NotFound)?;

        record.ciphertext = ciphertext;
        record.meta = meta;
        let updated = record.clone();
        self.save()?;

        Ok(updated)
    }

    pub fn delete_by_id(&mut self, id: i64) -> Result<(), KeeperError> {
        let position = self
            .records
            .iter()
            .position(|record| record.id == id)
            .ok_or(KeeperError::NotFound)?;

        self.records.remove(position);
        self.save()
    }

    /// Remove every listed id. Ids that are already gone are not an error.
    pub fn delete_batch(&mut self, ids: &[i64]) -> Result<(), KeeperError> {
        self.records.retain(|record| !ids.contains(&record.id));
        self.save()
    }

    pub fn count_by_kind(&self, kind: RecordKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    pub fn list_by_kind(&self, kind: RecordKind, filters: &ListFilters) -> Vec<Record> {
        let mut selected: Vec<Record> = self
            .records
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();

        if filters.newest_first {
            selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }

        if let Some(pagination) = filters.pagination {
            let start = pagination.page.saturating_sub(1) * pagination.count;
            if start >= selected.len() {
                return Vec::new();
            }
            let end = (start + pagination.count).min(selected.len());
            return selected[start..end].to_vec();
        }

        selected
    }

    /// Rewrite a record's id and version after the server responded to an
    /// add or update. A missing `old_id` is a no-op: the record may already
    /// have been reconciled.
    pub fn remap(&mut self, old_id: i64, new_id: i64, version: i64) -> Result<(), KeeperError> {
        for record in &mut self.records {
            if record.id == old_id {
                record.id = new_id;
                record.version = version;
            }
        }

        self.save()
    }

    fn mint_local_id(&mut self) -> i64 {
        self.next_local_id += 1;
        -self.next_local_id
    }

    fn save(&mut self) -> Result<(), KeeperError> {
        let disk: Vec<DiskRecord> = self.records.iter().map(DiskRecord::from).collect();
        let encoded = serde_json::to_vec(&disk).map_err(|e| {
            tracing::error!(error = %e, "Failed to serialize stored data");
            KeeperError::Integrity("store-encode-failed")
        })?;

        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&encoded)?;
        self.file.flush()?;

        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────
