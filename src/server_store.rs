use std::sync::RwLock;

use crate::error::KeeperError;
use crate::record::{now_secs, ListFilters, Record, RecordKind};

/// The authoritative, user-scoped record store. Any backend with per-user
/// listing, id lookup, insert-with-auto-id, update-with-version-bump and
/// batch delete satisfies the engine; the shipped implementation keeps
/// everything in memory.
pub trait RecordRepository: Send + Sync {
    fn add(
        &self,
        user_id: i64,
        kind: RecordKind,
        ciphertext: String,
        meta: String,
    ) -> Result<i64, KeeperError>;
    fn get_by_id(&self, id: i64) -> Result<Record, KeeperError>;
    /// Like `get_by_id`, but another user's record reads as absent.
    fn get_by_id_for_user(&self, user_id: i64, id: i64) -> Result<Record, KeeperError>;
    fn get_all_for_user(&self, user_id: i64) -> Result<Vec<Record>, KeeperError>;
    fn get_by_kind_for_user(
        &self,
        user_id: i64,
        kind: RecordKind,
        filters: &ListFilters,
    ) -> Result<Vec<Record>, KeeperError>;
    fn count_for_user(&self, user_id: i64, kind: RecordKind) -> Result<usize, KeeperError>;
    fn update(
        &self,
        user_id: i64,
        id: i64,
        ciphertext: String,
        meta: String,
    ) -> Result<Record, KeeperError>;
    fn delete_batch(&self, user_id: i64, ids: &[i64]) -> Result<(), KeeperError>;
}

#[derive(Default)]
struct RecordsInner {
    records: Vec<Record>,
    next_id: i64,
}

pub struct MemoryRecordRepository {
    inner: RwLock<RecordsInner>,
}

impl MemoryRecordRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RecordsInner {
                records: Vec::new(),
                next_id: 1,
            }),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, RecordsInner>, KeeperError> {
        self.inner
            .read()
            .map_err(|_| KeeperError::Internal("record store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, RecordsInner>, KeeperError> {
        self.inner
            .write()
            .map_err(|_| KeeperError::Internal("record store lock poisoned".to_string()))
    }
}

impl Default for MemoryRecordRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordRepository for MemoryRecordRepository {
    fn add(
        &self,
        user_id: i64,
        kind: RecordKind,
        ciphertext: String,
        meta: String,
    ) -> Result<i64, KeeperError> {
        let mut inner = self.write()?;
        let id = inner.next_id;
        inner.next_id += 1;

        inner.records.push(Record {
            id,
            owner_id: user_id,
            kind,
            ciphertext,
            meta,
            version: 1,
            created_at: now_secs(),
        });

        Ok(id)
    }

    fn get_by_id(&self, id: i64) -> Result<Record, KeeperError> {
        self.read()?
            .records
            .iter()
            .find(|record| record.id == id)
            .cloned()
            .ok_or(KeeperError::NotFound)
    }

    fn get_by_id_for_user(&self, user_id: i64, id: i64) -> Result<Record, KeeperError> {
        self.read()?
            .records
            .iter()
            .find(|record| record.id == id && record.owner_id == user_id)
            .cloned()
            .ok_or(KeeperError::NotFound)
    }

    fn get_all_for_user(&self, user_id: i64) -> Result<Vec<Record>, KeeperError> {
        Ok(self
            .read()?
            .records
            .iter()
            .filter(|record| record.owner_id == user_id)
            .cloned()
            .collect())
    }

    fn get_by_kind_for_user(
        &self,
        user_id: i64,
        kind: RecordKind,
        filters: &ListFilters,
    ) -> Result<Vec<Record>, KeeperError> {
        let mut selected: Vec<Record> = self
            .read()?
            .records
            .iter()
            .filter(|record| record.owner_id == user_id && record.kind == kind)
            .cloned()
            .collect();

        if filters.newest_first {
            selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }

        if let Some(pagination) = filters.pagination {
            let start = pagination.page.saturating_sub(1) * pagination.count;
            if start >= selected.len() {
                return Ok(Vec::new());
            }
            let end = (start + pagination.count).min(selected.len());
            return Ok(selected[start..end].to_vec());
        }

        Ok(selected)
    }

    fn count_for_user(&self, user_id: i64, kind: RecordKind) -> Result<usize, KeeperError> {
        Ok(self
            .read()?
            .records
            .iter()
            .filter(|record| record.owner_id == user_id && record.kind == kind)
            .count())
    }

    fn update(
        &self,
        user_id: i64,
        id: i64,
        ciphertext: String,
        meta: String,
    ) -> Result<Record, KeeperError> {
        let mut inner = self.write()?;
        let record = inner
            .records
            .iter_mut()
            .find(|record| record.id == id && record.owner_id == user_id)
            .ok_or(KeeperError::NotFound)?;

        record.ciphertext = ciphertext;
        record.meta = meta;
        record.version += 1;

        Ok(record.clone())
    }

    fn delete_batch(&self, user_id: i64, ids: &[i64]) -> Result<(), KeeperError> {
        let mut inner = self.write()?;
        inner
            .records
            .retain(|record| record.owner_id != user_id || !ids.contains(&record.id));
        Ok(())
    }
}

// ── Users ─────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub created_at: u64,
}

pub trait UserRepository: Send + Sync {
    /// Fails with `EmailAlreadyTaken` on a duplicate email.
    fn create(&self, email: &str, password_hash: &str) -> Result<User, KeeperError>;
    fn get_by_email(&self, email: &str) -> Result<User, KeeperError>;
}

#[derive(Default)]
struct UsersInner {
    users: Vec<User>,
    next_id: i64,
}

pub struct MemoryUserRepository {
    inner: RwLock<UsersInner>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(UsersInner {
                users: Vec::new(),
                next_id: 1,
            }),
        }
    }
}

impl Default for MemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl UserRepository for MemoryUserRepository {
    fn create(&self, email: &str, password_hash: &str) -> Result<User, KeeperError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| KeeperError::Internal("user store lock poisoned".to_string()))?;

        if inner.users.iter().any(|user| user.email == email) {
            return Err(KeeperError::EmailAlreadyTaken);
        }

        let user = User {
            id: inner.next_id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now_secs(),
        };
        inner.next_id += 1;
        inner.users.push(user.clone());

        Ok(user)
    }

    fn get_by_email(&self, email: &str) -> Result<User, KeeperError> {
        self.inner
            .read()
            .map_err(|_| KeeperError::Internal("user store lock poisoned".to_string()))?
            .users
            .iter()
            .find(|user| user.email == email)
            .cloned()
            .ok_or(KeeperError::NotFound)
    }
}

// ── Tests ─────────────────────────────────────────────────────────
