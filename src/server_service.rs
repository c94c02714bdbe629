use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::KeeperError;
use crate::record::{ListFilters, PaginatedRecords, Record, RecordKind};
use crate::server_store::{RecordRepository, UserRepository};
use crate::token::TokenManager;

// ── Records ───────────────────────────────────────────────────────

/// User-scoped record operations. Payloads arrive and leave as ciphertext
/// envelopes; this layer never decrypts anything.
pub struct RecordService {
    repository: Arc<dyn RecordRepository>,
}

impl RecordService {
    pub fn new(repository: Arc<dyn RecordRepository>) -> Self {
        Self { repository }
    }

    pub fn list_all(&self, user_id: i64) -> Result<Vec<Record>, KeeperError> {
        self.repository.get_all_for_user(user_id)
    }

    pub fn get_by_id(&self, user_id: i64, id: i64) -> Result<Record, KeeperError> {
        self.repository.get_by_id_for_user(user_id, id)
    }

    pub fn list_kind(
        &self,
        user_id: i64,
        kind: RecordKind,
        filters: &ListFilters,
    ) -> Result<PaginatedRecords, KeeperError> {
        let data = self
            .repository
            .get_by_kind_for_user(user_id, kind, filters)?;
        let total = self.repository.count_for_user(user_id, kind)?;

        let (current_page, count) = match filters.pagination {
            Some(pagination) => (pagination.page, pagination.count),
            None => (1, total.max(1)),
        };

        Ok(PaginatedRecords {
            data,
            current_page,
            count,
            page_count: total.div_ceil(count.max(1)),
        })
    }

    pub fn add(
        &self,
        user_id: i64,
        kind: RecordKind,
        ciphertext: String,
        meta: String,
    ) -> Result<Record, KeeperError> {
        if ciphertext.is_empty() {
            return Err(KeeperError::InvalidBody);
        }

        let id = self.repository.add(user_id, kind, ciphertext, meta)?;
        self.repository.get_by_id(id)
    }

    pub fn update(
        &self,
        user_id: i64,
        id: i64,
        ciphertext: String,
        meta: String,
    ) -> Result<Record, KeeperError> {
        if ciphertext.is_empty() {
            return Err(KeeperError::InvalidBody);
        }

        self.repository.update(user_id, id, ciphertext, meta)
    }

    pub fn delete_batch(&self, user_id: i64, ids: &[i64]) -> Result<(), KeeperError> {
        self.repository.delete_batch(user_id, ids)
    }
}

// ── Users ─────────────────────────────────────────────────────────

pub struct UserService {
    repository: Arc<dyn UserRepository>,
    tokens: TokenManager,
}

impl UserService {
    pub fn new(repository: Arc<dyn UserRepository>, tokens: TokenManager) -> Self {
        Self { repository, tokens }
    }

    pub fn register(&self, email: &str, password: &str) -> Result<String, KeeperError> {
        if email.is_empty() || password.is_empty() {
            return Err(KeeperError::InvalidBody);
        }

        let hash = hash_password(password)?;
        let user = self.repository.create(email, &hash)?;

        tracing::info!(user_id = user.id, "User registered");
        self.tokens.issue(user.id)
    }

    pub fn authorize(&self, email: &str, password: &str) -> Result<String, KeeperError> {
        let user = match self.repository.get_by_email(email) {
            Ok(user) => user,
            Err(KeeperError::NotFound) => return Err(KeeperError::WrongCredentials),
            Err(e) => return Err(e),
        };

        if !verify_password(password, &user.password_hash) {
            return Err(KeeperError::WrongCredentials);
        }

        tracing::info!(user_id = user.id, "User authorized");
        self.tokens.issue(user.id)
    }
}

fn hash_password(password: &str) -> Result<String, KeeperError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            tracing::error!(error = %e, "Password hashing failed");
            KeeperError::Internal("password hashing failed".to_string())
        })
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

// ── Tests ─────────────────────────────────────────────────────────
