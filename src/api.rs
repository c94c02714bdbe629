use std::sync::Arc;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::KeeperError;
use crate::record::Record;
use crate::session::ClientSession;

/// The four record RPCs the reconciliation engine needs from the server.
/// The engine only ever talks through this seam, so tests can substitute an
/// in-process implementation.
pub trait ServerApi: Send + Sync {
    fn get_all(&self) -> Result<Vec<Record>, KeeperError>;
    fn add(&self, record: &Record) -> Result<Record, KeeperError>;
    fn update_by_id(&self, id: i64, ciphertext: &str, meta: &str) -> Result<Record, KeeperError>;
    fn delete_batch(&self, ids: &[i64]) -> Result<(), KeeperError>;
}

#[derive(Serialize)]
struct SaveDataBody<'a> {
    data: &'a str,
    meta: &'a str,
}

#[derive(Serialize)]
struct DeleteBatchBody<'a> {
    ids: &'a [i64],
}

#[derive(Deserialize)]
struct HttpErrorBody {
    error: String,
}

#[derive(Serialize)]
struct AuthBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenBody {
    token: String,
}

fn transport_err(e: reqwest::Error) -> KeeperError {
    tracing::error!(error = %e, "Server request failed");
    KeeperError::Transport(e.to_string())
}

/// Map a non-2xx response onto the semantic error kinds, falling back to
/// transient-network with the server's `{error}` message.
fn error_from_response(response: Response) -> KeeperError {
    let status = response.status();
    let message = response
        .text()
        .ok()
        .and_then(|raw| serde_json::from_str::<HttpErrorBody>(&raw).ok())
        .map(|body| body.error)
        .unwrap_or_else(|| status.to_string());

    match status {
        StatusCode::NOT_FOUND => KeeperError::NotFound,
        StatusCode::UNAUTHORIZED => KeeperError::NotAuthenticated,
        StatusCode::BAD_REQUEST => KeeperError::InvalidBody,
        StatusCode::CONFLICT => KeeperError::EmailAlreadyTaken,
        _ => KeeperError::Transport(message),
    }
}

// ── Record API ────────────────────────────────────────────────────

pub struct HttpServerApi {
    base_addr: String,
    http: Client,
    session: Arc<ClientSession>,
}

impl HttpServerApi {
    pub fn new(base_addr: String, http: Client, session: Arc<ClientSession>) -> Self {
        Self {
            base_addr,
            http,
            session,
        }
    }
}

impl ServerApi for HttpServerApi {
    fn get_all(&self) -> Result<Vec<Record>, KeeperError> {
        let response = self
            .http
            .get(format!("{}/api/v1/data", self.base_addr))
            .bearer_auth(self.session.token())
            .send()
            .map_err(transport_err)?;

        if response.status() != StatusCode::OK {
            return Err(error_from_response(response));
        }

        response.json().map_err(transport_err)
    }

    fn add(&self, record: &Record) -> Result<Record, KeeperError> {
        let response = self
            .http
            .post(format!("{}/api/v1/data/{}", self.base_addr, record.kind))
            .bearer_auth(self.session.token())
            .json(&SaveDataBody {
                data: &record.ciphertext,
                meta: &record.meta,
            })
            .send()
            .map_err(transport_err)?;

        if response.status() != StatusCode::CREATED {
            return Err(error_from_response(response));
        }

        response.json().map_err(transport_err)
    }

    fn update_by_id(&self, id: i64, ciphertext: &str, meta: &str) -> Result<Record, KeeperError> {
        let response = self
            .http
            .put(format!("{}/api/v1/data/update/{}", self.base_addr, id))
            .bearer_auth(self.session.token())
            .json(&SaveDataBody {
                data: ciphertext,
                meta,
            })
            .send()
            .map_err(transport_err)?;

        if response.status() != StatusCode::OK {
            return Err(error_from_response(response));
        }

        response.json().map_err(transport_err)
    }

    fn delete_batch(&self, ids: &[i64]) -> Result<(), KeeperError> {
        let response = self
            .http
            .delete(format!("{}/api/v1/data", self.base_addr))
            .bearer_auth(self.session.token())
            .json(&DeleteBatchBody { ids })
            .send()
            .map_err(transport_err)?;

        if response.status() != StatusCode::NO_CONTENT {
            return Err(error_from_response(response));
        }

        Ok(())
    }
}

// ── User API ──────────────────────────────────────────────────────

pub struct UserApi {
    base_addr: String,
    http: Client,
}

impl UserApi {
    pub fn new(base_addr: String, http: Client) -> Self {
        Self { base_addr, http }
    }

    pub fn register(&self, email: &str, password: &str) -> Result<String, KeeperError> {
        let response = self
            .http
            .post(format!("{}/api/v1/user/register", self.base_addr))
            .json(&AuthBody { email, password })
            .send()
            .map_err(transport_err)?;

        if response.status() != StatusCode::CREATED {
            return Err(error_from_response(response));
        }

        let body: TokenBody = response.json().map_err(transport_err)?;
        Ok(body.token)
    }

    pub fn authorize(&self, email: &str, password: &str) -> Result<String, KeeperError> {
        let response = self
            .http
            .post(format!("{}/api/v1/user/authorize", self.base_addr))
            .json(&AuthBody { email, password })
            .send()
            .map_err(transport_err)?;

        if response.status() != StatusCode::OK {
            // A 401 here is a failed login, not a stale token.
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(KeeperError::WrongCredentials);
            }
            return Err(error_from_response(response));
        }

        let body: TokenBody = response.json().map_err(transport_err)?;
        Ok(body.token)
    }
}

// ── Tests ─────────────────────────────────────────────────────────
