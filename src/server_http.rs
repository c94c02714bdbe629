use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::KeeperError;
use crate::record::{ListFilters, Pagination, RecordKind};
use crate::server_service::{RecordService, UserService};
use crate::token::TokenManager;

pub struct AppState {
    pub records: RecordService,
    pub users: UserService,
    pub tokens: TokenManager,
}

/// Authenticated user id, injected by the bearer middleware.
#[derive(Clone, Copy)]
struct AuthUser(i64);

#[derive(Deserialize)]
struct AuthBody {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct TokenBody {
    token: String,
}

#[derive(Deserialize)]
struct SaveDataBody {
    data: String,
    #[serde(default)]
    meta: String,
}

#[derive(Deserialize)]
struct DeleteBatchBody {
    ids: Vec<i64>,
}

fn default_page() -> usize {
    1
}

fn default_count() -> usize {
    5
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_count")]
    count: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn status_for(error: &KeeperError) -> StatusCode {
    match error {
        KeeperError::NotFound => StatusCode::NOT_FOUND,
        KeeperError::NotAuthenticated | KeeperError::WrongCredentials => {
            StatusCode::UNAUTHORIZED
        }
        KeeperError::InvalidBody | KeeperError::UnknownKind(_) => StatusCode::BAD_REQUEST,
        KeeperError::EmailAlreadyTaken => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: KeeperError) -> Response {
    let status = status_for(&error);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %error, "Request failed");
    }
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/v1/data", get(list_all).delete(delete_batch))
        .route("/api/v1/data/:kind", get(list_kind).post(add_record))
        .route("/api/v1/data/update/:id", put(update_record))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/api/v1/user/register", post(register))
        .route("/api/v1/user/authorize", post(authorize))
        .merge(protected)
        .with_state(state)
}

async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match token.and_then(|token| state.tokens.verify(token).ok()) {
        Some(user_id) => {
            request.extensions_mut().insert(AuthUser(user_id));
            next.run(request).await
        }
        None => error_response(KeeperError::NotAuthenticated),
    }
}

// ── User handlers ─────────────────────────────────────────────────

async fn register(State(state): State<Arc<AppState>>, Json(body): Json<AuthBody>) -> Response {
    match state.users.register(&body.email, &body.password) {
        Ok(token) => (StatusCode::CREATED, Json(TokenBody { token })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn authorize(State(state): State<Arc<AppState>>, Json(body): Json<AuthBody>) -> Response {
    match state.users.authorize(&body.email, &body.password) {
        Ok(token) => (StatusCode::OK, Json(TokenBody { token })).into_response(),
        Err(e) => error_response(e),
    }
}

// ── Record handlers ───────────────────────────────────────────────

async fn list_all(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Response {
    match state.records.list_all(user_id) {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_kind(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(kind): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let kind = match RecordKind::from_str(&kind) {
        Ok(kind) => kind,
        Err(e) => return error_response(e),
    };

    let filters = ListFilters {
        pagination: Some(Pagination {
            page: query.page,
            count: query.count,
        }),
        newest_first: true,
    };

    match state.records.list_kind(user_id, kind, &filters) {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn add_record(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(kind): Path<String>,
    Json(body): Json<SaveDataBody>,
) -> Response {
    let kind = match RecordKind::from_str(&kind) {
        Ok(kind) => kind,
        Err(e) => return error_response(e),
    };

    match state.records.add(user_id, kind, body.data, body.meta) {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn update_record(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(body): Json<SaveDataBody>,
) -> Response {
    match state.records.update(user_id, id, body.data, body.meta) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_batch(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(body): Json<DeleteBatchBody>,
) -> Response {
    match state.records.delete_batch(user_id, &body.ids) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

// ── Tests ─────────────────────────────────────────────────────────
