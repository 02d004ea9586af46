use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Attempt count reported by the flaky and counter endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempts {
    pub key: String,
    pub attempts: u32,
}

#[derive(Debug, Deserialize)]
pub struct FlakyParams {
    #[serde(default = "default_failures")]
    pub failures: u32,
    #[serde(default = "default_failure_status")]
    pub status: u16,
}

fn default_failures() -> u32 {
    1
}

fn default_failure_status() -> u16 {
    503
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token: String,
    pub refreshes: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// One part of a multipart upload, as the server received it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
    /// Lossy UTF-8 view of the part's bytes.
    pub content: String,
}

/// Makes the first `failures` uploads for `key` fail with 503.
#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub key: Option<String>,
    #[serde(default)]
    pub failures: u32,
}

/// Body served by `/files/{name}`.
pub fn file_content(name: &str) -> String {
    (1..=64).map(|line| format!("{name} line {line}\n")).collect()
}

#[derive(Debug, Default)]
pub struct ServerState {
    attempts: HashMap<String, u32>,
    token: Option<String>,
    refreshes: u32,
}

pub type Db = Arc<RwLock<ServerState>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(ServerState::default()));
    Router::new()
        .route("/status/{code}", any(fixed_status))
        .route("/flaky/{key}", any(flaky))
        .route("/attempts/{key}", get(attempts))
        .route("/echo", any(echo))
        .route("/auth/refresh", post(refresh_token))
        .route("/auth/protected", get(protected))
        .route("/upload", post(upload))
        .route("/files/{name}", get(download))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn fixed_status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Fails the first `failures` requests for `key` with `status`, then
/// succeeds.
async fn flaky(
    State(db): State<Db>,
    Path(key): Path<String>,
    Query(params): Query<FlakyParams>,
) -> (StatusCode, Json<Attempts>) {
    let mut state = db.write().await;
    let count = state.attempts.entry(key.clone()).or_insert(0);
    *count += 1;
    let attempts = *count;

    let status = if attempts <= params.failures {
        StatusCode::from_u16(params.status).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
    } else {
        StatusCode::OK
    };
    tracing::debug!(%key, attempts, %status, "flaky request");
    (status, Json(Attempts { key, attempts }))
}

async fn attempts(State(db): State<Db>, Path(key): Path<String>) -> Json<Attempts> {
    let state = db.read().await;
    let attempts = state.attempts.get(&key).copied().unwrap_or(0);
    Json(Attempts { key, attempts })
}

async fn echo(
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Json<Echo> {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();
    Json(Echo {
        method: method.to_string(),
        query,
        headers,
        body,
    })
}

/// Issues a new token, invalidating the previous one.
async fn refresh_token(State(db): State<Db>) -> Json<Token> {
    let mut state = db.write().await;
    let token = Uuid::new_v4().to_string();
    state.token = Some(token.clone());
    state.refreshes += 1;
    tracing::debug!(refreshes = state.refreshes, "token refreshed");
    Json(Token {
        token,
        refreshes: state.refreshes,
    })
}

async fn protected(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Token>, StatusCode> {
    let state = db.read().await;
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match (presented, state.token.as_deref()) {
        (Some(presented), Some(current)) if presented == current => Ok(Json(Token {
            token: current.to_string(),
            refreshes: state.refreshes,
        })),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn upload(
    State(db): State<Db>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Vec<UploadedPart>>), (StatusCode, String)> {
    if let Some(key) = params.key {
        let mut state = db.write().await;
        let count = state.attempts.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count <= params.failures {
            tracing::debug!(%key, attempts = *count, "failing upload");
            return Ok((StatusCode::SERVICE_UNAVAILABLE, Json(Vec::new())));
        }
    }

    let mut parts = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("failed to read multipart field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("failed to read {name}: {e}")))?;
        parts.push(UploadedPart {
            name,
            file_name,
            content_type,
            size: bytes.len(),
            content: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    tracing::debug!(parts = parts.len(), "upload received");
    Ok((StatusCode::OK, Json(parts)))
}

async fn download(Path(name): Path<String>) -> ([(header::HeaderName, &'static str); 1], String) {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        file_content(&name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_serializes_to_json() {
        let attempts = Attempts {
            key: "a".to_string(),
            attempts: 3,
        };
        let json = serde_json::to_value(&attempts).unwrap();
        assert_eq!(json["key"], "a");
        assert_eq!(json["attempts"], 3);
    }

    #[test]
    fn flaky_params_default_to_one_503() {
        let params: FlakyParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.failures, 1);
        assert_eq!(params.status, 503);
    }

    #[test]
    fn flaky_params_accept_overrides() {
        let params: FlakyParams = serde_json::from_str(r#"{"failures":3,"status":500}"#).unwrap();
        assert_eq!(params.failures, 3);
        assert_eq!(params.status, 500);
    }

    #[test]
    fn file_content_names_every_line() {
        let content = file_content("report.csv");
        assert_eq!(content.lines().count(), 64);
        assert!(content.starts_with("report.csv line 1\n"));
        assert!(content.ends_with("report.csv line 64\n"));
    }

    #[test]
    fn upload_params_default_to_no_failures() {
        let params: UploadParams = serde_json::from_str("{}").unwrap();
        assert!(params.key.is_none());
        assert_eq!(params.failures, 0);
    }

    #[test]
    fn server_state_starts_without_token() {
        let state = ServerState::default();
        assert!(state.token.is_none());
        assert_eq!(state.refreshes, 0);
        assert!(state.attempts.is_empty());
    }
}
