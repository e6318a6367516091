use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::AppState;
use crate::cluster::{ReadOutcome, WriteOutcome, DELETED_HEADER, REPLICA_HEADER, TIMESTAMP_HEADER};
use crate::db::StoreError;
use crate::models::{from_micros, to_micros, Record, Replicas};

type ApiResult = Result<Response, (StatusCode, String)>;

// ============================================================
// Error Handling
// ============================================================

/// Map a storage failure to a response. Details stay in the server log.
fn store_error(e: StoreError) -> (StatusCode, String) {
    match e {
        StoreError::Unavailable => {
            tracing::warn!("Rejecting request: storage is not accessible");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Storage is not accessible".to_string(),
            )
        }
        other => {
            tracing::error!("Internal error: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, String) {
    let msg = msg.into();
    tracing::warn!("Bad request: {}", msg);
    (StatusCode::BAD_REQUEST, msg)
}

fn not_enough_replicas(answered: usize, required: usize) -> Response {
    tracing::warn!("Only {} of {} required replicas answered", answered, required);
    (
        StatusCode::GATEWAY_TIMEOUT,
        format!("Not enough replicas: {}/{}", answered, required),
    )
        .into_response()
}

// ============================================================
// Request parsing
// ============================================================

/// Query parameters of `/v0/entity`.
#[derive(Debug, Deserialize)]
pub struct EntityQuery {
    pub id: Option<String>,
    /// `ack/from`; defaults to a majority of the cluster.
    pub replicas: Option<String>,
}

/// How a request is served.
enum Mode {
    /// Sent by another node: apply to the local store only.
    Replica,
    /// Sent by a client: coordinate across replicas.
    Coordinate(Replicas),
}

fn parse_request(
    state: &AppState,
    query: EntityQuery,
    headers: &HeaderMap,
) -> Result<(String, Mode), (StatusCode, String)> {
    let id = match query.id {
        Some(id) if !id.is_empty() => id,
        _ => return Err(bad_request("Missing id")),
    };

    // A stopped node neither serves its replica nor coordinates.
    if !state.db.is_accessible() {
        return Err(store_error(StoreError::Unavailable));
    }

    if headers.contains_key(REPLICA_HEADER) {
        return Ok((id, Mode::Replica));
    }

    let replicas = Replicas::parse(
        query.replicas.as_deref(),
        state.coordinator.cluster_size(),
    )
    .map_err(|e| bad_request(e.to_string()))?;

    Ok((id, Mode::Coordinate(replicas)))
}

/// The coordinator's timestamp, if the request carries one.
fn request_timestamp(
    headers: &HeaderMap,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, (StatusCode, String)> {
    let Some(raw) = headers.get(TIMESTAMP_HEADER) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(from_micros)
        .map(Some)
        .ok_or_else(|| bad_request(format!("Invalid {}", TIMESTAMP_HEADER)))
}

fn record_headers(record: &Record) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        TIMESTAMP_HEADER,
        HeaderValue::from(to_micros(record.timestamp)),
    );
    if record.deleted {
        headers.insert(DELETED_HEADER, HeaderValue::from_static("true"));
    }
    headers
}

// ============================================================
// Status
// ============================================================

pub async fn status(State(state): State<AppState>) -> StatusCode {
    if state.db.is_accessible() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

// ============================================================
// Entities
// ============================================================

pub async fn get_entity(
    State(state): State<AppState>,
    Query(query): Query<EntityQuery>,
    headers: HeaderMap,
) -> ApiResult {
    let (id, mode) = parse_request(&state, query, &headers)?;

    match mode {
        Mode::Replica => {
            tracing::debug!(id, "Reading from local store");
            let response = match state.db.get_record(id.as_bytes()).map_err(store_error)? {
                Some(record) if record.deleted => {
                    (StatusCode::NOT_FOUND, record_headers(&record)).into_response()
                }
                Some(record) => {
                    (StatusCode::OK, record_headers(&record), record.value).into_response()
                }
                None => StatusCode::NOT_FOUND.into_response(),
            };
            Ok(response)
        }
        Mode::Coordinate(replicas) => {
            let response = match state.coordinator.get(&id, replicas).await {
                ReadOutcome::Found(value) => (StatusCode::OK, value).into_response(),
                ReadOutcome::NotFound => StatusCode::NOT_FOUND.into_response(),
                ReadOutcome::NotEnoughReplicas { answered, required } => {
                    not_enough_replicas(answered, required)
                }
            };
            Ok(response)
        }
    }
}

pub async fn put_entity(
    State(state): State<AppState>,
    Query(query): Query<EntityQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let (id, mode) = parse_request(&state, query, &headers)?;

    match mode {
        Mode::Replica => {
            tracing::debug!(id, bytes = body.len(), "Writing to local store");
            match request_timestamp(&headers)? {
                Some(timestamp) => {
                    let record = Record::live(body.to_vec(), timestamp);
                    state
                        .db
                        .upsert_record(id.as_bytes(), &record)
                        .map_err(store_error)?;
                }
                None => {
                    state
                        .db
                        .upsert(id.as_bytes(), &body)
                        .map_err(store_error)?;
                }
            }
            Ok(StatusCode::CREATED.into_response())
        }
        Mode::Coordinate(replicas) => {
            let response = match state.coordinator.put(&id, body.to_vec(), replicas).await {
                WriteOutcome::Acknowledged(_) => StatusCode::CREATED.into_response(),
                WriteOutcome::NotEnoughReplicas { answered, required } => {
                    not_enough_replicas(answered, required)
                }
            };
            Ok(response)
        }
    }
}

pub async fn delete_entity(
    State(state): State<AppState>,
    Query(query): Query<EntityQuery>,
    headers: HeaderMap,
) -> ApiResult {
    let (id, mode) = parse_request(&state, query, &headers)?;

    match mode {
        Mode::Replica => {
            tracing::debug!(id, "Deleting in local store");
            match request_timestamp(&headers)? {
                Some(timestamp) => {
                    state
                        .db
                        .upsert_record(id.as_bytes(), &Record::tombstone(timestamp))
                        .map_err(store_error)?;
                }
                None => {
                    let existed = state.db.remove(id.as_bytes()).map_err(store_error)?;
                    if !existed {
                        tracing::debug!(id, "Deleted a key with no live value");
                    }
                }
            }
            Ok(StatusCode::ACCEPTED.into_response())
        }
        Mode::Coordinate(replicas) => {
            let response = match state.coordinator.delete(&id, replicas).await {
                WriteOutcome::Acknowledged(_) => StatusCode::ACCEPTED.into_response(),
                WriteOutcome::NotEnoughReplicas { answered, required } => {
                    not_enough_replicas(answered, required)
                }
            };
            Ok(response)
        }
    }
}
