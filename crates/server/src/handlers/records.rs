//! Retrieval, metadata and deletion of single records.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::reply::http_date;
use crate::state::{AppState, check_id};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, EXPIRES};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use pasta_core::Record;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Header carrying the recorded content filename.
static FILENAME: HeaderName = HeaderName::from_static("filename");

/// Response headers describing a record.
fn record_headers(state: &AppState, record: &Record) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(record.size));

    let mime = record
        .mime
        .as_deref()
        .unwrap_or(&state.config.upload.default_mime);
    if let Ok(value) = HeaderValue::from_str(mime) {
        headers.insert(CONTENT_TYPE, value);
    }

    let mut disposition = "inline".to_string();
    if let Some(filename) = &record.filename {
        disposition.push_str(&format!("; filename=\"{}\"", filename.replace('"', "")));
        if let Ok(value) = HeaderValue::from_str(filename) {
            headers.insert(FILENAME.clone(), value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(CONTENT_DISPOSITION, value);
    }

    if let Some(expires) = record.expire_at.and_then(http_date)
        && let Ok(value) = HeaderValue::from_str(&expires)
    {
        headers.insert(EXPIRES, value);
    }

    headers
}

/// GET /{id} - stream a record's payload.
pub async fn retrieve(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let (record, stream) = state.live_stream(&id).await?;
    let headers = record_headers(&state, &record);
    Ok((headers, Body::from_stream(stream)).into_response())
}

/// HEAD /{id} - a record's headers without the payload.
pub async fn metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let record = state.live_record(&id).await?;
    let headers = record_headers(&state, &record);
    Ok((headers, Body::empty()).into_response())
}

/// Credentials of a delete request.
#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    pub id: Option<String>,
    pub token: Option<String>,
}

/// Compare tokens through their digests so the comparison does not stop at
/// the first differing character of the secret.
fn token_matches(expected: &str, presented: &str) -> bool {
    Sha256::digest(expected.as_bytes()) == Sha256::digest(presented.as_bytes())
}

/// Delete a record after checking its token.
async fn delete_with_token(
    state: &AppState,
    id: Option<&str>,
    token: Option<&str>,
) -> ApiResult<&'static str> {
    let (Some(id), Some(token)) = (
        id.filter(|s| !s.is_empty()),
        token.filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::Forbidden("missing id or token"));
    };
    check_id(id)?;

    let record = state.live_record(id).await?;
    if !token_matches(&record.token, token) {
        return Err(ApiError::Forbidden("token mismatch"));
    }

    state.store.delete(id).await?;
    if let Err(e) = state.public.remove(id).await {
        tracing::warn!(id, error = %e, "failed to update public listing");
    }
    metrics::record_deletion("token", 1);
    tracing::info!(id, "record deleted");
    Ok("OK")
}

/// DELETE /{id}?token=
pub async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<&'static str> {
    delete_with_token(&state, Some(&id), params.token.as_deref()).await
}

/// GET|POST /delete?id=&token=
pub async fn delete_by_query(
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<&'static str> {
    delete_with_token(&state, params.id.as_deref(), params.token.as_deref()).await
}

/// Any other method on a record path.
pub async fn unsupported_method() -> ApiError {
    ApiError::UnsupportedMethod
}
