//! Index page, health check and the public listing.

use crate::error::{ApiError, ApiResult};
use crate::reply::{self, PublicEntry, ReplyFormat};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{Html, Response};
use serde::Deserialize;

/// GET /
pub async fn index(State(state): State<AppState>) -> Html<String> {
    reply::index_page(&state.config, state.public.is_enabled())
}

/// GET /health - liveness probe.
pub async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub ret: Option<String>,
}

/// GET /public - records opted into the public listing, newest first.
pub async fn list_public(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if !state.public.is_enabled() {
        return Err(ApiError::BadRequest("public listing is disabled".to_string()));
    }

    let mut entries = Vec::new();
    for id in state.public.entries().await {
        match state.store.get(&id).await {
            Ok(Some(record)) if !record.is_expired() => entries.push(PublicEntry {
                url: state.record_url(&record.id),
                filename: record.filename,
                size: record.size,
                expire: record.expire_at,
            }),
            Ok(_) => {}
            Err(e) => tracing::warn!(id = %id, error = %e, "skipping unreadable public entry"),
        }
    }

    let format = ReplyFormat::select(query.ret.as_deref(), &headers);
    Ok(reply::listing(format, entries))
}
