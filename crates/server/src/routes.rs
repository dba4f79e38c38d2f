//! HTTP route definitions.

use crate::handlers;
use crate::handlers::ingest::FORM_OVERHEAD;
use crate::metrics::{metrics_handler, register_metrics};
use crate::ratelimit::throttle_middleware;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route(
            "/",
            get(handlers::index)
                .post(handlers::ingest)
                .put(handlers::ingest)
                .fallback(handlers::unsupported_method),
        )
        // Liveness probe for load balancers
        .route("/health", get(handlers::health_check))
        .route("/public", get(handlers::list_public))
        .route(
            "/delete",
            get(handlers::delete_by_query).post(handlers::delete_by_query),
        )
        .route(
            "/{id}",
            get(handlers::retrieve)
                .head(handlers::metadata)
                .delete(handlers::delete_record)
                .fallback(handlers::unsupported_method),
        );

    // Conditionally add metrics endpoint based on config.
    if state.config.server.metrics_enabled {
        register_metrics();
        router = router.route("/metrics", get(metrics_handler));
    }

    // Form and multipart extractors buffer against this limit; raw bodies
    // are counted by the ingest handler itself.
    let body_limit = usize::try_from(state.config.upload.max_size.saturating_add(FORM_OVERHEAD))
        .unwrap_or(usize::MAX);

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.throttle.clone(),
            throttle_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
