//! HTTP server for the pasta ephemeral blob service.
//!
//! This crate provides:
//! - Ingestion, retrieval and token-authorised deletion of records
//! - The bounded public listing
//! - The per-client request throttle
//! - The background expiration sweeper
//! - Prometheus metrics

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod public;
pub mod ratelimit;
pub mod reply;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use error::ApiError;
pub use public::PublicListing;
pub use ratelimit::RequestThrottle;
pub use routes::create_router;
pub use state::AppState;
