//! Application state.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::public::PublicListing;
use crate::ratelimit::RequestThrottle;
use pasta_core::config::AppConfig;
use pasta_core::{MimeLookup, Record, is_valid_id};
use pasta_storage::{ByteStream, RecordStore};
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Record storage.
    pub store: Arc<RecordStore>,
    /// Per-client request throttle.
    pub throttle: RequestThrottle,
    /// Public listing.
    pub public: Arc<PublicListing>,
    /// Extension to MIME type lookup used during ingestion.
    pub mime: Arc<dyn MimeLookup>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        store: Arc<RecordStore>,
        public: Arc<PublicListing>,
        mime: Arc<dyn MimeLookup>,
    ) -> Self {
        let throttle = RequestThrottle::new(&config.rate_limit);

        Self {
            config: Arc::new(config),
            store,
            throttle,
            public,
            mime,
        }
    }

    /// Interval of the expiration sweeper, `None` if it is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.config.sweep.interval()
    }

    /// Public URL of a record.
    pub fn record_url(&self, id: &str) -> String {
        self.config.server.record_url(id)
    }

    /// Look up a record that may be served.
    ///
    /// An expired record is deleted on the spot and reported as not found,
    /// exactly like a record that never existed.
    pub async fn live_record(&self, id: &str) -> ApiResult<Record> {
        check_id(id)?;
        match self.store.get(id).await? {
            Some(record) if record.is_expired() => {
                self.expire(id).await;
                Err(ApiError::NotFound)
            }
            Some(record) => Ok(record),
            None => Err(ApiError::NotFound),
        }
    }

    /// Like [`AppState::live_record`], also opening the payload stream.
    pub async fn live_stream(&self, id: &str) -> ApiResult<(Record, ByteStream)> {
        check_id(id)?;
        match self.store.get_stream(id).await? {
            Some((record, stream)) if record.is_expired() => {
                drop(stream);
                self.expire(id).await;
                Err(ApiError::NotFound)
            }
            Some(found) => Ok(found),
            None => Err(ApiError::NotFound),
        }
    }

    /// Remove an expired record found on the read path.
    async fn expire(&self, id: &str) {
        if let Err(e) = self.store.delete(id).await {
            tracing::error!(id, error = %e, "failed to delete expired record");
            return;
        }
        if let Err(e) = self.public.remove(id).await {
            tracing::warn!(id, error = %e, "failed to update public listing");
        }
        metrics::record_deletion("expired", 1);
        tracing::debug!(id, "removed expired record on access");
    }
}

/// Reject ids that cannot name a record.
pub fn check_id(id: &str) -> ApiResult<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(ApiError::InvalidIdentifier(id.to_string()))
    }
}
