//! Background expiration sweeper.

use crate::metrics::{self, SWEEP_DURATION, SWEEP_FAILURES, SWEEP_RUNS};
use crate::state::AppState;
use pasta_storage::{StorageResult, SweepReport};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Shortest pause between two cycles, even when a cycle overran.
const MIN_SWEEP_PAUSE: Duration = Duration::from_secs(1);

/// Run one sweep: delete expired records, drop them from the public
/// listing and, if configured, clear the throttle table.
pub async fn run_sweep_cycle(state: &AppState) -> StorageResult<SweepReport> {
    let _timer = SWEEP_DURATION.start_timer();
    SWEEP_RUNS.inc();

    let result = state.store.sweep_expired().await;

    if state.config.sweep.clear_rate_limit {
        let cleared = state.throttle.clear();
        tracing::debug!(cleared, "cleared throttle table");
    }

    let report = result.inspect_err(|_| SWEEP_FAILURES.inc())?;

    if let Err(e) = state.public.remove_many(&report.removed).await {
        tracing::warn!(error = %e, "failed to update public listing after sweep");
    }
    metrics::record_deletion("sweep", report.removed.len() as u64);
    if report.failed > 0 {
        SWEEP_FAILURES.inc();
    }

    tracing::info!(
        removed = report.removed.len(),
        skipped = report.failed,
        "expiration sweep finished"
    );
    Ok(report)
}

/// Spawn the sweeper loop. A failed cycle is logged and the loop goes on.
pub fn spawn_sweeper(state: AppState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let started = Instant::now();
            if let Err(e) = run_sweep_cycle(&state).await {
                tracing::error!(error = %e, "expiration sweep failed");
            }
            let pause = interval.saturating_sub(started.elapsed()).max(MIN_SWEEP_PAUSE);
            tokio::time::sleep(pause).await;
        }
    })
}
