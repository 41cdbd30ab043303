//! Runs the materializer off the async runtime, either on demand or on a
//! fixed period.

use std::time::Duration;

use chrono::NaiveDate;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::date_utils::today;
use crate::error::{AppError, AppResult};
use crate::services::materializer::{self, MaterializationReport};
use crate::state::AppState;

/// Run one materialization pass as of `as_of` on a blocking thread.
pub async fn materialize(state: &AppState, as_of: NaiveDate) -> AppResult<MaterializationReport> {
    let store = state.transaction_store();
    let locks = state.template_locks.clone();

    let report = tokio::task::spawn_blocking(move || {
        materializer::run_materialization(&store, &locks, as_of)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Materialization task failed: {}", e)))??;

    Ok(report)
}

/// Spawn a task materializing templates every `every`, as of the current
/// UTC date. A failed pass is logged and retried on the next tick.
pub fn spawn(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match materialize(&state, today()).await {
                Ok(report) => info!(
                    generated = report.generated_count,
                    failed = report.failures.len(),
                    "Scheduled materialization complete"
                ),
                Err(e) => error!(error = %e, "Scheduled materialization failed"),
            }
        }
    })
}
