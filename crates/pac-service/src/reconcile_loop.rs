//! # Reconcile Loop
//!
//! Periodically drives every managed PipelineRun through the reconciler and
//! sweeps expired git-auth secrets, until the shutdown token fires.

use chrono::Utc;
use pac_core::reconciler::Reconciler;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs reconcile passes every `interval`. Returns the number of completed
/// passes once `cancel` fires.
pub async fn run(
    reconciler: Arc<Reconciler>,
    interval: Duration,
    cancel: CancellationToken,
) -> usize {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut passes = 0;

    info!(interval_seconds = interval.as_secs(), "Reconcile loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        reconcile_pass(&reconciler).await;
        passes += 1;
    }
    info!(passes, "Reconcile loop stopped");
    passes
}

async fn reconcile_pass(reconciler: &Reconciler) {
    match reconciler.reconcile_all().await {
        Ok(0) => debug!("Reconcile pass found nothing to do"),
        Ok(acted) => info!(pipelineruns = acted, "Reconcile pass complete"),
        Err(e) => warn!(error = %e, "Reconcile pass failed"),
    }

    match reconciler.sweep_stale_secrets(Utc::now()).await {
        Ok(removed) if !removed.is_empty() => {
            info!(secrets = ?removed, "Removed stale git-auth secrets")
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Secret sweep failed"),
    }
}

#[cfg(test)]
#[path = "reconcile_loop_tests.rs"]
mod tests;
