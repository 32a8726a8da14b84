//! Background job: run a scan cycle on every tick of the cron schedule.
//!
//! Cycles run back to back on the same task, so a cycle that overruns its
//! next tick simply delays it. Cancelling the token stops both the wait and
//! the in-flight cycle.

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::Schedule;
use crate::errors::ScanError;
use crate::scan::CycleOrchestrator;

/// Spawn the scan job. Call this once at startup.
pub fn spawn(
    orchestrator: Arc<CycleOrchestrator>,
    schedule: Schedule,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(orchestrator, schedule, cancel))
}

pub async fn run(orchestrator: Arc<CycleOrchestrator>, schedule: Schedule, cancel: CancellationToken) {
    info!(schedule = %schedule, "token scan job started");

    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            error!(schedule = %schedule, "schedule has no upcoming run, stopping job");
            break;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        debug!(next_run = %next, "waiting for next scan");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        match orchestrator.run_cycle(&cancel).await {
            Ok(report) => debug!(cycle_id = %report.cycle_id, "scan job tick complete"),
            Err(ScanError::Cancelled) => {
                info!("scan cycle cancelled");
                break;
            }
            Err(e) => error!(error = %e, "scan cycle failed"),
        }
    }

    info!("token scan job stopped");
}
