//! Periodic sweep driver.
//!
//! Each run pages through the records that are due at the start of the run and
//! asks the engine to sweep them one by one. Transitions depend only on stored
//! timestamps, so a late or skipped run is caught up by the next one.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::ProofOfLifeEngine;
use crate::error::EngineError;
use crate::store::{DueCursor, StoreResult};
use crate::will::schedule::next_due_at;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub transitioned: usize,
    pub conflicts: usize,
    pub failures: usize,
}

pub struct SweepDriver {
    engine: Arc<ProofOfLifeEngine>,
    interval: Duration,
    page_size: usize,
}

impl SweepDriver {
    pub fn new(engine: Arc<ProofOfLifeEngine>, interval: Duration, page_size: usize) -> Self {
        Self {
            engine,
            interval,
            page_size: page_size.max(1),
        }
    }

    /// One pass over every record due at the current instant.
    pub async fn run_once(&self) -> StoreResult<SweepReport> {
        let now = self.engine.now();
        let mut report = SweepReport::default();
        let mut cursor: Option<DueCursor> = None;

        loop {
            let page = self
                .engine
                .store()
                .list_due_before(now, cursor, self.page_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(DueCursor {
                due_at: next_due_at(last).unwrap_or(now),
                id: last.id,
            });

            for record in &page {
                report.scanned += 1;
                match self.engine.sweep(record.id).await {
                    Ok(outcome) if outcome.changed => report.transitioned += 1,
                    Ok(_) => {}
                    // Cancelled between listing and sweeping.
                    Err(EngineError::NotFound(_)) => {}
                    Err(e) if e.is_retryable() => {
                        debug!(will_id = %record.id, "Sweep lost a race, deferring to next run");
                        report.conflicts += 1;
                    }
                    Err(e) => {
                        warn!(will_id = %record.id, error = %e, "Sweep failed for will");
                        report.failures += 1;
                    }
                }
            }

            if page.len() < self.page_size {
                break;
            }
        }

        Ok(report)
    }

    /// Sweep on a fixed interval until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Sweep driver started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sweep driver received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.scanned > 0 => info!(
                            scanned = report.scanned,
                            transitioned = report.transitioned,
                            conflicts = report.conflicts,
                            failures = report.failures,
                            "Sweep completed"
                        ),
                        Ok(_) => debug!("Sweep found nothing due"),
                        Err(e) => error!(error = %e, "Sweep aborted by store error"),
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
