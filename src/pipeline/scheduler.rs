//! Time-budgeted admission loop.
//!
//! Units are admitted while fewer than `concurrency` are in flight and the
//! link's budget has not run out. Once the budget is spent no further unit
//! is started, but whatever is already running is allowed to finish. A
//! worker error or panic is caught at the unit boundary and recorded; it
//! never stops the loop or a sibling.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::harvest::{UnitFetcher, UnitHarvest};
use crate::logging::{DataSource, log_unit_failure};
use crate::model::{HarvestError, UnitOrigin, WorkUnit};

/// Per-unit line of the link response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitResult {
    pub unit: String,
    pub origin: UnitOrigin,
    pub sites: usize,
    pub observations: usize,
    pub trends: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    /// One entry per unit that ran, in queue order.
    pub results: Vec<UnitResult>,
    /// Output of every unit that succeeded, in queue order.
    pub harvests: Vec<UnitHarvest>,
    /// Units that failed plus retries that never started, in queue order.
    pub failed_units: Vec<String>,
    /// Primary units that completed successfully.
    pub primary_consumed: usize,
    pub budget_exhausted: bool,
}

/// Runs `queue` through `fetcher` under a concurrency cap and a wall-clock
/// budget measured from `started`.
pub async fn run_scheduler(
    queue: &[WorkUnit],
    fetcher: &dyn UnitFetcher,
    concurrency: usize,
    budget: Duration,
    started: Instant,
) -> ScheduleOutcome {
    let limit = concurrency.max(1);
    let mut in_flight = FuturesUnordered::new();
    let mut next = 0;
    let mut budget_exhausted = false;
    let mut settled: Vec<(usize, Result<UnitHarvest, HarvestError>)> = Vec::with_capacity(queue.len());

    loop {
        while in_flight.len() < limit && next < queue.len() && !budget_exhausted {
            if started.elapsed() > budget {
                info!(
                    source = %DataSource::Chain,
                    admitted = next,
                    queued = queue.len(),
                    "time budget exhausted, no further units admitted"
                );
                budget_exhausted = true;
                break;
            }
            let index = next;
            next += 1;
            in_flight.push(run_unit(fetcher, index, &queue[index]));
        }

        match in_flight.next().await {
            Some(done) => settled.push(done),
            None => break,
        }
    }

    settled.sort_by_key(|(index, _)| *index);
    let mut outcome = ScheduleOutcome { budget_exhausted, ..ScheduleOutcome::default() };
    let mut failed_seen = HashSet::new();

    for (index, result) in settled {
        let unit = &queue[index];
        match result {
            Ok(harvest) => {
                if unit.is_primary() {
                    outcome.primary_consumed += 1;
                }
                outcome.results.push(UnitResult {
                    unit: unit.id.clone(),
                    origin: unit.origin,
                    sites: harvest.sites.len(),
                    observations: harvest.observations.len(),
                    trends: harvest.trends.len(),
                    error: None,
                });
                outcome.harvests.push(harvest);
            }
            Err(err) => {
                log_unit_failure(&unit.id, &err.to_string());
                outcome.results.push(UnitResult {
                    unit: unit.id.clone(),
                    origin: unit.origin,
                    sites: 0,
                    observations: 0,
                    trends: 0,
                    error: Some(err.to_string()),
                });
                if failed_seen.insert(unit.id.clone()) {
                    outcome.failed_units.push(unit.id.clone());
                }
            }
        }
    }

    // Primary units that never started are picked up again through the
    // offset; retries have no such cursor and must be carried forward.
    for unit in &queue[next..] {
        if !unit.is_primary() && failed_seen.insert(unit.id.clone()) {
            outcome.failed_units.push(unit.id.clone());
        }
    }

    outcome
}

async fn run_unit(
    fetcher: &dyn UnitFetcher,
    index: usize,
    unit: &WorkUnit,
) -> (usize, Result<UnitHarvest, HarvestError>) {
    debug!(source = %DataSource::Chain, unit = %unit.id, origin = ?unit.origin, "unit admitted");
    let result = match AssertUnwindSafe(fetcher.fetch_unit(&unit.id)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(HarvestError::Panic(panic_message(&*panic))),
    };
    (index, result)
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
