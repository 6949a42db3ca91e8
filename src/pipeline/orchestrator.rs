//! One chain link, start to finish.
//!
//! ```text
//! request ─► depth check ─► queue ─► lock ─► scheduler ─► merge/persist ─► unlock ─► continue?
//! ```
//!
//! Everything between taking and releasing the lock runs inside a single
//! `catch_unwind`, so an error or a panic anywhere in the body still
//! releases the lock and comes back as an `error` status instead of
//! tearing down the process.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::{GridConfig, HarvestConfig};
use crate::harvest::UnitFetcher;
use crate::logging::{DataSource, log_link_summary};
use crate::model::{HarvestError, WorkUnit};
use crate::pipeline::continuation::{ContinuationDecision, Continuer, decide_continuation};
use crate::pipeline::merge::{LinkHarvest, merge_snapshot, should_persist};
use crate::pipeline::queue::build_queue;
use crate::pipeline::scheduler::{UnitResult, panic_message, run_scheduler};
use crate::store::CacheStore;

/// Parameters a link is invoked with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub failed_units: Vec<String>,
}

impl LinkRequest {
    /// A fresh chain starts at the beginning with no history.
    pub fn is_fresh(&self) -> bool {
        self.offset == 0 && self.depth == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkStatus {
    /// The link ran and wrote a snapshot.
    Complete,
    /// A fresh chain arrived while another link held the lock.
    Skipped,
    /// More work remained but the chain had used up its hops.
    ChainLimit,
    /// Nothing was queued.
    NoOp,
    /// The link ran but had nothing worth persisting.
    Empty,
    /// The store failed or the link body panicked; `error` says which.
    Error,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Complete => "complete",
            LinkStatus::Skipped => "skipped",
            LinkStatus::ChainLimit => "chain-limit",
            LinkStatus::NoOp => "no-op",
            LinkStatus::Empty => "empty",
            LinkStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    pub status: LinkStatus,
    pub results: Vec<UnitResult>,
    pub failed_units: Vec<String>,
    pub next_offset: usize,
    pub depth: u32,
    pub elapsed_ms: u64,
    pub self_chained: bool,
    pub budget_exhausted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LinkResponse {
    /// A response that did no work: offset and failures pass through.
    fn idle(status: LinkStatus, request: &LinkRequest) -> Self {
        Self {
            status,
            results: Vec::new(),
            failed_units: request.failed_units.clone(),
            next_offset: request.offset,
            depth: request.depth,
            elapsed_ms: 0,
            self_chained: false,
            budget_exhausted: false,
            error: None,
        }
    }
}

/// Knobs of a single link.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub concurrency: usize,
    pub budget: Duration,
    pub max_chain_depth: u32,
    pub grid: GridConfig,
}

impl LinkSettings {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            concurrency: config.scheduler.concurrency,
            budget: config.scheduler.budget(),
            max_chain_depth: config.scheduler.max_chain_depth,
            grid: config.grid.clone(),
        }
    }
}

/// What the locked body of a link produced.
struct LinkBody {
    results: Vec<UnitResult>,
    failed_units: Vec<String>,
    next_offset: usize,
    budget_exhausted: bool,
    persisted: bool,
    decision: ContinuationDecision,
}

pub struct Harvester {
    universe: Vec<String>,
    fetcher: Arc<dyn UnitFetcher>,
    store: Arc<dyn CacheStore>,
    continuer: Arc<dyn Continuer>,
    settings: LinkSettings,
}

impl Harvester {
    pub fn new(
        universe: Vec<String>,
        fetcher: Arc<dyn UnitFetcher>,
        store: Arc<dyn CacheStore>,
        continuer: Arc<dyn Continuer>,
        settings: LinkSettings,
    ) -> Self {
        Self { universe, fetcher, store, continuer, settings }
    }

    /// Runs one link and, when warranted, hands the next one to the
    /// continuer. Never fails: every outcome is expressed in the status.
    pub async fn run_link(&self, request: LinkRequest) -> LinkResponse {
        let started = Instant::now();
        let mut response = self.run_link_inner(&request, started).await;
        response.elapsed_ms = started.elapsed().as_millis() as u64;

        let successful = response.results.iter().filter(|r| r.error.is_none()).count();
        log_link_summary(
            response.status.as_str(),
            response.results.len(),
            successful,
            response.results.len() - successful,
            response.elapsed_ms,
        );
        response
    }

    async fn run_link_inner(&self, request: &LinkRequest, started: Instant) -> LinkResponse {
        if request.depth > self.settings.max_chain_depth {
            warn!(
                source = %DataSource::Chain,
                depth = request.depth,
                max = self.settings.max_chain_depth,
                "link arrived beyond the chain depth limit"
            );
            return LinkResponse::idle(LinkStatus::ChainLimit, request);
        }

        let queue = build_queue(&self.universe, request.offset, &request.failed_units);
        if queue.is_empty() {
            info!(source = %DataSource::Chain, offset = request.offset, "nothing queued");
            return LinkResponse { failed_units: Vec::new(), ..LinkResponse::idle(LinkStatus::NoOp, request) };
        }

        match self.store.get_lock().await {
            Ok(true) if request.is_fresh() => {
                info!(source = %DataSource::Chain, "another chain is building, fresh start skipped");
                return LinkResponse::idle(LinkStatus::Skipped, request);
            }
            Ok(_) => {}
            Err(e) => return self.failed(request, e.to_string()),
        }
        if let Err(e) = self.store.set_lock(true).await {
            return self.failed(request, e.to_string());
        }

        let body = AssertUnwindSafe(self.locked_body(request, &queue, started)).catch_unwind().await;

        let released = self.store.set_lock(false).await;

        let body = match body {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => return self.failed_after_release(request, e.to_string(), released),
            Err(panic) => {
                let message = format!("link panicked: {}", panic_message(&*panic));
                return self.failed_after_release(request, message, released);
            }
        };

        let status = match body.decision {
            ContinuationDecision::ChainLimit => LinkStatus::ChainLimit,
            _ if body.persisted => LinkStatus::Complete,
            _ => LinkStatus::Empty,
        };

        let mut response = LinkResponse {
            status,
            results: body.results,
            failed_units: body.failed_units,
            next_offset: body.next_offset,
            depth: request.depth,
            elapsed_ms: 0,
            self_chained: false,
            budget_exhausted: body.budget_exhausted,
            error: None,
        };

        if let Err(e) = released {
            error!(source = %DataSource::Store, "failed to release build lock: {}", e);
            response.error = Some(format!("lock release: {}", e));
        }

        match body.decision {
            ContinuationDecision::Continue(next) => match self.continuer.dispatch(&next.into()).await {
                Ok(()) => response.self_chained = true,
                Err(e) => {
                    error!(source = %DataSource::Chain, "could not start next link: {}", e);
                    response.error = Some(e.to_string());
                }
            },
            ContinuationDecision::ChainLimit => {
                warn!(
                    source = %DataSource::Chain,
                    depth = request.depth,
                    failed = response.failed_units.len(),
                    "chain depth limit reached, giving up"
                );
            }
            ContinuationDecision::Finished => {
                info!(source = %DataSource::Chain, depth = request.depth, "chain finished");
            }
        }

        response
    }

    async fn locked_body(
        &self,
        request: &LinkRequest,
        queue: &[WorkUnit],
        started: Instant,
    ) -> Result<LinkBody, HarvestError> {
        let prior_grid = self.store.existing_grid().await?;
        let prior_units = self.store.existing_processed_units().await?;
        // Every stored snapshot lists at least the unit that produced its
        // first sites.
        let prior_exists = !prior_units.is_empty();

        let outcome = run_scheduler(
            queue,
            self.fetcher.as_ref(),
            self.settings.concurrency,
            self.settings.budget,
            started,
        )
        .await;

        let link: LinkHarvest = outcome.harvests.into_iter().collect();
        let persisted = should_persist(!link.sites.is_empty(), prior_exists);
        if persisted {
            let snapshot = merge_snapshot(prior_grid, prior_units, &link, &self.settings.grid, Utc::now());
            self.store.set_snapshot(&snapshot).await?;
            info!(
                source = %DataSource::Store,
                sites = snapshot.meta.site_count,
                cells = snapshot.meta.cell_count,
                units = snapshot.meta.processed_units.len(),
                stale = snapshot.meta.stale_site_count,
                "snapshot written"
            );
        } else {
            info!(source = %DataSource::Store, "no sites and no prior snapshot, nothing written");
        }

        let next_offset = request.offset + outcome.primary_consumed;
        let decision = decide_continuation(
            self.universe.len(),
            next_offset,
            &outcome.failed_units,
            request.depth,
            self.settings.max_chain_depth,
        );

        Ok(LinkBody {
            results: outcome.results,
            failed_units: outcome.failed_units,
            next_offset,
            budget_exhausted: outcome.budget_exhausted,
            persisted,
            decision,
        })
    }

    fn failed(&self, request: &LinkRequest, message: String) -> LinkResponse {
        error!(source = %DataSource::Chain, "link failed: {}", message);
        LinkResponse { error: Some(message), ..LinkResponse::idle(LinkStatus::Error, request) }
    }

    fn failed_after_release(
        &self,
        request: &LinkRequest,
        message: String,
        released: Result<(), HarvestError>,
    ) -> LinkResponse {
        if let Err(e) = released {
            error!(source = %DataSource::Store, "failed to release build lock: {}", e);
        }
        self.failed(request, message)
    }
}
