//! Deciding whether a chain goes on, and handing the next link off.
//!
//! The decision is a plain value so it can be tested without any transport.
//! How the next link actually gets started is behind the `Continuer` trait:
//! an HTTP self-call in deployment, an in-process channel for the CLI
//! trampoline and tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ContinuationConfig;
use crate::logging::DataSource;
use crate::model::HarvestError;
use crate::pipeline::orchestrator::LinkRequest;

/// Parameters of the next link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub next_offset: usize,
    pub depth: u32,
    pub failed_units: Vec<String>,
}

impl From<Continuation> for LinkRequest {
    fn from(c: Continuation) -> Self {
        LinkRequest { offset: c.next_offset, depth: c.depth, failed_units: c.failed_units }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationDecision {
    /// Universe covered and nothing left to retry.
    Finished,
    Continue(Continuation),
    /// More work remains but the chain already made its last allowed hop.
    ChainLimit,
}

/// `next_offset` already includes this link's consumed primaries.
pub fn decide_continuation(
    universe_len: usize,
    next_offset: usize,
    failed_units: &[String],
    depth: u32,
    max_chain_depth: u32,
) -> ContinuationDecision {
    let warranted = next_offset < universe_len || !failed_units.is_empty();
    if !warranted {
        ContinuationDecision::Finished
    } else if depth >= max_chain_depth {
        ContinuationDecision::ChainLimit
    } else {
        ContinuationDecision::Continue(Continuation {
            next_offset,
            depth: depth + 1,
            failed_units: failed_units.to_vec(),
        })
    }
}

/// Starts the next link. Implementations must not wait for that link to
/// finish.
#[async_trait]
pub trait Continuer: Send + Sync {
    async fn dispatch(&self, request: &LinkRequest) -> Result<(), HarvestError>;
}

/// POSTs the next link's request to the harvester's own entry point.
///
/// The call is fire-and-forget: the short timeout elapsing is the normal
/// outcome, since the receiving link runs for far longer than we wait.
pub struct HttpContinuer {
    http: Client,
    url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpContinuer {
    pub fn new(url: impl Into<String>, config: &ContinuationConfig) -> Result<Self, HarvestError> {
        let http = Client::builder()
            .user_agent(concat!("nwis_harvester/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HarvestError::Config(format!("continuation client: {}", e)))?;
        Ok(Self {
            http,
            url: url.into(),
            auth_token: config.auth_token.clone(),
            timeout: Duration::from_millis(config.dispatch_timeout_ms),
        })
    }
}

#[async_trait]
impl Continuer for HttpContinuer {
    async fn dispatch(&self, request: &LinkRequest) -> Result<(), HarvestError> {
        let mut builder = self.http.post(&self.url).json(request).timeout(self.timeout);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        match builder.send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(source = %DataSource::Chain, offset = request.offset, depth = request.depth, "next link accepted");
                Ok(())
            }
            Ok(resp) => Err(HarvestError::Dispatch(format!("next link rejected: HTTP {}", resp.status()))),
            Err(e) if e.is_timeout() => {
                debug!(source = %DataSource::Chain, offset = request.offset, depth = request.depth, "dispatch timed out, next link running");
                Ok(())
            }
            Err(e) => {
                warn!(source = %DataSource::Chain, "dispatch failed: {}", e);
                Err(HarvestError::Dispatch(e.to_string()))
            }
        }
    }
}

/// Queues the next link on a channel for an in-process driver to pick up.
pub struct LocalContinuer {
    tx: mpsc::UnboundedSender<LinkRequest>,
}

impl LocalContinuer {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LinkRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Continuer for LocalContinuer {
    async fn dispatch(&self, request: &LinkRequest) -> Result<(), HarvestError> {
        self.tx
            .send(request.clone())
            .map_err(|_| HarvestError::Dispatch("link receiver dropped".to_string()))
    }
}
