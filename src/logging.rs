/// Structured logging for the harvest pipeline
///
/// Installs a `tracing` subscriber with console and optional file output,
/// and provides context-rich helpers that tag every event with the data
/// source and unit it concerns. Failures are classified so that expected
/// outages (a state with no active gauges) stay quiet while service
/// degradation is logged loudly.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt as tracing_fmt};

use crate::model::HarvestError;

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Nwis,
    Store,
    Chain,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Nwis => write!(f, "NWIS"),
            DataSource::Store => write!(f, "STORE"),
            DataSource::Chain => write!(f, "CHAIN"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the unit simply has no active series for a feed
    Expected,
    /// Unexpected failure - indicates service degradation or a parser bug
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify an NWIS failure based on the error.
pub fn classify_failure(err: &HarvestError) -> FailureType {
    match err {
        // NWIS answers 404 when a state has no active series for the
        // requested parameters.
        HarvestError::Http(404) | HarvestError::NoData(_) => FailureType::Expected,
        HarvestError::Http(code) if *code >= 500 => FailureType::Unexpected,
        HarvestError::Timeout(_) | HarvestError::Transport(_) => FailureType::Unexpected,
        // Parse errors suggest API changes or bugs
        HarvestError::Parse(_) => FailureType::Unexpected,
        _ => FailureType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// Initialize the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. When `log_file` is set every
/// event is also appended there without ANSI colouring.
pub fn init_logging(level: &str, log_file: Option<&str>, timestamps: bool) -> Result<(), HarvestError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = if timestamps {
        tracing_fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    } else {
        tracing_fmt::layer()
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| HarvestError::Config(format!("log file {}: {}", path, e)))?;
            Some(tracing_fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| HarvestError::Config(e.to_string()))
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a single feed failure for a unit with automatic classification.
pub fn log_feed_failure(unit: &str, feed: &str, err: &HarvestError) {
    let failure_type = classify_failure(err);
    match failure_type {
        FailureType::Expected => {
            debug!(source = %DataSource::Nwis, unit, feed, kind = %failure_type, "feed failed: {}", err)
        }
        FailureType::Unexpected => {
            error!(source = %DataSource::Nwis, unit, feed, kind = %failure_type, "feed failed: {}", err)
        }
        FailureType::Unknown => {
            warn!(source = %DataSource::Nwis, unit, feed, kind = %failure_type, "feed failed: {}", err)
        }
    }
}

/// Log a unit that produced nothing and was parked in the failed list.
pub fn log_unit_failure(unit: &str, reason: &str) {
    warn!(source = %DataSource::Chain, unit, "unit failed, queued for retry: {}", reason);
}

// ---------------------------------------------------------------------------
// Link Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of one chain link.
pub fn log_link_summary(status: &str, total: usize, successful: usize, failed: usize, elapsed_ms: u64) {
    let message = format!(
        "link {}: {}/{} units successful, {} failed in {} ms",
        status, successful, total, failed, elapsed_ms
    );

    if failed == 0 {
        info!(source = %DataSource::Chain, "{}", message);
    } else if successful == 0 {
        error!(source = %DataSource::Chain, "{}", message);
    } else {
        warn!(source = %DataSource::Chain, "{}", message);
    }
}
