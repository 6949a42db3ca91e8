/// Core data types for the NWIS harvest pipeline.
///
/// This module defines the shared domain model imported by all other modules:
/// work units, sites, observations, trends, grid cells, the persisted cache
/// snapshot, and the crate-wide error type. It contains no I/O.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Retention and precision
// ---------------------------------------------------------------------------

/// Maximum number of observations kept per site after a unit is processed.
pub const MAX_OBSERVATIONS_PER_SITE: usize = 30;

/// Decimal places kept on site and observation coordinates.
pub const COORD_DECIMALS: i32 = 5;

/// Decimal places kept on observation values and trend statistics.
pub const VALUE_DECIMALS: i32 = 2;

/// Rounds `value` to `decimals` places (half away from zero).
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Work units
// ---------------------------------------------------------------------------

/// Where a queued unit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitOrigin {
    /// Drawn from the remaining slice of the universe.
    Primary,
    /// Carried over from a previous link's failed list.
    Retry,
}

/// One independently fetchable partition of the harvest (a state code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: String,
    pub origin: UnitOrigin,
}

impl WorkUnit {
    pub fn primary(id: impl Into<String>) -> Self {
        Self { id: id.into(), origin: UnitOrigin::Primary }
    }

    pub fn retry(id: impl Into<String>) -> Self {
        Self { id: id.into(), origin: UnitOrigin::Retry }
    }

    pub fn is_primary(&self) -> bool {
        self.origin == UnitOrigin::Primary
    }
}

// ---------------------------------------------------------------------------
// Harvested records
// ---------------------------------------------------------------------------

/// A monitoring location extracted from a `timeSeries[].sourceInfo` block.
///
/// Identity is `id`; when several feeds describe the same site, the first
/// description seen wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    /// Categorical properties such as `siteTypeCd`, `hucCd`, `agencyCode`.
    pub attributes: BTreeMap<String, String>,
    /// Work unit (state code) the site was harvested under.
    pub state: String,
    pub lat: f64,
    pub lng: f64,
}

/// A single reading, enriched with parameter metadata from the enclosing
/// `timeSeries` and the site's coordinates at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub site_id: String,
    pub timestamp: String, // ISO 8601, e.g. "2024-05-01T12:00:00.000-05:00"
    pub value: f64,
    pub unit: String,
    pub parameter_code: String,
    pub parameter_name: String,
    pub qualifiers: Vec<String>, // "P" = provisional, "A" = approved
    /// True for instantaneous-value feeds, false for daily-value batches.
    pub realtime: bool,
    pub lat: f64,
    pub lng: f64,
}

impl Observation {
    /// Key used to collapse duplicate readings reported by several feeds.
    pub fn dedup_key(&self) -> (&str, &str, &str) {
        (&self.site_id, &self.timestamp, &self.parameter_code)
    }
}

/// Direction of a site's recent readings on a uniformly signed
/// "improvement" axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendClass {
    Rising,
    Falling,
    Stable,
    Unknown,
}

/// Derived per-site trend statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub site_id: String,
    pub latest_value: f64,
    pub latest_date: String,
    pub mean_30d: Option<f64>,
    pub mean_90d: Option<f64>,
    pub class: TrendClass,
    pub magnitude: f64,
    pub lat: f64,
    pub lng: f64,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// All records whose coordinates quantize to one grid key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub sites: Vec<Site>,
    pub observations: Vec<Observation>,
    pub trends: Vec<Trend>,
}

/// Aggregate metadata describing a snapshot. Always recomputed from the
/// full grid, never from a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub built_at: DateTime<Utc>,
    pub site_count: usize,
    pub observation_count: usize,
    pub trend_count: usize,
    pub cell_count: usize,
    pub processed_units: BTreeSet<String>,
    /// Sites whose latest reading was older than the staleness window at
    /// build time.
    #[serde(default)]
    pub stale_site_count: usize,
}

/// The persisted, spatially indexed harvest result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub meta: SnapshotMeta,
    pub grid: BTreeMap<String, GridCell>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise while fetching, parsing, storing or chaining.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Non-2xx HTTP response from the USGS API.
    #[error("HTTP error: {0}")]
    Http(u16),
    /// Connection, TLS or body-read failure.
    #[error("Transport error: {0}")]
    Transport(String),
    /// The request did not finish within its timeout.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
    /// The response body could not be deserialized.
    #[error("Parse error: {0}")]
    Parse(String),
    /// Every feed for a unit came back empty-handed.
    #[error("No data available for unit: {0}")]
    NoData(String),
    /// The cache store rejected a read or write.
    #[error("Store error: {0}")]
    Store(String),
    /// The configuration file is missing fields or malformed.
    #[error("Config error: {0}")]
    Config(String),
    /// The continuation could not be handed to the next link.
    #[error("Dispatch error: {0}")]
    Dispatch(String),
    /// A unit worker or the link body panicked.
    #[error("Panicked: {0}")]
    Panic(String),
}

impl From<serde_json::Error> for HarvestError {
    fn from(err: serde_json::Error) -> Self {
        HarvestError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for HarvestError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            HarvestError::Http(status.as_u16())
        } else {
            HarvestError::Transport(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
