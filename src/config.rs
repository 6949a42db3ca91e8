//! Harvest configuration.
//!
//! Loaded from a TOML file (default `harvest.toml`) with every field
//! optional. A `.env` file is read first, and a handful of environment
//! variables override the file so secrets never have to live in it:
//!
//! - `DATABASE_URL` → `store.database_url`
//! - `HARVEST_SELF_URL` → `continuation.self_url`
//! - `HARVEST_AUTH_TOKEN` → `continuation.auth_token`

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::analysis::grid::{DEFAULT_CELL_DEG, MIN_CELL_DEG};
use crate::model::HarvestError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub scheduler: SchedulerConfig,
    pub nwis: NwisConfig,
    pub grid: GridConfig,
    pub continuation: ContinuationConfig,
    pub logging: LoggingConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Units processed concurrently within a link.
    pub concurrency: usize,
    /// Wall-clock ceiling after which no new unit is admitted.
    pub budget_secs: u64,
    /// Continuation hops allowed before the chain gives up.
    pub max_chain_depth: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { concurrency: 4, budget_secs: 240, max_chain_depth: 20 }
    }
}

impl SchedulerConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }
}

/// Which NWIS web service a feed reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NwisService {
    /// Instantaneous values (`/nwis/iv/`), typically 15-minute readings.
    Iv,
    /// Daily values (`/nwis/dv/`).
    Dv,
}

impl NwisService {
    pub fn path(&self) -> &'static str {
        match self {
            NwisService::Iv => "iv",
            NwisService::Dv => "dv",
        }
    }
}

/// One independent request issued per unit.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub service: NwisService,
    /// ISO 8601 duration, e.g. `P90D` or `PT2H`.
    pub period: String,
    pub parameter_codes: Vec<String>,
    pub timeout_ms: u64,
    /// Trends are derived from this feed.
    #[serde(default)]
    pub trend_source: bool,
}

impl FeedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn realtime(&self) -> bool {
        self.service == NwisService::Iv
    }
}

fn default_params() -> Vec<String> {
    ["00060", "00065", "72019"].iter().map(|s| s.to_string()).collect()
}

/// The three feeds every unit is fetched with: long-window history,
/// short-window high-frequency, and medium-window periodic.
pub fn default_feeds() -> Vec<FeedConfig> {
    vec![
        FeedConfig {
            name: "history".to_string(),
            service: NwisService::Dv,
            period: "P90D".to_string(),
            parameter_codes: default_params(),
            timeout_ms: 45_000,
            trend_source: true,
        },
        FeedConfig {
            name: "recent".to_string(),
            service: NwisService::Iv,
            period: "PT2H".to_string(),
            parameter_codes: default_params(),
            timeout_ms: 20_000,
            trend_source: false,
        },
        FeedConfig {
            name: "periodic".to_string(),
            service: NwisService::Iv,
            period: "P7D".to_string(),
            parameter_codes: default_params(),
            timeout_ms: 30_000,
            trend_source: false,
        },
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NwisConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Global request rate across all in-flight units.
    pub requests_per_second: u32,
    pub max_retries: u32,
    /// Linear backoff step between attempts.
    pub retry_delay_ms: u64,
    pub feeds: Vec<FeedConfig>,
}

impl Default for NwisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://waterservices.usgs.gov/nwis".to_string(),
            user_agent: concat!("nwis_harvester/", env!("CARGO_PKG_VERSION")).to_string(),
            requests_per_second: 4,
            max_retries: 2,
            retry_delay_ms: 2_000,
            feeds: default_feeds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Cell width in degrees on both axes.
    pub cell_deg: f64,
    /// Sites whose latest reading is older than this are counted stale.
    pub stale_after_hours: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { cell_deg: DEFAULT_CELL_DEG, stale_after_hours: 48 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContinuationConfig {
    /// Entry point the next link is POSTed to. When unset, the binary runs
    /// the chain in-process.
    pub self_url: Option<String>,
    pub auth_token: Option<String>,
    pub dispatch_timeout_ms: u64,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self { self_url: None, auth_token: None, dispatch_timeout_ms: 1_500 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file: None, timestamps: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    /// Row key the snapshot is stored under.
    pub key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { database_url: None, key: "nwis-grid".to_string() }
    }
}

impl HarvestConfig {
    /// Parses a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, HarvestError> {
        let config: HarvestConfig =
            toml::from_str(raw).map_err(|e| HarvestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `.env`, then the TOML file if it exists, then applies
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self, HarvestError> {
        dotenv::dotenv().ok();

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| HarvestError::Config(format!("{}: {}", path.display(), e)))?;
            Self::from_toml_str(&raw)?
        } else {
            HarvestConfig::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL") {
            self.store.database_url = Some(url);
        }
        if let Some(url) = lookup("HARVEST_SELF_URL") {
            self.continuation.self_url = Some(url);
        }
        if let Some(token) = lookup("HARVEST_AUTH_TOKEN") {
            self.continuation.auth_token = Some(token);
        }
    }

    fn validate(&self) -> Result<(), HarvestError> {
        if self.scheduler.concurrency == 0 {
            return Err(HarvestError::Config("scheduler.concurrency must be at least 1".into()));
        }
        if !(self.grid.cell_deg.is_finite() && self.grid.cell_deg >= MIN_CELL_DEG) {
            return Err(HarvestError::Config(format!("grid.cell_deg must be at least {}", MIN_CELL_DEG)));
        }
        if self.nwis.feeds.is_empty() {
            return Err(HarvestError::Config("nwis.feeds must name at least one feed".into()));
        }
        if self.nwis.requests_per_second == 0 {
            return Err(HarvestError::Config("nwis.requests_per_second must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = HarvestConfig::from_toml_str("").expect("empty TOML is valid");
        assert_eq!(config.scheduler.concurrency, 4);
        assert_eq!(config.nwis.feeds.len(), 3);
        assert_eq!(config.grid.cell_deg, 0.5);
        assert!(config.continuation.self_url.is_none());
    }

    #[test]
    fn test_default_feeds_have_one_trend_source() {
        let sources = default_feeds().iter().filter(|f| f.trend_source).count();
        assert_eq!(sources, 1);
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let raw = r#"
            [scheduler]
            concurrency = 2
            budget_secs = 50

            [[nwis.feeds]]
            name = "recent"
            service = "iv"
            period = "PT1H"
            parameter_codes = ["00065"]
            timeout_ms = 5000
        "#;
        let config = HarvestConfig::from_toml_str(raw).expect("valid TOML");
        assert_eq!(config.scheduler.concurrency, 2);
        assert_eq!(config.scheduler.max_chain_depth, 20);
        assert_eq!(config.nwis.feeds.len(), 1);
        assert!(config.nwis.feeds[0].realtime());
        assert_eq!(config.nwis.base_url, "https://waterservices.usgs.gov/nwis");
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let err = HarvestConfig::from_toml_str("[scheduler]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
    }

    #[test]
    fn test_cell_width_bounds() {
        assert!(HarvestConfig::from_toml_str("[grid]\ncell_deg = 0.001\n").is_ok());
        for bad in ["0.0", "-0.5", "0.0000001"] {
            let raw = format!("[grid]\ncell_deg = {}\n", bad);
            let err = HarvestConfig::from_toml_str(&raw).unwrap_err();
            assert!(matches!(err, HarvestError::Config(_)), "cell_deg {} accepted", bad);
        }
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = HarvestConfig::default();
        config.apply_env(|key| match key {
            "HARVEST_SELF_URL" => Some("https://example.test/harvest".to_string()),
            "DATABASE_URL" => Some("postgres://localhost/cache".to_string()),
            _ => None,
        });
        assert_eq!(config.continuation.self_url.as_deref(), Some("https://example.test/harvest"));
        assert_eq!(config.store.database_url.as_deref(), Some("postgres://localhost/cache"));
        assert!(config.continuation.auth_token.is_none());
    }

    #[test]
    fn test_load_reads_file_and_tolerates_missing_one() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("harvest.toml");
        std::fs::write(&path, "[grid]\ncell_deg = 0.25\n").unwrap();

        let config = HarvestConfig::load(&path).expect("file loads");
        assert_eq!(config.grid.cell_deg, 0.25);

        let missing = HarvestConfig::load(&dir.path().join("absent.toml")).expect("defaults");
        assert_eq!(missing.grid.cell_deg, DEFAULT_CELL_DEG);
    }
}
