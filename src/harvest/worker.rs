//! Fetch-parse worker: turns one work unit into sites, observations and
//! trends.
//!
//! All configured feeds are requested concurrently and gathered as tagged
//! results, so a slow or broken feed only costs its own data. Merging is
//! done in configured feed order rather than completion order, which keeps
//! the output independent of which request happened to finish first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::debug;

use crate::analysis::trend::analyze_trends;
use crate::config::FeedConfig;
use crate::ingest::nwis::FeedSource;
use crate::ingest::parse::{ParsedFeed, parse_feed};
use crate::logging::{DataSource, log_feed_failure};
use crate::model::{HarvestError, MAX_OBSERVATIONS_PER_SITE, Observation, Site, Trend};

/// Everything one unit contributed to the current link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitHarvest {
    pub unit: String,
    pub sites: Vec<Site>,
    pub observations: Vec<Observation>,
    pub trends: Vec<Trend>,
    pub feeds_ok: usize,
    pub feeds_failed: usize,
}

/// The seam the scheduler drives: fetch and normalize one unit.
#[async_trait]
pub trait UnitFetcher: Send + Sync {
    async fn fetch_unit(&self, unit: &str) -> Result<UnitHarvest, HarvestError>;
}

/// Production worker fetching every configured feed from a `FeedSource`.
pub struct FeedWorker {
    source: Arc<dyn FeedSource>,
    feeds: Vec<FeedConfig>,
}

impl FeedWorker {
    pub fn new(source: Arc<dyn FeedSource>, feeds: Vec<FeedConfig>) -> Self {
        Self { source, feeds }
    }
}

#[async_trait]
impl UnitFetcher for FeedWorker {
    async fn fetch_unit(&self, unit: &str) -> Result<UnitHarvest, HarvestError> {
        process_unit(self.source.as_ref(), &self.feeds, unit, Utc::now()).await
    }
}

/// Fetches all feeds for `unit`, tolerating per-feed failure, and returns
/// the normalized result. Fails only when every feed failed.
pub async fn process_unit(
    source: &dyn FeedSource,
    feeds: &[FeedConfig],
    unit: &str,
    now: DateTime<Utc>,
) -> Result<UnitHarvest, HarvestError> {
    let branches = feeds.iter().map(|feed| async move {
        let parsed = source
            .fetch_feed(unit, feed)
            .await
            .and_then(|body| parse_feed(&body, unit, feed.realtime()));
        (feed, parsed)
    });
    let settled = join_all(branches).await;

    let mut harvest = UnitHarvest { unit: unit.to_string(), ..UnitHarvest::default() };
    let mut gathered: Vec<(&FeedConfig, ParsedFeed)> = Vec::new();
    let mut first_error = None;

    for (feed, result) in settled {
        match result {
            Ok(parsed) => {
                debug!(
                    source = %DataSource::Nwis,
                    unit,
                    feed = %feed.name,
                    "{} sites, {} readings",
                    parsed.sites.len(),
                    parsed.observations.len()
                );
                harvest.feeds_ok += 1;
                gathered.push((feed, parsed));
            }
            Err(err) => {
                log_feed_failure(unit, &feed.name, &err);
                harvest.feeds_failed += 1;
                first_error.get_or_insert(err);
            }
        }
    }

    if gathered.is_empty() {
        return Err(first_error.unwrap_or_else(|| HarvestError::NoData(unit.to_string())));
    }

    let mut trend_input = Vec::new();
    let mut all_sites = Vec::new();
    let mut all_observations = Vec::new();
    for (feed, parsed) in gathered {
        if feed.trend_source {
            trend_input.extend(dedup_observations(parsed.observations.clone()));
        }
        all_sites.extend(parsed.sites);
        all_observations.extend(parsed.observations);
    }

    harvest.trends = analyze_trends(&trend_input, now);
    harvest.sites = union_sites(all_sites);
    harvest.observations = cap_per_site(dedup_observations(all_observations), MAX_OBSERVATIONS_PER_SITE);
    Ok(harvest)
}

/// Keeps the first description of each site id.
pub fn union_sites(sites: Vec<Site>) -> Vec<Site> {
    let mut seen = HashSet::new();
    sites.into_iter().filter(|s| seen.insert(s.id.clone())).collect()
}

/// Keeps the first reading for each (site, timestamp, parameter) triple,
/// preserving input order.
pub fn dedup_observations(observations: Vec<Observation>) -> Vec<Observation> {
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    observations
        .into_iter()
        .filter(|o| {
            let (site, ts, param) = o.dedup_key();
            seen.insert((site.to_string(), ts.to_string(), param.to_string()))
        })
        .collect()
}

/// Sorts each site's readings newest first and keeps at most `cap` of them.
/// Sites come out in first-seen order.
pub fn cap_per_site(observations: Vec<Observation>, cap: usize) -> Vec<Observation> {
    let mut order: Vec<String> = Vec::new();
    let mut by_site: HashMap<String, Vec<Observation>> = HashMap::new();
    for obs in observations {
        if !by_site.contains_key(&obs.site_id) {
            order.push(obs.site_id.clone());
        }
        by_site.entry(obs.site_id.clone()).or_default().push(obs);
    }

    let mut capped = Vec::new();
    for site_id in order {
        if let Some(mut readings) = by_site.remove(&site_id) {
            // Stable sort: equal timestamps keep their first-seen order.
            readings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            readings.truncate(cap);
            capped.extend(readings);
        }
    }
    capped
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_feeds;
    use chrono::TimeZone;
    use serde_json::{Value, json};

    fn obs(site: &str, ts: &str, param: &str, value: f64) -> Observation {
        Observation {
            site_id: site.to_string(),
            timestamp: ts.to_string(),
            value,
            unit: "ft".to_string(),
            parameter_code: param.to_string(),
            parameter_name: String::new(),
            qualifiers: Vec::new(),
            realtime: true,
            lat: 40.0,
            lng: -89.0,
        }
    }

    #[test]
    fn test_dedup_keeps_first_occurrence_per_triple() {
        let input = vec![
            obs("A", "2024-05-01T00:00:00.000", "00065", 1.0),
            obs("A", "2024-05-01T00:00:00.000", "00065", 2.0),
            obs("A", "2024-05-01T00:00:00.000", "00060", 3.0),
            obs("B", "2024-05-01T00:00:00.000", "00065", 4.0),
            obs("A", "2024-05-01T00:00:00.000", "00065", 5.0),
        ];
        let values: Vec<f64> = dedup_observations(input).iter().map(|o| o.value).collect();
        assert_eq!(values, vec![1.0, 3.0, 4.0]);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let input = vec![
            obs("A", "2024-05-01T00:00:00.000", "00065", 1.0),
            obs("A", "2024-05-01T00:00:00.000", "00065", 2.0),
        ];
        let once = dedup_observations(input);
        assert_eq!(dedup_observations(once.clone()), once);
    }

    #[test]
    fn test_cap_keeps_thirty_most_recent() {
        let input: Vec<_> = (1..=45)
            .map(|day| obs("A", &format!("2024-04-{:02}T00:00:00.000", day % 30 + 1), &day.to_string(), 0.0))
            .chain((1..=5).map(|day| obs("B", &format!("2024-05-{:02}T00:00:00.000", day), "00065", 0.0)))
            .collect();

        let capped = cap_per_site(input.clone(), MAX_OBSERVATIONS_PER_SITE);
        let a: Vec<_> = capped.iter().filter(|o| o.site_id == "A").collect();
        let b: Vec<_> = capped.iter().filter(|o| o.site_id == "B").collect();
        assert_eq!(a.len(), 30);
        assert_eq!(b.len(), 5);

        let mut expected: Vec<_> = input.iter().filter(|o| o.site_id == "A").map(|o| o.timestamp.clone()).collect();
        expected.sort_by(|x, y| y.cmp(x));
        expected.truncate(30);
        let kept: Vec<_> = a.iter().map(|o| o.timestamp.clone()).collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn test_union_sites_first_seen_wins() {
        let site = |name: &str| Site {
            id: "05568500".into(),
            name: name.into(),
            attributes: Default::default(),
            state: "IL".into(),
            lat: 40.0,
            lng: -89.0,
        };
        let merged = union_sites(vec![site("first"), site("second")]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "first");
    }

    // --- process_unit with canned feed bodies ------------------------------

    struct CannedSource {
        bodies: HashMap<String, Result<Value, u16>>,
    }

    #[async_trait]
    impl FeedSource for CannedSource {
        async fn fetch_feed(&self, _unit: &str, feed: &FeedConfig) -> Result<Value, HarvestError> {
            match self.bodies.get(&feed.name) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(code)) => Err(HarvestError::Http(*code)),
                None => Err(HarvestError::Timeout(feed.timeout_ms)),
            }
        }
    }

    fn feed_body(site: &str, param: &str, readings: &[(&str, &str)]) -> Value {
        let values: Vec<Value> = readings
            .iter()
            .map(|(ts, v)| json!({ "value": v, "dateTime": ts, "qualifiers": ["P"] }))
            .collect();
        json!({ "value": { "timeSeries": [{
            "sourceInfo": {
                "siteName": format!("Site {}", site),
                "siteCode": [{ "value": site }],
                "geoLocation": { "geogLocation": { "latitude": 40.5, "longitude": -89.5 } }
            },
            "variable": {
                "variableCode": [{ "value": param }],
                "unit": { "unitCode": "ft" },
                "noDataValue": -999999.0
            },
            "values": [{ "value": values }]
        }]}})
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_partial_feed_failure_still_yields_data() {
        let source = CannedSource {
            bodies: HashMap::from([
                ("recent".to_string(), Ok(feed_body("S1", "00065", &[("2024-05-09T23:45:00.000-05:00", "4.2")]))),
                ("periodic".to_string(), Err(503)),
            ]),
        };
        let harvest = process_unit(&source, &default_feeds(), "IL", now()).await.expect("one feed is enough");
        assert_eq!(harvest.feeds_ok, 1);
        assert_eq!(harvest.feeds_failed, 2);
        assert_eq!(harvest.sites.len(), 1);
        assert_eq!(harvest.observations.len(), 1);
        // History feed failed, so there is nothing to derive trends from.
        assert!(harvest.trends.is_empty());
    }

    #[tokio::test]
    async fn test_all_feeds_failing_fails_the_unit() {
        let source = CannedSource { bodies: HashMap::new() };
        let err = process_unit(&source, &default_feeds(), "IL", now()).await.unwrap_err();
        assert!(matches!(err, HarvestError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_feeds_are_unioned_and_deduplicated() {
        let shared = ("2024-05-09T12:00:00.000-05:00", "4.0");
        let source = CannedSource {
            bodies: HashMap::from([
                (
                    "history".to_string(),
                    Ok(feed_body("S1", "00065", &[
                        ("2024-05-01T00:00:00.000", "3.0"),
                        ("2024-05-05T00:00:00.000", "3.5"),
                        ("2024-05-09T00:00:00.000", "4.0"),
                    ])),
                ),
                ("recent".to_string(), Ok(feed_body("S1", "00065", &[shared]))),
                ("periodic".to_string(), Ok(feed_body("S1", "00065", &[shared, ("2024-05-08T12:00:00.000-05:00", "3.9")]))),
            ]),
        };

        let harvest = process_unit(&source, &default_feeds(), "IL", now()).await.unwrap();
        assert_eq!(harvest.sites.len(), 1);
        assert_eq!(harvest.observations.len(), 5);
        assert!(harvest.observations.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(harvest.trends.len(), 1);
        assert_eq!(harvest.trends[0].latest_value, 4.0);
        // History is daily, the other feeds are realtime.
        assert!(harvest.observations.iter().any(|o| !o.realtime));
        assert!(harvest.observations.iter().any(|o| o.realtime));
    }
}
