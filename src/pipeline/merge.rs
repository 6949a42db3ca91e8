//! Folding one link's output into the persisted snapshot.
//!
//! A prior cell survives untouched only if none of its sites belongs to a
//! unit processed in this link. Cells that do are dropped wholesale before
//! the new records are indexed, so a touched unit's data is always replaced
//! rather than appended to. Counts are always recomputed from the final
//! grid.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::analysis::grid::grid_key;
use crate::analysis::staleness::is_stale_at;
use crate::config::GridConfig;
use crate::harvest::UnitHarvest;
use crate::model::{CacheSnapshot, GridCell, Observation, Site, SnapshotMeta, Trend};

/// Everything the successful units of one link produced.
#[derive(Debug, Clone, Default)]
pub struct LinkHarvest {
    pub processed_units: BTreeSet<String>,
    pub sites: Vec<Site>,
    pub observations: Vec<Observation>,
    pub trends: Vec<Trend>,
}

impl LinkHarvest {
    pub fn absorb(&mut self, harvest: UnitHarvest) {
        self.processed_units.insert(harvest.unit);
        self.sites.extend(harvest.sites);
        self.observations.extend(harvest.observations);
        self.trends.extend(harvest.trends);
    }
}

impl FromIterator<UnitHarvest> for LinkHarvest {
    fn from_iter<I: IntoIterator<Item = UnitHarvest>>(iter: I) -> Self {
        let mut link = LinkHarvest::default();
        for harvest in iter {
            link.absorb(harvest);
        }
        link
    }
}

/// Builds the next snapshot from the stored grid and processed units (both
/// empty when nothing is stored yet) and this link's output.
pub fn merge_snapshot(
    prior_grid: BTreeMap<String, GridCell>,
    prior_units: BTreeSet<String>,
    link: &LinkHarvest,
    grid_config: &GridConfig,
    now: DateTime<Utc>,
) -> CacheSnapshot {
    let mut processed_units = prior_units;

    let mut grid: BTreeMap<String, GridCell> = prior_grid
        .into_iter()
        .filter(|(_, cell)| !cell.sites.iter().any(|s| link.processed_units.contains(&s.state)))
        .collect();

    let cell_deg = grid_config.cell_deg;
    for site in &link.sites {
        grid.entry(grid_key(site.lat, site.lng, cell_deg)).or_default().sites.push(site.clone());
    }
    for obs in &link.observations {
        grid.entry(grid_key(obs.lat, obs.lng, cell_deg)).or_default().observations.push(obs.clone());
    }
    for trend in &link.trends {
        grid.entry(grid_key(trend.lat, trend.lng, cell_deg)).or_default().trends.push(trend.clone());
    }

    processed_units.extend(link.processed_units.iter().cloned());

    let meta = SnapshotMeta {
        built_at: now,
        site_count: grid.values().map(|c| c.sites.len()).sum(),
        observation_count: grid.values().map(|c| c.observations.len()).sum(),
        trend_count: grid.values().map(|c| c.trends.len()).sum(),
        cell_count: grid.len(),
        processed_units,
        stale_site_count: count_stale(&grid, grid_config.stale_after_hours, now),
    };

    CacheSnapshot { meta, grid }
}

/// Trends whose latest reading is older than the threshold. A date that
/// does not parse counts as stale.
fn count_stale(grid: &BTreeMap<String, GridCell>, stale_after_hours: u64, now: DateTime<Utc>) -> usize {
    let max_age_minutes = stale_after_hours.saturating_mul(60);
    grid.values()
        .flat_map(|cell| cell.trends.iter())
        .filter(|t| is_stale_at(&t.latest_date, max_age_minutes, now).unwrap_or(true))
        .count()
}

/// An empty first run must not write an empty snapshot; once a snapshot
/// exists every link writes so progress is recorded.
pub fn should_persist(produced_sites: bool, prior_exists: bool) -> bool {
    produced_sites || prior_exists
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrendClass;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn site(id: &str, state: &str, lat: f64, lng: f64) -> Site {
        Site {
            id: id.to_string(),
            name: format!("{} gauge", id),
            attributes: BTreeMap::new(),
            state: state.to_string(),
            lat,
            lng,
        }
    }

    fn obs(site_id: &str, lat: f64, lng: f64) -> Observation {
        Observation {
            site_id: site_id.to_string(),
            timestamp: "2024-05-31T12:00:00.000-05:00".to_string(),
            value: 1.0,
            unit: "ft".to_string(),
            parameter_code: "00065".to_string(),
            parameter_name: String::new(),
            qualifiers: Vec::new(),
            realtime: true,
            lat,
            lng,
        }
    }

    fn trend(site_id: &str, latest_date: &str, lat: f64, lng: f64) -> Trend {
        Trend {
            site_id: site_id.to_string(),
            latest_value: 1.0,
            latest_date: latest_date.to_string(),
            mean_30d: None,
            mean_90d: None,
            class: TrendClass::Unknown,
            magnitude: 0.0,
            lat,
            lng,
        }
    }

    fn harvest(unit: &str, sites: Vec<Site>) -> UnitHarvest {
        let observations = sites.iter().map(|s| obs(&s.id, s.lat, s.lng)).collect();
        UnitHarvest { unit: unit.to_string(), sites, observations, ..UnitHarvest::default() }
    }

    fn config() -> GridConfig {
        GridConfig { cell_deg: 0.5, stale_after_hours: 48 }
    }

    #[test]
    fn test_first_merge_builds_grid_and_counts() {
        let link: LinkHarvest = vec![harvest(
            "IL",
            vec![site("A", "IL", 40.5, -89.5), site("B", "IL", 40.51, -89.49), site("C", "IL", 42.0, -88.0)],
        )]
        .into_iter()
        .collect();

        let snapshot = merge_snapshot(BTreeMap::new(), BTreeSet::new(), &link, &config(), now());

        assert_eq!(snapshot.meta.cell_count, 2);
        assert_eq!(snapshot.meta.site_count, 3);
        assert_eq!(snapshot.meta.observation_count, 3);
        assert_eq!(snapshot.grid["40.50_-89.50"].sites.len(), 2);
        assert!(snapshot.meta.processed_units.contains("IL"));
        assert_eq!(snapshot.meta.built_at, now());
    }

    #[test]
    fn test_untouched_units_are_preserved_and_touched_replaced() {
        let first: LinkHarvest = vec![
            harvest("X", vec![site("X1", "X", 40.0, -90.0), site("X2", "X", 41.0, -90.0)]),
            harvest("Y", vec![site("Y1", "Y", 30.0, -80.0)]),
        ]
        .into_iter()
        .collect();
        let prior = merge_snapshot(BTreeMap::new(), BTreeSet::new(), &first, &config(), now());
        let y_cell_before = prior.grid["30.00_-80.00"].clone();

        // X is re-harvested with one site moved and one gone.
        let second: LinkHarvest = vec![harvest("X", vec![site("X3", "X", 45.0, -95.0)])].into_iter().collect();
        let merged = merge_snapshot(prior.grid, prior.meta.processed_units, &second, &config(), now());

        assert_eq!(merged.grid["30.00_-80.00"], y_cell_before);
        assert!(!merged.grid.contains_key("40.00_-90.00"));
        assert!(!merged.grid.contains_key("41.00_-90.00"));
        assert_eq!(merged.grid["45.00_-95.00"].sites[0].id, "X3");
        assert_eq!(merged.meta.site_count, 2);
        assert_eq!(merged.meta.cell_count, 2);
        let units: Vec<_> = merged.meta.processed_units.iter().cloned().collect();
        assert_eq!(units, vec!["X".to_string(), "Y".to_string()]);
    }

    #[test]
    fn test_retry_only_link_keeps_prior_grid() {
        let first: LinkHarvest = vec![harvest("Y", vec![site("Y1", "Y", 30.0, -80.0)])].into_iter().collect();
        let prior = merge_snapshot(BTreeMap::new(), BTreeSet::new(), &first, &config(), now());

        let merged = merge_snapshot(
            prior.grid.clone(),
            prior.meta.processed_units.clone(),
            &LinkHarvest::default(),
            &config(),
            now(),
        );

        assert_eq!(merged.grid, prior.grid);
        assert_eq!(merged.meta.site_count, 1);
    }

    #[test]
    fn test_stale_site_count() {
        let link = LinkHarvest {
            processed_units: ["IL".to_string()].into_iter().collect(),
            trends: vec![
                trend("fresh", "2024-05-31T06:00:00.000-05:00", 40.0, -89.0),
                trend("old", "2024-05-01T06:00:00.000-05:00", 40.0, -89.0),
                trend("garbled", "not a date", 40.0, -89.0),
            ],
            ..LinkHarvest::default()
        };

        let snapshot = merge_snapshot(BTreeMap::new(), BTreeSet::new(), &link, &config(), now());

        assert_eq!(snapshot.meta.trend_count, 3);
        assert_eq!(snapshot.meta.stale_site_count, 2);
    }

    #[test]
    fn test_persistence_policy() {
        assert!(!should_persist(false, false));
        assert!(should_persist(true, false));
        assert!(should_persist(false, true));
        assert!(should_persist(true, true));
    }
}
