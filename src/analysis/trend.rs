//! Per-site trend classification.
//!
//! Compares the mean of the last 7 days against the mean of the last 30
//! days. Parameters on an inverted scale (depth to water) have the
//! difference negated first, so "rising" always means the condition is
//! improving.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::analysis::staleness::parse_timestamp;
use crate::model::{Observation, Trend, TrendClass, VALUE_DECIMALS, round_to};
use crate::params::is_inverted_scale;

/// Normalized differences smaller than this are "stable".
pub const STABLE_BAND: f64 = 0.5;

/// Minimum readings in the 30-day window needed to classify at all.
pub const MIN_POINTS_30D: usize = 3;

/// Derives one trend per site from a single feed's deduplicated readings.
///
/// Trends are returned in the order sites first appear in `observations`.
/// Readings whose timestamp does not parse still count towards "latest"
/// (ordering is on the raw string) but fall outside every window.
pub fn analyze_trends(observations: &[Observation], now: DateTime<Utc>) -> Vec<Trend> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_site: HashMap<&str, Vec<&Observation>> = HashMap::new();
    for obs in observations {
        by_site
            .entry(obs.site_id.as_str())
            .or_insert_with(|| {
                order.push(obs.site_id.as_str());
                Vec::new()
            })
            .push(obs);
    }

    order
        .into_iter()
        .filter_map(|site_id| by_site.remove(site_id))
        .filter_map(|readings| site_trend(readings, now))
        .collect()
}

fn site_trend(mut readings: Vec<&Observation>, now: DateTime<Utc>) -> Option<Trend> {
    // Fixed-width ISO 8601 strings sort chronologically.
    readings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let latest = *readings.first()?;

    let dated: Vec<(DateTime<Utc>, f64)> = readings
        .iter()
        .filter_map(|o| parse_timestamp(&o.timestamp).map(|t| (t, o.value)))
        .collect();

    let window = |days: i64| -> Vec<f64> {
        let cutoff = now - Duration::days(days);
        dated.iter().filter(|(t, _)| *t >= cutoff).map(|(_, v)| *v).collect()
    };
    let last_7 = window(7);
    let last_30 = window(30);
    let last_90 = window(90);

    let mean_7 = mean(&last_7);
    let mean_30 = mean(&last_30);
    let mean_90 = mean(&last_90);

    let (class, magnitude) = match (mean_7, mean_30) {
        (Some(m7), Some(m30)) if last_30.len() >= MIN_POINTS_30D => {
            let diff = m7 - m30;
            let normalized = if is_inverted_scale(&latest.parameter_code, &latest.parameter_name) {
                -diff
            } else {
                diff
            };
            (classify(normalized), round_to(normalized.abs(), VALUE_DECIMALS))
        }
        _ => (TrendClass::Unknown, 0.0),
    };

    Some(Trend {
        site_id: latest.site_id.clone(),
        latest_value: latest.value,
        latest_date: latest.timestamp.clone(),
        mean_30d: mean_30.map(|m| round_to(m, VALUE_DECIMALS)),
        mean_90d: mean_90.map(|m| round_to(m, VALUE_DECIMALS)),
        class,
        magnitude,
        lat: latest.lat,
        lng: latest.lng,
    })
}

/// Classifies an already sign-normalized difference. The stable band is
/// exclusive: exactly 0.5 is rising.
pub fn classify(normalized_diff: f64) -> TrendClass {
    if normalized_diff.abs() < STABLE_BAND {
        TrendClass::Stable
    } else if normalized_diff > 0.0 {
        TrendClass::Rising
    } else {
        TrendClass::Falling
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap()
    }

    fn reading(site: &str, days_ago: i64, value: f64, param: &str) -> Observation {
        let at = fixed_now() - Duration::days(days_ago);
        Observation {
            site_id: site.to_string(),
            timestamp: at.format("%Y-%m-%dT%H:%M:%S%.3f+00:00").to_string(),
            value,
            unit: "ft".to_string(),
            parameter_code: param.to_string(),
            parameter_name: String::new(),
            qualifiers: vec!["P".to_string()],
            realtime: false,
            lat: 40.5,
            lng: -89.5,
        }
    }

    #[test]
    fn test_exactly_half_unit_difference_is_rising() {
        // mean(7d) = 10.5, mean(30d) = (10.5 + 9.5 + 10.0) / 3 = 10.0
        let obs = vec![
            reading("A", 1, 10.5, "00065"),
            reading("A", 12, 9.5, "00065"),
            reading("A", 20, 10.0, "00065"),
        ];
        let trends = analyze_trends(&obs, fixed_now());
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].class, TrendClass::Rising);
        assert_eq!(trends[0].magnitude, 0.5);
    }

    #[test]
    fn test_small_difference_is_stable_regardless_of_sign() {
        assert_eq!(classify(0.49), TrendClass::Stable);
        assert_eq!(classify(-0.49), TrendClass::Stable);
        assert_eq!(classify(-0.5), TrendClass::Falling);
        assert_eq!(classify(0.5), TrendClass::Rising);
    }

    #[test]
    fn test_inverted_parameter_flips_sign() {
        // Depth to water: mean(7d) = 9, mean(30d) = 10 → raw -1 → normalized +1.
        let obs = vec![
            reading("W", 2, 9.0, "72019"),
            reading("W", 15, 10.5, "72019"),
            reading("W", 20, 10.5, "72019"),
        ];
        let trends = analyze_trends(&obs, fixed_now());
        assert_eq!(trends[0].class, TrendClass::Rising);
        assert_eq!(trends[0].magnitude, 1.0);
    }

    #[test]
    fn test_fewer_than_three_points_in_30_days_is_unknown() {
        let obs = vec![
            reading("B", 1, 5.0, "00060"),
            reading("B", 10, 50.0, "00060"),
            reading("B", 60, 500.0, "00060"),
        ];
        let trends = analyze_trends(&obs, fixed_now());
        assert_eq!(trends[0].class, TrendClass::Unknown);
        assert_eq!(trends[0].magnitude, 0.0);
        assert_eq!(trends[0].mean_30d, Some(27.5));
        assert_eq!(trends[0].mean_90d, Some(185.0));
    }

    #[test]
    fn test_latest_reading_and_empty_windows() {
        let obs = vec![reading("C", 200, 3.0, "00065"), reading("C", 120, 4.0, "00065")];
        let trends = analyze_trends(&obs, fixed_now());
        let trend = &trends[0];
        assert_eq!(trend.latest_value, 4.0);
        assert_eq!(trend.latest_date, obs[1].timestamp);
        assert_eq!(trend.mean_30d, None);
        assert_eq!(trend.mean_90d, None);
        assert_eq!(trend.class, TrendClass::Unknown);
    }

    #[test]
    fn test_one_trend_per_site_in_first_seen_order() {
        let obs = vec![
            reading("B", 1, 1.0, "00065"),
            reading("A", 1, 1.0, "00065"),
            reading("B", 2, 1.0, "00065"),
        ];
        let ids: Vec<_> = analyze_trends(&obs, fixed_now()).into_iter().map(|t| t.site_id).collect();
        assert_eq!(ids, vec!["B".to_string(), "A".to_string()]);
    }

    #[test]
    fn test_falling_when_recent_mean_drops() {
        let obs = vec![
            reading("D", 1, 8.0, "00065"),
            reading("D", 3, 8.0, "00065"),
            reading("D", 20, 14.0, "00065"),
            reading("D", 25, 14.0, "00065"),
        ];
        // mean(7d) = 8, mean(30d) = 11 → diff -3
        let trends = analyze_trends(&obs, fixed_now());
        assert_eq!(trends[0].class, TrendClass::Falling);
        assert_eq!(trends[0].magnitude, 3.0);
    }
}
