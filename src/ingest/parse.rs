//! Defensive parser for NWIS WaterML-JSON responses.
//!
//! The response shape is
//! `value.timeSeries[] → { sourceInfo, variable, values[].value[] }`, and
//! any field anywhere in it may be missing, null, or the wrong type. The
//! parser therefore walks `serde_json::Value`s rather than deserializing
//! into strict structs: a malformed series or reading is skipped, never
//! allowed to fail the whole feed.
//!
//! Rules applied here:
//! - a series lacking `sourceInfo`, `variable` or `values` is skipped;
//! - a site is emitted once per id, the first description wins;
//! - a site with unparseable or non-finite coordinates, or latitude exactly
//!   0, is dropped together with its readings;
//! - a reading whose value does not parse or equals the series'
//!   `noDataValue` sentinel is dropped;
//! - coordinates are rounded to 5 decimals and values to 2.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::model::{COORD_DECIMALS, HarvestError, Observation, Site, VALUE_DECIMALS, round_to};
use crate::params::parameter_key;

/// Sites and readings extracted from one feed response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub sites: Vec<Site>,
    pub observations: Vec<Observation>,
}

/// Parses a raw response body.
pub fn parse_feed_str(body: &str, unit: &str, realtime: bool) -> Result<ParsedFeed, HarvestError> {
    let json: Value = serde_json::from_str(body)?;
    parse_feed(&json, unit, realtime)
}

/// Parses an already-decoded response.
///
/// Only a response without a `value` object is an error; an empty or
/// absent `timeSeries` list is a valid "no active series" answer.
pub fn parse_feed(body: &Value, unit: &str, realtime: bool) -> Result<ParsedFeed, HarvestError> {
    let value = body
        .get("value")
        .filter(|v| v.is_object())
        .ok_or_else(|| HarvestError::Parse("response has no 'value' object".to_string()))?;

    let series = match value.get("timeSeries").and_then(Value::as_array) {
        Some(series) => series,
        None => return Ok(ParsedFeed::default()),
    };

    let mut parsed = ParsedFeed::default();
    // site id -> (lat, lng) of the first accepted description
    let mut seen: HashMap<String, (f64, f64)> = HashMap::new();

    for ts in series {
        let (Some(source_info), Some(variable), Some(values)) = (
            ts.get("sourceInfo"),
            ts.get("variable"),
            ts.get("values").and_then(Value::as_array),
        ) else {
            continue;
        };

        let Some(site) = parse_site(source_info, unit) else {
            continue;
        };

        let (lat, lng) = match seen.get(&site.id) {
            Some(coords) => *coords,
            None => {
                let coords = (site.lat, site.lng);
                seen.insert(site.id.clone(), coords);
                parsed.sites.push(site.clone());
                coords
            }
        };

        let parameter_code = first_code(variable.get("variableCode")).unwrap_or_default();
        let parameter_name = str_at(variable, "variableName")
            .unwrap_or_else(|| parameter_key(&parameter_code).to_string());
        let unit_code = variable
            .get("unit")
            .and_then(|u| str_at(u, "unitCode"))
            .unwrap_or_default();
        let no_data = variable.get("noDataValue").and_then(number_of);

        for block in values {
            let Some(readings) = block.get("value").and_then(Value::as_array) else {
                continue;
            };
            for reading in readings {
                let Some(timestamp) = str_at(reading, "dateTime").filter(|t| !t.is_empty()) else {
                    continue;
                };
                let Some(raw) = reading.get("value").and_then(number_of) else {
                    continue;
                };
                if no_data.is_some_and(|sentinel| raw == sentinel) {
                    continue;
                }

                parsed.observations.push(Observation {
                    site_id: site.id.clone(),
                    timestamp,
                    value: round_to(raw, VALUE_DECIMALS),
                    unit: unit_code.clone(),
                    parameter_code: parameter_code.clone(),
                    parameter_name: parameter_name.clone(),
                    qualifiers: string_list(reading.get("qualifiers")),
                    realtime,
                    lat,
                    lng,
                });
            }
        }
    }

    Ok(parsed)
}

fn parse_site(source_info: &Value, unit: &str) -> Option<Site> {
    let code_entry = source_info.get("siteCode").and_then(Value::as_array)?.first()?;
    let id = str_at(code_entry, "value").filter(|id| !id.is_empty())?;

    let geog = source_info.get("geoLocation")?.get("geogLocation")?;
    let lat = geog.get("latitude").and_then(number_of)?;
    let lng = geog.get("longitude").and_then(number_of)?;
    // A latitude of exactly 0 is the upstream placeholder for "unknown".
    if lat == 0.0 {
        return None;
    }

    let mut attributes = BTreeMap::new();
    if let Some(agency) = str_at(code_entry, "agencyCode") {
        attributes.insert("agencyCode".to_string(), agency);
    }
    if let Some(props) = source_info.get("siteProperty").and_then(Value::as_array) {
        for prop in props {
            if let (Some(name), Some(value)) = (str_at(prop, "name"), str_at(prop, "value")) {
                attributes.entry(name).or_insert(value);
            }
        }
    }

    Some(Site {
        id,
        name: str_at(source_info, "siteName").unwrap_or_default(),
        attributes,
        state: unit.to_string(),
        lat: round_to(lat, COORD_DECIMALS),
        lng: round_to(lng, COORD_DECIMALS),
    })
}

/// Reads a finite number that may be encoded as a JSON number or string.
fn number_of(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn str_at(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn first_code(codes: Option<&Value>) -> Option<String> {
    codes?.as_array()?.first().and_then(|c| str_at(c, "value"))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|q| q.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
