/// USGS parameter catalog.
///
/// Maps the five-digit NWIS parameter codes the harvester requests to short
/// keys used in logs, and identifies parameters measured on an inverted
/// scale (a larger reading means less water).

/// USGS parameter code for discharge (streamflow), in cubic feet per second.
pub const PARAM_DISCHARGE: &str = "00060";

/// USGS parameter code for gage height (stage), in feet.
pub const PARAM_GAGE_HEIGHT: &str = "00065";

/// USGS parameter code for groundwater depth below land surface, in feet.
pub const PARAM_DEPTH_TO_WATER: &str = "72019";

/// Known parameter codes and their short keys.
pub static PARAMETER_KEYS: &[(&str, &str)] = &[
    ("00300", "DO"),
    ("00010", "temperature"),
    ("00400", "pH"),
    ("63680", "turbidity"),
    ("00095", "conductivity"),
    (PARAM_DISCHARGE, "discharge"),
    (PARAM_GAGE_HEIGHT, "gage_height"),
    ("00480", "salinity"),
    (PARAM_DEPTH_TO_WATER, "depth_to_water"),
];

/// Returns the short key for a parameter code, or the code itself when it is
/// not in the catalog.
pub fn parameter_key(code: &str) -> &str {
    PARAMETER_KEYS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, key)| *key)
        .unwrap_or(code)
}

/// True when a larger raw value means a worse condition, so trend
/// classification has to flip the sign.
pub fn is_inverted_scale(code: &str, name: &str) -> bool {
    code == PARAM_DEPTH_TO_WATER || name.to_ascii_lowercase().contains("depth to water")
}
