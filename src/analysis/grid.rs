//! Spatial grid indexing.
//!
//! Every site, observation and trend is bucketed by the same pure function,
//! so records sharing a location always land in the same cell no matter
//! which kind of record created the cell. Each axis is quantized on its own
//! to the nearest multiple of a fixed cell width; there is no adaptive
//! clustering.

/// Default cell width in degrees.
pub const DEFAULT_CELL_DEG: f64 = 0.5;

/// Narrowest cell width the configuration accepts.
pub const MIN_CELL_DEG: f64 = 1e-6;

/// Maps a coordinate pair to its grid key, e.g. `"40.50_-89.50"`.
///
/// Keys carry two decimals, or more when the cell is narrower than 0.01
/// degrees, so that neighbouring cells never print the same key.
pub fn grid_key(lat: f64, lng: f64, cell_deg: f64) -> String {
    let places = key_decimals(cell_deg);
    format!(
        "{:.*}_{:.*}",
        places,
        quantize(lat, cell_deg),
        places,
        quantize(lng, cell_deg)
    )
}

/// Decimal places needed to tell cells `cell_deg` apart, never fewer than 2.
fn key_decimals(cell_deg: f64) -> usize {
    let needed = (-cell_deg.log10() - 1e-9).ceil();
    if needed.is_finite() { needed.clamp(2.0, 12.0) as usize } else { 2 }
}

fn quantize(value: f64, cell_deg: f64) -> f64 {
    // Adding 0.0 turns -0.0 into 0.0 so both sides of the equator/meridian
    // share one key.
    (value / cell_deg).round() * cell_deg + 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearby_points_share_a_cell() {
        assert_eq!(grid_key(40.56145, -89.9956, 0.5), "40.50_-90.00");
        assert_eq!(grid_key(40.7, -89.8, 0.5), "40.50_-90.00");
    }

    #[test]
    fn test_cell_boundaries_round_to_nearest() {
        assert_eq!(grid_key(40.74, -89.0, 0.5), "40.50_-89.00");
        assert_eq!(grid_key(40.76, -89.0, 0.5), "41.00_-89.00");
    }

    #[test]
    fn test_negative_zero_is_normalized() {
        assert_eq!(grid_key(-0.1, 0.2, 0.5), "0.00_0.00");
    }

    #[test]
    fn test_key_is_deterministic_across_cell_widths() {
        assert_eq!(grid_key(38.98, -76.48, 0.1), grid_key(38.98, -76.48, 0.1));
        assert_eq!(grid_key(38.98, -76.48, 0.25), "39.00_-76.50");
    }

    #[test]
    fn test_fine_cells_get_distinct_keys() {
        let a = grid_key(40.001, -89.0, 0.001);
        let b = grid_key(40.004, -89.0, 0.001);
        assert_eq!(a, "40.001_-89.000");
        assert_eq!(b, "40.004_-89.000");
        assert_ne!(a, b);

        // 0.003 is still finer than two decimals can separate.
        assert_ne!(grid_key(40.0, -89.0, 0.003), grid_key(40.003, -89.0, 0.003));
    }

    #[test]
    fn test_key_decimals_by_cell_width() {
        assert_eq!(key_decimals(5.0), 2);
        assert_eq!(key_decimals(0.5), 2);
        assert_eq!(key_decimals(0.01), 2);
        assert_eq!(key_decimals(0.005), 3);
        assert_eq!(key_decimals(0.001), 3);
        assert_eq!(key_decimals(0.0001), 4);
    }
}
