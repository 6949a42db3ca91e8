/// Data ingestion from the USGS NWIS water services.
///
/// Submodules:
/// - `nwis` : URL construction, the rate-limited HTTP client, and the
///   `FeedSource` seam the worker fetches through.
/// - `parse`: tolerant WaterML-JSON parsing into sites and observations.

pub mod nwis;
pub mod parse;
