/// Per-unit harvesting.
///
/// Submodules:
/// - `worker`: concurrent feed fan-out, union, deduplication, per-site
///   retention cap, and trend derivation for one work unit.

pub mod worker;

pub use worker::{FeedWorker, UnitFetcher, UnitHarvest};
