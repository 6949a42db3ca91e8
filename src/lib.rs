//! Time-budgeted, self-chaining harvester for USGS NWIS water data.
//!
//! Each invocation ("link") works through as many state codes as fit in its
//! time budget, merges what it got into a spatially indexed snapshot, and
//! hands the rest of the universe plus any failures to the next link.

pub mod analysis;
pub mod config;
pub mod harvest;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod params;
pub mod pipeline;
pub mod store;
pub mod units;
