/// Derived statistics and spatial organization for harvested readings.
///
/// Submodules:
/// - `trend`    : rising/falling/stable classification per site.
/// - `grid`     : deterministic coordinate → cell-key quantization.
/// - `staleness`: timestamp parsing and age checks with an injected clock.

pub mod grid;
pub mod staleness;
pub mod trend;
