//! Work queue for one chain link.

use std::collections::HashSet;

use crate::model::WorkUnit;

/// Builds the ordered queue for a link: the remaining slice of the universe
/// starting at `offset`, then the previous link's failures that are not
/// already in that slice. Duplicates among the failures are dropped too.
pub fn build_queue(universe: &[String], offset: usize, failed: &[String]) -> Vec<WorkUnit> {
    let remaining = universe.get(offset..).unwrap_or_default();

    let mut seen: HashSet<&str> = remaining.iter().map(String::as_str).collect();
    let mut queue: Vec<WorkUnit> = remaining.iter().map(WorkUnit::primary).collect();

    for unit in failed {
        if seen.insert(unit.as_str()) {
            queue.push(WorkUnit::retry(unit));
        }
    }
    queue
}
