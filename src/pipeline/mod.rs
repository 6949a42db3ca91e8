//! The self-chaining link: queue, schedule, merge, continue.

pub mod continuation;
pub mod merge;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;

pub use continuation::{Continuation, ContinuationDecision, Continuer, HttpContinuer, LocalContinuer};
pub use orchestrator::{Harvester, LinkRequest, LinkResponse, LinkSettings, LinkStatus};
pub use scheduler::UnitResult;
