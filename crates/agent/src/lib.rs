//! The Maestro agent execution loop.
//!
//! Given a task and its identifying context, the loop repeatedly asks the
//! model for the next step, dispatches requested tools (injecting
//! authoritative identifiers), records results into the transcript and
//! execution log, and rendezvous with independently-running sub-agents
//! through the shared status log — suspending itself in a bounded wait
//! state when externally-produced information is pending.

pub mod dedupe;
pub mod planner;
pub mod policy;
pub mod prompt;
pub mod runner;

pub use dedupe::{InboundMessage, ProcessedMessages};
pub use policy::{CompletionAssessment, CompletionPolicy, Decision, RouteHint};
pub use runner::TaskRunner;
