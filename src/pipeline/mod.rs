//! Triage-and-draft pipeline.
//!
//! Loaded messages flow through:
//! 1. `TriagePipeline::triage_all()`: one classifier call for the whole batch
//! 2. `DraftOrchestrator::pregenerate_all()`: drafts for actionable messages,
//!    in sequential fixed-size batches
//! 3. `DraftOrchestrator::request_draft()`: on-demand draft for one message
//!
//! All state lives in the `MessageStore`; both stages only write through it.

pub mod drafts;
pub mod triage;
pub mod types;
