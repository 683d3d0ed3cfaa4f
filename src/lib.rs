//! Inbox triage: classify inbound messages and draft replies for the actionable ones.

pub mod classifier;
pub mod config;
pub mod error;
pub mod llm;
pub mod loader;
pub mod pipeline;
pub mod routes;
pub mod store;
