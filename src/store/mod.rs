//! In-memory message state shared by the pipeline and the query surface.

pub mod messages;

pub use messages::{GenerationPermit, MessageStore, StatusCounts};
