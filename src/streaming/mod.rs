//! Viewer-driven streaming: diffs the chunks in view against the store,
//! loads and unloads the difference and keeps LOD levels current.

mod orchestrator;

pub use orchestrator::{StreamingOrchestrator, StreamingReport};
