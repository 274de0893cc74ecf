//! taskloom-engine: orchestration around the context engine core.
//!
//! Drives the per-visit pipeline (extract, ingest, partition, infer,
//! enrich, publish) strictly serially, funnels all graph mutation
//! through a single worker, and exposes the engine's capability API.
//! Consumes three capabilities: a wall clock, an optional external
//! keyword extractor, and a byte-level snapshot store.

pub mod clock;
pub mod engine;
pub mod extractor;
mod pipeline;
pub mod queue;
pub mod store;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{ChatContext, ContextEngine, EngineBuilder, EngineStats, GraphView};
pub use extractor::KeywordExtractor;
pub use store::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
