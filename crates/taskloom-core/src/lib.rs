//! taskloom-core: the browsing context engine's computational core.
//!
//! The engine watches a stream of page visits and maintains a weighted
//! heterogeneous graph linking pages to the topic keywords that describe
//! them. After every visit it partitions the graph into communities,
//! infers which latent task the user is working on, and assembles a
//! structured context document for downstream consumers.
//!
//! This crate holds the pure parts: the graph store with its decay and
//! pruning rules, the heuristic keyword extractor, the Louvain
//! partitioner, the Bayesian inferrer, the enricher, and the snapshot
//! codec. Orchestration and I/O live in `taskloom-engine`.

pub mod config;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod graph;
pub mod infer;
pub mod louvain;
pub mod partition;
pub mod snapshot;
pub mod types;

pub mod prelude {
    //! Convenience re-exports for engine consumers.
    pub use crate::config::EngineConfig;
    pub use crate::enrich::{enrich, ContextDocument};
    pub use crate::error::{EngineError, Result};
    pub use crate::extract::{extract, Extraction};
    pub use crate::graph::KnowledgeGraph;
    pub use crate::infer::{infer, Inference};
    pub use crate::partition::TaskPartition;
    pub use crate::types::{keyword_id, page_id, PageIngest, PageVisit};
}
