//! The external keyword extractor capability.
//!
//! An on-device model may supply better keywords than the heuristic
//! extractor. Any error or empty answer means "not available" and the
//! pipeline falls back to the heuristic; the call is bounded by a soft
//! timeout in the orchestrator.

use async_trait::async_trait;
use std::time::Duration;

/// Soft timeout for one external extraction call.
pub const EXTRACTION_TIMEOUT: Duration = Duration::from_secs(3);

/// External keyword source. A `None` result means unavailable.
#[async_trait]
pub trait KeywordExtractor: Send + Sync {
    async fn extract(&self, title: &str, text: &str) -> Option<Vec<String>>;
}

/// Extractor that is never available; forces the heuristic path.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullExtractor;

#[async_trait]
impl KeywordExtractor for NullExtractor {
    async fn extract(&self, _title: &str, _text: &str) -> Option<Vec<String>> {
        None
    }
}
