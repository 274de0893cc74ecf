//! Engine configuration.
//!
//! Every tunable recognized by the engine, with the defaults the rest of
//! the crate assumes. Loaded from a TOML file by the web binary; all
//! fields default so a partial file is fine.

use crate::error::{ConfigError, EngineError, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Tunable parameters of the context engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Edge decay rate lambda, per hour.
    pub decay_rate: f64,
    /// Louvain resolution gamma.
    pub community_resolution: f64,
    /// Seed for the partitioner's pseudo-random ordering.
    pub community_seed: u64,
    /// Laplace smoothing constant alpha.
    pub laplace_smoothing: f64,
    /// Node cap enforced after every visit.
    pub max_graph_nodes: usize,
    /// Edges below this decayed weight are pruned.
    pub edge_prune_threshold: f64,
    /// Posterior confidence below which the inferrer reports "Exploring".
    pub confidence_cold_start: f64,
    /// Keywords kept per page visit.
    pub max_keywords_per_page: usize,
    /// Page body chars considered by extraction.
    pub max_content_length: usize,
    /// Snippet chars stored per page.
    pub max_context_snippet_length: usize,
    /// Summary chars stored per page.
    pub max_summary_length: usize,
    /// Pages listed in the context trajectory.
    pub max_trajectory_pages: usize,
    /// Trajectory pages that carry a full snippet.
    pub max_deep_content_pages: usize,
    /// Same-URL visits inside this window are rejected.
    pub debounce_ms: u64,
    /// Minimum gap between two processed visits.
    pub min_interval_ms: u64,
    /// Admit `file:` URLs; rejected like browser-internal schemes by
    /// default.
    pub allow_file_urls: bool,
    /// Snapshot file location.
    pub snapshot_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.01,
            community_resolution: 1.0,
            community_seed: 42,
            laplace_smoothing: 0.1,
            max_graph_nodes: 500,
            edge_prune_threshold: 0.01,
            confidence_cold_start: 0.25,
            max_keywords_per_page: 12,
            max_content_length: 8000,
            max_context_snippet_length: 3000,
            max_summary_length: 1500,
            max_trajectory_pages: 8,
            max_deep_content_pages: 4,
            debounce_ms: 5000,
            min_interval_ms: 3000,
            allow_file_urls: false,
            snapshot_path: PathBuf::from("graph.bin"),
        }
    }
}

impl EngineConfig {
    /// Check that every field is inside its sane range.
    pub fn validate(&self) -> Result<()> {
        if !self.decay_rate.is_finite() || self.decay_rate < 0.0 || self.decay_rate > 10.0 {
            return Err(EngineError::config_out_of_range(
                "decay_rate",
                0.0,
                10.0,
                self.decay_rate,
            ));
        }
        if !self.community_resolution.is_finite() || self.community_resolution <= 0.0 {
            return Err(EngineError::config_out_of_range(
                "community_resolution",
                f64::MIN_POSITIVE,
                f64::MAX,
                self.community_resolution,
            ));
        }
        if !self.laplace_smoothing.is_finite() || self.laplace_smoothing <= 0.0 {
            return Err(EngineError::config_out_of_range(
                "laplace_smoothing",
                f64::MIN_POSITIVE,
                f64::MAX,
                self.laplace_smoothing,
            ));
        }
        if self.max_graph_nodes == 0 {
            return Err(EngineError::config_out_of_range(
                "max_graph_nodes",
                1.0,
                f64::MAX,
                0.0,
            ));
        }
        if !self.edge_prune_threshold.is_finite() || self.edge_prune_threshold <= 0.0 {
            return Err(EngineError::config_out_of_range(
                "edge_prune_threshold",
                f64::MIN_POSITIVE,
                f64::MAX,
                self.edge_prune_threshold,
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_cold_start) {
            return Err(EngineError::config_out_of_range(
                "confidence_cold_start",
                0.0,
                1.0,
                self.confidence_cold_start,
            ));
        }
        if self.max_keywords_per_page == 0 {
            return Err(EngineError::config_out_of_range(
                "max_keywords_per_page",
                1.0,
                f64::MAX,
                0.0,
            ));
        }
        if self.snapshot_path.as_os_str().is_empty() {
            return Err(EngineError::Config(ConfigError::InvalidValue {
                field: "snapshot_path".into(),
                value: String::new(),
                reason: "must not be empty".into(),
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range() {
        let mut config = EngineConfig::default();
        config.decay_rate = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.confidence_cold_start = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.max_graph_nodes = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.snapshot_path = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
