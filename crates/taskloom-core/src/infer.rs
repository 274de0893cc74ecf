//! Bayesian task inference.
//!
//! Given the partition and the current visit's keywords as evidence,
//! computes a posterior over communities. The prior favors communities
//! with heavier internal edges; the likelihood measures how strongly the
//! evidence keywords overlap each community. Laplace smoothing keeps
//! every term positive, and a cold-start guard replaces low-confidence
//! answers with a synthetic "Exploring" task.

use crate::graph::KnowledgeGraph;
use crate::partition::TaskPartition;
use crate::types::{keyword_id, normalize_term};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Active-task label emitted when evidence is too weak to commit.
pub const EXPLORING_LABEL: &str = "Exploring";

/// Direct-membership contribution of an evidence keyword to its own
/// community's overlap score.
const MEMBERSHIP_SCORE: f64 = 3.0;

/// One row of the posterior distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPosterior {
    pub community: usize,
    pub label: String,
    pub probability: f64,
}

/// The inferrer's verdict for one visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inference {
    /// Winning community label, or `"Exploring"` under the cold-start guard.
    pub active_task: String,
    /// Posterior probability of the winner; zero when cold-started.
    pub confidence: f64,
    /// Shannon entropy of the posterior, in bits.
    pub entropy: f64,
    /// Whether the cold-start guard replaced the verdict.
    pub cold_start: bool,
    /// Community id of the winner; `None` when cold-started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_community: Option<usize>,
    /// Full posterior, ordered by community id; preserved through the
    /// cold-start guard for telemetry.
    pub posterior: Vec<TaskPosterior>,
}

impl Inference {
    /// Synthetic verdict for a graph without usable structure.
    pub fn exploring() -> Self {
        Self {
            active_task: EXPLORING_LABEL.to_string(),
            confidence: 0.0,
            entropy: 0.0,
            cold_start: true,
            active_community: None,
            posterior: Vec::new(),
        }
    }

    /// Community id of the winner, unless cold-started.
    pub fn active_community(&self) -> Option<usize> {
        self.active_community
    }
}

/// Compute the posterior over communities for the given evidence keywords.
pub fn infer(
    graph: &KnowledgeGraph,
    partition: &TaskPartition,
    evidence: &[String],
    alpha: f64,
    cold_threshold: f64,
) -> Inference {
    if partition.is_empty() {
        return Inference::exploring();
    }
    let n = partition.len();

    // Prior: internal edge weight per community, smoothed.
    let internal: Vec<f64> = partition
        .communities
        .iter()
        .map(|c| graph.internal_edge_weight(&c.member_set()))
        .collect();
    let prior = normalize_smoothed(&internal, alpha);

    // Likelihood: evidence overlap per community, smoothed.
    let overlap = overlap_scores(graph, partition, evidence);
    let likelihood = normalize_smoothed(&overlap, alpha);

    // Posterior ∝ prior · likelihood.
    let unnormalized: Vec<f64> = prior
        .iter()
        .zip(&likelihood)
        .map(|(p, l)| p * l)
        .collect();
    let total: f64 = unnormalized.iter().sum();
    let posterior_probs: Vec<f64> = if total.is_finite() && total > 0.0 {
        unnormalized.iter().map(|u| u / total).collect()
    } else {
        vec![1.0 / n as f64; n]
    };

    let posterior: Vec<TaskPosterior> = partition
        .communities
        .iter()
        .zip(&posterior_probs)
        .map(|(community, &probability)| TaskPosterior {
            community: community.id,
            label: community.label.clone(),
            probability,
        })
        .collect();

    let entropy = shannon_entropy(&posterior_probs);

    // Argmax; probability ties go to the lexicographically smaller label.
    let winner = posterior
        .iter()
        .max_by(|a, b| {
            a.probability
                .partial_cmp(&b.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.label.cmp(&a.label))
        })
        .expect("posterior is non-empty");
    let confidence = winner.probability;

    if n < 2 || confidence < cold_threshold {
        return Inference {
            active_task: EXPLORING_LABEL.to_string(),
            confidence: 0.0,
            entropy,
            cold_start: true,
            active_community: None,
            posterior,
        };
    }

    Inference {
        active_task: winner.label.clone(),
        confidence,
        entropy,
        cold_start: false,
        active_community: Some(winner.community),
        posterior,
    }
}

/// Per-community evidence overlap: an evidence keyword contributes
/// [`MEMBERSHIP_SCORE`] to the community it belongs to and its edge
/// weight toward every other community its neighbors sit in. Keywords
/// absent from the graph contribute nothing.
fn overlap_scores(
    graph: &KnowledgeGraph,
    partition: &TaskPartition,
    evidence: &[String],
) -> Vec<f64> {
    let mut overlap = vec![0.0; partition.len()];
    let mut seen = HashSet::new();

    for raw in evidence {
        let term = normalize_term(raw);
        if term.is_empty() || !seen.insert(term.clone()) {
            continue;
        }
        let id = keyword_id(&term);
        if graph.node(&id).is_none() {
            continue;
        }

        let own = partition.assignments.get(&id).copied();
        if let Some(own) = own {
            overlap[own] += MEMBERSHIP_SCORE;
        }
        for (neighbor, weight) in graph.neighbors(&id) {
            if let Some(&c) = partition.assignments.get(&neighbor) {
                if Some(c) != own {
                    overlap[c] += weight;
                }
            }
        }
    }

    overlap
}

fn normalize_smoothed(values: &[f64], alpha: f64) -> Vec<f64> {
    let total: f64 = values.iter().map(|v| v + alpha).sum();
    if !total.is_finite() || total <= 0.0 {
        return vec![1.0 / values.len() as f64; values.len()];
    }
    values.iter().map(|v| (v + alpha) / total).collect()
}

/// Entropy in bits, with the 0·log0 = 0 convention.
fn shannon_entropy(probs: &[f64]) -> f64 {
    -probs
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| p * p.log2())
        .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::PageIngest;

    const ALPHA: f64 = 0.1;
    const COLD: f64 = 0.25;

    fn visit(url: &str, title: &str, ts: f64) -> PageIngest {
        PageIngest {
            url: url.to_string(),
            title: title.to_string(),
            summary: String::new(),
            content_snippet: String::new(),
            timestamp: ts,
        }
    }

    fn kws(terms: &[&str]) -> Vec<String> {
        terms.iter().map(|t| t.to_string()).collect()
    }

    fn two_topic_setup() -> (KnowledgeGraph, TaskPartition) {
        let mut graph = KnowledgeGraph::new(&EngineConfig::default());
        graph
            .ingest(&visit("u1", "React", 1000.0), &kws(&["react", "hooks"]))
            .unwrap();
        graph
            .ingest(&visit("u2", "FastAPI", 1001.0), &kws(&["python", "fastapi"]))
            .unwrap();
        let partition = TaskPartition::detect(&graph, 1.0, 42);
        assert_eq!(partition.len(), 2);
        (graph, partition)
    }

    fn assert_distribution(inference: &Inference) {
        let sum: f64 = inference.posterior.iter().map(|r| r.probability).sum();
        assert!((sum - 1.0).abs() < 1e-9, "posterior sums to {}", sum);
        for row in &inference.posterior {
            assert!((0.0..=1.0).contains(&row.probability));
        }
    }

    #[test]
    fn empty_partition_explores() {
        let graph = KnowledgeGraph::new(&EngineConfig::default());
        let inference = infer(&graph, &TaskPartition::empty(), &kws(&["rust"]), ALPHA, COLD);
        assert_eq!(inference.active_task, EXPLORING_LABEL);
        assert_eq!(inference.confidence, 0.0);
        assert!(inference.cold_start);
    }

    #[test]
    fn single_community_is_cold_start() {
        let mut graph = KnowledgeGraph::new(&EngineConfig::default());
        graph
            .ingest(&visit("u1", "React", 1000.0), &kws(&["react", "hooks"]))
            .unwrap();
        let partition = TaskPartition::detect(&graph, 1.0, 42);
        let inference = infer(&graph, &partition, &kws(&["react"]), ALPHA, COLD);

        assert_eq!(inference.active_task, EXPLORING_LABEL);
        assert_eq!(inference.confidence, 0.0);
        assert!(inference.cold_start);
        // Posterior preserved for telemetry.
        assert_eq!(inference.posterior.len(), 1);
        assert_distribution(&inference);
    }

    #[test]
    fn evidence_picks_matching_community() {
        let (graph, partition) = two_topic_setup();
        let inference = infer(&graph, &partition, &kws(&["python", "fastapi"]), ALPHA, COLD);

        assert!(!inference.cold_start);
        assert_eq!(inference.active_task, "python");
        assert!(inference.confidence > 0.5);
        assert_distribution(&inference);
    }

    #[test]
    fn unknown_evidence_falls_back_to_prior() {
        let (graph, partition) = two_topic_setup();
        let with_unknown = infer(&graph, &partition, &kws(&["quantum"]), ALPHA, COLD);
        let no_evidence = infer(&graph, &partition, &[], ALPHA, COLD);

        // Uniform likelihood either way: posterior equals prior.
        for (a, b) in with_unknown.posterior.iter().zip(&no_evidence.posterior) {
            assert!((a.probability - b.probability).abs() < 1e-12);
        }
        assert_distribution(&with_unknown);
    }

    #[test]
    fn entropy_peaks_on_uniform_posterior() {
        let (graph, partition) = two_topic_setup();
        let uniform = infer(&graph, &partition, &[], ALPHA, COLD);
        let peaked = infer(&graph, &partition, &kws(&["python", "fastapi"]), ALPHA, COLD);
        assert!(uniform.entropy > peaked.entropy);
        assert!(uniform.entropy <= 1.0 + 1e-9); // two communities: at most 1 bit
    }

    #[test]
    fn entropy_conventions() {
        assert_eq!(shannon_entropy(&[1.0, 0.0]), 0.0);
        assert!((shannon_entropy(&[0.5, 0.5]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn duplicate_evidence_counts_once() {
        let (graph, partition) = two_topic_setup();
        let once = infer(&graph, &partition, &kws(&["python"]), ALPHA, COLD);
        let thrice = infer(&graph, &partition, &kws(&["python", "Python", "python"]), ALPHA, COLD);
        for (a, b) in once.posterior.iter().zip(&thrice.posterior) {
            assert!((a.probability - b.probability).abs() < 1e-12);
        }
    }
}
