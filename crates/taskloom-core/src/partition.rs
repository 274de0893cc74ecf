//! Labeled task partition over the knowledge graph.
//!
//! Wraps a Louvain run: maps member indices back to node ids, labels
//! each community after its dominant keyword, and renumbers communities
//! deterministically so downstream consumers can hold on to ids.

use crate::graph::KnowledgeGraph;
use crate::louvain::{louvain_partition, LouvainOptions};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Label for a community that contains no keyword nodes.
pub const PAGES_ONLY_LABEL: &str = "(pages)";

/// One detected community.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskCommunity {
    pub id: usize,
    /// The member keyword with the highest weighted degree in the
    /// original graph; `"(pages)"` when the community has no keywords.
    pub label: String,
    /// Member node ids, sorted.
    pub members: Vec<String>,
}

impl TaskCommunity {
    pub fn member_set(&self) -> HashSet<String> {
        self.members.iter().cloned().collect()
    }
}

/// A full partition of the graph, with per-node assignments.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct TaskPartition {
    /// Communities ordered by their smallest member id.
    pub communities: Vec<TaskCommunity>,
    /// Node id to community id.
    pub assignments: HashMap<String, usize>,
    pub modularity: f64,
}

impl TaskPartition {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.communities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.communities.is_empty()
    }

    pub fn community(&self, id: usize) -> Option<&TaskCommunity> {
        self.communities.get(id)
    }

    pub fn label_of(&self, id: usize) -> Option<&str> {
        self.communities.get(id).map(|c| c.label.as_str())
    }

    /// Partition the graph's current state.
    ///
    /// Node ordering fed to Louvain is the lexicographic id order, so a
    /// fixed seed yields a bit-identical partition for an identical
    /// graph.
    pub fn detect(graph: &KnowledgeGraph, resolution: f64, seed: u64) -> Self {
        if graph.is_empty() {
            return Self::empty();
        }

        let (ids, edges) = graph.louvain_input();
        let result = louvain_partition(
            ids.len(),
            &edges,
            &LouvainOptions { resolution, seed },
        );

        let mut communities: Vec<TaskCommunity> = result
            .communities
            .into_iter()
            .map(|members| {
                let members: Vec<String> =
                    members.into_iter().map(|i| ids[i].clone()).collect();
                TaskCommunity {
                    id: 0,
                    label: resolve_label(graph, &members),
                    members,
                }
            })
            .collect();

        // Louvain already sorts members; order communities by smallest
        // member id and renumber.
        communities.sort_by(|a, b| a.members[0].cmp(&b.members[0]));
        let mut assignments = HashMap::new();
        for (id, community) in communities.iter_mut().enumerate() {
            community.id = id;
            for member in &community.members {
                assignments.insert(member.clone(), id);
            }
        }

        Self {
            communities,
            assignments,
            modularity: result.modularity,
        }
    }
}

/// Highest weighted-degree keyword wins; ties go to the lexicographically
/// greater label.
fn resolve_label(graph: &KnowledgeGraph, members: &[String]) -> String {
    members
        .iter()
        .filter_map(|id| {
            let keyword = graph.node(id)?.as_keyword()?;
            Some((graph.weighted_degree(id), keyword.label.clone()))
        })
        .max_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        })
        .map(|(_, label)| label)
        .unwrap_or_else(|| PAGES_ONLY_LABEL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{keyword_id, page_id, PageIngest};

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

    fn two_topic_graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new(&EngineConfig::default());
        graph
            .ingest(&visit("u1", "React Docs", 1000.0), &kws(&["react", "hooks"]))
            .unwrap();
        graph
            .ingest(&visit("u1", "React Docs", 1001.0), &kws(&["react", "hooks"]))
            .unwrap();
        graph
            .ingest(&visit("u2", "FastAPI", 1002.0), &kws(&["python", "fastapi"]))
            .unwrap();
        graph
    }

    #[test]
    fn empty_graph_empty_partition() {
        let graph = KnowledgeGraph::new(&EngineConfig::default());
        let partition = TaskPartition::detect(&graph, 1.0, 42);
        assert!(partition.is_empty());
    }

    #[test]
    fn two_topics_two_communities() {
        let graph = two_topic_graph();
        let partition = TaskPartition::detect(&graph, 1.0, 42);
        assert_eq!(partition.len(), 2);

        let labels: Vec<&str> = partition
            .communities
            .iter()
            .map(|c| c.label.as_str())
            .collect();
        // Weighted degrees tie inside each community; the greater label wins.
        assert_eq!(labels, vec!["python", "react"]);

        let react = partition.assignments[&keyword_id("react")];
        assert_eq!(partition.assignments[&keyword_id("hooks")], react);
        assert_eq!(partition.assignments[&page_id("u1")], react);
        let python = partition.assignments[&keyword_id("python")];
        assert_ne!(react, python);
        assert_eq!(partition.assignments[&keyword_id("fastapi")], python);
    }

    #[test]
    fn partition_is_deterministic() {
        let a = TaskPartition::detect(&two_topic_graph(), 1.0, 42);
        let b = TaskPartition::detect(&two_topic_graph(), 1.0, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn keyword_free_community_gets_pages_label() {
        let graph = KnowledgeGraph::new(&EngineConfig::default());
        let label = resolve_label(&graph, &[page_id("u1")]);
        assert_eq!(label, PAGES_ONLY_LABEL);
    }

    #[test]
    fn single_visit_is_one_community() {
        let mut graph = KnowledgeGraph::new(&EngineConfig::default());
        graph
            .ingest(&visit("u1", "React", 1000.0), &kws(&["react", "hooks"]))
            .unwrap();
        let partition = TaskPartition::detect(&graph, 1.0, 42);
        assert_eq!(partition.len(), 1);
        assert_eq!(partition.communities[0].members.len(), 3);
        assert_eq!(partition.communities[0].label, "react");
    }
}
