//! Context document assembly.
//!
//! Folds the graph, the partition, and the inferrer's verdict into the
//! structured document handed to downstream consumers. Empty sections
//! are omitted from serialization. When the graph is too small or the
//! inferrer cold-started, only the active-task header and the trajectory
//! are populated.

use crate::config::EngineConfig;
use crate::graph::KnowledgeGraph;
use crate::infer::{Inference, EXPLORING_LABEL};
use crate::partition::TaskPartition;
use crate::types::{NodeRecord, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Minimum page count for the cluster/tasks/bridges sections.
const MIN_PAGES_FOR_DETAIL: usize = 3;

/// Keyword labels listed for the active task.
const MAX_TASK_KEYWORDS: usize = 8;

/// Topic labels listed per trajectory page.
const MAX_PAGE_TOPICS: usize = 8;

/// Pages listed for the active cluster.
const MAX_CLUSTER_PAGES: usize = 6;

/// Keyword relationships listed for the active cluster.
const MAX_CLUSTER_RELATIONSHIPS: usize = 10;

/// Bridge keywords listed.
const MAX_BRIDGES: usize = 10;

/// The assembled context document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub active_task: ActiveTaskSection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trajectory: Vec<TrajectoryPage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterSection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_tasks: Vec<TaskProbability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bridges: Vec<BridgeKeyword>,
    pub generated_at: Timestamp,
}

/// Section 1: what the user appears to be doing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTaskSection {
    pub label: String,
    pub confidence: f64,
    pub entropy: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

/// Section 2: one recently visited page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPage {
    pub title: String,
    pub url: String,
    pub summary: String,
    /// Full snippet, only for the most recent pages.
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    pub age_seconds: f64,
}

/// Section 3: the active community in detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSection {
    pub page_count: usize,
    pub keyword_count: usize,
    pub internal_edge_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_pages: Vec<KeyPage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_relationships: Vec<KeywordRelation>,
}

/// A notable page of the active cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPage {
    pub title: String,
    pub url: String,
    pub visit_count: u64,
    pub summary: String,
    pub snippet: Option<String>,
}

/// A keyword co-occurrence inside the active cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRelation {
    pub source: String,
    pub target: String,
    pub weight: f64,
}

/// Section 4: one task with its posterior probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProbability {
    pub label: String,
    pub probability: f64,
}

/// Section 5: a keyword connecting several tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeKeyword {
    pub keyword: String,
    pub communities: Vec<String>,
}

/// Assemble the context document for the current graph state.
pub fn enrich(
    graph: &KnowledgeGraph,
    partition: &TaskPartition,
    inference: &Inference,
    now: Timestamp,
    config: &EngineConfig,
) -> ContextDocument {
    let degraded = graph.page_count() < MIN_PAGES_FOR_DETAIL || inference.cold_start;
    let active = if degraded {
        None
    } else {
        inference.active_community().and_then(|id| partition.community(id))
    };

    let active_task = match active {
        Some(community) => ActiveTaskSection {
            label: inference.active_task.clone(),
            confidence: inference.confidence,
            entropy: inference.entropy,
            keywords: top_keywords(graph, &community.members, MAX_TASK_KEYWORDS),
        },
        None => ActiveTaskSection {
            label: EXPLORING_LABEL.to_string(),
            confidence: 0.0,
            entropy: inference.entropy,
            keywords: Vec::new(),
        },
    };

    let trajectory = build_trajectory(graph, now, config);

    let (cluster, all_tasks, bridges) = match active {
        Some(community) => (
            Some(build_cluster(graph, community.member_set(), config)),
            build_all_tasks(inference),
            build_bridges(graph, partition),
        ),
        None => (None, Vec::new(), Vec::new()),
    };

    ContextDocument {
        active_task,
        trajectory,
        cluster,
        all_tasks,
        bridges,
        generated_at: now,
    }
}

/// Member keywords by weighted degree descending, label ties ascending.
fn top_keywords(graph: &KnowledgeGraph, members: &[String], limit: usize) -> Vec<String> {
    let mut keywords: Vec<(f64, String)> = members
        .iter()
        .filter_map(|id| {
            let keyword = graph.node(id)?.as_keyword()?;
            Some((graph.weighted_degree(id), keyword.label.clone()))
        })
        .collect();
    keywords.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    keywords.truncate(limit);
    keywords.into_iter().map(|(_, label)| label).collect()
}

fn build_trajectory(
    graph: &KnowledgeGraph,
    now: Timestamp,
    config: &EngineConfig,
) -> Vec<TrajectoryPage> {
    graph
        .recent_pages(config.max_trajectory_pages)
        .into_iter()
        .filter_map(|record| record.as_page().map(|page| (record, page)))
        .enumerate()
        .map(|(rank, (record, page))| {
            let snippet = (rank < config.max_deep_content_pages && !page.content_snippet.is_empty())
                .then(|| page.content_snippet.clone());
            TrajectoryPage {
                title: page.title.clone(),
                url: page.url.clone(),
                summary: page.summary.clone(),
                snippet,
                topics: page_topics(graph, record, MAX_PAGE_TOPICS),
                age_seconds: (now - page.last_visited).max(0.0),
            }
        })
        .collect()
}

/// Neighbor keyword labels by edge weight descending, label ties ascending.
fn page_topics(graph: &KnowledgeGraph, record: &NodeRecord, limit: usize) -> Vec<String> {
    let mut topics: Vec<(f64, String)> = graph
        .neighbors(&record.id)
        .into_iter()
        .filter_map(|(neighbor_id, weight)| {
            let keyword = graph.node(&neighbor_id)?.as_keyword()?;
            Some((weight, keyword.label.clone()))
        })
        .collect();
    topics.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    topics.truncate(limit);
    topics.into_iter().map(|(_, label)| label).collect()
}

fn build_cluster(
    graph: &KnowledgeGraph,
    members: HashSet<String>,
    config: &EngineConfig,
) -> ClusterSection {
    let mut pages: Vec<(&str, &crate::types::PageData)> = members
        .iter()
        .filter_map(|id| {
            let record = graph.node(id)?;
            record.as_page().map(|page| (record.id.as_str(), page))
        })
        .collect();
    let page_count = pages.len();
    let keyword_count = members.len() - page_count;

    // Most-visited first, then most recent, then id.
    pages.sort_by(|a, b| {
        b.1.visit_count
            .cmp(&a.1.visit_count)
            .then_with(|| {
                b.1.last_visited
                    .partial_cmp(&a.1.last_visited)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.0.cmp(b.0))
    });
    pages.truncate(MAX_CLUSTER_PAGES);

    let key_pages = pages
        .into_iter()
        .enumerate()
        .map(|(rank, (_, page))| {
            let snippet = (rank < config.max_deep_content_pages && !page.content_snippet.is_empty())
                .then(|| page.content_snippet.clone());
            KeyPage {
                title: page.title.clone(),
                url: page.url.clone(),
                visit_count: page.visit_count,
                summary: page.summary.clone(),
                snippet,
            }
        })
        .collect();

    let key_relationships = graph
        .keyword_links_within(&members, MAX_CLUSTER_RELATIONSHIPS)
        .into_iter()
        .map(|link| KeywordRelation {
            source: keyword_label(graph, &link.source),
            target: keyword_label(graph, &link.target),
            weight: link.weight,
        })
        .collect();

    ClusterSection {
        page_count,
        keyword_count,
        internal_edge_count: graph.internal_edge_count(&members),
        key_pages,
        key_relationships,
    }
}

fn build_all_tasks(inference: &Inference) -> Vec<TaskProbability> {
    let mut tasks: Vec<TaskProbability> = inference
        .posterior
        .iter()
        .map(|row| TaskProbability {
            label: row.label.clone(),
            probability: row.probability,
        })
        .collect();
    tasks.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.label.cmp(&b.label))
    });
    tasks
}

fn build_bridges(graph: &KnowledgeGraph, partition: &TaskPartition) -> Vec<BridgeKeyword> {
    graph
        .bridging_keywords(&partition.assignments)
        .into_iter()
        .take(MAX_BRIDGES)
        .map(|(id, communities)| BridgeKeyword {
            keyword: keyword_label(graph, &id),
            communities: communities
                .into_iter()
                .filter_map(|c| partition.label_of(c).map(str::to_string))
                .collect(),
        })
        .collect()
}

fn keyword_label(graph: &KnowledgeGraph, id: &str) -> String {
    graph
        .node(id)
        .and_then(|record| record.as_keyword())
        .map(|keyword| keyword.label.clone())
        .unwrap_or_else(|| id.trim_start_matches("kw:").to_string())
}
