//! The knowledge graph store.
//!
//! A heterogeneous undirected graph of page and keyword nodes backed by
//! petgraph's `StableGraph`, with a side table mapping the external
//! string ids to node indices for O(1) lookup. `StableGraph` keeps
//! indices valid across pruning, which removes nodes.
//!
//! All mutation funnels through [`KnowledgeGraph::ingest`]; decay and
//! cap enforcement run as part of every ingest so the bounds in the
//! pruning rules hold after every accepted visit. Iteration orders that
//! reach external output are derived from the lexicographic id order.

use crate::config::EngineConfig;
use crate::error::{EngineError, InvariantError, Result, ValidationError};
use crate::types::{
    keyword_id, normalize_term, page_id, EdgeRecord, KeywordData, NodeKind, NodeRecord, PageData,
    PageIngest, Timestamp, MAX_PAGE_REFS,
};
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Undirected;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Tolerance for floating-point invariant comparisons.
const WEIGHT_EPSILON: f64 = 1e-9;

/// What a single ingest did to the graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReceipt {
    pub nodes_added: usize,
    pub edges_added: usize,
    pub edges_reinforced: usize,
    pub edges_pruned: usize,
    pub nodes_pruned: usize,
}

/// A keyword-keyword link reported to the enricher.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeywordLink {
    pub source: String,
    pub target: String,
    pub weight: f64,
}

/// The engine's single shared mutable structure.
///
/// `Clone` is cheap at the enforced node cap, so writers stage a copy,
/// mutate it, and commit by swapping it in.
#[derive(Debug, Clone)]
pub struct KnowledgeGraph {
    graph: StableGraph<NodeRecord, EdgeRecord, Undirected>,
    index: HashMap<String, NodeIndex>,
    decay_rate: f64,
    prune_threshold: f64,
    max_nodes: usize,
}

impl KnowledgeGraph {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            graph: StableGraph::default(),
            index: HashMap::new(),
            decay_rate: config.decay_rate,
            prune_threshold: config.edge_prune_threshold,
            max_nodes: config.max_graph_nodes,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn page_count(&self) -> usize {
        self.graph.node_weights().filter(|n| n.is_page()).count()
    }

    /// Drop every node and edge.
    pub fn clear(&mut self) {
        self.graph.clear();
        self.index.clear();
    }

    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        self.index.get(id).map(|idx| &self.graph[*idx])
    }

    /// All node records, ordered by id.
    pub fn nodes(&self) -> Vec<&NodeRecord> {
        let mut nodes: Vec<&NodeRecord> = self.graph.node_weights().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// All edges as `(source_id, target_id, record)` with `source < target`,
    /// ordered by that pair.
    pub fn edges(&self) -> Vec<(&str, &str, &EdgeRecord)> {
        let mut edges: Vec<(&str, &str, &EdgeRecord)> = self
            .graph
            .edge_indices()
            .map(|idx| {
                let (a, b) = self.graph.edge_endpoints(idx).expect("edge has endpoints");
                let (a_id, b_id) = (self.graph[a].id.as_str(), self.graph[b].id.as_str());
                let (source, target) = if a_id <= b_id { (a_id, b_id) } else { (b_id, a_id) };
                (source, target, &self.graph[idx])
            })
            .collect();
        edges.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(b.1)));
        edges
    }

    /// Atomically apply a visit: upsert the page, the keywords, and the
    /// co-occurrence edges, then run the decay sweep and cap enforcement.
    ///
    /// Keywords are deduplicated (order-preserving) before any upsert, so
    /// a term repeated within one visit counts once.
    pub fn ingest(&mut self, page: &PageIngest, keywords: &[String]) -> Result<IngestReceipt> {
        if page.url.trim().is_empty() {
            return Err(EngineError::empty_url());
        }
        if !page.timestamp.is_finite() {
            return Err(EngineError::bad_timestamp(page.timestamp));
        }
        let mut terms: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for raw in keywords {
            let term = normalize_term(raw);
            if term.is_empty() {
                return Err(EngineError::Validation(ValidationError::EmptyKeyword));
            }
            if seen.insert(term.clone()) {
                terms.push(term);
            }
        }

        let now = page.timestamp;
        let mut receipt = IngestReceipt::default();

        let page_idx = self.upsert_page(page, &mut receipt);
        let keyword_idxs: Vec<NodeIndex> = terms
            .iter()
            .map(|term| self.upsert_keyword(term, &page.url, now, &mut receipt))
            .collect();

        for &kw_idx in &keyword_idxs {
            self.upsert_edge(page_idx, kw_idx, now, &mut receipt);
        }
        for (i, &a) in keyword_idxs.iter().enumerate() {
            for &b in &keyword_idxs[i + 1..] {
                self.upsert_edge(a, b, now, &mut receipt);
            }
        }

        let (edges_pruned, orphans) = self.decay_sweep(now);
        receipt.edges_pruned += edges_pruned;
        receipt.nodes_pruned += orphans;
        receipt.nodes_pruned += self.enforce_cap(now);

        Ok(receipt)
    }

    fn upsert_page(&mut self, page: &PageIngest, receipt: &mut IngestReceipt) -> NodeIndex {
        let id = page_id(&page.url);
        if let Some(&idx) = self.index.get(&id) {
            if let NodeKind::Page(data) = &mut self.graph[idx].kind {
                data.visit_count += 1;
                data.last_visited = page.timestamp;
                if !page.title.is_empty() {
                    data.title = page.title.clone();
                }
                if !page.summary.is_empty() {
                    data.summary = page.summary.clone();
                }
                if !page.content_snippet.is_empty() {
                    data.content_snippet = page.content_snippet.clone();
                }
            }
            return idx;
        }

        let record = NodeRecord {
            id: id.clone(),
            kind: NodeKind::Page(PageData {
                url: page.url.clone(),
                title: page.title.clone(),
                summary: page.summary.clone(),
                content_snippet: page.content_snippet.clone(),
                visit_count: 1,
                first_visited: page.timestamp,
                last_visited: page.timestamp,
            }),
        };
        let idx = self.graph.add_node(record);
        self.index.insert(id, idx);
        receipt.nodes_added += 1;
        idx
    }

    fn upsert_keyword(
        &mut self,
        term: &str,
        url: &str,
        now: Timestamp,
        receipt: &mut IngestReceipt,
    ) -> NodeIndex {
        let id = keyword_id(term);
        if let Some(&idx) = self.index.get(&id) {
            if let NodeKind::Keyword(data) = &mut self.graph[idx].kind {
                data.frequency += 1;
                data.last_seen = now;
                data.push_page_ref(url);
            }
            return idx;
        }

        let record = NodeRecord {
            id: id.clone(),
            kind: NodeKind::Keyword(KeywordData {
                label: term.to_string(),
                frequency: 1,
                page_refs: vec![url.to_string()],
                first_seen: now,
                last_seen: now,
            }),
        };
        let idx = self.graph.add_node(record);
        self.index.insert(id, idx);
        receipt.nodes_added += 1;
        idx
    }

    fn upsert_edge(
        &mut self,
        a: NodeIndex,
        b: NodeIndex,
        now: Timestamp,
        receipt: &mut IngestReceipt,
    ) {
        if a == b {
            return;
        }
        if let Some(edge_idx) = self.graph.find_edge(a, b) {
            self.graph[edge_idx].reinforce(now);
            receipt.edges_reinforced += 1;
        } else {
            self.graph.add_edge(a, b, EdgeRecord::new(now));
            receipt.edges_added += 1;
        }
    }

    /// Recompute every decayed weight as `base * exp(-lambda * hours_idle)`,
    /// drop edges below the prune threshold, then drop orphaned nodes.
    /// Returns `(edges_removed, nodes_removed)`.
    pub fn decay_sweep(&mut self, now: Timestamp) -> (usize, usize) {
        let edge_idxs: Vec<_> = self.graph.edge_indices().collect();
        let mut stale = Vec::new();
        for idx in edge_idxs {
            let edge = &mut self.graph[idx];
            let hours = ((now - edge.last_active) / 3600.0).max(0.0);
            edge.weight = edge.base_weight * (-self.decay_rate * hours).exp();
            if edge.weight < self.prune_threshold {
                stale.push(idx);
            }
        }
        let removed_edges = stale.len();
        for idx in stale {
            self.graph.remove_edge(idx);
        }
        let removed_nodes = self.remove_orphans();
        (removed_edges, removed_nodes)
    }

    /// Enforce the node cap: rank by `weighted_degree * recency_factor`
    /// and drop the lowest scorers (ties by id) until the cap holds, then
    /// re-run orphan removal. Returns nodes removed.
    pub fn enforce_cap(&mut self, now: Timestamp) -> usize {
        let count = self.graph.node_count();
        if count <= self.max_nodes {
            return 0;
        }
        let excess = count - self.max_nodes;

        let mut scored: Vec<(f64, String, NodeIndex)> = self
            .graph
            .node_indices()
            .map(|idx| {
                let record = &self.graph[idx];
                let hours = ((now - record.last_touch()) / 3600.0).max(0.0);
                let recency = (-self.decay_rate * hours).exp();
                let score = self.weighted_degree_idx(idx) * recency;
                (score, record.id.clone(), idx)
            })
            .collect();
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        for (_, id, idx) in scored.into_iter().take(excess) {
            self.graph.remove_node(idx);
            self.index.remove(&id);
        }
        excess + self.remove_orphans()
    }

    fn remove_orphans(&mut self) -> usize {
        let orphans: Vec<(NodeIndex, String)> = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph.neighbors(idx).next().is_none())
            .map(|idx| (idx, self.graph[idx].id.clone()))
            .collect();
        let removed = orphans.len();
        for (idx, id) in orphans {
            self.graph.remove_node(idx);
            self.index.remove(&id);
        }
        removed
    }

    /// Neighbor ids with decayed edge weights, ordered by neighbor id.
    pub fn neighbors(&self, id: &str) -> Vec<(String, f64)> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut neighbors: Vec<(String, f64)> = self
            .graph
            .edges(idx)
            .map(|edge| {
                let other = if edge.source() == idx {
                    edge.target()
                } else {
                    edge.source()
                };
                (self.graph[other].id.clone(), edge.weight().weight)
            })
            .collect();
        neighbors.sort_by(|a, b| a.0.cmp(&b.0));
        neighbors
    }

    pub fn edge(&self, a: &str, b: &str) -> Option<&EdgeRecord> {
        let a_idx = *self.index.get(a)?;
        let b_idx = *self.index.get(b)?;
        let edge_idx = self.graph.find_edge(a_idx, b_idx)?;
        Some(&self.graph[edge_idx])
    }

    /// Decayed weight of the edge between `a` and `b`, if any.
    pub fn edge_weight(&self, a: &str, b: &str) -> Option<f64> {
        self.edge(a, b).map(|e| e.weight)
    }

    /// Sum of decayed weights of the node's incident edges.
    pub fn weighted_degree(&self, id: &str) -> f64 {
        match self.index.get(id) {
            Some(&idx) => self.weighted_degree_idx(idx),
            None => 0.0,
        }
    }

    fn weighted_degree_idx(&self, idx: NodeIndex) -> f64 {
        self.graph.edges(idx).map(|e| e.weight().weight).sum()
    }

    /// Pages ordered by `last_visited` descending (ties by id).
    pub fn recent_pages(&self, limit: usize) -> Vec<&NodeRecord> {
        let mut pages: Vec<&NodeRecord> = self
            .graph
            .node_weights()
            .filter(|n| n.is_page())
            .collect();
        pages.sort_by(|a, b| {
            b.last_touch()
                .partial_cmp(&a.last_touch())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        pages.truncate(limit);
        pages
    }

    /// Stable input for the partitioner: node ids in lexicographic order
    /// plus every edge as an index triple `(a, b, decayed_weight)` with
    /// `a < b`, ordered by that pair.
    pub fn louvain_input(&self) -> (Vec<String>, Vec<(usize, usize, f64)>) {
        let ids: Vec<String> = {
            let mut ids: Vec<String> =
                self.graph.node_weights().map(|n| n.id.clone()).collect();
            ids.sort();
            ids
        };
        let position: HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut edges: Vec<(usize, usize, f64)> = self
            .graph
            .edge_indices()
            .map(|idx| {
                let (a, b) = self.graph.edge_endpoints(idx).expect("edge has endpoints");
                let a_pos = position[self.graph[a].id.as_str()];
                let b_pos = position[self.graph[b].id.as_str()];
                let (lo, hi) = if a_pos <= b_pos { (a_pos, b_pos) } else { (b_pos, a_pos) };
                (lo, hi, self.graph[idx].weight)
            })
            .collect();
        edges.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        (ids, edges)
    }

    /// The `k` strongest keyword-keyword edges with both endpoints in
    /// `members`, by decayed weight descending.
    pub fn keyword_links_within(&self, members: &HashSet<String>, k: usize) -> Vec<KeywordLink> {
        let mut links: Vec<KeywordLink> = self
            .graph
            .edge_indices()
            .filter_map(|idx| {
                let (a, b) = self.graph.edge_endpoints(idx)?;
                let (a_rec, b_rec) = (&self.graph[a], &self.graph[b]);
                if !a_rec.is_keyword() || !b_rec.is_keyword() {
                    return None;
                }
                if !members.contains(&a_rec.id) || !members.contains(&b_rec.id) {
                    return None;
                }
                let (source, target) = if a_rec.id <= b_rec.id {
                    (a_rec.id.clone(), b_rec.id.clone())
                } else {
                    (b_rec.id.clone(), a_rec.id.clone())
                };
                Some(KeywordLink {
                    source,
                    target,
                    weight: self.graph[idx].weight,
                })
            })
            .collect();
        links.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.target.cmp(&b.target))
        });
        links.truncate(k);
        links
    }

    /// Edges with both endpoints in `members`.
    pub fn internal_edge_count(&self, members: &HashSet<String>) -> usize {
        self.internal_edges(members).count()
    }

    /// Sum of decayed weights of edges with both endpoints in `members`.
    pub fn internal_edge_weight(&self, members: &HashSet<String>) -> f64 {
        self.internal_edges(members)
            .map(|idx| self.graph[idx].weight)
            .sum()
    }

    fn internal_edges<'a>(
        &'a self,
        members: &'a HashSet<String>,
    ) -> impl Iterator<Item = petgraph::stable_graph::EdgeIndex> + 'a {
        self.graph.edge_indices().filter(move |&idx| {
            let (a, b) = self.graph.edge_endpoints(idx).expect("edge has endpoints");
            members.contains(&self.graph[a].id) && members.contains(&self.graph[b].id)
        })
    }

    /// Keyword nodes whose neighbors span at least two communities, with
    /// the sorted set of community ids they touch. Ordered by keyword id.
    pub fn bridging_keywords(
        &self,
        assignments: &HashMap<String, usize>,
    ) -> Vec<(String, Vec<usize>)> {
        let mut bridges: Vec<(String, Vec<usize>)> = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph[idx].is_keyword())
            .filter_map(|idx| {
                let touched: BTreeSet<usize> = self
                    .graph
                    .neighbors(idx)
                    .filter_map(|n| assignments.get(&self.graph[n].id).copied())
                    .collect();
                if touched.len() >= 2 {
                    Some((self.graph[idx].id.clone(), touched.into_iter().collect()))
                } else {
                    None
                }
            })
            .collect();
        bridges.sort_by(|a, b| a.0.cmp(&b.0));
        bridges
    }

    /// Check the structural invariants; the staged-copy writer calls this
    /// before committing.
    pub fn verify_invariants(&self) -> Result<()> {
        if self.graph.node_count() > self.max_nodes {
            return Err(EngineError::Invariant(InvariantError::NodeCapExceeded {
                count: self.graph.node_count(),
                max: self.max_nodes,
            }));
        }

        for idx in self.graph.node_indices() {
            let record = &self.graph[idx];
            if !self.index.contains_key(&record.id) {
                return Err(EngineError::Invariant(InvariantError::MissingEndpoint(
                    record.id.clone(),
                )));
            }
            match &record.kind {
                NodeKind::Page(p) => {
                    if p.last_visited < p.first_visited {
                        return Err(EngineError::Invariant(InvariantError::TimeOrder(
                            record.id.clone(),
                        )));
                    }
                }
                NodeKind::Keyword(k) => {
                    if k.last_seen < k.first_seen {
                        return Err(EngineError::Invariant(InvariantError::TimeOrder(
                            record.id.clone(),
                        )));
                    }
                    if k.page_refs.len() > MAX_PAGE_REFS {
                        return Err(EngineError::Invariant(InvariantError::PageRefsOverflow(
                            record.id.clone(),
                        )));
                    }
                    let unique: HashSet<&String> = k.page_refs.iter().collect();
                    if unique.len() != k.page_refs.len() {
                        return Err(EngineError::Invariant(InvariantError::PageRefsOverflow(
                            record.id.clone(),
                        )));
                    }
                }
            }
        }

        for idx in self.graph.edge_indices() {
            let (a, b) = self.graph.edge_endpoints(idx).expect("edge has endpoints");
            let (a_rec, b_rec) = (&self.graph[a], &self.graph[b]);
            if a == b {
                return Err(EngineError::Invariant(InvariantError::SelfLoop(
                    a_rec.id.clone(),
                )));
            }
            if a_rec.is_page() && b_rec.is_page() {
                return Err(EngineError::Invariant(InvariantError::PagePageEdge {
                    from: a_rec.id.clone(),
                    to: b_rec.id.clone(),
                }));
            }
            let edge = &self.graph[idx];
            if edge.weight < 0.0 || edge.weight > edge.base_weight + WEIGHT_EPSILON {
                return Err(EngineError::Invariant(InvariantError::WeightExceedsBase {
                    from: a_rec.id.clone(),
                    to: b_rec.id.clone(),
                }));
            }
            if edge.last_active < edge.created {
                return Err(EngineError::Invariant(InvariantError::TimeOrder(format!(
                    "{} -- {}",
                    a_rec.id, b_rec.id
                ))));
            }
        }

        Ok(())
    }

    /// Re-insert a node record during hydration.
    pub(crate) fn insert_record(&mut self, record: NodeRecord) {
        let id = record.id.clone();
        let idx = self.graph.add_node(record);
        self.index.insert(id, idx);
    }

    /// Re-insert an edge record during hydration; endpoints must exist.
    pub(crate) fn insert_edge_record(
        &mut self,
        source: &str,
        target: &str,
        edge: EdgeRecord,
    ) -> Result<()> {
        let a = *self
            .index
            .get(source)
            .ok_or_else(|| EngineError::Invariant(InvariantError::MissingEndpoint(source.into())))?;
        let b = *self
            .index
            .get(target)
            .ok_or_else(|| EngineError::Invariant(InvariantError::MissingEndpoint(target.into())))?;
        if a == b {
            return Err(EngineError::Invariant(InvariantError::SelfLoop(
                source.into(),
            )));
        }
        self.graph.add_edge(a, b, edge);
        Ok(())
    }
}
