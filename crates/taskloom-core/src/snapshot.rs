//! Versioned binary snapshot of the knowledge graph.
//!
//! Wire format: a 1-byte version tag followed by a bincode payload, so
//! future migrations can dispatch on the tag before touching the body.
//! Decoding problems are never fatal to the engine; a corrupt or
//! unsupported snapshot just means starting empty.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result, SnapshotError};
use crate::graph::KnowledgeGraph;
use crate::types::{EdgeRecord, NodeRecord, Timestamp};
use serde::{Deserialize, Serialize};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Snapshot provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub session_id: String,
    pub saved_at: Timestamp,
    pub node_count: usize,
    pub edge_count: usize,
}

/// One serialized edge with its endpoint ids (`source < target`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEdge {
    pub source: String,
    pub target: String,
    pub edge: EdgeRecord,
}

/// The full serializable graph state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<SerializedEdge>,
    pub metadata: SnapshotMetadata,
}

/// Capture the graph into a serializable state, in stable id order.
pub fn capture(graph: &KnowledgeGraph, saved_at: Timestamp) -> GraphState {
    let nodes: Vec<NodeRecord> = graph.nodes().into_iter().cloned().collect();
    let edges: Vec<SerializedEdge> = graph
        .edges()
        .into_iter()
        .map(|(source, target, edge)| SerializedEdge {
            source: source.to_string(),
            target: target.to_string(),
            edge: edge.clone(),
        })
        .collect();

    GraphState {
        metadata: SnapshotMetadata {
            session_id: uuid::Uuid::new_v4().to_string(),
            saved_at,
            node_count: nodes.len(),
            edge_count: edges.len(),
        },
        nodes,
        edges,
    }
}

/// Encode a state as version tag + bincode payload.
pub fn encode(state: &GraphState) -> Result<Vec<u8>> {
    let payload = bincode::serialize(state)
        .map_err(|e| EngineError::Serialization(e.to_string()))?;
    let mut bytes = Vec::with_capacity(1 + payload.len());
    bytes.push(SNAPSHOT_VERSION);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode snapshot bytes, rejecting unknown versions and bad payloads.
pub fn decode(bytes: &[u8]) -> Result<GraphState> {
    let (&version, payload) = bytes
        .split_first()
        .ok_or_else(|| EngineError::snapshot_corrupt("empty snapshot"))?;
    if version != SNAPSHOT_VERSION {
        return Err(EngineError::Snapshot(SnapshotError::UnsupportedVersion(
            version,
        )));
    }
    bincode::deserialize(payload).map_err(|e| EngineError::snapshot_corrupt(e.to_string()))
}

/// Rebuild a graph from a decoded state and check its invariants; a
/// state that fails them is treated as corrupt.
pub fn restore(state: &GraphState, config: &EngineConfig) -> Result<KnowledgeGraph> {
    let mut graph = KnowledgeGraph::new(config);
    for node in &state.nodes {
        graph.insert_record(node.clone());
    }
    for edge in &state.edges {
        graph.insert_edge_record(&edge.source, &edge.target, edge.edge.clone())?;
    }
    graph
        .verify_invariants()
        .map_err(|e| EngineError::snapshot_corrupt(e.to_string()))?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageIngest;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn populated_graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new(&config());
        for (url, title, ts, terms) in [
            ("u1", "React Docs", 1000.0, vec!["react", "hooks"]),
            ("u2", "FastAPI", 1001.0, vec!["python", "fastapi"]),
            ("u1", "React Docs", 1002.0, vec!["react", "suspense"]),
        ] {
            let page = PageIngest {
                url: url.to_string(),
                title: title.to_string(),
                summary: format!("{} summary", title),
                content_snippet: format!("{} snippet", title),
                timestamp: ts,
            };
            let terms: Vec<String> = terms.into_iter().map(String::from).collect();
            graph.ingest(&page, &terms).unwrap();
        }
        graph
    }

    #[test]
    fn round_trip_is_identity() {
        let graph = populated_graph();
        let state = capture(&graph, 2000.0);
        let bytes = encode(&state).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, state);

        let restored = restore(&decoded, &config()).unwrap();
        let recaptured = capture(&restored, 2000.0);
        assert_eq!(recaptured.nodes, state.nodes);
        assert_eq!(recaptured.edges, state.edges);
    }

    #[test]
    fn rejects_empty_and_garbage() {
        assert!(matches!(
            decode(&[]),
            Err(EngineError::Snapshot(SnapshotError::Corrupt(_)))
        ));
        let garbage = [SNAPSHOT_VERSION, 0xde, 0xad, 0xbe];
        assert!(matches!(
            decode(&garbage),
            Err(EngineError::Snapshot(SnapshotError::Corrupt(_)))
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let state = capture(&populated_graph(), 2000.0);
        let mut bytes = encode(&state).unwrap();
        bytes[0] = 99;
        assert!(matches!(
            decode(&bytes),
            Err(EngineError::Snapshot(SnapshotError::UnsupportedVersion(99)))
        ));
    }

    #[test]
    fn restore_rejects_dangling_edges() {
        let mut state = capture(&populated_graph(), 2000.0);
        state.edges.push(SerializedEdge {
            source: "kw:ghost".into(),
            target: "kw:react".into(),
            edge: EdgeRecord::new(0.0),
        });
        assert!(restore(&state, &config()).is_err());
    }

    #[test]
    fn restore_rejects_invalid_weights() {
        let mut state = capture(&populated_graph(), 2000.0);
        state.edges[0].edge.weight = state.edges[0].edge.base_weight + 1.0;
        assert!(restore(&state, &config()).is_err());
    }
}
