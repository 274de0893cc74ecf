//! The engine facade: bootstrap, capability API, shutdown.
//!
//! One `ContextEngine` handle per process. `bootstrap` hydrates the
//! graph from the snapshot store and spawns the single pipeline worker;
//! `shutdown` drains the queue, stops the worker, and writes a final
//! snapshot. All capability methods are cheap reads except `analyze`,
//! which enqueues a visit and waits for its published document.

use crate::clock::{Clock, SystemClock};
use crate::extractor::KeywordExtractor;
use crate::queue::VisitQueue;
use crate::store::{FileSnapshotStore, SnapshotStore};
use crate::telemetry::{PipelineRun, RunBuffer};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use taskloom_core::config::EngineConfig;
use taskloom_core::enrich::{enrich, ContextDocument};
use taskloom_core::error::{EngineError, Result, SnapshotError};
use taskloom_core::graph::KnowledgeGraph;
use taskloom_core::infer::Inference;
use taskloom_core::partition::TaskPartition;
use taskloom_core::snapshot;
use taskloom_core::types::{NodeKind, PageVisit};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long shutdown waits for queued visits before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Buffered published contexts per subscriber.
const CONTEXT_CHANNEL_CAPACITY: usize = 64;

/// Everything protected by the writer transaction: the graph plus the
/// derived state that must stay consistent with it.
pub(crate) struct EngineState {
    pub(crate) graph: KnowledgeGraph,
    pub(crate) partition: Arc<TaskPartition>,
    pub(crate) inference: Arc<Inference>,
    pub(crate) document: Option<Arc<ContextDocument>>,
}

impl EngineState {
    fn new(graph: KnowledgeGraph) -> Self {
        Self {
            graph,
            partition: Arc::new(TaskPartition::empty()),
            inference: Arc::new(Inference::exploring()),
            document: None,
        }
    }
}

pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) state: RwLock<EngineState>,
    pub(crate) runs: RunBuffer,
    pub(crate) queue: VisitQueue,
    pub(crate) context_tx: broadcast::Sender<Arc<ContextDocument>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) extractor: Option<Arc<dyn KeywordExtractor>>,
    pub(crate) store: Arc<dyn SnapshotStore>,
    pub(crate) extractor_healthy: AtomicBool,
}

/// Aggregate counters for the stats capability.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub community_count: usize,
    pub max_nodes: usize,
    pub extractor_healthy: bool,
}

/// One node of the graph view.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNodeView {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: &'static str,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visit_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_refs: Option<Vec<String>>,
}

/// One edge of the graph view.
#[derive(Debug, Clone, Serialize)]
pub struct GraphEdgeView {
    pub source: String,
    pub target: String,
    pub weight: f64,
    pub base_weight: f64,
}

/// The whole graph as served to diagnostics and UIs.
#[derive(Debug, Clone, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNodeView>,
    pub edges: Vec<GraphEdgeView>,
    pub community_count: usize,
}

/// A context document re-enriched for a chat query.
#[derive(Debug, Clone, Serialize)]
pub struct ChatContext {
    pub context_document: ContextDocument,
    pub query: String,
}

/// Builder for a [`ContextEngine`] with non-default capabilities.
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    extractor: Option<Arc<dyn KeywordExtractor>>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: None,
            extractor: None,
            store: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn KeywordExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the config, hydrate from the store, spawn the worker.
    pub async fn bootstrap(self) -> Result<ContextEngine> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store: Arc<dyn SnapshotStore> = self
            .store
            .unwrap_or_else(|| Arc::new(FileSnapshotStore::new(self.config.snapshot_path.clone())));

        let graph = hydrate(store.as_ref(), &self.config);
        let (context_tx, _) = broadcast::channel(CONTEXT_CHANNEL_CAPACITY);
        let shared = Arc::new(EngineShared {
            queue: VisitQueue::new(self.config.debounce_ms, self.config.allow_file_urls),
            state: RwLock::new(EngineState::new(graph)),
            runs: RunBuffer::default(),
            context_tx,
            clock,
            extractor: self.extractor,
            store,
            extractor_healthy: AtomicBool::new(true),
            config: self.config,
        });

        let worker = tokio::spawn(worker_loop(Arc::clone(&shared)));
        Ok(ContextEngine {
            shared,
            worker: Arc::new(Mutex::new(Some(worker))),
        })
    }
}

/// Handle to the process-wide context engine.
#[derive(Clone)]
pub struct ContextEngine {
    shared: Arc<EngineShared>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ContextEngine {
    /// Bootstrap with default capabilities: system clock, file store at
    /// the configured snapshot path, no external extractor.
    pub async fn bootstrap(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new(config).bootstrap().await
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Submit a visit and wait for the document published for it.
    pub async fn analyze(&self, visit: PageVisit) -> Result<Arc<ContextDocument>> {
        if visit.url.trim().is_empty() {
            return Err(EngineError::empty_url());
        }
        if !visit.timestamp.is_finite() {
            return Err(EngineError::bad_timestamp(visit.timestamp));
        }

        let (tx, rx) = oneshot::channel();
        self.shared
            .queue
            .push(visit, tx, self.shared.clock.now_seconds())?;
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::ShutdownInProgress),
        }
    }

    /// The last published context document, if any visit completed yet.
    pub fn get_context(&self) -> Option<Arc<ContextDocument>> {
        self.shared
            .state
            .read()
            .expect("engine state lock poisoned")
            .document
            .clone()
    }

    /// Re-enrich against the current graph for a chat query. Reads a
    /// consistent view; never mutates.
    pub fn chat_context(&self, query: &str) -> ChatContext {
        let state = self.shared.state.read().expect("engine state lock poisoned");
        let document = enrich(
            &state.graph,
            &state.partition,
            &state.inference,
            self.shared.clock.now_seconds(),
            &self.shared.config,
        );
        ChatContext {
            context_document: document,
            query: query.to_string(),
        }
    }

    /// Full graph view for diagnostics and UIs.
    pub fn get_graph(&self) -> GraphView {
        let state = self.shared.state.read().expect("engine state lock poisoned");
        let assignments = &state.partition.assignments;

        let nodes = state
            .graph
            .nodes()
            .into_iter()
            .map(|record| {
                let community = assignments.get(&record.id).copied();
                match &record.kind {
                    NodeKind::Page(page) => GraphNodeView {
                        id: record.id.clone(),
                        node_type: "page",
                        label: page.title.clone(),
                        community,
                        url: Some(page.url.clone()),
                        visit_count: Some(page.visit_count),
                        frequency: None,
                        summary: non_empty(&page.summary),
                        content_snippet: non_empty(&page.content_snippet),
                        page_refs: None,
                    },
                    NodeKind::Keyword(keyword) => GraphNodeView {
                        id: record.id.clone(),
                        node_type: "keyword",
                        label: keyword.label.clone(),
                        community,
                        url: None,
                        visit_count: None,
                        frequency: Some(keyword.frequency),
                        summary: None,
                        content_snippet: None,
                        page_refs: Some(keyword.page_refs.clone()),
                    },
                }
            })
            .collect();

        let edges = state
            .graph
            .edges()
            .into_iter()
            .map(|(source, target, edge)| GraphEdgeView {
                source: source.to_string(),
                target: target.to_string(),
                weight: edge.weight,
                base_weight: edge.base_weight,
            })
            .collect();

        GraphView {
            nodes,
            edges,
            community_count: state.partition.len(),
        }
    }

    /// Empty the graph and the cached context.
    pub fn reset_graph(&self) {
        let mut state = self.shared.state.write().expect("engine state lock poisoned");
        state.graph.clear();
        state.partition = Arc::new(TaskPartition::empty());
        state.inference = Arc::new(Inference::exploring());
        state.document = None;
        info!("graph reset");
    }

    pub fn get_stats(&self) -> EngineStats {
        let state = self.shared.state.read().expect("engine state lock poisoned");
        EngineStats {
            node_count: state.graph.node_count(),
            edge_count: state.graph.edge_count(),
            community_count: state.partition.len(),
            max_nodes: self.shared.config.max_graph_nodes,
            extractor_healthy: self.shared.extractor_healthy.load(Ordering::Relaxed),
        }
    }

    /// The retained pipeline runs, oldest first.
    pub fn get_pipeline_events(&self) -> Vec<PipelineRun> {
        self.shared.runs.runs()
    }

    /// Subscribe to published context documents.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ContextDocument>> {
        self.shared.context_tx.subscribe()
    }

    /// Stop admitting visits, drain for up to the grace period, abort
    /// the rest, and write a final snapshot.
    pub async fn shutdown(&self) -> Result<()> {
        self.shared.queue.close();

        let handle = self
            .worker
            .lock()
            .expect("worker handle lock poisoned")
            .take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Err(e)) => warn!(error = %e, "pipeline worker ended abnormally"),
                Ok(Ok(())) => {}
                Err(_) => {
                    warn!("shutdown grace elapsed; aborting pending visits");
                    handle.abort();
                }
            }
        }

        for job in self.shared.queue.drain() {
            for responder in job.responders {
                let _ = responder.send(Err(EngineError::ShutdownInProgress));
            }
        }

        // Transient IO here is non-fatal: logged and retried at the next
        // shutdown.
        if let Err(e) = self.write_snapshot() {
            warn!(error = %e, "final snapshot not written");
        }
        Ok(())
    }

    fn write_snapshot(&self) -> Result<()> {
        let captured = {
            let state = self.shared.state.read().expect("engine state lock poisoned");
            snapshot::capture(&state.graph, self.shared.clock.now_seconds())
        };
        let bytes = snapshot::encode(&captured)?;
        self.shared
            .store
            .write(&bytes)
            .map_err(|e| EngineError::Snapshot(SnapshotError::WriteFailed(e.to_string())))?;
        info!(
            nodes = captured.metadata.node_count,
            edges = captured.metadata.edge_count,
            "snapshot written"
        );
        Ok(())
    }
}

/// Read the stored snapshot; anything short of a clean decode means an
/// empty graph.
fn hydrate(store: &dyn SnapshotStore, config: &EngineConfig) -> KnowledgeGraph {
    match store.read() {
        Ok(Some(bytes)) => match snapshot::decode(&bytes)
            .and_then(|state| snapshot::restore(&state, config))
        {
            Ok(graph) => {
                info!(
                    nodes = graph.node_count(),
                    edges = graph.edge_count(),
                    "graph hydrated from snapshot"
                );
                graph
            }
            Err(e) => {
                warn!(error = %e, "snapshot unusable; starting empty");
                KnowledgeGraph::new(config)
            }
        },
        Ok(None) => KnowledgeGraph::new(config),
        Err(e) => {
            warn!(error = %e, "snapshot read failed; starting empty");
            KnowledgeGraph::new(config)
        }
    }
}

/// The single pipeline worker: strictly serial visits with the
/// configured minimum gap between them.
async fn worker_loop(shared: Arc<EngineShared>) {
    while let Some(job) = shared.queue.pop().await {
        let outcome = shared.process_visit(job.visit).await;
        if let Err(e) = &outcome {
            warn!(error = %e, "visit pipeline failed");
        }
        for responder in job.responders {
            let _ = responder.send(outcome.clone());
        }
        if shared.config.min_interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(shared.config.min_interval_ms)).await;
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemorySnapshotStore;

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.debounce_ms = 0;
        config.min_interval_ms = 0;
        config
    }

    async fn test_engine(
        config: EngineConfig,
    ) -> (ContextEngine, Arc<ManualClock>, Arc<MemorySnapshotStore>) {
        let clock = Arc::new(ManualClock::new(1000.0));
        let store = Arc::new(MemorySnapshotStore::new());
        let engine = ContextEngine::builder(config)
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .snapshot_store(Arc::clone(&store) as Arc<dyn SnapshotStore>)
            .bootstrap()
            .await
            .unwrap();
        (engine, clock, store)
    }

    fn visit(url: &str, title: &str, keywords: &[&str], ts: f64) -> PageVisit {
        PageVisit {
            url: url.to_string(),
            title: title.to_string(),
            content: String::new(),
            summary: None,
            keywords: Some(keywords.iter().map(|k| k.to_string()).collect()),
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn analyze_publishes_a_document() {
        let (engine, _clock, _store) = test_engine(test_config()).await;
        let doc = engine
            .analyze(visit("u1", "React Docs", &["react", "hooks"], 1000.0))
            .await
            .unwrap();

        assert_eq!(doc.active_task.label, "Exploring");
        assert_eq!(doc.active_task.confidence, 0.0);
        assert_eq!(engine.get_context().unwrap().generated_at, doc.generated_at);

        let stats = engine.get_stats();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.edge_count, 3);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn analyze_rejects_bad_input() {
        let (engine, _clock, _store) = test_engine(test_config()).await;
        assert!(engine
            .analyze(visit("", "x", &["a"], 1000.0))
            .await
            .is_err());
        assert!(engine
            .analyze(visit("u", "x", &["a"], f64::NAN))
            .await
            .is_err());
        assert!(engine
            .analyze(visit("about:blank", "x", &["a"], 1000.0))
            .await
            .is_err());
        assert_eq!(engine.get_stats().node_count, 0);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn file_urls_honor_the_config_opt_in() {
        let (engine, _clock, _store) = test_engine(test_config()).await;
        let err = engine
            .analyze(visit("file:///home/me/notes.html", "Notes", &["notes"], 1000.0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Admission(_)));
        engine.shutdown().await.unwrap();

        let mut config = test_config();
        config.allow_file_urls = true;
        let (engine, _clock, _store) = test_engine(config).await;
        engine
            .analyze(visit("file:///home/me/notes.html", "Notes", &["notes"], 1000.0))
            .await
            .unwrap();
        assert_eq!(engine.get_stats().node_count, 2);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn debounce_rejects_rapid_same_url() {
        let mut config = test_config();
        config.debounce_ms = 5000;
        let (engine, clock, _store) = test_engine(config).await;

        engine
            .analyze(visit("u1", "React", &["react"], 1000.0))
            .await
            .unwrap();
        clock.advance(1.0);
        let err = engine
            .analyze(visit("u1", "React", &["react"], 1001.0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Admission(_)));

        clock.advance(10.0);
        engine
            .analyze(visit("u1", "React", &["react"], 1011.0))
            .await
            .unwrap();
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_snapshot_survives_restart() {
        let (engine, _clock, store) = test_engine(test_config()).await;
        engine
            .analyze(visit("u1", "React", &["react", "hooks"], 1000.0))
            .await
            .unwrap();
        engine.shutdown().await.unwrap();
        assert!(store.read().unwrap().is_some());

        let clock = Arc::new(ManualClock::new(1010.0));
        let revived = ContextEngine::builder(test_config())
            .clock(clock as Arc<dyn Clock>)
            .snapshot_store(store as Arc<dyn SnapshotStore>)
            .bootstrap()
            .await
            .unwrap();
        let stats = revived.get_stats();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.edge_count, 3);
        revived.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn analyze_after_shutdown_is_rejected() {
        let (engine, _clock, _store) = test_engine(test_config()).await;
        engine.shutdown().await.unwrap();
        let err = engine
            .analyze(visit("u1", "React", &["react"], 1000.0))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::ShutdownInProgress);
    }

    #[tokio::test]
    async fn reset_graph_clears_state() {
        let (engine, _clock, _store) = test_engine(test_config()).await;
        engine
            .analyze(visit("u1", "React", &["react", "hooks"], 1000.0))
            .await
            .unwrap();
        engine.reset_graph();

        assert_eq!(engine.get_stats().node_count, 0);
        assert!(engine.get_context().is_none());
        let view = engine.get_graph();
        assert!(view.nodes.is_empty());
        assert!(view.edges.is_empty());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn chat_context_reflects_current_graph() {
        let (engine, _clock, _store) = test_engine(test_config()).await;
        engine
            .analyze(visit("u1", "React", &["react", "hooks"], 1000.0))
            .await
            .unwrap();

        let chat = engine.chat_context("what am I doing?");
        assert_eq!(chat.query, "what am I doing?");
        assert_eq!(chat.context_document.trajectory.len(), 1);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn pipeline_events_record_every_step() {
        let (engine, _clock, _store) = test_engine(test_config()).await;
        engine
            .analyze(visit("u1", "React", &["react", "hooks"], 1000.0))
            .await
            .unwrap();

        let runs = engine.get_pipeline_events();
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.url, "u1");
        assert!(run.completed_at.is_some());
        let names: Vec<&str> = run.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["extract", "ingest", "partition", "infer", "enrich", "publish"]
        );
        engine.shutdown().await.unwrap();
    }

    struct StaticExtractor(Vec<String>);

    #[async_trait::async_trait]
    impl KeywordExtractor for StaticExtractor {
        async fn extract(&self, _title: &str, _text: &str) -> Option<Vec<String>> {
            Some(self.0.clone())
        }
    }

    struct HangingExtractor;

    #[async_trait::async_trait]
    impl KeywordExtractor for HangingExtractor {
        async fn extract(&self, _title: &str, _text: &str) -> Option<Vec<String>> {
            std::future::pending::<()>().await;
            None
        }
    }

    #[tokio::test]
    async fn external_extractor_supplies_keywords() {
        let clock = Arc::new(ManualClock::new(1000.0));
        let engine = ContextEngine::builder(test_config())
            .clock(clock as Arc<dyn Clock>)
            .snapshot_store(Arc::new(MemorySnapshotStore::new()) as Arc<dyn SnapshotStore>)
            .extractor(Arc::new(StaticExtractor(vec![
                "Rust".to_string(),
                "Tokio".to_string(),
            ])))
            .bootstrap()
            .await
            .unwrap();

        let mut visit = visit("u1", "Some Page", &[], 1000.0);
        visit.keywords = None;
        engine.analyze(visit).await.unwrap();

        let view = engine.get_graph();
        assert!(view.nodes.iter().any(|n| n.id == "kw:rust"));
        assert!(view.nodes.iter().any(|n| n.id == "kw:tokio"));
        assert!(engine.get_stats().extractor_healthy);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_extractor_falls_back_to_heuristic() {
        let clock = Arc::new(ManualClock::new(1000.0));
        let engine = ContextEngine::builder(test_config())
            .clock(clock as Arc<dyn Clock>)
            .snapshot_store(Arc::new(MemorySnapshotStore::new()) as Arc<dyn SnapshotStore>)
            .extractor(Arc::new(HangingExtractor))
            .bootstrap()
            .await
            .unwrap();

        let mut page = visit("u1", "Crossbeam Channels", &[], 1000.0);
        page.keywords = None;
        page.content = "Crossbeam channels pass messages between threads.".to_string();
        engine.analyze(page).await.unwrap();

        let view = engine.get_graph();
        assert!(view.nodes.iter().any(|n| n.id == "kw:crossbeam"));
        assert!(!engine.get_stats().extractor_healthy);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn subscriber_receives_published_contexts() {
        let (engine, _clock, _store) = test_engine(test_config()).await;
        let mut rx = engine.subscribe();
        engine
            .analyze(visit("u1", "React", &["react", "hooks"], 1000.0))
            .await
            .unwrap();
        let published = rx.recv().await.unwrap();
        assert_eq!(published.active_task.label, "Exploring");
        engine.shutdown().await.unwrap();
    }
}
