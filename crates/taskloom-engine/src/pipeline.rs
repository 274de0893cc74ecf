//! The per-visit pipeline.
//!
//! A plain sequence with explicit step records: extract, ingest,
//! partition, infer, enrich, publish. The worker runs it for one visit
//! at a time. Graph mutation happens on a staged copy that is committed
//! only in the publish step, so a failed visit never leaves partial
//! state behind and the published context always matches the graph.

use crate::engine::EngineShared;
use crate::extractor::EXTRACTION_TIMEOUT;
use crate::telemetry::{RunStatus, StepRecord, StepStatus};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use taskloom_core::enrich::{enrich, ContextDocument};
use taskloom_core::error::{EngineError, ExtractionError, Result};
use taskloom_core::extract::{extract, truncate_chars, Extraction};
use taskloom_core::infer::infer;
use taskloom_core::partition::TaskPartition;
use taskloom_core::types::{normalize_term, PageIngest, PageVisit};
use tracing::warn;

/// Step names, in pipeline order.
const STEP_NAMES: [&str; 6] = ["extract", "ingest", "partition", "infer", "enrich", "publish"];

/// Longest output preview stored per step.
const PREVIEW_CHARS: usize = 120;

impl EngineShared {
    /// Run the full pipeline for one visit and return the published
    /// document. All-or-nothing: on error no state changes.
    pub(crate) async fn process_visit(&self, visit: PageVisit) -> Result<Arc<ContextDocument>> {
        let run_id = self
            .runs
            .begin(&visit.url, &visit.title, self.clock.now_seconds());
        let mut steps = Vec::with_capacity(STEP_NAMES.len());

        let outcome = self.run_steps(&visit, &mut steps).await;
        let status = if outcome.is_ok() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.runs
            .finish(run_id, status, self.clock.now_seconds(), steps);
        outcome
    }

    async fn run_steps(
        &self,
        visit: &PageVisit,
        steps: &mut Vec<StepRecord>,
    ) -> Result<Arc<ContextDocument>> {
        // 1. Extract: external keywords when offered, heuristic otherwise;
        //    the heuristic always supplies summary and snippet.
        let started = self.clock.now_seconds();
        let content = truncate_chars(&visit.content, self.config.max_content_length);
        let heuristic = extract(&visit.title, content, &self.config);
        let (keywords, source) = self.resolve_keywords(visit, content, &heuristic).await;
        let summary = match &visit.summary {
            Some(provided) if !provided.trim().is_empty() => {
                truncate_chars(provided, self.config.max_summary_length).to_string()
            }
            _ => heuristic.summary.clone(),
        };
        steps.push(self.completed_step(
            "extract",
            started,
            format!("{}: {}", source, keywords.join(", ")),
        ));

        // 2. Ingest on a staged copy; commit happens at publish.
        let started = self.clock.now_seconds();
        let page = PageIngest {
            url: visit.url.clone(),
            title: visit.title.clone(),
            summary,
            content_snippet: heuristic.snippet.clone(),
            timestamp: visit.timestamp,
        };
        let mut staged = self
            .state
            .read()
            .expect("engine state lock poisoned")
            .graph
            .clone();
        let ingested = staged
            .ingest(&page, &keywords)
            .and_then(|receipt| staged.verify_invariants().map(|()| receipt));
        let receipt = match ingested {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(url = %visit.url, error = %e, "visit aborted; graph unchanged");
                let failed_at = self.clock.now_seconds();
                steps.push(step_record(
                    "ingest",
                    started,
                    failed_at,
                    StepStatus::Failed,
                    e.to_string(),
                ));
                for name in &STEP_NAMES[2..] {
                    steps.push(step_record(name, failed_at, failed_at, StepStatus::Skipped, String::new()));
                }
                return Err(e);
            }
        };
        steps.push(self.completed_step(
            "ingest",
            started,
            format!(
                "+{} nodes, +{} edges, {} reinforced, {} pruned",
                receipt.nodes_added,
                receipt.edges_added,
                receipt.edges_reinforced,
                receipt.edges_pruned + receipt.nodes_pruned
            ),
        ));

        // 3. Partition.
        let started = self.clock.now_seconds();
        let partition = TaskPartition::detect(
            &staged,
            self.config.community_resolution,
            self.config.community_seed,
        );
        steps.push(self.completed_step(
            "partition",
            started,
            format!("{} communities (Q={:.3})", partition.len(), partition.modularity),
        ));

        // 4. Infer.
        let started = self.clock.now_seconds();
        let inference = infer(
            &staged,
            &partition,
            &keywords,
            self.config.laplace_smoothing,
            self.config.confidence_cold_start,
        );
        steps.push(self.completed_step(
            "infer",
            started,
            format!("{} ({:.2})", inference.active_task, inference.confidence),
        ));

        // 5. Enrich.
        let started = self.clock.now_seconds();
        let document = Arc::new(enrich(
            &staged,
            &partition,
            &inference,
            self.clock.now_seconds(),
            &self.config,
        ));
        steps.push(self.completed_step(
            "enrich",
            started,
            format!(
                "{} trajectory pages, {} tasks",
                document.trajectory.len(),
                document.all_tasks.len()
            ),
        ));

        // 6. Publish: commit the staged graph and the derived state in
        //    one write, then fan the document out.
        let started = self.clock.now_seconds();
        {
            let mut state = self.state.write().expect("engine state lock poisoned");
            state.graph = staged;
            state.partition = Arc::new(partition);
            state.inference = Arc::new(inference);
            state.document = Some(Arc::clone(&document));
        }
        let _ = self.context_tx.send(Arc::clone(&document));
        steps.push(self.completed_step(
            "publish",
            started,
            format!("active task: {}", document.active_task.label),
        ));

        Ok(document)
    }

    /// Keyword resolution order: request-supplied, external extractor,
    /// heuristic. External failures are recovered here and only logged.
    async fn resolve_keywords(
        &self,
        visit: &PageVisit,
        content: &str,
        heuristic: &Extraction,
    ) -> (Vec<String>, &'static str) {
        if let Some(requested) = &visit.keywords {
            let cleaned = clean_keywords(requested, self.config.max_keywords_per_page);
            if !cleaned.is_empty() {
                return (cleaned, "request");
            }
        }

        if let Some(extractor) = &self.extractor {
            let attempt = tokio::time::timeout(
                EXTRACTION_TIMEOUT,
                extractor.extract(&visit.title, content),
            )
            .await;
            let outcome: Result<Vec<String>> = match attempt {
                Ok(Some(extracted)) => {
                    let cleaned = clean_keywords(&extracted, self.config.max_keywords_per_page);
                    if cleaned.is_empty() {
                        Err(EngineError::Extraction(ExtractionError::Unavailable(
                            "empty keyword list".into(),
                        )))
                    } else {
                        Ok(cleaned)
                    }
                }
                Ok(None) => Err(EngineError::Extraction(ExtractionError::Unavailable(
                    "no result".into(),
                ))),
                Err(_) => Err(EngineError::Extraction(ExtractionError::Timeout)),
            };
            match outcome {
                Ok(cleaned) => {
                    self.extractor_healthy.store(true, Ordering::Relaxed);
                    return (cleaned, "extractor");
                }
                Err(e) => {
                    // Recovered locally: fall through to the heuristic.
                    self.extractor_healthy.store(false, Ordering::Relaxed);
                    warn!(url = %visit.url, error = %e, "falling back to heuristic keywords");
                }
            }
        }

        (heuristic.keywords.clone(), "heuristic")
    }

    fn completed_step(&self, name: &str, started: f64, preview: String) -> StepRecord {
        step_record(
            name,
            started,
            self.clock.now_seconds(),
            StepStatus::Completed,
            preview,
        )
    }
}

/// Lowercase, trim, deduplicate, and cap an external keyword list.
fn clean_keywords(raw: &[String], cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut cleaned = Vec::new();
    for keyword in raw {
        let term = normalize_term(keyword);
        if term.is_empty() || !seen.insert(term.clone()) {
            continue;
        }
        cleaned.push(term);
        if cleaned.len() == cap {
            break;
        }
    }
    cleaned
}

fn step_record(
    name: &str,
    started_at: f64,
    completed_at: f64,
    status: StepStatus,
    preview: String,
) -> StepRecord {
    StepRecord {
        name: name.to_string(),
        started_at,
        completed_at,
        duration_ms: (completed_at - started_at).max(0.0) * 1000.0,
        status,
        output_preview: truncate_chars(&preview, PREVIEW_CHARS).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_keywords_normalizes_and_caps() {
        let raw: Vec<String> = ["  Rust ", "RUST", "tokio", "", "Async  IO"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(clean_keywords(&raw, 12), vec!["rust", "tokio", "async io"]);
        assert_eq!(clean_keywords(&raw, 2), vec!["rust", "tokio"]);
    }

    #[test]
    fn step_record_duration_never_negative() {
        let record = step_record("extract", 10.0, 9.0, StepStatus::Completed, "x".into());
        assert_eq!(record.duration_ms, 0.0);
    }
}
