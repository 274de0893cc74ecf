//! Pipeline run telemetry.
//!
//! Every visit leaves a run record with one entry per pipeline step.
//! The buffer keeps the 20 most recent runs in memory, keyed by a
//! monotonically increasing id; it does not survive a restart.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Runs retained in the buffer.
pub const RUN_BUFFER_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Skipped,
    Failed,
}

/// Timing and outcome of one pipeline step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub started_at: f64,
    pub completed_at: f64,
    pub duration_ms: f64,
    pub status: StepStatus,
    pub output_preview: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// One visit's trip through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub id: u64,
    pub url: String,
    pub title: String,
    pub started_at: f64,
    pub completed_at: Option<f64>,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    runs: VecDeque<PipelineRun>,
    next_id: u64,
}

/// Bounded ring of recent runs behind its own short-lived lock.
#[derive(Debug)]
pub struct RunBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Default for RunBuffer {
    fn default() -> Self {
        Self::new(RUN_BUFFER_CAPACITY)
    }
}

impl RunBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
        }
    }

    /// Open a run in `Running` state, evicting the oldest beyond capacity.
    pub fn begin(&self, url: &str, title: &str, started_at: f64) -> u64 {
        let mut inner = self.inner.lock().expect("run buffer lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.runs.push_back(PipelineRun {
            id,
            url: url.to_string(),
            title: title.to_string(),
            started_at,
            completed_at: None,
            status: RunStatus::Running,
            steps: Vec::new(),
        });
        while inner.runs.len() > self.capacity {
            inner.runs.pop_front();
        }
        id
    }

    /// Close a run with its final status and step records. A run already
    /// evicted from the buffer is silently dropped.
    pub fn finish(
        &self,
        id: u64,
        status: RunStatus,
        completed_at: f64,
        steps: Vec<StepRecord>,
    ) {
        let mut inner = self.inner.lock().expect("run buffer lock poisoned");
        if let Some(run) = inner.runs.iter_mut().find(|run| run.id == id) {
            run.status = status;
            run.completed_at = Some(completed_at);
            run.steps = steps;
        }
    }

    /// All buffered runs, oldest first.
    pub fn runs(&self) -> Vec<PipelineRun> {
        self.inner
            .lock()
            .expect("run buffer lock poisoned")
            .runs
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_and_capacity_holds() {
        let buffer = RunBuffer::new(3);
        for i in 0..5 {
            let id = buffer.begin(&format!("u{}", i), "t", i as f64);
            assert_eq!(id, i);
        }
        let runs = buffer.runs();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].id, 2);
        assert_eq!(runs[2].id, 4);
    }

    #[test]
    fn finish_updates_in_place() {
        let buffer = RunBuffer::new(3);
        let id = buffer.begin("u", "t", 1.0);
        buffer.finish(
            id,
            RunStatus::Completed,
            2.0,
            vec![StepRecord {
                name: "extract".into(),
                started_at: 1.0,
                completed_at: 1.5,
                duration_ms: 500.0,
                status: StepStatus::Completed,
                output_preview: "react, hooks".into(),
            }],
        );
        let runs = buffer.runs();
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].completed_at, Some(2.0));
        assert_eq!(runs[0].steps.len(), 1);
    }

    #[test]
    fn finishing_an_evicted_run_is_a_no_op() {
        let buffer = RunBuffer::new(1);
        let old = buffer.begin("u0", "t", 1.0);
        buffer.begin("u1", "t", 2.0);
        buffer.finish(old, RunStatus::Completed, 3.0, Vec::new());
        let runs = buffer.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].url, "u1");
        assert_eq!(runs[0].status, RunStatus::Running);
    }
}
