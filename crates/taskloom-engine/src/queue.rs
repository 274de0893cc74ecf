//! The visit admission queue.
//!
//! A FIFO of pending visits with three admission rules: browser-internal
//! URLs never enter, a URL accepted within the debounce window is
//! rejected, and a newer visit for an already-queued URL supersedes the
//! queued one in place (inheriting its waiters, so every caller observes
//! the finally published document). The single pipeline worker is the
//! only consumer.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use taskloom_core::enrich::ContextDocument;
use taskloom_core::error::{EngineError, Result};
use taskloom_core::types::PageVisit;
use tokio::sync::{oneshot, Notify};

/// URL prefixes that identify browser-internal pages.
const INTERNAL_URL_PREFIXES: &[&str] = &[
    "about:",
    "chrome:",
    "chrome-extension:",
    "moz-extension:",
    "edge:",
    "brave:",
    "opera:",
    "vivaldi:",
    "devtools:",
    "view-source:",
];

/// Local files are treated like internal pages unless the engine opts in
/// (`allow_file_urls`).
const FILE_URL_PREFIX: &str = "file:";

/// Whether a URL belongs to the browser itself.
pub fn is_internal_url(url: &str) -> bool {
    INTERNAL_URL_PREFIXES
        .iter()
        .any(|prefix| url.starts_with(prefix))
}

/// Channel half a waiting `analyze` call receives its document on.
pub type VisitResponder = oneshot::Sender<Result<Arc<ContextDocument>>>;

/// A queued visit plus everyone waiting on its outcome.
pub struct VisitJob {
    pub visit: PageVisit,
    pub responders: Vec<VisitResponder>,
}

#[derive(Default)]
struct Inner {
    jobs: VecDeque<VisitJob>,
    /// Acceptance time per URL, for debouncing.
    last_accepted: HashMap<String, f64>,
    closed: bool,
}

/// Coalescing single-consumer visit queue.
pub struct VisitQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    debounce_ms: u64,
    allow_file_urls: bool,
}

impl VisitQueue {
    pub fn new(debounce_ms: u64, allow_file_urls: bool) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            debounce_ms,
            allow_file_urls,
        }
    }

    /// Admit a visit, or reject it with the reason.
    pub fn push(&self, visit: PageVisit, responder: VisitResponder, now: f64) -> Result<()> {
        if is_internal_url(&visit.url)
            || (!self.allow_file_urls && visit.url.starts_with(FILE_URL_PREFIX))
        {
            return Err(EngineError::internal_scheme(visit.url));
        }

        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return Err(EngineError::ShutdownInProgress);
        }
        if let Some(&accepted_at) = inner.last_accepted.get(&visit.url) {
            if (now - accepted_at) * 1000.0 < self.debounce_ms as f64 {
                return Err(EngineError::debounced(visit.url));
            }
        }

        inner.last_accepted.insert(visit.url.clone(), now);
        if let Some(job) = inner.jobs.iter_mut().find(|job| job.visit.url == visit.url) {
            // Supersede in place: keep the queue position, inherit waiters.
            job.visit = visit;
            job.responders.push(responder);
        } else {
            inner.jobs.push_back(VisitJob {
                visit,
                responders: vec![responder],
            });
        }
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// Next job in enqueue order. After `close`, keeps yielding until the
    /// queue is drained, then returns `None`.
    pub async fn pop(&self) -> Option<VisitJob> {
        loop {
            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if let Some(job) = inner.jobs.pop_front() {
                    return Some(job);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop admitting visits. Already-queued jobs remain poppable.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Remove and return everything still queued (shutdown abort path).
    pub fn drain(&self) -> Vec<VisitJob> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.jobs.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(url: &str, ts: f64) -> PageVisit {
        PageVisit {
            url: url.to_string(),
            title: "t".to_string(),
            content: String::new(),
            summary: None,
            keywords: None,
            timestamp: ts,
        }
    }

    fn responder() -> VisitResponder {
        oneshot::channel().0
    }

    #[test]
    fn rejects_internal_urls() {
        let queue = VisitQueue::new(0, false);
        let err = queue
            .push(visit("chrome://settings", 0.0), responder(), 0.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::Admission(_)));
        assert!(queue.is_empty());
    }

    #[test]
    fn file_urls_need_the_opt_in() {
        let closed = VisitQueue::new(0, false);
        let err = closed
            .push(visit("file:///home/me/notes.html", 0.0), responder(), 0.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::Admission(_)));
        assert!(closed.is_empty());

        let open = VisitQueue::new(0, true);
        open.push(visit("file:///home/me/notes.html", 0.0), responder(), 0.0)
            .unwrap();
        assert_eq!(open.len(), 1);

        // The opt-in does not loosen browser-internal rejection.
        let err = open
            .push(visit("about:blank", 1.0), responder(), 1.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::Admission(_)));
    }

    #[test]
    fn debounces_same_url() {
        let queue = VisitQueue::new(5000, false);
        queue.push(visit("https://a", 100.0), responder(), 100.0).unwrap();
        let err = queue
            .push(visit("https://a", 101.0), responder(), 101.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::Admission(_)));

        // Other URLs are unaffected, and the window eventually passes.
        queue.push(visit("https://b", 101.0), responder(), 101.0).unwrap();
        queue.push(visit("https://a", 106.0), responder(), 106.0).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn coalesces_same_url_keeping_position() {
        let queue = VisitQueue::new(0, false);
        queue.push(visit("https://a", 1.0), responder(), 1.0).unwrap();
        queue.push(visit("https://b", 2.0), responder(), 2.0).unwrap();
        queue.push(visit("https://a", 3.0), responder(), 3.0).unwrap();
        assert_eq!(queue.len(), 2);

        let first = queue.pop().await.unwrap();
        assert_eq!(first.visit.url, "https://a");
        // The newer timestamp won; both callers wait on the same job.
        assert_eq!(first.visit.timestamp, 3.0);
        assert_eq!(first.responders.len(), 2);

        let second = queue.pop().await.unwrap();
        assert_eq!(second.visit.url, "https://b");
    }

    #[tokio::test]
    async fn close_rejects_new_and_drains_old() {
        let queue = VisitQueue::new(0, false);
        queue.push(visit("https://a", 1.0), responder(), 1.0).unwrap();
        queue.close();

        let err = queue
            .push(visit("https://b", 2.0), responder(), 2.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::ShutdownInProgress));

        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }
}
