//! Fetch service - manages the worker pool and in-flight requests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use log::debug;

use super::request::{FetchRequest, FetchResponse, RequestId};
use super::worker::fetch_worker;
use super::{ChapterSource, DEFAULT_FETCH_WORKERS};
use crate::types::{ChapterId, InsertionPosition};

/// Runs the host `ChapterSource` on worker threads.
///
/// Responses are handed back through a channel and only surface from
/// `poll_responses`/`recv_timeout` when their request is still pending, so
/// anything that arrives after `cancel_all` or `shutdown` is dropped.
pub struct FetchService {
    request_tx: Sender<FetchRequest>,
    response_rx: Receiver<FetchResponse>,
    next_request_id: u64,
    pending_requests: HashMap<RequestId, (ChapterId, InsertionPosition)>,
    num_workers: usize,
    shut_down: bool,
}

impl FetchService {
    #[must_use]
    pub fn new(source: Arc<dyn ChapterSource>) -> Self {
        Self::with_workers(source, DEFAULT_FETCH_WORKERS)
    }

    #[must_use]
    pub fn with_workers(source: Arc<dyn ChapterSource>, num_workers: usize) -> Self {
        // flume gives us an MPMC queue so every worker can pull from the
        // same request channel.
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        let num_workers = num_workers.max(1);
        for _ in 0..num_workers {
            let source = source.clone();
            let rx = request_rx.clone();
            let tx = response_tx.clone();

            std::thread::spawn(move || {
                fetch_worker(source, rx, tx);
            });
        }

        Self {
            request_tx,
            response_rx,
            next_request_id: 1,
            pending_requests: HashMap::new(),
            num_workers,
            shut_down: false,
        }
    }

    /// Queue a fetch for `chapter`
    pub fn request(&mut self, chapter: ChapterId, position: InsertionPosition) -> RequestId {
        let id = self.next_id();

        if self.shut_down {
            debug!("Fetch for {chapter} ignored, service is shut down");
            return id;
        }

        let _ = self.request_tx.send(FetchRequest::Chapter {
            id,
            chapter: chapter.clone(),
            position,
        });
        self.pending_requests.insert(id, (chapter, position));

        id
    }

    /// Drain every completed fetch that is still wanted
    pub fn poll_responses(&mut self) -> Vec<FetchResponse> {
        let mut responses = vec![];

        while let Ok(response) = self.response_rx.try_recv() {
            if let Some(response) = self.accept(response) {
                responses.push(response);
            }
        }

        responses
    }

    /// Block until one wanted response arrives or `timeout` elapses
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<FetchResponse> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.response_rx.recv_timeout(remaining) {
                Ok(response) => {
                    if let Some(response) = self.accept(response) {
                        return Some(response);
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn accept(&mut self, response: FetchResponse) -> Option<FetchResponse> {
        if self.pending_requests.remove(&response.id()).is_some() {
            Some(response)
        } else {
            debug!(
                "Discarding stale fetch result for {} (request {})",
                response.chapter(),
                response.id().0
            );
            None
        }
    }

    /// Forget every in-flight request; their results will be discarded
    pub fn cancel_all(&mut self) {
        self.pending_requests.clear();
    }

    #[must_use]
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending_requests.contains_key(&id)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending_requests.len()
    }

    /// Shutdown all workers
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.pending_requests.clear();
        for _ in 0..self.num_workers {
            let _ = self.request_tx.send(FetchRequest::Shutdown);
        }
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }
}

impl Drop for FetchService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageRef;

    fn source() -> Arc<dyn ChapterSource> {
        Arc::new(|chapter: &ChapterId| -> anyhow::Result<Vec<PageRef>> {
            if chapter.as_str() == "broken" {
                anyhow::bail!("404 not found");
            }
            Ok(vec![PageRef::new(format!("{chapter}/0")), PageRef::new(format!("{chapter}/1"))])
        })
    }

    #[test]
    fn fetch_returns_pages() {
        let mut service = FetchService::new(source());
        let id = service.request(ChapterId::new("c1"), InsertionPosition::Next);
        assert!(service.is_pending(id));

        let response = service.recv_timeout(Duration::from_secs(5)).unwrap();
        match response {
            FetchResponse::Pages {
                id: got, pages, ..
            } => {
                assert_eq!(got, id);
                assert_eq!(pages.len(), 2);
            }
            other => panic!("unexpected response {other:?}"),
        }
        assert_eq!(service.in_flight(), 0);
    }

    #[test]
    fn fetch_failure_is_reported() {
        let mut service = FetchService::new(source());
        service.request(ChapterId::new("broken"), InsertionPosition::Previous);

        let response = service.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(response, FetchResponse::Failed { .. }));
        assert_eq!(response.position(), InsertionPosition::Previous);
    }

    #[test]
    fn cancelled_results_are_discarded() {
        let mut service = FetchService::new(source());
        service.request(ChapterId::new("c1"), InsertionPosition::Next);
        service.cancel_all();

        assert!(service.recv_timeout(Duration::from_millis(200)).is_none());
        assert!(service.poll_responses().is_empty());
    }

    #[test]
    fn requests_after_shutdown_are_ignored() {
        let mut service = FetchService::new(source());
        service.shutdown();
        let id = service.request(ChapterId::new("c1"), InsertionPosition::Initial);
        assert!(!service.is_pending(id));
    }
}
