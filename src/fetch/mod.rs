//! Chapter fetching on background workers

mod request;
mod service;
mod worker;

use crate::types::{ChapterId, PageRef};

pub use request::{FetchRequest, FetchResponse, RequestId};
pub use service::FetchService;

/// Default number of fetch threads. Two lets a previous and a next
/// chapter download at the same time.
pub const DEFAULT_FETCH_WORKERS: usize = 2;

/// Host capability that turns a chapter id into its ordered page list.
///
/// Called on a worker thread. Errors are reported back to the reader and
/// never retried.
pub trait ChapterSource: Send + Sync + 'static {
    fn fetch_pages(&self, chapter: &ChapterId) -> anyhow::Result<Vec<PageRef>>;
}

impl<F> ChapterSource for F
where
    F: Fn(&ChapterId) -> anyhow::Result<Vec<PageRef>> + Send + Sync + 'static,
{
    fn fetch_pages(&self, chapter: &ChapterId) -> anyhow::Result<Vec<PageRef>> {
        self(chapter)
    }
}
