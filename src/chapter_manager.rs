//! Loaded chapter store and neighbor-fetch gate

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info};
use lru::LruCache;

use crate::fetch::{ChapterSource, FetchResponse, FetchService, RequestId};
use crate::page_mapper::LoadedChapter;
use crate::types::{ChapterId, InsertionPosition, LoadDirection, PageRef};

const VISIT_HISTORY: usize = 256;

struct ChapterStore {
    chapters: HashMap<ChapterId, Vec<PageRef>>,
    loading_previous: bool,
    loading_next: bool,
    /// Most recently visited chapters first
    visits: LruCache<ChapterId, ()>,
}

/// Single authority on fetched chapters.
///
/// Every method takes `&self`; state sits behind a mutex so scroll-driven
/// prefetch from either direction can share one manager. At most one fetch
/// per direction is let through by the `start_loading_*` guards.
pub struct ChapterManager {
    store: Mutex<ChapterStore>,
    fetcher: Mutex<FetchService>,
}

impl ChapterManager {
    #[must_use]
    pub fn new(source: Arc<dyn ChapterSource>, fetch_workers: usize) -> Self {
        Self {
            store: Mutex::new(ChapterStore {
                chapters: HashMap::new(),
                loading_previous: false,
                loading_next: false,
                visits: LruCache::new(
                    NonZeroUsize::new(VISIT_HISTORY).unwrap_or(NonZeroUsize::MIN),
                ),
            }),
            fetcher: Mutex::new(FetchService::with_workers(source, fetch_workers)),
        }
    }

    fn store(&self) -> MutexGuard<'_, ChapterStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fetcher(&self) -> MutexGuard<'_, FetchService> {
        self.fetcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_chapter_loaded(&self, chapter: &ChapterId) -> bool {
        self.store().chapters.contains_key(chapter)
    }

    /// Loaded chapters in no particular order
    #[must_use]
    pub fn get_loaded_chapters(&self) -> Vec<LoadedChapter> {
        self.store()
            .chapters
            .iter()
            .map(|(id, pages)| LoadedChapter::new(id.clone(), pages.clone()))
            .collect()
    }

    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.store().chapters.len()
    }

    /// Page refs of the loaded chapters, flattened in `ordered_by` order
    #[must_use]
    pub fn all_page_refs(&self, ordered_by: &[ChapterId]) -> Vec<PageRef> {
        let store = self.store();
        ordered_by
            .iter()
            .filter_map(|id| store.chapters.get(id))
            .flat_map(|pages| pages.iter().cloned())
            .collect()
    }

    /// Insert or replace the page list of `chapter`
    pub fn set_chapter(&self, pages: Vec<PageRef>, chapter: &ChapterId) {
        info!("Chapter {chapter} loaded with {} pages", pages.len());
        self.store().chapters.insert(chapter.clone(), pages);
    }

    /// Drop a chapter's pages, returns whether it was loaded
    pub fn remove_chapter(&self, chapter: &ChapterId) -> bool {
        let removed = self.store().chapters.remove(chapter).is_some();
        if removed {
            info!("Chapter {chapter} evicted");
        }
        removed
    }

    /// Hand the fetch to the host source; the result arrives via `poll_fetches`
    pub fn fetch_chapter(&self, chapter: &ChapterId, position: InsertionPosition) -> RequestId {
        self.fetcher().request(chapter.clone(), position)
    }

    pub fn poll_fetches(&self) -> Vec<FetchResponse> {
        self.fetcher().poll_responses()
    }

    pub fn recv_fetch(&self, timeout: Duration) -> Option<FetchResponse> {
        self.fetcher().recv_timeout(timeout)
    }

    #[must_use]
    pub fn fetches_in_flight(&self) -> usize {
        self.fetcher().in_flight()
    }

    /// Abandon in-flight fetches and release both direction guards
    pub fn cancel_fetches(&self) {
        self.fetcher().cancel_all();
        let mut store = self.store();
        store.loading_previous = false;
        store.loading_next = false;
    }

    pub fn shutdown(&self) {
        self.cancel_fetches();
        self.fetcher().shutdown();
    }

    #[must_use]
    pub fn can_load_previous(&self, current: &ChapterId, candidate: Option<&ChapterId>) -> bool {
        self.can_load(LoadDirection::Previous, current, candidate)
    }

    #[must_use]
    pub fn can_load_next(&self, current: &ChapterId, candidate: Option<&ChapterId>) -> bool {
        self.can_load(LoadDirection::Next, current, candidate)
    }

    fn can_load(
        &self,
        direction: LoadDirection,
        current: &ChapterId,
        candidate: Option<&ChapterId>,
    ) -> bool {
        let store = self.store();
        let loading = match direction {
            LoadDirection::Previous => store.loading_previous,
            LoadDirection::Next => store.loading_next,
        };
        let allowed = !loading && candidate.is_some_and(|id| !store.chapters.contains_key(id));
        debug!(
            "can_load {direction:?} from {current} to {}: {allowed}",
            candidate.map_or("<none>", ChapterId::as_str)
        );
        allowed
    }

    #[must_use]
    pub fn is_loading(&self, direction: LoadDirection) -> bool {
        let store = self.store();
        match direction {
            LoadDirection::Previous => store.loading_previous,
            LoadDirection::Next => store.loading_next,
        }
    }

    #[must_use]
    pub fn is_loading_previous(&self) -> bool {
        self.is_loading(LoadDirection::Previous)
    }

    #[must_use]
    pub fn is_loading_next(&self) -> bool {
        self.is_loading(LoadDirection::Next)
    }

    /// Take the guard for `direction`. Returns false if it is already held.
    pub fn start_loading(&self, direction: LoadDirection) -> bool {
        let mut store = self.store();
        let flag = match direction {
            LoadDirection::Previous => &mut store.loading_previous,
            LoadDirection::Next => &mut store.loading_next,
        };
        if *flag {
            return false;
        }
        *flag = true;
        true
    }

    pub fn finish_loading(&self, direction: LoadDirection) {
        let mut store = self.store();
        match direction {
            LoadDirection::Previous => store.loading_previous = false,
            LoadDirection::Next => store.loading_next = false,
        }
    }

    pub fn start_loading_previous(&self) -> bool {
        self.start_loading(LoadDirection::Previous)
    }

    pub fn finish_loading_previous(&self) {
        self.finish_loading(LoadDirection::Previous);
    }

    pub fn start_loading_next(&self) -> bool {
        self.start_loading(LoadDirection::Next)
    }

    pub fn finish_loading_next(&self) {
        self.finish_loading(LoadDirection::Next);
    }

    /// Mark `chapter` as the most recently visited
    pub fn record_visit(&self, chapter: &ChapterId) {
        self.store().visits.put(chapter.clone(), ());
    }

    /// Pick the least recently visited chapter among `edges`, skipping `protected`.
    ///
    /// Chapters that were never visited rank below every visited one.
    #[must_use]
    pub fn eviction_candidate(
        &self,
        edges: &[ChapterId],
        protected: &[ChapterId],
    ) -> Option<ChapterId> {
        let store = self.store();
        let recency = |id: &ChapterId| {
            store
                .visits
                .iter()
                .position(|(visited, _)| visited == id)
                .unwrap_or(usize::MAX)
        };

        edges
            .iter()
            .filter(|id| !protected.contains(*id) && store.chapters.contains_key(*id))
            .max_by_key(|id| recency(id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ChapterManager {
        let source = |chapter: &ChapterId| -> anyhow::Result<Vec<PageRef>> {
            Ok(vec![PageRef::new(format!("{chapter}/0"))])
        };
        ChapterManager::new(Arc::new(source), 2)
    }

    fn id(s: &str) -> ChapterId {
        ChapterId::new(s)
    }

    #[test]
    fn can_load_next_requires_unloaded_candidate() {
        let manager = manager();
        assert!(manager.can_load_next(&id("c1"), Some(&id("c2"))));
        assert!(!manager.can_load_next(&id("c1"), None));

        manager.set_chapter(vec![PageRef::new("p")], &id("c2"));
        assert!(!manager.can_load_next(&id("c1"), Some(&id("c2"))));
    }

    #[test]
    fn can_load_next_false_while_loading_next() {
        let manager = manager();
        assert!(manager.start_loading_next());
        assert!(manager.is_loading_next());
        assert!(!manager.can_load_next(&id("c1"), Some(&id("c2"))));
        // Previous direction is independent
        assert!(manager.can_load_previous(&id("c1"), Some(&id("c0"))));
        assert!(manager.start_loading_previous());

        assert!(!manager.start_loading_next());
        manager.finish_loading_next();
        assert!(manager.can_load_next(&id("c1"), Some(&id("c2"))));
        assert!(!manager.can_load_previous(&id("c1"), Some(&id("c0"))));
    }

    #[test]
    fn set_chapter_is_upsert() {
        let manager = manager();
        manager.set_chapter(vec![PageRef::new("a")], &id("c1"));
        manager.set_chapter(vec![PageRef::new("a"), PageRef::new("b")], &id("c1"));
        assert_eq!(manager.loaded_count(), 1);
        assert_eq!(manager.get_loaded_chapters()[0].pages.len(), 2);
    }

    #[test]
    fn all_page_refs_follow_order() {
        let manager = manager();
        manager.set_chapter(vec![PageRef::new("b0")], &id("b"));
        manager.set_chapter(vec![PageRef::new("a0"), PageRef::new("a1")], &id("a"));
        let refs = manager.all_page_refs(&[id("a"), id("missing"), id("b")]);
        let refs: Vec<&str> = refs.iter().map(PageRef::as_str).collect();
        assert_eq!(refs, ["a0", "a1", "b0"]);
    }

    #[test]
    fn fetch_goes_through_source() {
        let manager = manager();
        manager.fetch_chapter(&id("c9"), InsertionPosition::Next);
        let response = manager.recv_fetch(Duration::from_secs(5)).unwrap();
        assert_eq!(response.chapter(), &id("c9"));
        assert_eq!(manager.fetches_in_flight(), 0);
    }

    #[test]
    fn cancel_releases_guards() {
        let manager = manager();
        manager.start_loading_previous();
        manager.start_loading_next();
        manager.cancel_fetches();
        assert!(!manager.is_loading_previous());
        assert!(!manager.is_loading_next());
    }

    #[test]
    fn eviction_prefers_least_recent_edge() {
        let manager = manager();
        for chapter in ["c1", "c2", "c3"] {
            manager.set_chapter(vec![PageRef::new("p")], &id(chapter));
        }
        manager.record_visit(&id("c3"));
        manager.record_visit(&id("c1"));
        manager.record_visit(&id("c2"));

        let edges = [id("c1"), id("c3")];
        assert_eq!(manager.eviction_candidate(&edges, &[id("c2")]), Some(id("c3")));
        // Protected chapters are never picked
        assert_eq!(manager.eviction_candidate(&edges, &[id("c3")]), Some(id("c1")));
        assert_eq!(manager.eviction_candidate(&edges, &[id("c1"), id("c3")]), None);

        // Never visited ranks below everything
        manager.set_chapter(vec![PageRef::new("p")], &id("c4"));
        assert_eq!(
            manager.eviction_candidate(&[id("c1"), id("c4")], &[]),
            Some(id("c4"))
        );
    }
}
