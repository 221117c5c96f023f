//! Reader session orchestration
//!
//! `ReaderCoordinator` owns one reading session: the host's chapter order,
//! the loaded chapters, the mapping into the list widget and the state
//! machine gating every load. It is driven from the host event loop:
//! scroll events go to [`ReaderCoordinator::handle_scroll`], and
//! [`ReaderCoordinator::poll`] picks up finished fetches and fires due
//! debounced notifications.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::callbacks::{CallbackManager, ReaderListener};
use crate::chapter_manager::ChapterManager;
use crate::error::ReaderError;
use crate::fetch::{ChapterSource, FetchResponse, RequestId};
use crate::insertion::{InsertionStrategy, Restoration};
use crate::page_mapper::PageMapper;
use crate::scroll::ReaderScrollHandler;
use crate::settings::ReaderSettings;
use crate::state_machine::{ReaderState, ReaderStateMachine};
use crate::types::{
    CallbackContext, ChangeReason, ChapterId, InsertionPosition, LoadDirection, PageRef,
    ReadableChapter, ReadingMode,
};
use crate::viewport::VirtualizedList;

/// A load the coordinator asked for
#[derive(Clone, Debug, PartialEq, Eq)]
struct LoadRequest {
    position: InsertionPosition,
    chapter: ChapterId,
    /// Jump to the chapter's first page once it is in the list
    jump_after: bool,
}

impl LoadRequest {
    fn direction(&self) -> Option<LoadDirection> {
        match self.position {
            InsertionPosition::Initial => None,
            InsertionPosition::Previous => Some(LoadDirection::Previous),
            InsertionPosition::Next => Some(LoadDirection::Next),
        }
    }
}

#[derive(Debug)]
struct ActiveLoad {
    request: LoadRequest,
    id: RequestId,
}

pub struct ReaderCoordinator<L: VirtualizedList> {
    order: Vec<ChapterId>,
    chapters: Vec<ReadableChapter>,
    settings: ReaderSettings,
    mode: ReadingMode,
    list: L,
    mapper: PageMapper,
    chapter_manager: ChapterManager,
    state: ReaderStateMachine,
    insertion: InsertionStrategy,
    callbacks: CallbackManager,
    scroll_handler: ReaderScrollHandler,
    starting_chapter: ChapterId,
    initial_page: usize,
    current: Option<(ChapterId, usize)>,
    active_load: Option<ActiveLoad>,
    failed_load: Option<LoadRequest>,
    is_scrolling: bool,
    torn_down: bool,
}

impl<L: VirtualizedList> ReaderCoordinator<L> {
    pub fn new(
        chapters: Vec<ReadableChapter>,
        source: Arc<dyn ChapterSource>,
        starting_chapter: ChapterId,
        list: L,
        listener: impl ReaderListener + 'static,
    ) -> Result<Self, ReaderError> {
        Self::with_settings(
            chapters,
            source,
            starting_chapter,
            list,
            listener,
            ReaderSettings::default(),
        )
    }

    pub fn with_settings(
        mut chapters: Vec<ReadableChapter>,
        source: Arc<dyn ChapterSource>,
        starting_chapter: ChapterId,
        list: L,
        listener: impl ReaderListener + 'static,
        settings: ReaderSettings,
    ) -> Result<Self, ReaderError> {
        let settings = settings.normalized();

        chapters.sort_by_key(|chapter| chapter.index);
        let mut order: Vec<ChapterId> = Vec::with_capacity(chapters.len());
        chapters.retain(|chapter| {
            if order.contains(&chapter.id) {
                warn!("Duplicate chapter id {} ignored", chapter.id);
                false
            } else {
                order.push(chapter.id.clone());
                true
            }
        });

        if !order.contains(&starting_chapter) {
            return Err(ReaderError::Mapping {
                chapter: starting_chapter,
                page: 0,
            });
        }

        let callbacks = CallbackManager::with_delays(
            listener,
            settings.page_debounce(),
            settings.chapter_debounce(),
        );

        Ok(Self {
            order,
            chapters,
            mode: settings.reading_mode,
            list,
            mapper: PageMapper::new(),
            chapter_manager: ChapterManager::new(source, settings.fetch_workers),
            state: ReaderStateMachine::new(),
            insertion: InsertionStrategy::new(settings.drift_tolerance),
            callbacks,
            scroll_handler: ReaderScrollHandler::new(),
            starting_chapter,
            initial_page: 0,
            current: None,
            active_load: None,
            failed_load: None,
            is_scrolling: false,
            torn_down: false,
            settings,
        })
    }

    /// Page of the starting chapter to open at (clamped to the chapter)
    #[must_use]
    pub fn with_initial_page(mut self, page: usize) -> Self {
        self.initial_page = page;
        self
    }

    /// Register a state observer, called as `observer(old, new)`
    pub fn observe_state(&mut self, observer: impl FnMut(&ReaderState, &ReaderState) + 'static) {
        self.state.observe(observer);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    #[must_use]
    pub fn state(&self) -> &ReaderState {
        self.state.state()
    }

    #[must_use]
    pub fn current_chapter(&self) -> Option<&ChapterId> {
        self.current.as_ref().map(|(chapter, _)| chapter)
    }

    #[must_use]
    pub fn current_page(&self) -> Option<usize> {
        self.current.as_ref().map(|(_, page)| *page)
    }

    /// Pages in the current chapter
    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.current_chapter()
            .map_or(0, |chapter| self.mapper.get_current_chapter_page_count(chapter))
    }

    #[must_use]
    pub fn can_go_to_previous_chapter(&self) -> bool {
        self.current_chapter()
            .and_then(|chapter| self.neighbor(chapter, LoadDirection::Previous))
            .is_some()
    }

    #[must_use]
    pub fn can_go_to_next_chapter(&self) -> bool {
        self.current_chapter()
            .and_then(|chapter| self.neighbor(chapter, LoadDirection::Next))
            .is_some()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    #[must_use]
    pub fn is_loading_initial(&self) -> bool {
        *self.state.state() == ReaderState::LoadingInitial
    }

    #[must_use]
    pub fn is_loading_chapter(&self) -> bool {
        matches!(
            self.state.state(),
            ReaderState::LoadingPrevious | ReaderState::LoadingNext
        )
    }

    #[must_use]
    pub fn error(&self) -> Option<&ReaderError> {
        self.state.state().error()
    }

    #[must_use]
    pub fn reading_mode(&self) -> ReadingMode {
        self.mode
    }

    #[must_use]
    pub fn chapters(&self) -> &[ReadableChapter] {
        &self.chapters
    }

    /// Items the list should show
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.mapper.total_pages()
    }

    /// Page shown by list item `index`
    #[must_use]
    pub fn page_ref(&self, index: usize) -> Option<&PageRef> {
        self.mapper.page_ref(index)
    }

    #[must_use]
    pub fn page_mapper(&self) -> &PageMapper {
        &self.mapper
    }

    /// Loaded chapters in reading order
    #[must_use]
    pub fn loaded_chapters(&self) -> Vec<ChapterId> {
        self.order
            .iter()
            .filter(|id| self.mapper.contains_chapter(id))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn list(&self) -> &L {
        &self.list
    }

    /// Direct access for hosts that feed gestures into the widget
    pub fn list_mut(&mut self) -> &mut L {
        &mut self.list
    }

    /// Earliest debounce deadline, for sizing the event-loop poll timeout
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.callbacks.next_deadline()
    }

    /// Whether a chapter fetch is outstanding
    #[must_use]
    pub fn has_pending_fetch(&self) -> bool {
        self.active_load.is_some()
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Fetch the starting chapter. Returns whether the load was started.
    pub fn start(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        if !self.state.transition(ReaderState::LoadingInitial) {
            return false;
        }

        info!(
            "Reader session starting at {} ({} chapters, {} mode)",
            self.starting_chapter,
            self.order.len(),
            self.mode.as_str()
        );
        self.callbacks.reset();
        self.begin_fetch(LoadRequest {
            position: InsertionPosition::Initial,
            chapter: self.starting_chapter.clone(),
            jump_after: false,
        });
        true
    }

    /// Tear the session down. Pending timers are cancelled and fetches
    /// still in flight are discarded when they finish.
    pub fn shutdown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.active_load = None;
        self.callbacks.reset();
        self.chapter_manager.shutdown();
        info!("Reader session torn down");
    }

    /// Drain finished fetches and fire due notifications.
    /// Returns how many fetch results were applied.
    pub fn poll(&mut self) -> usize {
        if self.torn_down {
            return 0;
        }

        let responses = self.chapter_manager.poll_fetches();
        let applied = responses.len();
        for response in responses {
            self.apply_fetch(response);
        }
        self.callbacks.flush_due(Instant::now());
        applied
    }

    /// Wait up to `timeout` for a fetch to finish, then `poll`
    pub fn poll_blocking(&mut self, timeout: Duration) -> usize {
        if self.torn_down {
            return 0;
        }

        let mut applied = 0;
        if let Some(response) = self.chapter_manager.recv_fetch(timeout) {
            self.apply_fetch(response);
            applied += 1;
        }
        applied + self.poll()
    }

    // ------------------------------------------------------------------
    // Host input
    // ------------------------------------------------------------------

    /// Call after every scroll of the list widget
    pub fn handle_scroll(&mut self) {
        if self.torn_down || self.mapper.is_empty() {
            return;
        }
        if matches!(
            self.state.state(),
            ReaderState::Inserting | ReaderState::Settling
        ) {
            return;
        }

        if let Some(anchor) = self
            .insertion
            .capture_anchor(&self.list, &self.mapper, self.mode)
        {
            self.set_current(anchor.chapter_id, anchor.page_in_chapter);
            self.notify_position(ChangeReason::UserScroll);
        }
        self.check_edges();
    }

    pub fn set_scrolling(&mut self, is_scrolling: bool) {
        if self.torn_down || self.is_scrolling == is_scrolling {
            return;
        }
        self.is_scrolling = is_scrolling;
        self.callbacks.emit_scroll_state_change(is_scrolling);
    }

    /// Switch layout, keeping the reader on the same page
    pub fn set_reading_mode(&mut self, mode: ReadingMode) {
        if self.torn_down || mode == self.mode {
            return;
        }

        let anchor = self
            .insertion
            .capture_anchor(&self.list, &self.mapper, self.mode);
        info!("Reading mode {} -> {}", self.mode.as_str(), mode.as_str());
        self.mode = mode;
        self.list.reload_all(self.mapper.total_pages());

        let target = anchor
            .as_ref()
            .and_then(|a| self.mapper.get_global_index(&a.chapter_id, a.page_in_chapter))
            .or_else(|| {
                self.current
                    .as_ref()
                    .and_then(|(chapter, page)| self.mapper.get_global_index(chapter, *page))
            });
        if let Some(index) = target {
            self.list.scroll_to_item(index, false);
        }
    }

    /// Scroll straight to `page` of `chapter`. Fails with a `Transition`
    /// error once the session is torn down.
    pub fn jump_to_page(
        &mut self,
        page: usize,
        chapter: &ChapterId,
        animated: bool,
    ) -> Result<(), ReaderError> {
        if self.torn_down {
            return Err(ReaderError::Transition {
                from: "torn_down",
                to: "programmatic_jump",
            });
        }
        let index = self
            .mapper
            .get_global_index(chapter, page)
            .ok_or_else(|| ReaderError::Mapping {
                chapter: chapter.clone(),
                page,
            })?;

        debug!("Jumping to {chapter}:{page} (index {index})");
        self.list.scroll_to_item(index, animated);
        self.set_current(chapter.clone(), page);
        self.notify_position(ChangeReason::ProgrammaticJump);
        self.check_edges();
        Ok(())
    }

    /// Go to the chapter after the current one, loading it if needed
    pub fn next_chapter(&mut self) -> bool {
        self.navigate(LoadDirection::Next)
    }

    /// Go to the chapter before the current one, loading it if needed
    pub fn previous_chapter(&mut self) -> bool {
        self.navigate(LoadDirection::Previous)
    }

    /// Re-run the load that failed
    pub fn retry(&mut self) -> bool {
        if self.torn_down || self.error().is_none() {
            return false;
        }
        let Some(request) = self.failed_load.take() else {
            return false;
        };

        info!("Retrying {:?} load of {}", request.position, request.chapter);
        match request.direction() {
            None => {
                if !self.state.transition(ReaderState::LoadingInitial) {
                    self.failed_load = Some(request);
                    return false;
                }
                self.callbacks.reset();
                self.begin_fetch(request);
                true
            }
            Some(direction) => {
                self.state.recover();
                let started = self.request_load(direction, request.chapter.clone(), request.jump_after);
                if !started {
                    self.failed_load = Some(request);
                }
                started
            }
        }
    }

    /// Leave the error state without retrying
    pub fn clear_error(&mut self) -> bool {
        if self.torn_down || self.error().is_none() {
            return false;
        }
        self.failed_load = None;

        if self.mapper.is_empty() {
            self.callbacks.reset();
            self.state.transition(ReaderState::Idle)
        } else {
            self.state.recover()
        }
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    fn neighbor(&self, chapter: &ChapterId, direction: LoadDirection) -> Option<&ChapterId> {
        let position = self.order.iter().position(|id| id == chapter)?;
        match direction {
            LoadDirection::Previous => position.checked_sub(1).and_then(|p| self.order.get(p)),
            LoadDirection::Next => self.order.get(position + 1),
        }
    }

    /// First or last loaded chapter in reading order
    fn loaded_edge(&self, direction: LoadDirection) -> Option<&ChapterId> {
        let mut loaded = self
            .order
            .iter()
            .filter(|id| self.mapper.contains_chapter(id));
        match direction {
            LoadDirection::Previous => loaded.next(),
            LoadDirection::Next => loaded.last(),
        }
    }

    fn navigate(&mut self, direction: LoadDirection) -> bool {
        if self.torn_down {
            return false;
        }
        let Some(candidate) = self
            .current_chapter()
            .and_then(|chapter| self.neighbor(chapter, direction))
            .cloned()
        else {
            return false;
        };
        self.request_load(direction, candidate, true)
    }

    fn check_edges(&mut self) {
        if !self.state.is_ready() {
            return;
        }

        let geometry = self.list.geometry();
        let mut load_previous = false;
        let mut load_next = false;
        self.scroll_handler.handle_scroll(
            &geometry,
            self.mode,
            self.settings.prefetch_threshold,
            || load_previous = true,
            || load_next = true,
        );

        // Only one load passes the state gate at a time; the other edge is
        // checked again once this one settles.
        if load_next {
            self.prefetch(LoadDirection::Next);
        }
        if load_previous {
            self.prefetch(LoadDirection::Previous);
        }
    }

    fn prefetch(&mut self, direction: LoadDirection) -> bool {
        let Some(candidate) = self
            .loaded_edge(direction)
            .and_then(|edge| self.neighbor(edge, direction))
            .cloned()
        else {
            return false;
        };
        self.request_load(direction, candidate, false)
    }

    fn request_load(&mut self, direction: LoadDirection, candidate: ChapterId, jump_after: bool) -> bool {
        let Some(current) = self.current_chapter().cloned() else {
            return false;
        };

        let loading_state = match direction {
            LoadDirection::Previous => ReaderState::LoadingPrevious,
            LoadDirection::Next => ReaderState::LoadingNext,
        };

        if self.chapter_manager.is_chapter_loaded(&candidate) {
            if !jump_after {
                return false;
            }
            // Already in the list: pass through the loading state and go there
            if !self.state.transition(loading_state) {
                return false;
            }
            self.state.transition(ReaderState::Ready);
            self.jump_to_chapter_start(&candidate);
            return true;
        }

        let allowed = match direction {
            LoadDirection::Previous => self
                .chapter_manager
                .can_load_previous(&current, Some(&candidate)),
            LoadDirection::Next => self.chapter_manager.can_load_next(&current, Some(&candidate)),
        };
        if !allowed {
            return false;
        }
        if !self.state.transition(loading_state) {
            return false;
        }
        if !self.chapter_manager.start_loading(direction) {
            self.state.transition(ReaderState::Ready);
            return false;
        }

        self.begin_fetch(LoadRequest {
            position: direction.into(),
            chapter: candidate,
            jump_after,
        });
        true
    }

    fn begin_fetch(&mut self, request: LoadRequest) {
        info!("Loading chapter {} ({:?})", request.chapter, request.position);
        let id = self
            .chapter_manager
            .fetch_chapter(&request.chapter, request.position);
        self.active_load = Some(ActiveLoad { request, id });
    }

    fn apply_fetch(&mut self, response: FetchResponse) {
        let Some(active) = self.active_load.take() else {
            debug!("Ignoring fetch result for {} with no active load", response.chapter());
            return;
        };
        if active.id != response.id() {
            debug!("Ignoring fetch result for {}, request superseded", response.chapter());
            self.active_load = Some(active);
            return;
        }

        match response {
            FetchResponse::Pages { pages, .. } if !pages.is_empty() => {
                self.complete_load(active.request, pages);
            }
            FetchResponse::Pages { chapter, .. } => {
                let error = ReaderError::Fetch {
                    chapter,
                    detail: "chapter has no pages".to_string(),
                };
                self.fail_load(active.request, error);
            }
            FetchResponse::Failed { error, .. } => {
                self.fail_load(active.request, error);
            }
        }
    }

    fn complete_load(&mut self, request: LoadRequest, pages: Vec<PageRef>) {
        let position = request.position;
        let chapter = request.chapter.clone();
        let page_count = pages.len();

        let anchor = match position {
            InsertionPosition::Initial => None,
            _ => self
                .insertion
                .capture_anchor(&self.list, &self.mapper, self.mode),
        };

        if !self.state.transition(ReaderState::Inserting) {
            warn!("Dropping pages of {chapter}, reader left its loading state");
            if let Some(direction) = request.direction() {
                self.chapter_manager.finish_loading(direction);
            }
            return;
        }

        let old_count = self.mapper.total_pages();
        self.chapter_manager.set_chapter(pages, &chapter);
        self.rebuild_mapping();
        let new_count = self.mapper.total_pages();

        let mode = self.mode;
        let outcome = self
            .callbacks
            .suppress_during(ChangeReason::PreloadInsert, |_| {
                self.insertion.perform_anchored_insertion(
                    &mut self.list,
                    position,
                    anchor.as_ref(),
                    old_count,
                    new_count,
                    &self.mapper,
                    mode,
                )
            });
        if outcome.restoration == Restoration::Unresolved {
            debug!("Anchor lost while inserting {chapter}");
        }

        if position == InsertionPosition::Initial {
            let page = self.initial_page.min(page_count.saturating_sub(1));
            if let Some(index) = self.mapper.get_global_index(&chapter, page) {
                self.list.scroll_to_item(index, false);
            }
            self.set_current(chapter.clone(), page);
        }

        self.state.transition(ReaderState::Settling);
        self.state.transition(ReaderState::Ready);
        if let Some(direction) = request.direction() {
            self.chapter_manager.finish_loading(direction);
        }

        self.callbacks.emit_chapter_load_complete(chapter.clone(), page_count);
        let reason = match position {
            InsertionPosition::Initial => ChangeReason::InitialLoad,
            _ => ChangeReason::PreloadInsert,
        };
        self.notify_position(reason);

        if request.jump_after {
            self.jump_to_chapter_start(&chapter);
        }

        self.evict_excess(&chapter);
        self.check_edges();
    }

    fn fail_load(&mut self, request: LoadRequest, error: ReaderError) {
        warn!("Load of {} failed: {error}", request.chapter);
        if let Some(direction) = request.direction() {
            self.chapter_manager.finish_loading(direction);
        }
        self.failed_load = Some(request);
        self.state.transition(ReaderState::Error(error.clone()));
        self.callbacks.emit_error(error);
    }

    fn jump_to_chapter_start(&mut self, chapter: &ChapterId) {
        if let Err(err) = self.jump_to_page(0, chapter, false) {
            warn!("Could not jump to {chapter}: {err}");
        }
    }

    fn rebuild_mapping(&mut self) {
        let loaded = self.chapter_manager.get_loaded_chapters();
        self.mapper.update_mapping(&loaded, &self.order);
    }

    /// Evict edge chapters until the loaded set fits `max_loaded_chapters`
    fn evict_excess(&mut self, just_loaded: &ChapterId) {
        while self.chapter_manager.loaded_count() > self.settings.max_loaded_chapters {
            let mut edges: Vec<ChapterId> = [LoadDirection::Previous, LoadDirection::Next]
                .into_iter()
                .filter_map(|direction| self.loaded_edge(direction).cloned())
                .collect();
            edges.dedup();

            let mut protected = vec![just_loaded.clone()];
            if let Some(current) = self.current_chapter() {
                protected.push(current.clone());
            }

            let Some(victim) = self.chapter_manager.eviction_candidate(&edges, &protected) else {
                break;
            };
            let Some(range) = self.mapper.chapter_range(&victim) else {
                break;
            };

            let anchor = self
                .insertion
                .capture_anchor(&self.list, &self.mapper, self.mode);
            self.chapter_manager.remove_chapter(&victim);
            self.rebuild_mapping();

            let mode = self.mode;
            self.callbacks
                .suppress_during(ChangeReason::PreloadInsert, |_| {
                    self.insertion.perform_anchored_removal(
                        &mut self.list,
                        range,
                        anchor.as_ref(),
                        &self.mapper,
                        mode,
                    )
                });
        }
    }

    // ------------------------------------------------------------------
    // Position tracking
    // ------------------------------------------------------------------

    fn set_current(&mut self, chapter: ChapterId, page: usize) {
        let chapter_changed = self.current_chapter() != Some(&chapter);
        if chapter_changed {
            self.chapter_manager.record_visit(&chapter);
        }
        self.current = Some((chapter, page));
    }

    fn notify_position(&mut self, reason: ChangeReason) {
        let Some((chapter, page)) = self.current.clone() else {
            return;
        };
        let context = CallbackContext {
            total_pages: self.mapper.get_current_chapter_page_count(&chapter),
            chapter_id: chapter,
            page,
            reason,
        };
        self.callbacks.emit_page_change(context.clone());
        self.callbacks.emit_chapter_change(context);
    }
}

impl<L: VirtualizedList> Drop for ReaderCoordinator<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
