//! Outward notifications with dedup, debounce and suppression

use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::error::ReaderError;
use crate::types::{CallbackContext, ChangeReason, ChapterId};

pub const PAGE_DEBOUNCE: Duration = Duration::from_millis(100);
pub const CHAPTER_DEBOUNCE: Duration = Duration::from_millis(200);

/// Notification delivered to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    PageChanged(CallbackContext),
    ChapterChanged(CallbackContext),
    ScrollStateChanged { is_scrolling: bool },
    Error(ReaderError),
    ChapterLoadComplete { chapter: ChapterId, page_count: usize },
}

/// Receiver of reader notifications
pub trait ReaderListener {
    fn on_event(&mut self, event: ReaderEvent);
}

impl ReaderListener for flume::Sender<ReaderEvent> {
    fn on_event(&mut self, event: ReaderEvent) {
        // Host dropped its receiver; nothing left to notify
        let _ = self.send(event);
    }
}

/// Listener that drops everything
pub struct NoopListener;

impl ReaderListener for NoopListener {
    fn on_event(&mut self, _event: ReaderEvent) {}
}

/// A debounced emission waiting for its deadline
#[derive(Debug)]
struct PendingEmit {
    context: CallbackContext,
    deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Page,
    Chapter,
}

/// Gatekeeper for page/chapter notifications.
///
/// Page and chapter changes are dropped while suppressed or when equal to
/// the last delivered value. `UserScroll` changes are trailing-debounced;
/// every other reason is delivered immediately. Timers are plain deadlines
/// owned here and fired by `flush_due` from the host event loop.
pub struct CallbackManager {
    listener: Box<dyn ReaderListener>,
    page_delay: Duration,
    chapter_delay: Duration,
    pending_page: Option<PendingEmit>,
    pending_chapter: Option<PendingEmit>,
    last_page: Option<(ChapterId, usize)>,
    last_chapter: Option<ChapterId>,
    suppress_depth: usize,
}

impl CallbackManager {
    pub fn new(listener: impl ReaderListener + 'static) -> Self {
        Self::with_delays(listener, PAGE_DEBOUNCE, CHAPTER_DEBOUNCE)
    }

    pub fn with_delays(
        listener: impl ReaderListener + 'static,
        page_delay: Duration,
        chapter_delay: Duration,
    ) -> Self {
        Self {
            listener: Box::new(listener),
            page_delay,
            chapter_delay,
            pending_page: None,
            pending_chapter: None,
            last_page: None,
            last_chapter: None,
            suppress_depth: 0,
        }
    }

    pub fn emit_page_change(&mut self, context: CallbackContext) {
        self.emit_page_change_at(context, Instant::now());
    }

    pub fn emit_chapter_change(&mut self, context: CallbackContext) {
        self.emit_chapter_change_at(context, Instant::now());
    }

    pub fn emit_page_change_at(&mut self, context: CallbackContext, now: Instant) {
        self.emit(Dimension::Page, context, now);
    }

    pub fn emit_chapter_change_at(&mut self, context: CallbackContext, now: Instant) {
        self.emit(Dimension::Chapter, context, now);
    }

    fn emit(&mut self, dimension: Dimension, context: CallbackContext, now: Instant) {
        if self.is_suppressed() {
            trace!("Suppressed {dimension:?} change {context:?}");
            return;
        }

        let user_scroll = context.reason == ChangeReason::UserScroll;
        if self.is_duplicate(dimension, &context) {
            // Back at the delivered value: whatever was pending is stale
            *self.pending_slot(dimension) = None;
            return;
        }

        let delay = match (user_scroll, dimension) {
            (false, _) => Duration::ZERO,
            (true, Dimension::Page) => self.page_delay,
            (true, Dimension::Chapter) => self.chapter_delay,
        };

        if delay.is_zero() {
            // An immediate change replaces any debounced one
            *self.pending_slot(dimension) = None;
            self.deliver(dimension, context);
        } else {
            *self.pending_slot(dimension) = Some(PendingEmit {
                context,
                deadline: now + delay,
            });
        }
    }

    fn is_duplicate(&self, dimension: Dimension, context: &CallbackContext) -> bool {
        match dimension {
            Dimension::Page => self
                .last_page
                .as_ref()
                .is_some_and(|(chapter, page)| *chapter == context.chapter_id && *page == context.page),
            Dimension::Chapter => self.last_chapter.as_ref() == Some(&context.chapter_id),
        }
    }

    fn pending_slot(&mut self, dimension: Dimension) -> &mut Option<PendingEmit> {
        match dimension {
            Dimension::Page => &mut self.pending_page,
            Dimension::Chapter => &mut self.pending_chapter,
        }
    }

    fn deliver(&mut self, dimension: Dimension, context: CallbackContext) {
        match dimension {
            Dimension::Page => {
                self.last_page = Some((context.chapter_id.clone(), context.page));
                self.listener.on_event(ReaderEvent::PageChanged(context));
            }
            Dimension::Chapter => {
                self.last_chapter = Some(context.chapter_id.clone());
                self.listener.on_event(ReaderEvent::ChapterChanged(context));
            }
        }
    }

    /// Fire every debounced emission whose deadline has passed.
    /// Returns how many were delivered.
    pub fn flush_due(&mut self, now: Instant) -> usize {
        let mut delivered = 0;
        for dimension in [Dimension::Page, Dimension::Chapter] {
            let slot = self.pending_slot(dimension);
            if slot.as_ref().is_some_and(|pending| pending.deadline <= now) {
                if let Some(pending) = slot.take() {
                    if !self.is_duplicate(dimension, &pending.context) {
                        self.deliver(dimension, pending.context);
                        delivered += 1;
                    }
                }
            }
        }
        delivered
    }

    /// Earliest pending deadline, for sizing the host's poll timeout
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [&self.pending_page, &self.pending_chapter]
            .into_iter()
            .flatten()
            .map(|pending| pending.deadline)
            .min()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_page.is_some() || self.pending_chapter.is_some()
    }

    pub fn emit_scroll_state_change(&mut self, is_scrolling: bool) {
        self.listener
            .on_event(ReaderEvent::ScrollStateChanged { is_scrolling });
    }

    pub fn emit_error(&mut self, error: ReaderError) {
        self.listener.on_event(ReaderEvent::Error(error));
    }

    pub fn emit_chapter_load_complete(&mut self, chapter: ChapterId, page_count: usize) {
        self.listener
            .on_event(ReaderEvent::ChapterLoadComplete { chapter, page_count });
    }

    /// Run `operation` with page/chapter notifications swallowed
    pub fn suppress_during<R>(
        &mut self,
        reason: ChangeReason,
        operation: impl FnOnce(&mut Self) -> R,
    ) -> R {
        debug!("Suppressing change callbacks ({reason:?})");
        self.suppress_depth += 1;
        let result = operation(self);
        self.suppress_depth -= 1;
        result
    }

    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.suppress_depth > 0
    }

    /// Cancel both debounce timers
    pub fn cancel_pending_callbacks(&mut self) {
        self.pending_page = None;
        self.pending_chapter = None;
    }

    /// Cancel timers and forget what was delivered
    pub fn reset(&mut self) {
        self.cancel_pending_callbacks();
        self.last_page = None;
        self.last_chapter = None;
    }
}

#[cfg(test)]
mod tests {
    use flume::Receiver;

    use super::*;

    fn manager() -> (CallbackManager, Receiver<ReaderEvent>) {
        let (tx, rx) = flume::unbounded();
        (CallbackManager::new(tx), rx)
    }

    fn context(page: usize, reason: ChangeReason) -> CallbackContext {
        CallbackContext {
            chapter_id: ChapterId::new("c1"),
            page,
            total_pages: 20,
            reason,
        }
    }

    fn drain(rx: &Receiver<ReaderEvent>) -> Vec<ReaderEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn user_scroll_burst_delivers_last_once() {
        let (mut manager, rx) = manager();
        let t0 = Instant::now();

        manager.emit_page_change_at(context(3, ChangeReason::UserScroll), t0);
        manager.emit_page_change_at(
            context(4, ChangeReason::UserScroll),
            t0 + Duration::from_millis(40),
        );
        assert!(drain(&rx).is_empty());

        assert_eq!(manager.flush_due(t0 + Duration::from_millis(100)), 0);
        assert_eq!(manager.flush_due(t0 + Duration::from_millis(140)), 1);
        assert_eq!(
            drain(&rx),
            vec![ReaderEvent::PageChanged(context(4, ChangeReason::UserScroll))]
        );

        assert_eq!(manager.flush_due(t0 + Duration::from_secs(1)), 0);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn programmatic_jump_is_synchronous_and_replaces_pending() {
        let (mut manager, rx) = manager();
        let t0 = Instant::now();

        manager.emit_page_change_at(context(3, ChangeReason::UserScroll), t0);
        manager.emit_page_change_at(context(10, ChangeReason::ProgrammaticJump), t0);
        assert_eq!(
            drain(&rx),
            vec![ReaderEvent::PageChanged(context(
                10,
                ChangeReason::ProgrammaticJump
            ))]
        );
        assert!(!manager.has_pending());

        manager.flush_due(t0 + PAGE_DEBOUNCE);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn duplicate_programmatic_change_cancels_pending_scroll() {
        let (mut manager, rx) = manager();
        let t0 = Instant::now();
        manager.emit_page_change_at(context(1, ChangeReason::InitialLoad), t0);
        drain(&rx);

        manager.emit_page_change_at(context(4, ChangeReason::UserScroll), t0);
        manager.emit_page_change_at(context(1, ChangeReason::ProgrammaticJump), t0);
        assert!(!manager.has_pending());
        manager.flush_due(t0 + Duration::from_secs(1));
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn duplicates_are_dropped() {
        let (mut manager, rx) = manager();
        manager.emit_page_change(context(1, ChangeReason::InitialLoad));
        manager.emit_page_change(context(1, ChangeReason::ProgrammaticJump));
        assert_eq!(drain(&rx).len(), 1);

        manager.emit_chapter_change(context(0, ChangeReason::InitialLoad));
        manager.emit_chapter_change(context(5, ChangeReason::PreloadInsert));
        assert_eq!(drain(&rx).len(), 1);
    }

    #[test]
    fn burst_back_to_delivered_value_cancels() {
        let (mut manager, rx) = manager();
        let t0 = Instant::now();
        manager.emit_page_change_at(context(1, ChangeReason::InitialLoad), t0);
        drain(&rx);

        manager.emit_page_change_at(context(2, ChangeReason::UserScroll), t0);
        manager.emit_page_change_at(context(1, ChangeReason::UserScroll), t0);
        assert!(!manager.has_pending());
        manager.flush_due(t0 + Duration::from_secs(1));
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn chapter_debounce_is_longer() {
        let (mut manager, rx) = manager();
        let t0 = Instant::now();
        manager.emit_chapter_change_at(context(0, ChangeReason::UserScroll), t0);
        assert_eq!(manager.next_deadline(), Some(t0 + CHAPTER_DEBOUNCE));

        manager.flush_due(t0 + PAGE_DEBOUNCE);
        assert!(drain(&rx).is_empty());
        manager.flush_due(t0 + CHAPTER_DEBOUNCE);
        assert_eq!(drain(&rx).len(), 1);
    }

    #[test]
    fn suppression_swallows_changes_but_not_lifecycle() {
        let (mut manager, rx) = manager();
        manager.suppress_during(ChangeReason::PreloadInsert, |callbacks| {
            assert!(callbacks.is_suppressed());
            callbacks.emit_page_change(context(7, ChangeReason::ProgrammaticJump));
            callbacks.emit_chapter_change(context(7, ChangeReason::UserScroll));
            callbacks.emit_scroll_state_change(false);
            callbacks.emit_chapter_load_complete(ChapterId::new("c2"), 12);
        });
        assert!(!manager.is_suppressed());
        assert!(!manager.has_pending());

        assert_eq!(
            drain(&rx),
            vec![
                ReaderEvent::ScrollStateChanged {
                    is_scrolling: false
                },
                ReaderEvent::ChapterLoadComplete {
                    chapter: ChapterId::new("c2"),
                    page_count: 12
                },
            ]
        );
    }

    #[test]
    fn reset_cancels_and_forgets() {
        let (mut manager, rx) = manager();
        let t0 = Instant::now();
        manager.emit_page_change_at(context(1, ChangeReason::InitialLoad), t0);
        manager.emit_page_change_at(context(2, ChangeReason::UserScroll), t0);
        manager.reset();
        assert!(manager.next_deadline().is_none());
        manager.flush_due(t0 + Duration::from_secs(1));

        manager.emit_page_change_at(context(1, ChangeReason::ProgrammaticJump), t0);
        let events = drain(&rx);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn errors_are_immediate() {
        let (mut manager, rx) = manager();
        let err = ReaderError::Fetch {
            chapter: ChapterId::new("c3"),
            detail: "offline".to_string(),
        };
        manager.emit_error(err.clone());
        assert_eq!(drain(&rx), vec![ReaderEvent::Error(err)]);
    }
}
