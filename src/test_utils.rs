//! In-memory host doubles for driving a reader session in tests and the
//! simulator.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};

use crate::callbacks::ReaderEvent;
use crate::coordinator::ReaderCoordinator;
use crate::fetch::ChapterSource;
use crate::types::{
    ChapterId, Frame, PageRef, Point, ReadableChapter, ReadingMode, ScrollAxis, Size,
    ViewportGeometry,
};
use crate::viewport::VirtualizedList;

/// Mutation recorded by [`ScriptedList`]
#[derive(Debug, Clone, PartialEq)]
pub enum ListOp {
    Insert(Range<usize>),
    Delete(Range<usize>),
    Reload(usize),
    SetOffset(f64),
    ScrollTo(usize),
}

/// A list widget with fixed-extent items laid out along one axis.
///
/// Right-to-left layout puts item 0 at the far end of the content.
/// Layout is synchronous; the content offset stays put across inserts
/// and deletes, so head mutations shift what is on screen.
#[derive(Debug, Clone)]
pub struct ScriptedList {
    axis: ScrollAxis,
    reversed: bool,
    item_extent: f64,
    extents: Vec<f64>,
    viewport: Size,
    offset: f64,
    queued_mode: Option<ReadingMode>,
    pub ops: Vec<ListOp>,
}

impl ScriptedList {
    pub fn new(mode: ReadingMode, item_extent: f64, viewport: Size) -> Self {
        Self {
            axis: mode.axis(),
            reversed: mode == ReadingMode::RightToLeft,
            item_extent,
            extents: Vec::new(),
            viewport,
            offset: 0.0,
            queued_mode: None,
            ops: Vec::new(),
        }
    }

    /// 100x100 pages in a 100x100 viewport
    pub fn paged(mode: ReadingMode) -> Self {
        Self::new(mode, 100.0, Size::new(100.0, 100.0))
    }

    /// Switch layout on the next `reload_all`
    pub fn queue_layout(&mut self, mode: ReadingMode) {
        self.queued_mode = Some(mode);
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn content_extent(&self) -> f64 {
        self.extents.iter().sum()
    }

    pub fn max_offset(&self) -> f64 {
        (self.content_extent() - self.viewport.along(self.axis)).max(0.0)
    }

    /// Move the offset like a user drag would (no list op recorded)
    pub fn scroll_to_offset(&mut self, offset: f64) {
        self.offset = offset.clamp(0.0, self.max_offset());
    }

    pub fn scroll_by(&mut self, delta: f64) {
        self.scroll_to_offset(self.offset + delta);
    }

    /// Scroll to the content start (reading order start in every mode)
    pub fn scroll_to_reading_start(&mut self) {
        if self.reversed {
            self.scroll_to_offset(self.max_offset());
        } else {
            self.scroll_to_offset(0.0);
        }
    }

    pub fn scroll_to_reading_end(&mut self) {
        if self.reversed {
            self.scroll_to_offset(0.0);
        } else {
            self.scroll_to_offset(self.max_offset());
        }
    }

    /// Offset at which `index` starts along the axis
    pub fn item_start(&self, index: usize) -> Option<f64> {
        if index >= self.extents.len() {
            return None;
        }
        let before: f64 = self.extents[..index].iter().sum();
        if self.reversed {
            Some(self.content_extent() - before - self.extents[index])
        } else {
            Some(before)
        }
    }

    /// Item whose start sits on the current offset, if any
    pub fn item_at_offset(&self) -> Option<usize> {
        (0..self.extents.len()).find(|&index| {
            let start = self.item_start(index).unwrap_or(f64::NAN);
            start <= self.offset && self.offset < start + self.extents[index]
        })
    }

    fn frame_for(&self, index: usize) -> Option<Frame> {
        let start = self.item_start(index)?;
        let extent = self.extents[index];
        Some(match self.axis {
            ScrollAxis::Horizontal => Frame::new(start, 0.0, extent, self.viewport.height),
            ScrollAxis::Vertical => Frame::new(0.0, start, self.viewport.width, extent),
        })
    }

    fn offset_point(&self) -> Point {
        Point::default().shifted(self.axis, self.offset)
    }
}

impl VirtualizedList for ScriptedList {
    fn insert_items(&mut self, indices: Range<usize>) {
        let start = indices.start.min(self.extents.len());
        let added = indices.len();
        self.extents
            .splice(start..start, std::iter::repeat(self.item_extent).take(added));
        self.ops.push(ListOp::Insert(indices));
    }

    fn delete_items(&mut self, indices: Range<usize>) {
        let end = indices.end.min(self.extents.len());
        let start = indices.start.min(end);
        self.extents.drain(start..end);
        self.offset = self.offset.clamp(0.0, self.max_offset());
        self.ops.push(ListOp::Delete(indices));
    }

    fn reload_all(&mut self, count: usize) {
        if let Some(mode) = self.queued_mode.take() {
            self.axis = mode.axis();
            self.reversed = mode == ReadingMode::RightToLeft;
        }
        self.extents = vec![self.item_extent; count];
        self.offset = self.offset.clamp(0.0, self.max_offset());
        self.ops.push(ListOp::Reload(count));
    }

    fn geometry(&self) -> ViewportGeometry {
        let content_size = match self.axis {
            ScrollAxis::Horizontal => Size::new(self.content_extent(), self.viewport.height),
            ScrollAxis::Vertical => Size::new(self.viewport.width, self.content_extent()),
        };
        ViewportGeometry {
            content_offset: self.offset_point(),
            content_size,
            viewport_size: self.viewport,
        }
    }

    fn visible_items(&self) -> Vec<(usize, Frame)> {
        let low = self.offset;
        let high = self.offset + self.viewport.along(self.axis);
        (0..self.extents.len())
            .filter_map(|index| {
                let frame = self.frame_for(index)?;
                let start = frame.origin.along(self.axis);
                let end = start + frame.size.along(self.axis);
                (start < high && end > low).then_some((index, frame))
            })
            .collect()
    }

    fn item_frame(&self, index: usize) -> Option<Frame> {
        self.frame_for(index)
    }

    fn set_content_offset(&mut self, offset: Point) {
        self.offset = offset.along(self.axis).clamp(0.0, self.max_offset());
        self.ops.push(ListOp::SetOffset(self.offset));
    }

    fn scroll_to_item(&mut self, index: usize, _animated: bool) {
        if let Some(start) = self.item_start(index) {
            self.offset = start.clamp(0.0, self.max_offset());
        }
        self.ops.push(ListOp::ScrollTo(index));
    }
}

#[derive(Default)]
struct SourceState {
    page_counts: HashMap<ChapterId, usize>,
    failing: HashSet<ChapterId>,
    held: HashSet<ChapterId>,
    fetches: HashMap<ChapterId, usize>,
}

/// Chapter source backed by a page-count table.
///
/// Pages are named `<chapter>/<n>`. Chapters can be made to fail, or held
/// so their fetch blocks until released.
#[derive(Default)]
pub struct MemorySource {
    state: Mutex<SourceState>,
    released: Condvar,
}

impl MemorySource {
    pub fn new(chapters: &[(&str, usize)]) -> Self {
        let source = Self::default();
        for (id, pages) in chapters {
            source.set_pages(id, *pages);
        }
        source
    }

    fn state(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_pages(&self, chapter: &str, pages: usize) {
        self.state().page_counts.insert(ChapterId::new(chapter), pages);
    }

    pub fn set_failing(&self, chapter: &str, failing: bool) {
        let mut state = self.state();
        let id = ChapterId::new(chapter);
        if failing {
            state.failing.insert(id);
        } else {
            state.failing.remove(&id);
        }
    }

    /// Block fetches of `chapter` until [`MemorySource::release`]
    pub fn hold(&self, chapter: &str) {
        self.state().held.insert(ChapterId::new(chapter));
    }

    pub fn release(&self, chapter: &str) {
        self.state().held.remove(&ChapterId::new(chapter));
        self.released.notify_all();
    }

    /// How many times `chapter` was fetched
    pub fn fetch_count(&self, chapter: &str) -> usize {
        self.state()
            .fetches
            .get(&ChapterId::new(chapter))
            .copied()
            .unwrap_or(0)
    }

    /// Page refs `chapter` resolves to
    pub fn page_refs(chapter: &str, pages: usize) -> Vec<PageRef> {
        (0..pages)
            .map(|page| PageRef::new(format!("{chapter}/{page}")))
            .collect()
    }
}

impl ChapterSource for MemorySource {
    fn fetch_pages(&self, chapter: &ChapterId) -> anyhow::Result<Vec<PageRef>> {
        let mut state = self.state();
        *state.fetches.entry(chapter.clone()).or_default() += 1;
        while state.held.contains(chapter) {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if state.failing.contains(chapter) {
            bail!("source refused chapter {chapter}");
        }
        let pages = state
            .page_counts
            .get(chapter)
            .copied()
            .ok_or_else(|| anyhow!("unknown chapter {chapter}"))?;
        Ok(Self::page_refs(chapter.as_str(), pages))
    }
}

/// Chapters `ids` in the given order
pub fn chapters(ids: &[&str]) -> Vec<ReadableChapter> {
    ids.iter()
        .enumerate()
        .map(|(index, id)| ReadableChapter::new(*id, index))
        .collect()
}

pub fn drain_events(rx: &flume::Receiver<ReaderEvent>) -> Vec<ReaderEvent> {
    rx.try_iter().collect()
}

/// Poll until no fetch is outstanding. Returns false on timeout.
pub fn pump<L: VirtualizedList>(coordinator: &mut ReaderCoordinator<L>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    coordinator.poll();
    while coordinator.has_pending_fetch() {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        coordinator.poll_blocking((deadline - now).min(Duration::from_millis(50)));
    }
    true
}
