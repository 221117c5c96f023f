//! Anchored content mutation
//!
//! Before pages are spliced into (or cut out of) the list, the page the
//! reader is looking at is captured together with its on-screen frame. After
//! the mutation the same page is looked up again through the rebuilt
//! [`PageMapper`] and the viewport is shifted by however far that page moved,
//! so prepending a chapter above the viewport does not visibly jump.

use std::ops::Range;

use log::{debug, warn};

use crate::page_mapper::PageMapper;
use crate::types::{ChapterId, Frame, InsertionPosition, Point, ReadingMode, Size};
use crate::viewport::VirtualizedList;

/// Default on-screen drift tolerated after an append before correcting
pub const DEFAULT_DRIFT_TOLERANCE: f64 = 1.0;

/// Visual position captured right before a mutation
#[derive(Clone, Debug, PartialEq)]
pub struct InsertionAnchor {
    pub global_index: usize,
    pub chapter_id: ChapterId,
    pub page_in_chapter: usize,
    /// Item frame in content coordinates at capture time
    pub visible_frame: Frame,
    pub viewport_offset: Point,
    pub content_size: Size,
}

/// What `restore_anchor` did
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Restoration {
    /// No anchor was supplied
    Skipped,
    /// The anchored page is no longer mapped or laid out
    Unresolved,
    /// Anchor still where it was
    Unchanged,
    /// Viewport offset moved by this much along the reading axis
    Adjusted(f64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct InsertionOutcome {
    /// Indices inserted or removed
    pub range: Range<usize>,
    pub restoration: Restoration,
}

/// Range of new items for a batch insert
#[must_use]
pub fn insertion_range(
    position: InsertionPosition,
    old_count: usize,
    new_count: usize,
) -> Range<usize> {
    let added = new_count.saturating_sub(old_count);
    match position {
        InsertionPosition::Initial => 0..new_count,
        InsertionPosition::Previous => 0..added,
        InsertionPosition::Next => old_count..old_count + added,
    }
}

#[derive(Clone, Debug)]
pub struct InsertionStrategy {
    drift_tolerance: f64,
}

impl Default for InsertionStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_DRIFT_TOLERANCE)
    }
}

impl InsertionStrategy {
    #[must_use]
    pub fn new(drift_tolerance: f64) -> Self {
        Self {
            drift_tolerance: drift_tolerance.max(0.0),
        }
    }

    /// Pick the page that stands for "where the reader is".
    ///
    /// Infinite scroll uses the item under the viewport center, vertical
    /// paging the topmost visible item, horizontal paging the leading item
    /// (trailing for right-to-left).
    pub fn capture_anchor(
        &self,
        list: &dyn VirtualizedList,
        mapper: &PageMapper,
        mode: ReadingMode,
    ) -> Option<InsertionAnchor> {
        let geometry = list.geometry();
        let visible = list.visible_items();

        let (global_index, frame) = match mode {
            ReadingMode::Infinite => {
                let center = geometry.visible_rect().center();
                let axis = mode.axis();
                visible
                    .iter()
                    .find(|(_, frame)| frame.contains(center))
                    .or_else(|| {
                        visible.iter().min_by(|(_, a), (_, b)| {
                            let da = (a.center().along(axis) - center.along(axis)).abs();
                            let db = (b.center().along(axis) - center.along(axis)).abs();
                            da.total_cmp(&db)
                        })
                    })
                    .copied()
            }
            ReadingMode::Vertical => visible
                .iter()
                .min_by(|(_, a), (_, b)| a.min_y().total_cmp(&b.min_y()))
                .copied(),
            ReadingMode::LeftToRight => visible
                .iter()
                .min_by(|(_, a), (_, b)| a.min_x().total_cmp(&b.min_x()))
                .copied(),
            ReadingMode::RightToLeft => visible
                .iter()
                .max_by(|(_, a), (_, b)| a.max_x().total_cmp(&b.max_x()))
                .copied(),
        }?;

        let (chapter_id, page_in_chapter) = mapper.get_chapter_and_page(global_index)?;

        Some(InsertionAnchor {
            global_index,
            chapter_id,
            page_in_chapter,
            visible_frame: frame,
            viewport_offset: geometry.content_offset,
            content_size: geometry.content_size,
        })
    }

    /// Splice new items into the list, then restore `anchor`.
    ///
    /// `mapper` must already reflect the new content.
    pub fn perform_anchored_insertion(
        &self,
        list: &mut dyn VirtualizedList,
        position: InsertionPosition,
        anchor: Option<&InsertionAnchor>,
        old_count: usize,
        new_count: usize,
        mapper: &PageMapper,
        mode: ReadingMode,
    ) -> InsertionOutcome {
        let range = insertion_range(position, old_count, new_count);

        if position == InsertionPosition::Initial || new_count < old_count {
            if position != InsertionPosition::Initial {
                warn!("Item count shrank ({old_count} -> {new_count}) on insert, reloading");
            }
            list.reload_all(new_count);
            return InsertionOutcome {
                range,
                restoration: Restoration::Skipped,
            };
        }

        debug!("Inserting items {range:?} ({position:?})");
        if !range.is_empty() {
            list.insert_items(range.clone());
        }

        let restoration = match anchor {
            Some(anchor) => self.restore_anchor(list, anchor, position, mapper, mode),
            None => Restoration::Skipped,
        };

        InsertionOutcome { range, restoration }
    }

    /// Cut `range` out of the list, then restore `anchor`.
    ///
    /// Removal from the head shifts content like a prepend does.
    pub fn perform_anchored_removal(
        &self,
        list: &mut dyn VirtualizedList,
        range: Range<usize>,
        anchor: Option<&InsertionAnchor>,
        mapper: &PageMapper,
        mode: ReadingMode,
    ) -> InsertionOutcome {
        debug!("Removing items {range:?}");
        let at_head = range.start == 0;
        if !range.is_empty() {
            list.delete_items(range.clone());
        }

        let position = if at_head {
            InsertionPosition::Previous
        } else {
            InsertionPosition::Next
        };
        let restoration = match anchor {
            Some(anchor) => self.restore_anchor(list, anchor, position, mapper, mode),
            None => Restoration::Skipped,
        };

        InsertionOutcome { range, restoration }
    }

    /// Put `anchor` back where it was on screen.
    ///
    /// Head mutations always compensate; tail mutations only correct when
    /// the anchor drifted past the tolerance. An anchor that no longer
    /// resolves is skipped.
    pub fn restore_anchor(
        &self,
        list: &mut dyn VirtualizedList,
        anchor: &InsertionAnchor,
        position: InsertionPosition,
        mapper: &PageMapper,
        mode: ReadingMode,
    ) -> Restoration {
        let Some(index) = mapper.get_global_index(&anchor.chapter_id, anchor.page_in_chapter)
        else {
            warn!(
                "Anchor {}:{} no longer mapped, skipping restore",
                anchor.chapter_id, anchor.page_in_chapter
            );
            return Restoration::Unresolved;
        };
        let Some(frame) = list.item_frame(index) else {
            warn!("Anchor item {index} has no frame, skipping restore");
            return Restoration::Unresolved;
        };

        let axis = mode.axis();
        let offset = list.geometry().content_offset;
        let screen_before =
            anchor.visible_frame.origin.along(axis) - anchor.viewport_offset.along(axis);
        let screen_now = frame.origin.along(axis) - offset.along(axis);
        let drift = screen_now - screen_before;

        let must_correct = match position {
            InsertionPosition::Previous => drift != 0.0,
            InsertionPosition::Next => drift.abs() > self.drift_tolerance,
            InsertionPosition::Initial => false,
        };
        if !must_correct {
            return Restoration::Unchanged;
        }

        debug!(
            "Restoring anchor {}:{} (index {} -> {index}), shifting by {drift}",
            anchor.chapter_id, anchor.page_in_chapter, anchor.global_index
        );
        list.set_content_offset(offset.shifted(axis, drift));
        Restoration::Adjusted(drift)
    }
}
