//! Capability interface over the host's virtualized list widget

use std::ops::Range;

use crate::types::{Frame, Point, ViewportGeometry};

/// Mutation and geometry access the engine needs from a list widget.
///
/// Implementations must lay out synchronously: after `insert_items`,
/// `delete_items` or `reload_all` returns, `item_frame` and `geometry`
/// reflect the new content.
pub trait VirtualizedList {
    /// New items were added at `indices` (indices in the post-insert list)
    fn insert_items(&mut self, indices: Range<usize>);

    /// Items at `indices` (pre-delete indices) were removed
    fn delete_items(&mut self, indices: Range<usize>);

    /// Throw away all items and lay out `count` fresh ones
    fn reload_all(&mut self, count: usize);

    fn geometry(&self) -> ViewportGeometry;

    /// Items intersecting the visible rect, ordered by index
    fn visible_items(&self) -> Vec<(usize, Frame)>;

    fn item_frame(&self, index: usize) -> Option<Frame>;

    fn set_content_offset(&mut self, offset: Point);

    fn scroll_to_item(&mut self, index: usize, animated: bool);
}
