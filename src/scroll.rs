//! Edge detection for prefetch

use crate::types::{ReadingMode, ViewportGeometry};

/// Which edges of the content the viewport is close to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeProximity {
    pub previous: bool,
    pub next: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReaderScrollHandler;

impl ReaderScrollHandler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify how close the viewport is to either end of the content.
    ///
    /// Low offsets mean "previous" except in right-to-left mode, where the
    /// mapping is mirrored. When the content is shorter than the viewport
    /// both edges are reported.
    #[must_use]
    pub fn edges(
        &self,
        geometry: &ViewportGeometry,
        mode: ReadingMode,
        threshold: f64,
    ) -> EdgeProximity {
        let axis = mode.axis();
        let offset = geometry.content_offset.along(axis);
        let max_offset =
            (geometry.content_size.along(axis) - geometry.viewport_size.along(axis)).max(0.0);

        let near_low = offset <= threshold;
        let near_high = max_offset - offset <= threshold;

        match mode {
            ReadingMode::RightToLeft => EdgeProximity {
                previous: near_high,
                next: near_low,
            },
            ReadingMode::LeftToRight | ReadingMode::Vertical | ReadingMode::Infinite => {
                EdgeProximity {
                    previous: near_low,
                    next: near_high,
                }
            }
        }
    }

    /// Run the load callbacks for every edge within `threshold`
    pub fn handle_scroll(
        &self,
        geometry: &ViewportGeometry,
        mode: ReadingMode,
        threshold: f64,
        on_load_previous: impl FnOnce(),
        on_load_next: impl FnOnce(),
    ) -> EdgeProximity {
        let edges = self.edges(geometry, mode, threshold);
        if edges.previous {
            on_load_previous();
        }
        if edges.next {
            on_load_next();
        }
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Point, Size};

    fn geometry(offset: Point, content: Size) -> ViewportGeometry {
        ViewportGeometry {
            content_offset: offset,
            content_size: content,
            viewport_size: Size::new(400.0, 800.0),
        }
    }

    #[test]
    fn left_to_right_edges() {
        let handler = ReaderScrollHandler::new();
        let content = Size::new(4000.0, 800.0);

        let at_start = geometry(Point::new(100.0, 0.0), content);
        assert_eq!(
            handler.edges(&at_start, ReadingMode::LeftToRight, 200.0),
            EdgeProximity {
                previous: true,
                next: false
            }
        );

        let at_end = geometry(Point::new(3500.0, 0.0), content);
        assert_eq!(
            handler.edges(&at_end, ReadingMode::LeftToRight, 200.0),
            EdgeProximity {
                previous: false,
                next: true
            }
        );

        let middle = geometry(Point::new(2000.0, 0.0), content);
        assert_eq!(
            handler.edges(&middle, ReadingMode::LeftToRight, 200.0),
            EdgeProximity::default()
        );
    }

    #[test]
    fn right_to_left_is_mirrored() {
        let handler = ReaderScrollHandler::new();
        let content = Size::new(4000.0, 800.0);

        let low = geometry(Point::new(0.0, 0.0), content);
        let edges = handler.edges(&low, ReadingMode::RightToLeft, 200.0);
        assert!(edges.next && !edges.previous);

        let high = geometry(Point::new(3600.0, 0.0), content);
        let edges = handler.edges(&high, ReadingMode::RightToLeft, 200.0);
        assert!(edges.previous && !edges.next);
    }

    #[test]
    fn vertical_modes_use_y_axis() {
        let handler = ReaderScrollHandler::new();
        let content = Size::new(400.0, 10_000.0);
        // x offset is irrelevant in vertical modes
        let top = geometry(Point::new(5000.0, 50.0), content);

        for mode in [ReadingMode::Vertical, ReadingMode::Infinite] {
            let edges = handler.edges(&top, mode, 100.0);
            assert!(edges.previous && !edges.next, "{mode:?}");
        }

        let bottom = geometry(Point::new(0.0, 9150.0), content);
        let edges = handler.edges(&bottom, ReadingMode::Infinite, 100.0);
        assert!(edges.next && !edges.previous);
    }

    #[test]
    fn short_content_triggers_both() {
        let handler = ReaderScrollHandler::new();
        let short = geometry(Point::default(), Size::new(400.0, 300.0));

        let mut previous = false;
        let mut next = false;
        handler.handle_scroll(
            &short,
            ReadingMode::Infinite,
            0.0,
            || previous = true,
            || next = true,
        );
        assert!(previous && next);
    }
}
