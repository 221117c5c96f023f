//! Core value types shared by the reader engine

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque chapter identifier supplied by the host
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterId(String);

impl ChapterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChapterId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChapterId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a single page image (usually a URL)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageRef(String);

impl PageRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chapter as the host orders it. Never mutated by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadableChapter {
    pub id: ChapterId,
    /// Position in the host reading order
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ReadableChapter {
    pub fn new(id: impl Into<ChapterId>, index: usize) -> Self {
        Self {
            id: id.into(),
            index,
            title: None,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Layout convention used to present pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadingMode {
    /// Horizontal paging, next page to the right
    #[default]
    LeftToRight,
    /// Horizontal paging, next page to the left
    RightToLeft,
    /// Vertical paging, one page per screen
    Vertical,
    /// Continuous vertical strip
    Infinite,
}

impl ReadingMode {
    #[must_use]
    pub fn axis(self) -> ScrollAxis {
        match self {
            ReadingMode::LeftToRight | ReadingMode::RightToLeft => ScrollAxis::Horizontal,
            ReadingMode::Vertical | ReadingMode::Infinite => ScrollAxis::Vertical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingMode::LeftToRight => "left_to_right",
            ReadingMode::RightToLeft => "right_to_left",
            ReadingMode::Vertical => "vertical",
            ReadingMode::Infinite => "infinite",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAxis {
    Horizontal,
    Vertical,
}

/// Why an outward notification fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeReason {
    UserScroll,
    ProgrammaticJump,
    PreloadInsert,
    InitialLoad,
}

/// Payload of page and chapter change notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackContext {
    pub chapter_id: ChapterId,
    /// Page inside the chapter (0-indexed)
    pub page: usize,
    /// Pages in the chapter
    pub total_pages: usize,
    pub reason: ChangeReason,
}

/// Where new content lands in the list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionPosition {
    Initial,
    Previous,
    Next,
}

/// Direction of a neighbor-chapter load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadDirection {
    Previous,
    Next,
}

impl From<LoadDirection> for InsertionPosition {
    fn from(direction: LoadDirection) -> Self {
        match direction {
            LoadDirection::Previous => InsertionPosition::Previous,
            LoadDirection::Next => InsertionPosition::Next,
        }
    }
}

/// Point in content coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn along(self, axis: ScrollAxis) -> f64 {
        match axis {
            ScrollAxis::Horizontal => self.x,
            ScrollAxis::Vertical => self.y,
        }
    }

    /// Move the point by `delta` along `axis`
    #[must_use]
    pub fn shifted(self, axis: ScrollAxis, delta: f64) -> Self {
        match axis {
            ScrollAxis::Horizontal => Self::new(self.x + delta, self.y),
            ScrollAxis::Vertical => Self::new(self.x, self.y + delta),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn along(self, axis: ScrollAxis) -> f64 {
        match axis {
            ScrollAxis::Horizontal => self.width,
            ScrollAxis::Vertical => self.height,
        }
    }
}

/// Item rectangle in content coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Frame {
    pub origin: Point,
    pub size: Size,
}

impl Frame {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    #[must_use]
    pub fn min_x(&self) -> f64 {
        self.origin.x
    }

    #[must_use]
    pub fn max_x(&self) -> f64 {
        self.origin.x + self.size.width
    }

    #[must_use]
    pub fn min_y(&self) -> f64 {
        self.origin.y
    }

    #[must_use]
    pub fn max_y(&self) -> f64 {
        self.origin.y + self.size.height
    }

    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.min_x()
            && point.x < self.max_x()
            && point.y >= self.min_y()
            && point.y < self.max_y()
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(
            self.origin.x + self.size.width / 2.0,
            self.origin.y + self.size.height / 2.0,
        )
    }
}

/// Snapshot of the scroll view
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportGeometry {
    /// Scroll offset of the visible rect's origin
    pub content_offset: Point,
    /// Total size of the scrollable content
    pub content_size: Size,
    /// Size of the visible rect
    pub viewport_size: Size,
}

impl ViewportGeometry {
    #[must_use]
    pub fn visible_rect(&self) -> Frame {
        Frame {
            origin: self.content_offset,
            size: self.viewport_size,
        }
    }
}
