//! Bidirectional chapter pagination engine for page-based readers.
//!
//! The host owns the chapter list, the page fetching and the list widget;
//! [`ReaderCoordinator`] decides when neighboring chapters are loaded,
//! splices them into the widget without moving what the reader sees, and
//! reports page and chapter changes back.

pub mod callbacks;
pub mod chapter_manager;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod insertion;
pub mod page_mapper;
pub mod scroll;
pub mod settings;
pub mod state_machine;
pub mod types;
pub mod viewport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use callbacks::{CallbackManager, NoopListener, ReaderEvent, ReaderListener};
pub use coordinator::ReaderCoordinator;
pub use error::{ErrorKind, ReaderError};
pub use fetch::ChapterSource;
pub use settings::ReaderSettings;
pub use state_machine::ReaderState;
pub use types::{
    CallbackContext, ChangeReason, ChapterId, Frame, PageRef, Point, ReadableChapter,
    ReadingMode, Size, ViewportGeometry,
};
pub use viewport::VirtualizedList;
