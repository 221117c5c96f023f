//! Fetch request and response types

use crate::error::ReaderError;
use crate::types::{ChapterId, InsertionPosition, PageRef};

/// Unique identifier for fetch requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Request sent to fetch workers
#[derive(Debug)]
pub enum FetchRequest {
    /// Fetch the page list of a chapter
    Chapter {
        id: RequestId,
        chapter: ChapterId,
        position: InsertionPosition,
    },

    /// Stop the worker
    Shutdown,
}

/// Response from fetch workers
#[derive(Debug)]
pub enum FetchResponse {
    /// Chapter pages arrived
    Pages {
        id: RequestId,
        chapter: ChapterId,
        position: InsertionPosition,
        pages: Vec<PageRef>,
    },

    /// The host source failed
    Failed {
        id: RequestId,
        chapter: ChapterId,
        position: InsertionPosition,
        error: ReaderError,
    },
}

impl FetchResponse {
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            FetchResponse::Pages { id, .. } | FetchResponse::Failed { id, .. } => *id,
        }
    }

    #[must_use]
    pub fn chapter(&self) -> &ChapterId {
        match self {
            FetchResponse::Pages { chapter, .. } | FetchResponse::Failed { chapter, .. } => chapter,
        }
    }

    #[must_use]
    pub fn position(&self) -> InsertionPosition {
        match self {
            FetchResponse::Pages { position, .. } | FetchResponse::Failed { position, .. } => {
                *position
            }
        }
    }
}
