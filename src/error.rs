//! Reader error taxonomy

use crate::types::ChapterId;

/// Coarse error category, used where only the kind matters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Fetch,
    Mapping,
    Transition,
}

/// Errors surfaced by the reader engine.
///
/// Values are comparable so the state machine's `Error` state has
/// well-defined equality. Host errors are flattened to text at the fetch
/// worker boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReaderError {
    #[error("failed to fetch chapter {chapter}: {detail}")]
    Fetch { chapter: ChapterId, detail: String },

    #[error("page {page} of chapter {chapter} is not mapped")]
    Mapping { chapter: ChapterId, page: usize },

    #[error("invalid state transition {from} -> {to}")]
    Transition {
        from: &'static str,
        to: &'static str,
    },
}

impl ReaderError {
    pub fn fetch(chapter: ChapterId, err: &anyhow::Error) -> Self {
        Self::Fetch {
            chapter,
            detail: format!("{err:#}"),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReaderError::Fetch { .. } => ErrorKind::Fetch,
            ReaderError::Mapping { .. } => ErrorKind::Mapping,
            ReaderError::Transition { .. } => ErrorKind::Transition,
        }
    }

    /// Chapter the error refers to, if any
    #[must_use]
    pub fn chapter(&self) -> Option<&ChapterId> {
        match self {
            ReaderError::Fetch { chapter, .. } | ReaderError::Mapping { chapter, .. } => {
                Some(chapter)
            }
            ReaderError::Transition { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_keeps_context_chain() {
        let err = anyhow::anyhow!("connection reset").context("GET /chapters/7");
        let reader_err = ReaderError::fetch(ChapterId::new("c7"), &err);
        assert_eq!(reader_err.kind(), ErrorKind::Fetch);
        assert_eq!(
            reader_err.to_string(),
            "failed to fetch chapter c7: GET /chapters/7: connection reset"
        );
    }

    #[test]
    fn errors_compare_by_value() {
        let a = ReaderError::Mapping {
            chapter: ChapterId::new("c1"),
            page: 3,
        };
        let b = ReaderError::Mapping {
            chapter: ChapterId::new("c1"),
            page: 3,
        };
        assert_eq!(a, b);
        assert_eq!(a.chapter(), Some(&ChapterId::new("c1")));
        assert_ne!(
            a,
            ReaderError::Transition {
                from: "ready",
                to: "idle"
            }
        );
    }
}
