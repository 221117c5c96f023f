//! Global page index <-> (chapter, page) mapping

use std::collections::HashMap;

use log::debug;

use crate::types::{ChapterId, PageRef};

/// Pages fetched for one chapter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedChapter {
    pub id: ChapterId,
    pub pages: Vec<PageRef>,
}

impl LoadedChapter {
    pub fn new(id: ChapterId, pages: Vec<PageRef>) -> Self {
        Self { id, pages }
    }
}

#[derive(Clone, Debug)]
struct MappedPage {
    chapter: ChapterId,
    page: usize,
    page_ref: PageRef,
}

/// Flattened view over the currently loaded chapters.
///
/// Indices are contiguous from 0 and follow the host chapter order. A
/// global index is only meaningful until the next `update_mapping`.
#[derive(Default, Debug)]
pub struct PageMapper {
    pages: Vec<MappedPage>,
    reverse: HashMap<(ChapterId, usize), usize>,
    page_counts: HashMap<ChapterId, usize>,
    /// Global index of each chapter's first page
    chapter_starts: HashMap<ChapterId, usize>,
}

impl PageMapper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the mapping from scratch.
    ///
    /// `ordered_by` must not contain duplicates. Ids without an entry in
    /// `loaded` are skipped.
    pub fn update_mapping(&mut self, loaded: &[LoadedChapter], ordered_by: &[ChapterId]) {
        self.pages.clear();
        self.reverse.clear();
        self.page_counts.clear();
        self.chapter_starts.clear();

        let by_id: HashMap<&ChapterId, &LoadedChapter> =
            loaded.iter().map(|chapter| (&chapter.id, chapter)).collect();

        for id in ordered_by {
            let Some(chapter) = by_id.get(id) else {
                continue;
            };
            self.chapter_starts.insert(id.clone(), self.pages.len());
            self.page_counts.insert(id.clone(), chapter.pages.len());
            for (page, page_ref) in chapter.pages.iter().enumerate() {
                self.reverse.insert((id.clone(), page), self.pages.len());
                self.pages.push(MappedPage {
                    chapter: id.clone(),
                    page,
                    page_ref: page_ref.clone(),
                });
            }
        }

        debug!(
            "Mapping rebuilt: {} pages across {} chapters",
            self.pages.len(),
            self.page_counts.len()
        );
    }

    #[must_use]
    pub fn get_chapter_and_page(&self, global_index: usize) -> Option<(ChapterId, usize)> {
        self.pages
            .get(global_index)
            .map(|mapped| (mapped.chapter.clone(), mapped.page))
    }

    #[must_use]
    pub fn get_global_index(&self, chapter: &ChapterId, page: usize) -> Option<usize> {
        self.reverse.get(&(chapter.clone(), page)).copied()
    }

    /// Pages mapped for `chapter`, 0 if it is not loaded
    #[must_use]
    pub fn get_current_chapter_page_count(&self, chapter: &ChapterId) -> usize {
        self.page_counts.get(chapter).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn page_ref(&self, global_index: usize) -> Option<&PageRef> {
        self.pages.get(global_index).map(|mapped| &mapped.page_ref)
    }

    /// Global index range occupied by `chapter`
    #[must_use]
    pub fn chapter_range(&self, chapter: &ChapterId) -> Option<std::ops::Range<usize>> {
        let start = *self.chapter_starts.get(chapter)?;
        let count = self.get_current_chapter_page_count(chapter);
        Some(start..start + count)
    }

    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    #[must_use]
    pub fn contains_chapter(&self, chapter: &ChapterId) -> bool {
        self.page_counts.contains_key(chapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(id: &str, pages: usize) -> LoadedChapter {
        LoadedChapter::new(
            ChapterId::new(id),
            (0..pages)
                .map(|p| PageRef::new(format!("https://cdn.test/{id}/{p}.webp")))
                .collect(),
        )
    }

    fn ids(list: &[&str]) -> Vec<ChapterId> {
        list.iter().map(|id| ChapterId::new(*id)).collect()
    }

    #[test]
    fn two_chapter_lookup() {
        let mut mapper = PageMapper::new();
        mapper.update_mapping(&[chapter("C1", 5), chapter("C2", 3)], &ids(&["C1", "C2"]));

        assert_eq!(mapper.total_pages(), 8);
        assert_eq!(
            mapper.get_chapter_and_page(5),
            Some((ChapterId::new("C2"), 0))
        );
        assert_eq!(mapper.get_global_index(&ChapterId::new("C2"), 2), Some(7));
        assert_eq!(mapper.get_chapter_and_page(8), None);
        assert_eq!(mapper.get_global_index(&ChapterId::new("C2"), 3), None);
    }

    #[test]
    fn skips_unloaded_chapters_and_follows_host_order() {
        let mut mapper = PageMapper::new();
        // Loaded set given out of order; C2 is not loaded
        mapper.update_mapping(
            &[chapter("C3", 2), chapter("C1", 4)],
            &ids(&["C1", "C2", "C3"]),
        );

        assert_eq!(mapper.total_pages(), 6);
        assert_eq!(mapper.chapter_range(&ChapterId::new("C1")), Some(0..4));
        assert_eq!(mapper.chapter_range(&ChapterId::new("C3")), Some(4..6));
        assert_eq!(mapper.chapter_range(&ChapterId::new("C2")), None);
        assert_eq!(mapper.get_current_chapter_page_count(&ChapterId::new("C2")), 0);

        let mut last = None;
        for index in 0..mapper.total_pages() {
            let (chapter, page) = mapper.get_chapter_and_page(index).unwrap();
            assert_eq!(mapper.get_global_index(&chapter, page), Some(index));
            if let Some(prev) = last {
                assert!(index > prev);
            }
            last = Some(index);
        }
    }

    #[test]
    fn rebuild_is_idempotent_and_not_incremental() {
        let mut mapper = PageMapper::new();
        let order = ids(&["C1", "C2"]);
        mapper.update_mapping(&[chapter("C1", 2), chapter("C2", 2)], &order);
        mapper.update_mapping(&[chapter("C1", 2), chapter("C2", 2)], &order);
        assert_eq!(mapper.total_pages(), 4);

        mapper.update_mapping(&[chapter("C2", 2)], &order);
        assert_eq!(mapper.total_pages(), 2);
        assert!(!mapper.contains_chapter(&ChapterId::new("C1")));
        assert_eq!(
            mapper.get_chapter_and_page(0),
            Some((ChapterId::new("C2"), 0))
        );
    }

    #[test]
    fn page_refs_follow_mapping() {
        let mut mapper = PageMapper::new();
        mapper.update_mapping(&[chapter("A", 1), chapter("B", 1)], &ids(&["A", "B"]));
        assert_eq!(
            mapper.page_ref(1).map(PageRef::as_str),
            Some("https://cdn.test/B/0.webp")
        );
        assert!(mapper.page_ref(2).is_none());
    }

    #[test]
    fn empty_mapping() {
        let mapper = PageMapper::new();
        assert!(mapper.is_empty());
        assert_eq!(mapper.get_chapter_and_page(0), None);
    }
}
