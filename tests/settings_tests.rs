use std::fs;
use std::sync::Arc;
use std::time::Duration;

use chapterflow::test_utils::{MemorySource, ScriptedList, chapters, pump};
use chapterflow::{ChapterId, NoopListener, ReaderCoordinator, ReaderSettings, ReadingMode};

#[test]
fn settings_file_drives_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        "reading_mode: infinite\nprefetch_threshold: 0\nmax_loaded_chapters: 1\n",
    )
    .unwrap();

    let settings = ReaderSettings::load_from_path(&path).unwrap();
    assert_eq!(settings.reading_mode, ReadingMode::Infinite);
    // Clamped to the smallest workable window
    assert_eq!(settings.max_loaded_chapters, 2);

    let mut reader = ReaderCoordinator::with_settings(
        chapters(&["a", "b", "c"]),
        Arc::new(MemorySource::new(&[("a", 4), ("b", 4), ("c", 4)])),
        ChapterId::new("a"),
        ScriptedList::paged(ReadingMode::Infinite),
        NoopListener,
        settings,
    )
    .unwrap();

    assert_eq!(reader.reading_mode(), ReadingMode::Infinite);
    reader.start();
    assert!(pump(&mut reader, Duration::from_secs(5)));
    // Threshold 0 only triggers exactly at an edge; "a" has no previous
    assert_eq!(reader.loaded_chapters(), vec![ChapterId::new("a")]);
}

#[test]
fn broken_settings_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, "reading_mode: [not, a, mode]\n").unwrap();

    assert!(ReaderSettings::load_from_path(&path).is_err());
    assert_eq!(ReaderSettings::load_or_default(&path), ReaderSettings::default());
}
