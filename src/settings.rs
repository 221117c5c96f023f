use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::types::ReadingMode;

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "chapterflow";

const MIN_LOADED_CHAPTERS: usize = 2;
const MIN_FETCH_WORKERS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderSettings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub reading_mode: ReadingMode,

    /// Distance from an edge, in content units, that starts a prefetch
    #[serde(default = "default_prefetch_threshold")]
    pub prefetch_threshold: f64,

    #[serde(default = "default_page_debounce_ms")]
    pub page_debounce_ms: u64,

    #[serde(default = "default_chapter_debounce_ms")]
    pub chapter_debounce_ms: u64,

    /// Chapters kept in memory before edge chapters are evicted
    #[serde(default = "default_max_loaded_chapters")]
    pub max_loaded_chapters: usize,

    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,

    /// Anchor drift tolerated after an append before correcting
    #[serde(default = "default_drift_tolerance")]
    pub drift_tolerance: f64,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_prefetch_threshold() -> f64 {
    600.0
}

fn default_page_debounce_ms() -> u64 {
    100
}

fn default_chapter_debounce_ms() -> u64 {
    200
}

fn default_max_loaded_chapters() -> usize {
    6
}

fn default_fetch_workers() -> usize {
    crate::fetch::DEFAULT_FETCH_WORKERS
}

fn default_drift_tolerance() -> f64 {
    crate::insertion::DEFAULT_DRIFT_TOLERANCE
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            reading_mode: ReadingMode::default(),
            prefetch_threshold: default_prefetch_threshold(),
            page_debounce_ms: default_page_debounce_ms(),
            chapter_debounce_ms: default_chapter_debounce_ms(),
            max_loaded_chapters: default_max_loaded_chapters(),
            fetch_workers: default_fetch_workers(),
            drift_tolerance: default_drift_tolerance(),
        }
    }
}

impl ReaderSettings {
    /// `<config dir>/chapterflow/config.yaml`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut settings: ReaderSettings =
            serde_yaml::from_str(content).context("invalid reader settings")?;
        if settings.version < CURRENT_VERSION {
            migrate_settings(&mut settings);
        }
        Ok(settings.normalized())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings = Self::from_yaml_str(&content)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        debug!("Loaded settings from {path:?}");
        Ok(settings)
    }

    /// Load `path`, falling back to defaults (and writing them) when missing
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!("Settings file not found, creating with defaults at {path:?}");
            let settings = Self::default();
            if let Err(e) = settings.save_to_path(path) {
                warn!("Could not write default settings: {e:#}");
            }
            return settings;
        }

        match Self::load_from_path(path) {
            Ok(settings) => settings,
            Err(e) => {
                error!("{e:#}");
                Self::default()
            }
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create config directory {}", parent.display())
                })?;
            }
        }

        let mut content = String::from(SETTINGS_HEADER);
        content.push_str(&serde_yaml::to_string(self)?);
        fs::write(path, content)
            .with_context(|| format!("failed to save settings to {}", path.display()))?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    #[must_use]
    pub fn page_debounce(&self) -> Duration {
        Duration::from_millis(self.page_debounce_ms)
    }

    #[must_use]
    pub fn chapter_debounce(&self) -> Duration {
        Duration::from_millis(self.chapter_debounce_ms)
    }

    /// Clamp values the engine cannot work with
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.max_loaded_chapters < MIN_LOADED_CHAPTERS {
            warn!(
                "max_loaded_chapters {} too small, using {MIN_LOADED_CHAPTERS}",
                self.max_loaded_chapters
            );
            self.max_loaded_chapters = MIN_LOADED_CHAPTERS;
        }
        self.fetch_workers = self.fetch_workers.max(MIN_FETCH_WORKERS);
        if !self.prefetch_threshold.is_finite() || self.prefetch_threshold < 0.0 {
            self.prefetch_threshold = default_prefetch_threshold();
        }
        if !self.drift_tolerance.is_finite() || self.drift_tolerance < 0.0 {
            self.drift_tolerance = default_drift_tolerance();
        }
        self
    }
}

fn migrate_settings(settings: &mut ReaderSettings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // Future migrations go here:
    // if settings.version < 2 {
    //     migrate_v1_to_v2(settings);
    // }

    settings.version = CURRENT_VERSION;
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# chapterflow reader settings
# ============================================================================
# reading_mode: left_to_right | right_to_left | vertical | infinite
# prefetch_threshold: distance from an edge (content units) that starts loading
#                     the neighboring chapter
# max_loaded_chapters: chapters kept in memory (minimum 2)

"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_is_under_the_app_config_dir() {
        if let Some(path) = ReaderSettings::default_path() {
            assert!(path.ends_with(Path::new(APP_NAME).join(SETTINGS_FILENAME)));
            assert_eq!(path.parent().and_then(Path::parent), dirs::config_dir().as_deref());
        }
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let settings = ReaderSettings::from_yaml_str("reading_mode: right_to_left\n").unwrap();
        assert_eq!(settings.reading_mode, ReadingMode::RightToLeft);
        assert_eq!(settings.page_debounce(), Duration::from_millis(100));
        assert_eq!(settings.chapter_debounce(), Duration::from_millis(200));
        assert_eq!(settings.max_loaded_chapters, 6);
        assert_eq!(settings.fetch_workers, 2);
    }

    #[test]
    fn old_version_is_migrated() {
        let settings = ReaderSettings::from_yaml_str("version: 0\n").unwrap();
        assert_eq!(settings.version, CURRENT_VERSION);
    }

    #[test]
    fn invalid_values_are_clamped() {
        let yaml = "max_loaded_chapters: 1\nfetch_workers: 0\nprefetch_threshold: -5\n";
        let settings = ReaderSettings::from_yaml_str(yaml).unwrap();
        assert_eq!(settings.max_loaded_chapters, 2);
        assert_eq!(settings.fetch_workers, 2);
        assert_eq!(settings.prefetch_threshold, 600.0);
    }

    #[test]
    fn unknown_mode_is_an_error() {
        assert!(ReaderSettings::from_yaml_str("reading_mode: sideways\n").is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let settings = ReaderSettings {
            reading_mode: ReadingMode::Infinite,
            max_loaded_chapters: 4,
            ..ReaderSettings::default()
        };
        settings.save_to_path(&path).unwrap();

        let loaded = ReaderSettings::load_from_path(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let settings = ReaderSettings::load_or_default(&path);
        assert_eq!(settings, ReaderSettings::default());
        assert!(path.exists());
    }
}
