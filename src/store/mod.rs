//! Category-partitioned reports store: the single component allowed to
//! write under the reports root.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::config::CoreConfig;
use crate::security::path::safe_file_name;
use crate::utils::clock::Clock;
use crate::utils::filename_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportCategory {
    Health,
    System,
    Collection,
    Tests,
    Logs,
    Metadata,
    Incidents,
}

impl ReportCategory {
    pub const ALL: [ReportCategory; 7] = [
        ReportCategory::Health,
        ReportCategory::System,
        ReportCategory::Collection,
        ReportCategory::Tests,
        ReportCategory::Logs,
        ReportCategory::Metadata,
        ReportCategory::Incidents,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            ReportCategory::Health => "health",
            ReportCategory::System => "system",
            ReportCategory::Collection => "collection",
            ReportCategory::Tests => "tests",
            ReportCategory::Logs => "logs",
            ReportCategory::Metadata => "metadata",
            ReportCategory::Incidents => "incidents",
        }
    }

    fn default_extension(&self) -> &'static str {
        match self {
            ReportCategory::Logs => "log",
            _ => "json",
        }
    }

    fn index(&self) -> usize {
        ReportCategory::ALL
            .iter()
            .position(|c| c == self)
            .unwrap_or(0)
    }
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Writes are serialised per category directory so two concurrent callers
/// never interleave within one category.
pub struct ReportsStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    locks: [Mutex<()>; 7],
}

impl ReportsStore {
    pub fn new(config: &CoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = config.reports_root.clone();
        for category in ReportCategory::ALL {
            fs::create_dir_all(root.join(category.dir_name()))
                .context(format!("Failed to create {} directory", category))?;
        }
        info!("Reports store rooted at {}", root.display());
        Ok(ReportsStore {
            root,
            clock,
            locks: Default::default(),
        })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn category_dir(&self, category: ReportCategory) -> PathBuf {
        self.root.join(category.dir_name())
    }

    /// Write `bytes` into the category directory. A caller-supplied name is
    /// sanitised and used verbatim; otherwise `<category>-<timestamp>.<ext>`.
    pub fn save(
        &self,
        category: ReportCategory,
        bytes: &[u8],
        name: Option<&str>,
    ) -> Result<PathBuf> {
        let _guard = self.locks[category.index()]
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let file_name = match name {
            Some(name) => safe_file_name(name),
            None => format!(
                "{}-{}.{}",
                category.dir_name(),
                filename_timestamp(self.clock.now()),
                category.default_extension()
            ),
        };
        let path = self.category_dir(category).join(file_name);
        fs::write(&path, bytes)
            .context(format!("Failed to write {}", path.display()))?;
        debug!("Saved {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }

    pub fn save_health(&self, bytes: &[u8], name: Option<&str>) -> Result<PathBuf> {
        self.save(ReportCategory::Health, bytes, name)
    }

    pub fn save_system(&self, bytes: &[u8], name: Option<&str>) -> Result<PathBuf> {
        self.save(ReportCategory::System, bytes, name)
    }

    pub fn save_collection(&self, bytes: &[u8], name: Option<&str>) -> Result<PathBuf> {
        self.save(ReportCategory::Collection, bytes, name)
    }

    pub fn save_test(&self, bytes: &[u8], name: Option<&str>) -> Result<PathBuf> {
        self.save(ReportCategory::Tests, bytes, name)
    }

    pub fn save_log(&self, bytes: &[u8], name: Option<&str>) -> Result<PathBuf> {
        self.save(ReportCategory::Logs, bytes, name)
    }

    pub fn save_metadata(&self, bytes: &[u8], name: Option<&str>) -> Result<PathBuf> {
        self.save(ReportCategory::Metadata, bytes, name)
    }

    /// Delete regular files older than `max_age` in every category
    /// directory. Per-file errors are logged and skipped.
    pub fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        let now = std::time::SystemTime::now();
        let mut deleted = 0;
        for category in ReportCategory::ALL {
            let _guard = self.locks[category.index()]
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let dir = self.category_dir(category);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Cannot read {}: {}", dir.display(), e);
                    continue;
                }
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                let metadata = match entry.metadata() {
                    Ok(m) if m.is_file() => m,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Cannot stat {}: {}", path.display(), e);
                        continue;
                    }
                };
                let age = metadata
                    .modified()
                    .ok()
                    .and_then(|mtime| now.duration_since(mtime).ok());
                if matches!(age, Some(age) if age > max_age) {
                    match fs::remove_file(&path) {
                        Ok(()) => {
                            debug!("Removed stale report {}", path.display());
                            deleted += 1;
                        }
                        Err(e) => warn!("Cannot remove {}: {}", path.display(), e),
                    }
                }
            }
        }
        if deleted > 0 {
            info!("Cleanup removed {} stale report files", deleted);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::FixedClock;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> ReportsStore {
        let config = CoreConfig {
            reports_root: temp.path().to_path_buf(),
            ..Default::default()
        };
        ReportsStore::new(&config, Arc::new(FixedClock::epoch_2024())).unwrap()
    }

    #[test]
    fn test_new_creates_all_category_directories() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for category in ReportCategory::ALL {
            assert!(store.category_dir(category).is_dir(), "{}", category);
        }
    }

    #[test]
    fn test_save_with_generated_name() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let path = store.save_health(b"{}", None).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "health-20240115_143052.json"
        );
        assert_eq!(fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn test_save_sanitises_caller_name() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let path = store
            .save_collection(b"data", Some("../escape/run:1.json"))
            .unwrap();
        assert!(path.starts_with(store.category_dir(ReportCategory::Collection)));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "_escape_run_1.json"
        );
    }

    #[test]
    fn test_log_category_uses_log_extension() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let path = store.save_log(b"line\n", None).unwrap();
        assert!(path.to_str().unwrap().ends_with(".log"));
    }

    #[test]
    fn test_cleanup_removes_only_old_files() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let old = store.save_system(b"old", Some("old.json")).unwrap();
        let fresh = store.save_system(b"new", Some("new.json")).unwrap();

        // age the first file artificially
        let stale = std::time::SystemTime::now() - Duration::from_secs(60 * 60 * 24 * 7);
        filetime_set(&old, stale);

        let deleted = store
            .cleanup_older_than(Duration::from_secs(60 * 60 * 24))
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    fn filetime_set(path: &std::path::Path, to: std::time::SystemTime) {
        // no direct std API for mtime; reuse the file handle route
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_times(
            fs::FileTimes::new().set_modified(to),
        )
        .unwrap();
    }
}
