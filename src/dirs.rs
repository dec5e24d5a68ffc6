//! Working directories for uploads, exports, and temporary files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Which working directories a cleanup request targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupKind {
    Exports,
    Uploads,
    Temp,
    #[default]
    All,
}

/// Unrecognized kinds fall back to a full cleanup.
impl<'de> Deserialize<'de> for CleanupKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(match value.as_str() {
            "exports" => CleanupKind::Exports,
            "uploads" => CleanupKind::Uploads,
            "temp" => CleanupKind::Temp,
            _ => CleanupKind::All,
        })
    }
}

/// File count and total byte size of one directory.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DirStats {
    pub files: usize,
    pub size: u64,
}

/// The three on-disk working directories, created on startup.
#[derive(Debug, Clone)]
pub struct WorkDirs {
    pub uploads: PathBuf,
    pub exports: PathBuf,
    pub temp: PathBuf,
}

impl WorkDirs {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            uploads: root.join("uploads"),
            exports: root.join("exports"),
            temp: root.join("temp"),
        }
    }

    pub fn ensure(&self) -> io::Result<()> {
        for dir in [&self.uploads, &self.exports, &self.temp] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Delete every regular file in the targeted directories. Returns how
    /// many files were removed. Subdirectories are left alone.
    pub fn cleanup(&self, kind: CleanupKind) -> io::Result<usize> {
        let targets: &[&PathBuf] = match kind {
            CleanupKind::Exports => &[&self.exports],
            CleanupKind::Uploads => &[&self.uploads],
            CleanupKind::Temp => &[&self.temp],
            CleanupKind::All => &[&self.exports, &self.uploads, &self.temp],
        };

        let mut deleted = 0;
        for dir in targets {
            deleted += delete_files_in(dir)?;
        }
        info!(?kind, deleted, "working directory cleanup");
        Ok(deleted)
    }

    pub fn stats_for(&self, dir: &Path) -> DirStats {
        let mut stats = DirStats::default();
        let Ok(entries) = fs::read_dir(dir) else {
            return stats;
        };
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata() {
                if meta.is_file() {
                    stats.files += 1;
                    stats.size += meta.len();
                }
            }
        }
        stats
    }
}

fn delete_files_in(dir: &Path) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut deleted = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path)?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_dirs() -> (tempfile::TempDir, WorkDirs) {
        let root = tempfile::tempdir().unwrap();
        let dirs = WorkDirs::new(root.path());
        dirs.ensure().unwrap();
        fs::write(dirs.uploads.join("a.pdf"), b"aaaa").unwrap();
        fs::write(dirs.exports.join("b.txt"), b"bb").unwrap();
        fs::write(dirs.exports.join("c.txt"), b"c").unwrap();
        (root, dirs)
    }

    #[test]
    fn ensure_creates_all_three_directories() {
        let root = tempfile::tempdir().unwrap();
        let dirs = WorkDirs::new(root.path());
        dirs.ensure().unwrap();
        assert!(dirs.uploads.is_dir());
        assert!(dirs.exports.is_dir());
        assert!(dirs.temp.is_dir());
    }

    #[test]
    fn cleanup_targets_only_the_requested_kind() {
        let (_root, dirs) = seeded_dirs();
        let deleted = dirs.cleanup(CleanupKind::Exports).unwrap();
        assert_eq!(deleted, 2);
        assert!(dirs.uploads.join("a.pdf").exists());
    }

    #[test]
    fn cleanup_all_counts_every_directory() {
        let (_root, dirs) = seeded_dirs();
        assert_eq!(dirs.cleanup(CleanupKind::All).unwrap(), 3);
        assert_eq!(dirs.stats_for(&dirs.exports).files, 0);
    }

    #[test]
    fn stats_count_files_and_bytes() {
        let (_root, dirs) = seeded_dirs();
        let stats = dirs.stats_for(&dirs.exports);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.size, 3);
    }

    #[test]
    fn stats_of_missing_directory_are_zero() {
        let root = tempfile::tempdir().unwrap();
        let dirs = WorkDirs::new(root.path());
        let stats = dirs.stats_for(&dirs.temp);
        assert_eq!(stats.files, 0);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn cleanup_kind_deserializes_lowercase() {
        let kind: CleanupKind = serde_json::from_str("\"uploads\"").unwrap();
        assert_eq!(kind, CleanupKind::Uploads);
    }

    #[test]
    fn unknown_cleanup_kind_falls_back_to_all() {
        let kind: CleanupKind = serde_json::from_str("\"caches\"").unwrap();
        assert_eq!(kind, CleanupKind::All);
    }
}
