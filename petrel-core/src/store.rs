//! Spill File Store
//!
//! Persistent-storage side of the pipeline: a flat directory of spill files,
//! each named for its UTC creation time (`%d%H%M%S.BIN`, to the second) and
//! holding raw back-to-back frames. Day-of-month leads the name so
//! lexicographic order is creation order; a full month of wrap-around is far
//! more data than the storage this targets can hold.
//!
//! Free space is tracked as a byte quota over the spill root: free = quota
//! minus the summed size of files present. This models a dedicated log
//! partition without a platform statvfs dependency, and lets tests squeeze
//! the store by dropping filler files into the root.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info};

use crate::errors::{TelemetryError, TelemetryResult};

/// Spill file name shape, matched when scanning the root
const SPILL_SUFFIX: &str = ".BIN";

/// Spill directory with quota-based free-space accounting
pub struct SpillStore {
    root: PathBuf,
    quota_bytes: u64,
}

impl SpillStore {
    /// Open (creating if needed) the spill root with the given byte quota
    pub fn open(root: impl Into<PathBuf>, quota_bytes: u64) -> TelemetryResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| storage_err(&root, e))?;
        Ok(Self { root, quota_bytes })
    }

    /// Spill root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Total quota in KiB
    pub fn total_kib(&self) -> u64 {
        self.quota_bytes / 1024
    }

    /// Remaining quota in KiB
    pub fn free_kib(&self) -> TelemetryResult<u64> {
        let used = self.used_bytes()?;
        Ok(self.quota_bytes.saturating_sub(used) / 1024)
    }

    /// Bytes currently held by files under the root
    pub fn used_bytes(&self) -> TelemetryResult<u64> {
        let mut used = 0;
        for entry in fs::read_dir(&self.root).map_err(|e| storage_err(&self.root, e))? {
            let entry = entry.map_err(|e| storage_err(&self.root, e))?;
            let meta = entry.metadata().map_err(|e| storage_err(&entry.path(), e))?;
            if meta.is_file() {
                used += meta.len();
            }
        }
        Ok(used)
    }

    /// Oldest spill file by name order, if any
    pub fn oldest_file(&self) -> TelemetryResult<Option<PathBuf>> {
        let mut names: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| storage_err(&self.root, e))? {
            let entry = entry.map_err(|e| storage_err(&self.root, e))?;
            let path = entry.path();
            let is_spill = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(SPILL_SUFFIX));
            if is_spill && path.is_file() {
                names.push(path);
            }
        }
        names.sort();
        Ok(names.into_iter().next())
    }

    /// Any spill files present? Used by the startup scan.
    pub fn has_files(&self) -> TelemetryResult<bool> {
        Ok(self.oldest_file()?.is_some())
    }

    /// Open the named spill file for reading
    ///
    /// The file was just listed; failing to open it now is corruption-tier.
    pub fn open_for_read(&self, path: &Path) -> TelemetryResult<File> {
        File::open(path).map_err(|e| storage_err(path, e))
    }

    /// Create a fresh spill file named for the current UTC second
    pub fn create_file(&self) -> TelemetryResult<(File, PathBuf)> {
        let name = Utc::now().format("%d%H%M%S").to_string() + SPILL_SUFFIX;
        let path = self.root.join(name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| storage_err(&path, e))?;
        info!("spilling ring buffer to: {}", path.display());
        Ok((file, path))
    }

    /// Delete a fully consumed spill file
    pub fn remove(&self, path: &Path) -> TelemetryResult<()> {
        fs::remove_file(path).map_err(|e| storage_err(path, e))?;
        debug!("unlinked published spill file: {}", path.display());
        Ok(())
    }

    /// Log current occupancy at info level
    pub fn log_free_space(&self) {
        if let Ok(free) = self.free_kib() {
            info!("{:5} / {:5} KiB free / total spill space", free, self.total_kib());
        }
    }
}

fn storage_err(path: &Path, source: std::io::Error) -> TelemetryError {
    TelemetryError::Storage {
        path: path.display().to_string(),
        source,
    }
}
