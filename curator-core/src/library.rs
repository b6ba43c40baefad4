use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CuratorConfig;

/// Suffix for in-flight files. Anything carrying it is invisible to the
/// rotation accounting and safe to delete at startup.
const STAGING_SUFFIX: &str = "part";

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("library io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type LibraryResult<T> = std::result::Result<T, LibraryError>;

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> LibraryError + '_ {
    move |source| LibraryError::Io {
        source,
        path: path.to_path_buf(),
    }
}

/// One committed clip on disk.
#[derive(Debug, Clone)]
pub struct LibraryEntry {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

/// Owns the on-disk clip directory: counting, staging, committing,
/// evicting. Files only count once they carry the playable extension;
/// staged temporaries keep a `.part` suffix until the atomic rename.
pub struct LibraryManager {
    dir: PathBuf,
    capacity: usize,
    extension: String,
}

impl LibraryManager {
    pub fn new(config: &CuratorConfig) -> Self {
        Self {
            dir: config.library_dir().to_path_buf(),
            capacity: config.limits.capacity,
            extension: config.download.extension.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ensure_layout(&self) -> LibraryResult<()> {
        fs::create_dir_all(&self.dir).map_err(io_at(&self.dir))
    }

    pub fn current_size(&self) -> LibraryResult<usize> {
        Ok(self.entries()?.len())
    }

    /// True once the library already holds a full rotation.
    pub fn should_skip_acquisition(&self) -> LibraryResult<bool> {
        Ok(self.current_size()? >= self.capacity)
    }

    /// Committed entries, oldest first. Ordering comes from filesystem
    /// modification times so it survives process restarts.
    pub fn entries(&self) -> LibraryResult<Vec<LibraryEntry>> {
        let mut entries = Vec::new();
        let read_dir = fs::read_dir(&self.dir).map_err(io_at(&self.dir))?;
        for dirent in read_dir {
            let dirent = dirent.map_err(io_at(&self.dir))?;
            let path = dirent.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
                .unwrap_or(false);
            if !matches {
                continue;
            }
            let metadata = dirent.metadata().map_err(io_at(&path))?;
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .map_err(io_at(&path))?;
            let filename = match path.file_name() {
                Some(name) => name.to_string_lossy().to_string(),
                None => continue,
            };
            entries.push(LibraryEntry {
                filename,
                path,
                size_bytes: metadata.len(),
                modified,
            });
        }
        entries.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(entries)
    }

    /// Delete oldest entries until the library fits its capacity again.
    /// Individual delete failures are logged and skipped; the rotation
    /// must keep moving even if one file is briefly locked.
    pub fn evict_excess(&self) -> LibraryResult<usize> {
        let entries = self.entries()?;
        if entries.len() <= self.capacity {
            return Ok(0);
        }
        let excess = entries.len() - self.capacity;
        let mut removed = 0;
        for entry in entries.iter().take(excess) {
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    info!(filename = %entry.filename, "evicted oldest clip");
                    removed += 1;
                }
                Err(error) => {
                    warn!(filename = %entry.filename, error = %error, "failed to evict clip");
                }
            }
        }
        Ok(removed)
    }

    pub fn stage_download_path(&self) -> PathBuf {
        self.dir
            .join(format!("dl_{}.{STAGING_SUFFIX}", Uuid::new_v4()))
    }

    pub fn stage_transcode_path(&self) -> PathBuf {
        self.dir
            .join(format!("tc_{}.{STAGING_SUFFIX}", Uuid::new_v4()))
    }

    /// Remove leftover staging files from interrupted runs.
    pub fn cleanup_stale(&self) -> LibraryResult<usize> {
        let read_dir = fs::read_dir(&self.dir).map_err(io_at(&self.dir))?;
        let mut removed = 0;
        for dirent in read_dir {
            let dirent = dirent.map_err(io_at(&self.dir))?;
            let path = dirent.path();
            let stale = path
                .extension()
                .map(|ext| ext == STAGING_SUFFIX)
                .unwrap_or(false);
            if !stale || !path.is_file() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "failed to remove stale staging file");
                }
            }
        }
        Ok(removed)
    }

    /// Filename for the next committed entry. The index keeps an audit
    /// trail of acquisition order in directory listings.
    pub fn entry_name(&self, index: usize, identifier: &str) -> String {
        format!(
            "video_{:02}_{}.{}",
            index,
            sanitize_identifier(identifier),
            self.extension
        )
    }

    /// Atomically promote a staged file into the library.
    pub fn commit(&self, staged: &Path, filename: &str) -> LibraryResult<LibraryEntry> {
        let target = self.dir.join(filename);
        fs::rename(staged, &target).map_err(io_at(&target))?;
        let metadata = fs::metadata(&target).map_err(io_at(&target))?;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(io_at(&target))?;
        info!(filename = %filename, size_bytes = metadata.len(), "committed clip to library");
        Ok(LibraryEntry {
            filename: filename.to_string(),
            path: target,
            size_bytes: metadata.len(),
            modified,
        })
    }
}

/// Identifiers come from a remote catalog and may carry characters that
/// have no business in a filename.
fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

pub fn compute_sha256(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
