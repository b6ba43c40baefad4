use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::library::LibraryEntry;

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("failed to write playlist {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type PlaylistResult<T> = std::result::Result<T, PlaylistError>;

/// Concat-demuxer body, one `file` directive per committed clip.
/// Entries are referenced by bare filename; the playlist sits in the
/// same directory, so the demuxer resolves them without `-safe 0`
/// games. Filenames come out of the library's sanitizer and never
/// contain quotes.
pub fn render(entries: &[LibraryEntry]) -> String {
    let mut content = String::new();
    for entry in entries {
        content.push_str(&format!("file '{}'\n", entry.filename));
    }
    content
}

/// Overwrite the playlist with the current library contents. Returns the
/// number of entries written; the caller decides whether zero is fatal.
pub fn write_playlist(path: &Path, entries: &[LibraryEntry]) -> PlaylistResult<usize> {
    let content = render(entries);
    fs::write(path, content).map_err(|source| PlaylistError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    info!(path = %path.display(), entries = entries.len(), "playlist rewritten");
    Ok(entries.len())
}
