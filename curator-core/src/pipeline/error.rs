use thiserror::Error;

use crate::archive::ArchiveError;
use crate::downloader::DownloadError;
use crate::library::LibraryError;
use crate::media::MediaError;
use crate::playlist::PlaylistError;

/// Run-level error classes. Per-candidate failures are absorbed by the
/// orchestrator and logged; what escapes here either aborts the run
/// outright or, for `NothingPlayable`, marks the fatal terminal state.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("catalog lookup failed: {0}")]
    Catalog(String),
    #[error("candidate has no playable file: {0}")]
    Resolution(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("media handling failed: {0}")]
    Media(String),
    #[error("library error: {0}")]
    Library(String),
    #[error("playlist error: {0}")]
    Playlist(String),
    #[error("nothing playable: {0}")]
    NothingPlayable(String),
}

impl From<ArchiveError> for PipelineError {
    fn from(error: ArchiveError) -> Self {
        PipelineError::Catalog(error.to_string())
    }
}

impl From<DownloadError> for PipelineError {
    fn from(error: DownloadError) -> Self {
        PipelineError::Download(error.to_string())
    }
}

impl From<MediaError> for PipelineError {
    fn from(error: MediaError) -> Self {
        PipelineError::Media(error.to_string())
    }
}

impl From<LibraryError> for PipelineError {
    fn from(error: LibraryError) -> Self {
        PipelineError::Library(error.to_string())
    }
}

impl From<PlaylistError> for PipelineError {
    fn from(error: PlaylistError) -> Self {
        PipelineError::Playlist(error.to_string())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
