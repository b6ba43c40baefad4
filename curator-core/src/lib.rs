pub mod archive;
pub mod config;
pub mod downloader;
pub mod library;
pub mod media;
pub mod pipeline;
pub mod playlist;
pub mod selection;

pub use archive::{
    ArchiveError, ArchiveResult, ArchiveSearcher, ArchiveTransport, CandidateVideo,
    HttpArchiveTransport, ItemFile, ItemMetadata, ResolvedAsset, SearchDoc,
};
pub use config::{load_curator_config, ConfigError, ConfigResult, CuratorConfig, DiscoveryProfile};
pub use downloader::{DownloadError, DownloadResult, Downloader};
pub use library::{compute_sha256, LibraryEntry, LibraryError, LibraryManager, LibraryResult};
pub use media::{
    CommandExecutor, FfmpegMediaTool, MediaError, MediaResult, MediaTool, ProbeReport, StreamInfo,
    SystemCommandExecutor,
};
pub use pipeline::{CommittedClip, CuratorPipeline, PipelineError, PipelineResult, RunReport};
pub use playlist::{write_playlist, PlaylistError, PlaylistResult};
pub use selection::{build_pool, draw_candidates};
