mod error;
mod types;

use std::path::Path;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveSearcher, ArchiveTransport, CandidateVideo, HttpArchiveTransport};
use crate::config::CuratorConfig;
use crate::downloader::Downloader;
use crate::library::{compute_sha256, LibraryEntry, LibraryManager};
use crate::media::{FfmpegMediaTool, MediaTool};
use crate::playlist;
use crate::selection;

pub use error::{PipelineError, PipelineResult};
pub use types::{CommittedClip, RunReport};

/// Sequences one full curation run: sweep leftovers, search, select,
/// acquire candidates one at a time, evict down to capacity, rewrite the
/// playlist. Strictly sequential; at most one download and one encode
/// are ever in flight.
pub struct CuratorPipeline {
    config: Arc<CuratorConfig>,
    searcher: ArchiveSearcher,
    downloader: Downloader,
    media: Arc<dyn MediaTool>,
    library: LibraryManager,
    seed: Option<u64>,
}

impl CuratorPipeline {
    /// Production wiring: HTTP transport against the archive endpoints,
    /// real ffprobe and ffmpeg binaries.
    pub fn new(config: Arc<CuratorConfig>) -> PipelineResult<Self> {
        let transport: Arc<dyn ArchiveTransport> = Arc::new(HttpArchiveTransport::new(&config)?);
        let media: Arc<dyn MediaTool> = Arc::new(FfmpegMediaTool::new(&config, None));
        Self::with_components(config, transport, media)
    }

    /// Wiring seam used by tests to substitute scripted transports and
    /// media tools.
    pub fn with_components(
        config: Arc<CuratorConfig>,
        transport: Arc<dyn ArchiveTransport>,
        media: Arc<dyn MediaTool>,
    ) -> PipelineResult<Self> {
        let downloader = Downloader::new(&config)?;
        let library = LibraryManager::new(&config);
        let searcher = ArchiveSearcher::new(Arc::clone(&config), transport);
        Ok(Self {
            config,
            searcher,
            downloader,
            media,
            library,
            seed: None,
        })
    }

    /// Fixes the candidate draw so a run becomes reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn library(&self) -> &LibraryManager {
        &self.library
    }

    pub async fn run(&self) -> PipelineResult<RunReport> {
        let mut report = RunReport {
            station: self.config.station.name.clone(),
            ..RunReport::default()
        };
        info!(station = %report.station, "curation run starting");

        self.library.ensure_layout()?;
        report.stale_removed = self.library.cleanup_stale()?;
        if report.stale_removed > 0 {
            info!(removed = report.stale_removed, "swept stale staging files");
        }

        if self.library.should_skip_acquisition()? {
            info!(
                capacity = self.library.capacity(),
                "library already full, refreshing playlist only"
            );
            report.acquisition_skipped = true;
            return self.finish(report);
        }

        let records = self.searcher.collect().await;
        report.records_found = records.len();
        let pool = selection::build_pool(
            records,
            self.config.limits.max_duration_seconds,
            self.config.limits.pool_size,
        );
        report.pool_size = pool.len();
        info!(
            records = report.records_found,
            pool = report.pool_size,
            "search and filtering complete"
        );

        let start_index = self.library.current_size()?;
        if pool.is_empty() {
            warn!("selection pool is empty after filtering");
        } else {
            let mut rng = self.draw_rng();
            let drawn = selection::draw_candidates(&pool, self.config.limits.capacity, &mut rng);
            report.drawn = drawn.len();
            for candidate in &drawn {
                let index = start_index + report.committed.len() + 1;
                match self.acquire(candidate, index).await {
                    Ok(clip) => {
                        info!(
                            identifier = %candidate.identifier,
                            filename = %clip.filename,
                            "candidate committed"
                        );
                        report.committed.push(clip);
                    }
                    Err(error) => {
                        warn!(
                            identifier = %candidate.identifier,
                            error = %error,
                            "candidate failed, trying the next one"
                        );
                    }
                }
            }
        }

        if report.committed.is_empty() {
            report.fallback_used = true;
            match self.acquire_fallback(start_index + 1).await {
                Ok(clip) => report.committed.push(clip),
                Err(error) => {
                    return Err(PipelineError::NothingPlayable(format!(
                        "no candidate survived and the fallback failed: {error}"
                    )));
                }
            }
        }

        self.finish(report)
    }

    /// Eviction and playlist emission, shared by the full run and the
    /// skip-when-full short circuit.
    fn finish(&self, mut report: RunReport) -> PipelineResult<RunReport> {
        report.evicted = self.library.evict_excess()?;
        let entries = self.library.entries()?;
        report.playlist_entries =
            playlist::write_playlist(&self.config.playlist_path(), &entries)?;
        if report.playlist_entries == 0 {
            return Err(PipelineError::NothingPlayable(
                "the playlist would be empty".to_string(),
            ));
        }
        info!(
            playlist_entries = report.playlist_entries,
            evicted = report.evicted,
            fallback_used = report.fallback_used,
            "curation run complete"
        );
        Ok(report)
    }

    async fn acquire(
        &self,
        candidate: &CandidateVideo,
        index: usize,
    ) -> PipelineResult<CommittedClip> {
        let resolved = self
            .searcher
            .resolve(candidate)
            .await?
            .ok_or_else(|| PipelineError::Resolution(candidate.identifier.clone()))?;
        info!(
            identifier = %candidate.identifier,
            url = %resolved.download_url,
            size_bytes = resolved.size_bytes,
            "downloading candidate"
        );
        let staged = self.library.stage_download_path();
        self.downloader
            .fetch(&resolved.download_url, &staged, Some(resolved.size_bytes))
            .await?;
        self.normalize_and_commit(candidate, &staged, index).await
    }

    /// Probe the staged download, re-encode it when the codec does not
    /// match, and promote the result into the library. The staged input
    /// never survives this function once an encode was attempted.
    async fn normalize_and_commit(
        &self,
        candidate: &CandidateVideo,
        staged: &Path,
        index: usize,
    ) -> PipelineResult<CommittedClip> {
        let target_codec = self.config.transcode.video_codec.as_str();
        let compatible = match self.media.probe(staged).await {
            Ok(probe) => {
                debug!(
                    identifier = %candidate.identifier,
                    codec = ?probe.video_codec(),
                    "probed candidate"
                );
                probe.is_compatible(target_codec)
            }
            Err(error) => {
                warn!(
                    identifier = %candidate.identifier,
                    error = %error,
                    "probe failed, re-encoding to be safe"
                );
                false
            }
        };

        let filename = self.library.entry_name(index, &candidate.identifier);
        if compatible {
            debug!(identifier = %candidate.identifier, "already compatible, committing as-is");
            return match self.library.commit(staged, &filename) {
                Ok(entry) => Ok(self.describe(candidate, entry, false)),
                Err(error) => {
                    discard(staged);
                    Err(error.into())
                }
            };
        }

        let encoded = self.library.stage_transcode_path();
        let encode_result = match self.media.transcode(staged, &encoded).await {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!(
                    identifier = %candidate.identifier,
                    error = %error,
                    "fast encode failed, falling back to stream copy"
                );
                discard(&encoded);
                self.media.remux_copy(staged, &encoded).await
            }
        };
        discard(staged);
        match encode_result {
            Ok(()) => match self.library.commit(&encoded, &filename) {
                Ok(entry) => Ok(self.describe(candidate, entry, true)),
                Err(error) => {
                    discard(&encoded);
                    Err(error.into())
                }
            },
            Err(error) => {
                discard(&encoded);
                Err(error.into())
            }
        }
    }

    /// The well-known clip that keeps the station on air when the whole
    /// candidate pool came up empty.
    async fn acquire_fallback(&self, index: usize) -> PipelineResult<CommittedClip> {
        let identifier = self.config.fallback.identifier.clone();
        info!(identifier = %identifier, "falling back to the well-known clip");
        let candidate = CandidateVideo {
            title: identifier.clone(),
            identifier,
            duration_seconds: 0,
            popularity: 0,
            source_query: "fallback".to_string(),
        };
        self.acquire(&candidate, index).await
    }

    fn describe(
        &self,
        candidate: &CandidateVideo,
        entry: LibraryEntry,
        transcoded: bool,
    ) -> CommittedClip {
        let sha256 = if self.config.download.checksums {
            match compute_sha256(&entry.path) {
                Ok(digest) => {
                    info!(filename = %entry.filename, sha256 = %digest, "committed clip digest");
                    Some(digest)
                }
                Err(error) => {
                    warn!(filename = %entry.filename, error = %error, "checksum failed");
                    None
                }
            }
        } else {
            None
        };
        CommittedClip {
            filename: entry.filename,
            identifier: candidate.identifier.clone(),
            title: candidate.title.clone(),
            transcoded,
            sha256,
        }
    }

    fn draw_rng(&self) -> ChaCha20Rng {
        match self.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        }
    }
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => {
            warn!(path = %path.display(), error = %error, "failed to remove staging file");
        }
    }
}
