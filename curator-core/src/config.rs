use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Immutable configuration for a curator run. Loaded once from TOML and
/// passed by reference into the pipeline; nothing mutates it afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CuratorConfig {
    pub station: StationSection,
    pub paths: PathsSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub download: DownloadSection,
    #[serde(default)]
    pub transcode: TranscodeSection,
    #[serde(default)]
    pub fallback: FallbackSection,
}

impl CuratorConfig {
    pub fn library_dir(&self) -> &Path {
        Path::new(&self.paths.library_dir)
    }

    /// The playlist lives next to the clips it references so the
    /// concat demuxer resolves bare filenames against the same directory.
    pub fn playlist_path(&self) -> PathBuf {
        self.library_dir().join(&self.paths.playlist_name)
    }
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            station: StationSection::default(),
            paths: PathsSection::default(),
            limits: LimitsSection::default(),
            search: SearchSection::default(),
            download: DownloadSection::default(),
            transcode: TranscodeSection::default(),
            fallback: FallbackSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationSection {
    pub name: String,
    pub environment: String,
}

impl Default for StationSection {
    fn default() -> Self {
        Self {
            name: "midnight-signal".to_string(),
            environment: "production".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub library_dir: String,
    #[serde(default = "PathsSection::default_playlist_name")]
    pub playlist_name: String,
    #[serde(default = "PathsSection::default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "PathsSection::default_ffprobe")]
    pub ffprobe: String,
}

impl PathsSection {
    fn default_playlist_name() -> String {
        "playlist.txt".to_string()
    }

    fn default_ffmpeg() -> String {
        "ffmpeg".to_string()
    }

    fn default_ffprobe() -> String {
        "ffprobe".to_string()
    }
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            library_dir: "content/main_channel".to_string(),
            playlist_name: Self::default_playlist_name(),
            ffmpeg: Self::default_ffmpeg(),
            ffprobe: Self::default_ffprobe(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "LimitsSection::default_capacity")]
    pub capacity: usize,
    #[serde(default = "LimitsSection::default_max_duration_seconds")]
    pub max_duration_seconds: u64,
    #[serde(default = "LimitsSection::default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "LimitsSection::default_rows_per_query")]
    pub rows_per_query: u32,
}

impl LimitsSection {
    const fn default_capacity() -> usize {
        5
    }

    const fn default_max_duration_seconds() -> u64 {
        900
    }

    const fn default_pool_size() -> usize {
        40
    }

    const fn default_rows_per_query() -> u32 {
        50
    }
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
            max_duration_seconds: Self::default_max_duration_seconds(),
            pool_size: Self::default_pool_size(),
            rows_per_query: Self::default_rows_per_query(),
        }
    }
}

/// Named query sets for discovery. The broad profile trawls the big
/// public-domain collections; the narrow one sticks to short-form ads
/// and infomercials that fit the overnight block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryProfile {
    Broad,
    Narrow,
}

impl DiscoveryProfile {
    pub fn queries(&self) -> &'static [&'static str] {
        match self {
            DiscoveryProfile::Broad => &[
                "collection:prelinger AND mediatype:movies",
                "collection:classic_tv_commercials AND mediatype:movies",
                "subject:\"infomercial\" AND mediatype:movies",
                "subject:\"public service announcement\" AND mediatype:movies",
            ],
            DiscoveryProfile::Narrow => &[
                "collection:classic_tv_commercials AND mediatype:movies",
                "subject:\"infomercial\" AND mediatype:movies",
            ],
        }
    }
}

impl Default for DiscoveryProfile {
    fn default() -> Self {
        DiscoveryProfile::Broad
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "SearchSection::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "SearchSection::default_metadata_endpoint")]
    pub metadata_endpoint: String,
    #[serde(default)]
    pub profile: DiscoveryProfile,
    /// Explicit query list; when non-empty it overrides the profile.
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default = "SearchSection::default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "SearchSection::default_query_delay_ms")]
    pub query_delay_ms: u64,
}

impl SearchSection {
    fn default_endpoint() -> String {
        "https://archive.org/advancedsearch.php".to_string()
    }

    fn default_metadata_endpoint() -> String {
        "https://archive.org/metadata".to_string()
    }

    const fn default_request_timeout_seconds() -> u64 {
        20
    }

    const fn default_query_delay_ms() -> u64 {
        1000
    }

    pub fn effective_queries(&self) -> Vec<String> {
        if self.queries.is_empty() {
            self.profile
                .queries()
                .iter()
                .map(|q| q.to_string())
                .collect()
        } else {
            self.queries.clone()
        }
    }
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            metadata_endpoint: Self::default_metadata_endpoint(),
            profile: DiscoveryProfile::default(),
            queries: Vec::new(),
            request_timeout_seconds: Self::default_request_timeout_seconds(),
            query_delay_ms: Self::default_query_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    #[serde(default = "DownloadSection::default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "DownloadSection::default_progress_interval_seconds")]
    pub progress_interval_seconds: u64,
    #[serde(default = "DownloadSection::default_extension")]
    pub extension: String,
    #[serde(default = "DownloadSection::default_checksums")]
    pub checksums: bool,
}

impl DownloadSection {
    const fn default_timeout_seconds() -> u64 {
        300
    }

    const fn default_progress_interval_seconds() -> u64 {
        10
    }

    fn default_extension() -> String {
        "mp4".to_string()
    }

    const fn default_checksums() -> bool {
        true
    }
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            timeout_seconds: Self::default_timeout_seconds(),
            progress_interval_seconds: Self::default_progress_interval_seconds(),
            extension: Self::default_extension(),
            checksums: Self::default_checksums(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeSection {
    /// Codec name ffprobe reports when no re-encode is needed.
    #[serde(default = "TranscodeSection::default_video_codec")]
    pub video_codec: String,
    #[serde(default = "TranscodeSection::default_encoder")]
    pub encoder: String,
    #[serde(default = "TranscodeSection::default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "TranscodeSection::default_preset")]
    pub preset: String,
    #[serde(default = "TranscodeSection::default_tune")]
    pub tune: String,
    #[serde(default = "TranscodeSection::default_crf")]
    pub crf: u8,
    #[serde(default = "TranscodeSection::default_maxrate")]
    pub maxrate: String,
    #[serde(default = "TranscodeSection::default_bufsize")]
    pub bufsize: String,
    #[serde(default = "TranscodeSection::default_audio_rate")]
    pub audio_rate: u32,
    #[serde(default = "TranscodeSection::default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default = "TranscodeSection::default_audio_channels")]
    pub audio_channels: u8,
    #[serde(default = "TranscodeSection::default_probe_timeout_seconds")]
    pub probe_timeout_seconds: u64,
    #[serde(default = "TranscodeSection::default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "TranscodeSection::default_copy_timeout_seconds")]
    pub copy_timeout_seconds: u64,
}

impl TranscodeSection {
    fn default_video_codec() -> String {
        "h264".to_string()
    }

    fn default_encoder() -> String {
        "libx264".to_string()
    }

    fn default_audio_codec() -> String {
        "aac".to_string()
    }

    fn default_preset() -> String {
        "ultrafast".to_string()
    }

    fn default_tune() -> String {
        "zerolatency".to_string()
    }

    const fn default_crf() -> u8 {
        23
    }

    fn default_maxrate() -> String {
        "1000k".to_string()
    }

    fn default_bufsize() -> String {
        "2000k".to_string()
    }

    const fn default_audio_rate() -> u32 {
        44100
    }

    fn default_audio_bitrate() -> String {
        "192k".to_string()
    }

    const fn default_audio_channels() -> u8 {
        2
    }

    const fn default_probe_timeout_seconds() -> u64 {
        15
    }

    const fn default_timeout_seconds() -> u64 {
        120
    }

    const fn default_copy_timeout_seconds() -> u64 {
        45
    }
}

impl Default for TranscodeSection {
    fn default() -> Self {
        Self {
            video_codec: Self::default_video_codec(),
            encoder: Self::default_encoder(),
            audio_codec: Self::default_audio_codec(),
            preset: Self::default_preset(),
            tune: Self::default_tune(),
            crf: Self::default_crf(),
            maxrate: Self::default_maxrate(),
            bufsize: Self::default_bufsize(),
            audio_rate: Self::default_audio_rate(),
            audio_bitrate: Self::default_audio_bitrate(),
            audio_channels: Self::default_audio_channels(),
            probe_timeout_seconds: Self::default_probe_timeout_seconds(),
            timeout_seconds: Self::default_timeout_seconds(),
            copy_timeout_seconds: Self::default_copy_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackSection {
    #[serde(default = "FallbackSection::default_identifier")]
    pub identifier: String,
}

impl FallbackSection {
    fn default_identifier() -> String {
        "infomercial-popeil-pocket-fisherman".to_string()
    }
}

impl Default for FallbackSection {
    fn default() -> Self {
        Self {
            identifier: Self::default_identifier(),
        }
    }
}

pub fn load_curator_config<P: AsRef<Path>>(path: P) -> ConfigResult<CuratorConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> ConfigResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/curator.toml");
        let config = load_curator_config(path).expect("config should parse");
        assert_eq!(config.station.name, "midnight-signal");
        assert_eq!(config.limits.capacity, 5);
        assert_eq!(config.transcode.video_codec, "h264");
        assert_eq!(config.fallback.identifier, "infomercial-popeil-pocket-fisherman");
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let parsed: CuratorConfig = toml::from_str(
            r#"
            [station]
            name = "midnight-signal"
            environment = "test"

            [paths]
            library_dir = "/tmp/library"
            "#,
        )
        .expect("partial config should parse");
        assert_eq!(parsed.paths.playlist_name, "playlist.txt");
        assert_eq!(parsed.limits.capacity, 5);
        assert_eq!(parsed.transcode.preset, "ultrafast");
        assert!(parsed.download.checksums);
    }

    #[test]
    fn explicit_queries_override_profile() {
        let mut section = SearchSection::default();
        assert_eq!(section.effective_queries().len(), 4);
        section.profile = DiscoveryProfile::Narrow;
        assert_eq!(section.effective_queries().len(), 2);
        section.queries = vec!["collection:sabucat AND mediatype:movies".to_string()];
        assert_eq!(section.effective_queries().len(), 1);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_curator_config("/nonexistent/curator.toml").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/curator.toml"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
