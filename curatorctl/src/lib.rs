use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;

use curator_core::config::DiscoveryProfile;
use curator_core::library::LibraryManager;
use curator_core::pipeline::{CuratorPipeline, PipelineError, RunReport};
use curator_core::{load_curator_config, CuratorConfig};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] curator_core::ConfigError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("one or more health checks failed")]
    ChecksFailed,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Overnight curator control interface", long_about = None)]
pub struct Cli {
    /// Path to curator.toml
    #[arg(long, default_value = "configs/curator.toml")]
    pub config: PathBuf,
    /// Override for the library directory
    #[arg(long)]
    pub library_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one full curation pass
    Run(RunArgs),
    /// Show the library and playlist state
    Status,
    /// Verify configuration, directories, and external tools
    Health,
    /// Emit shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Fix the candidate draw for a reproducible run
    #[arg(long)]
    pub seed: Option<u64>,
    /// Discovery profile override
    #[arg(long, value_enum)]
    pub profile: Option<ProfileArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProfileArg {
    Broad,
    Narrow,
}

impl From<ProfileArg> for DiscoveryProfile {
    fn from(value: ProfileArg) -> Self {
        match value {
            ProfileArg::Broad => DiscoveryProfile::Broad,
            ProfileArg::Narrow => DiscoveryProfile::Narrow,
        }
    }
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: Shell,
}

pub async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Completions(args) => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            clap_complete::generate(args.shell, &mut command, name, &mut io::stdout());
        }
        Commands::Run(args) => {
            let context = AppContext::new(&cli)?;
            let report = context.run_pipeline(args).await?;
            render(&report, cli.format)?;
        }
        Commands::Status => {
            let context = AppContext::new(&cli)?;
            let status = context.gather_status();
            render(&status, cli.format)?;
        }
        Commands::Health => {
            let context = AppContext::new(&cli)?;
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::ChecksFailed);
            }
        }
    }
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

struct AppContext {
    config: Arc<CuratorConfig>,
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_curator_config(&cli.config)?;
        if let Some(dir) = &cli.library_dir {
            config.paths.library_dir = dir.to_string_lossy().to_string();
        }
        Ok(Self {
            config: Arc::new(config),
            config_path: cli.config.clone(),
        })
    }

    async fn run_pipeline(&self, args: &RunArgs) -> Result<RunReport> {
        let mut config = (*self.config).clone();
        apply_run_overrides(&mut config, args);
        let mut pipeline = CuratorPipeline::new(Arc::new(config))?;
        if let Some(seed) = args.seed {
            pipeline = pipeline.with_seed(seed);
        }
        Ok(pipeline.run().await?)
    }

    fn gather_status(&self) -> StatusReport {
        let manager = LibraryManager::new(&self.config);
        // A missing library directory just means no run has happened yet.
        let entries = manager.entries().unwrap_or_default();
        let playlist_entries = std::fs::read_to_string(self.config.playlist_path())
            .ok()
            .map(|content| content.lines().filter(|line| !line.trim().is_empty()).count());
        StatusReport {
            station: self.config.station.name.clone(),
            environment: self.config.station.environment.clone(),
            library_dir: self.config.paths.library_dir.clone(),
            capacity: self.config.limits.capacity,
            clips: entries
                .into_iter()
                .map(|entry| ClipRow {
                    filename: entry.filename,
                    size_bytes: entry.size_bytes,
                    modified: entry.modified,
                })
                .collect(),
            playlist_entries,
        }
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        vec![
            check_path("curator.toml", &self.config_path),
            check_directory("library", self.config.library_dir()),
            check_playlist("playlist", &self.config.playlist_path()),
            check_tool("ffmpeg", &self.config.paths.ffmpeg),
            check_tool("ffprobe", &self.config.paths.ffprobe),
        ]
    }
}

/// A profile flag on the command line wins over a query list pinned in
/// the config file.
fn apply_run_overrides(config: &mut CuratorConfig, args: &RunArgs) {
    if let Some(profile) = args.profile {
        config.search.profile = profile.into();
        config.search.queries.clear();
    }
}

fn check_path(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, format!("{}", path.display()))
    } else {
        HealthEntry::error(name, format!("{} missing", path.display()))
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::error(name, format!("{} is not a directory", path.display())),
        Err(_) => HealthEntry::warn(name, format!("{} will be created on the next run", path.display())),
    }
}

fn check_playlist(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, format!("{}", path.display()))
    } else {
        HealthEntry::warn(name, "no playlist written yet".to_string())
    }
}

fn check_tool(name: &str, program: &str) -> HealthEntry {
    let status = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => HealthEntry::ok(name, program.to_string()),
        Ok(status) => HealthEntry::warn(name, format!("{program} exited with {status}")),
        Err(error) => HealthEntry::error(name, format!("{program} not runnable: {error}")),
    }
}

impl DisplayFallback for RunReport {
    fn display(&self) -> String {
        if self.acquisition_skipped {
            return format!(
                "Library already at capacity; playlist refreshed with {} entries",
                self.playlist_entries
            );
        }
        let mut lines = vec![
            format!("Station: {}", self.station),
            format!(
                "Search: {} records, pool {}, drew {}",
                self.records_found, self.pool_size, self.drawn
            ),
            format!("Committed: {}", self.committed.len()),
        ];
        for clip in &self.committed {
            let how = if clip.transcoded { "re-encoded" } else { "as-is" };
            lines.push(format!("  - {} ({}, {how})", clip.filename, clip.identifier));
        }
        if self.stale_removed > 0 {
            lines.push(format!("Stale staging files removed: {}", self.stale_removed));
        }
        if self.evicted > 0 {
            lines.push(format!("Evicted: {}", self.evicted));
        }
        if self.fallback_used {
            lines.push("Fallback clip used".to_string());
        }
        lines.push(format!("Playlist: {} entries", self.playlist_entries));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub station: String,
    pub environment: String,
    pub library_dir: String,
    pub capacity: usize,
    pub clips: Vec<ClipRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_entries: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ClipRow {
    pub filename: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Station: {} ({})", self.station, self.environment),
            format!(
                "Library: {} ({}/{} clips)",
                self.library_dir,
                self.clips.len(),
                self.capacity
            ),
        ];
        for clip in &self.clips {
            lines.push(format!(
                "  - {} | {} KiB | {}",
                clip.filename,
                clip.size_bytes / 1024,
                clip.modified.format("%Y-%m-%d %H:%M")
            ));
        }
        match self.playlist_entries {
            Some(count) => lines.push(format!("Playlist: {count} entries")),
            None => lines.push("Playlist: not written yet".to_string()),
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in self {
            lines.push(format!(
                "[{status}] {name}: {detail}",
                status = entry.status,
                name = entry.name,
                detail = entry.detail
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, extra: &str) -> PathBuf {
        let library_dir = temp.path().join("library");
        std::fs::create_dir_all(&library_dir).unwrap();
        let path = temp.path().join("curator.toml");
        std::fs::write(
            &path,
            format!(
                r#"
[station]
name = "midnight-signal"
environment = "test"

[paths]
library_dir = "{}"
{extra}
"#,
                library_dir.display()
            ),
        )
        .unwrap();
        path
    }

    fn cli_for(config: PathBuf) -> Cli {
        Cli {
            config,
            library_dir: None,
            format: OutputFormat::Json,
            command: Commands::Status,
        }
    }

    #[test]
    fn status_lists_committed_clips() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(&temp, "");
        let library = temp.path().join("library");
        std::fs::write(library.join("video_01_first.mp4"), b"AAAA").unwrap();
        std::fs::write(library.join("video_02_second.mp4"), b"BBBBBB").unwrap();
        std::fs::write(
            library.join("playlist.txt"),
            "file 'video_01_first.mp4'\nfile 'video_02_second.mp4'\n",
        )
        .unwrap();

        let context = AppContext::new(&cli_for(config_path)).unwrap();
        let status = context.gather_status();
        assert_eq!(status.station, "midnight-signal");
        assert_eq!(status.capacity, 5);
        assert_eq!(status.clips.len(), 2);
        assert_eq!(status.playlist_entries, Some(2));
    }

    #[test]
    fn status_before_first_run_is_empty() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(&temp, "");
        let context = AppContext::new(&cli_for(config_path)).unwrap();
        let status = context.gather_status();
        assert!(status.clips.is_empty());
        assert_eq!(status.playlist_entries, None);
    }

    #[test]
    fn health_flags_a_missing_encoder() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(&temp, "ffmpeg = \"/nonexistent/ffmpeg-binary\"");
        let context = AppContext::new(&cli_for(config_path)).unwrap();
        let report = context.health_check();

        let ffmpeg = report
            .iter()
            .find(|entry| entry.name == "ffmpeg")
            .expect("ffmpeg entry");
        assert!(matches!(ffmpeg.status, CheckStatus::Error));
        let library = report
            .iter()
            .find(|entry| entry.name == "library")
            .expect("library entry");
        assert!(matches!(library.status, CheckStatus::Ok));
    }

    #[test]
    fn library_dir_flag_overrides_config() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(&temp, "");
        let elsewhere = temp.path().join("elsewhere");
        std::fs::create_dir_all(&elsewhere).unwrap();
        let mut cli = cli_for(config_path);
        cli.library_dir = Some(elsewhere.clone());

        let context = AppContext::new(&cli).unwrap();
        assert_eq!(
            context.config.paths.library_dir,
            elsewhere.to_string_lossy().to_string()
        );
    }

    #[test]
    fn profile_flag_overrides_pinned_queries() {
        let mut config = CuratorConfig::default();
        config.search.queries = vec!["collection:sabucat AND mediatype:movies".to_string()];
        let args = RunArgs {
            seed: None,
            profile: Some(ProfileArg::Narrow),
        };
        apply_run_overrides(&mut config, &args);
        assert!(config.search.queries.is_empty());
        assert_eq!(config.search.effective_queries().len(), 2);
    }
}
