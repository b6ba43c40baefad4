use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

use crate::config::{CuratorConfig, TranscodeSection};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("{operation} timed out after {seconds}s: {path}")]
    Timeout {
        operation: &'static str,
        seconds: u64,
        path: PathBuf,
    },
    #[error("probe output unreadable for {path}: {reason}")]
    UnreadableProbe { path: PathBuf, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MediaResult<T> = std::result::Result<T, MediaError>;

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<std::process::Output> {
        // kill_on_drop so a timed-out invocation does not leave an
        // encoder running behind the pipeline's back.
        Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// Stream metadata as ffprobe reports it with `-print_format json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeReport {
    #[serde(default)]
    pub streams: Vec<StreamInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub codec_name: Option<String>,
}

impl ProbeReport {
    pub fn video_codec(&self) -> Option<&str> {
        self.streams
            .iter()
            .find(|stream| stream.codec_type.as_deref() == Some("video"))
            .and_then(|stream| stream.codec_name.as_deref())
    }

    /// Compatible means the first video stream's codec matches the target
    /// exactly. No video stream means not compatible.
    pub fn is_compatible(&self, target_codec: &str) -> bool {
        self.video_codec() == Some(target_codec)
    }
}

/// Probe and encode capability, kept behind a trait so the pipeline never
/// knows whether a real encoder ran. Tests substitute doubles that
/// simulate success, failure, and timeouts.
#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaResult<ProbeReport>;
    /// Fast re-encode to the streaming codec pair.
    async fn transcode(&self, input: &Path, output: &Path) -> MediaResult<()>;
    /// Stream-copy into the target container, for sources the probe
    /// under-detected. Cheaper, so it runs under a shorter timeout.
    async fn remux_copy(&self, input: &Path, output: &Path) -> MediaResult<()>;
}

pub struct FfmpegMediaTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    settings: TranscodeSection,
    executor: Arc<dyn CommandExecutor>,
}

impl FfmpegMediaTool {
    pub fn new(config: &CuratorConfig, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        Self {
            ffmpeg: PathBuf::from(&config.paths.ffmpeg),
            ffprobe: PathBuf::from(&config.paths.ffprobe),
            settings: config.transcode.clone(),
            executor,
        }
    }

    fn probe_args(&self, path: &Path) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_streams".to_string(),
            path.to_string_lossy().to_string(),
        ]
    }

    fn transcode_args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c:v".to_string(),
            self.settings.encoder.clone(),
            "-preset".to_string(),
            self.settings.preset.clone(),
            "-tune".to_string(),
            self.settings.tune.clone(),
            "-crf".to_string(),
            self.settings.crf.to_string(),
            "-maxrate".to_string(),
            self.settings.maxrate.clone(),
            "-bufsize".to_string(),
            self.settings.bufsize.clone(),
            "-c:a".to_string(),
            self.settings.audio_codec.clone(),
            "-ar".to_string(),
            self.settings.audio_rate.to_string(),
            "-b:a".to_string(),
            self.settings.audio_bitrate.clone(),
            "-ac".to_string(),
            self.settings.audio_channels.to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    fn remux_args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    async fn run_external(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
        operation: &'static str,
        subject: &Path,
    ) -> MediaResult<std::process::Output> {
        let output = match tokio::time::timeout(timeout, self.executor.run(program, args)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(MediaError::Timeout {
                    operation,
                    seconds: timeout.as_secs(),
                    path: subject.to_path_buf(),
                })
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(MediaError::CommandFailure {
                command: format!("{} {}", program.display(), args.join(" ")),
                status: output.status.code(),
                stderr,
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl MediaTool for FfmpegMediaTool {
    async fn probe(&self, path: &Path) -> MediaResult<ProbeReport> {
        let args = self.probe_args(path);
        let timeout = Duration::from_secs(self.settings.probe_timeout_seconds);
        let output = self
            .run_external(&self.ffprobe, &args, timeout, "probe", path)
            .await?;
        serde_json::from_slice(&output.stdout).map_err(|err| MediaError::UnreadableProbe {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    async fn transcode(&self, input: &Path, output: &Path) -> MediaResult<()> {
        let args = self.transcode_args(input, output);
        let timeout = Duration::from_secs(self.settings.timeout_seconds);
        self.run_external(&self.ffmpeg, &args, timeout, "transcode", input)
            .await?;
        Ok(())
    }

    async fn remux_copy(&self, input: &Path, output: &Path) -> MediaResult<()> {
        let args = self.remux_args(input, output);
        let timeout = Duration::from_secs(self.settings.copy_timeout_seconds);
        self.run_external(&self.ffmpeg, &args, timeout, "remux", input)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[cfg(unix)]
    use std::os::unix::process::ExitStatusExt;
    #[cfg(windows)]
    use std::os::windows::process::ExitStatusExt;

    use std::process::{ExitStatus, Output};

    type RecordedCalls = Arc<Mutex<Vec<(PathBuf, Vec<String>)>>>;

    struct RecordingExecutor {
        calls: RecordedCalls,
        stdout: Vec<u8>,
        raw_status: i32,
    }

    impl RecordingExecutor {
        fn build(stdout: &[u8], raw_status: i32) -> (Arc<dyn CommandExecutor>, RecordedCalls) {
            let calls: RecordedCalls = Arc::new(Mutex::new(Vec::new()));
            let executor: Arc<dyn CommandExecutor> = Arc::new(Self {
                calls: Arc::clone(&calls),
                stdout: stdout.to_vec(),
                raw_status,
            });
            (executor, calls)
        }
    }

    #[async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn run(
            &self,
            program: &Path,
            args: &[String],
        ) -> std::io::Result<std::process::Output> {
            let mut guard = self.calls.lock().unwrap();
            guard.push((program.to_path_buf(), args.to_vec()));
            Ok(Output {
                status: ExitStatus::from_raw(self.raw_status as _),
                stdout: self.stdout.clone(),
                stderr: b"encoder noise".to_vec(),
            })
        }
    }

    struct StalledExecutor;

    #[async_trait]
    impl CommandExecutor for StalledExecutor {
        async fn run(
            &self,
            _program: &Path,
            _args: &[String],
        ) -> std::io::Result<std::process::Output> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Output {
                status: ExitStatus::from_raw(0),
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }

    fn tool_with(executor: Arc<dyn CommandExecutor>) -> FfmpegMediaTool {
        FfmpegMediaTool::new(&CuratorConfig::default(), Some(executor))
    }

    #[tokio::test]
    async fn probe_parses_streams_and_builds_expected_args() {
        let payload = br#"{"streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 640},
            {"index": 1, "codec_type": "audio", "codec_name": "aac"}
        ]}"#;
        let (executor, calls) = RecordingExecutor::build(payload, 0);
        let tool = tool_with(executor);

        let report = tool.probe(Path::new("/tmp/clip.part")).await.expect("probe");
        assert_eq!(report.video_codec(), Some("h264"));
        assert!(report.is_compatible("h264"));
        assert!(!report.is_compatible("vp9"));

        let recorded = calls.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, PathBuf::from("ffprobe"));
        assert_eq!(
            recorded[0].1[..5],
            [
                "-v".to_string(),
                "error".to_string(),
                "-print_format".to_string(),
                "json".to_string(),
                "-show_streams".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn missing_video_stream_is_not_compatible() {
        let payload = br#"{"streams": [{"codec_type": "audio", "codec_name": "mp3"}]}"#;
        let (executor, _) = RecordingExecutor::build(payload, 0);
        let tool = tool_with(executor);
        let report = tool.probe(Path::new("/tmp/audio-only.part")).await.expect("probe");
        assert!(!report.is_compatible("h264"));
    }

    #[tokio::test]
    async fn garbage_probe_output_is_an_error() {
        let (executor, _) = RecordingExecutor::build(b"not json", 0);
        let tool = tool_with(executor);
        let err = tool
            .probe(Path::new("/tmp/clip.part"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, MediaError::UnreadableProbe { .. }));
    }

    #[tokio::test]
    async fn transcode_arguments_carry_encoder_settings() {
        let (executor, calls) = RecordingExecutor::build(b"", 0);
        let tool = tool_with(executor);
        tool.transcode(Path::new("/tmp/in.part"), Path::new("/tmp/out.part"))
            .await
            .expect("transcode");

        let recorded = calls.lock().unwrap();
        assert_eq!(recorded[0].0, PathBuf::from("ffmpeg"));
        let args = &recorded[0].1;
        let expect_pair = |flag: &str, value: &str| {
            let at = args
                .iter()
                .position(|a| a == flag)
                .unwrap_or_else(|| panic!("missing {flag}"));
            assert_eq!(args[at + 1], value, "value for {flag}");
        };
        expect_pair("-c:v", "libx264");
        expect_pair("-preset", "ultrafast");
        expect_pair("-tune", "zerolatency");
        expect_pair("-crf", "23");
        expect_pair("-maxrate", "1000k");
        expect_pair("-bufsize", "2000k");
        expect_pair("-c:a", "aac");
        expect_pair("-f", "mp4");
        assert!(args.contains(&"+faststart".to_string()));
    }

    #[tokio::test]
    async fn remux_copies_streams_without_encoding() {
        let (executor, calls) = RecordingExecutor::build(b"", 0);
        let tool = tool_with(executor);
        tool.remux_copy(Path::new("/tmp/in.part"), Path::new("/tmp/out.part"))
            .await
            .expect("remux");

        let recorded = calls.lock().unwrap();
        let args = &recorded[0].1;
        let at = args.iter().position(|a| a == "-c").expect("copy flag");
        assert_eq!(args[at + 1], "copy");
        assert!(!args.iter().any(|a| a == "-c:v"));
    }

    #[tokio::test]
    async fn failing_exit_status_surfaces_stderr() {
        let (executor, _) = RecordingExecutor::build(b"", 256);
        let tool = tool_with(executor);
        let err = tool
            .transcode(Path::new("/tmp/in.part"), Path::new("/tmp/out.part"))
            .await
            .expect_err("must fail");
        match err {
            MediaError::CommandFailure { stderr, .. } => {
                assert!(stderr.contains("encoder noise"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_invocations_time_out() {
        let tool = tool_with(Arc::new(StalledExecutor));
        let err = tool
            .probe(Path::new("/tmp/clip.part"))
            .await
            .expect_err("must time out");
        match err {
            MediaError::Timeout {
                operation, seconds, ..
            } => {
                assert_eq!(operation, "probe");
                assert_eq!(seconds, 15);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
