//! Stream-copy mux of the assembled video and audio files.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MuxConfig;
use crate::error::{DashError, Result};
use crate::process::{run_tool, tool_command};

/// Produces one container from a video file and an audio file without re-encoding.
#[async_trait]
pub trait Muxer: Send + Sync {
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        token: &CancellationToken,
    ) -> Result<()>;
}

/// ffmpeg `-c copy` muxer.
pub struct FfmpegMuxer {
    config: MuxConfig,
}

impl FfmpegMuxer {
    pub fn new(config: MuxConfig) -> Self {
        Self { config }
    }

    /// Build FFmpeg command arguments.
    fn build_args(&self, video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            video.to_string_lossy().into_owned(),
            "-i".to_string(),
            audio.to_string_lossy().into_owned(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
        ];

        // -movflags +faststart only makes sense for MP4-family outputs
        let faststart_supported = matches!(
            output
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .as_deref(),
            Some("mp4" | "mov" | "m4v")
        );
        if self.config.faststart && faststart_supported {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }

        args.extend(self.config.output_options.iter().cloned());
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new(MuxConfig::default())
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        token: &CancellationToken,
    ) -> Result<()> {
        let args = self.build_args(video, audio, output);
        debug!("FFmpeg args: {:?}", args);

        let mut cmd = tool_command(&self.config.ffmpeg_path);
        cmd.args(&args).env("LC_ALL", "C");

        let result = run_tool(&self.config.ffmpeg_path, cmd, token).await?;
        if !result.success() {
            return Err(DashError::CombineFailed {
                output: output.to_path_buf(),
                reason: format!("ffmpeg failed: {}", result.failure_reason()),
            });
        }
        Ok(())
    }
}

/// Runs the muxer and owns the clean-up of its inputs.
pub struct Combiner {
    muxer: Arc<dyn Muxer>,
}

impl Combiner {
    pub fn new(muxer: Arc<dyn Muxer>) -> Self {
        Self { muxer }
    }

    /// Mux `video` and `audio` into `output`.
    ///
    /// Inputs are deleted only after a successful mux. On any failure they are
    /// left untouched for inspection or a retry.
    pub async fn combine(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        token: &CancellationToken,
    ) -> Result<()> {
        info!(
            video = %video.display(),
            audio = %audio.display(),
            output = %output.display(),
            "Combining tracks"
        );

        if let Err(e) = self.muxer.mux(video, audio, output, token).await {
            warn!(error = %e, "Mux failed, keeping input files");
            return Err(match e {
                DashError::CombineFailed { .. } | DashError::Cancelled => e,
                other => DashError::CombineFailed {
                    output: output.to_path_buf(),
                    reason: other.to_string(),
                },
            });
        }

        for input in [video, audio] {
            match tokio::fs::remove_file(input).await {
                Ok(()) => debug!(path = %input.display(), "Removed temporary file"),
                Err(e) => warn!(path = %input.display(), error = %e, "Failed to remove temporary file"),
            }
        }

        info!(output = %output.display(), "Combined output written");
        Ok(())
    }
}
