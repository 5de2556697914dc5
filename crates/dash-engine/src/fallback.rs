//! Best-effort whole-asset download through yt-dlp.

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::config::FallbackConfig;
use crate::error::{DashError, Result};
use crate::process::{run_tool, tool_command};

/// Materializes the best available rendition of a URL at a local path.
///
/// Only success or failure is observable.
#[async_trait]
pub trait FallbackDownloader: Send + Sync {
    async fn download(&self, url: &Url, output: &Path, token: &CancellationToken) -> Result<()>;
}

/// yt-dlp based fallback downloader.
pub struct YtDlpDownloader {
    config: FallbackConfig,
}

impl YtDlpDownloader {
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    /// Build yt-dlp command arguments.
    fn build_args(&self, url: &Url, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--no-part".to_string(),
            "--force-overwrites".to_string(),
            "--retries".to_string(),
            self.config.network_retries.to_string(),
            "--fragment-retries".to_string(),
            self.config.fragment_retries.to_string(),
            "--retry-sleep".to_string(),
            self.config.retry_sleep.to_string(),
        ];

        args.extend(self.config.extra_args.iter().cloned());

        // URL is the only positional argument and goes last
        args.push(url.to_string());
        args
    }
}

impl Default for YtDlpDownloader {
    fn default() -> Self {
        Self::new(FallbackConfig::default())
    }
}

#[async_trait]
impl FallbackDownloader for YtDlpDownloader {
    async fn download(&self, url: &Url, output: &Path, token: &CancellationToken) -> Result<()> {
        let args = self.build_args(url, output);
        info!(url = %url, output = %output.display(), "Starting fallback download");
        debug!("yt-dlp args: {:?}", args);

        let mut cmd = tool_command(&self.config.binary_path);
        cmd.args(&args);

        let result = run_tool(&self.config.binary_path, cmd, token).await?;
        if !result.success() {
            return Err(DashError::FallbackFailed {
                url: url.to_string(),
                reason: result.failure_reason(),
            });
        }

        // yt-dlp may exit 0 without producing the file when nothing matched.
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(DashError::FallbackFailed {
                url: url.to_string(),
                reason: format!("no file written at {}", output.display()),
            });
        }

        Ok(())
    }
}
