use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// HTTP client options used for manifest and segment requests.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Overall timeout for a single request (zero disables it)
    pub timeout: Duration,

    /// Time allowed to establish a connection
    pub connect_timeout: Duration,

    /// Maximum number of redirects followed per request
    pub max_redirects: usize,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request
    pub headers: HeaderMap,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(0),
            connect_timeout: Duration::from_secs(30),
            max_redirects: 10,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HttpConfig::get_default_headers(),
        }
    }
}

impl HttpConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }
}

/// Retry behaviour of a single resource fetch.
///
/// Every failed attempt is retried the same way, whatever the cause.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Wait between two attempts.
    pub delay: Duration,
    /// Upper bound for the wait when `exponential` is enabled.
    pub max_delay: Duration,
    /// Double the wait after each failed attempt instead of keeping it fixed.
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            exponential: false,
        }
    }
}

impl RetryPolicy {
    /// Compute the wait after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.delay;
        }
        // 2^attempt with a checked shift so large attempts saturate.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Options passed to the best-effort downloader used when segment assembly fails.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Escalate to the fallback downloader at all.
    pub enabled: bool,
    /// Path to the yt-dlp binary.
    pub binary_path: String,
    /// `--retries`
    pub network_retries: u32,
    /// `--fragment-retries`
    pub fragment_retries: u32,
    /// `--retry-sleep`, in seconds
    pub retry_sleep: u32,
    /// Extra arguments appended before the URL.
    pub extra_args: Vec<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            network_retries: 5,
            fragment_retries: 5,
            retry_sleep: 5,
            extra_args: Vec::new(),
        }
    }
}

/// Options of the container mux step.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: String,
    /// Move the moov atom to the front for MP4-family outputs.
    pub faststart: bool,
    /// Extra output options placed before the output path.
    pub output_options: Vec<String>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            faststart: true,
            output_options: Vec::new(),
        }
    }
}

/// File names used during a run. All names are relative to `output_dir`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub output_dir: PathBuf,
    pub video_temp: String,
    pub audio_temp: String,
    pub output_name: String,
    /// Suffix appended to a partially written file while a fallback runs.
    pub quarantine_suffix: String,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            video_temp: "video_temp.mp4".to_string(),
            audio_temp: "audio_temp.mp4".to_string(),
            output_name: "output.mp4".to_string(),
            quarantine_suffix: ".tmp".to_string(),
        }
    }
}

impl OutputLayout {
    pub fn video_path(&self) -> PathBuf {
        self.output_dir.join(&self.video_temp)
    }

    pub fn audio_path(&self) -> PathBuf {
        self.output_dir.join(&self.audio_temp)
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_name)
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    /// `<name><suffix>` next to the given file, e.g. `video_temp.mp4.tmp`.
    pub fn quarantine_path(&self, destination: &Path) -> PathBuf {
        let mut name = destination
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(&self.quarantine_suffix);
        destination.with_file_name(name)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub http: HttpConfig,
    pub retry: RetryPolicy,
    pub fallback: FallbackConfig,
    pub mux: MuxConfig,
    pub layout: OutputLayout,
    /// Assemble video and audio at the same time.
    pub concurrent_tracks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            retry: RetryPolicy::default(),
            fallback: FallbackConfig::default(),
            mux: MuxConfig::default(),
            layout: OutputLayout::default(),
            concurrent_tracks: true,
        }
    }
}
