//! TOML configuration file, layered under the command-line flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dash_engine::EngineConfig;
use reqwest::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub output_dir: Option<PathBuf>,
    pub output_name: Option<String>,
    pub concurrent_tracks: Option<bool>,
    pub http: HttpSection,
    pub retry: RetrySection,
    pub fallback: FallbackSection,
    pub mux: MuxSection,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    /// Whole-request timeout, 0 disables it.
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub max_redirects: Option<usize>,
    pub user_agent: Option<String>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub delay_secs: Option<u64>,
    pub max_delay_secs: Option<u64>,
    pub exponential: Option<bool>,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackSection {
    pub enabled: Option<bool>,
    pub binary: Option<String>,
    pub network_retries: Option<u32>,
    pub fragment_retries: Option<u32>,
    pub retry_sleep: Option<u32>,
    pub extra_args: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MuxSection {
    pub ffmpeg: Option<String>,
    pub faststart: Option<bool>,
    pub output_options: Option<Vec<String>>,
}

impl AppConfig {
    /// Load `path`, or the user config file when no path is given.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.is_file() => p,
                _ => return Ok(Self::default()),
            },
        };

        debug!(path = %path.display(), "Loading configuration file");
        let text = std::fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text).map_err(|e| AppError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// `<config dir>/dashdl/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dashdl").join(CONFIG_FILE_NAME))
    }

    /// Overlay the file settings onto `config`.
    pub fn apply(&self, config: &mut EngineConfig) -> Result<()> {
        if let Some(dir) = &self.output_dir {
            config.layout.output_dir = dir.clone();
        }
        if let Some(name) = &self.output_name {
            config.layout.output_name = name.clone();
        }
        if let Some(concurrent) = self.concurrent_tracks {
            config.concurrent_tracks = concurrent;
        }

        let http = &self.http;
        if let Some(secs) = http.timeout_secs {
            config.http.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = http.connect_timeout_secs {
            config.http.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = http.max_redirects {
            config.http.max_redirects = max;
        }
        if let Some(ua) = &http.user_agent {
            config.http.user_agent = ua.clone();
        }
        for (name, value) in &http.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::Config(format!("invalid header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AppError::Config(format!("invalid value for header `{name}`: {e}")))?;
            config.http.headers.insert(name, value);
        }

        let retry = &self.retry;
        if let Some(n) = retry.max_attempts {
            config.retry.max_attempts = n;
        }
        if let Some(secs) = retry.delay_secs {
            config.retry.delay = Duration::from_secs(secs);
        }
        if let Some(secs) = retry.max_delay_secs {
            config.retry.max_delay = Duration::from_secs(secs);
        }
        if let Some(exponential) = retry.exponential {
            config.retry.exponential = exponential;
        }

        let fallback = &self.fallback;
        if let Some(enabled) = fallback.enabled {
            config.fallback.enabled = enabled;
        }
        if let Some(binary) = &fallback.binary {
            config.fallback.binary_path = binary.clone();
        }
        if let Some(n) = fallback.network_retries {
            config.fallback.network_retries = n;
        }
        if let Some(n) = fallback.fragment_retries {
            config.fallback.fragment_retries = n;
        }
        if let Some(n) = fallback.retry_sleep {
            config.fallback.retry_sleep = n;
        }
        if let Some(args) = &fallback.extra_args {
            config.fallback.extra_args = args.clone();
        }

        if let Some(ffmpeg) = &self.mux.ffmpeg {
            config.mux.ffmpeg_path = ffmpeg.clone();
        }
        if let Some(faststart) = self.mux.faststart {
            config.mux.faststart = faststart;
        }
        if let Some(options) = &self.mux.output_options {
            config.mux.output_options = options.clone();
        }

        Ok(())
    }
}

/// Engine configuration from defaults, then the file, then the flags.
pub fn build_engine_config(file: &AppConfig, args: &Args) -> Result<EngineConfig> {
    let mut config = EngineConfig::default();
    file.apply(&mut config)?;

    if let Some(dir) = &args.output_dir {
        config.layout.output_dir = dir.clone();
    }
    if let Some(name) = &args.output {
        config.layout.output_name = name.clone();
    }
    if args.sequential {
        config.concurrent_tracks = false;
    }
    if args.no_fallback {
        config.fallback.enabled = false;
    }
    if let Some(n) = args.retries {
        if n == 0 {
            return Err(AppError::InvalidInput(
                "--retries must be at least 1".to_string(),
            ));
        }
        config.retry.max_attempts = n;
    }
    if let Some(secs) = args.retry_delay {
        config.retry.delay = Duration::from_secs(secs);
    }
    if let Some(ffmpeg) = &args.ffmpeg {
        config.mux.ffmpeg_path = ffmpeg.clone();
    }
    if let Some(yt_dlp) = &args.yt_dlp {
        config.fallback.binary_path = yt_dlp.clone();
    }

    Ok(config)
}
