use std::path::PathBuf;

use reqwest::StatusCode;

use crate::manifest::MediaCategory;

#[derive(Debug, thiserror::Error)]
pub enum DashError {
    #[error("download cancelled")]
    Cancelled,

    #[error("malformed manifest: {reason}")]
    ManifestMalformed { reason: String },

    #[error("no eligible {category} track")]
    NoEligibleTrack { category: MediaCategory },

    #[error("expected exactly one {category} track group, found {found}")]
    MissingTrackGroup {
        category: MediaCategory,
        found: usize,
    },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("failed to fetch {url} after {attempts} attempts: {reason}")]
    FetchFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("fallback download of {url} failed: {reason}")]
    FallbackFailed { url: String, reason: String },

    #[error("{category} assembly failed: {reason}")]
    AssemblyFailed {
        category: MediaCategory,
        reason: String,
        partial: Option<PathBuf>,
    },

    #[error("combining into {output} failed: {reason}")]
    CombineFailed { output: PathBuf, reason: String },

    #[error("failed to spawn `{program}`: {source}")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl DashError {
    pub fn manifest_malformed(reason: impl Into<String>) -> Self {
        Self::ManifestMalformed {
            reason: reason.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = DashError> = std::result::Result<T, E>;
