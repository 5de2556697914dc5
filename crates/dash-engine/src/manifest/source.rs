use std::fmt;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::error::Result;
use crate::fetcher::SegmentFetcher;

/// Where a manifest is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    File(PathBuf),
    Remote(Url),
}

impl ManifestSource {
    /// `http(s)://` inputs are remote, everything else is a local path.
    pub fn from_input(input: &str) -> Self {
        match Url::parse(input) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Remote(url),
            _ => Self::File(PathBuf::from(input)),
        }
    }

    /// Location relative `BaseURL`s resolve against, when known.
    pub fn origin(&self) -> Option<Url> {
        match self {
            Self::File(_) => None,
            Self::Remote(url) => Some(url.clone()),
        }
    }

    pub async fn load(&self, fetcher: &SegmentFetcher, token: &CancellationToken) -> Result<Vec<u8>> {
        info!(source = %self, "Loading manifest");
        match self {
            Self::File(path) => Ok(tokio::fs::read(path).await?),
            Self::Remote(url) => Ok(fetcher.fetch(url, token).await?.to_vec()),
        }
    }
}

impl fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{url}"),
        }
    }
}
