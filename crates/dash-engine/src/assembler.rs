//! Per-track assembly: ordered segment download into one file, with
//! escalation to the fallback downloader.
//!
//! ```text
//! Idle -> Downloading -> Complete
//!              |
//!              v
//!       FallbackPending -> FallbackDownloading -> Complete | Failed
//! ```
//!
//! A partially written destination is renamed to its quarantine name before
//! the fallback starts, so it can never be mistaken for a finished file. If the
//! fallback fails the quarantine file is moved back as the best partial artifact.
//! A cancelled track keeps its partial bytes under the quarantine name.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, error, info, instrument, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::OutputLayout;
use crate::error::DashError;
use crate::fallback::FallbackDownloader;
use crate::fetcher::{FetchError, SegmentFetcher};
use crate::manifest::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Idle,
    Downloading,
    FallbackPending,
    FallbackDownloading,
    Complete,
    Failed,
}

/// Which route produced a complete file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyRoute {
    Segments,
    WholeResource,
    Fallback,
}

impl fmt::Display for AssemblyRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Segments => "segments",
            Self::WholeResource => "whole resource",
            Self::Fallback => "fallback",
        })
    }
}

const CANCELLED: &str = "cancelled";

/// Terminal outcome of one track assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyResult {
    Complete {
        path: PathBuf,
        route: AssemblyRoute,
        bytes: u64,
    },
    /// `partial` names a restored partial artifact; it is never a complete file.
    Failed {
        reason: String,
        partial: Option<PathBuf>,
    },
}

impl AssemblyResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    /// Failed because the token was cancelled, during the download or the fallback.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Failed { reason, .. } if reason == CANCELLED)
    }
}

/// Why a download step stopped.
enum Interrupt {
    Cancelled,
    Failed(String),
}

impl From<FetchError> for Interrupt {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled { .. } => Interrupt::Cancelled,
            exhausted => Interrupt::Failed(exhausted.to_string()),
        }
    }
}

impl From<std::io::Error> for Interrupt {
    fn from(err: std::io::Error) -> Self {
        Interrupt::Failed(format!("write failed: {err}"))
    }
}

pub struct StreamAssembler {
    fetcher: Arc<SegmentFetcher>,
    fallback: Option<Arc<dyn FallbackDownloader>>,
    layout: OutputLayout,
}

impl StreamAssembler {
    /// `fallback` is `None` when escalation is disabled.
    pub fn new(
        fetcher: Arc<SegmentFetcher>,
        fallback: Option<Arc<dyn FallbackDownloader>>,
        layout: OutputLayout,
    ) -> Self {
        Self {
            fetcher,
            fallback,
            layout,
        }
    }

    /// Assemble `track` into `destination`.
    #[instrument(name = "assemble", skip_all, fields(track = %track.id, category = %track.category))]
    pub async fn assemble(
        &self,
        track: &Track,
        destination: &Path,
        token: &CancellationToken,
    ) -> AssemblyResult {
        let mut state = AssemblyState::Idle;
        transition(&mut state, AssemblyState::Downloading);

        let failure = match self.download(track, destination, token).await {
            Ok((route, bytes)) => {
                transition(&mut state, AssemblyState::Complete);
                info!(route = %route, bytes, path = %destination.display(), "Track assembled");
                return AssemblyResult::Complete {
                    path: destination.to_path_buf(),
                    route,
                    bytes,
                };
            }
            Err(Interrupt::Cancelled) => {
                transition(&mut state, AssemblyState::Failed);
                return AssemblyResult::Failed {
                    reason: CANCELLED.to_string(),
                    partial: self.quarantine(destination).await,
                };
            }
            Err(Interrupt::Failed(reason)) => reason,
        };

        warn!(reason = %failure, "Primary download failed, escalating to fallback");
        transition(&mut state, AssemblyState::FallbackPending);
        let quarantine = self.quarantine(destination).await;

        transition(&mut state, AssemblyState::FallbackDownloading);
        match self.run_fallback(track, destination, token).await {
            Ok(bytes) => {
                transition(&mut state, AssemblyState::Complete);
                if let Some(q) = quarantine.as_deref() {
                    remove_if_exists(q).await;
                }
                info!(bytes, path = %destination.display(), "Track assembled by fallback");
                AssemblyResult::Complete {
                    path: destination.to_path_buf(),
                    route: AssemblyRoute::Fallback,
                    bytes,
                }
            }
            Err(Interrupt::Cancelled) => {
                transition(&mut state, AssemblyState::Failed);
                // The partial file stays quarantined, like a cancelled download.
                remove_if_exists(destination).await;
                info!(partial = ?quarantine, "Fallback cancelled");
                AssemblyResult::Failed {
                    reason: CANCELLED.to_string(),
                    partial: quarantine,
                }
            }
            Err(Interrupt::Failed(reason)) => {
                transition(&mut state, AssemblyState::Failed);
                let partial = self.restore(quarantine.as_deref(), destination).await;
                error!(
                    download_error = %failure,
                    fallback_error = %reason,
                    partial = ?partial,
                    "Track assembly failed"
                );
                AssemblyResult::Failed {
                    reason: format!("{failure}; fallback: {reason}"),
                    partial,
                }
            }
        }
    }

    /// Fetch all segments in order (or the whole resource) into a fresh file.
    ///
    /// The file is flushed and closed on every exit path, so the caller can
    /// rename or remove it right away.
    async fn download(
        &self,
        track: &Track,
        destination: &Path,
        token: &CancellationToken,
    ) -> Result<(AssemblyRoute, u64), Interrupt> {
        let mut file = File::create(destination).await?;
        let result = self.write_track(track, &mut file, token).await;
        let flushed = file.flush().await;
        drop(file);
        let written = result?;
        flushed?;
        Ok(written)
    }

    async fn write_track(
        &self,
        track: &Track,
        file: &mut File,
        token: &CancellationToken,
    ) -> Result<(AssemblyRoute, u64), Interrupt> {
        if track.segments.is_empty() {
            let Some(url) = track.resolved_base() else {
                return Err(Interrupt::Failed(format!(
                    "track {} has neither segments nor an absolute base URL",
                    track.id
                )));
            };
            debug!(url = %url, "Fetching track as a single resource");
            let bytes = self.fetcher.fetch(&url, token).await?;
            file.write_all(&bytes).await?;
            return Ok((AssemblyRoute::WholeResource, bytes.len() as u64));
        }

        let span = Span::current();
        if let Ok(style) = indicatif::ProgressStyle::with_template(
            "{span_child_prefix}{spinner} {span_name}{{{span_fields}}} [{bar:30}] {pos}/{len} {msg}",
        ) {
            span.pb_set_style(&style);
        }
        span.pb_set_length(track.segments.len() as u64);

        let total = track.segments.len();
        let mut written = 0u64;
        for (index, locator) in track.segments.iter().enumerate() {
            let url = track
                .segment_url(locator)
                .map_err(|e| Interrupt::Failed(e.to_string()))?;
            let bytes = self.fetcher.fetch(&url, token).await.map_err(|e| {
                if let FetchError::Exhausted { .. } = e {
                    warn!(segment = index + 1, total, url = %url, "Unable to download segment");
                }
                Interrupt::from(e)
            })?;
            file.write_all(&bytes).await?;
            written += bytes.len() as u64;
            span.pb_inc(1);
            debug!(segment = index + 1, total, url = %url, "Downloaded and appended segment");
        }

        Ok((AssemblyRoute::Segments, written))
    }

    async fn run_fallback(
        &self,
        track: &Track,
        destination: &Path,
        token: &CancellationToken,
    ) -> Result<u64, Interrupt> {
        let Some(fallback) = self.fallback.as_ref() else {
            return Err(Interrupt::Failed(
                "fallback downloader disabled".to_string(),
            ));
        };
        let Some(url) = track.resolved_base() else {
            return Err(Interrupt::Failed(
                "no absolute base URL to hand to the fallback downloader".to_string(),
            ));
        };
        if let Err(e) = fallback.download(&url, destination, token).await {
            // Whatever the tool reported, a cancelled token means it was stopped.
            if matches!(e, DashError::Cancelled) || token.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }
            return Err(Interrupt::Failed(e.to_string()));
        }
        let bytes = tokio::fs::metadata(destination)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(bytes)
    }

    /// Move a partially written destination out of the way.
    async fn quarantine(&self, destination: &Path) -> Option<PathBuf> {
        if !tokio::fs::try_exists(destination).await.unwrap_or(false) {
            return None;
        }
        let quarantine = self.layout.quarantine_path(destination);
        match tokio::fs::rename(destination, &quarantine).await {
            Ok(()) => {
                debug!(from = %destination.display(), to = %quarantine.display(), "Quarantined partial file");
                Some(quarantine)
            }
            Err(e) => {
                warn!(path = %destination.display(), error = %e, "Failed to quarantine partial file, discarding it");
                remove_if_exists(destination).await;
                None
            }
        }
    }

    /// Put the quarantined partial file back under the destination name.
    async fn restore(&self, quarantine: Option<&Path>, destination: &Path) -> Option<PathBuf> {
        // Anything the fallback left behind is incomplete.
        remove_if_exists(destination).await;
        let quarantine = quarantine?;
        match tokio::fs::rename(quarantine, destination).await {
            Ok(()) => {
                info!(path = %destination.display(), "Restored partial file after failed fallback");
                Some(destination.to_path_buf())
            }
            Err(e) => {
                warn!(path = %quarantine.display(), error = %e, "Failed to restore partial file");
                Some(quarantine.to_path_buf())
            }
        }
    }
}

fn transition(state: &mut AssemblyState, next: AssemblyState) {
    debug!(from = ?*state, to = ?next, "Assembly state transition");
    *state = next;
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DashError, Result};
    use crate::fetcher::tests::{ScriptedSource, fast_policy};
    use crate::manifest::MediaCategory;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::Mutex;
    use url::Url;

    const BASE: &str = "https://cdn.example.com/video/";

    /// What the destination looked like when the fallback started.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Observed {
        destination_existed: bool,
        quarantine_contents: Option<Vec<u8>>,
    }

    struct FakeFallback {
        succeed: bool,
        observed: Mutex<Vec<Observed>>,
    }

    impl FakeFallback {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed,
                observed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FallbackDownloader for FakeFallback {
        async fn download(&self, url: &Url, output: &Path, _token: &CancellationToken) -> Result<()> {
            let quarantine = output.with_file_name(format!(
                "{}.tmp",
                output.file_name().unwrap().to_string_lossy()
            ));
            self.observed.lock().unwrap().push(Observed {
                destination_existed: output.exists(),
                quarantine_contents: std::fs::read(&quarantine).ok(),
            });
            if self.succeed {
                tokio::fs::write(output, b"FALLBACK").await?;
                Ok(())
            } else {
                // A failing tool may still leave junk behind.
                tokio::fs::write(output, b"junk").await?;
                Err(DashError::FallbackFailed {
                    url: url.to_string(),
                    reason: "exited with code 1".to_string(),
                })
            }
        }
    }

    fn track(segments: &[&str]) -> Track {
        Track {
            id: "v1".to_string(),
            bandwidth: Some(1000),
            width: Some(1280),
            height: Some(720),
            category: MediaCategory::Video,
            base_url: Some(BASE.to_string()),
            segments: segments.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn assembler(
        source: Arc<ScriptedSource>,
        fallback: Option<Arc<dyn FallbackDownloader>>,
    ) -> StreamAssembler {
        StreamAssembler::new(
            Arc::new(SegmentFetcher::new(source, fast_policy(3))),
            fallback,
            OutputLayout::default(),
        )
    }

    #[tokio::test]
    async fn segments_are_written_in_list_order() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("video_temp.mp4");
        tokio::fs::write(&dest, b"stale content").await.unwrap();

        let source = Arc::new(
            ScriptedSource::default()
                .ok(&format!("{BASE}1.m4s"), b"one-")
                .ok(&format!("{BASE}2.m4s"), b"two-")
                .ok(&format!("{BASE}3.m4s"), b"three"),
        );
        let result = assembler(source, None)
            .assemble(&track(&["1.m4s", "2.m4s", "3.m4s"]), &dest, &CancellationToken::new())
            .await;

        assert_eq!(
            result,
            AssemblyResult::Complete {
                path: dest.clone(),
                route: AssemblyRoute::Segments,
                bytes: 13,
            }
        );
        assert_eq!(std::fs::read(&dest).unwrap(), b"one-two-three");
    }

    #[tokio::test]
    async fn empty_segment_list_fetches_base_url_once() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("audio_temp.mp4");
        let whole = "https://cdn.example.com/audio/full.m4a";
        let source = Arc::new(ScriptedSource::default().ok(whole, b"whole-audio"));

        let mut t = track(&[]);
        t.base_url = Some(whole.to_string());
        let result = assembler(source.clone(), None)
            .assemble(&t, &dest, &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            AssemblyResult::Complete {
                route: AssemblyRoute::WholeResource,
                ..
            }
        ));
        assert_eq!(source.requests_for(whole), 1);
        assert_eq!(std::fs::read(&dest).unwrap(), b"whole-audio");
    }

    #[tokio::test]
    async fn failed_segment_is_quarantined_then_restored_when_fallback_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("video_temp.mp4");
        let quarantine = dir.path().join("video_temp.mp4.tmp");

        let source = Arc::new(
            ScriptedSource::default()
                .ok(&format!("{BASE}1.m4s"), b"one-")
                .status(&format!("{BASE}2.m4s"), StatusCode::INTERNAL_SERVER_ERROR)
                .ok(&format!("{BASE}3.m4s"), b"three"),
        );
        let fallback = FakeFallback::new(false);
        let result = assembler(source.clone(), Some(fallback.clone()))
            .assemble(&track(&["1.m4s", "2.m4s", "3.m4s"]), &dest, &CancellationToken::new())
            .await;

        // Quarantined before the fallback began.
        assert_eq!(
            fallback.observed.lock().unwrap().as_slice(),
            &[Observed {
                destination_existed: false,
                quarantine_contents: Some(b"one-".to_vec()),
            }]
        );
        assert_eq!(source.requests_for(&format!("{BASE}2.m4s")), 3);
        assert_eq!(source.requests_for(&format!("{BASE}3.m4s")), 0);

        match result {
            AssemblyResult::Failed { partial, .. } => assert_eq!(partial, Some(dest.clone())),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(std::fs::read(&dest).unwrap(), b"one-");
        assert!(!quarantine.exists());
    }

    #[tokio::test]
    async fn successful_fallback_discards_quarantine() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("video_temp.mp4");
        let quarantine = dir.path().join("video_temp.mp4.tmp");

        let source = Arc::new(ScriptedSource::default().ok(&format!("{BASE}1.m4s"), b"one-"));
        let fallback = FakeFallback::new(true);
        let result = assembler(source, Some(fallback.clone()))
            .assemble(&track(&["1.m4s", "2.m4s"]), &dest, &CancellationToken::new())
            .await;

        assert_eq!(
            result,
            AssemblyResult::Complete {
                path: dest.clone(),
                route: AssemblyRoute::Fallback,
                bytes: 8,
            }
        );
        assert_eq!(std::fs::read(&dest).unwrap(), b"FALLBACK");
        assert!(!quarantine.exists());
    }

    #[tokio::test]
    async fn whole_resource_failure_escalates_with_quarantine() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("audio_temp.mp4");
        let whole = "https://cdn.example.com/audio/full.m4a";
        let source = Arc::new(ScriptedSource::default().transport_error(whole));

        let mut t = track(&[]);
        t.base_url = Some(whole.to_string());
        let fallback = FakeFallback::new(false);
        let result = assembler(source, Some(fallback.clone()))
            .assemble(&t, &dest, &CancellationToken::new())
            .await;

        assert_eq!(
            fallback.observed.lock().unwrap()[0],
            Observed {
                destination_existed: false,
                quarantine_contents: Some(Vec::new()),
            }
        );
        assert!(!result.is_complete());
        assert!(!dir.path().join("audio_temp.mp4.tmp").exists());
    }

    #[tokio::test]
    async fn disabled_fallback_fails_and_restores_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("video_temp.mp4");
        let source = Arc::new(ScriptedSource::default().ok(&format!("{BASE}1.m4s"), b"one-"));

        let result = assembler(source, None)
            .assemble(&track(&["1.m4s", "missing.m4s"]), &dest, &CancellationToken::new())
            .await;

        match result {
            AssemblyResult::Failed { reason, partial } => {
                assert!(reason.contains("fallback downloader disabled"), "{reason}");
                assert_eq!(partial, Some(dest.clone()));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(std::fs::read(&dest).unwrap(), b"one-");
    }

    /// Stops the token while "running", the way Ctrl-C or a failed sibling would.
    struct InterruptedFallback;

    #[async_trait]
    impl FallbackDownloader for InterruptedFallback {
        async fn download(&self, url: &Url, output: &Path, token: &CancellationToken) -> Result<()> {
            tokio::fs::write(output, b"half").await?;
            token.cancel();
            Err(DashError::FallbackFailed {
                url: url.to_string(),
                reason: "terminated by signal".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn fallback_interrupted_by_cancellation_ends_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("video_temp.mp4");
        let quarantine = dir.path().join("video_temp.mp4.tmp");
        let source = Arc::new(ScriptedSource::default().ok(&format!("{BASE}1.m4s"), b"one-"));

        let result = assembler(source, Some(Arc::new(InterruptedFallback)))
            .assemble(&track(&["1.m4s", "2.m4s"]), &dest, &CancellationToken::new())
            .await;

        assert!(result.is_cancelled(), "{result:?}");
        assert_eq!(
            result,
            AssemblyResult::Failed {
                reason: "cancelled".to_string(),
                partial: Some(quarantine.clone()),
            }
        );
        assert!(!dest.exists());
        assert_eq!(std::fs::read(&quarantine).unwrap(), b"one-");
    }

    #[tokio::test]
    async fn partial_file_holds_every_written_segment_when_quarantined() {
        static CHUNK: [u8; 64 * 1024] = [7; 64 * 1024];

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("video_temp.mp4");
        let source = Arc::new(
            ScriptedSource::default()
                .ok(&format!("{BASE}1.m4s"), &CHUNK)
                .ok(&format!("{BASE}2.m4s"), &CHUNK)
                .ok(&format!("{BASE}3.m4s"), &CHUNK),
        );
        let fallback = FakeFallback::new(false);

        let result = assembler(source, Some(fallback.clone()))
            .assemble(
                &track(&["1.m4s", "2.m4s", "3.m4s", "4.m4s"]),
                &dest,
                &CancellationToken::new(),
            )
            .await;

        let observed = fallback.observed.lock().unwrap()[0].clone();
        assert!(!observed.destination_existed);
        assert_eq!(observed.quarantine_contents.unwrap().len(), 3 * CHUNK.len());
        assert!(!result.is_complete());
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 3 * CHUNK.len() as u64);
    }

    #[tokio::test]
    async fn cancelled_assembly_skips_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("video_temp.mp4");
        let source = Arc::new(ScriptedSource::default().ok(&format!("{BASE}1.m4s"), b"one-"));
        let fallback = FakeFallback::new(true);
        let token = CancellationToken::new();
        token.cancel();

        let result = assembler(source, Some(fallback.clone()))
            .assemble(&track(&["1.m4s"]), &dest, &token)
            .await;

        assert!(matches!(result, AssemblyResult::Failed { .. }));
        assert!(fallback.observed.lock().unwrap().is_empty());
        assert!(!dest.exists());
    }
}
