//! Pipeline driver: manifest -> track selection -> assembly -> combine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::assembler::{AssemblyResult, AssemblyRoute, StreamAssembler};
use crate::combiner::{Combiner, FfmpegMuxer, Muxer};
use crate::config::EngineConfig;
use crate::error::{DashError, Result};
use crate::fallback::{FallbackDownloader, YtDlpDownloader};
use crate::fetcher::{HttpSource, SegmentFetcher, create_client};
use crate::manifest::{ManifestIndex, ManifestSource, Track};
use crate::selector::{self, DownloadPlan};

/// Outcome of one assembled track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackReport {
    pub track_id: String,
    pub route: AssemblyRoute,
    pub bytes: u64,
}

/// Outcome of a full run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub output: PathBuf,
    pub video: TrackReport,
    pub audio: TrackReport,
}

pub struct Pipeline {
    config: EngineConfig,
    fetcher: Arc<SegmentFetcher>,
    assembler: StreamAssembler,
    combiner: Combiner,
    token: CancellationToken,
}

impl Pipeline {
    /// Build a pipeline around explicit collaborators.
    pub fn new(
        config: EngineConfig,
        http: Arc<dyn HttpSource>,
        fallback: Arc<dyn FallbackDownloader>,
        muxer: Arc<dyn Muxer>,
    ) -> Self {
        let fetcher = Arc::new(SegmentFetcher::new(http, config.retry.clone()));
        let fallback = config.fallback.enabled.then_some(fallback);
        let assembler = StreamAssembler::new(fetcher.clone(), fallback, config.layout.clone());
        Self {
            combiner: Combiner::new(muxer),
            config,
            fetcher,
            assembler,
            token: CancellationToken::new(),
        }
    }

    /// Build a pipeline with reqwest, yt-dlp and ffmpeg.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let client = create_client(&config.http)?;
        let fallback = Arc::new(YtDlpDownloader::new(config.fallback.clone()));
        let muxer = Arc::new(FfmpegMuxer::new(config.mux.clone()));
        Ok(Self::new(config, Arc::new(client), fallback, muxer))
    }

    /// Use an externally owned token, e.g. one cancelled on Ctrl-C.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Read the manifest from disk or over HTTP.
    pub async fn load_manifest(&self, source: &ManifestSource) -> Result<Vec<u8>> {
        source.load(&self.fetcher, &self.token).await
    }

    /// Parse, select automatically, assemble and combine.
    pub async fn run(&self, manifest: &[u8], origin: Option<&Url>) -> Result<PipelineReport> {
        let index = ManifestIndex::parse(manifest, origin)?;
        let plan = selector::plan(&index)?;
        self.execute(&plan).await
    }

    /// Assemble both tracks of `plan` and combine them.
    ///
    /// The combiner only runs when both assemblies completed.
    pub async fn execute(&self, plan: &DownloadPlan) -> Result<PipelineReport> {
        let start_time = Instant::now();
        let layout = &self.config.layout;
        tokio::fs::create_dir_all(&layout.output_dir).await?;

        let video_path = layout.video_path();
        let audio_path = layout.audio_path();
        let output_path = layout.output_path();

        let (video, audio) = if self.config.concurrent_tracks {
            // A definitive failure of one track cancels its sibling.
            let run_token = self.token.child_token();
            tokio::join!(
                self.assemble_or_cancel(&plan.video, &video_path, &run_token),
                self.assemble_or_cancel(&plan.audio, &audio_path, &run_token),
            )
        } else {
            let video = self
                .assembler
                .assemble(&plan.video, &video_path, &self.token)
                .await;
            let audio = self
                .assembler
                .assemble(&plan.audio, &audio_path, &self.token)
                .await;
            (video, audio)
        };

        if self.token.is_cancelled() {
            return Err(DashError::Cancelled);
        }
        // A sibling cancelled by the other track's failure is not the cause.
        let (video_report, audio_report) = if video.is_cancelled() && !audio.is_complete() {
            let audio = Self::require_complete(&plan.audio, audio)?;
            (Self::require_complete(&plan.video, video)?, audio)
        } else {
            (
                Self::require_complete(&plan.video, video)?,
                Self::require_complete(&plan.audio, audio)?,
            )
        };

        self.combiner
            .combine(&video_path, &audio_path, &output_path, &self.token)
            .await?;

        info!(
            output = %output_path.display(),
            video = %plan.video.id,
            audio = %plan.audio.id,
            duration = ?start_time.elapsed(),
            "DASH download complete"
        );

        Ok(PipelineReport {
            output: output_path,
            video: video_report,
            audio: audio_report,
        })
    }

    /// Assemble a single track to `<name>` in the output directory, without muxing.
    pub async fn assemble_single(&self, track: &Track, name: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.layout.output_dir).await?;
        let destination = self.config.layout.path_for(name);
        let result = self
            .assembler
            .assemble(track, &destination, &self.token)
            .await;
        Self::require_complete(track, result)?;
        Ok(destination)
    }

    async fn assemble_or_cancel(
        &self,
        track: &Track,
        destination: &Path,
        run_token: &CancellationToken,
    ) -> AssemblyResult {
        let result = self.assembler.assemble(track, destination, run_token).await;
        if !result.is_complete() && !run_token.is_cancelled() {
            debug!(track = %track.id, "Cancelling sibling assembly");
            run_token.cancel();
        }
        result
    }

    fn require_complete(track: &Track, result: AssemblyResult) -> Result<TrackReport> {
        match result {
            AssemblyResult::Complete { route, bytes, .. } => Ok(TrackReport {
                track_id: track.id.clone(),
                route,
                bytes,
            }),
            AssemblyResult::Failed { reason, partial } => {
                warn!(
                    track = %track.id,
                    category = %track.category,
                    reason = %reason,
                    partial = ?partial,
                    "Assembly incomplete, not combining"
                );
                Err(DashError::AssemblyFailed {
                    category: track.category,
                    reason,
                    partial,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combiner::tests::ConcatMuxer;
    use crate::config::OutputLayout;
    use crate::fetcher::tests::{ScriptedSource, fast_policy};
    use crate::manifest::MediaCategory;
    use async_trait::async_trait;

    struct NoFallback;

    #[async_trait]
    impl FallbackDownloader for NoFallback {
        async fn download(&self, url: &Url, _output: &Path, _token: &CancellationToken) -> Result<()> {
            Err(DashError::FallbackFailed {
                url: url.to_string(),
                reason: "unavailable".to_string(),
            })
        }
    }

    const MANIFEST: &str = r#"<MPD><Period>
        <AdaptationSet mimeType="video/mp4">
          <BaseURL>https://cdn.example.com/v/</BaseURL>
          <Representation id="hd" height="720" width="1280">
            <SegmentList><SegmentURL media="1.m4s"/><SegmentURL media="2.m4s"/></SegmentList>
          </Representation>
        </AdaptationSet>
        <AdaptationSet mimeType="audio/mp4">
          <BaseURL>https://cdn.example.com/a/</BaseURL>
          <Representation id="aac">
            <SegmentList><SegmentURL media="1.m4s"/><SegmentURL media="2.m4s"/></SegmentList>
          </Representation>
        </AdaptationSet></Period></MPD>"#;

    fn pipeline(
        dir: &Path,
        source: ScriptedSource,
        muxer: Arc<ConcatMuxer>,
        concurrent: bool,
    ) -> Pipeline {
        let config = EngineConfig {
            retry: fast_policy(2),
            layout: OutputLayout {
                output_dir: dir.to_path_buf(),
                ..OutputLayout::default()
            },
            concurrent_tracks: concurrent,
            ..EngineConfig::default()
        };
        Pipeline::new(config, Arc::new(source), Arc::new(NoFallback), muxer)
    }

    fn full_source() -> ScriptedSource {
        ScriptedSource::default()
            .ok("https://cdn.example.com/v/1.m4s", b"V1")
            .ok("https://cdn.example.com/v/2.m4s", b"V2")
            .ok("https://cdn.example.com/a/1.m4s", b"A1")
            .ok("https://cdn.example.com/a/2.m4s", b"A2")
    }

    #[tokio::test]
    async fn runs_both_modes_to_a_combined_output() {
        for concurrent in [true, false] {
            let dir = tempfile::tempdir().unwrap();
            let muxer = Arc::new(ConcatMuxer::default());
            let report = pipeline(dir.path(), full_source(), muxer.clone(), concurrent)
                .run(MANIFEST.as_bytes(), None)
                .await
                .unwrap();

            assert_eq!(report.output, dir.path().join("output.mp4"));
            assert_eq!(report.video.route, AssemblyRoute::Segments);
            assert_eq!(std::fs::read(&report.output).unwrap(), b"V1V2A1A2");
            assert!(!dir.path().join("video_temp.mp4").exists());
            assert!(!dir.path().join("audio_temp.mp4").exists());
            assert_eq!(muxer.calls.lock().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn failed_assembly_skips_the_combiner() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::default()
            .ok("https://cdn.example.com/v/1.m4s", b"V1")
            .ok("https://cdn.example.com/v/2.m4s", b"V2")
            .ok("https://cdn.example.com/a/1.m4s", b"A1");
        let muxer = Arc::new(ConcatMuxer::default());

        let err = pipeline(dir.path(), source, muxer.clone(), false)
            .run(MANIFEST.as_bytes(), None)
            .await
            .unwrap_err();

        match err {
            DashError::AssemblyFailed {
                category, partial, ..
            } => {
                assert_eq!(category, MediaCategory::Audio);
                assert_eq!(partial, Some(dir.path().join("audio_temp.mp4")));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(muxer.calls.lock().unwrap().is_empty());
        assert!(!dir.path().join("output.mp4").exists());
    }

    /// Video fallback runs until stopped; audio fallback fails after a short while.
    struct SplitFallback;

    #[async_trait]
    impl FallbackDownloader for SplitFallback {
        async fn download(&self, url: &Url, _output: &Path, token: &CancellationToken) -> Result<()> {
            if url.path().starts_with("/v/") {
                token.cancelled().await;
                return Err(DashError::Cancelled);
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Err(DashError::FallbackFailed {
                url: url.to_string(),
                reason: "exited with code 1".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn sibling_stopped_inside_fallback_is_not_blamed() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            retry: fast_policy(1),
            layout: OutputLayout {
                output_dir: dir.path().to_path_buf(),
                ..OutputLayout::default()
            },
            ..EngineConfig::default()
        };
        let muxer = Arc::new(ConcatMuxer::default());
        let pipeline = Pipeline::new(
            config,
            Arc::new(ScriptedSource::default()),
            Arc::new(SplitFallback),
            muxer.clone(),
        );

        let err = pipeline.run(MANIFEST.as_bytes(), None).await.unwrap_err();

        match err {
            DashError::AssemblyFailed {
                category, reason, ..
            } => {
                assert_eq!(category, MediaCategory::Audio);
                assert!(reason.contains("exited with code 1"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(muxer.calls.lock().unwrap().is_empty());
        assert!(!dir.path().join("video_temp.mp4").exists());
        assert!(dir.path().join("video_temp.mp4.tmp").exists());
    }

    #[tokio::test]
    async fn concurrent_failure_reports_the_failed_track() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::default()
            .ok("https://cdn.example.com/a/1.m4s", b"A1")
            .ok("https://cdn.example.com/a/2.m4s", b"A2");
        let muxer = Arc::new(ConcatMuxer::default());

        let err = pipeline(dir.path(), source, muxer.clone(), true)
            .run(MANIFEST.as_bytes(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DashError::AssemblyFailed {
                category: MediaCategory::Video,
                ..
            }
        ));
        assert!(muxer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn combine_failure_keeps_assembled_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let muxer = Arc::new(ConcatMuxer {
            fail: true,
            ..Default::default()
        });

        let err = pipeline(dir.path(), full_source(), muxer, true)
            .run(MANIFEST.as_bytes(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, DashError::CombineFailed { .. }));
        assert_eq!(
            std::fs::read(dir.path().join("video_temp.mp4")).unwrap(),
            b"V1V2"
        );
        assert_eq!(
            std::fs::read(dir.path().join("audio_temp.mp4")).unwrap(),
            b"A1A2"
        );
    }

    #[tokio::test]
    async fn assembles_a_single_track_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            full_source(),
            Arc::new(ConcatMuxer::default()),
            true,
        );
        let index = ManifestIndex::parse(MANIFEST.as_bytes(), None).unwrap();
        let track = &index.groups()[1].tracks[0];

        let path = pipeline.assemble_single(track, "aac.mp4").await.unwrap();

        assert_eq!(path, dir.path().join("aac.mp4"));
        assert_eq!(std::fs::read(path).unwrap(), b"A1A2");
    }
}
