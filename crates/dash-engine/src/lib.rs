//! DASH download engine.
//!
//! Reads an MPD manifest, picks the best video track and the audio track,
//! assembles each from its ordered segments (with a yt-dlp fallback when the
//! segment route fails) and stream-copies both into one container with ffmpeg.
//!
//! [`Pipeline`] drives the whole flow; the other modules are usable on their own.

pub mod assembler;
pub mod combiner;
pub mod config;
pub mod error;
pub mod fallback;
pub mod fetcher;
pub mod manifest;
pub mod pipeline;
pub mod process;
pub mod selector;

// Export common types for ease of use
pub use assembler::{AssemblyResult, AssemblyRoute, AssemblyState, StreamAssembler};
pub use combiner::{Combiner, FfmpegMuxer, Muxer};
pub use config::{
    EngineConfig, FallbackConfig, HttpConfig, MuxConfig, OutputLayout, RetryPolicy,
};
pub use error::{DashError, Result};
pub use fallback::{FallbackDownloader, YtDlpDownloader};
pub use fetcher::{FetchError, HttpResponse, HttpSource, SegmentFetcher, create_client};
pub use manifest::{ManifestIndex, ManifestSource, MediaCategory, SegmentLocator, Track, TrackGroup};
pub use pipeline::{Pipeline, PipelineReport, TrackReport};
pub use selector::{DownloadPlan, plan, select_audio, select_best_video};

pub use tokio_util::sync::CancellationToken;
