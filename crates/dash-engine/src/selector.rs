//! Deterministic track selection.

use tracing::{debug, info};

use crate::error::{DashError, Result};
use crate::manifest::{ManifestIndex, MediaCategory, Track, TrackGroup};

/// The pair of tracks a pipeline run downloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub video: Track,
    pub audio: Track,
}

/// Pick the highest quality fetchable video track.
///
/// Ranking is `(height, width, bandwidth)` compared lexicographically, with
/// missing values counting as zero. On a full tie the earlier track wins.
pub fn select_best_video(tracks: &[Track]) -> Result<&Track> {
    tracks
        .iter()
        .filter(|t| {
            let eligible = t.is_fetchable();
            if !eligible {
                debug!(track = %t.id, "Skipping video track without segments or base URL");
            }
            eligible
        })
        .rev()
        .max_by_key(|t| {
            (
                t.height.unwrap_or(0),
                t.width.unwrap_or(0),
                t.bandwidth.unwrap_or(0),
            )
        })
        .ok_or(DashError::NoEligibleTrack {
            category: MediaCategory::Video,
        })
}

/// The audio rendition: first track in document order.
pub fn select_audio(tracks: &[Track]) -> Result<&Track> {
    tracks.first().ok_or(DashError::NoEligibleTrack {
        category: MediaCategory::Audio,
    })
}

/// The single non-empty group of a category.
pub fn single_group(index: &ManifestIndex, category: MediaCategory) -> Result<&TrackGroup> {
    let groups: Vec<&TrackGroup> = index
        .groups_of(category)
        .into_iter()
        .filter(|g| !g.tracks.is_empty())
        .collect();
    match groups.as_slice() {
        [group] => Ok(group),
        _ => Err(DashError::MissingTrackGroup {
            category,
            found: groups.len(),
        }),
    }
}

/// Build the automatic plan: exactly one video group and one audio group.
pub fn plan(index: &ManifestIndex) -> Result<DownloadPlan> {
    let video_group = single_group(index, MediaCategory::Video)?;
    let audio_group = single_group(index, MediaCategory::Audio)?;

    let video = select_best_video(index.list_tracks(video_group))?;
    let audio = select_audio(index.list_tracks(audio_group))?;

    info!(video = %video.describe(), audio = %audio.describe(), "Selected tracks");

    Ok(DownloadPlan {
        video: video.clone(),
        audio: audio.clone(),
    })
}
