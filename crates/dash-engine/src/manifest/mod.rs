//! MPD manifest index: track groups, tracks and their ordered segment lists.

mod model;
mod source;
mod track;

use itertools::Itertools;
use tracing::{debug, warn};
use url::Url;

use crate::error::{DashError, Result};
use model::{AdaptationSet, Mpd, Representation, first_base_url};
pub use source::ManifestSource;
pub(crate) use track::join_locator;
pub use track::{MediaCategory, SegmentLocator, Track, TrackGroup};

/// Read-only view over a parsed manifest.
#[derive(Debug, Clone)]
pub struct ManifestIndex {
    groups: Vec<TrackGroup>,
}

impl ManifestIndex {
    /// Parse raw manifest bytes.
    ///
    /// `origin` is the location the manifest was loaded from; relative
    /// `BaseURL`s are resolved against it.
    pub fn parse(bytes: &[u8], origin: Option<&Url>) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| DashError::manifest_malformed(format!("not valid UTF-8: {e}")))?;
        let text = text.trim_start_matches('\u{feff}');
        if text.trim().is_empty() {
            return Err(DashError::manifest_malformed("document is empty"));
        }

        let mpd: Mpd =
            quick_xml::de::from_str(text).map_err(|e| DashError::manifest_malformed(e.to_string()))?;

        let root_base = origin.map(Url::to_string);
        let mpd_base = inherit(root_base.as_deref(), first_base_url(&mpd.base_urls));

        let mut groups = Vec::new();
        for period in &mpd.periods {
            let period_base = inherit(mpd_base.as_deref(), first_base_url(&period.base_urls));
            for set in &period.adaptation_sets {
                let group = Self::build_group(groups.len(), set, period_base.as_deref());
                debug!(
                    index = group.index,
                    category = %group.category,
                    tracks = group.tracks.len(),
                    "Indexed track group"
                );
                groups.push(group);
            }
        }

        if groups.is_empty() {
            warn!("Manifest declares no adaptation sets");
        }

        Ok(Self { groups })
    }

    fn build_group(index: usize, set: &AdaptationSet, inherited: Option<&str>) -> TrackGroup {
        let category = set
            .mime_type
            .as_deref()
            .or(set.content_type.as_deref())
            .or_else(|| {
                set.representations
                    .iter()
                    .find_map(|r| r.mime_type.as_deref())
            })
            .map(MediaCategory::from_mime)
            .unwrap_or(MediaCategory::Unknown);

        let set_base = inherit(inherited, first_base_url(&set.base_urls));
        let tracks = set
            .representations
            .iter()
            .map(|rep| Self::build_track(rep, category, set_base.as_deref()))
            .collect();

        TrackGroup {
            index,
            id: set.id.clone(),
            category,
            mime_type: set.mime_type.clone(),
            tracks,
        }
    }

    fn build_track(rep: &Representation, category: MediaCategory, inherited: Option<&str>) -> Track {
        Track {
            id: rep.id.clone().unwrap_or_default(),
            bandwidth: parse_number(rep.bandwidth.as_deref()),
            width: parse_number(rep.width.as_deref()),
            height: parse_number(rep.height.as_deref()),
            category,
            base_url: inherit(inherited, first_base_url(&rep.base_urls)),
            segments: collect_segments(rep),
        }
    }

    /// All groups in document order with their category.
    pub fn list_groups(&self) -> impl Iterator<Item = (MediaCategory, &TrackGroup)> {
        self.groups.iter().map(|g| (g.category, g))
    }

    pub fn groups(&self) -> &[TrackGroup] {
        &self.groups
    }

    /// Tracks of a group in document order.
    pub fn list_tracks<'a>(&self, group: &'a TrackGroup) -> &'a [Track] {
        &group.tracks
    }

    /// Ordered, de-duplicated segment locators of one track.
    ///
    /// Returns `None` when the group has no track with that id; an empty slice
    /// means the track is fetched as a single resource.
    pub fn segments_for<'a>(
        &self,
        group: &'a TrackGroup,
        track_id: &str,
    ) -> Option<&'a [SegmentLocator]> {
        group
            .tracks
            .iter()
            .find(|t| t.id == track_id)
            .map(|t| t.segments.as_slice())
    }

    /// Groups of one category, in document order.
    pub fn groups_of(&self, category: MediaCategory) -> Vec<&TrackGroup> {
        self.groups
            .iter()
            .filter(|g| g.category == category)
            .collect()
    }
}

fn inherit(base: Option<&str>, own: Option<&str>) -> Option<String> {
    match (base, own) {
        (_, Some(own)) => Some(join_locator(base, own)),
        (Some(base), None) => Some(base.to_string()),
        (None, None) => None,
    }
}

fn parse_number<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Initialization first, then media locators; blanks skipped, repeats dropped.
fn collect_segments(rep: &Representation) -> Vec<SegmentLocator> {
    let Some(list) = rep.segment_list.as_ref() else {
        return Vec::new();
    };

    let init = list
        .initialization
        .as_ref()
        .and_then(|i| i.source_url.as_deref());
    let media = list.segment_urls.iter().filter_map(|s| s.media.as_deref());

    init.into_iter()
        .chain(media)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unique()
        .map(str::to_string)
        .collect()
}
