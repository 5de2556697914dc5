use std::fmt;

use url::Url;

use crate::error::{DashError, Result};

/// One ordered chunk of a track, as written in the manifest (absolute or relative).
pub type SegmentLocator = String;

/// Media kind of a track group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaCategory {
    Video,
    Audio,
    Text,
    Unknown,
}

impl MediaCategory {
    /// Classify a `mimeType` (`video/mp4`) or `contentType` (`video`) value.
    pub fn from_mime(value: &str) -> Self {
        let kind = value
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match kind.as_str() {
            "video" => Self::Video,
            "audio" => Self::Audio,
            "text" | "application" => Self::Text,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A selectable encoded rendition of the asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    /// Declared bandwidth in bits per second.
    pub bandwidth: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub category: MediaCategory,
    /// Inherited `BaseURL`, absolute when the manifest (or its origin) allows it.
    pub base_url: Option<String>,
    /// Ordered, de-duplicated segment locators. Empty means "fetch `base_url` whole".
    pub segments: Vec<SegmentLocator>,
}

impl Track {
    /// The base URL as an absolute URL, if it can be resolved to one.
    pub fn resolved_base(&self) -> Option<Url> {
        self.base_url.as_deref().and_then(|b| Url::parse(b).ok())
    }

    /// A track can be downloaded when it lists segments or has an absolute base URL.
    pub fn is_fetchable(&self) -> bool {
        !self.segments.is_empty() || self.resolved_base().is_some()
    }

    /// Resolve one locator against the base URL.
    pub fn segment_url(&self, locator: &str) -> Result<Url> {
        let joined = join_locator(self.base_url.as_deref(), locator);
        Url::parse(&joined).map_err(|e| DashError::invalid_url(joined, e.to_string()))
    }

    /// Human readable one-liner used in logs and prompts.
    pub fn describe(&self) -> String {
        let mut out = format!("{} ({})", self.id, self.category);
        if let (Some(w), Some(h)) = (self.width, self.height) {
            out.push_str(&format!(" {w}x{h}"));
        }
        if let Some(bw) = self.bandwidth {
            out.push_str(&format!(" {} kbps", bw / 1000));
        }
        if self.segments.is_empty() {
            out.push_str(", single resource");
        } else {
            out.push_str(&format!(", {} segments", self.segments.len()));
        }
        out
    }
}

/// A named collection of tracks sharing a media category (one `AdaptationSet`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackGroup {
    /// Position in document order, across periods.
    pub index: usize,
    pub id: Option<String>,
    pub category: MediaCategory,
    pub mime_type: Option<String>,
    pub tracks: Vec<Track>,
}

impl TrackGroup {
    pub fn describe(&self) -> String {
        let mime = self.mime_type.as_deref().unwrap_or(self.category.as_str());
        format!("{} ({} tracks)", mime, self.tracks.len())
    }
}

/// Join a reference onto an optional base with URL reference resolution.
///
/// Absolute references win. When the base is itself relative the join is done
/// on the path text, so the result stays relative until an absolute base appears.
pub(crate) fn join_locator(base: Option<&str>, reference: &str) -> String {
    let reference = reference.trim();
    if Url::parse(reference).is_ok() {
        return reference.to_string();
    }
    let Some(base) = base.map(str::trim).filter(|b| !b.is_empty()) else {
        return reference.to_string();
    };
    if let Ok(base_url) = Url::parse(base) {
        return base_url
            .join(reference)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| reference.to_string());
    }
    if reference.starts_with('/') {
        return reference.to_string();
    }
    match base.rfind('/') {
        Some(idx) => format!("{}{}", &base[..=idx], reference),
        None => reference.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("video/mp4", MediaCategory::Video)]
    #[case("audio/mp4", MediaCategory::Audio)]
    #[case("Audio", MediaCategory::Audio)]
    #[case("text/vtt", MediaCategory::Text)]
    #[case("image/jpeg", MediaCategory::Unknown)]
    fn classifies_mime_types(#[case] mime: &str, #[case] expected: MediaCategory) {
        assert_eq!(MediaCategory::from_mime(mime), expected);
    }

    #[rstest]
    #[case(Some("https://cdn.example.com/v/"), "seg1.m4s", "https://cdn.example.com/v/seg1.m4s")]
    #[case(Some("https://cdn.example.com/v/index"), "seg1.m4s", "https://cdn.example.com/v/seg1.m4s")]
    #[case(Some("https://cdn.example.com/v/"), "https://other.example.com/a.m4s", "https://other.example.com/a.m4s")]
    #[case(Some("https://cdn.example.com/v/"), "/root.m4s", "https://cdn.example.com/root.m4s")]
    #[case(Some("media/"), "seg1.m4s", "media/seg1.m4s")]
    #[case(None, "seg1.m4s", "seg1.m4s")]
    fn joins_locators(#[case] base: Option<&str>, #[case] reference: &str, #[case] expected: &str) {
        assert_eq!(join_locator(base, reference), expected);
    }

    #[test]
    fn fetchable_requires_segments_or_absolute_base() {
        let mut track = Track {
            id: "v1".to_string(),
            bandwidth: None,
            width: None,
            height: None,
            category: MediaCategory::Video,
            base_url: Some("relative/".to_string()),
            segments: Vec::new(),
        };
        assert!(!track.is_fetchable());

        track.base_url = Some("https://cdn.example.com/v.mp4".to_string());
        assert!(track.is_fetchable());

        track.base_url = None;
        track.segments = vec!["a.m4s".to_string()];
        assert!(track.is_fetchable());
        assert!(track.segment_url("a.m4s").is_err());
    }
}
