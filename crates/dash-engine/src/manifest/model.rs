//! Serde view of the parts of an MPD document the index needs.
//!
//! Only elements and attributes used for track and segment resolution are
//! declared; everything else in the document is ignored by the deserializer.
//! Numeric attributes are kept as strings and parsed leniently by the index.

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Mpd {
    #[serde(rename = "BaseURL", default)]
    pub base_urls: Vec<BaseUrl>,
    #[serde(rename = "Period", default)]
    pub periods: Vec<Period>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct BaseUrl {
    #[serde(rename = "$text", default)]
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Period {
    #[serde(rename = "BaseURL", default)]
    pub base_urls: Vec<BaseUrl>,
    #[serde(rename = "AdaptationSet", default)]
    pub adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AdaptationSet {
    #[serde(rename = "@id", default)]
    pub id: Option<String>,
    #[serde(rename = "@mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(rename = "@contentType", default)]
    pub content_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    pub base_urls: Vec<BaseUrl>,
    #[serde(rename = "Representation", default)]
    pub representations: Vec<Representation>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Representation {
    #[serde(rename = "@id", default)]
    pub id: Option<String>,
    #[serde(rename = "@bandwidth", default)]
    pub bandwidth: Option<String>,
    #[serde(rename = "@width", default)]
    pub width: Option<String>,
    #[serde(rename = "@height", default)]
    pub height: Option<String>,
    #[serde(rename = "@mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    pub base_urls: Vec<BaseUrl>,
    #[serde(rename = "SegmentList", default)]
    pub segment_list: Option<SegmentList>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SegmentList {
    #[serde(rename = "Initialization", default)]
    pub initialization: Option<Initialization>,
    #[serde(rename = "SegmentURL", default)]
    pub segment_urls: Vec<SegmentUrl>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Initialization {
    #[serde(rename = "@sourceURL", default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SegmentUrl {
    #[serde(rename = "@media", default)]
    pub media: Option<String>,
}

/// First non-blank `BaseURL` of an element, trimmed.
pub(crate) fn first_base_url(base_urls: &[BaseUrl]) -> Option<&str> {
    base_urls
        .iter()
        .map(|b| b.value.trim())
        .find(|v| !v.is_empty())
}
