//! Now-playing info
//!
//! The info published to the system is the merge of two halves:
//! - a metadata half, built from the current asset metadata
//! - a playback half, built from the player properties
//!
//! On key collision the playback half wins.

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Artwork reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artwork {
    pub url: Url,
    pub width: u32,
    pub height: u32,
}

/// Metadata an asset exposes to the now-playing surface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlayingMetadata {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub artwork: Option<Artwork>,
}

impl NowPlayingMetadata {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_artwork(mut self, artwork: Artwork) -> Self {
        self.artwork = Some(artwork);
        self
    }
}

/// Now-playing info keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NowPlayingKey {
    Title,
    Artist,
    Comments,
    Artwork,
    IsLiveStream,
    PlaybackRate,
    ElapsedPlaybackTime,
    PlaybackDuration,
}

/// Now-playing info values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NowPlayingValue {
    Flag(bool),
    Number(f64),
    Text(String),
    Artwork(Artwork),
}

impl From<&str> for NowPlayingValue {
    fn from(value: &str) -> Self {
        NowPlayingValue::Text(value.to_string())
    }
}

impl From<String> for NowPlayingValue {
    fn from(value: String) -> Self {
        NowPlayingValue::Text(value)
    }
}

impl From<bool> for NowPlayingValue {
    fn from(value: bool) -> Self {
        NowPlayingValue::Flag(value)
    }
}

impl From<f64> for NowPlayingValue {
    fn from(value: f64) -> Self {
        NowPlayingValue::Number(value)
    }
}

/// Key-value mapping published to the now-playing surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NowPlayingInfo(BTreeMap<NowPlayingKey, NowPlayingValue>);

impl NowPlayingInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: NowPlayingKey, value: impl Into<NowPlayingValue>) {
        self.0.insert(key, value.into());
    }

    pub fn get(&self, key: NowPlayingKey) -> Option<&NowPlayingValue> {
        self.0.get(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NowPlayingKey, &NowPlayingValue)> {
        self.0.iter()
    }

    /// Merge `other` into a copy of `self`, values of `other` win
    pub fn merging(&self, other: &NowPlayingInfo) -> NowPlayingInfo {
        let mut merged = self.clone();
        merged
            .0
            .extend(other.0.iter().map(|(key, value)| (*key, value.clone())));
        merged
    }
}

/// Build the metadata half, omitting absent fields
pub fn metadata_info(metadata: &NowPlayingMetadata) -> NowPlayingInfo {
    let mut info = NowPlayingInfo::new();
    if let Some(title) = &metadata.title {
        info.insert(NowPlayingKey::Title, title.as_str());
    }
    if let Some(subtitle) = &metadata.subtitle {
        info.insert(NowPlayingKey::Artist, subtitle.as_str());
    }
    if let Some(description) = &metadata.description {
        info.insert(NowPlayingKey::Comments, description.as_str());
    }
    if let Some(artwork) = &metadata.artwork {
        info.insert(NowPlayingKey::Artwork, NowPlayingValue::Artwork(artwork.clone()));
    }
    info
}

/// Build the playback half.
///
/// Empty while the stream type is unknown. The rate is zero while
/// buffering. Elapsed time is measured from the start of the seekable range,
/// using the pending seek target when there is one.
pub fn playback_info(properties: &PlayerProperties, current_time: Option<Duration>) -> NowPlayingInfo {
    let mut info = NowPlayingInfo::new();
    if properties.stream_type == StreamType::Unknown {
        return info;
    }

    info.insert(
        NowPlayingKey::IsLiveStream,
        properties.stream_type == StreamType::Live,
    );
    let rate = if properties.is_buffering {
        0.0
    } else {
        f64::from(properties.rate())
    };
    info.insert(NowPlayingKey::PlaybackRate, rate);
    if let Some(time) = properties.seek_time.or(current_time) {
        let elapsed = time.as_secs_f64() - properties.seekable_time_range.start.as_secs_f64();
        info.insert(NowPlayingKey::ElapsedPlaybackTime, elapsed);
    }
    info.insert(
        NowPlayingKey::PlaybackDuration,
        properties.seekable_time_range.duration.as_secs_f64(),
    );
    info
}

/// Drops metadata halves structurally equal to the previous one
#[derive(Debug, Default)]
pub struct MetadataDeduplicator {
    last: Option<NowPlayingInfo>,
}

impl MetadataDeduplicator {
    /// Returns the info if it differs from the previously accepted one
    pub fn accept(&mut self, info: NowPlayingInfo) -> Option<NowPlayingInfo> {
        if self.last.as_ref() == Some(&info) {
            return None;
        }
        self.last = Some(info.clone());
        Some(info)
    }

    pub fn last(&self) -> Option<&NowPlayingInfo> {
        self.last.as_ref()
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
