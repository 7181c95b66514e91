//! Core types for Kino Queue

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a queued item, stable across asset re-derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A position to seek to, with the tolerances the engine may apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Target time
    pub time: Duration,
    /// Tolerance before the target
    pub tolerance_before: Duration,
    /// Tolerance after the target
    pub tolerance_after: Duration,
}

impl Position {
    /// Exact position
    pub fn at(time: Duration) -> Self {
        Self::to(time, Duration::ZERO, Duration::ZERO)
    }

    /// Position the engine may reach at any nearby time
    pub fn near(time: Duration) -> Self {
        Self::to(time, Duration::MAX, Duration::MAX)
    }

    /// Position with explicit tolerances
    pub fn to(time: Duration, tolerance_before: Duration, tolerance_after: Duration) -> Self {
        Self {
            time,
            tolerance_before,
            tolerance_after,
        }
    }
}

/// A time range on the item timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Duration,
    pub duration: Duration,
}

impl TimeRange {
    pub fn new(start: Duration, duration: Duration) -> Self {
        Self { start, duration }
    }

    /// The empty range, reported while nothing is seekable
    pub const EMPTY: TimeRange = TimeRange {
        start: Duration::ZERO,
        duration: Duration::ZERO,
    };

    pub fn is_empty(&self) -> bool {
        self.duration.is_zero()
    }

    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Stream type of the current item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    #[default]
    Unknown,
    OnDemand,
    Live,
}

impl StreamType {
    /// Derive the stream type from the seekable range and the item duration.
    ///
    /// A `None` duration means the engine reports an indefinite duration.
    pub fn from_timing(seekable: TimeRange, duration: Option<Duration>) -> Self {
        if seekable.is_empty() {
            StreamType::Unknown
        } else if duration.is_none() {
            StreamType::Live
        } else {
            StreamType::OnDemand
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamType::Unknown => write!(f, "unknown"),
            StreamType::OnDemand => write!(f, "on-demand"),
            StreamType::Live => write!(f, "live"),
        }
    }
}

/// Loading status of a native item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Not loaded yet
    #[default]
    Unknown,
    /// A resource loader is resolving the item
    Loading,
    /// Item can be played
    ReadyToPlay,
    /// Item failed, see its error slot
    Failed,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Unknown => write!(f, "unknown"),
            ItemStatus::Loading => write!(f, "loading"),
            ItemStatus::ReadyToPlay => write!(f, "ready"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Engine-level playback properties, each independently observable
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackProperties {
    pub rate: f32,
    pub is_external_playback_active: bool,
    pub is_muted: bool,
}

/// Aggregate properties used to build the playback half of now-playing info
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerProperties {
    pub playback: PlaybackProperties,
    pub stream_type: StreamType,
    pub is_buffering: bool,
    /// Pending seek target, preferred over the engine time while seeking
    pub seek_time: Option<Duration>,
    pub seekable_time_range: TimeRange,
}

impl PlayerProperties {
    pub fn rate(&self) -> f32 {
        self.playback.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_type_from_timing() {
        let range = TimeRange::new(Duration::ZERO, Duration::from_secs(60));
        assert_eq!(StreamType::from_timing(TimeRange::EMPTY, None), StreamType::Unknown);
        assert_eq!(StreamType::from_timing(range, None), StreamType::Live);
        assert_eq!(
            StreamType::from_timing(range, Some(Duration::from_secs(60))),
            StreamType::OnDemand
        );
    }

    #[test]
    fn test_time_range_end() {
        let range = TimeRange::new(Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(range.end(), Duration::from_secs(15));
        assert!(!range.is_empty());
    }

    #[test]
    fn test_item_ids_are_unique() {
        assert_ne!(ItemId::new(), ItemId::new());
    }
}
