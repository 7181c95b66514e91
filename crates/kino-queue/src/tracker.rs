//! Item trackers
//!
//! Trackers observe the lifecycle of one asset:
//! - `enable` when the asset becomes current on an engine
//! - `update_metadata` whenever its metadata changes
//! - `update_properties` whenever playback properties change
//! - `disable` when it stops being current
//!
//! Trackers never call back into the queue.

use crate::engine::SystemPlayer;
use crate::types::*;
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Analytics or observability collaborator attached to an asset
pub trait PlayerItemTracker: Send + Sync + 'static {
    /// Metadata the tracker consumes
    type Metadata: Send + Sync + 'static;

    fn enable(&self, player: &Arc<dyn SystemPlayer>);

    fn update_metadata(&self, metadata: &Self::Metadata);

    fn update_properties(&self, _properties: &PlayerProperties) {}

    fn disable(&self);
}

impl<T: PlayerItemTracker> PlayerItemTracker for Arc<T> {
    type Metadata = T::Metadata;

    fn enable(&self, player: &Arc<dyn SystemPlayer>) {
        (**self).enable(player)
    }

    fn update_metadata(&self, metadata: &Self::Metadata) {
        (**self).update_metadata(metadata)
    }

    fn update_properties(&self, properties: &PlayerProperties) {
        (**self).update_properties(properties)
    }

    fn disable(&self) {
        (**self).disable()
    }
}

trait ErasedTracker<M>: Send + Sync {
    fn enable(&self, player: &Arc<dyn SystemPlayer>);
    fn update_metadata(&self, metadata: &M);
    fn update_properties(&self, properties: &PlayerProperties);
    fn disable(&self);
}

struct MappedTracker<T: PlayerItemTracker, M> {
    tracker: T,
    mapper: Box<dyn Fn(&M) -> T::Metadata + Send + Sync>,
}

impl<T, M> ErasedTracker<M> for MappedTracker<T, M>
where
    T: PlayerItemTracker,
    M: 'static,
{
    fn enable(&self, player: &Arc<dyn SystemPlayer>) {
        self.tracker.enable(player);
    }

    fn update_metadata(&self, metadata: &M) {
        self.tracker.update_metadata(&(self.mapper)(metadata));
    }

    fn update_properties(&self, properties: &PlayerProperties) {
        self.tracker.update_properties(properties);
    }

    fn disable(&self) {
        self.tracker.disable();
    }
}

/// A tracker bound to an asset metadata type through a mapper
pub struct TrackerAdapter<M> {
    inner: Arc<dyn ErasedTracker<M>>,
}

impl<M: 'static> TrackerAdapter<M> {
    pub fn new<T>(tracker: T, mapper: impl Fn(&M) -> T::Metadata + Send + Sync + 'static) -> Self
    where
        T: PlayerItemTracker,
    {
        Self {
            inner: Arc::new(MappedTracker {
                tracker,
                mapper: Box::new(mapper),
            }),
        }
    }

    /// Adapter for a tracker that ignores metadata
    pub fn without_metadata<T>(tracker: T) -> Self
    where
        T: PlayerItemTracker<Metadata = ()>,
    {
        Self::new(tracker, |_| ())
    }

    /// Identity of the wrapped tracker instance
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub(crate) fn enable(&self, player: &Arc<dyn SystemPlayer>) {
        self.inner.enable(player);
    }

    pub(crate) fn update_metadata(&self, metadata: &M) {
        self.inner.update_metadata(metadata);
    }

    pub(crate) fn update_properties(&self, properties: &PlayerProperties) {
        self.inner.update_properties(properties);
    }

    pub(crate) fn disable(&self) {
        self.inner.disable();
    }
}

impl<M> Clone for TrackerAdapter<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M> std::fmt::Debug for TrackerAdapter<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerAdapter").finish_non_exhaustive()
    }
}

/// Tracker lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// Asset became current
    Enabled,

    /// Metadata changed
    MetadataUpdated { metadata: serde_json::Value },

    /// Playback properties changed
    PropertiesUpdated {
        rate: f32,
        stream_type: StreamType,
        is_buffering: bool,
    },

    /// Asset stopped being current
    Disabled,
}

/// Tracker event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerEventRecord {
    /// Unique event ID
    pub id: Uuid,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Sequence number
    pub sequence: u64,
    /// The event
    #[serde(flatten)]
    pub event: TrackerEvent,
}

#[derive(Default)]
struct EventLogState {
    sequence: u64,
    records: Vec<TrackerEventRecord>,
}

/// Tracker recording its lifecycle events, for diagnostics
#[derive(Default)]
pub struct TrackerEventLog {
    label: String,
    state: Mutex<EventLogState>,
}

impl TrackerEventLog {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            state: Mutex::new(EventLogState::default()),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn record(&self, event: TrackerEvent) {
        let mut state = self.state.lock();
        state.sequence += 1;
        let record = TrackerEventRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sequence: state.sequence,
            event,
        };
        debug!(
            tracker = %self.label,
            event_id = %record.id,
            event = ?record.event,
            "Tracker event"
        );
        state.records.push(record);
    }

    /// All recorded events
    pub fn records(&self) -> Vec<TrackerEventRecord> {
        self.state.lock().records.clone()
    }

    /// Recorded events, without record metadata
    pub fn events(&self) -> Vec<TrackerEvent> {
        self.state
            .lock()
            .records
            .iter()
            .map(|record| record.event.clone())
            .collect()
    }

    /// Clear recorded events, sequence numbers keep increasing
    pub fn clear(&self) {
        self.state.lock().records.clear();
    }

    /// Export recorded events as JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.records())?)
    }
}

impl PlayerItemTracker for TrackerEventLog {
    type Metadata = serde_json::Value;

    fn enable(&self, _player: &Arc<dyn SystemPlayer>) {
        self.record(TrackerEvent::Enabled);
    }

    fn update_metadata(&self, metadata: &Self::Metadata) {
        self.record(TrackerEvent::MetadataUpdated {
            metadata: metadata.clone(),
        });
    }

    fn update_properties(&self, properties: &PlayerProperties) {
        self.record(TrackerEvent::PropertiesUpdated {
            rate: properties.rate(),
            stream_type: properties.stream_type,
            is_buffering: properties.is_buffering,
        });
    }

    fn disable(&self) {
        self.record(TrackerEvent::Disabled);
    }
}
