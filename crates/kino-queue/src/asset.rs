//! Assets
//!
//! An [`Asset`] is the playable unit of the queue: identity, resource,
//! optional metadata, deferred starting position, native item configuration
//! and tracker adapters. Assets are immutable, `with_*` helpers derive copies
//! which keep the identity unless it is explicitly replaced.

use crate::{
    attributes::PositionSupplier,
    content_key::ContentKeySessionDelegate,
    engine::{NativeItem, SystemPlayer},
    error::ItemError,
    now_playing::{metadata_info, NowPlayingInfo, NowPlayingMetadata},
    resource::{Resource, ResourceContext, ResourceLoaderDelegate},
    tracker::TrackerAdapter,
    types::*,
};
use std::sync::Arc;
use url::Url;

/// Metadata attached to an asset
pub trait AssetMetadata: Send + Sync + 'static {
    /// Metadata displayed by the now-playing surface
    fn now_playing_metadata(&self) -> NowPlayingMetadata;
}

impl AssetMetadata for () {
    fn now_playing_metadata(&self) -> NowPlayingMetadata {
        NowPlayingMetadata::default()
    }
}

impl AssetMetadata for NowPlayingMetadata {
    fn now_playing_metadata(&self) -> NowPlayingMetadata {
        self.clone()
    }
}

/// Hook applied to every native item materialized from an asset
pub type ConfigurationHook = Arc<dyn Fn(&NativeItem) + Send + Sync>;

/// Content to be played
pub struct Asset<M: AssetMetadata = ()> {
    id: ItemId,
    position: PositionSupplier,
    resource: Resource,
    metadata: Option<Arc<M>>,
    configuration: ConfigurationHook,
    tracker_adapters: Vec<TrackerAdapter<M>>,
}

impl<M: AssetMetadata> Asset<M> {
    fn with_resource(resource: Resource, metadata: Option<M>) -> Self {
        Self {
            id: ItemId::new(),
            position: Arc::new(|| None),
            resource,
            metadata: metadata.map(Arc::new),
            configuration: Arc::new(|_| {}),
            tracker_adapters: Vec::new(),
        }
    }

    /// Asset played from a URL
    pub fn simple(url: Url, metadata: M) -> Self {
        Self::with_resource(Resource::simple(url), Some(metadata))
    }

    /// Asset loaded by a custom resource loader, which must recognize the URL scheme
    pub fn custom(url: Url, delegate: Arc<dyn ResourceLoaderDelegate>, metadata: M) -> Self {
        Self::with_resource(Resource::custom(url, delegate), Some(metadata))
    }

    /// Encrypted asset, keys obtained through the content key session
    pub fn encrypted(url: Url, delegate: Arc<dyn ContentKeySessionDelegate>, metadata: M) -> Self {
        Self::with_resource(Resource::encrypted(url, delegate), Some(metadata))
    }

    /// Asset which stays loading
    pub fn loading() -> Self {
        Self::with_resource(Resource::loading(), None)
    }

    /// Asset which fails with `error`
    pub fn failed(error: ItemError) -> Self {
        Self::with_resource(Resource::failing(error), None)
    }

    pub fn with_configuration(mut self, configuration: impl Fn(&NativeItem) + Send + Sync + 'static) -> Self {
        self.configuration = Arc::new(configuration);
        self
    }

    pub fn with_tracker_adapters(mut self, tracker_adapters: Vec<TrackerAdapter<M>>) -> Self {
        self.tracker_adapters = tracker_adapters;
        self
    }

    pub fn with_id(mut self, id: ItemId) -> Self {
        self.id = id;
        self
    }

    /// Starting position, evaluated each time a native item is materialized
    pub fn with_position(mut self, position: impl Fn() -> Option<Position> + Send + Sync + 'static) -> Self {
        self.position = Arc::new(position);
        self
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn metadata(&self) -> Option<&M> {
        self.metadata.as_deref()
    }

    /// Same logical item, whatever the resource or metadata
    pub fn matches_asset<N: AssetMetadata>(&self, other: &Asset<N>) -> bool {
        self.id == other.id
    }

    /// Build a configured native item, seeking to the starting position if any
    pub fn materialize(&self, context: &ResourceContext) -> NativeItem {
        let item = self
            .resource
            .materialize(context)
            .with_id(self.id)
            .with_position(self.position.clone());
        (self.configuration)(&item);
        if let Some(position) = item.position() {
            item.seek(position);
        }
        item
    }
}

impl<M: AssetMetadata> Clone for Asset<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            position: self.position.clone(),
            resource: self.resource.clone(),
            metadata: self.metadata.clone(),
            configuration: self.configuration.clone(),
            tracker_adapters: self.tracker_adapters.clone(),
        }
    }
}

impl<M: AssetMetadata> std::fmt::Debug for Asset<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Asset")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .field("has_metadata", &self.metadata.is_some())
            .field("trackers", &self.tracker_adapters.len())
            .finish()
    }
}

/// Type-erased asset, as stored in queues and snapshots
pub trait Assetable: Send + Sync + 'static {
    fn id(&self) -> ItemId;

    fn resource(&self) -> &Resource;

    fn materialize(&self, context: &ResourceContext) -> NativeItem;

    /// Enable trackers, in list order
    fn enable(&self, player: &Arc<dyn SystemPlayer>);

    /// Forward metadata to trackers, no-op without metadata
    fn update_metadata(&self);

    fn update_properties(&self, properties: &PlayerProperties);

    /// Disable trackers, in list order
    fn disable(&self);

    /// Metadata half of the now-playing info.
    ///
    /// Metadata stays visible while the item is in error.
    fn now_playing_info(&self, error: Option<&ItemError>) -> NowPlayingInfo;

    /// Copy carrying another identity
    fn reidentified(&self, id: ItemId) -> AssetRef;

    /// Identities of the attached tracker instances, in list order
    fn tracker_keys(&self) -> Vec<usize>;
}

/// Shared handle to a type-erased asset
pub type AssetRef = Arc<dyn Assetable>;

impl<M: AssetMetadata> Assetable for Asset<M> {
    fn id(&self) -> ItemId {
        self.id
    }

    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn materialize(&self, context: &ResourceContext) -> NativeItem {
        Asset::materialize(self, context)
    }

    fn enable(&self, player: &Arc<dyn SystemPlayer>) {
        for adapter in &self.tracker_adapters {
            adapter.enable(player);
        }
    }

    fn update_metadata(&self) {
        let Some(metadata) = &self.metadata else {
            return;
        };
        for adapter in &self.tracker_adapters {
            adapter.update_metadata(metadata);
        }
    }

    fn update_properties(&self, properties: &PlayerProperties) {
        for adapter in &self.tracker_adapters {
            adapter.update_properties(properties);
        }
    }

    fn disable(&self) {
        for adapter in &self.tracker_adapters {
            adapter.disable();
        }
    }

    fn now_playing_info(&self, _error: Option<&ItemError>) -> NowPlayingInfo {
        match &self.metadata {
            Some(metadata) => metadata_info(&metadata.now_playing_metadata()),
            None => NowPlayingInfo::new(),
        }
    }

    fn reidentified(&self, id: ItemId) -> AssetRef {
        Arc::new(self.clone().with_id(id))
    }

    fn tracker_keys(&self) -> Vec<usize> {
        self.tracker_adapters.iter().map(TrackerAdapter::key).collect()
    }
}

impl std::fmt::Debug for dyn Assetable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assetable")
            .field("id", &self.id())
            .field("resource", self.resource())
            .finish()
    }
}
