//! Player items
//!
//! A [`PlayerItem`] is a queue element: a stable identity plus a latest-value
//! asset channel. Every asset it publishes carries the item identity, so the
//! queue recognizes the item whatever its current asset.

use crate::asset::{Asset, AssetMetadata, AssetRef};
use crate::engine::NativeItem;
use crate::error::ItemError;
use crate::transition::Matches;
use crate::types::ItemId;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

/// Asynchronous asset source, e.g. a metadata service lookup
#[async_trait]
pub trait AssetLoader: Send + Sync + 'static {
    type Metadata: AssetMetadata;

    async fn load(&self) -> std::result::Result<Asset<Self::Metadata>, ItemError>;
}

/// Queue element
#[derive(Clone)]
pub struct PlayerItem {
    id: ItemId,
    asset: Arc<watch::Sender<AssetRef>>,
}

impl PlayerItem {
    /// Item publishing `asset`
    pub fn new<M: AssetMetadata>(asset: Asset<M>) -> Self {
        let id = ItemId::new();
        let asset: AssetRef = Arc::new(asset.with_id(id));
        let (tx, _) = watch::channel(asset);
        Self {
            id,
            asset: Arc::new(tx),
        }
    }

    pub fn simple<M: AssetMetadata>(url: Url, metadata: M) -> Self {
        Self::new(Asset::simple(url, metadata))
    }

    /// Item which stays loading until updated
    pub fn loading() -> Self {
        Self::new(Asset::<()>::loading())
    }

    /// Item failed with `error`
    pub fn failed(error: ItemError) -> Self {
        Self::new(Asset::<()>::failed(error))
    }

    /// Item loading until `loader` resolves.
    ///
    /// Publishes the loaded asset, or a failed asset carrying the loader
    /// error. Must be called within a Tokio runtime.
    pub fn spawn<L: AssetLoader>(loader: L) -> Self {
        let item = Self::loading();
        let id = item.id;
        let asset = Arc::downgrade(&item.asset);
        tokio::spawn(async move {
            let result = loader.load().await;
            let Some(asset) = asset.upgrade() else {
                debug!(item_id = %id, "Item released before its asset was loaded");
                return;
            };
            let loaded = Self { id, asset };
            match result {
                Ok(asset) => loaded.update(asset),
                Err(error) => loaded.fail(error),
            }
        });
        item
    }

    /// Publish a new asset, re-identified with the item identity
    pub fn update<M: AssetMetadata>(&self, asset: Asset<M>) {
        self.publish(Arc::new(asset.with_id(self.id)));
    }

    /// Publish a failed asset
    pub fn fail(&self, error: ItemError) {
        self.update(Asset::<()>::failed(error));
    }

    fn publish(&self, asset: AssetRef) {
        debug!(item_id = %self.id, resource = ?asset.resource(), "Player item asset updated");
        self.asset.send_replace(asset);
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Latest asset
    pub fn asset(&self) -> AssetRef {
        self.asset.borrow().clone()
    }

    /// Observe asset updates
    pub fn subscribe(&self) -> watch::Receiver<AssetRef> {
        self.asset.subscribe()
    }
}

impl PartialEq for PlayerItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PlayerItem {}

impl Matches<NativeItem> for PlayerItem {
    fn matches(&self, item: &NativeItem) -> bool {
        item.id() == Some(self.id)
    }
}

impl Matches<PlayerItem> for PlayerItem {
    fn matches(&self, other: &PlayerItem) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for PlayerItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerItem")
            .field("id", &self.id)
            .field("resource", self.asset.borrow().resource())
            .finish()
    }
}
