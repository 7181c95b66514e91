//! Item transitions
//!
//! An [`ItemTransition`] tells where the playback cursor of a queue is. It
//! references the engine's native item and is resolved against queue
//! elements by identity through [`Matches`].

use crate::asset::{Asset, AssetMetadata, AssetRef};
use crate::engine::NativeItem;

/// Identity matching between queue elements and item references
pub trait Matches<R: ?Sized> {
    fn matches(&self, other: &R) -> bool;
}

impl<M: AssetMetadata> Matches<NativeItem> for Asset<M> {
    fn matches(&self, item: &NativeItem) -> bool {
        item.id() == Some(self.id())
    }
}

impl<M: AssetMetadata, N: AssetMetadata> Matches<Asset<N>> for Asset<M> {
    fn matches(&self, other: &Asset<N>) -> bool {
        self.matches_asset(other)
    }
}

impl Matches<NativeItem> for AssetRef {
    fn matches(&self, item: &NativeItem) -> bool {
        item.id() == Some(self.id())
    }
}

impl Matches<AssetRef> for AssetRef {
    fn matches(&self, other: &AssetRef) -> bool {
        self.id() == other.id()
    }
}

/// Where the queue cursor is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemTransition<R = NativeItem> {
    /// Move to the given item, or to the queue head
    Advance(Option<R>),
    /// Pinned on an item, without advancing
    Stop(R),
    /// Nothing is current
    Finish,
}

impl<R> ItemTransition<R> {
    /// The referenced item, if any
    pub fn item(&self) -> Option<&R> {
        match self {
            ItemTransition::Advance(item) => item.as_ref(),
            ItemTransition::Stop(item) => Some(item),
            ItemTransition::Finish => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ItemTransition::Finish)
    }

    pub fn map<S>(self, f: impl FnOnce(R) -> S) -> ItemTransition<S> {
        match self {
            ItemTransition::Advance(item) => ItemTransition::Advance(item.map(f)),
            ItemTransition::Stop(item) => ItemTransition::Stop(f(item)),
            ItemTransition::Finish => ItemTransition::Finish,
        }
    }
}

impl<R> Default for ItemTransition<R> {
    fn default() -> Self {
        ItemTransition::Advance(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::ItemAttributes;
    use crate::engine::ItemSource;
    use crate::now_playing::NowPlayingMetadata;
    use std::sync::Arc;
    use url::Url;

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://cdn.example.com/{}", path)).unwrap()
    }

    #[test]
    fn test_asset_matching_ignores_content() {
        let a = Asset::simple(url("a.m3u8"), NowPlayingMetadata::titled("A"));
        let b = Asset::simple(url("b.m3u8"), ()).with_id(a.id());
        assert!(a.matches(&b));

        let c = Asset::simple(url("a.m3u8"), NowPlayingMetadata::titled("A"));
        assert!(!a.matches(&c));
    }

    #[test]
    fn test_asset_ref_matches_native_item() {
        let asset: AssetRef = Arc::new(Asset::simple(url("a.m3u8"), ()));
        let native = NativeItem::new(url("a.m3u8"), ItemSource::Direct, ItemAttributes::new());
        assert!(!asset.matches(&native));

        let native = native.with_id(asset.id());
        assert!(asset.matches(&native));
    }

    #[test]
    fn test_transition_item() {
        assert_eq!(ItemTransition::Advance(Some(1)).item(), Some(&1));
        assert_eq!(ItemTransition::<u32>::Advance(None).item(), None);
        assert_eq!(ItemTransition::Stop(2).item(), Some(&2));
        assert!(ItemTransition::<u32>::Finish.is_finished());
        assert_eq!(ItemTransition::Stop(2).map(|i| i * 10), ItemTransition::Stop(20));
    }
}
