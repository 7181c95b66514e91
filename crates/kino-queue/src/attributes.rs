//! Out-of-band attributes attached to native items
//!
//! Native items belong to the engine, so the identity and deferred starting
//! position of the asset they were built from live in a side table keyed by
//! item handle. A native item removes its own entry when its last handle is
//! dropped.

use crate::engine::ItemHandle;
use crate::types::{ItemId, Position};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Deferred starting position, evaluated when an item is materialized
pub type PositionSupplier = Arc<dyn Fn() -> Option<Position> + Send + Sync>;

#[derive(Clone, Default)]
struct Attributes {
    id: Option<ItemId>,
    position: Option<PositionSupplier>,
}

/// Side table of native item attributes
#[derive(Default)]
pub struct ItemAttributes {
    entries: Mutex<HashMap<ItemHandle, Attributes>>,
}

impl ItemAttributes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_id(&self, handle: ItemHandle, id: ItemId) {
        self.entries.lock().entry(handle).or_default().id = Some(id);
    }

    pub(crate) fn set_position(&self, handle: ItemHandle, position: PositionSupplier) {
        self.entries.lock().entry(handle).or_default().position = Some(position);
    }

    /// Identity assigned to an item
    pub fn id(&self, handle: ItemHandle) -> Option<ItemId> {
        self.entries.lock().get(&handle).and_then(|a| a.id)
    }

    /// Resolve the deferred position assigned to an item
    pub fn position(&self, handle: ItemHandle) -> Option<Position> {
        // Suppliers run outside the lock, they may be arbitrary user code.
        let supplier = self
            .entries
            .lock()
            .get(&handle)
            .and_then(|a| a.position.clone())?;
        supplier()
    }

    pub(crate) fn remove(&self, handle: ItemHandle) {
        self.entries.lock().remove(&handle);
    }

    /// Number of items with attributes
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ItemAttributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemAttributes")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ItemSource, NativeItem};
    use std::time::Duration;
    use url::Url;

    fn item(attributes: &Arc<ItemAttributes>) -> NativeItem {
        let url = Url::parse("https://cdn.example.com/master.m3u8").unwrap();
        NativeItem::new(url, ItemSource::Direct, attributes.clone())
    }

    #[test]
    fn test_id_lookup() {
        let attributes = ItemAttributes::new();
        let id = ItemId::new();
        let native = item(&attributes).with_id(id);
        assert_eq!(native.id(), Some(id));
        assert_eq!(attributes.id(native.handle()), Some(id));
    }

    #[test]
    fn test_position_is_deferred() {
        let attributes = ItemAttributes::new();
        let seconds = Arc::new(Mutex::new(5));
        let source = seconds.clone();
        let native = item(&attributes).with_position(Arc::new(move || {
            Some(Position::at(Duration::from_secs(*source.lock())))
        }));

        *seconds.lock() = 42;
        assert_eq!(native.position(), Some(Position::at(Duration::from_secs(42))));
    }

    #[test]
    fn test_entry_removed_with_last_handle() {
        let attributes = ItemAttributes::new();
        let native = item(&attributes).with_id(ItemId::new());
        let copy = native.clone();
        assert_eq!(attributes.len(), 1);

        drop(native);
        assert_eq!(attributes.len(), 1);

        drop(copy);
        assert!(attributes.is_empty());
    }
}
