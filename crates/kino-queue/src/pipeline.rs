//! Asset update pipeline values
//!
//! The session event loop observes the engine current item and its error,
//! reduces them to an [`ItemState`] and an [`ItemTransition`], and pairs the
//! accumulated asset snapshot with the current item into an [`AssetUpdate`].

use crate::asset::AssetRef;
use crate::engine::NativeItem;
use crate::error::ItemError;
use crate::transition::{ItemTransition, Matches};

/// Consistent snapshot of the queue assets and the engine current item
#[derive(Clone, Default)]
pub struct AssetUpdate {
    pub assets: Vec<AssetRef>,
    pub current_item: Option<NativeItem>,
}

impl AssetUpdate {
    pub fn new(assets: Vec<AssetRef>, current_item: Option<NativeItem>) -> Self {
        Self {
            assets,
            current_item,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Asset the current item was materialized from
    pub fn current_asset(&self) -> Option<&AssetRef> {
        let item = self.current_item.as_ref()?;
        self.assets.iter().find(|asset| asset.matches(item))
    }
}

impl std::fmt::Debug for AssetUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetUpdate")
            .field("assets", &self.assets.iter().map(|asset| asset.id()).collect::<Vec<_>>())
            .field("current_item", &self.current_item.as_ref().map(|item| item.handle()))
            .finish()
    }
}

/// Engine current item with its error
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemState {
    pub item: Option<NativeItem>,
    pub error: Option<ItemError>,
}

impl ItemState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(item: Option<NativeItem>, error: Option<ItemError>) -> Self {
        Self { item, error }
    }

    /// State of `item`, reading its live error
    pub fn observed(item: Option<NativeItem>) -> Self {
        let error = item.as_ref().and_then(|item| item.error());
        Self { item, error }
    }

    /// Keep reporting a failed item when the engine drops to no item
    pub fn reconciled(previous: &ItemState, current: ItemState) -> ItemState {
        if current.item.is_none() && previous.error.is_some() {
            previous.clone()
        } else {
            current
        }
    }
}

/// Reduces observed item states to published states and transitions
#[derive(Debug, Default)]
pub struct ItemStateReducer {
    previous: ItemState,
}

impl ItemStateReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed an observed state, get the state to publish and the transition
    pub fn reduce(&mut self, observed: ItemState) -> (ItemState, ItemTransition) {
        let state = ItemState::reconciled(&self.previous, observed.clone());
        let transition = match (&state.item, &state.error) {
            (Some(item), Some(_)) => ItemTransition::Stop(item.clone()),
            (Some(item), None) => ItemTransition::Advance(Some(item.clone())),
            (None, _) if self.previous.item.is_some() => ItemTransition::Finish,
            (None, _) => ItemTransition::Advance(None),
        };
        self.previous = observed;
        (state, transition)
    }

    pub fn previous(&self) -> &ItemState {
        &self.previous
    }
}
