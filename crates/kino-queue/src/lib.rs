//! Kino Queue - Playback queue and state synchronization for Kino
//!
//! This crate tracks an ordered queue of playable items on top of an opaque
//! system player:
//! - Resources: direct, custom-loaded and key-protected, plus loading and
//!   failing sentinels
//! - Assets with identity, deferred starting position and trackers
//! - Item transitions and identity-matched queue snapshots
//! - Latest-value accumulation of per-item asset channels
//! - Now-playing info and remote command synchronization
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Kino Queue                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │  PlayerItem  │  │  Accumulate  │  │  Item State  │           │
//! │  │   (assets)   │─►│ Latest Many  │  │   Reducer    │◄── engine │
//! │  └──────────────┘  └──────┬───────┘  └──────┬───────┘           │
//! │                           │                 │                   │
//! │                           └────────┬────────┘                   │
//! │                                    │                            │
//! │                             ┌──────┴──────┐                     │
//! │                             │   Player    │                     │
//! │                             │   Session   │                     │
//! │                             └──────┬──────┘                     │
//! │                                    │                            │
//! │  ┌──────────────┐  ┌───────────────┴┐  ┌──────────────┐         │
//! │  │   Trackers   │  │  Engine window │  │ Now Playing  │         │
//! │  │              │  │  (resources)   │  │ Synchronizer │         │
//! │  └──────────────┘  └────────────────┘  └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod accumulate;
pub mod asset;
pub mod attributes;
pub mod config;
pub mod content_key;
pub mod engine;
pub mod error;
pub mod now_playing;
pub mod pipeline;
pub mod player_item;
pub mod queue;
pub mod remote;
pub mod resource;
pub mod session;
pub mod tracker;
pub mod transition;
pub mod types;

pub use accumulate::{AccumulateLatestMany, LatestValues};
pub use asset::{Asset, AssetMetadata, AssetRef, Assetable};
pub use config::PlayerConfig;
pub use content_key::{ContentKeyRequest, ContentKeySession, ContentKeySessionDelegate};
pub use engine::{InMemoryPlayer, ItemHandle, ItemSource, NativeItem, SystemPlayer};
pub use error::{Error, ItemError, Result};
pub use now_playing::{NowPlayingInfo, NowPlayingKey, NowPlayingMetadata, NowPlayingValue};
pub use pipeline::{AssetUpdate, ItemState, ItemStateReducer};
pub use player_item::{AssetLoader, PlayerItem};
pub use queue::{Current, ItemIndex, ItemQueue, ItemQueueUpdate};
pub use remote::{
    InMemoryControlCenter, NowPlayingInfoCenter, NowPlayingSynchronizer, RemoteAction,
    RemoteCommand, RemoteCommandCenter,
};
pub use resource::{LoadingRequest, Resource, ResourceContext, ResourceLoaderDelegate};
pub use session::{AssetQueue, PlayerItemQueue, PlayerSession};
pub use tracker::{PlayerItemTracker, TrackerAdapter, TrackerEvent, TrackerEventLog};
pub use transition::{ItemTransition, Matches};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the queue library
pub fn init() {
    tracing::info!(version = VERSION, "Kino Queue initialized");
}
