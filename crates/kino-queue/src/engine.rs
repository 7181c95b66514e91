//! System player abstraction
//!
//! The engine owns decoding, rendering and networking. This crate only
//! observes it and hands it materialized [`NativeItem`]s:
//!
//! - [`SystemPlayer`] is the engine contract (current item, rate, external
//!   playback, mute and buffering observables, synchronous timing queries)
//! - [`NativeItem`] is the engine's unit of playable content, with reference
//!   identity, an error slot and a loading status
//! - [`InMemoryPlayer`] is a deterministic engine for tests and headless runs

use crate::{
    attributes::{ItemAttributes, PositionSupplier},
    error::ItemError,
    resource::{LoadingRequest, ResourceLoaderDelegate, SerialQueue},
    types::*,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle of a native item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemHandle(u64);

impl ItemHandle {
    fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ItemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the engine obtains the item's data
#[derive(Clone)]
pub enum ItemSource {
    /// The engine fetches the URL itself
    Direct,
    /// Loading is delegated to a resource loader on the shared loader queue
    ResourceLoaded {
        delegate: Arc<dyn ResourceLoaderDelegate>,
        queue: SerialQueue,
    },
    /// Content keys are delivered through the content key session
    KeyProtected,
}

impl std::fmt::Debug for ItemSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemSource::Direct => write!(f, "Direct"),
            ItemSource::ResourceLoaded { .. } => write!(f, "ResourceLoaded"),
            ItemSource::KeyProtected => write!(f, "KeyProtected"),
        }
    }
}

/// Settings configuration hooks may adjust on a native item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemSettings {
    pub preferred_forward_buffer_duration: Option<Duration>,
    pub preferred_peak_bitrate: Option<f64>,
}

struct NativeItemInner {
    handle: ItemHandle,
    url: Url,
    source: ItemSource,
    attributes: Arc<ItemAttributes>,
    status: watch::Sender<ItemStatus>,
    error: watch::Sender<Option<ItemError>>,
    loading_started: AtomicBool,
    pending_seek: watch::Sender<Option<Position>>,
    content_key: Mutex<Option<Bytes>>,
    settings: Mutex<ItemSettings>,
}

impl Drop for NativeItemInner {
    fn drop(&mut self) {
        self.attributes.remove(self.handle);
    }
}

/// Handle to an engine item, compared by reference identity
#[derive(Clone)]
pub struct NativeItem {
    inner: Arc<NativeItemInner>,
}

impl NativeItem {
    pub fn new(url: Url, source: ItemSource, attributes: Arc<ItemAttributes>) -> Self {
        let (status, _) = watch::channel(ItemStatus::Unknown);
        let (error, _) = watch::channel(None);
        Self {
            inner: Arc::new(NativeItemInner {
                handle: ItemHandle::next(),
                url,
                source,
                attributes,
                status,
                error,
                loading_started: AtomicBool::new(false),
                pending_seek: watch::channel(None).0,
                content_key: Mutex::new(None),
                settings: Mutex::new(ItemSettings::default()),
            }),
        }
    }

    pub fn handle(&self) -> ItemHandle {
        self.inner.handle
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn source(&self) -> &ItemSource {
        &self.inner.source
    }

    pub fn is_resource_loaded(&self) -> bool {
        matches!(self.inner.source, ItemSource::ResourceLoaded { .. })
    }

    pub fn is_key_protected(&self) -> bool {
        matches!(self.inner.source, ItemSource::KeyProtected)
    }

    /// Identity of the asset this item was materialized from
    pub fn id(&self) -> Option<ItemId> {
        self.inner.attributes.id(self.inner.handle)
    }

    /// Starting position of the asset this item was materialized from
    pub fn position(&self) -> Option<Position> {
        self.inner.attributes.position(self.inner.handle)
    }

    pub(crate) fn with_id(self, id: ItemId) -> Self {
        self.inner.attributes.set_id(self.inner.handle, id);
        self
    }

    pub(crate) fn with_position(self, position: PositionSupplier) -> Self {
        self.inner.attributes.set_position(self.inner.handle, position);
        self
    }

    pub fn status(&self) -> ItemStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ItemStatus> {
        self.inner.status.subscribe()
    }

    /// Current error, if the item failed
    pub fn error(&self) -> Option<ItemError> {
        self.inner.error.borrow().clone()
    }

    /// Observe error changes
    pub fn subscribe_error(&self) -> watch::Receiver<Option<ItemError>> {
        self.inner.error.subscribe()
    }

    /// Mark the item as failed
    pub fn fail(&self, error: ItemError) {
        debug!(item = %self.handle(), error = %error, "Native item failed");
        self.inner.error.send_replace(Some(error));
        self.inner.status.send_replace(ItemStatus::Failed);
    }

    pub(crate) fn mark_loading(&self) {
        self.set_status_unless_failed(ItemStatus::Loading);
    }

    /// Mark the item as ready to play, ignored once failed
    pub fn mark_ready(&self) {
        self.set_status_unless_failed(ItemStatus::ReadyToPlay);
    }

    fn set_status_unless_failed(&self, status: ItemStatus) {
        self.inner.status.send_if_modified(|current| {
            if *current == ItemStatus::Failed || *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Request a seek. It stays pending until the engine performs it.
    pub fn seek(&self, position: Position) {
        self.inner.pending_seek.send_replace(Some(position));
    }

    pub fn pending_seek(&self) -> Option<Position> {
        *self.inner.pending_seek.borrow()
    }

    /// Observe seek requests and completions
    pub fn subscribe_seek(&self) -> watch::Receiver<Option<Position>> {
        self.inner.pending_seek.subscribe()
    }

    /// Consume the pending seek once the engine performed it
    pub fn take_pending_seek(&self) -> Option<Position> {
        let mut taken = None;
        self.inner.pending_seek.send_if_modified(|pending| {
            taken = pending.take();
            taken.is_some()
        });
        taken
    }

    pub fn content_key(&self) -> Option<Bytes> {
        self.inner.content_key.lock().clone()
    }

    pub(crate) fn deliver_content_key(&self, key: Bytes) {
        *self.inner.content_key.lock() = Some(key);
        self.mark_ready();
    }

    pub fn settings(&self) -> ItemSettings {
        self.inner.settings.lock().clone()
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut ItemSettings)) {
        update(&mut self.inner.settings.lock());
    }

    /// Start loading the item.
    ///
    /// Resource-loaded items hand a loading request to their delegate on the
    /// shared loader queue. Other items are loaded by the engine itself. Only
    /// the first call has an effect.
    pub fn start_loading(&self) {
        if self.inner.loading_started.swap(true, Ordering::SeqCst) {
            return;
        }
        if let ItemSource::ResourceLoaded { delegate, queue } = &self.inner.source {
            let delegate = delegate.clone();
            let request = LoadingRequest::new(self);
            let item = self.downgrade();
            queue.dispatch(move || {
                if !delegate.should_wait_for_loading(request) {
                    if let Some(item) = item.upgrade() {
                        item.fail(ItemError::new(
                            "resource_loader",
                            -1,
                            format!("no resource loader accepted {}", item.url()),
                        ));
                    }
                }
            });
        }
    }

    pub(crate) fn downgrade(&self) -> WeakNativeItem {
        WeakNativeItem(Arc::downgrade(&self.inner))
    }
}

impl PartialEq for NativeItem {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for NativeItem {}

impl std::hash::Hash for NativeItem {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.handle.hash(state);
    }
}

impl std::fmt::Debug for NativeItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeItem")
            .field("handle", &self.inner.handle)
            .field("url", &self.inner.url.as_str())
            .field("source", &self.inner.source)
            .field("id", &self.id())
            .finish()
    }
}

/// Non-owning reference handed to loader and key requests
#[derive(Clone)]
pub(crate) struct WeakNativeItem(Weak<NativeItemInner>);

impl WeakNativeItem {
    pub(crate) fn upgrade(&self) -> Option<NativeItem> {
        self.0.upgrade().map(|inner| NativeItem { inner })
    }
}

/// Engine contract consumed by the queue
pub trait SystemPlayer: Send + Sync + 'static {
    /// Currently playing item
    fn current_item(&self) -> watch::Receiver<Option<NativeItem>>;

    /// Items enqueued in the engine, current item first
    fn items(&self) -> Vec<NativeItem>;

    /// Replace the engine queue
    fn replace_items(&self, items: Vec<NativeItem>);

    fn rate(&self) -> watch::Receiver<f32>;

    fn external_playback_active(&self) -> watch::Receiver<bool>;

    fn muted(&self) -> watch::Receiver<bool>;

    fn buffering(&self) -> watch::Receiver<bool>;

    fn seekable_time_range(&self) -> TimeRange;

    /// Current time, `None` while invalid
    fn current_time(&self) -> Option<Duration>;

    /// Item duration, `None` when indefinite
    fn duration(&self) -> Option<Duration>;
}

#[derive(Debug, Clone, Copy, Default)]
struct Timing {
    seekable: TimeRange,
    current_time: Option<Duration>,
    duration: Option<Duration>,
}

/// Deterministic in-memory engine
pub struct InMemoryPlayer {
    items: Mutex<VecDeque<NativeItem>>,
    current: watch::Sender<Option<NativeItem>>,
    rate: watch::Sender<f32>,
    external_playback_active: watch::Sender<bool>,
    muted: watch::Sender<bool>,
    buffering: watch::Sender<bool>,
    timing: Mutex<Timing>,
}

impl InMemoryPlayer {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            current: watch::channel(None).0,
            rate: watch::channel(0.0).0,
            external_playback_active: watch::channel(false).0,
            muted: watch::channel(false).0,
            buffering: watch::channel(false).0,
            timing: Mutex::new(Timing::default()),
        }
    }

    /// Current item, without subscribing
    pub fn current(&self) -> Option<NativeItem> {
        self.current.borrow().clone()
    }

    /// Drop the current item and move to the next one
    pub fn advance_to_next_item(&self) {
        let next = {
            let mut items = self.items.lock();
            items.pop_front();
            items.front().cloned()
        };
        self.make_current(next);
    }

    /// Fail the current item, it stays current
    pub fn fail_current_item(&self, error: ItemError) {
        match self.current() {
            Some(item) => item.fail(error),
            None => warn!("No current item to fail"),
        }
    }

    pub fn set_rate(&self, rate: f32) {
        self.rate.send_replace(rate);
    }

    pub fn set_external_playback_active(&self, active: bool) {
        self.external_playback_active.send_replace(active);
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.send_replace(muted);
    }

    pub fn set_buffering(&self, buffering: bool) {
        self.buffering.send_replace(buffering);
    }

    /// Update timing, reported on the next synchronous query
    pub fn set_timing(
        &self,
        seekable: TimeRange,
        current_time: Option<Duration>,
        duration: Option<Duration>,
    ) {
        *self.timing.lock() = Timing {
            seekable,
            current_time,
            duration,
        };
    }

    /// Perform the pending seek of the current item, moving the current time
    /// to its target. Returns the performed position.
    pub fn complete_seek(&self) -> Option<Position> {
        let position = self.current()?.take_pending_seek()?;
        self.timing.lock().current_time = Some(position.time);
        debug!(time = ?position.time, "Seek completed");
        Some(position)
    }

    fn make_current(&self, item: Option<NativeItem>) {
        if *self.current.borrow() == item {
            return;
        }
        if let Some(item) = &item {
            item.start_loading();
            if !item.is_resource_loaded() && item.error().is_none() {
                item.mark_ready();
            }
            // Playback starts at the requested position
            if let Some(position) = item.take_pending_seek() {
                self.timing.lock().current_time = Some(position.time);
            }
        }
        self.current.send_replace(item);
    }
}

impl Default for InMemoryPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemPlayer for InMemoryPlayer {
    fn current_item(&self) -> watch::Receiver<Option<NativeItem>> {
        self.current.subscribe()
    }

    fn items(&self) -> Vec<NativeItem> {
        self.items.lock().iter().cloned().collect()
    }

    fn replace_items(&self, items: Vec<NativeItem>) {
        let first = items.first().cloned();
        *self.items.lock() = items.into();
        self.make_current(first);
    }

    fn rate(&self) -> watch::Receiver<f32> {
        self.rate.subscribe()
    }

    fn external_playback_active(&self) -> watch::Receiver<bool> {
        self.external_playback_active.subscribe()
    }

    fn muted(&self) -> watch::Receiver<bool> {
        self.muted.subscribe()
    }

    fn buffering(&self) -> watch::Receiver<bool> {
        self.buffering.subscribe()
    }

    fn seekable_time_range(&self) -> TimeRange {
        self.timing.lock().seekable
    }

    fn current_time(&self) -> Option<Duration> {
        self.timing.lock().current_time
    }

    fn duration(&self) -> Option<Duration> {
        self.timing.lock().duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_item(path: &str) -> NativeItem {
        let url = Url::parse(&format!("https://cdn.example.com/{}", path)).unwrap();
        NativeItem::new(url, ItemSource::Direct, ItemAttributes::new())
    }

    #[test]
    fn test_identity_equality() {
        let a = direct_item("a.m3u8");
        let b = direct_item("a.m3u8");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.handle(), b.handle());
    }

    #[test]
    fn test_failed_status_is_sticky() {
        let item = direct_item("a.m3u8");
        item.fail(ItemError::playback("decode error"));
        item.mark_ready();
        assert_eq!(item.status(), ItemStatus::Failed);
        assert_eq!(item.error(), Some(ItemError::playback("decode error")));
    }

    #[test]
    fn test_pending_seek() {
        let item = direct_item("a.m3u8");
        let position = Position::near(Duration::from_secs(30));
        item.seek(position);
        assert_eq!(item.pending_seek(), Some(position));
        assert_eq!(item.take_pending_seek(), Some(position));
        assert_eq!(item.pending_seek(), None);
    }

    #[test]
    fn test_seek_completion() {
        let player = InMemoryPlayer::new();
        let a = direct_item("a.m3u8");
        a.seek(Position::at(Duration::from_secs(12)));
        player.replace_items(vec![a.clone()]);
        assert_eq!(a.pending_seek(), None);
        assert_eq!(player.current_time(), Some(Duration::from_secs(12)));

        let mut seeks = a.subscribe_seek();
        a.seek(Position::at(Duration::from_secs(40)));
        assert!(seeks.has_changed().unwrap());
        seeks.borrow_and_update();
        assert_eq!(player.current_time(), Some(Duration::from_secs(12)));

        assert_eq!(player.complete_seek().map(|p| p.time), Some(Duration::from_secs(40)));
        assert!(seeks.has_changed().unwrap());
        assert_eq!(a.pending_seek(), None);
        assert_eq!(player.current_time(), Some(Duration::from_secs(40)));
        assert_eq!(player.complete_seek(), None);
    }

    #[test]
    fn test_in_memory_player_queue() {
        let player = InMemoryPlayer::new();
        let a = direct_item("a.m3u8");
        let b = direct_item("b.m3u8");

        player.replace_items(vec![a.clone(), b.clone()]);
        assert_eq!(player.current(), Some(a.clone()));
        assert_eq!(a.status(), ItemStatus::ReadyToPlay);

        player.advance_to_next_item();
        assert_eq!(player.current(), Some(b));
        assert_eq!(player.items().len(), 1);

        player.advance_to_next_item();
        assert_eq!(player.current(), None);
    }

    #[test]
    fn test_replace_keeps_same_current() {
        let player = InMemoryPlayer::new();
        let a = direct_item("a.m3u8");
        player.replace_items(vec![a.clone()]);

        let mut current = player.current_item();
        current.borrow_and_update();
        player.replace_items(vec![a, direct_item("b.m3u8")]);
        assert!(!current.has_changed().unwrap());
    }
}
