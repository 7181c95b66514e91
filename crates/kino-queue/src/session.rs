//! Player Session - Queue orchestrator
//!
//! A [`PlayerSession`] owns a single event loop which serializes every
//! producer onto one timeline:
//!
//! ```text
//!  queue edits ──┐
//!  item assets ──┤  (AccumulateLatestMany)
//!  engine item ──┼──► EventLoop ──► AssetUpdate / ItemState / queues
//!  item errors ──┤        │    ──► PlayerProperties / NowPlayingInfo
//!  properties  ──┤        ├──► trackers (enable / update / disable)
//!  commands    ──┘        └──► engine window (replace_items)
//! ```
//!
//! Outputs are latest-value `watch` channels: slow observers see the most
//! recent snapshot.

use crate::{
    accumulate::AccumulateLatestMany,
    asset::AssetRef,
    config::PlayerConfig,
    engine::{ItemHandle, NativeItem, SystemPlayer},
    error::ItemError,
    now_playing::{playback_info, MetadataDeduplicator, NowPlayingInfo},
    pipeline::{AssetUpdate, ItemState, ItemStateReducer},
    player_item::PlayerItem,
    queue::{Current, ItemQueue},
    remote::{
        CommandAvailability, NowPlayingInfoCenter, NowPlayingSynchronizer, RemoteAction,
        RemoteCommandCenter,
    },
    resource::ResourceContext,
    transition::ItemTransition,
    types::*,
    Error, Result,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// Queue of player items
pub type PlayerItemQueue = ItemQueue<PlayerItem>;

/// Queue of the latest assets of the player items
pub type AssetQueue = ItemQueue<AssetRef>;

#[derive(Debug, Clone, Default)]
struct ItemList {
    items: Vec<PlayerItem>,
    /// Bumped when the whole list is replaced
    resets: u64,
}

#[derive(Debug)]
enum Command {
    AdvanceToNext(oneshot::Sender<bool>),
    ReturnToPrevious(oneshot::Sender<bool>),
    Seek(Position),
    SetActive(bool),
    SetControlsEnabled(bool),
    Shutdown(oneshot::Sender<()>),
}

struct Outputs {
    asset_update: watch::Sender<AssetUpdate>,
    item_state: watch::Sender<ItemState>,
    player_queue: watch::Sender<PlayerItemQueue>,
    asset_queue: watch::Sender<AssetQueue>,
    properties: watch::Sender<PlayerProperties>,
    now_playing: watch::Sender<NowPlayingInfo>,
}

impl Outputs {
    fn new() -> Self {
        Self {
            asset_update: watch::channel(AssetUpdate::empty()).0,
            item_state: watch::channel(ItemState::empty()).0,
            player_queue: watch::channel(ItemQueue::initial()).0,
            asset_queue: watch::channel(ItemQueue::initial()).0,
            properties: watch::channel(PlayerProperties::default()).0,
            now_playing: watch::channel(NowPlayingInfo::new()).0,
        }
    }
}

/// Playback queue bound to a system player
pub struct PlayerSession {
    /// Unique session ID
    id: SessionId,
    /// Session configuration
    config: PlayerConfig,
    /// Queue contents, observed by the event loop
    items: watch::Sender<ItemList>,
    /// Event loop commands
    commands: mpsc::Sender<Command>,
    /// Actions requested through remote commands, until taken by the host
    remote_actions: Mutex<Option<mpsc::UnboundedReceiver<RemoteAction>>>,
    outputs: Arc<Outputs>,
    task: Option<JoinHandle<()>>,
}

impl PlayerSession {
    /// Create a session driving `player`. Must be called within a Tokio runtime.
    pub fn new(
        player: Arc<dyn SystemPlayer>,
        config: PlayerConfig,
        commands: Arc<dyn RemoteCommandCenter>,
        info_center: Arc<dyn NowPlayingInfoCenter>,
    ) -> Result<Self> {
        config.validate()?;
        let refresh_period = config.time_refresh_period()?;

        let id = SessionId::new();
        let (items_tx, items_rx) = watch::channel(ItemList::default());
        let (command_tx, command_rx) = mpsc::channel(config.channel_capacity);
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let outputs = Arc::new(Outputs::new());
        let synchronizer = NowPlayingSynchronizer::new(&config, commands, info_center, action_tx);

        let event_loop = EventLoop::new(
            id,
            player,
            config.clone(),
            refresh_period,
            outputs.clone(),
            synchronizer,
            items_rx,
            command_rx,
        );
        let task = tokio::spawn(event_loop.run());

        info!(session_id = %id, "Created player session");

        Ok(Self {
            id,
            config,
            items: items_tx,
            commands: command_tx,
            remote_actions: Mutex::new(Some(action_rx)),
            outputs,
            task: Some(task),
        })
    }

    /// Get session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Items currently in the queue
    pub fn items(&self) -> Vec<PlayerItem> {
        self.items.borrow().items.clone()
    }

    /// Replace the queue contents and restart playback from the first item
    #[instrument(skip(self, items), fields(session_id = %self.id, count = items.len()))]
    pub fn set_items(&self, items: Vec<PlayerItem>) -> Result<()> {
        for (index, item) in items.iter().enumerate() {
            if items[..index].contains(item) {
                return Err(Error::DuplicateItem(item.id().to_string()));
            }
        }
        self.ensure_open()?;
        self.items.send_modify(|list| {
            list.items = items;
            list.resets += 1;
        });
        Ok(())
    }

    #[instrument(skip(self, item), fields(session_id = %self.id, item_id = %item.id()))]
    pub fn append(&self, item: PlayerItem) -> Result<()> {
        self.edit(|items| {
            ensure_absent(items, &item)?;
            items.push(item);
            Ok(())
        })
    }

    #[instrument(skip(self, item), fields(session_id = %self.id, item_id = %item.id()))]
    pub fn prepend(&self, item: PlayerItem) -> Result<()> {
        self.edit(|items| {
            ensure_absent(items, &item)?;
            items.insert(0, item);
            Ok(())
        })
    }

    /// Insert `item` before the item identified by `before`
    #[instrument(skip(self, item), fields(session_id = %self.id, item_id = %item.id()))]
    pub fn insert_before(&self, item: PlayerItem, before: ItemId) -> Result<()> {
        self.edit(|items| {
            ensure_absent(items, &item)?;
            let index = index_of(items, before)?;
            items.insert(index, item);
            Ok(())
        })
    }

    /// Insert `item` after the item identified by `after`
    #[instrument(skip(self, item), fields(session_id = %self.id, item_id = %item.id()))]
    pub fn insert_after(&self, item: PlayerItem, after: ItemId) -> Result<()> {
        self.edit(|items| {
            ensure_absent(items, &item)?;
            let index = index_of(items, after)?;
            items.insert(index + 1, item);
            Ok(())
        })
    }

    /// Move an item before another one
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn move_before(&self, id: ItemId, before: ItemId) -> Result<()> {
        self.edit(|items| {
            index_of(items, before)?;
            if id == before {
                return Ok(());
            }
            let item = items.remove(index_of(items, id)?);
            let index = index_of(items, before).unwrap_or(items.len());
            items.insert(index, item);
            Ok(())
        })
    }

    /// Move an item after another one
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn move_after(&self, id: ItemId, after: ItemId) -> Result<()> {
        self.edit(|items| {
            index_of(items, after)?;
            if id == after {
                return Ok(());
            }
            let item = items.remove(index_of(items, id)?);
            let index = index_of(items, after).map_or(items.len(), |index| index + 1);
            items.insert(index, item);
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn remove(&self, id: ItemId) -> Result<()> {
        self.edit(|items| {
            let index = index_of(items, id)?;
            items.remove(index);
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn remove_all(&self) -> Result<()> {
        self.edit(|items| {
            items.clear();
            Ok(())
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.items.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    /// Apply an edit, published only when it succeeds
    fn edit(&self, edit: impl FnOnce(&mut Vec<PlayerItem>) -> Result<()>) -> Result<()> {
        self.ensure_open()?;
        let mut result = Ok(());
        self.items.send_if_modified(|list| {
            result = edit(&mut list.items);
            result.is_ok()
        });
        result
    }

    /// Move to the next item. Returns false when there is none.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn advance_to_next(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::AdvanceToNext(tx)).await?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Move to the previous item, or to the last one once finished.
    /// Returns false when there is none.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn return_to_previous(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ReturnToPrevious(tx)).await?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Seek the current item
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn seek(&self, position: Position) -> Result<()> {
        self.send(Command::Seek(position)).await
    }

    /// An inactive session publishes empty now-playing info
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn set_active(&self, active: bool) -> Result<()> {
        self.send(Command::SetActive(active)).await
    }

    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn set_controls_enabled(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetControlsEnabled(enabled)).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Take the receiver of remote command actions. Only the first call
    /// returns it.
    pub fn take_remote_actions(&self) -> Option<mpsc::UnboundedReceiver<RemoteAction>> {
        self.remote_actions.lock().take()
    }

    pub fn asset_update(&self) -> AssetUpdate {
        self.outputs.asset_update.borrow().clone()
    }

    pub fn item_state(&self) -> ItemState {
        self.outputs.item_state.borrow().clone()
    }

    pub fn queue(&self) -> PlayerItemQueue {
        self.outputs.player_queue.borrow().clone()
    }

    pub fn properties(&self) -> PlayerProperties {
        *self.outputs.properties.borrow()
    }

    pub fn now_playing_info(&self) -> NowPlayingInfo {
        self.outputs.now_playing.borrow().clone()
    }

    pub fn subscribe_asset_updates(&self) -> watch::Receiver<AssetUpdate> {
        self.outputs.asset_update.subscribe()
    }

    pub fn subscribe_item_state(&self) -> watch::Receiver<ItemState> {
        self.outputs.item_state.subscribe()
    }

    pub fn subscribe_queue(&self) -> watch::Receiver<PlayerItemQueue> {
        self.outputs.player_queue.subscribe()
    }

    pub fn subscribe_asset_queue(&self) -> watch::Receiver<AssetQueue> {
        self.outputs.asset_queue.subscribe()
    }

    pub fn subscribe_properties(&self) -> watch::Receiver<PlayerProperties> {
        self.outputs.properties.subscribe()
    }

    pub fn subscribe_now_playing(&self) -> watch::Receiver<NowPlayingInfo> {
        self.outputs.now_playing.subscribe()
    }

    /// Stop the event loop. Trackers are disabled and remote commands removed.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn shutdown(mut self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await.map_err(|_| Error::SessionClosed)?;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Session event loop ended abnormally");
            }
        }
        info!("Player session shut down");
        Ok(())
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn index_of(items: &[PlayerItem], id: ItemId) -> Result<usize> {
    items
        .iter()
        .position(|item| item.id() == id)
        .ok_or_else(|| Error::ItemNotFound(id.to_string()))
}

fn ensure_absent(items: &[PlayerItem], item: &PlayerItem) -> Result<()> {
    if items.contains(item) {
        return Err(Error::DuplicateItem(item.id().to_string()));
    }
    Ok(())
}

/// What triggered a publication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    Engine,
    Assets,
    Edit,
}

/// Waits for the next change of a current item observable, forever if none
async fn next_change<T>(rx: &mut Option<watch::Receiver<T>>) {
    if let Some(receiver) = rx.as_mut() {
        if receiver.changed().await.is_ok() {
            return;
        }
    }
    *rx = None;
    std::future::pending::<()>().await
}

struct EventLoop {
    id: SessionId,
    player: Arc<dyn SystemPlayer>,
    config: PlayerConfig,
    refresh_period: Duration,
    context: ResourceContext,
    outputs: Arc<Outputs>,
    synchronizer: NowPlayingSynchronizer,

    items_rx: watch::Receiver<ItemList>,
    command_rx: mpsc::Receiver<Command>,
    current_rx: watch::Receiver<Option<NativeItem>>,
    current_error: Option<watch::Receiver<Option<ItemError>>>,
    current_seek: Option<watch::Receiver<Option<Position>>>,
    rate_rx: watch::Receiver<f32>,
    external_rx: watch::Receiver<bool>,
    muted_rx: watch::Receiver<bool>,
    buffering_rx: watch::Receiver<bool>,

    accumulator: AccumulateLatestMany<ItemId, AssetRef>,
    reducer: ItemStateReducer,
    deduplicator: MetadataDeduplicator,

    items: Vec<PlayerItem>,
    resets: u64,
    assets: Vec<AssetRef>,
    current: Option<NativeItem>,
    item_state: ItemState,
    transition: ItemTransition,
    player_queue: PlayerItemQueue,
    asset_queue: AssetQueue,
    /// Assets attached to the engine, with their native items
    attached: Vec<(AssetRef, NativeItem)>,
    /// Asset whose trackers are enabled
    enabled_asset: Option<AssetRef>,
    properties: PlayerProperties,
    metadata_half: NowPlayingInfo,
    published_info: NowPlayingInfo,
    availability: CommandAvailability,
    active: bool,
}

impl EventLoop {
    fn new(
        id: SessionId,
        player: Arc<dyn SystemPlayer>,
        config: PlayerConfig,
        refresh_period: Duration,
        outputs: Arc<Outputs>,
        synchronizer: NowPlayingSynchronizer,
        items_rx: watch::Receiver<ItemList>,
        command_rx: mpsc::Receiver<Command>,
    ) -> Self {
        let context = ResourceContext::new(&config);
        Self {
            id,
            current_rx: player.current_item(),
            current_error: None,
            current_seek: None,
            rate_rx: player.rate(),
            external_rx: player.external_playback_active(),
            muted_rx: player.muted(),
            buffering_rx: player.buffering(),
            player,
            config,
            refresh_period,
            context,
            outputs,
            synchronizer,
            items_rx,
            command_rx,
            accumulator: AccumulateLatestMany::new(),
            reducer: ItemStateReducer::new(),
            deduplicator: MetadataDeduplicator::default(),
            items: Vec::new(),
            resets: 0,
            assets: Vec::new(),
            current: None,
            item_state: ItemState::empty(),
            transition: ItemTransition::default(),
            player_queue: ItemQueue::initial(),
            asset_queue: ItemQueue::initial(),
            attached: Vec::new(),
            enabled_asset: None,
            properties: PlayerProperties::default(),
            metadata_half: NowPlayingInfo::new(),
            published_info: NowPlayingInfo::new(),
            availability: CommandAvailability::default(),
            active: true,
        }
    }

    async fn run(mut self) {
        debug!(session_id = %self.id, "Session event loop started");

        let current = self.current_rx.borrow_and_update().clone();
        self.observe_current_item(current);
        let list = self.items_rx.borrow_and_update().clone();
        self.apply_items(list);

        let mut refresh = tokio::time::interval(self.refresh_period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Ok(()) = self.current_rx.changed() => {
                    let current = self.current_rx.borrow_and_update().clone();
                    if current != self.current {
                        self.observe_current_item(current);
                        self.publish(Cause::Engine);
                    }
                }
                () = next_change(&mut self.current_error) => {
                    self.observe_item_state();
                    self.publish(Cause::Engine);
                }
                Ok(()) = self.items_rx.changed() => {
                    let list = self.items_rx.borrow_and_update().clone();
                    self.apply_items(list);
                }
                Some(assets) = self.accumulator.next() => {
                    self.assets = assets;
                    self.publish(Cause::Assets);
                }
                () = next_change(&mut self.current_seek) => self.refresh(),
                Ok(()) = self.rate_rx.changed() => self.refresh(),
                Ok(()) = self.external_rx.changed() => self.refresh(),
                Ok(()) = self.muted_rx.changed() => self.refresh(),
                Ok(()) = self.buffering_rx.changed() => self.refresh(),
                _ = refresh.tick() => self.refresh(),
                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
            }
        }

        debug!(session_id = %self.id, "Session event loop stopped");
    }

    fn observe_current_item(&mut self, item: Option<NativeItem>) {
        debug!(
            session_id = %self.id,
            item = ?item.as_ref().map(NativeItem::handle),
            "Engine current item changed"
        );
        // Only later changes wake the loop, the live error is read right away
        self.current_error = item.as_ref().map(NativeItem::subscribe_error);
        self.current_seek = item.as_ref().map(NativeItem::subscribe_seek);
        self.current = item;
        self.observe_item_state();
    }

    fn observe_item_state(&mut self) {
        let (state, transition) = self
            .reducer
            .reduce(ItemState::observed(self.current.clone()));
        if let Some(error) = &state.error {
            warn!(session_id = %self.id, error = %error, "Current item failed");
        }
        self.item_state = state;
        self.transition = transition;
    }

    fn apply_items(&mut self, list: ItemList) {
        if list.resets != self.resets {
            self.resets = list.resets;
            self.transition = ItemTransition::Advance(None);
            self.attached.clear();
        }
        let sources = list
            .items
            .iter()
            .map(|item| (item.id(), item.subscribe()))
            .collect();
        self.assets = self.accumulator.set_sources(sources);
        self.items = list.items;
        self.publish(Cause::Edit);
    }

    fn publish(&mut self, cause: Cause) {
        let previous = std::mem::replace(
            &mut self.player_queue,
            ItemQueue::new(self.items.clone(), self.transition.clone()),
        );
        // An empty queue forces its transition, keep it for later edits
        self.transition = self.player_queue.transition().clone();
        self.asset_queue = ItemQueue::new(self.assets.clone(), self.transition.clone());

        self.outputs
            .asset_update
            .send_replace(AssetUpdate::new(self.assets.clone(), self.current.clone()));
        self.outputs.item_state.send_replace(self.item_state.clone());
        self.outputs.player_queue.send_replace(self.player_queue.clone());
        self.outputs.asset_queue.send_replace(self.asset_queue.clone());

        self.sync_trackers();
        self.sync_engine(cause, &previous);
        self.refresh();
    }

    fn sync_trackers(&mut self) {
        let current = match self.asset_queue.current_element() {
            Current::Valid(asset) => asset.cloned(),
            Current::Invalid => return,
        };
        match (self.enabled_asset.take(), current) {
            (Some(enabled), Some(asset)) if enabled.id() == asset.id() => {
                if !Arc::ptr_eq(&enabled, &asset) {
                    if enabled.tracker_keys() == asset.tracker_keys() {
                        asset.update_metadata();
                    } else {
                        enabled.disable();
                        asset.enable(&self.player);
                        asset.update_metadata();
                    }
                }
                self.enabled_asset = Some(asset);
            }
            (enabled, asset) => {
                if let Some(enabled) = enabled {
                    enabled.disable();
                }
                if let Some(asset) = &asset {
                    asset.enable(&self.player);
                    asset.update_metadata();
                }
                self.enabled_asset = asset;
            }
        }
    }

    fn sync_engine(&mut self, cause: Cause, previous: &PlayerItemQueue) {
        match self.player_queue.current_index() {
            // Pinned on a failed item until the next edit or navigation
            Current::Valid(Some(_))
                if cause == Cause::Engine
                    && matches!(self.player_queue.transition(), ItemTransition::Stop(_)) => {}
            Current::Valid(Some(index)) => self.attach(index),
            Current::Valid(None) if self.player_queue.is_empty() => self.attach(0),
            // Finished
            Current::Valid(None) => {}
            Current::Invalid if cause == Cause::Edit => {
                match self.player_queue.recovery_index(previous) {
                    Some(index) => self.attach(index),
                    // Nothing followed the removed item
                    None => self.attach(self.assets.len()),
                }
            }
            Current::Invalid => {
                debug!(session_id = %self.id, ?cause, "Queue and engine out of sync");
            }
        }
    }

    /// Attach the window of assets starting at `index` to the engine
    fn attach(&mut self, index: usize) {
        let end = index
            .saturating_add(self.config.engine_item_window)
            .min(self.assets.len());
        let window = self.assets.get(index..end).unwrap_or_default();

        let attached: Vec<(AssetRef, NativeItem)> = window
            .iter()
            .map(|asset| {
                let reused = self
                    .attached
                    .iter()
                    .find(|(candidate, _)| {
                        candidate.id() == asset.id() && candidate.resource() == asset.resource()
                    })
                    .map(|(_, item)| item.clone());
                let item = reused.unwrap_or_else(|| asset.materialize(&self.context));
                (asset.clone(), item)
            })
            .collect();

        let items: Vec<NativeItem> = attached.iter().map(|(_, item)| item.clone()).collect();
        self.attached = attached;

        let engine: Vec<ItemHandle> = self.player.items().iter().map(NativeItem::handle).collect();
        let desired: Vec<ItemHandle> = items.iter().map(NativeItem::handle).collect();
        if engine != desired {
            debug!(session_id = %self.id, index, count = items.len(), "Replacing engine items");
            self.player.replace_items(items);
        }
    }

    fn refresh(&mut self) {
        self.refresh_properties();
        self.refresh_now_playing();
    }

    fn refresh_properties(&mut self) {
        let seekable_time_range = self.player.seekable_time_range();
        let stream_type = match &self.current {
            Some(_) => StreamType::from_timing(seekable_time_range, self.player.duration()),
            None => StreamType::Unknown,
        };
        let properties = PlayerProperties {
            playback: PlaybackProperties {
                rate: *self.rate_rx.borrow(),
                is_external_playback_active: *self.external_rx.borrow(),
                is_muted: *self.muted_rx.borrow(),
            },
            stream_type,
            is_buffering: *self.buffering_rx.borrow(),
            seek_time: self
                .current
                .as_ref()
                .and_then(NativeItem::pending_seek)
                .map(|position| position.time),
            seekable_time_range,
        };
        if properties == self.properties {
            return;
        }
        self.properties = properties;
        self.outputs.properties.send_replace(properties);
        if let Some(asset) = &self.enabled_asset {
            asset.update_properties(&properties);
        }
    }

    fn refresh_now_playing(&mut self) {
        let info = if self.active {
            self.merged_now_playing_info()
        } else {
            NowPlayingInfo::new()
        };
        if info != self.published_info {
            self.published_info = info.clone();
            self.synchronizer.update(&info);
            self.outputs.now_playing.send_replace(info);
        }
        self.refresh_availability();
    }

    fn merged_now_playing_info(&mut self) -> NowPlayingInfo {
        let half = match self.asset_queue.current_element() {
            Current::Valid(Some(asset)) if !asset.resource().is_loading() => {
                Some(asset.now_playing_info(self.item_state.error.as_ref()))
            }
            Current::Valid(None) => Some(NowPlayingInfo::new()),
            // Keep the previous metadata while loading or out of sync
            _ => None,
        };
        if let Some(half) = half.and_then(|half| self.deduplicator.accept(half)) {
            self.metadata_half = half;
        }
        self.metadata_half
            .merging(&playback_info(&self.properties, self.player.current_time()))
    }

    fn refresh_availability(&mut self) {
        let availability = match self.player_queue.current_index() {
            Current::Valid(Some(index)) => CommandAvailability {
                previous: index > 0,
                next: index + 1 < self.player_queue.len(),
                skip: self.properties.stream_type != StreamType::Unknown,
            },
            Current::Valid(None) => CommandAvailability {
                previous: self.player_queue.transition().is_finished() && !self.player_queue.is_empty(),
                ..Default::default()
            },
            Current::Invalid => return,
        };
        if availability != self.availability {
            self.availability = availability;
            self.synchronizer.update_availability(availability);
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::AdvanceToNext(reply) => {
                let moved = match self.player_queue.current_index() {
                    Current::Valid(Some(index)) if index + 1 < self.assets.len() => {
                        self.attach(index + 1);
                        true
                    }
                    _ => false,
                };
                let _ = reply.send(moved);
            }
            Command::ReturnToPrevious(reply) => {
                let target = match self.player_queue.current_index() {
                    Current::Valid(Some(index)) if index > 0 => Some(index - 1),
                    Current::Valid(None) if self.player_queue.transition().is_finished() => {
                        self.assets.len().checked_sub(1)
                    }
                    _ => None,
                };
                if let Some(index) = target {
                    self.attach(index);
                }
                let _ = reply.send(target.is_some());
            }
            Command::Seek(position) => {
                match &self.current {
                    Some(item) => item.seek(position),
                    None => debug!(session_id = %self.id, "No current item to seek"),
                }
                self.refresh();
            }
            Command::SetActive(active) => {
                info!(session_id = %self.id, active, "Session activity changed");
                self.active = active;
                self.refresh_now_playing();
            }
            Command::SetControlsEnabled(enabled) => {
                self.synchronizer.set_controls_enabled(enabled);
                if enabled && !self.published_info.is_empty() {
                    self.synchronizer.update(&self.published_info);
                    self.synchronizer.update_availability(self.availability);
                }
            }
            Command::Shutdown(_) => {}
        }
    }

    fn teardown(&mut self) {
        if let Some(asset) = self.enabled_asset.take() {
            asset.disable();
        }
        self.synchronizer.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;
    use crate::engine::InMemoryPlayer;
    use crate::now_playing::{NowPlayingKey, NowPlayingMetadata, NowPlayingValue};
    use crate::remote::{InMemoryControlCenter, RemoteCommand};
    use crate::tracker::{TrackerAdapter, TrackerEvent, TrackerEventLog};
    use serde_json::json;
    use std::future::Future;
    use url::Url;

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://cdn.example.com/{}", path)).unwrap()
    }

    fn session() -> (PlayerSession, Arc<InMemoryPlayer>, Arc<InMemoryControlCenter>) {
        let player = Arc::new(InMemoryPlayer::new());
        let center = InMemoryControlCenter::new();
        let session =
            PlayerSession::new(player.clone(), PlayerConfig::default(), center.clone(), center.clone())
                .unwrap();
        (session, player, center)
    }

    async fn within<F: Future>(future: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(2), future)
            .await
            .expect("timed out")
    }

    async fn wait_for_index(session: &PlayerSession, expected: Current<usize>) {
        let mut rx = session.subscribe_queue();
        within(rx.wait_for(|queue| queue.current_index() == expected))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_attaches_window() {
        let (session, player, _) = session();
        let items: Vec<PlayerItem> = ["a", "b", "c"]
            .iter()
            .map(|name| PlayerItem::simple(url(&format!("{}.m3u8", name)), ()))
            .collect();
        for item in &items {
            session.append(item.clone()).unwrap();
        }

        wait_for_index(&session, Current::Valid(Some(0))).await;
        let mut rx = session.subscribe_asset_updates();
        within(rx.wait_for(|update| update.current_item.is_some() && update.assets.len() == 3))
            .await
            .unwrap();

        let engine_ids: Vec<Option<ItemId>> = player.items().iter().map(NativeItem::id).collect();
        assert_eq!(engine_ids, vec![Some(items[0].id()), Some(items[1].id())]);
    }

    #[tokio::test]
    async fn test_duplicate_and_missing_items() {
        let (session, _, _) = session();
        let item = PlayerItem::simple(url("a.m3u8"), ());
        session.append(item.clone()).unwrap();

        let err = session.append(item.clone()).unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_ITEM");

        let err = session.remove(ItemId::new()).unwrap_err();
        assert_eq!(err.error_code(), "ITEM_NOT_FOUND");

        let err = session
            .set_items(vec![item.clone(), item.clone()])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateItem(_)));
        assert_eq!(session.items().len(), 1);
    }

    #[tokio::test]
    async fn test_moves_and_inserts() {
        let (session, _, _) = session();
        let a = PlayerItem::simple(url("a.m3u8"), ());
        let b = PlayerItem::simple(url("b.m3u8"), ());
        let c = PlayerItem::simple(url("c.m3u8"), ());
        session.append(a.clone()).unwrap();
        session.insert_after(c.clone(), a.id()).unwrap();
        session.insert_before(b.clone(), c.id()).unwrap();
        assert_eq!(session.items(), vec![a.clone(), b.clone(), c.clone()]);

        session.move_before(c.id(), a.id()).unwrap();
        assert_eq!(session.items(), vec![c.clone(), a.clone(), b.clone()]);

        session.move_after(c.id(), b.id()).unwrap();
        assert_eq!(session.items(), vec![a.clone(), b.clone(), c.clone()]);

        session.remove_all().unwrap();
        assert!(session.items().is_empty());
    }

    #[tokio::test]
    async fn test_navigation() {
        let (session, player, _) = session();
        let a = PlayerItem::simple(url("a.m3u8"), ());
        let b = PlayerItem::simple(url("b.m3u8"), ());
        session.set_items(vec![a.clone(), b.clone()]).unwrap();
        wait_for_index(&session, Current::Valid(Some(0))).await;

        // Wait until the engine plays the first item
        let mut rx = session.subscribe_item_state();
        within(rx.wait_for(|state| state.item.is_some())).await.unwrap();

        assert!(!session.return_to_previous().await.unwrap());
        assert!(session.advance_to_next().await.unwrap());
        within(rx.wait_for(|state| {
            state.item.as_ref().and_then(NativeItem::id) == Some(b.id())
        }))
        .await
        .unwrap();
        assert_eq!(player.current().and_then(|item| item.id()), Some(b.id()));
        assert!(!session.advance_to_next().await.unwrap());
    }

    #[tokio::test]
    async fn test_finish_then_return_to_last_item() {
        let (session, player, _) = session();
        let a = PlayerItem::simple(url("a.m3u8"), ());
        session.set_items(vec![a.clone()]).unwrap();
        let mut rx = session.subscribe_item_state();
        within(rx.wait_for(|state| state.item.is_some())).await.unwrap();

        player.advance_to_next_item();
        let mut queue = session.subscribe_queue();
        within(queue.wait_for(|queue| queue.transition().is_finished()))
            .await
            .unwrap();
        assert_eq!(session.queue().current_index(), Current::Valid(None));

        assert!(session.return_to_previous().await.unwrap());
        within(rx.wait_for(|state| state.item.is_some())).await.unwrap();
        assert_eq!(player.current().and_then(|item| item.id()), Some(a.id()));
    }

    #[tokio::test]
    async fn test_removing_current_item_recovers_to_next() {
        let (session, player, _) = session();
        let a = PlayerItem::simple(url("a.m3u8"), ());
        let b = PlayerItem::simple(url("b.m3u8"), ());
        let c = PlayerItem::simple(url("c.m3u8"), ());
        session
            .set_items(vec![a.clone(), b.clone(), c.clone()])
            .unwrap();
        let mut rx = session.subscribe_item_state();
        within(rx.wait_for(|state| state.item.is_some())).await.unwrap();

        session.remove(a.id()).unwrap();
        within(rx.wait_for(|state| {
            state.item.as_ref().and_then(NativeItem::id) == Some(b.id())
        }))
        .await
        .unwrap();
        assert_eq!(player.items().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_item_stops_queue() {
        let (session, player, _) = session();
        let a = PlayerItem::failed(ItemError::new("network", 503, "unavailable"));
        let b = PlayerItem::simple(url("b.m3u8"), ());
        session.set_items(vec![a.clone(), b.clone()]).unwrap();

        let mut rx = session.subscribe_item_state();
        let state = within(rx.wait_for(|state| state.error.is_some()))
            .await
            .unwrap()
            .clone();
        assert_eq!(state.error.unwrap().code, 503);

        let queue = session.queue();
        assert!(matches!(queue.transition(), ItemTransition::Stop(_)));
        assert_eq!(queue.current_index(), Current::Valid(Some(0)));
        assert_eq!(player.current().and_then(|item| item.id()), Some(a.id()));
    }

    #[tokio::test]
    async fn test_trackers_follow_current_asset() {
        let (session, player, _) = session();
        let log = TrackerEventLog::new("session");
        let adapter = TrackerAdapter::new(log.clone(), |metadata: &NowPlayingMetadata| {
            json!({ "title": metadata.title })
        });
        let a = PlayerItem::new(
            Asset::simple(url("a.m3u8"), NowPlayingMetadata::titled("A"))
                .with_tracker_adapters(vec![adapter]),
        );
        let b = PlayerItem::simple(url("b.m3u8"), ());
        session.set_items(vec![a.clone(), b.clone()]).unwrap();

        let mut rx = session.subscribe_item_state();
        within(rx.wait_for(|state| state.item.is_some())).await.unwrap();
        assert_eq!(
            log.events()[..2],
            [
                TrackerEvent::Enabled,
                TrackerEvent::MetadataUpdated {
                    metadata: json!({ "title": "A" })
                },
            ]
        );

        player.advance_to_next_item();
        within(rx.wait_for(|state| {
            state.item.as_ref().and_then(NativeItem::id) == Some(b.id())
        }))
        .await
        .unwrap();
        assert_eq!(log.events().last(), Some(&TrackerEvent::Disabled));
    }

    #[tokio::test]
    async fn test_now_playing_installs_commands() {
        let (session, player, center) = session();
        player.set_timing(
            TimeRange::new(Duration::ZERO, Duration::from_secs(60)),
            Some(Duration::from_secs(5)),
            Some(Duration::from_secs(60)),
        );
        let item = PlayerItem::simple(url("a.m3u8"), NowPlayingMetadata::titled("Episode"));
        session.append(item).unwrap();

        let mut rx = session.subscribe_now_playing();
        let info = within(rx.wait_for(|info| info.get(NowPlayingKey::Title).is_some()))
            .await
            .unwrap()
            .clone();
        assert_eq!(
            info.get(NowPlayingKey::Title),
            Some(&NowPlayingValue::Text("Episode".into()))
        );
        assert_eq!(center.registered_commands().len(), RemoteCommand::ALL.len());

        session.set_active(false).await.unwrap();
        within(rx.wait_for(|info| info.is_empty())).await.unwrap();
        assert!(center.registered_commands().is_empty());
    }

    #[tokio::test]
    async fn test_remote_actions_forwarded() {
        let (session, _, center) = session();
        let mut actions = session.take_remote_actions().unwrap();
        assert!(session.take_remote_actions().is_none());

        session
            .append(PlayerItem::simple(url("a.m3u8"), NowPlayingMetadata::titled("A")))
            .unwrap();
        let mut rx = session.subscribe_now_playing();
        within(rx.wait_for(|info| !info.is_empty())).await.unwrap();

        center.trigger(RemoteCommand::Pause, Default::default());
        assert_eq!(within(actions.recv()).await, Some(RemoteAction::Pause));
    }

    #[tokio::test]
    async fn test_seek_reported_until_completed() {
        let player = Arc::new(InMemoryPlayer::new());
        let center = InMemoryControlCenter::new();
        let config = PlayerConfig {
            time_refresh_interval: 0.05,
            ..Default::default()
        };
        let session = PlayerSession::new(player.clone(), config, center.clone(), center).unwrap();
        let timeline = TimeRange::new(Duration::ZERO, Duration::from_secs(600));
        player.set_timing(timeline, Some(Duration::from_secs(5)), Some(Duration::from_secs(600)));
        session
            .append(PlayerItem::simple(url("a.m3u8"), NowPlayingMetadata::titled("A")))
            .unwrap();
        let mut rx = session.subscribe_item_state();
        within(rx.wait_for(|state| state.item.is_some())).await.unwrap();

        let elapsed = |seconds: f64| {
            move |info: &NowPlayingInfo| {
                info.get(NowPlayingKey::ElapsedPlaybackTime) == Some(&NowPlayingValue::Number(seconds))
            }
        };
        let mut properties = session.subscribe_properties();
        let mut now_playing = session.subscribe_now_playing();

        session
            .seek(Position::at(Duration::from_secs(30)))
            .await
            .unwrap();
        within(properties.wait_for(|p| p.seek_time == Some(Duration::from_secs(30))))
            .await
            .unwrap();
        within(now_playing.wait_for(elapsed(30.0))).await.unwrap();

        // The engine performs the seek
        assert!(player.complete_seek().is_some());
        within(properties.wait_for(|p| p.seek_time.is_none()))
            .await
            .unwrap();

        // Elapsed time follows the engine again
        player.set_timing(timeline, Some(Duration::from_secs(200)), Some(Duration::from_secs(600)));
        within(now_playing.wait_for(elapsed(200.0))).await.unwrap();
        assert_eq!(session.properties().seek_time, None);
    }

    #[tokio::test]
    async fn test_shutdown_closes_session() {
        let (session, _, _) = session();
        let log = TrackerEventLog::new("shutdown");
        let adapter = TrackerAdapter::new(log.clone(), |_: &()| json!(null));
        session
            .append(PlayerItem::new(
                Asset::simple(url("a.m3u8"), ()).with_tracker_adapters(vec![adapter]),
            ))
            .unwrap();
        let mut rx = session.subscribe_item_state();
        within(rx.wait_for(|state| state.item.is_some())).await.unwrap();

        session.shutdown().await.unwrap();
        assert_eq!(log.events().last(), Some(&TrackerEvent::Disabled));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let player = Arc::new(InMemoryPlayer::new());
        let center = InMemoryControlCenter::new();
        let config = PlayerConfig {
            engine_item_window: 0,
            ..Default::default()
        };
        let result = PlayerSession::new(player.clone(), config, center.clone(), center.clone());
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        for interval in [1e-12, 1e20] {
            let config = PlayerConfig {
                time_refresh_interval: interval,
                ..Default::default()
            };
            let result = PlayerSession::new(player.clone(), config, center.clone(), center.clone());
            assert!(matches!(result, Err(Error::InvalidConfig(_))));
        }
    }
}
