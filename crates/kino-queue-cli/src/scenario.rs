//! Scripted playback scenarios
//!
//! A scenario lists the initial queue items and the steps applied to the
//! session or to the in-memory engine. A snapshot is taken after each step,
//! once the session had `settle` time to publish.

use anyhow::Context;
use kino_queue::remote::RemoteCommandEvent;
use kino_queue::tracker::TrackerEventRecord;
use kino_queue::{
    Asset, InMemoryControlCenter, InMemoryPlayer, ItemError, ItemTransition, NowPlayingInfo,
    NowPlayingKey, NowPlayingMetadata, NowPlayingValue, PlayerConfig, PlayerItem, PlayerSession,
    Position, RemoteAction, RemoteCommand, SystemPlayer, TimeRange, TrackerAdapter,
    TrackerEventLog,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

/// Scenario file contents
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: PlayerConfig,
    pub items: Vec<ItemSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Invalid scenario")
    }
}

/// Queue item description.
///
/// Items without URL stay loading until a `load` step, items with an error
/// fail immediately.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemSpec {
    pub url: Option<Url>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub error: Option<String>,
}

/// Scenario step
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// The engine plays the current item to its end
    EngineAdvance,
    /// The engine fails the current item
    EngineFail { message: String },
    /// The engine performs the pending seek of the current item
    EngineSeek,
    Next,
    Previous,
    Seek { time: f64 },
    Append { item: ItemSpec },
    Remove { item: usize },
    MoveBefore { item: usize, before: usize },
    Clear,
    /// Publish the asset of a loading item
    Load {
        item: usize,
        url: Url,
        title: Option<String>,
    },
    /// Fail an item from its asset side
    Fail { item: usize, message: String },
    Timing {
        start: f64,
        duration: f64,
        current: Option<f64>,
        #[serde(default)]
        live: bool,
    },
    Rate { rate: f32 },
    Buffering { buffering: bool },
    Active { active: bool },
    Controls { enabled: bool },
    /// Trigger a remote command, as the system surface would
    Remote {
        command: RemoteCommand,
        position: Option<f64>,
    },
}

impl Step {
    pub fn describe(&self) -> String {
        match self {
            Step::EngineAdvance => "engine advance".to_string(),
            Step::EngineFail { message } => format!("engine fail ({})", message),
            Step::EngineSeek => "engine seek".to_string(),
            Step::Next => "next".to_string(),
            Step::Previous => "previous".to_string(),
            Step::Seek { time } => format!("seek {}s", time),
            Step::Append { item } => format!("append {}", item.label()),
            Step::Remove { item } => format!("remove #{}", item),
            Step::MoveBefore { item, before } => format!("move #{} before #{}", item, before),
            Step::Clear => "clear".to_string(),
            Step::Load { item, url, .. } => format!("load #{} {}", item, url),
            Step::Fail { item, .. } => format!("fail #{}", item),
            Step::Timing { current, live, .. } => match (current, live) {
                (_, true) => "timing live".to_string(),
                (Some(current), false) => format!("timing at {}s", current),
                (None, false) => "timing".to_string(),
            },
            Step::Rate { rate } => format!("rate {}", rate),
            Step::Buffering { buffering } => format!("buffering {}", buffering),
            Step::Active { active } => format!("active {}", active),
            Step::Controls { enabled } => format!("controls {}", enabled),
            Step::Remote { command, .. } => format!("remote {:?}", command),
        }
    }
}

impl ItemSpec {
    fn label(&self) -> String {
        match (&self.title, &self.url, &self.error) {
            (_, _, Some(_)) => "failed item".to_string(),
            (Some(title), _, _) => title.clone(),
            (None, Some(url), _) => url.to_string(),
            (None, None, None) => "loading item".to_string(),
        }
    }

    fn metadata(&self) -> NowPlayingMetadata {
        NowPlayingMetadata {
            title: self.title.clone(),
            subtitle: self.subtitle.clone(),
            ..Default::default()
        }
    }

    fn build(&self, tracker: &Arc<TrackerEventLog>) -> PlayerItem {
        if let Some(message) = &self.error {
            return PlayerItem::failed(ItemError::new("scenario", 1, message.clone()));
        }
        match &self.url {
            Some(url) => PlayerItem::new(
                Asset::simple(url.clone(), self.metadata())
                    .with_tracker_adapters(vec![tracker_adapter(tracker)]),
            ),
            None => PlayerItem::loading(),
        }
    }
}

fn tracker_adapter(tracker: &Arc<TrackerEventLog>) -> TrackerAdapter<NowPlayingMetadata> {
    TrackerAdapter::new(tracker.clone(), |metadata: &NowPlayingMetadata| {
        serde_json::to_value(metadata).unwrap_or_default()
    })
}

fn seconds(value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("Invalid time {}", value))
}

/// Session state after a step
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct StepReport {
    #[tabled(rename = "#")]
    pub step: usize,
    pub action: String,
    pub index: String,
    pub transition: String,
    pub current: String,
    pub error: String,
    pub title: String,
    pub commands: usize,
    #[tabled(skip)]
    pub now_playing: NowPlayingInfo,
}

/// Outcome of a scenario run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub name: String,
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tracker_events: Vec<TrackerEventRecord>,
}

/// Session driven by a scenario
pub struct Simulation {
    player: Arc<InMemoryPlayer>,
    center: Arc<InMemoryControlCenter>,
    session: PlayerSession,
    actions: mpsc::UnboundedReceiver<RemoteAction>,
    tracker: Arc<TrackerEventLog>,
    settle: Duration,
}

impl Simulation {
    /// Start a session playing the scenario items. Must be called within a Tokio runtime.
    pub fn start(scenario: &Scenario, config: PlayerConfig, settle: Duration) -> anyhow::Result<Self> {
        let player = Arc::new(InMemoryPlayer::new());
        let center = InMemoryControlCenter::new();
        let session = PlayerSession::new(player.clone(), config, center.clone(), center.clone())?;
        let actions = session
            .take_remote_actions()
            .context("Remote actions already taken")?;
        let tracker = TrackerEventLog::new(scenario.name.clone());

        let items = scenario
            .items
            .iter()
            .map(|spec| spec.build(&tracker))
            .collect();
        session.set_items(items)?;

        info!(session_id = %session.id(), items = scenario.items.len(), "Simulation started");
        Ok(Self {
            player,
            center,
            session,
            actions,
            tracker,
            settle,
        })
    }

    /// Apply `steps` in order, then shut the session down
    pub async fn run(mut self, name: &str, steps: &[Step], trackers: bool) -> anyhow::Result<SimulationReport> {
        let mut reports = Vec::with_capacity(steps.len() + 1);

        tokio::time::sleep(self.settle).await;
        reports.push(self.snapshot(0, "start".to_string()));

        for (index, step) in steps.iter().enumerate() {
            debug!(step = index + 1, action = %step.describe(), "Applying step");
            self.apply(step)
                .await
                .with_context(|| format!("Step {} ({}) failed", index + 1, step.describe()))?;
            tokio::time::sleep(self.settle).await;
            reports.push(self.snapshot(index + 1, step.describe()));
        }

        let tracker_events = if trackers {
            self.tracker.records()
        } else {
            Vec::new()
        };
        self.session.shutdown().await?;

        Ok(SimulationReport {
            name: name.to_string(),
            steps: reports,
            tracker_events,
        })
    }

    fn item(&self, index: usize) -> anyhow::Result<PlayerItem> {
        self.session
            .items()
            .get(index)
            .cloned()
            .with_context(|| format!("No item at index {}", index))
    }

    async fn apply(&mut self, step: &Step) -> anyhow::Result<()> {
        match step {
            Step::EngineAdvance => self.player.advance_to_next_item(),
            Step::EngineFail { message } => {
                self.player.fail_current_item(ItemError::playback(message.clone()))
            }
            Step::EngineSeek => {
                if self.player.complete_seek().is_none() {
                    warn!("No pending seek");
                }
            }
            Step::Next => {
                if !self.session.advance_to_next().await? {
                    warn!("No next item");
                }
            }
            Step::Previous => {
                if !self.session.return_to_previous().await? {
                    warn!("No previous item");
                }
            }
            Step::Seek { time } => self.session.seek(Position::at(seconds(*time)?)).await?,
            Step::Append { item } => self.session.append(item.build(&self.tracker))?,
            Step::Remove { item } => {
                let id = self.item(*item)?.id();
                self.session.remove(id)?;
            }
            Step::MoveBefore { item, before } => {
                let id = self.item(*item)?.id();
                let before = self.item(*before)?.id();
                self.session.move_before(id, before)?;
            }
            Step::Clear => self.session.remove_all()?,
            Step::Load { item, url, title } => {
                let metadata = NowPlayingMetadata {
                    title: title.clone(),
                    ..Default::default()
                };
                self.item(*item)?.update(
                    Asset::simple(url.clone(), metadata)
                        .with_tracker_adapters(vec![tracker_adapter(&self.tracker)]),
                );
            }
            Step::Fail { item, message } => {
                self.item(*item)?
                    .fail(ItemError::new("scenario", 2, message.clone()));
            }
            Step::Timing {
                start,
                duration,
                current,
                live,
            } => {
                let seekable = TimeRange::new(seconds(*start)?, seconds(*duration)?);
                let current = current.map(seconds).transpose()?;
                let duration = if *live { None } else { Some(seekable.duration) };
                self.player.set_timing(seekable, current, duration);
            }
            Step::Rate { rate } => self.player.set_rate(*rate),
            Step::Buffering { buffering } => self.player.set_buffering(*buffering),
            Step::Active { active } => self.session.set_active(*active).await?,
            Step::Controls { enabled } => self.session.set_controls_enabled(*enabled).await?,
            Step::Remote { command, position } => {
                let event = RemoteCommandEvent {
                    position_time: *position,
                };
                match self.center.trigger(*command, event) {
                    Some(status) => debug!(?command, ?status, "Remote command handled"),
                    None => warn!(?command, "Remote command not installed"),
                }
                while let Ok(action) = self.actions.try_recv() {
                    self.perform(action).await?;
                }
            }
        }
        Ok(())
    }

    /// Act on a remote action the way an application would
    async fn perform(&self, action: RemoteAction) -> anyhow::Result<()> {
        let skip = |interval: f64, forward: bool| -> anyhow::Result<Position> {
            let now = self.player.current_time().unwrap_or_default();
            let interval = seconds(interval)?;
            let time = if forward {
                now + interval
            } else {
                now.saturating_sub(interval)
            };
            Ok(Position::at(time))
        };

        match action {
            RemoteAction::Play => self.player.set_rate(1.0),
            RemoteAction::Pause => self.player.set_rate(0.0),
            RemoteAction::TogglePlayPause => {
                let rate = *self.player.rate().borrow();
                self.player.set_rate(if rate == 0.0 { 1.0 } else { 0.0 });
            }
            RemoteAction::ReturnToPrevious => {
                self.session.return_to_previous().await?;
            }
            RemoteAction::AdvanceToNext => {
                self.session.advance_to_next().await?;
            }
            RemoteAction::Seek { position } => self.session.seek(position).await?,
            RemoteAction::SkipBackward => {
                let interval = self.session.config().backward_skip_interval;
                self.session.seek(skip(interval, false)?).await?;
            }
            RemoteAction::SkipForward => {
                let interval = self.session.config().forward_skip_interval;
                self.session.seek(skip(interval, true)?).await?;
            }
        }
        Ok(())
    }

    fn snapshot(&self, step: usize, action: String) -> StepReport {
        let queue = self.session.queue();
        let state = self.session.item_state();
        let now_playing = self.session.now_playing_info();

        let index = match queue.current_index() {
            kino_queue::Current::Valid(Some(index)) => index.to_string(),
            kino_queue::Current::Valid(None) => "-".to_string(),
            kino_queue::Current::Invalid => "invalid".to_string(),
        };
        let transition = match queue.transition() {
            ItemTransition::Advance(Some(_)) => "advance",
            ItemTransition::Advance(None) => "advance (head)",
            ItemTransition::Stop(_) => "stop",
            ItemTransition::Finish => "finish",
        };
        let title = match now_playing.get(NowPlayingKey::Title) {
            Some(NowPlayingValue::Text(title)) => title.clone(),
            _ => String::new(),
        };

        StepReport {
            step,
            action,
            index,
            transition: transition.to_string(),
            current: state
                .item
                .as_ref()
                .map(|item| item.url().to_string())
                .unwrap_or_default(),
            error: state
                .error
                .as_ref()
                .map(|error| error.message.clone())
                .unwrap_or_default(),
            title,
            commands: self.center.registered_commands().len(),
            now_playing,
        }
    }
}

/// Scenario played by `kino-queue demo`
pub const DEMO_SCENARIO: &str = r#"{
  "name": "demo",
  "items": [
    { "url": "https://cdn.example.com/pilot/master.m3u8", "title": "Pilot", "subtitle": "Season 1" },
    {},
    { "url": "https://cdn.example.com/finale/master.m3u8", "title": "Finale", "subtitle": "Season 1" }
  ],
  "steps": [
    { "action": "timing", "start": 0, "duration": 1800, "current": 12 },
    { "action": "rate", "rate": 1.0 },
    { "action": "remote", "command": "next_track" },
    { "action": "load", "item": 1, "url": "https://cdn.example.com/episode2/master.m3u8", "title": "Episode 2" },
    { "action": "engine_fail", "message": "segment unavailable" },
    { "action": "next" },
    { "action": "remote", "command": "change_playback_position", "position": 600 },
    { "action": "engine_seek" },
    { "action": "engine_advance" },
    { "action": "previous" },
    { "action": "remove", "item": 2 },
    { "action": "clear" }
  ]
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_scenario_parses() {
        let scenario = Scenario::from_json(DEMO_SCENARIO).unwrap();
        assert_eq!(scenario.name, "demo");
        assert_eq!(scenario.items.len(), 3);
        assert!(scenario.items[1].url.is_none());
        assert!(matches!(scenario.steps[2], Step::Remote { command: RemoteCommand::NextTrack, .. }));
    }

    #[test]
    fn test_step_descriptions() {
        assert_eq!(Step::Remove { item: 2 }.describe(), "remove #2");
        assert_eq!(Step::EngineSeek.describe(), "engine seek");
        assert_eq!(
            Step::EngineFail {
                message: "boom".into()
            }
            .describe(),
            "engine fail (boom)"
        );
        assert_eq!(
            Step::Append {
                item: ItemSpec::default()
            }
            .describe(),
            "append loading item"
        );
    }

    #[test]
    fn test_invalid_time() {
        assert!(seconds(-1.0).is_err());
        assert_eq!(seconds(1.5).unwrap(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_simulation_plays_through() {
        let scenario = Scenario::from_json(
            r#"{
                "name": "short",
                "items": [
                    { "url": "https://cdn.example.com/a.m3u8", "title": "A" },
                    { "url": "https://cdn.example.com/b.m3u8", "title": "B" }
                ],
                "steps": [
                    { "action": "next" },
                    { "action": "engine_advance" }
                ]
            }"#,
        )
        .unwrap();

        let simulation = Simulation::start(
            &scenario,
            scenario.config.clone(),
            Duration::from_millis(50),
        )
        .unwrap();
        let report = simulation
            .run(&scenario.name, &scenario.steps, true)
            .await
            .unwrap();

        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.steps[0].index, "0");
        assert_eq!(report.steps[0].title, "A");
        assert_eq!(report.steps[1].index, "1");
        assert_eq!(report.steps[1].title, "B");
        assert_eq!(report.steps[2].transition, "finish");
        assert!(!report.tracker_events.is_empty());
    }

    #[tokio::test]
    async fn test_missing_item_fails_step() {
        let scenario = Scenario::from_json(
            r#"{ "items": [], "steps": [ { "action": "remove", "item": 3 } ] }"#,
        )
        .unwrap();

        let simulation =
            Simulation::start(&scenario, PlayerConfig::default(), Duration::from_millis(10)).unwrap();
        let error = simulation
            .run("missing", &scenario.steps, false)
            .await
            .unwrap_err();
        assert!(format!("{:#}", error).contains("No item at index 3"));
    }
}
