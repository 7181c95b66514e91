//! Remote commands and now-playing synchronization
//!
//! The [`NowPlayingSynchronizer`] publishes now-playing info to a
//! [`NowPlayingInfoCenter`] and keeps transport commands registered on a
//! [`RemoteCommandCenter`] while there is something to show:
//! - commands are installed when the published info goes from empty to
//!   non-empty, and removed when it becomes empty again
//! - installing twice or removing twice is a no-op
//! - nothing happens while controls are disabled
//!
//! Command handlers never drive the engine. They forward a [`RemoteAction`]
//! to a channel drained by the host.

use crate::config::PlayerConfig;
use crate::now_playing::NowPlayingInfo;
use crate::types::Position;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Transport commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteCommand {
    Play,
    Pause,
    TogglePlayPause,
    PreviousTrack,
    NextTrack,
    ChangePlaybackPosition,
    SkipBackward,
    SkipForward,
}

impl RemoteCommand {
    /// All commands, in installation order
    pub const ALL: [RemoteCommand; 8] = [
        RemoteCommand::Play,
        RemoteCommand::Pause,
        RemoteCommand::TogglePlayPause,
        RemoteCommand::PreviousTrack,
        RemoteCommand::NextTrack,
        RemoteCommand::ChangePlaybackPosition,
        RemoteCommand::SkipBackward,
        RemoteCommand::SkipForward,
    ];
}

/// Action requested through a remote command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RemoteAction {
    Play,
    Pause,
    TogglePlayPause,
    ReturnToPrevious,
    AdvanceToNext,
    Seek { position: Position },
    SkipBackward,
    SkipForward,
}

/// Event delivered with a command
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RemoteCommandEvent {
    /// Target time of a change playback position command (seconds)
    pub position_time: Option<f64>,
}

/// Handler outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    CommandFailed,
}

/// Command handler
pub type CommandHandler = Arc<dyn Fn(RemoteCommandEvent) -> CommandStatus + Send + Sync>;

/// Token returned by a registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandRegistration {
    pub command: RemoteCommand,
    pub token: u64,
}

/// System surface receiving transport command registrations
pub trait RemoteCommandCenter: Send + Sync {
    fn register(&self, command: RemoteCommand, handler: CommandHandler) -> CommandRegistration;

    fn unregister(&self, registration: &CommandRegistration);

    /// Per-command enablement, independent of registration
    fn set_enabled(&self, command: RemoteCommand, enabled: bool);

    /// Preferred interval announced by skip commands (seconds)
    fn set_preferred_interval(&self, command: RemoteCommand, interval: f64);
}

/// System surface displaying now-playing info
pub trait NowPlayingInfoCenter: Send + Sync {
    fn now_playing_info(&self) -> Option<NowPlayingInfo>;

    fn set_now_playing_info(&self, info: Option<NowPlayingInfo>);
}

/// Availability of navigation commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandAvailability {
    pub previous: bool,
    pub next: bool,
    pub skip: bool,
}

/// Keeps the system surfaces in sync with the published info
pub struct NowPlayingSynchronizer {
    commands: Arc<dyn RemoteCommandCenter>,
    info_center: Arc<dyn NowPlayingInfoCenter>,
    controls_enabled: bool,
    forward_skip_interval: f64,
    backward_skip_interval: f64,
    registrations: Vec<CommandRegistration>,
    availability: CommandAvailability,
    actions: mpsc::UnboundedSender<RemoteAction>,
}

impl NowPlayingSynchronizer {
    pub fn new(
        config: &PlayerConfig,
        commands: Arc<dyn RemoteCommandCenter>,
        info_center: Arc<dyn NowPlayingInfoCenter>,
        actions: mpsc::UnboundedSender<RemoteAction>,
    ) -> Self {
        Self {
            commands,
            info_center,
            controls_enabled: config.controls_enabled,
            forward_skip_interval: config.forward_skip_interval,
            backward_skip_interval: config.backward_skip_interval,
            registrations: Vec::new(),
            availability: CommandAvailability::default(),
            actions,
        }
    }

    pub fn controls_enabled(&self) -> bool {
        self.controls_enabled
    }

    pub fn is_installed(&self) -> bool {
        !self.registrations.is_empty()
    }

    pub fn registrations(&self) -> &[CommandRegistration] {
        &self.registrations
    }

    /// Publish `info`, installing or removing commands on emptiness changes
    pub fn update(&mut self, info: &NowPlayingInfo) {
        if !self.controls_enabled {
            return;
        }
        if info.is_empty() {
            self.uninstall();
            self.info_center.set_now_playing_info(None);
        } else {
            if self.info_center.now_playing_info().is_none() {
                self.uninstall();
                self.install();
            }
            self.info_center.set_now_playing_info(Some(info.clone()));
        }
    }

    /// Toggle controls. Disabling removes commands and clears the info,
    /// enabling takes effect with the next update.
    pub fn set_controls_enabled(&mut self, enabled: bool) {
        if enabled == self.controls_enabled {
            return;
        }
        info!(enabled, "Remote controls toggled");
        if !enabled {
            self.uninstall();
            self.info_center.set_now_playing_info(None);
        }
        self.controls_enabled = enabled;
    }

    /// Enable navigation commands according to the queue and stream
    pub fn update_availability(&mut self, availability: CommandAvailability) {
        self.availability = availability;
        if !self.controls_enabled || !self.is_installed() {
            return;
        }
        self.commands
            .set_enabled(RemoteCommand::PreviousTrack, availability.previous);
        self.commands
            .set_enabled(RemoteCommand::NextTrack, availability.next);
        self.commands
            .set_enabled(RemoteCommand::SkipBackward, availability.skip);
        self.commands
            .set_enabled(RemoteCommand::SkipForward, availability.skip);
    }

    /// Remove commands and clear the info, whatever the emptiness state
    pub fn teardown(&mut self) {
        if self.controls_enabled {
            self.uninstall();
            self.info_center.set_now_playing_info(None);
        }
    }

    fn install(&mut self) {
        if !self.controls_enabled || self.is_installed() {
            return;
        }
        debug!("Installing remote commands");
        let registrations: Vec<CommandRegistration> = RemoteCommand::ALL
            .iter()
            .map(|command| self.register(*command))
            .collect();
        self.registrations = registrations;
        let availability = self.availability;
        self.update_availability(availability);
    }

    fn uninstall(&mut self) {
        if !self.controls_enabled || !self.is_installed() {
            return;
        }
        debug!("Uninstalling remote commands");
        for registration in self.registrations.drain(..) {
            self.commands.unregister(&registration);
        }
    }

    fn register(&self, command: RemoteCommand) -> CommandRegistration {
        match command {
            RemoteCommand::PreviousTrack | RemoteCommand::NextTrack => {
                self.commands.set_enabled(command, false);
            }
            RemoteCommand::SkipBackward => {
                self.commands.set_enabled(command, false);
                self.commands
                    .set_preferred_interval(command, self.backward_skip_interval);
            }
            RemoteCommand::SkipForward => {
                self.commands.set_enabled(command, false);
                self.commands
                    .set_preferred_interval(command, self.forward_skip_interval);
            }
            _ => {}
        }

        let actions = self.actions.clone();
        let handler: CommandHandler = Arc::new(move |event: RemoteCommandEvent| {
            let Some(action) = action_for(command, event) else {
                return CommandStatus::CommandFailed;
            };
            match actions.send(action) {
                Ok(()) => CommandStatus::Success,
                Err(_) => CommandStatus::CommandFailed,
            }
        });
        self.commands.register(command, handler)
    }
}

fn action_for(command: RemoteCommand, event: RemoteCommandEvent) -> Option<RemoteAction> {
    let action = match command {
        RemoteCommand::Play => RemoteAction::Play,
        RemoteCommand::Pause => RemoteAction::Pause,
        RemoteCommand::TogglePlayPause => RemoteAction::TogglePlayPause,
        RemoteCommand::PreviousTrack => RemoteAction::ReturnToPrevious,
        RemoteCommand::NextTrack => RemoteAction::AdvanceToNext,
        RemoteCommand::ChangePlaybackPosition => {
            let time = Duration::try_from_secs_f64(event.position_time?).ok()?;
            RemoteAction::Seek {
                position: Position::near(time),
            }
        }
        RemoteCommand::SkipBackward => RemoteAction::SkipBackward,
        RemoteCommand::SkipForward => RemoteAction::SkipForward,
    };
    Some(action)
}

#[derive(Default)]
struct ControlCenterState {
    next_token: u64,
    handlers: HashMap<RemoteCommand, Vec<(u64, CommandHandler)>>,
    enabled: HashMap<RemoteCommand, bool>,
    intervals: HashMap<RemoteCommand, f64>,
    info: Option<NowPlayingInfo>,
    info_updates: u64,
}

/// In-memory command and info center
#[derive(Default)]
pub struct InMemoryControlCenter {
    state: Mutex<ControlCenterState>,
}

impl InMemoryControlCenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Invoke the handlers registered for `command`.
    ///
    /// Returns `None` when nothing is registered or the command is disabled.
    pub fn trigger(&self, command: RemoteCommand, event: RemoteCommandEvent) -> Option<CommandStatus> {
        let handlers: Vec<CommandHandler> = {
            let state = self.state.lock();
            if !state.enabled.get(&command).copied().unwrap_or(true) {
                return None;
            }
            state
                .handlers
                .get(&command)
                .map(|handlers| handlers.iter().map(|(_, handler)| handler.clone()).collect())
                .unwrap_or_default()
        };
        handlers.iter().map(|handler| handler(event)).last()
    }

    pub fn is_enabled(&self, command: RemoteCommand) -> bool {
        self.state.lock().enabled.get(&command).copied().unwrap_or(true)
    }

    /// Commands with at least one handler
    pub fn registered_commands(&self) -> Vec<RemoteCommand> {
        let state = self.state.lock();
        let mut commands: Vec<RemoteCommand> = state
            .handlers
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(command, _)| *command)
            .collect();
        commands.sort();
        commands
    }

    pub fn handler_count(&self) -> usize {
        self.state.lock().handlers.values().map(Vec::len).sum()
    }

    pub fn preferred_interval(&self, command: RemoteCommand) -> Option<f64> {
        self.state.lock().intervals.get(&command).copied()
    }

    /// Number of info publications
    pub fn info_updates(&self) -> u64 {
        self.state.lock().info_updates
    }
}

impl RemoteCommandCenter for InMemoryControlCenter {
    fn register(&self, command: RemoteCommand, handler: CommandHandler) -> CommandRegistration {
        let mut state = self.state.lock();
        state.next_token += 1;
        let token = state.next_token;
        state.handlers.entry(command).or_default().push((token, handler));
        CommandRegistration { command, token }
    }

    fn unregister(&self, registration: &CommandRegistration) {
        if let Some(handlers) = self.state.lock().handlers.get_mut(&registration.command) {
            handlers.retain(|(token, _)| *token != registration.token);
        }
    }

    fn set_enabled(&self, command: RemoteCommand, enabled: bool) {
        self.state.lock().enabled.insert(command, enabled);
    }

    fn set_preferred_interval(&self, command: RemoteCommand, interval: f64) {
        self.state.lock().intervals.insert(command, interval);
    }
}

impl NowPlayingInfoCenter for InMemoryControlCenter {
    fn now_playing_info(&self) -> Option<NowPlayingInfo> {
        self.state.lock().info.clone()
    }

    fn set_now_playing_info(&self, info: Option<NowPlayingInfo>) {
        let mut state = self.state.lock();
        state.info = info;
        state.info_updates += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_playing::NowPlayingKey;

    fn synchronizer(
        config: &PlayerConfig,
    ) -> (
        NowPlayingSynchronizer,
        Arc<InMemoryControlCenter>,
        mpsc::UnboundedReceiver<RemoteAction>,
    ) {
        let center = InMemoryControlCenter::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let synchronizer = NowPlayingSynchronizer::new(config, center.clone(), center.clone(), tx);
        (synchronizer, center, rx)
    }

    fn titled(title: &str) -> NowPlayingInfo {
        let mut info = NowPlayingInfo::new();
        info.insert(NowPlayingKey::Title, title);
        info
    }

    #[test]
    fn test_install_on_first_info() {
        let (mut synchronizer, center, _rx) = synchronizer(&PlayerConfig::default());
        assert!(center.registered_commands().is_empty());

        synchronizer.update(&titled("A"));
        assert_eq!(center.registered_commands().len(), 8);
        assert_eq!(center.now_playing_info(), Some(titled("A")));

        // Further updates do not reinstall
        synchronizer.update(&titled("B"));
        assert_eq!(center.handler_count(), 8);
        assert_eq!(center.now_playing_info(), Some(titled("B")));
    }

    #[test]
    fn test_uninstall_on_empty_info() {
        let (mut synchronizer, center, _rx) = synchronizer(&PlayerConfig::default());
        synchronizer.update(&titled("A"));
        synchronizer.update(&NowPlayingInfo::new());
        assert!(center.registered_commands().is_empty());
        assert_eq!(center.now_playing_info(), None);

        // Removing again is a no-op
        synchronizer.update(&NowPlayingInfo::new());
        assert!(!synchronizer.is_installed());
    }

    #[test]
    fn test_disabled_controls_do_nothing() {
        let config = PlayerConfig {
            controls_enabled: false,
            ..Default::default()
        };
        let (mut synchronizer, center, _rx) = synchronizer(&config);
        synchronizer.update(&titled("A"));
        assert!(center.registered_commands().is_empty());
        assert_eq!(center.info_updates(), 0);
    }

    #[test]
    fn test_disabling_controls_tears_down() {
        let (mut synchronizer, center, _rx) = synchronizer(&PlayerConfig::default());
        synchronizer.update(&titled("A"));
        synchronizer.set_controls_enabled(false);
        assert!(center.registered_commands().is_empty());
        assert_eq!(center.now_playing_info(), None);

        synchronizer.set_controls_enabled(true);
        synchronizer.update(&titled("A"));
        assert_eq!(center.handler_count(), 8);
    }

    #[test]
    fn test_navigation_commands_start_disabled() {
        let config = PlayerConfig {
            forward_skip_interval: 30.0,
            backward_skip_interval: 15.0,
            ..Default::default()
        };
        let (mut synchronizer, center, _rx) = synchronizer(&config);
        synchronizer.update(&titled("A"));

        assert!(center.is_enabled(RemoteCommand::Play));
        assert!(!center.is_enabled(RemoteCommand::PreviousTrack));
        assert!(!center.is_enabled(RemoteCommand::NextTrack));
        assert!(!center.is_enabled(RemoteCommand::SkipForward));
        assert_eq!(center.preferred_interval(RemoteCommand::SkipForward), Some(30.0));
        assert_eq!(center.preferred_interval(RemoteCommand::SkipBackward), Some(15.0));

        synchronizer.update_availability(CommandAvailability {
            previous: false,
            next: true,
            skip: true,
        });
        assert!(center.is_enabled(RemoteCommand::NextTrack));
        assert!(center.is_enabled(RemoteCommand::SkipBackward));
        assert!(!center.is_enabled(RemoteCommand::PreviousTrack));
    }

    #[test]
    fn test_handlers_forward_actions() {
        let (mut synchronizer, center, mut rx) = synchronizer(&PlayerConfig::default());
        synchronizer.update(&titled("A"));

        assert_eq!(
            center.trigger(RemoteCommand::Pause, RemoteCommandEvent::default()),
            Some(CommandStatus::Success)
        );
        assert_eq!(rx.try_recv().unwrap(), RemoteAction::Pause);

        let event = RemoteCommandEvent {
            position_time: Some(12.5),
        };
        assert_eq!(
            center.trigger(RemoteCommand::ChangePlaybackPosition, event),
            Some(CommandStatus::Success)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            RemoteAction::Seek {
                position: Position::near(Duration::from_millis(12_500))
            }
        );

        // Missing position
        assert_eq!(
            center.trigger(RemoteCommand::ChangePlaybackPosition, RemoteCommandEvent::default()),
            Some(CommandStatus::CommandFailed)
        );

        // Disabled command
        assert_eq!(center.trigger(RemoteCommand::NextTrack, RemoteCommandEvent::default()), None);
    }

    #[test]
    fn test_reinstall_when_info_center_was_cleared() {
        let (mut synchronizer, center, _rx) = synchronizer(&PlayerConfig::default());
        synchronizer.update(&titled("A"));

        // Another party cleared the info, commands are reinstalled once
        center.set_now_playing_info(None);
        synchronizer.update(&titled("A"));
        assert_eq!(center.handler_count(), 8);
    }
}
