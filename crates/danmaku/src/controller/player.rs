//! Media player collaborator and the listener that feeds the controller.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::messages::{ControllerMessage, PlayerSignal};

/// Coarse playback state reported by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Buffering,
    Ready,
    Ended,
}

/// Why the playback position jumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscontinuityReason {
    Seek,
    SeekAdjustment,
    AutoTransition,
    Other,
}

/// Registration token returned by [`MediaPlayer::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Callbacks the player invokes. They may run on any thread.
pub trait PlayerListener: Send + Sync {
    fn on_playback_state_changed(&self, state: PlaybackState);

    fn on_is_playing_changed(&self, is_playing: bool);

    fn on_position_discontinuity(&self, old_ms: i64, new_ms: i64, reason: DiscontinuityReason);

    fn on_playback_speed_changed(&self, _speed: f32) {}
}

/// The media playback engine. Not owned by the controller.
pub trait MediaPlayer: Send + Sync {
    fn current_position_ms(&self) -> i64;

    fn is_playing(&self) -> bool;

    fn playback_speed(&self) -> f32 {
        1.0
    }

    fn add_listener(&self, listener: Arc<dyn PlayerListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

/// Listener that turns player callbacks into controller messages.
///
/// Holds a weak sender so a registered listener never keeps the controller alive.
pub(crate) struct PlayerForwarder {
    sender: mpsc::WeakSender<ControllerMessage>,
}

impl PlayerForwarder {
    pub(crate) fn new(sender: mpsc::WeakSender<ControllerMessage>) -> Self {
        Self { sender }
    }

    fn forward(&self, signal: PlayerSignal) {
        let Some(sender) = self.sender.upgrade() else {
            debug!(?signal, "Controller gone, dropping player signal");
            return;
        };
        match sender.try_send(ControllerMessage::Player(signal)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Controller mailbox full, dropping player signal");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Controller stopped, dropping player signal");
            }
        }
    }
}

impl PlayerListener for PlayerForwarder {
    fn on_playback_state_changed(&self, state: PlaybackState) {
        self.forward(PlayerSignal::PlaybackStateChanged(state));
    }

    fn on_is_playing_changed(&self, is_playing: bool) {
        self.forward(PlayerSignal::IsPlayingChanged(is_playing));
    }

    fn on_position_discontinuity(&self, old_ms: i64, new_ms: i64, reason: DiscontinuityReason) {
        self.forward(PlayerSignal::PositionDiscontinuity {
            old_ms,
            new_ms,
            reason,
        });
    }

    fn on_playback_speed_changed(&self, speed: f32) {
        self.forward(PlayerSignal::PlaybackSpeedChanged(speed));
    }
}
