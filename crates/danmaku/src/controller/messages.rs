//! Controller mailbox messages.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;

use super::player::{DiscontinuityReason, MediaPlayer, PlaybackState};
use super::state::{ControllerSnapshot, StyleSettings};
use super::surface::{RenderSurface, SurfaceGeneration};
use crate::error::Result;
use crate::loader::LoadedSession;

/// Messages handled by the controller task.
pub enum ControllerMessage {
    /// Bind a rendering surface, replacing any previous one.
    AttachSurface {
        surface: Arc<dyn RenderSurface>,
        reply: oneshot::Sender<SurfaceGeneration>,
    },
    /// Unbind the current surface, keeping loaded data.
    DetachSurface,
    /// Load comments for a content id.
    Load {
        content_id: i64,
        /// Content duration, used to size segmented fetches. 0 when unknown.
        duration_hint_ms: i64,
        reply: oneshot::Sender<LoadOutcome>,
    },
    /// Result of a background load, tagged with the epoch that started it.
    LoadFinished {
        epoch: u64,
        content_id: i64,
        result: Result<LoadedSession>,
    },
    SetEnabled(bool),
    UpdateStyle(StyleSettings),
    /// Subscribe to a player, or unsubscribe with `None`.
    BindPlayer(Option<Arc<dyn MediaPlayer>>),
    /// A surface finished its prepare handshake. Ignored unless the
    /// generation is the current attachment.
    SurfacePrepared(SurfaceGeneration),
    Player(PlayerSignal),
    /// Drop all cached data and external references.
    ReleaseAll(oneshot::Sender<()>),
    /// Query current state (response sent via oneshot channel).
    GetSnapshot(oneshot::Sender<ControllerSnapshot>),
    /// Request graceful shutdown.
    Shutdown,
}

impl fmt::Debug for ControllerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttachSurface { .. } => f.write_str("AttachSurface"),
            Self::DetachSurface => f.write_str("DetachSurface"),
            Self::Load {
                content_id,
                duration_hint_ms,
                ..
            } => f
                .debug_struct("Load")
                .field("content_id", content_id)
                .field("duration_hint_ms", duration_hint_ms)
                .finish(),
            Self::LoadFinished {
                epoch,
                content_id,
                result,
            } => f
                .debug_struct("LoadFinished")
                .field("epoch", epoch)
                .field("content_id", content_id)
                .field("ok", &result.is_ok())
                .finish(),
            Self::SetEnabled(enabled) => f.debug_tuple("SetEnabled").field(enabled).finish(),
            Self::UpdateStyle(style) => f.debug_tuple("UpdateStyle").field(style).finish(),
            Self::BindPlayer(player) => f
                .debug_tuple("BindPlayer")
                .field(&player.is_some())
                .finish(),
            Self::SurfacePrepared(generation) => {
                f.debug_tuple("SurfacePrepared").field(generation).finish()
            }
            Self::Player(signal) => f.debug_tuple("Player").field(signal).finish(),
            Self::ReleaseAll(_) => f.write_str("ReleaseAll"),
            Self::GetSnapshot(_) => f.write_str("GetSnapshot"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Player callbacks forwarded into the mailbox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerSignal {
    PlaybackStateChanged(PlaybackState),
    IsPlayingChanged(bool),
    PositionDiscontinuity {
        old_ms: i64,
        new_ms: i64,
        reason: DiscontinuityReason,
    },
    PlaybackSpeedChanged(f32),
}

/// How the controller handled a load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A background fetch was started.
    Started,
    /// Events for this id were already cached and are (re)injected.
    Cached,
    /// A load for this id is already in flight; the request was ignored.
    AlreadyLoading,
}
