//! Render controller.
//!
//! The controller is an actor: a single tokio task owns all mutable state and
//! is the only place that calls into the [`RenderSurface`]. Hosts talk to it
//! through a [`ControllerHandle`]; the media player talks to it through a
//! listener that posts into the same mailbox.
//!
//! Loads run on separate tasks and report back with a [`ControllerMessage::LoadFinished`]
//! tagged by epoch. The epoch is bumped whenever the target content changes,
//! so results from a superseded load are dropped without touching the surface.

mod handle;
mod messages;
mod player;
mod state;
mod surface;

pub use handle::ControllerHandle;
pub use messages::{ControllerMessage, LoadOutcome, PlayerSignal};
pub use player::{DiscontinuityReason, ListenerId, MediaPlayer, PlaybackState, PlayerListener};
pub use state::{ControllerSnapshot, ControllerState, StyleSettings};
pub use surface::{RenderSurface, SurfaceGeneration};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::fetch::BlobFetcher;
use crate::loader::{LoadedSession, load_session};
use crate::merge::MergeConfig;
use crate::render::{AdvancedLayer, AdvancedRenderer};
use player::PlayerForwarder;

struct BoundPlayer {
    player: Arc<dyn MediaPlayer>,
    listener: ListenerId,
}

struct LoadTask {
    content_id: i64,
    merge_enabled: bool,
    cancel: CancellationToken,
}

/// Injection waiting for the surface to finish preparing.
struct PendingInjection {
    attempts: u32,
    next_poll: Instant,
}

/// State owned by the controller task.
pub struct RenderController {
    fetcher: Arc<BlobFetcher>,
    config: EngineConfig,
    mailbox: mpsc::Receiver<ControllerMessage>,
    self_sender: mpsc::WeakSender<ControllerMessage>,
    cancellation_token: CancellationToken,
    layer: AdvancedLayer,

    surface: Option<Arc<dyn RenderSurface>>,
    /// Bumped on every new attachment
    surface_generation: u64,
    view_ready: bool,
    /// Whether the current session's events are on the current surface
    injected: bool,
    pending_injection: Option<PendingInjection>,

    player: Option<BoundPlayer>,
    enabled: bool,
    style: StyleSettings,

    epoch: u64,
    target: Option<i64>,
    loading: Option<LoadTask>,
    session: Option<LoadedSession>,
}

impl RenderController {
    /// Start a controller on the current tokio runtime.
    pub fn spawn(fetcher: Arc<BlobFetcher>, config: EngineConfig) -> ControllerHandle {
        let (sender, mailbox) = mpsc::channel(config.controller.mailbox_capacity.max(1));
        let cancellation_token = CancellationToken::new();
        let layer = AdvancedLayer::new(AdvancedRenderer::new(&config.renderer));

        let controller = Self {
            fetcher,
            config,
            mailbox,
            self_sender: sender.downgrade(),
            cancellation_token: cancellation_token.clone(),
            layer: layer.clone(),
            surface: None,
            surface_generation: 0,
            view_ready: false,
            injected: false,
            pending_injection: None,
            player: None,
            enabled: true,
            style: StyleSettings::default(),
            epoch: 0,
            target: None,
            loading: None,
            session: None,
        };
        tokio::spawn(controller.run());

        ControllerHandle::new(sender, cancellation_token, layer)
    }

    async fn run(mut self) {
        debug!("Render controller started");

        loop {
            let poll_at = self.pending_injection.as_ref().map(|p| p.next_poll);

            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    debug!("Render controller cancelled");
                    break;
                }

                msg = self.mailbox.recv() => {
                    let Some(msg) = msg else {
                        debug!("All controller handles dropped");
                        break;
                    };
                    trace!(?msg, "Controller message");
                    if self.handle_message(msg) {
                        break;
                    }
                }

                _ = Self::poll_timer(poll_at) => {
                    self.poll_injection();
                }
            }
        }

        self.release_all();
        debug!("Render controller stopped");
    }

    /// Pending forever when nothing waits for the surface.
    async fn poll_timer(at: Option<Instant>) {
        match at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    /// Returns true when the controller should stop.
    fn handle_message(&mut self, msg: ControllerMessage) -> bool {
        match msg {
            ControllerMessage::AttachSurface { surface, reply } => {
                let generation = self.attach_surface(surface);
                let _ = reply.send(generation);
            }
            ControllerMessage::DetachSurface => self.detach_surface(),
            ControllerMessage::Load {
                content_id,
                duration_hint_ms,
                reply,
            } => {
                let outcome = self.load(content_id, duration_hint_ms);
                let _ = reply.send(outcome);
            }
            ControllerMessage::LoadFinished {
                epoch,
                content_id,
                result,
            } => self.on_load_finished(epoch, content_id, result),
            ControllerMessage::SetEnabled(enabled) => self.set_enabled(enabled),
            ControllerMessage::UpdateStyle(style) => self.update_style(style),
            ControllerMessage::BindPlayer(player) => self.bind_player(player),
            ControllerMessage::SurfacePrepared(generation) => self.on_surface_prepared(generation),
            ControllerMessage::Player(signal) => self.on_player_signal(signal),
            ControllerMessage::ReleaseAll(reply) => {
                self.release_all();
                let _ = reply.send(());
            }
            ControllerMessage::GetSnapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            ControllerMessage::Shutdown => return true,
        }
        false
    }

    fn attach_surface(&mut self, surface: Arc<dyn RenderSurface>) -> SurfaceGeneration {
        if let Some(current) = &self.surface {
            if std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(&surface)) {
                debug!("Surface already attached");
                return SurfaceGeneration(self.surface_generation);
            }
        }

        if let Some(old) = self.surface.take() {
            old.pause();
            old.hide();
            old.release();
            debug!("Released previous render surface");
        }

        self.injected = false;
        self.pending_injection = None;

        surface.apply_style(&self.style);
        if let Some(bound) = &self.player {
            surface.set_playback_speed(bound.player.playback_speed());
        }
        self.surface_generation += 1;
        surface.prepare();
        self.view_ready = surface.is_prepared();
        self.surface = Some(surface);
        debug!(
            content_id = ?self.target,
            generation = self.surface_generation,
            "Attached render surface"
        );

        self.try_inject();
        SurfaceGeneration(self.surface_generation)
    }

    fn detach_surface(&mut self) {
        let Some(surface) = self.surface.take() else {
            return;
        };
        surface.pause();
        surface.hide();

        self.view_ready = false;
        self.injected = false;
        self.pending_injection = None;
        self.layer.set_visible(false);

        debug!(
            content_id = ?self.target,
            loading = self.loading.is_some(),
            "Detached render surface"
        );
    }

    fn load(&mut self, content_id: i64, duration_hint_ms: i64) -> LoadOutcome {
        if let Some(task) = &self.loading {
            if task.content_id == content_id {
                debug!(content_id, "Danmaku load already in flight");
                return LoadOutcome::AlreadyLoading;
            }
        }

        if self
            .session
            .as_ref()
            .is_some_and(|s| s.content_id == content_id)
        {
            debug!(content_id, "Reusing cached danmaku");
            self.try_inject();
            return LoadOutcome::Cached;
        }

        self.begin_load(content_id, duration_hint_ms);
        LoadOutcome::Started
    }

    fn begin_load(&mut self, content_id: i64, duration_hint_ms: i64) {
        if let Some(task) = self.loading.take() {
            task.cancel.cancel();
            debug!(content_id = task.content_id, "Cancelled superseded danmaku load");
        }

        self.epoch += 1;
        self.target = Some(content_id);
        self.session = None;
        self.injected = false;
        self.pending_injection = None;
        if let Some(surface) = &self.surface {
            surface.clear();
        }
        self.layer.clear();

        let epoch = self.epoch;
        let cancel = self.cancellation_token.child_token();
        let token = cancel.clone();
        let fetcher = self.fetcher.clone();
        let merge_config = self.merge_config();
        let sender = self.self_sender.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => {
                    debug!(content_id, epoch, "Danmaku load cancelled");
                    return;
                }
                result = load_session(&fetcher, content_id, duration_hint_ms, &merge_config) => result,
            };

            let Some(sender) = sender.upgrade() else {
                return;
            };
            let msg = ControllerMessage::LoadFinished {
                epoch,
                content_id,
                result,
            };
            if sender.send(msg).await.is_err() {
                debug!(content_id, epoch, "Controller stopped before load finished");
            }
        });

        self.loading = Some(LoadTask {
            content_id,
            merge_enabled: self.style.merge_duplicates_enabled,
            cancel,
        });
        debug!(content_id, epoch, duration_hint_ms, "Started danmaku load");
    }

    fn on_load_finished(&mut self, epoch: u64, content_id: i64, result: Result<LoadedSession>) {
        if epoch != self.epoch || self.target != Some(content_id) {
            debug!(
                content_id,
                epoch,
                current_epoch = self.epoch,
                "Discarding stale danmaku load"
            );
            return;
        }

        let task = self.loading.take();

        match result {
            Ok(mut session) => {
                let merge_enabled = self.style.merge_duplicates_enabled;
                if task.is_some_and(|t| t.merge_enabled != merge_enabled) {
                    session = session.remerge(&self.merge_config());
                }
                debug!(
                    content_id,
                    epoch,
                    standard = session.merged.standard.len(),
                    advanced = session.merged.advanced.len() + session.decoded.advanced.len(),
                    "Danmaku load finished"
                );
                self.session = Some(session);
                self.try_inject();
            }
            Err(e) => {
                warn!(content_id, error = %e, "Failed to load danmaku, continuing without comments");
            }
        }
    }

    fn on_surface_prepared(&mut self, generation: SurfaceGeneration) {
        if self.surface.is_none() || generation.0 != self.surface_generation {
            debug!(
                generation = generation.0,
                current = self.surface_generation,
                attached = self.surface.is_some(),
                "Discarding stale surface prepared signal"
            );
            return;
        }
        self.view_ready = true;
        self.try_inject();
    }

    /// Inject the cached session now, or wait for the surface to be prepared.
    fn try_inject(&mut self) {
        if self.injected || self.session.is_none() {
            return;
        }
        let Some(surface) = self.surface.clone() else {
            return;
        };

        if !self.view_ready && surface.is_prepared() {
            self.view_ready = true;
        }
        if self.view_ready {
            self.inject(&surface);
            return;
        }

        if self.pending_injection.is_none() {
            debug!(content_id = ?self.target, "Surface not prepared, waiting to inject");
            self.pending_injection = Some(PendingInjection {
                attempts: 0,
                next_poll: Instant::now() + self.config.controller.ready_poll_interval(),
            });
        }
    }

    fn poll_injection(&mut self) {
        let Some(mut pending) = self.pending_injection.take() else {
            return;
        };
        if self.injected || self.session.is_none() {
            return;
        }
        let Some(surface) = self.surface.clone() else {
            return;
        };

        pending.attempts += 1;
        if surface.is_prepared() {
            self.view_ready = true;
            self.inject(&surface);
            return;
        }

        if pending.attempts >= self.config.controller.ready_poll_max_attempts {
            warn!(
                content_id = ?self.target,
                attempts = pending.attempts,
                "Surface never became ready, dropping danmaku injection"
            );
            return;
        }

        pending.next_poll += self.config.controller.ready_poll_interval();
        self.pending_injection = Some(pending);
    }

    fn inject(&mut self, surface: &Arc<dyn RenderSurface>) {
        let Some(session) = &self.session else {
            return;
        };
        self.pending_injection = None;

        surface.clear();
        for event in &session.merged.standard {
            surface.add_event(event);
        }
        let advanced = session.advanced_events();
        let content_id = session.content_id;
        let standard = session.merged.standard.len();
        let advanced_count = advanced.len();

        self.layer.set_events(advanced);
        surface.start();
        self.injected = true;

        debug!(
            content_id,
            epoch = self.epoch,
            standard,
            advanced = advanced_count,
            "Injected danmaku"
        );

        self.apply_visibility();
    }

    /// Match surface visibility and clock to `enabled` and the player.
    fn apply_visibility(&self) {
        self.layer.set_visible(self.enabled);
        let Some(surface) = &self.surface else {
            return;
        };
        if self.enabled {
            self.resync(surface.as_ref());
            surface.show();
        } else {
            surface.pause();
            surface.hide();
        }
    }

    /// Re-align the surface clock to the player.
    fn resync(&self, surface: &dyn RenderSurface) {
        match &self.player {
            Some(bound) => align(
                surface,
                bound.player.current_position_ms(),
                bound.player.is_playing(),
            ),
            None => surface.resume(),
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        debug!(enabled, "Danmaku display toggled");

        if self.injected {
            self.apply_visibility();
        } else {
            self.layer.set_visible(enabled);
        }
    }

    fn update_style(&mut self, style: StyleSettings) {
        let style = style.sanitized();
        let remerge = style.merge_duplicates_enabled != self.style.merge_duplicates_enabled;
        self.style = style;

        self.layer.set_opacity(self.style.opacity);
        if let Some(surface) = &self.surface {
            surface.apply_style(&self.style);
        }

        if remerge {
            if let Some(session) = &self.session {
                let session = session.remerge(&self.merge_config());
                debug!(
                    content_id = session.content_id,
                    merge = self.style.merge_duplicates_enabled,
                    "Re-merged cached danmaku"
                );
                self.session = Some(session);
                if self.injected {
                    self.injected = false;
                    self.try_inject();
                }
            }
        }
    }

    fn bind_player(&mut self, player: Option<Arc<dyn MediaPlayer>>) {
        if let Some(bound) = self.player.take() {
            bound.player.remove_listener(bound.listener);
            debug!("Unbound media player");
        }

        let Some(player) = player else {
            return;
        };
        let listener = player.add_listener(Arc::new(PlayerForwarder::new(self.self_sender.clone())));
        if let Some(surface) = &self.surface {
            surface.set_playback_speed(player.playback_speed());
        }
        self.player = Some(BoundPlayer { player, listener });
        debug!("Bound media player");

        if let Some(surface) = self.synced_surface() {
            self.resync(surface.as_ref());
        }
    }

    /// The surface, when it is showing injected comments.
    fn synced_surface(&self) -> Option<Arc<dyn RenderSurface>> {
        if self.view_ready && self.injected && self.enabled {
            self.surface.clone()
        } else {
            None
        }
    }

    fn on_player_signal(&mut self, signal: PlayerSignal) {
        if let PlayerSignal::PlaybackSpeedChanged(speed) = signal {
            if let Some(surface) = &self.surface {
                surface.set_playback_speed(speed);
            }
            return;
        }

        let Some(surface) = self.synced_surface() else {
            trace!(?signal, "Ignoring player signal");
            return;
        };
        let position = self
            .player
            .as_ref()
            .map(|b| b.player.current_position_ms());

        match signal {
            PlayerSignal::IsPlayingChanged(playing) => match position {
                Some(position) => align(surface.as_ref(), position, playing),
                None if playing => surface.resume(),
                None => surface.pause(),
            },
            PlayerSignal::PlaybackStateChanged(PlaybackState::Ready) => {
                self.resync(surface.as_ref());
            }
            PlayerSignal::PlaybackStateChanged(state) => {
                trace!(?state, "Pausing danmaku");
                surface.pause();
            }
            PlayerSignal::PositionDiscontinuity {
                old_ms,
                new_ms,
                reason,
            } => {
                debug!(old_ms, new_ms, ?reason, "Resyncing danmaku after discontinuity");
                let playing = self.player.as_ref().is_some_and(|b| b.player.is_playing());
                align(surface.as_ref(), new_ms, playing);
            }
            PlayerSignal::PlaybackSpeedChanged(_) => {}
        }
    }

    fn release_all(&mut self) {
        if let Some(task) = self.loading.take() {
            task.cancel.cancel();
        }
        self.epoch += 1;
        self.target = None;
        self.session = None;
        self.pending_injection = None;

        if let Some(surface) = self.surface.take() {
            surface.pause();
            surface.hide();
            surface.release();
        }
        self.view_ready = false;
        self.injected = false;

        if let Some(bound) = self.player.take() {
            bound.player.remove_listener(bound.listener);
        }

        self.layer.clear();
        self.fetcher.clear();
        debug!("Released danmaku controller resources");
    }

    fn merge_config(&self) -> MergeConfig {
        MergeConfig {
            enabled: self.config.merge.enabled && self.style.merge_duplicates_enabled,
            ..self.config.merge.clone()
        }
    }

    fn state(&self) -> ControllerState {
        match (&self.surface, &self.loading, &self.session) {
            (None, _, _) => ControllerState::Detached,
            (Some(_), Some(task), _) => ControllerState::Loading {
                content_id: task.content_id,
            },
            (Some(_), None, Some(session)) if self.injected => ControllerState::Ready {
                content_id: session.content_id,
            },
            (Some(_), _, _) => ControllerState::Attached {
                view_ready: self.view_ready,
            },
        }
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            state: self.state(),
            is_loading: self.loading.is_some(),
            enabled: self.enabled,
            content_id: self.target,
            standard_count: self
                .session
                .as_ref()
                .map_or(0, |s| s.merged.standard.len()),
            advanced_count: self
                .session
                .as_ref()
                .map_or(0, |s| s.merged.advanced.len() + s.decoded.advanced.len()),
            epoch: self.epoch,
        }
    }
}

fn align(surface: &dyn RenderSurface, position_ms: i64, playing: bool) {
    surface.seek_to(position_ms);
    if playing {
        surface.resume();
    } else {
        surface.pause();
    }
}
