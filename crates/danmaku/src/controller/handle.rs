//! Cloneable handle for talking to a running controller.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::messages::{ControllerMessage, LoadOutcome};
use super::player::MediaPlayer;
use super::state::{ControllerSnapshot, StyleSettings};
use super::surface::{RenderSurface, SurfaceGeneration};
use crate::error::{DanmakuError, Result};
use crate::render::AdvancedLayer;

/// Front door of a [`RenderController`](super::RenderController).
///
/// All calls enqueue a message; the controller applies them in order on its
/// own task. Dropping every handle stops the controller.
#[derive(Clone)]
pub struct ControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancellation_token: CancellationToken,
    layer: AdvancedLayer,
}

impl ControllerHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<ControllerMessage>,
        cancellation_token: CancellationToken,
        layer: AdvancedLayer,
    ) -> Self {
        Self {
            sender,
            cancellation_token,
            layer,
        }
    }

    async fn send(&self, msg: ControllerMessage) -> Result<()> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| DanmakuError::ControllerStopped)
    }

    async fn request<T>(&self, f: impl FnOnce(oneshot::Sender<T>) -> ControllerMessage) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(f(tx)).await?;
        rx.await.map_err(|_| DanmakuError::ControllerStopped)
    }

    /// Bind `surface`. The returned generation identifies this attachment in
    /// [`surface_prepared`](Self::surface_prepared); attaching the surface that
    /// is already bound returns its current generation.
    pub async fn attach_surface(&self, surface: Arc<dyn RenderSurface>) -> Result<SurfaceGeneration> {
        self.request(|reply| ControllerMessage::AttachSurface { surface, reply })
            .await
    }

    pub async fn detach_surface(&self) -> Result<()> {
        self.send(ControllerMessage::DetachSurface).await
    }

    /// Request comments for `content_id`. `duration_hint_ms` is 0 when unknown.
    pub async fn load(&self, content_id: i64, duration_hint_ms: i64) -> Result<LoadOutcome> {
        self.request(|reply| ControllerMessage::Load {
            content_id,
            duration_hint_ms,
            reply,
        })
        .await
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.send(ControllerMessage::SetEnabled(enabled)).await
    }

    pub async fn update_style_settings(&self, style: StyleSettings) -> Result<()> {
        self.send(ControllerMessage::UpdateStyle(style)).await
    }

    pub async fn bind_player(&self, player: Arc<dyn MediaPlayer>) -> Result<()> {
        self.send(ControllerMessage::BindPlayer(Some(player))).await
    }

    pub async fn unbind_player(&self) -> Result<()> {
        self.send(ControllerMessage::BindPlayer(None)).await
    }

    /// Report that the surface attached as `generation` finished preparing.
    pub async fn surface_prepared(&self, generation: SurfaceGeneration) -> Result<()> {
        self.send(ControllerMessage::SurfacePrepared(generation)).await
    }

    /// Drop cached data, cancel loads and release every external reference.
    /// Resolves once the controller has done so.
    pub async fn release_all(&self) -> Result<()> {
        self.request(ControllerMessage::ReleaseAll).await
    }

    pub async fn snapshot(&self) -> Result<ControllerSnapshot> {
        self.request(ControllerMessage::GetSnapshot).await
    }

    /// The layer holding advanced events, for the host's redraw loop.
    pub fn advanced_layer(&self) -> AdvancedLayer {
        self.layer.clone()
    }

    /// Stop the controller. Falls back to cancellation when the mailbox is gone.
    pub async fn shutdown(&self) {
        if self.send(ControllerMessage::Shutdown).await.is_err() {
            self.cancellation_token.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
