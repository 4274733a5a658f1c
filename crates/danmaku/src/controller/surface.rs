//! The rendering surface the controller drives.

use crate::event::CommentEvent;

use super::state::StyleSettings;

/// One attachment of a surface to the controller.
///
/// Returned by [`ControllerHandle::attach_surface`](super::ControllerHandle::attach_surface)
/// and passed back with the prepared signal, so a callback from a surface
/// that has since been replaced is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceGeneration(pub u64);

/// A host-owned view that draws standard comments against its own clock.
///
/// Every method is invoked from the controller task only, one call at a time.
/// Implementations forward to the host UI toolkit.
pub trait RenderSurface: Send + Sync {
    /// Begin the prepare handshake. The surface reports completion through
    /// [`ControllerHandle::surface_prepared`](super::ControllerHandle::surface_prepared)
    /// with the generation its attach returned, or by returning `true` from
    /// [`is_prepared`](Self::is_prepared).
    fn prepare(&self);

    fn is_prepared(&self) -> bool;

    /// Queue one event; events arrive in time order.
    fn add_event(&self, event: &CommentEvent);

    /// Start the surface clock.
    fn start(&self);

    /// Move the surface clock, discarding anything drawn for the old position.
    fn seek_to(&self, position_ms: i64);

    fn pause(&self);

    fn resume(&self);

    fn show(&self);

    fn hide(&self);

    /// Drop every queued and visible event.
    fn clear(&self);

    /// Free the surface. No further calls follow.
    fn release(&self);

    fn apply_style(&self, _style: &StyleSettings) {}

    fn set_playback_speed(&self, _speed: f32) {}
}
