//! Per-frame computation for positional and count-up comments.
//!
//! The renderer is stateless: every frame is derived from `(event, now)`, so
//! a seek needs no bookkeeping. [`AdvancedLayer`] holds the events the
//! controller injected and is read from the host's redraw loop.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

use crate::config::RendererConfig;
use crate::event::AdvancedCommentEvent;

/// One advanced comment as it should be drawn at a given instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedAdvanced {
    pub id: String,
    pub text: String,
    /// Screen-relative position in [0,1]
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
    /// Color including the effective alpha
    pub color_argb: u32,
    pub alpha: f32,
    pub rotate_z: f32,
    pub rotate_y: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct AdvancedRenderer {
    boundary_buffer_ms: i64,
}

impl Default for AdvancedRenderer {
    fn default() -> Self {
        Self::new(&RendererConfig::default())
    }
}

impl AdvancedRenderer {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            boundary_buffer_ms: config.boundary_buffer_ms.max(0),
        }
    }

    /// Whether `event` is drawn at `now_ms`, including the boundary buffer.
    pub fn is_visible(&self, event: &AdvancedCommentEvent, now_ms: i64) -> bool {
        let from = event.start_ms.saturating_sub(self.boundary_buffer_ms);
        let to = event.end_ms().saturating_add(self.boundary_buffer_ms);
        from <= now_ms && now_ms <= to
    }

    /// Displayed count of a count-up event at `now_ms`.
    ///
    /// Grows from 1 to `max_count` over `accumulation_ms`, then holds.
    pub fn count_at(event: &AdvancedCommentEvent, now_ms: i64) -> i32 {
        let max = event.max_count.max(1);
        let elapsed = now_ms - event.start_ms;
        if event.accumulation_ms <= 0 || elapsed >= event.accumulation_ms {
            return max;
        }
        if elapsed <= 0 {
            return 1;
        }
        let grown = (i64::from(max - 1) * elapsed) / event.accumulation_ms;
        (1 + grown as i32).min(max)
    }

    /// Text drawn for `event` at `now_ms`.
    pub fn text_at(event: &AdvancedCommentEvent, now_ms: i64) -> String {
        if event.is_count_up() {
            format!("{} ×{}", event.content, Self::count_at(event, now_ms))
        } else {
            event.content.clone()
        }
    }

    /// Render one event, or `None` when it is outside its window.
    pub fn render(
        &self,
        event: &AdvancedCommentEvent,
        now_ms: i64,
        opacity: f32,
    ) -> Option<RenderedAdvanced> {
        if !self.is_visible(event, now_ms) {
            return None;
        }

        let p = event.progress(now_ms);
        let x = lerp(event.start_pos.0, event.end_pos.0, p);
        let y = lerp(event.start_pos.1, event.end_pos.1, p);
        let alpha = (event.alpha * opacity).clamp(0.0, 1.0);
        let alpha_byte = (alpha * 255.0).round() as u32;

        Some(RenderedAdvanced {
            id: event.id.clone(),
            text: Self::text_at(event, now_ms),
            x,
            y,
            font_size: event.font_size,
            color_argb: (alpha_byte << 24) | (event.color_rgb & 0x00FF_FFFF),
            alpha,
            rotate_z: event.rotate_z,
            rotate_y: event.rotate_y,
        })
    }

    /// Render every event visible at `now_ms`, in input order.
    pub fn frame(
        &self,
        events: &[AdvancedCommentEvent],
        now_ms: i64,
        opacity: f32,
    ) -> Vec<RenderedAdvanced> {
        events
            .iter()
            .filter_map(|e| self.render(e, now_ms, opacity))
            .collect()
    }
}

#[inline]
fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t
}

#[derive(Debug)]
struct LayerState {
    events: Vec<AdvancedCommentEvent>,
    visible: bool,
    opacity: f32,
}

/// Shared advanced-comment layer.
///
/// Cloning yields another handle to the same layer.
#[derive(Debug, Clone)]
pub struct AdvancedLayer {
    state: Arc<RwLock<LayerState>>,
    renderer: AdvancedRenderer,
}

impl Default for AdvancedLayer {
    fn default() -> Self {
        Self::new(AdvancedRenderer::default())
    }
}

impl AdvancedLayer {
    pub fn new(renderer: AdvancedRenderer) -> Self {
        Self {
            state: Arc::new(RwLock::new(LayerState {
                events: Vec::new(),
                visible: true,
                opacity: 1.0,
            })),
            renderer,
        }
    }

    /// Replace the layer contents.
    pub fn set_events(&self, events: Vec<AdvancedCommentEvent>) {
        self.state.write().events = events;
    }

    pub fn clear(&self) {
        self.state.write().events.clear();
    }

    pub fn set_visible(&self, visible: bool) {
        self.state.write().visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.state.read().visible
    }

    pub fn set_opacity(&self, opacity: f32) {
        self.state.write().opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn opacity(&self) -> f32 {
        self.state.read().opacity
    }

    pub fn len(&self) -> usize {
        self.state.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().events.is_empty()
    }

    /// Copy of the injected events.
    pub fn events(&self) -> Vec<AdvancedCommentEvent> {
        self.state.read().events.clone()
    }

    /// Everything to draw at `now_ms`. Empty while the layer is hidden.
    pub fn frame(&self, now_ms: i64) -> Vec<RenderedAdvanced> {
        let state = self.state.read();
        if !state.visible {
            return Vec::new();
        }
        self.renderer.frame(&state.events, now_ms, state.opacity)
    }
}
