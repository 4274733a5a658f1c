//! Observable controller state and host style settings.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the render controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControllerState {
    /// No surface bound
    Detached,
    /// Surface bound, nothing injected
    Attached { view_ready: bool },
    /// A fetch for `content_id` is in flight
    Loading { content_id: i64 },
    /// Events for `content_id` are on the surface
    Ready { content_id: i64 },
}

impl ControllerState {
    pub fn is_detached(&self) -> bool {
        matches!(self, Self::Detached)
    }
}

/// Point-in-time view of the controller, for hosts and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub state: ControllerState,
    pub is_loading: bool,
    pub enabled: bool,
    /// Content id of the current target, if any
    pub content_id: Option<i64>,
    /// Standard events held for the current target
    pub standard_count: usize,
    /// Advanced events held for the current target (merge promotions plus positional)
    pub advanced_count: usize,
    /// Load generation; bumped whenever the target changes
    pub epoch: u64,
}

/// User-facing display settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleSettings {
    /// Overall comment opacity in [0,1]
    pub opacity: f32,
    pub font_scale: f32,
    /// Scroll speed multiplier
    pub speed_factor: f32,
    /// Fraction of the screen height comments may occupy
    pub display_area_ratio: f32,
    pub merge_duplicates_enabled: bool,
}

impl Default for StyleSettings {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            font_scale: 1.0,
            speed_factor: 1.0,
            display_area_ratio: 1.0,
            merge_duplicates_enabled: true,
        }
    }
}

impl StyleSettings {
    /// Copy with every value clamped to its valid range.
    pub fn sanitized(&self) -> Self {
        Self {
            opacity: clamp_or(self.opacity, 0.0, 1.0, 1.0),
            font_scale: clamp_or(self.font_scale, 0.1, 10.0, 1.0),
            speed_factor: clamp_or(self.speed_factor, 0.1, 10.0, 1.0),
            display_area_ratio: clamp_or(self.display_area_ratio, 0.0, 1.0, 1.0),
            merge_duplicates_enabled: self.merge_duplicates_enabled,
        }
    }
}

fn clamp_or(v: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if v.is_finite() { v.clamp(min, max) } else { fallback }
}
