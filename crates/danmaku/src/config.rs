//! Engine configuration.
//!
//! Every section deserializes with defaults, so a partial TOML or JSON
//! document only needs to name the values it overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::fetch::DEFAULT_CACHE_CAPACITY;
use crate::merge::MergeConfig;

/// Length of one binary comment segment (6 minutes).
pub const DEFAULT_SEGMENT_DURATION_MS: i64 = 360_000;

/// Aggregated configuration for the danmaku engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fetch: FetchConfig,
    pub merge: MergeConfig,
    pub controller: ControllerConfig,
    pub renderer: RendererConfig,
}

/// Blob fetch and cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Distinct content ids kept per cache
    pub cache_capacity: usize,
    /// Playback time covered by one binary segment
    pub segment_duration_ms: i64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            segment_duration_ms: DEFAULT_SEGMENT_DURATION_MS,
        }
    }
}

/// Render controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Delay between checks for a prepared surface
    pub ready_poll_interval_ms: u64,
    /// Checks before an injection attempt is dropped
    pub ready_poll_max_attempts: u32,
    /// Capacity of the controller mailbox
    pub mailbox_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ready_poll_interval_ms: 50,
            ready_poll_max_attempts: 60,
            mailbox_capacity: 256,
        }
    }
}

impl ControllerConfig {
    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms.max(1))
    }
}

/// Advanced-layer renderer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Symmetric window around an event's lifetime that still renders it
    pub boundary_buffer_ms: i64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            boundary_buffer_ms: 100,
        }
    }
}
