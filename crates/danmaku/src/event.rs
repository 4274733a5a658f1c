//! Canonical danmaku event types.
//!
//! Both wire decoders converge on these structures. Events are immutable once
//! produced and are always handed downstream sorted by their start time.

use serde::{Deserialize, Serialize};

/// Reference font size; `font_scale` is expressed relative to it.
pub const STANDARD_FONT_SIZE: f32 = 25.0;

/// How a standard comment moves across the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionType {
    /// Scrolls from right to left
    ScrollRL,
    /// Scrolls from left to right
    ScrollLR,
    /// Pinned to the top of the screen
    TopFixed,
    /// Pinned to the bottom of the screen
    BottomFixed,
}

impl Default for MotionType {
    fn default() -> Self {
        Self::ScrollRL
    }
}

impl MotionType {
    /// Map a source mode code to a motion type.
    ///
    /// Returns `None` for codes the standard layer cannot display
    /// (positional, code or reserved modes).
    pub fn from_mode(mode: i32) -> Option<Self> {
        match mode {
            1..=3 => Some(Self::ScrollRL),
            4 => Some(Self::BottomFixed),
            5 => Some(Self::TopFixed),
            6 => Some(Self::ScrollLR),
            _ => None,
        }
    }

    /// The canonical source mode code for this motion type.
    pub fn mode_code(self) -> i32 {
        match self {
            Self::ScrollRL => 1,
            Self::BottomFixed => 4,
            Self::TopFixed => 5,
            Self::ScrollLR => 6,
        }
    }
}

/// Force the alpha channel of a 0xRRGGBB color to opaque.
#[inline]
pub fn opaque_argb(rgb: u32) -> u32 {
    0xFF00_0000 | (rgb & 0x00FF_FFFF)
}

/// A single scrolling or pinned comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentEvent {
    /// Source-assigned id, 0 when absent
    pub id: u64,
    /// Hashed sender id
    pub user_hash: String,
    /// Comment text
    pub text: String,
    /// Offset from content start in milliseconds
    pub show_at_ms: i64,
    pub motion_type: MotionType,
    pub color_argb: u32,
    pub font_scale: f32,
    /// Source relevance score
    pub weight: i32,
    /// Source category
    pub pool: i32,
}

impl CommentEvent {
    /// Create a white scrolling comment with default attributes.
    pub fn new(text: impl Into<String>, show_at_ms: i64) -> Self {
        Self {
            id: 0,
            user_hash: String::new(),
            text: text.into(),
            show_at_ms: show_at_ms.max(0),
            motion_type: MotionType::ScrollRL,
            color_argb: opaque_argb(0xFF_FFFF),
            font_scale: 1.0,
            weight: 0,
            pool: 0,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_motion(mut self, motion_type: MotionType) -> Self {
        self.motion_type = motion_type;
        self
    }

    pub fn with_color(mut self, rgb: u32) -> Self {
        self.color_argb = opaque_argb(rgb);
        self
    }

    /// The 0xRRGGBB part of the color.
    pub fn color_rgb(&self) -> u32 {
        self.color_argb & 0x00FF_FFFF
    }
}

/// A positional, animated comment drawn outside the scrolling layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedCommentEvent {
    pub id: String,
    pub content: String,
    pub start_ms: i64,
    pub duration_ms: i64,
    /// Screen-relative start position in [0,1]x[0,1]
    pub start_pos: (f32, f32),
    /// Screen-relative end position; equal to `start_pos` for static placement
    pub end_pos: (f32, f32),
    pub font_size: f32,
    pub color_rgb: u32,
    pub alpha: f32,
    /// Rotation around the Z axis in degrees
    pub rotate_z: f32,
    /// Rotation around the Y axis in degrees
    pub rotate_y: f32,
    /// Final count for count-up events, 0 otherwise
    pub max_count: i32,
    /// Window over which the displayed count grows from 1 to `max_count`
    pub accumulation_ms: i64,
}

impl AdvancedCommentEvent {
    /// End of the display window (inclusive).
    pub fn end_ms(&self) -> i64 {
        self.start_ms.saturating_add(self.duration_ms)
    }

    /// Whether the event is on screen at `t`.
    pub fn is_active(&self, t: i64) -> bool {
        self.start_ms <= t && t <= self.end_ms()
    }

    /// Linear progress through the display window, clamped to [0,1].
    pub fn progress(&self, t: i64) -> f32 {
        if self.duration_ms <= 0 {
            return if t >= self.start_ms { 1.0 } else { 0.0 };
        }
        let p = (t - self.start_ms) as f64 / self.duration_ms as f64;
        p.clamp(0.0, 1.0) as f32
    }

    /// Whether this is a count-up (high-energy) event.
    pub fn is_count_up(&self) -> bool {
        self.max_count > 1
    }
}

/// Output of a wire decoder: standard events plus positional events.
///
/// Both lists are sorted ascending by their start time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodedComments {
    pub standard: Vec<CommentEvent>,
    pub advanced: Vec<AdvancedCommentEvent>,
}

impl DecodedComments {
    pub fn is_empty(&self) -> bool {
        self.standard.is_empty() && self.advanced.is_empty()
    }

    pub fn len(&self) -> usize {
        self.standard.len() + self.advanced.len()
    }

    /// Append another decode result without re-sorting.
    pub fn extend(&mut self, other: DecodedComments) {
        self.standard.extend(other.standard);
        self.advanced.extend(other.advanced);
    }

    /// Restore the time ordering of both lists.
    pub fn sort(&mut self) {
        sort_standard(&mut self.standard);
        sort_advanced(&mut self.advanced);
    }
}

/// Result of the merge pass for one content id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedResult {
    pub standard: Vec<CommentEvent>,
    pub advanced: Vec<AdvancedCommentEvent>,
}

impl MergedResult {
    pub fn is_empty(&self) -> bool {
        self.standard.is_empty() && self.advanced.is_empty()
    }
}

/// Sort standard events by `show_at_ms`; ties keep no particular order.
pub fn sort_standard(events: &mut [CommentEvent]) {
    events.sort_unstable_by_key(|e| e.show_at_ms);
}

/// Sort advanced events by `start_ms`.
pub fn sort_advanced(events: &mut [AdvancedCommentEvent]) {
    events.sort_unstable_by_key(|e| e.start_ms);
}
