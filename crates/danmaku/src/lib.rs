//! Danmaku: playback-synchronized comment overlay engine.
//!
//! This crate fetches time-coded viewer comments for a piece of video content,
//! decodes them from either wire format, compacts duplicate bursts and drives
//! a host-owned rendering surface in lock-step with a media player.
//!
//! ## Core Types
//!
//! - [`CommentEvent`] - A scrolling or pinned comment
//! - [`AdvancedCommentEvent`] - A positional or count-up comment
//! - [`DecodedComments`] / [`MergedResult`] - Decoder and merge outputs
//!
//! ## Decoding
//!
//! - [`decode::decode_text`] - XML-like textual format
//! - [`decode::decode_binary`] - Segmented protobuf format
//!
//! ## Fetching
//!
//! - [`CommentSource`] - Trait for the network/auth collaborator
//! - [`BlobFetcher`] - Bounded caches for raw and segmented blobs
//!
//! ## Merge & Render
//!
//! - [`merge()`] - Duplicate-burst merging with high-energy promotion
//! - [`AdvancedRenderer`] / [`AdvancedLayer`] - Per-frame advanced comment layout
//!
//! ## Controller
//!
//! - [`RenderController`] - Actor owning the surface lifecycle
//! - [`ControllerHandle`] - Cloneable handle used by the host screen
//! - [`RenderSurface`] / [`MediaPlayer`] - Host collaborator traits

pub mod config;
pub mod controller;
pub mod decode;
pub mod error;
pub mod event;
pub mod fetch;
pub mod loader;
pub mod merge;
pub mod render;

pub use config::{ControllerConfig, EngineConfig, FetchConfig, RendererConfig};
pub use controller::{
    ControllerHandle, ControllerSnapshot, ControllerState, DiscontinuityReason, ListenerId,
    LoadOutcome, MediaPlayer, PlaybackState, PlayerListener, RenderController, RenderSurface,
    StyleSettings, SurfaceGeneration,
};
pub use decode::{decode_binary, decode_blob, decode_segments, decode_text};
pub use error::{DanmakuError, Result};
pub use event::{
    AdvancedCommentEvent, CommentEvent, DecodedComments, MergedResult, MotionType,
    STANDARD_FONT_SIZE,
};
pub use fetch::{BlobFetcher, BlobFormat, CommentSource, RawBlob, SegmentedBlob};
pub use loader::{LoadedSession, load_session};
pub use merge::{MergeConfig, merge};
pub use render::{AdvancedLayer, AdvancedRenderer, RenderedAdvanced};
