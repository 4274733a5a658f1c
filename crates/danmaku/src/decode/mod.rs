//! Wire decoders.
//!
//! Two independent decoders turn fetched bytes into [`DecodedComments`]:
//!
//! - [`decode_text`] for the XML-like textual format
//! - [`decode_binary`] for segmented protobuf blobs
//!
//! Both are pure functions. Malformed records are skipped, never fatal, and
//! the output is always sorted by start time.

pub mod advanced;
pub mod binary;
pub mod compression;
pub mod text;

pub use advanced::parse_advanced_danmaku;
pub use binary::{DanmakuElem, DmSegReply, decode_binary, decode_segment};
pub use compression::{TEXT_MARKER, has_text_marker, inflate_if_needed, inflate_raw};
pub use text::decode_text;

use tracing::trace;

use crate::event::{
    CommentEvent, DecodedComments, MotionType, STANDARD_FONT_SIZE, opaque_argb,
};
use crate::fetch::{BlobFormat, RawBlob, SegmentedBlob};

/// Source mode code for positional comments.
pub const MODE_ADVANCED: i32 = 7;

/// Format-neutral comment record shared by both decoders.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: u64,
    pub mode: i32,
    pub progress_ms: i64,
    pub font_size: f32,
    /// 0xRRGGBB
    pub color: u32,
    pub content: String,
    pub weight: i32,
    pub pool: i32,
    pub user_hash: String,
}

impl RawRecord {
    fn into_comment(self, motion_type: MotionType) -> CommentEvent {
        let font_scale = if self.font_size > 0.0 {
            self.font_size / STANDARD_FONT_SIZE
        } else {
            1.0
        };
        CommentEvent {
            id: self.id,
            user_hash: self.user_hash,
            text: self.content,
            show_at_ms: self.progress_ms.max(0),
            motion_type,
            color_argb: opaque_argb(self.color),
            font_scale,
            weight: self.weight,
            pool: self.pool,
        }
    }
}

/// Route a decoded record to the standard or advanced list.
pub(crate) fn push_record(record: RawRecord, out: &mut DecodedComments) {
    if record.content.is_empty() {
        trace!(id = record.id, "Skipping empty comment");
        return;
    }

    if record.mode == MODE_ADVANCED {
        match parse_advanced_danmaku(&record) {
            Some(advanced) => out.advanced.push(advanced),
            None => out.standard.push(record.into_comment(MotionType::ScrollRL)),
        }
        return;
    }

    match MotionType::from_mode(record.mode) {
        Some(motion) => out.standard.push(record.into_comment(motion)),
        None => trace!(id = record.id, mode = record.mode, "Skipping unsupported mode"),
    }
}

/// Decode a single fetched blob according to its sniffed format.
pub fn decode_blob(blob: &RawBlob) -> DecodedComments {
    match blob.format {
        BlobFormat::Text => decode_text(&blob.bytes),
        BlobFormat::Binary => decode_binary(std::slice::from_ref(&blob.bytes)),
    }
}

/// Decode every segment of a segmented blob.
pub fn decode_segments(blob: &SegmentedBlob) -> DecodedComments {
    decode_binary(blob.segments.as_slice())
}
