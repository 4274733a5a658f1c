//! Decoder for segmented binary (protobuf) comment blobs.
//!
//! Every segment is an independent `DmSegReply` message whose repeated
//! `elems` field is the length-delimited sequence of comment records.

use prost::Message as ProstMessage;
use tracing::{debug, warn};

use super::compression::{has_text_marker, inflate_raw};
use super::{RawRecord, push_record};
use crate::error::Result;
use crate::event::DecodedComments;

/// One comment record on the binary wire.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DanmakuElem {
    #[prost(int64, tag = "1")]
    pub id: i64,
    /// Offset from content start in milliseconds
    #[prost(int32, tag = "2")]
    pub progress: i32,
    #[prost(int32, tag = "3")]
    pub mode: i32,
    #[prost(int32, tag = "4")]
    pub fontsize: i32,
    /// 0xRRGGBB
    #[prost(uint32, tag = "5")]
    pub color: u32,
    #[prost(string, tag = "6")]
    pub mid_hash: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub content: ::prost::alloc::string::String,
    #[prost(int64, tag = "8")]
    pub ctime: i64,
    #[prost(int32, tag = "9")]
    pub weight: i32,
    #[prost(string, tag = "10")]
    pub action: ::prost::alloc::string::String,
    #[prost(int32, tag = "11")]
    pub pool: i32,
    #[prost(string, tag = "12")]
    pub id_str: ::prost::alloc::string::String,
}

/// A single binary segment.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DmSegReply {
    #[prost(message, repeated, tag = "1")]
    pub elems: ::prost::alloc::vec::Vec<DanmakuElem>,
}

impl From<DanmakuElem> for RawRecord {
    fn from(elem: DanmakuElem) -> Self {
        let id = if elem.id > 0 {
            elem.id as u64
        } else {
            elem.id_str.parse().unwrap_or(0)
        };
        Self {
            id,
            mode: elem.mode,
            progress_ms: i64::from(elem.progress),
            font_size: elem.fontsize as f32,
            color: elem.color,
            content: elem.content,
            weight: elem.weight,
            pool: elem.pool,
            user_hash: elem.mid_hash,
        }
    }
}

/// Decode one segment, trying the inflated form first when the bytes are not
/// textual and falling back to the bytes as fetched.
///
/// An inflated candidate only wins when it yields records: prost skips
/// unknown fields, so inflating an uncompressed segment can produce junk that
/// still parses as an empty reply.
pub fn decode_segment(data: &[u8]) -> Result<DmSegReply> {
    if !data.is_empty() && !has_text_marker(data) {
        if let Ok(inflated) = inflate_raw(data) {
            match DmSegReply::decode(inflated.as_slice()) {
                Ok(reply) if !reply.elems.is_empty() => return Ok(reply),
                _ => {}
            }
        }
    }
    Ok(DmSegReply::decode(data)?)
}

/// Decode a list of binary segments into canonical events.
///
/// Segments are decoded independently; a corrupt segment is logged and
/// skipped without affecting the others. The result is sorted by start time.
pub fn decode_binary<S: AsRef<[u8]>>(segments: &[S]) -> DecodedComments {
    let mut out = DecodedComments::default();

    for (index, segment) in segments.iter().enumerate() {
        let segment = segment.as_ref();
        match decode_segment(segment) {
            Ok(reply) => {
                let before = out.len();
                for elem in reply.elems {
                    push_record(elem.into(), &mut out);
                }
                debug!(
                    segment = index,
                    decoded = out.len() - before,
                    "Decoded binary danmaku segment"
                );
            }
            Err(e) => warn!(
                segment = index,
                len = segment.len(),
                error = %e,
                "Skipping undecodable danmaku segment"
            ),
        }
    }

    out.sort();
    out
}

#[cfg(test)]
pub(crate) fn encode_segment(elems: Vec<DanmakuElem>) -> Vec<u8> {
    DmSegReply { elems }.encode_to_vec()
}

#[cfg(test)]
pub(crate) fn elem(id: i64, progress: i32, mode: i32, content: &str) -> DanmakuElem {
    DanmakuElem {
        id,
        progress,
        mode,
        fontsize: 25,
        color: 0xFFFFFF,
        mid_hash: format!("hash{}", id),
        content: content.to_string(),
        ..Default::default()
    }
}
