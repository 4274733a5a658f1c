//! Comment blob retrieval.
//!
//! [`BlobFetcher`] sits between the network collaborator ([`CommentSource`])
//! and the decoders. It keeps two independent bounded caches, one for single
//! raw blobs and one for segmented binary blobs, so that rebuilding a view
//! does not trigger another network round-trip.

pub mod cache;

pub use cache::{BlobCache, BoundedLru, DEFAULT_CACHE_CAPACITY};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::decode::compression::{has_text_marker, inflate_if_needed};
use crate::error::{DanmakuError, Result};
use crate::loader::run_blocking;

/// Network/auth collaborator that delivers comment bytes.
///
/// Implementations own transport, signing and session handling. Errors are
/// treated as "no data for this attempt".
#[async_trait]
pub trait CommentSource: Send + Sync {
    /// Fetch the single comment blob for a content id.
    async fn fetch_raw_comment_blob(&self, content_id: i64) -> Result<Bytes>;

    /// Fetch one binary segment. `segment_index` starts at 1.
    async fn fetch_comment_segment(&self, content_id: i64, segment_index: u32) -> Result<Bytes>;
}

/// Wire format of a raw blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobFormat {
    Text,
    Binary,
}

impl BlobFormat {
    /// Sniff the format from the (already inflated) bytes.
    pub fn sniff(data: &[u8]) -> Self {
        if has_text_marker(data) {
            Self::Text
        } else {
            Self::Binary
        }
    }
}

/// A fetched comment blob, stored inflated.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlob {
    pub content_id: i64,
    pub bytes: Bytes,
    pub format: BlobFormat,
}

impl RawBlob {
    /// Build a blob from bytes as delivered by the source, inflating them
    /// when they are raw-deflate compressed.
    pub fn from_fetched(content_id: i64, fetched: Bytes) -> Self {
        let bytes = match inflate_if_needed(&fetched) {
            std::borrow::Cow::Borrowed(_) => fetched.clone(),
            std::borrow::Cow::Owned(inflated) => Bytes::from(inflated),
        };
        let format = BlobFormat::sniff(&bytes);
        Self {
            content_id,
            bytes,
            format,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The successfully fetched segments of a segmented blob, in index order.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedBlob {
    pub content_id: i64,
    pub segments: Vec<Bytes>,
    /// Number of segments requested
    pub expected: u32,
}

impl SegmentedBlob {
    /// Whether some requested segments failed.
    pub fn is_partial(&self) -> bool {
        (self.segments.len() as u32) < self.expected
    }
}

/// Number of segments covering `duration_ms`, at least one.
pub fn segment_count(duration_ms: i64, segment_duration_ms: i64) -> u32 {
    let segment_duration_ms = segment_duration_ms.max(1);
    if duration_ms <= 0 {
        return 1;
    }
    let count = (duration_ms + segment_duration_ms - 1) / segment_duration_ms;
    count.clamp(1, i64::from(u32::MAX)) as u32
}

/// Cached access to raw and segmented comment blobs.
pub struct BlobFetcher {
    source: Arc<dyn CommentSource>,
    raw_cache: BlobCache<i64, Arc<RawBlob>>,
    segment_cache: BlobCache<i64, Arc<SegmentedBlob>>,
    segment_duration_ms: i64,
}

impl BlobFetcher {
    pub fn new(source: Arc<dyn CommentSource>, config: &FetchConfig) -> Self {
        Self {
            source,
            raw_cache: BlobCache::new("raw", config.cache_capacity),
            segment_cache: BlobCache::new("segmented", config.cache_capacity),
            segment_duration_ms: config.segment_duration_ms,
        }
    }

    /// Fetch the single raw blob for `content_id`, served from cache when present.
    pub async fn fetch_raw(&self, content_id: i64) -> Result<Arc<RawBlob>> {
        self.raw_cache
            .get_or_fetch(content_id, || async {
                let fetched = self.source.fetch_raw_comment_blob(content_id).await?;
                if fetched.is_empty() {
                    return Err(DanmakuError::NoData { content_id });
                }
                let blob = run_blocking(move || RawBlob::from_fetched(content_id, fetched)).await?;
                debug!(
                    content_id,
                    len = blob.len(),
                    format = ?blob.format,
                    "Fetched raw danmaku blob"
                );
                Ok(Arc::new(blob))
            })
            .await
    }

    /// Fetch all binary segments covering `duration_ms`.
    ///
    /// Segments are requested sequentially; a failed segment is omitted from
    /// the result. When no segment succeeds the call fails and nothing is
    /// cached.
    pub async fn fetch_segmented(
        &self,
        content_id: i64,
        duration_ms: i64,
    ) -> Result<Arc<SegmentedBlob>> {
        let expected = segment_count(duration_ms, self.segment_duration_ms);
        self.segment_cache
            .get_or_fetch(content_id, || async move {
                let mut segments = Vec::with_capacity(expected as usize);
                for index in 1..=expected {
                    match self.source.fetch_comment_segment(content_id, index).await {
                        Ok(bytes) if !bytes.is_empty() => segments.push(bytes),
                        Ok(_) => debug!(content_id, index, "Empty danmaku segment"),
                        Err(e) => warn!(
                            content_id,
                            index,
                            error = %e,
                            "Failed to fetch danmaku segment, omitting it"
                        ),
                    }
                }
                if segments.is_empty() {
                    return Err(DanmakuError::NoData { content_id });
                }
                debug!(
                    content_id,
                    fetched = segments.len(),
                    expected,
                    "Fetched segmented danmaku"
                );
                Ok(Arc::new(SegmentedBlob {
                    content_id,
                    segments,
                    expected,
                }))
            })
            .await
    }

    /// Drop both caches.
    pub fn clear(&self) {
        self.raw_cache.clear();
        self.segment_cache.clear();
    }

    pub fn raw_cache(&self) -> &BlobCache<i64, Arc<RawBlob>> {
        &self.raw_cache
    }

    pub fn segment_cache(&self) -> &BlobCache<i64, Arc<SegmentedBlob>> {
        &self.segment_cache
    }
}
