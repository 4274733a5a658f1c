//! The fetch → decode → merge pipeline run for one content id.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::decode::{decode_blob, decode_segments};
use crate::error::{DanmakuError, Result};
use crate::event::{DecodedComments, MergedResult};
use crate::fetch::BlobFetcher;
use crate::merge::{MergeConfig, merge};

/// Decoded and merged comments for one content id.
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub content_id: i64,
    pub decoded: Arc<DecodedComments>,
    pub merged: Arc<MergedResult>,
}

impl LoadedSession {
    /// Re-run the merge stage on the cached decode.
    pub fn remerge(&self, config: &MergeConfig) -> Self {
        Self {
            content_id: self.content_id,
            decoded: self.decoded.clone(),
            merged: Arc::new(merge(&self.decoded.standard, config)),
        }
    }

    /// Events for the advanced layer: merge promotions then positional comments.
    pub fn advanced_events(&self) -> Vec<crate::event::AdvancedCommentEvent> {
        let mut events = self.merged.advanced.clone();
        events.extend(self.decoded.advanced.iter().cloned());
        events
    }
}

/// Fetch the comments for `content_id` and decode them.
///
/// With a positive `duration_hint_ms` the segmented binary format is tried
/// first and the single raw blob is the fallback.
pub async fn fetch_decoded(
    fetcher: &BlobFetcher,
    content_id: i64,
    duration_hint_ms: i64,
) -> Result<DecodedComments> {
    if duration_hint_ms > 0 {
        match fetcher.fetch_segmented(content_id, duration_hint_ms).await {
            Ok(blob) => {
                let decoded = run_blocking(move || decode_segments(&blob)).await?;
                if !decoded.is_empty() {
                    return Ok(decoded);
                }
                debug!(content_id, "Segmented danmaku decoded empty, trying raw blob");
            }
            Err(DanmakuError::Cancelled) => return Err(DanmakuError::Cancelled),
            Err(e) => {
                debug!(content_id, error = %e, "Segmented danmaku unavailable, trying raw blob");
            }
        }
    }

    let blob = fetcher.fetch_raw(content_id).await?;
    run_blocking(move || decode_blob(&blob)).await
}

/// Full pipeline: fetch, decode, then merge.
pub async fn load_session(
    fetcher: &BlobFetcher,
    content_id: i64,
    duration_hint_ms: i64,
    merge_config: &MergeConfig,
) -> Result<LoadedSession> {
    let decoded = fetch_decoded(fetcher, content_id, duration_hint_ms).await?;
    let decoded = Arc::new(decoded);

    let merged = if merge_config.enabled {
        let input = decoded.clone();
        let config = merge_config.clone();
        run_blocking(move || merge(&input.standard, &config)).await?
    } else {
        merge(&decoded.standard, merge_config)
    };

    debug!(
        content_id,
        decoded = decoded.len(),
        standard = merged.standard.len(),
        advanced = merged.advanced.len() + decoded.advanced.len(),
        "Loaded danmaku session"
    );

    Ok(LoadedSession {
        content_id,
        decoded,
        merged: Arc::new(merged),
    })
}

/// Run CPU-bound inflate, decode or merge work off the async executor.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        warn!(error = %e, "Danmaku blocking task failed");
        DanmakuError::other(format!("blocking task failed: {e}"))
    })
}
