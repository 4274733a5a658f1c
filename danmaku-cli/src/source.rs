//! HTTP implementation of the comment source.

use async_trait::async_trait;
use bytes::Bytes;
use danmaku::{CommentSource, DanmakuError, Result};
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use crate::config::HttpConfig;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Fetches blobs from URL templates.
pub struct HttpCommentSource {
    client: Client,
    raw_url: Option<String>,
    segment_url: Option<String>,
}

impl HttpCommentSource {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        install_rustls_provider();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            raw_url: config.raw_url.clone(),
            segment_url: config.segment_url.clone(),
        })
    }

    async fn get(&self, url: &str) -> Result<Bytes> {
        debug!(url, "Requesting danmaku");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DanmakuError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DanmakuError::transport(format!("HTTP {} for {}", status, url)));
        }
        response
            .bytes()
            .await
            .map_err(|e| DanmakuError::transport(e.to_string()))
    }
}

/// Substitute `{cid}` and `{index}` in a URL template.
pub fn expand_template(template: &str, content_id: i64, index: Option<u32>) -> String {
    let url = template.replace("{cid}", &content_id.to_string());
    match index {
        Some(index) => url.replace("{index}", &index.to_string()),
        None => url,
    }
}

#[async_trait]
impl CommentSource for HttpCommentSource {
    async fn fetch_raw_comment_blob(&self, content_id: i64) -> Result<Bytes> {
        let template = self
            .raw_url
            .as_deref()
            .ok_or_else(|| DanmakuError::transport("no raw blob URL configured"))?;
        self.get(&expand_template(template, content_id, None)).await
    }

    async fn fetch_comment_segment(&self, content_id: i64, segment_index: u32) -> Result<Bytes> {
        let template = self
            .segment_url
            .as_deref()
            .ok_or_else(|| DanmakuError::transport("no segment URL configured"))?;
        self.get(&expand_template(template, content_id, Some(segment_index)))
            .await
    }
}
