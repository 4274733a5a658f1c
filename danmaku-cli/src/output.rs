use anyhow::Result;
use danmaku::{AdvancedCommentEvent, CommentEvent, RenderedAdvanced, STANDARD_FONT_SIZE};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

use crate::cli::OutputFormat;

/// Standard plus advanced comments, as printed by `decode`, `merge` and `fetch`.
#[derive(Debug, Serialize)]
pub struct CommentReport<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<i64>,
    pub standard: &'a [CommentEvent],
    pub advanced: &'a [AdvancedCommentEvent],
}

impl CommentReport<'_> {
    pub fn format(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Pretty => Ok(self.format_pretty()),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::JsonCompact => Ok(serde_json::to_string(self)?),
            OutputFormat::Xml => Ok(self.format_xml()),
        }
    }

    fn format_pretty(&self) -> String {
        let mut out = String::new();
        if let Some(content_id) = self.content_id {
            let _ = writeln!(out, "Content {}", content_id);
        }
        for event in self.standard {
            let _ = writeln!(
                out,
                "[{}] {:<12} #{:06X} {}",
                format_timestamp(event.show_at_ms),
                format!("{:?}", event.motion_type),
                event.color_rgb(),
                event.text
            );
        }
        if !self.advanced.is_empty() {
            out.push_str("Advanced:\n");
            for event in self.advanced {
                let count = if event.is_count_up() {
                    format!(" ×{}", event.max_count)
                } else {
                    String::new()
                };
                let _ = writeln!(
                    out,
                    "[{} +{}ms] ({:.2},{:.2}) {}{}",
                    format_timestamp(event.start_ms),
                    event.duration_ms,
                    event.start_pos.0,
                    event.start_pos.1,
                    event.content,
                    count
                );
            }
        }
        let _ = writeln!(
            out,
            "Total: {} standard, {} advanced",
            self.standard.len(),
            self.advanced.len()
        );
        out
    }

    /// Textual wire format. Count-up events have no wire form and are omitted.
    fn format_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<i>\n");
        for event in self.standard {
            let _ = writeln!(
                out,
                "  <d p=\"{:.3},{},{},{},0,{},{},{},{}\">{}</d>",
                event.show_at_ms as f64 / 1000.0,
                event.motion_type.mode_code(),
                (event.font_scale * STANDARD_FONT_SIZE).round() as i32,
                event.color_rgb(),
                event.pool,
                escape_xml(&event.user_hash),
                event.id,
                event.weight,
                escape_xml(&event.text),
            );
        }
        for event in self.advanced.iter().filter(|e| !e.is_count_up()) {
            let alpha = format!("{}-{}", event.alpha, event.alpha);
            let content = serde_json::json!([
                event.start_pos.0,
                event.start_pos.1,
                alpha,
                event.duration_ms as f64 / 1000.0,
                event.content,
                event.rotate_z,
                event.rotate_y,
                event.end_pos.0,
                event.end_pos.1,
            ]);
            let _ = writeln!(
                out,
                "  <d p=\"{:.3},7,{},{},0,0,,{}\">{}</d>",
                event.start_ms as f64 / 1000.0,
                event.font_size.round() as i32,
                event.color_rgb,
                escape_xml(&event.id),
                escape_xml(&content.to_string()),
            );
        }
        out.push_str("</i>\n");
        out
    }
}

pub fn format_frame(at_ms: i64, frame: &[RenderedAdvanced], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json | OutputFormat::Xml => Ok(serde_json::to_string_pretty(frame)?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(frame)?),
        OutputFormat::Pretty => {
            let mut out = String::new();
            let _ = writeln!(out, "Frame at {} ({} visible)", format_timestamp(at_ms), frame.len());
            for item in frame {
                let _ = writeln!(
                    out,
                    "  ({:.3},{:.3}) size {:.0} #{:08X} {}",
                    item.x, item.y, item.font_size, item.color_argb, item.text
                );
            }
            Ok(out)
        }
    }
}

/// Write to `path`, or stdout when absent.
pub async fn write_output(content: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            tokio::fs::write(path, content).await?;
            tracing::info!(path = %path.display(), "Wrote output");
        }
        None => print!("{}", content),
    }
    Ok(())
}

pub fn format_timestamp(ms: i64) -> String {
    let ms = ms.max(0);
    format!("{:02}:{:02}.{:03}", ms / 60_000, (ms / 1000) % 60, ms % 1000)
}

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
