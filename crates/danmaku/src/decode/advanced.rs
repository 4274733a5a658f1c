//! Parser for positional ("mode 7") comment content.
//!
//! The content of a mode 7 record is a JSON array:
//!
//! ```text
//! [startX, startY, "alphaStart-alphaEnd", durationSeconds, text, rotateZ, rotateY, endX, endY, ...]
//! ```
//!
//! Only the first five entries are required. Numbers may be encoded as JSON
//! numbers or as numeric strings.

use serde_json::Value;

use super::RawRecord;
use crate::event::{AdvancedCommentEvent, STANDARD_FONT_SIZE};

/// Reference stage used when coordinates are given in pixels.
const STAGE_WIDTH: f32 = 682.0;
const STAGE_HEIGHT: f32 = 438.0;

/// Try to interpret a mode 7 record as a positional event.
///
/// Returns `None` when the content does not match the expected structure;
/// callers then fall back to a plain text comment.
pub fn parse_advanced_danmaku(record: &RawRecord) -> Option<AdvancedCommentEvent> {
    let content = record.content.trim();
    if !content.starts_with('[') {
        return None;
    }
    let values: Vec<Value> = serde_json::from_str(content).ok()?;
    if values.len() < 5 {
        return None;
    }

    let start_x = number(&values[0])?;
    let start_y = number(&values[1])?;
    let alpha = alpha_start(&values[2]);
    let duration_secs = number(&values[3])?;
    let text = match &values[4] {
        Value::String(s) => s.replace("/n", "\n"),
        _ => return None,
    };
    if !duration_secs.is_finite() || duration_secs <= 0.0 || text.is_empty() {
        return None;
    }

    let rotate_z = values.get(5).and_then(number).unwrap_or(0.0) as f32;
    let rotate_y = values.get(6).and_then(number).unwrap_or(0.0) as f32;

    let start_pos = (
        normalize(start_x as f32, STAGE_WIDTH),
        normalize(start_y as f32, STAGE_HEIGHT),
    );
    let end_pos = match (values.get(7).and_then(number), values.get(8).and_then(number)) {
        (Some(x), Some(y)) => (
            normalize(x as f32, STAGE_WIDTH),
            normalize(y as f32, STAGE_HEIGHT),
        ),
        _ => start_pos,
    };

    let font_size = if record.font_size > 0.0 {
        record.font_size
    } else {
        STANDARD_FONT_SIZE
    };

    Some(AdvancedCommentEvent {
        id: record.id.to_string(),
        content: text,
        start_ms: record.progress_ms.max(0),
        duration_ms: (duration_secs * 1000.0).round() as i64,
        start_pos,
        end_pos,
        font_size,
        color_rgb: record.color & 0x00FF_FFFF,
        alpha,
        rotate_z,
        rotate_y,
        max_count: 0,
        accumulation_ms: 0,
    })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Start alpha from a `"a-b"` tag; anything unparsable is fully opaque.
fn alpha_start(value: &Value) -> f32 {
    let parsed = match value {
        Value::String(s) => s.split('-').next().and_then(|a| a.trim().parse::<f32>().ok()),
        Value::Number(n) => n.as_f64().map(|a| a as f32),
        _ => None,
    };
    parsed.filter(|a| a.is_finite()).unwrap_or(1.0).clamp(0.0, 1.0)
}

/// Values above 1 are pixels on the reference stage.
fn normalize(v: f32, extent: f32) -> f32 {
    let v = if v > 1.0 { v / extent } else { v };
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content: &str) -> RawRecord {
        RawRecord {
            id: 7,
            mode: 7,
            progress_ms: 2000,
            font_size: 30.0,
            color: 0xFF0000,
            content: content.to_string(),
            weight: 0,
            pool: 0,
            user_hash: String::new(),
        }
    }

    #[test]
    fn test_minimal_array() {
        let ev = parse_advanced_danmaku(&record(r#"[0.25,0.75,"0.8-1",3,"hello"]"#)).unwrap();
        assert_eq!(ev.id, "7");
        assert_eq!(ev.content, "hello");
        assert_eq!(ev.start_ms, 2000);
        assert_eq!(ev.duration_ms, 3000);
        assert_eq!(ev.start_pos, (0.25, 0.75));
        assert_eq!(ev.end_pos, ev.start_pos);
        assert!((ev.alpha - 0.8).abs() < 1e-6);
        assert_eq!(ev.font_size, 30.0);
        assert_eq!(ev.color_rgb, 0xFF0000);
        assert_eq!(ev.max_count, 0);
    }

    #[test]
    fn test_string_numbers_and_rotation() {
        let ev = parse_advanced_danmaku(&record(
            r#"["0.1","0.2","1-1","4.5","spin","30","45"]"#,
        ))
        .unwrap();
        assert_eq!(ev.duration_ms, 4500);
        assert_eq!(ev.rotate_z, 30.0);
        assert_eq!(ev.rotate_y, 45.0);
    }

    #[test]
    fn test_linear_motion_and_pixels() {
        let ev = parse_advanced_danmaku(&record(
            r#"[341,219,"1-1",2,"move",0,0,0.9,0.1]"#,
        ))
        .unwrap();
        assert!((ev.start_pos.0 - 0.5).abs() < 1e-3);
        assert!((ev.start_pos.1 - 0.5).abs() < 1e-3);
        assert_eq!(ev.end_pos, (0.9, 0.1));
    }

    #[test]
    fn test_structural_mismatch() {
        assert!(parse_advanced_danmaku(&record("plain text")).is_none());
        assert!(parse_advanced_danmaku(&record("[1,2,3]")).is_none());
        assert!(parse_advanced_danmaku(&record(r#"[0.1,0.1,"1-1",0,"zero"]"#)).is_none());
        assert!(parse_advanced_danmaku(&record(r#"[0.1,0.1,"1-1",2,5]"#)).is_none());
        assert!(parse_advanced_danmaku(&record("[0.1,")).is_none());
    }
}
