//! Decoder for the textual (XML) comment format.
//!
//! Each comment is a `<d>` element whose `p` attribute carries
//! `time_seconds,mode,font_size,color,timestamp,pool,user_hash,id[,weight]`
//! and whose text content is the comment itself:
//!
//! ```text
//! <i>
//!   <d p="1.5,1,25,16777215,1700000000,0,abc,1">hello</d>
//! </i>
//! ```

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{trace, warn};

use super::{RawRecord, push_record};
use crate::event::DecodedComments;

/// Minimum number of comma-separated fields in a `p` attribute.
const MIN_ATTR_FIELDS: usize = 4;

/// Decode a textual comment blob.
///
/// Malformed elements are skipped. A structural XML error ends the scan and
/// whatever was decoded up to that point is returned. The result is sorted by
/// `show_at_ms`.
pub fn decode_text(data: &[u8]) -> DecodedComments {
    let mut out = DecodedComments::default();
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    // `p` attribute of the <d> element currently open, if any.
    let mut pending: Option<String> = None;
    let mut content = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"d" => {
                pending = attr_string(&e);
                content.clear();
            }
            Ok(Event::Text(t)) if pending.is_some() => match t.unescape() {
                Ok(text) => content.push_str(&text),
                Err(_) => content.push_str(&String::from_utf8_lossy(&t)),
            },
            Ok(Event::CData(c)) if pending.is_some() => {
                content.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"d" => {
                if let Some(attr) = pending.take() {
                    match parse_attr(&attr, std::mem::take(&mut content)) {
                        Some(record) => push_record(record, &mut out),
                        None => trace!(attr = %attr, "Skipping malformed comment attribute"),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(
                    error = %e,
                    position = reader.buffer_position(),
                    decoded = out.len(),
                    "Text danmaku is malformed, keeping comments decoded so far"
                );
                break;
            }
        }
        buf.clear();
    }

    out.sort();
    out
}

fn attr_string(element: &BytesStart<'_>) -> Option<String> {
    let attr = element.try_get_attribute("p").ok().flatten()?;
    match attr.unescape_value() {
        Ok(value) => Some(value.into_owned()),
        Err(_) => Some(String::from_utf8_lossy(&attr.value).into_owned()),
    }
}

/// Parse a `p` attribute string into a record.
///
/// Returns `None` when fewer than four fields are present or the time,
/// mode or color fields are not numeric.
pub(crate) fn parse_attr(attr: &str, content: String) -> Option<RawRecord> {
    let fields: Vec<&str> = attr.split(',').map(str::trim).collect();
    if fields.len() < MIN_ATTR_FIELDS {
        return None;
    }

    let seconds: f64 = fields[0].parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    let mode: i32 = fields[1].parse().ok()?;
    let font_size: f32 = fields[2].parse().unwrap_or(0.0);
    let color: u32 = fields[3].parse().ok()?;

    let field = |idx: usize| fields.get(idx).copied().unwrap_or("");

    Some(RawRecord {
        id: field(7).parse().unwrap_or(0),
        mode,
        progress_ms: (seconds * 1000.0).round() as i64,
        font_size,
        color,
        content,
        weight: field(8).parse().unwrap_or(0),
        pool: field(5).parse().unwrap_or(0),
        user_hash: field(6).to_string(),
    })
}
