//! Field extraction from E-utilities XML.
//!
//! `efetch` answers in XML only. [`records`] walks the document once and, for
//! every record element, collects the text of the fields asked for.

use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use std::collections::HashMap;

use scribeloop_core::error::CapabilityError;

/// Field name → text of each occurrence, in document order.
pub(crate) type Record = HashMap<&'static str, Vec<String>>;

struct Capture {
    field: usize,
    depth: usize,
    text: String,
}

/// Collect `fields` inside each `record` element.
///
/// A field is a `/`-separated path of element names relative to the record;
/// intermediate elements may be skipped, so `body/p` also matches
/// `body/sec/p`. Text of nested inline elements is included and whitespace
/// is collapsed. Empty occurrences are dropped.
pub(crate) fn records(
    xml: &str,
    record: &str,
    fields: &[&'static str],
) -> Result<Vec<Record>, CapabilityError> {
    let paths: Vec<Vec<&str>> = fields.iter().map(|f| f.split('/').collect()).collect();
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<(usize, Record)> = None;
    let mut capture: Option<Capture> = None;
    let mut out = Vec::new();

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let is_record = name == record;
                stack.push(name);
                match current.as_ref().map(|(depth, _)| *depth) {
                    None if is_record => {
                        current = Some((stack.len(), Record::new()));
                    }
                    Some(depth) if capture.is_none() => {
                        let inner = &stack[depth..];
                        if let Some(field) = paths.iter().position(|p| matches_path(inner, p)) {
                            capture = Some(Capture {
                                field,
                                depth: stack.len(),
                                text: String::new(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::End(_) => {
                if let Some(done) = capture.take_if(|c| c.depth == stack.len()) {
                    let text = collapse_whitespace(&done.text);
                    if !text.is_empty() {
                        if let Some((_, rec)) = current.as_mut() {
                            rec.entry(fields[done.field]).or_default().push(text);
                        }
                    }
                }
                if current.as_ref().is_some_and(|(depth, _)| *depth == stack.len()) {
                    if let Some((_, rec)) = current.take() {
                        out.push(rec);
                    }
                }
                stack.pop();
            }
            Event::Text(t) => {
                if let Some(c) = capture.as_mut() {
                    c.text.push_str(&t.decode().map_err(malformed)?);
                }
            }
            Event::CData(t) => {
                if let Some(c) = capture.as_mut() {
                    c.text.push_str(&t.decode().map_err(malformed)?);
                }
            }
            Event::GeneralRef(r) => {
                if let Some(c) = capture.as_mut() {
                    c.text.push_str(&resolve_entity(&r.decode().map_err(malformed)?));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

/// The last path element is the innermost open element; the others appear
/// above it in order.
fn matches_path(stack: &[String], path: &[&str]) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };
    let Some((top, above)) = stack.split_last() else {
        return false;
    };
    if top.as_str() != *last {
        return false;
    }
    let mut above = above.iter();
    parents
        .iter()
        .all(|parent| above.any(|name| name.as_str() == *parent))
}

fn resolve_entity(name: &str) -> String {
    if let Some(code) = name.strip_prefix('#') {
        let value = match code.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse().ok(),
        };
        return value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default();
    }
    resolve_predefined_entity(name)
        .unwrap_or_default()
        .to_string()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn malformed(e: impl std::fmt::Display) -> CapabilityError {
    CapabilityError::Fatal(format!("malformed XML response: {e}"))
}
