//! Block-list XML rendering and service error parsing.
//!
//! Put Block List takes an XML body naming every block of the blob in
//! order.  Error responses from the service carry an `<Error><Code>`
//! document that we surface in logs.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

use crate::upload::BlockId;

/// Element name used for each staged block in the commit body.
const BLOCK_ELEMENT: &str = "Uncommitted";

// ── BlockList ───────────────────────────────────────────────────────

/// Render the Put Block List body for `blocks`, preserving their order.
///
/// ```xml
/// <?xml version="1.0" encoding="utf-8"?><BlockList><Uncommitted>id1</Uncommitted><Uncommitted>id2</Uncommitted></BlockList>
/// ```
pub fn render_block_list(blocks: &[BlockId]) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .expect("xml decl");
    writer
        .write_event(Event::Start(BytesStart::new("BlockList")))
        .expect("start root");
    for block in blocks {
        write_text_element(&mut writer, BLOCK_ELEMENT, block.as_str());
    }
    writer
        .write_event(Event::End(BytesEnd::new("BlockList")))
        .expect("end root");

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

/// Parse the block ids out of a Put Block List body, in document order.
///
/// Accepts `Uncommitted`, `Committed` and `Latest` entries.  Returns `None`
/// for malformed XML.
pub fn parse_block_list(body: &[u8]) -> Option<Vec<String>> {
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();
    let mut ids = Vec::new();
    let mut in_block = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e))
                if matches!(e.name().as_ref(), b"Uncommitted" | b"Committed" | b"Latest") =>
            {
                in_block = true;
            }
            Ok(Event::Text(ref e)) if in_block => {
                ids.push(e.unescape().ok()?.trim().to_string());
            }
            Ok(Event::End(_)) => in_block = false,
            Ok(Event::Eof) => return Some(ids),
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

// ── Error response ──────────────────────────────────────────────────

/// Extract `<Code>` from a service `<Error>` document.
pub fn parse_error_code(body: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();
    let mut in_code = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Code" => {
                in_code = true;
            }
            Ok(Event::Text(ref e)) if in_code => {
                let text = e.unescape().ok()?.trim().to_string();
                return (!text.is_empty()).then_some(text);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Code" => return None,
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Write a `<tag>text</tag>` element.
fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start tag");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end tag");
}
