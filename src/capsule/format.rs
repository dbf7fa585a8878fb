// src/capsule/format.rs
//! Capsule container layout
//!
//! ```text
//! <<CAPSULE:V1>>
//! {canonical metadata JSON, one line}
//! <<PAYLOAD>>
//! <base64 payload, wrapped>
//! </CAPSULE>
//! -----BEGIN SIGNATURE-----
//! <armored detached signature>
//! -----END SIGNATURE-----
//! ```
//!
//! # Signed region
//!
//! The signature covers bytes `0..n` where `n` is the offset just past the
//! `\n` ending the `</CAPSULE>` line. All four container delimiters, the
//! metadata line and the payload *as base64 text* are inside the region; the
//! signature block is not. [`CapsuleBody::render`] and [`parse`] both derive
//! the region from this single rule.
//!
//! Lines end in `\n` only. Markers are matched as whole lines, byte for byte.

use crate::error::{Error, Result};

pub const CAPSULE_MARKER: &str = "<<CAPSULE:V1>>";
pub const PAYLOAD_MARKER: &str = "<<PAYLOAD>>";
pub const END_MARKER: &str = "</CAPSULE>";
pub const SIGNATURE_BEGIN: &str = "-----BEGIN SIGNATURE-----";
pub const SIGNATURE_END: &str = "-----END SIGNATURE-----";

/// Default base64 line width for the payload block
pub const DEFAULT_PAYLOAD_WRAP: usize = 76;

/// Line width of the signature armor
pub const ARMOR_WRAP: usize = 64;

const MARKERS: [&str; 5] = [
    CAPSULE_MARKER,
    PAYLOAD_MARKER,
    END_MARKER,
    SIGNATURE_BEGIN,
    SIGNATURE_END,
];

/// The signed part of a capsule, before the signature is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsuleBody {
    /// Canonical metadata line (without trailing newline)
    pub metadata_line: Vec<u8>,
    /// Unwrapped base64 payload text
    pub payload_b64: String,
    /// Wrap width for payload lines
    pub wrap: usize,
}

impl CapsuleBody {
    /// Render the signed region
    pub fn render(&self) -> Result<Vec<u8>> {
        check_wrap(self.wrap)?;
        if self.metadata_line.contains(&b'\n') {
            return Err(Error::Encoding("metadata line contains a newline".into()));
        }

        let mut out = Vec::with_capacity(
            self.metadata_line.len() + self.payload_b64.len() * 2 + 64,
        );
        push_line(&mut out, CAPSULE_MARKER.as_bytes());
        push_line(&mut out, &self.metadata_line);
        push_line(&mut out, PAYLOAD_MARKER.as_bytes());
        for chunk in self.payload_b64.as_bytes().chunks(self.wrap) {
            push_line(&mut out, chunk);
        }
        push_line(&mut out, END_MARKER.as_bytes());
        Ok(out)
    }
}

/// Payload lines must hold whole base64 quanta
pub fn check_wrap(wrap: usize) -> Result<()> {
    if wrap == 0 || wrap % 4 != 0 {
        return Err(Error::Encoding(format!(
            "payload wrap width must be a positive multiple of 4, got {}",
            wrap
        )));
    }
    Ok(())
}

/// Append the armored signature block to a rendered body
pub fn attach_signature(mut signed_region: Vec<u8>, armor: &str) -> Vec<u8> {
    push_line(&mut signed_region, SIGNATURE_BEGIN.as_bytes());
    for chunk in armor.as_bytes().chunks(ARMOR_WRAP) {
        push_line(&mut signed_region, chunk);
    }
    push_line(&mut signed_region, SIGNATURE_END.as_bytes());
    signed_region
}

fn push_line(out: &mut Vec<u8>, line: &[u8]) {
    out.extend_from_slice(line);
    out.push(b'\n');
}

/// Borrowed view of the blocks in a capsule file
#[derive(Debug)]
pub struct Sections<'a> {
    /// The metadata line
    pub metadata: &'a [u8],
    /// Payload lines, still base64
    pub payload_lines: Vec<&'a [u8]>,
    /// Exactly the bytes covered by the signature
    pub signed_region: &'a [u8],
    /// Armor lines between the signature markers
    pub signature_lines: Vec<&'a [u8]>,
}

impl Sections<'_> {
    /// Payload base64 text with line breaks removed
    pub fn payload_b64(&self) -> Result<String> {
        let mut joined = Vec::with_capacity(self.payload_lines.iter().map(|l| l.len()).sum());
        for line in &self.payload_lines {
            joined.extend_from_slice(line);
        }
        String::from_utf8(joined)
            .map_err(|_| Error::PayloadDecode("payload block is not ASCII base64".into()))
    }

    /// Signature armor with line breaks removed
    pub fn armor(&self) -> Result<String> {
        let mut joined = Vec::new();
        for line in &self.signature_lines {
            joined.extend_from_slice(line);
        }
        String::from_utf8(joined)
            .map_err(|_| Error::signature("signature armor is not ASCII"))
    }
}

struct Line<'a> {
    number: usize,
    /// Offset just past this line's terminator
    end: usize,
    text: &'a [u8],
}

fn split_lines(bytes: &[u8]) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            lines.push(Line {
                number: lines.len() + 1,
                end: i + 1,
                text: &bytes[start..i],
            });
            start = i + 1;
        }
    }
    if start < bytes.len() {
        lines.push(Line {
            number: lines.len() + 1,
            end: bytes.len(),
            text: &bytes[start..],
        });
    }
    lines
}

/// A line that looks like a marker but is not byte-identical to one
fn near_marker(text: &[u8]) -> Option<&'static str> {
    let trimmed = text.trim_ascii();
    MARKERS
        .into_iter()
        .find(|m| trimmed.eq_ignore_ascii_case(m.as_bytes()))
}

/// Locate the blocks of a capsule by scanning for exact marker lines
///
/// Fails with [`Error::MalformedCapsule`] when a marker is missing,
/// duplicated, out of order, or present in a deviating form.
pub fn parse(bytes: &[u8]) -> Result<Sections<'_>> {
    let lines = split_lines(bytes);
    // Index into `lines` for each marker, in MARKERS order
    let mut found: [Option<usize>; 5] = [None; 5];

    for (idx, line) in lines.iter().enumerate() {
        if let Some(slot) = MARKERS.iter().position(|m| line.text == m.as_bytes()) {
            if found[slot].is_some() {
                return Err(Error::malformed(format!(
                    "duplicate {} marker at line {}",
                    MARKERS[slot], line.number
                )));
            }
            found[slot] = Some(idx);
        } else if let Some(marker) = near_marker(line.text) {
            return Err(Error::malformed(format!(
                "line {} is not an exact {} marker",
                line.number, marker
            )));
        }
    }

    let mut positions = [0usize; 5];
    for (slot, pos) in found.iter().enumerate() {
        positions[slot] =
            pos.ok_or_else(|| Error::malformed(format!("missing {} marker", MARKERS[slot])))?;
    }
    let [capsule, payload, end, sig_begin, sig_end] = positions;

    if capsule != 0 {
        return Err(Error::malformed(format!(
            "{} must be the first line",
            CAPSULE_MARKER
        )));
    }
    if !(capsule < payload && payload < end && end < sig_begin && sig_begin < sig_end) {
        return Err(Error::malformed("markers are out of order"));
    }
    if payload - capsule != 2 {
        return Err(Error::malformed(format!(
            "expected exactly one metadata line, found {}",
            payload - capsule - 1
        )));
    }
    if sig_begin != end + 1 {
        return Err(Error::malformed(format!(
            "unexpected content between {} and {}",
            END_MARKER, SIGNATURE_BEGIN
        )));
    }
    if sig_end != lines.len() - 1 {
        return Err(Error::malformed(format!(
            "unexpected content after {}",
            SIGNATURE_END
        )));
    }
    // `</CAPSULE>` is followed by the signature block, so its line always
    // carries the terminating '\n' that closes the signed region
    let metadata = lines[capsule + 1].text;
    let payload_lines = lines[payload + 1..end].iter().map(|l| l.text).collect();
    let signature_lines = lines[sig_begin + 1..sig_end].iter().map(|l| l.text).collect();
    let signed_region = &bytes[..lines[end].end];

    Ok(Sections {
        metadata,
        payload_lines,
        signed_region,
        signature_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> CapsuleBody {
        CapsuleBody {
            metadata_line: br#"{"capsule_id":"c"}"#.to_vec(),
            payload_b64: "ZWNobyBoaQ==".repeat(10),
            wrap: 16,
        }
    }

    fn capsule() -> Vec<u8> {
        attach_signature(body().render().unwrap(), &"QUJD".repeat(20))
    }

    #[test]
    fn test_render_layout() {
        let rendered = String::from_utf8(body().render().unwrap()).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], CAPSULE_MARKER);
        assert_eq!(lines[1], r#"{"capsule_id":"c"}"#);
        assert_eq!(lines[2], PAYLOAD_MARKER);
        assert!(lines[3..lines.len() - 1].iter().all(|l| l.len() <= 16));
        assert_eq!(*lines.last().unwrap(), END_MARKER);
        assert!(rendered.ends_with("</CAPSULE>\n"));
    }

    #[test]
    fn test_render_rejects_bad_wrap() {
        let mut b = body();
        b.wrap = 10;
        assert!(matches!(b.render(), Err(Error::Encoding(_))));
        b.wrap = 0;
        assert!(b.render().is_err());
    }

    #[test]
    fn test_parse_recovers_blocks() {
        let bytes = capsule();
        let sections = parse(&bytes).unwrap();
        assert_eq!(sections.metadata, br#"{"capsule_id":"c"}"#);
        assert_eq!(sections.payload_b64().unwrap(), body().payload_b64);
        assert_eq!(sections.armor().unwrap(), "QUJD".repeat(20));
        assert_eq!(sections.signed_region, body().render().unwrap().as_slice());
    }

    #[test]
    fn test_parse_accepts_missing_final_newline() {
        let mut bytes = capsule();
        bytes.pop();
        let sections = parse(&bytes).unwrap();
        assert_eq!(sections.signed_region, body().render().unwrap().as_slice());
    }

    #[test]
    fn test_parse_empty_payload() {
        let b = CapsuleBody {
            payload_b64: String::new(),
            ..body()
        };
        let bytes = attach_signature(b.render().unwrap(), "QUJD");
        let sections = parse(&bytes).unwrap();
        assert!(sections.payload_lines.is_empty());
        assert_eq!(sections.payload_b64().unwrap(), "");
    }

    #[test]
    fn test_duplicate_payload_marker() {
        let text = String::from_utf8(capsule()).unwrap();
        let doubled = text.replacen("<<PAYLOAD>>\n", "<<PAYLOAD>>\nZWNo\n<<PAYLOAD>>\n", 1);
        let err = parse(doubled.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MalformedCapsule(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn test_missing_marker() {
        let text = String::from_utf8(capsule()).unwrap();
        let stripped = text.replace("</CAPSULE>\n", "");
        let err = parse(stripped.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MalformedCapsule(ref m) if m.contains("missing")));
    }

    #[test]
    fn test_deviating_markers() {
        let text = String::from_utf8(capsule()).unwrap();
        for bad in [
            text.replace("<<PAYLOAD>>\n", "<<PAYLOAD>> \n"),
            text.replace("<<PAYLOAD>>\n", "<<payload>>\n"),
            text.replace("</CAPSULE>\n", "</CAPSULE>\r\n"),
        ] {
            let err = parse(bad.as_bytes()).unwrap_err();
            assert!(matches!(err, Error::MalformedCapsule(ref m) if m.contains("not an exact")));
        }
    }

    #[test]
    fn test_out_of_order_markers() {
        let text = String::from_utf8(capsule()).unwrap();
        let swapped = text
            .replace("<<PAYLOAD>>\n", "@@TMP@@\n")
            .replace("</CAPSULE>\n", "<<PAYLOAD>>\n")
            .replace("@@TMP@@\n", "</CAPSULE>\n");
        assert!(matches!(parse(swapped.as_bytes()), Err(Error::MalformedCapsule(_))));
    }

    #[test]
    fn test_multiline_metadata_rejected() {
        let text = String::from_utf8(capsule()).unwrap();
        let split = text.replacen("{\"capsule_id\":\"c\"}\n", "{\n\"capsule_id\":\"c\"}\n", 1);
        let err = parse(split.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MalformedCapsule(ref m) if m.contains("metadata line")));
    }

    #[test]
    fn test_trailing_content_rejected() {
        let mut bytes = capsule();
        bytes.extend_from_slice(b"extra\n");
        assert!(matches!(parse(&bytes), Err(Error::MalformedCapsule(_))));

        let text = String::from_utf8(capsule()).unwrap();
        let gap = text.replace("</CAPSULE>\n", "</CAPSULE>\n\n");
        assert!(matches!(parse(gap.as_bytes()), Err(Error::MalformedCapsule(_))));
    }

    #[test]
    fn test_must_start_with_capsule_marker() {
        let mut bytes = b"#!/bin/sh\n".to_vec();
        bytes.extend_from_slice(&capsule());
        assert!(matches!(parse(&bytes), Err(Error::MalformedCapsule(_))));
    }
}
