//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Message Format (requests, responses, and watch events alike)
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┬────────────────┐
//! │ Op (4)   │ ReqId (4) │ TxId (4) │ Len (4)  │    Payload     │
//! └──────────┴───────────┴──────────┴──────────┴────────────────┘
//! ```
//! All header words are little-endian `u32`.
//!
//! ### Payloads
//! A payload is a sequence of NUL-terminated byte strings whose count and
//! meaning depend on the operation. A WRITE payload is the exception: its
//! value is everything after the path's terminator and may itself contain
//! NUL bytes. A trailing field may legally carry extra bytes after its own
//! terminator; they are ignored.

use crate::error::{Result, XsError};
use crate::wire::message::MsgHeader;

/// Header size: four u32 words
pub const HEADER_SIZE: usize = 16;

/// Protocol maximum payload size (bytes), the `Config::max_payload`
/// default; a declared length above the configured maximum is a fatal
/// channel error, not a wire error
pub const MAX_PAYLOAD: usize = 4096;

// =============================================================================
// Header Encoding/Decoding
// =============================================================================

/// Encode a header into its 16-byte wire form
pub fn encode_header(header: &MsgHeader) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[0..4].copy_from_slice(&header.op.to_le_bytes());
    out[4..8].copy_from_slice(&header.req_id.to_le_bytes());
    out[8..12].copy_from_slice(&header.tx_id.to_le_bytes());
    out[12..16].copy_from_slice(&header.len.to_le_bytes());
    out
}

/// Decode a header from exactly `HEADER_SIZE` staged bytes
pub fn decode_header(bytes: &[u8]) -> Result<MsgHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(XsError::Channel(format!(
            "incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }
    let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    Ok(MsgHeader {
        op: word(0),
        req_id: word(4),
        tx_id: word(8),
        len: word(12),
    })
}

/// Build a complete frame: header plus payload
pub fn encode_frame(op: u32, req_id: u32, tx_id: u32, payload: &[u8]) -> Vec<u8> {
    let header = MsgHeader {
        op,
        req_id,
        tx_id,
        len: payload.len() as u32,
    };
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&encode_header(&header));
    frame.extend_from_slice(payload);
    frame
}

// =============================================================================
// Payload Field Parsing
// =============================================================================

/// Split the first NUL-terminated field off a payload
///
/// Returns the field (as UTF-8) and the remaining bytes after the
/// terminator. A missing terminator is a malformed request.
pub fn split_field(payload: &[u8]) -> Result<(&str, &[u8])> {
    let nul = payload
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| XsError::MalformedRequest("missing field terminator".to_string()))?;
    let field = std::str::from_utf8(&payload[..nul])
        .map_err(|_| XsError::MalformedRequest("field is not valid UTF-8".to_string()))?;
    Ok((field, &payload[nul + 1..]))
}

/// Parse exactly `count` NUL-terminated string fields
///
/// Bytes after the last field's terminator are ignored (the trailing
/// field is optional-extended per the protocol grammar).
pub fn parse_strings(payload: &[u8], count: usize) -> Result<Vec<&str>> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = payload;
    for _ in 0..count {
        let (field, tail) = split_field(rest)?;
        fields.push(field);
        rest = tail;
    }
    Ok(fields)
}

/// Parse a variable-length list of NUL-terminated string fields
///
/// Requires at least `min` fields; trailing bytes after the final
/// terminator must be empty (a dangling unterminated field is malformed).
pub fn parse_string_list(payload: &[u8], min: usize) -> Result<Vec<&str>> {
    let mut fields = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let (field, tail) = split_field(rest)?;
        fields.push(field);
        rest = tail;
    }
    if fields.len() < min {
        return Err(XsError::MalformedRequest(format!(
            "expected at least {} fields, got {}",
            min,
            fields.len()
        )));
    }
    Ok(fields)
}

/// Join string fields into a NUL-terminated payload
pub fn join_strings<S: AsRef<str>>(fields: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        out.extend_from_slice(field.as_ref().as_bytes());
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = MsgHeader {
            op: 11,
            req_id: 0xdead_beef,
            tx_id: 7,
            len: 42,
        };
        let bytes = encode_header(&header);
        assert_eq!(decode_header(&bytes).unwrap(), header);
    }

    #[test]
    fn header_words_are_little_endian() {
        let bytes = encode_header(&MsgHeader {
            op: 1,
            req_id: 2,
            tx_id: 3,
            len: 0x0102_0304,
        });
        assert_eq!(&bytes[0..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn split_field_handles_write_style_payloads() {
        let payload = b"/a/b\0value with \0 inside";
        let (path, value) = split_field(payload).unwrap();
        assert_eq!(path, "/a/b");
        assert_eq!(value, b"value with \0 inside");
    }

    #[test]
    fn missing_terminator_is_malformed() {
        assert!(matches!(
            split_field(b"no-nul"),
            Err(XsError::MalformedRequest(_))
        ));
    }

    #[test]
    fn parse_strings_ignores_trailing_bytes() {
        let payload = b"path\0token\0garbage-after";
        let fields = parse_strings(payload, 2).unwrap();
        assert_eq!(fields, vec!["path", "token"]);
    }

    #[test]
    fn parse_string_list_round_trips_join() {
        let joined = join_strings(&["n0", "r5", "w3"]);
        let fields = parse_string_list(&joined, 1).unwrap();
        assert_eq!(fields, vec!["n0", "r5", "w3"]);
        assert!(matches!(
            parse_string_list(b"", 1),
            Err(XsError::MalformedRequest(_))
        ));
        assert!(matches!(
            parse_string_list(b"dangling", 0),
            Err(XsError::MalformedRequest(_))
        ));
    }
}
