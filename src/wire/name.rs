//! DNS name (label sequence) parsing and encoding.
//!
//! Reference: RFC 1035 §4.1.2/§4.1.4. Supports compression pointers on
//! *parse* (a conforming resolver may send one in a TCP-retried query) but
//! never emits one: every answer in this server repeats the qname verbatim,
//! matching the upstream `dnslib`-based implementation this was ported from.

use crate::error::{BridgeError, Result};

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_HOPS: usize = 32;

/// Parses a (possibly compressed) name starting at `pos` in `msg`. Returns
/// the dotted-lowercase name and the offset immediately after the name *in
/// the original, uncompressed stream position* (i.e. past the terminating
/// zero byte or the two bytes of a pointer, whichever ends the name).
pub fn parse_name(msg: &[u8], pos: usize) -> Result<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut cursor = pos;
    let mut end_of_name: Option<usize> = None;
    let mut hops = 0;

    loop {
        let len_byte = *msg
            .get(cursor)
            .ok_or_else(|| BridgeError::MalformedMessage("name ran past end of message".into()))?;

        if len_byte == 0 {
            cursor += 1;
            if end_of_name.is_none() {
                end_of_name = Some(cursor);
            }
            break;
        }

        if len_byte & 0xc0 == 0xc0 {
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(BridgeError::MalformedMessage("too many compression pointers".into()));
            }
            let lo = *msg
                .get(cursor + 1)
                .ok_or_else(|| BridgeError::MalformedMessage("truncated compression pointer".into()))?;
            let offset = (((len_byte & 0x3f) as usize) << 8) | lo as usize;
            if end_of_name.is_none() {
                end_of_name = Some(cursor + 2);
            }
            if offset >= cursor {
                return Err(BridgeError::MalformedMessage("forward/self-referencing pointer".into()));
            }
            cursor = offset;
            continue;
        }

        let len = len_byte as usize;
        if len > MAX_LABEL_LEN {
            return Err(BridgeError::MalformedMessage("label exceeds 63 bytes".into()));
        }
        let start = cursor + 1;
        let end = start + len;
        let label_bytes = msg
            .get(start..end)
            .ok_or_else(|| BridgeError::MalformedMessage("label ran past end of message".into()))?;
        let label = String::from_utf8_lossy(label_bytes).to_ascii_lowercase();
        labels.push(label);
        cursor = end;
    }

    let name = labels.join(".");
    if name.len() > MAX_NAME_LEN {
        return Err(BridgeError::MalformedMessage("name exceeds 255 bytes".into()));
    }
    Ok((name, end_of_name.unwrap_or(cursor)))
}

/// Encodes a dotted name (may be empty, the root) as a label sequence with
/// no compression.
pub fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    if !name.is_empty() {
        for label in name.split('.') {
            let bytes = label.as_bytes();
            out.push(bytes.len() as u8);
            out.extend_from_slice(bytes);
        }
    }
    out.push(0);
    out
}
