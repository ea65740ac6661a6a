use std::fmt;

use bytes::BufMut;

use crate::serial::{STREAM_MAGIC, STREAM_VERSION};

/// An opaque serialized object handed over by a gadget generator.
///
/// The bytes are never interpreted. They may or may not carry their own
/// `AC ED 00 05` stream header; [`Payload::object_bytes`] strips it so the
/// object can be spliced into a call stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    data: Vec<u8>,
}

impl Payload {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn has_stream_header(&self) -> bool {
        self.data.len() >= 4
            && self.data[..2] == STREAM_MAGIC.to_be_bytes()
            && self.data[2..4] == STREAM_VERSION.to_be_bytes()
    }

    /// The object contents without a leading stream header.
    pub fn object_bytes(&self) -> &[u8] {
        if self.has_stream_header() {
            &self.data[4..]
        } else {
            &self.data
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.data.len())
    }
}

/// Java's "modified UTF-8": NUL is two bytes and supplementary characters are
/// written as two three-byte surrogates.
pub fn encode_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    let mut units = [0u16; 2];
    for ch in s.chars() {
        for &unit in ch.encode_utf16(&mut units).iter() {
            match unit {
                0x0001..=0x007F => out.push(unit as u8),
                0x0000 | 0x0080..=0x07FF => {
                    out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                    out.push(0x80 | (unit & 0x3F) as u8);
                }
                _ => {
                    out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                    out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                    out.push(0x80 | (unit & 0x3F) as u8);
                }
            }
        }
    }
    out
}

/// Decodes modified UTF-8. Malformed sequences become U+FFFD.
pub fn decode_modified_utf8(bytes: &[u8]) -> String {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let (unit, width) = if b & 0x80 == 0 {
            (u16::from(b), 1)
        } else if b & 0xE0 == 0xC0 && i + 1 < bytes.len() {
            ((u16::from(b & 0x1F) << 6) | u16::from(bytes[i + 1] & 0x3F), 2)
        } else if b & 0xF0 == 0xE0 && i + 2 < bytes.len() {
            (
                (u16::from(b & 0x0F) << 12)
                    | (u16::from(bytes[i + 1] & 0x3F) << 6)
                    | u16::from(bytes[i + 2] & 0x3F),
                3,
            )
        } else {
            (0xFFFD, 1)
        };
        units.push(unit);
        i += width;
    }
    String::from_utf16_lossy(&units)
}

/// `DataOutput.writeUTF`: a big-endian u16 length followed by modified UTF-8.
/// Strings longer than 65535 encoded bytes are cut at that length.
pub fn put_utf<B: BufMut>(buf: &mut B, s: &str) {
    let encoded = encode_modified_utf8(s);
    let len = encoded.len().min(usize::from(u16::MAX));
    buf.put_u16(len as u16);
    buf.put_slice(&encoded[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modified_utf8_nul_and_supplementary() {
        assert_eq!(encode_modified_utf8("a\0"), vec![b'a', 0xC0, 0x80]);
        let emoji = encode_modified_utf8("\u{1F600}");
        assert_eq!(emoji.len(), 6);
        assert_eq!(decode_modified_utf8(&emoji), "\u{1F600}");
        assert_eq!(decode_modified_utf8(&[b'a', 0xC0, 0x80]), "a\0");
    }

    #[test]
    fn put_utf_prefixes_length() {
        let mut buf = Vec::new();
        put_utf(&mut buf, "JRMI");
        assert_eq!(buf, vec![0, 4, b'J', b'R', b'M', b'I']);
    }

    #[test]
    fn payload_strips_stream_header() {
        let payload = Payload::new(vec![0xAC, 0xED, 0x00, 0x05, 0x70]);
        assert!(payload.has_stream_header());
        assert_eq!(payload.object_bytes(), &[0x70]);

        let bare = Payload::new(vec![0x70]);
        assert_eq!(bare.object_bytes(), &[0x70]);
    }
}
