//! UTF-16 helpers for text crossing the executor boundary.
//!
//! The executor takes its global config and debug frames as UTF-16LE and
//! emits inspector frames in native byte order.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

pub fn encode_utf16le(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Lossy decode. A trailing odd byte is ignored.
pub fn decode_utf16(bytes: &[u8], order: ByteOrder) -> String {
    let units = bytes.chunks_exact(2).map(|pair| {
        let pair = [pair[0], pair[1]];
        match order {
            ByteOrder::Little => u16::from_le_bytes(pair),
            ByteOrder::Big => u16::from_be_bytes(pair),
        }
    });
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16le_layout() {
        assert_eq!(encode_utf16le("Hi"), vec![b'H', 0, b'i', 0]);
    }

    #[test]
    fn decodes_both_orders() {
        let le = encode_utf16le("调试 {}");
        assert_eq!(decode_utf16(&le, ByteOrder::Little), "调试 {}");

        let be: Vec<u8> = "ok".encode_utf16().flat_map(u16::to_be_bytes).collect();
        assert_eq!(decode_utf16(&be, ByteOrder::Big), "ok");
    }

    #[test]
    fn odd_trailing_byte_ignored() {
        let mut bytes = encode_utf16le("a");
        bytes.push(0x41);
        assert_eq!(decode_utf16(&bytes, ByteOrder::Little), "a");
    }
}
