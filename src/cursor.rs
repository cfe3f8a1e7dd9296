//! Opaque pagination cursors: base64 of the last delivered `seq`. Decoding
//! is the inverse of encoding; unknown/garbled cursors decode to "start"
//! rather than erroring.

use base64::{engine::general_purpose::STANDARD, Engine};

pub fn encode_cursor(seq: u64) -> String {
    STANDARD.encode(seq.to_string())
}

/// Decodes a cursor to the `seq` it marks the end of. Any cursor that fails
/// to decode or parse is treated as "start" (`None`) rather than an error,
/// so a garbled cursor degrades gracefully instead of rejecting the request.
pub fn decode_cursor(cursor: &str) -> Option<u64> {
    let bytes = STANDARD.decode(cursor).ok()?;
    let s = String::from_utf8(bytes).ok()?;
    s.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let c = encode_cursor(42);
        assert_eq!(decode_cursor(&c), Some(42));
    }

    #[test]
    fn garbled_cursor_decodes_to_start() {
        assert_eq!(decode_cursor("not-a-real-cursor!!"), None);
        assert_eq!(decode_cursor(""), None);
    }
}
