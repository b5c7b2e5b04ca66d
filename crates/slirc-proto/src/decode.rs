//! Heuristic text decoding for protocol parameters.
//!
//! Servers relay whatever octets clients send, so a single line may carry
//! parameters in different encodings. Each parameter is decoded on its own
//! by trying, in order:
//!
//! 1. UTF-8
//! 2. ISO-8859-1, accepted only when the octets contain no C1 controls
//! 3. Windows-1252
//! 4. UTF-8 with lossy replacement

use encoding::WINDOWS_1252;

/// Decode one parameter's octets into text.
pub fn heuristic_decode(octets: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(octets) {
        return text.to_owned();
    }

    if let Some(text) = decode_latin1(octets) {
        return text;
    }

    if let Some(text) = WINDOWS_1252.decode_without_bom_handling_and_without_replacement(octets) {
        return text.into_owned();
    }

    String::from_utf8_lossy(octets).into_owned()
}

/// ISO-8859-1 maps every octet to the code point of the same value.
///
/// The 0x80..=0x9F range is control characters in Latin-1 but printable in
/// Windows-1252, so lines containing them are left for the next decoder.
fn decode_latin1(octets: &[u8]) -> Option<String> {
    if octets.iter().any(|b| (0x80..=0x9F).contains(b)) {
        return None;
    }
    Some(octets.iter().map(|&b| char::from(b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_passes_through() {
        assert_eq!(heuristic_decode("héllo ☃".as_bytes()), "héllo ☃");
    }

    #[test]
    fn latin1_fallback() {
        // "café" in ISO-8859-1
        assert_eq!(heuristic_decode(&[0x63, 0x61, 0x66, 0xE9]), "café");
    }

    #[test]
    fn windows_1252_fallback() {
        // 0x93/0x94 are curly quotes in Windows-1252
        assert_eq!(heuristic_decode(&[0x93, 0x68, 0x69, 0x94]), "\u{201C}hi\u{201D}");
    }

    #[test]
    fn ascii_is_identity() {
        assert_eq!(heuristic_decode(b"PRIVMSG"), "PRIVMSG");
        assert_eq!(heuristic_decode(b""), "");
    }
}
