use encoding::all::ISO_8859_1;
use encoding::{DecoderTrap, Encoding};

/// Bytes dBASE writers use to pad unused field space
const PADDING: [u8; 2] = [b' ', 0x00];

/// Decode ISO-8859-1 bytes to a UTF-8 string, replacing anything the codec rejects
pub fn decode_from_iso_8859_1_lossy(input: &[u8]) -> String {
    ISO_8859_1
        .decode(input, DecoderTrap::Replace)
        .unwrap_or_else(|_| String::from_utf8_lossy(input).to_string())
}

/// Strip trailing padding (spaces and NULs)
pub fn trim_end_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !PADDING.contains(b))
        .map_or(0, |pos| pos + 1);
    &bytes[..end]
}

/// Strip leading and trailing padding
pub fn trim_padding(bytes: &[u8]) -> &[u8] {
    let trimmed = trim_end_padding(bytes);
    let start = trimmed
        .iter()
        .position(|b| !PADDING.contains(b))
        .unwrap_or(trimmed.len());
    &trimmed[start..]
}

pub fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| PADDING.contains(b))
}

/// Decode a character field: ISO-8859-1 text with trailing padding removed
pub fn decode_character(bytes: &[u8]) -> String {
    decode_from_iso_8859_1_lossy(trim_end_padding(bytes))
}
