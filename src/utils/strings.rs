use encoding::{DecoderTrap, EncodingRef};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Utf16LeDecodeError {
    OddLength,
    InvalidData,
}

/// Decode a UTF-16LE byte slice until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16le_bytes_z(bytes: &[u8]) -> Result<String, Utf16LeDecodeError> {
    if !bytes.len().is_multiple_of(2) {
        return Err(Utf16LeDecodeError::OddLength);
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    let end = units.iter().position(|&c| c == 0).unwrap_or(units.len());
    String::from_utf16(&units[..end]).map_err(|_| Utf16LeDecodeError::InvalidData)
}

/// Decode an ANSI (code page) byte slice until the first NUL byte, if present.
pub(crate) fn decode_ansi_z(bytes: &[u8], codec: EncodingRef) -> Result<String, String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    codec
        .decode(&bytes[..end], DecoderTrap::Strict)
        .map_err(|m| format!("{} ({})", m, codec.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding::all::WINDOWS_1252;

    #[test]
    fn utf16_stops_at_first_nul() {
        let bytes: Vec<u8> = "ab\0\0cd"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        assert_eq!(decode_utf16le_bytes_z(&bytes), Ok("ab".to_string()));
        assert_eq!(
            decode_utf16le_bytes_z(&[0x41]),
            Err(Utf16LeDecodeError::OddLength)
        );
    }

    #[test]
    fn ansi_uses_the_given_code_page() {
        assert_eq!(
            decode_ansi_z(b"caf\xe9\0\0\0", WINDOWS_1252),
            Ok("caf\u{e9}".to_string())
        );
    }
}
