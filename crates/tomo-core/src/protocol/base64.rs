//! Standard base64 for moving PNG bytes through JSON.
//!
//! The slicing backend delivers every projection as a base64 string inside
//! the final progress frame, and the projection channel carries frames as
//! `data:` URLs.  Both directions use the standard padded alphabet.

use ::base64::engine::general_purpose::STANDARD;
use ::base64::Engine as _;

pub use ::base64::DecodeError;

/// Prefix of the `data:` URLs sent in `UPDATE_IMAGE`.
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Encodes `data` with padding.
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes padded standard base64.  ASCII whitespace (line-wrapped
/// payloads) is skipped.
///
/// # Errors
///
/// Returns [`DecodeError`] for characters outside the alphabet or bad
/// length/padding.
pub fn decode(text: &str) -> Result<Vec<u8>, DecodeError> {
    if text.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        STANDARD.decode(compact)
    } else {
        STANDARD.decode(text)
    }
}

/// Builds a `data:image/png;base64,...` URL.
pub fn png_data_url(png: &[u8]) -> String {
    let mut url = String::with_capacity(PNG_DATA_URL_PREFIX.len() + (png.len() + 2) / 3 * 4);
    url.push_str(PNG_DATA_URL_PREFIX);
    STANDARD.encode_string(png, &mut url);
    url
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uses_padded_standard_alphabet() {
        assert_eq!(encode(b"f"), "Zg==");
        assert_eq!(encode(b"foobar"), "Zm9vYmFy");
        assert_eq!(encode(&[0xfb, 0xff]), "+/8=");
    }

    #[test]
    fn test_decode_png_signature() {
        // First eight bytes of every PNG file.
        assert_eq!(
            decode("iVBORw0KGgo=").unwrap(),
            vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]
        );
    }

    #[test]
    fn test_decode_skips_line_breaks() {
        assert_eq!(decode("Zm9v\nYmFy\r\n").unwrap(), b"foobar");
    }

    #[test]
    fn test_decode_rejects_bad_character() {
        assert!(matches!(
            decode("Zm9*"),
            Err(DecodeError::InvalidByte(_, b'*'))
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        assert!(decode("Zm9").is_err());
    }

    #[test]
    fn test_png_data_url_prefixes_payload() {
        assert_eq!(png_data_url(b"abc"), "data:image/png;base64,YWJj");
    }
}
