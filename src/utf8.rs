//! First-character decoding over a possibly truncated byte window.

pub(crate) const MAX_CHAR_WIDTH: usize = 4;

/// Outcome of decoding the first character of a byte window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decoded {
    /// A character and the number of bytes it occupies.
    Char(char, usize),
    /// The window starts with bytes that can never begin a character.
    Invalid,
    /// The window is a prefix of a valid encoding; more bytes may complete it.
    Incomplete,
}

pub(crate) fn decode_first(window: &[u8]) -> Decoded {
    let Some(&first) = window.first() else {
        return Decoded::Incomplete;
    };
    if first < 0x80 {
        return Decoded::Char(first as char, 1);
    }
    let window = &window[..window.len().min(MAX_CHAR_WIDTH)];
    match core::str::from_utf8(window) {
        Ok(s) => first_char(s),
        Err(e) if e.valid_up_to() > 0 => match core::str::from_utf8(&window[..e.valid_up_to()]) {
            Ok(s) => first_char(s),
            Err(_) => Decoded::Invalid,
        },
        Err(e) if e.error_len().is_none() => Decoded::Incomplete,
        Err(_) => Decoded::Invalid,
    }
}

/// Whether the window begins with a complete character, or with bytes that no
/// amount of further input could turn into one.
pub(crate) fn starts_with_full_char(window: &[u8]) -> bool {
    !matches!(decode_first(window), Decoded::Incomplete)
}

fn first_char(s: &str) -> Decoded {
    match s.chars().next() {
        Some(c) => Decoded::Char(c, c.len_utf8()),
        None => Decoded::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii() {
        assert_eq!(Decoded::Char('a', 1), decode_first(b"abc"));
    }

    #[test]
    fn multibyte() {
        assert_eq!(Decoded::Char('é', 2), decode_first("équipe".as_bytes()));
        assert_eq!(Decoded::Char('日', 3), decode_first("日本".as_bytes()));
        assert_eq!(Decoded::Char('🦀', 4), decode_first("🦀".as_bytes()));
    }

    #[test]
    fn multibyte_followed_by_garbage() {
        assert_eq!(Decoded::Char('é', 2), decode_first(&[0xC3, 0xA9, 0xFF, 0xFF]));
    }

    #[test]
    fn truncated_is_incomplete() {
        let bytes = "日".as_bytes();
        assert_eq!(Decoded::Incomplete, decode_first(&bytes[..1]));
        assert_eq!(Decoded::Incomplete, decode_first(&bytes[..2]));
        assert_eq!(Decoded::Incomplete, decode_first(&[]));
    }

    #[test]
    fn invalid_lead_byte() {
        assert_eq!(Decoded::Invalid, decode_first(&[0xFF, b'a']));
        // A continuation byte on its own can never start a character.
        assert_eq!(Decoded::Invalid, decode_first(&[0x80]));
    }

    #[test]
    fn truncated_then_interrupted_sequence() {
        // The three-byte sequence is cut short by an ASCII byte.
        assert_eq!(Decoded::Invalid, decode_first(&[0xE6, 0x97, b'a']));
    }

    #[test]
    fn full_char_detection() {
        assert!(starts_with_full_char(b"a"));
        assert!(starts_with_full_char(&[0xFF]));
        assert!(!starts_with_full_char(&"日".as_bytes()[..2]));
        assert!(!starts_with_full_char(&[]));
    }
}
