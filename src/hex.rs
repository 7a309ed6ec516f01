use std::fmt::Display;

/// A valid lower-case hexadecimal encoding of binary data.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Hex(Vec<u8>);

impl Hex {
    /// Decodes hexadecimal text, rejecting odd lengths and anything that
    /// isn't a lower-case hex digit.
    pub fn decode(text: &str) -> Option<Vec<u8>> {
        fn unhex_digit(h: u8) -> Option<u8> {
            match h {
                b'0'..=b'9' => Some(h - b'0'),
                b'a'..=b'f' => Some(h - b'a' + 10),
                _ => None,
            }
        }

        let digits = text.as_bytes();
        if digits.len() % 2 != 0 {
            return None;
        }
        digits
            .chunks(2)
            .map(|pair| Some(unhex_digit(pair[0])? << 4 | unhex_digit(pair[1])?))
            .collect()
    }

    /// Whether `text` is exactly `bytes` bytes worth of hex digits.
    pub fn is_encoding_of(text: &str, bytes: usize) -> bool {
        text.len() == bytes * 2 && Hex::decode(text).is_some()
    }
}

impl Display for Hex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &digit in &self.0 {
            write!(f, "{}", digit as char)?;
        }
        Ok(())
    }
}

impl<'a> From<&'a [u8]> for Hex {
    fn from(bytes: &[u8]) -> Self {
        fn hex_digit(b: u8) -> u8 {
            if b <= 9 {
                b + b'0'
            } else {
                b + b'a' - 10
            }
        }

        let mut out = vec![0u8; bytes.len() * 2];
        let mut i = 0;
        for &b in bytes {
            out[i] = hex_digit((b & 0b11110000) >> 4);
            out[i + 1] = hex_digit(b & 0b00001111);
            i += 2;
        }
        Hex(out)
    }
}

#[test]
fn test_hex_decode() {
    let example: &[u8] = b"hello, world";
    let hex = Hex::from(example).to_string();
    assert_eq!(hex, "68656c6c6f2c20776f726c64");
    assert_eq!(Hex::decode(&hex).as_deref(), Some(example));
}

#[test]
fn test_hex_rejects_garbage() {
    assert_eq!(Hex::decode("abc"), None);
    assert_eq!(Hex::decode("zz"), None);
    assert_eq!(Hex::decode("AB"), None);
    assert!(Hex::is_encoding_of("00ff", 2));
    assert!(!Hex::is_encoding_of("00ff", 3));
}
