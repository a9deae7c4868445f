use std::fmt::Write;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::Error;

/// Text encoding applied to body chunks by [`BodyStream::set_encoding`].
///
/// [`BodyStream::set_encoding`]: crate::BodyStream::set_encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// Each byte is one char. Also known as `binary`.
    Latin1,
    /// Latin1 with the high bit cleared.
    Ascii,
    /// Lowercase hex, two chars per byte.
    Hex,
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let enc = match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Encoding::Utf8,
            "latin1" | "binary" => Encoding::Latin1,
            "ascii" => Encoding::Ascii,
            "hex" => Encoding::Hex,
            _ => return Err(Error::UnknownEncoding(s.to_string())),
        };
        Ok(enc)
    }
}

/// Turns body bytes into text without splitting multi-byte sequences
/// across chunks.
#[derive(Debug)]
pub(crate) struct TextDecoder {
    encoding: Encoding,
    partial: SmallVec<[u8; 4]>,
}

impl TextDecoder {
    pub fn new(encoding: Encoding) -> Self {
        TextDecoder {
            encoding,
            partial: SmallVec::new(),
        }
    }

    pub fn decode(&mut self, input: &[u8]) -> String {
        match self.encoding {
            Encoding::Utf8 => self.decode_utf8(input),
            Encoding::Latin1 => input.iter().map(|b| *b as char).collect(),
            Encoding::Ascii => input.iter().map(|b| (b & 0x7f) as char).collect(),
            Encoding::Hex => {
                let mut s = String::with_capacity(input.len() * 2);
                for b in input {
                    let _ = write!(s, "{:02x}", b);
                }
                s
            }
        }
    }

    /// Whatever is held back at end of body.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        self.partial.clear();
        Some(char::REPLACEMENT_CHARACTER.to_string())
    }

    fn decode_utf8(&mut self, input: &[u8]) -> String {
        let joined;
        let mut rest: &[u8] = if self.partial.is_empty() {
            input
        } else {
            let mut v = std::mem::take(&mut self.partial).into_vec();
            v.extend_from_slice(input);
            joined = v;
            &joined
        };

        let mut out = String::with_capacity(rest.len());

        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or_default());
                    match e.error_len() {
                        Some(n) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + n..];
                        }
                        None => {
                            // Incomplete sequence at the end, keep for next time.
                            self.partial.extend_from_slice(&rest[valid..]);
                            break;
                        }
                    }
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_names() {
        assert_eq!("UTF-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("binary".parse::<Encoding>().unwrap(), Encoding::Latin1);
        assert!("ebcdic".parse::<Encoding>().is_err());
    }

    #[test]
    fn utf8_split_sequence() {
        let snow = "☃".as_bytes();
        let mut d = TextDecoder::new(Encoding::Utf8);
        assert_eq!(d.decode(&[b'a', snow[0]]), "a");
        assert_eq!(d.decode(&snow[1..2]), "");
        assert_eq!(d.decode(&[snow[2], b'b']), "☃b");
        assert!(d.finish().is_none());
    }

    #[test]
    fn utf8_dangling_at_end() {
        let mut d = TextDecoder::new(Encoding::Utf8);
        assert_eq!(d.decode(&[b'x', 0xe2]), "x");
        assert_eq!(d.finish().as_deref(), Some("\u{fffd}"));
    }

    #[test]
    fn utf8_invalid_byte() {
        let mut d = TextDecoder::new(Encoding::Utf8);
        assert_eq!(d.decode(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }

    #[test]
    fn other_encodings() {
        assert_eq!(TextDecoder::new(Encoding::Hex).decode(&[0x01, 0xab]), "01ab");
        assert_eq!(TextDecoder::new(Encoding::Latin1).decode(&[0xe9]), "é");
        assert_eq!(TextDecoder::new(Encoding::Ascii).decode(&[0xc1]), "A");
    }
}
