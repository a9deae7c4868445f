use core::str;

use bytes::BytesMut;

use crate::header::Headers;
use crate::parser::{parse_trailers, MAX_HEAD_SIZE};
use crate::util::{find_crlf, find_double_crlf};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Chunk(usize),
    CrLf,
    Ending,
    Trailer,
    Ended,
}

/// Decoder for `transfer-encoding: chunked`, trailers included.
#[derive(Debug)]
pub(crate) struct Dechunker {
    state: State,
    max_headers: usize,
    trailers: Option<Headers>,
}

#[derive(Debug)]
struct Pos {
    index_in: usize,
}

impl Dechunker {
    pub fn new(max_headers: usize) -> Self {
        Dechunker {
            state: State::Size,
            max_headers,
            trailers: None,
        }
    }

    /// Decode as much of `src` as possible into `dst`. Returns the amount
    /// of `src` used.
    pub fn parse_input(&mut self, src: &[u8], dst: &mut BytesMut) -> Result<usize, Error> {
        let mut pos = Pos { index_in: 0 };

        loop {
            let more = match self.state {
                State::Size => self.read_size(src, &mut pos)?,
                State::Chunk(_) => self.read_data(src, dst, &mut pos)?,
                State::CrLf => self.expect_crlf(src, &mut pos)?,
                State::Ending => self.trailer_or_ended(src, &mut pos)?,
                State::Trailer => self.trailer(src, &mut pos)?,
                State::Ended => false,
            };

            if !more {
                break;
            }
        }

        Ok(pos.index_in)
    }

    #[cfg(test)]
    fn left(&self) -> usize {
        if let State::Chunk(l) = self.state {
            l
        } else {
            0
        }
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.state, State::Ended)
    }

    pub fn take_trailers(&mut self) -> Option<Headers> {
        self.trailers.take()
    }

    fn read_size(&mut self, src: &[u8], pos: &mut Pos) -> Result<bool, Error> {
        let src = &src[pos.index_in..];

        const SANITY_CHECK: usize = 20;

        let i = match find_crlf(src) {
            Some(v) => v,
            None => {
                // A size line without extensions is never this long.
                if src.len() > 1024 {
                    return Err(Error::ChunkExpectedCrLf);
                }
                return Ok(false);
            }
        };

        let maybe_meta = src.iter().take(i).position(|c| *c == b';');

        let len_end = maybe_meta.unwrap_or(i);
        if len_end > SANITY_CHECK {
            return Err(Error::ChunkExpectedCrLf);
        }
        let len_str = str::from_utf8(&src[..len_end]).map_err(|_| Error::ChunkLenNotAscii)?;

        let len_str = len_str.trim();
        // from_str_radix would take a sign.
        if len_str.is_empty() || !len_str.bytes().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::ChunkLenNotANumber);
        }
        let len = usize::from_str_radix(len_str, 16).map_err(|_| Error::ChunkLenNotANumber)?;

        pos.index_in += i + 2;
        self.state = if len == 0 {
            State::Ending
        } else {
            State::Chunk(len)
        };

        Ok(true)
    }

    fn read_data(&mut self, src: &[u8], dst: &mut BytesMut, pos: &mut Pos) -> Result<bool, Error> {
        let src = &src[pos.index_in..];

        let State::Chunk(left) = &mut self.state else {
            unreachable!()
        };

        let to_read = src.len().min(*left);

        dst.extend_from_slice(&src[..to_read]);
        pos.index_in += to_read;
        *left -= to_read;

        if *left == 0 {
            self.state = State::CrLf;
        }

        Ok(to_read > 0)
    }

    fn expect_crlf(&mut self, src: &[u8], pos: &mut Pos) -> Result<bool, Error> {
        let src = &src[pos.index_in..];

        if src.len() < 2 {
            return Ok(false);
        }

        if &src[..2] != b"\r\n" {
            return Err(Error::ChunkExpectedCrLf);
        }

        pos.index_in += 2;
        self.state = State::Size;

        Ok(true)
    }

    fn trailer_or_ended(&mut self, src: &[u8], pos: &mut Pos) -> Result<bool, Error> {
        let src = &src[pos.index_in..];

        if src.len() < 2 {
            return Ok(false);
        }

        if &src[..2] == b"\r\n" {
            pos.index_in += 2;
            self.state = State::Ended;
            trace!("Chunked body ended");
        } else {
            // Non-crlf before
            self.state = State::Trailer;
        }

        Ok(true)
    }

    fn trailer(&mut self, src: &[u8], pos: &mut Pos) -> Result<bool, Error> {
        let src = &src[pos.index_in..];

        let i = match find_double_crlf(src) {
            Some(v) => v,
            None => {
                if src.len() > MAX_HEAD_SIZE {
                    return Err(Error::HeadTooLarge(MAX_HEAD_SIZE));
                }
                return Ok(false);
            }
        };

        // the trailer block and the empty line ending it.
        let block = &src[..i + 4];
        let trailers = parse_trailers(block, self.max_headers)?;
        trace!("Chunked body ended with {} trailers", trailers.len());

        self.trailers = Some(trailers);
        pos.index_in += i + 4;
        self.state = State::Ended;

        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dechunk_size() -> Result<(), Error> {
        let mut d = Dechunker::new(100);
        let mut b = BytesMut::new();
        assert_eq!(d.parse_input(b"", &mut b)?, 0);
        assert_eq!(d.parse_input(b"2", &mut b)?, 0);
        assert_eq!(d.parse_input(b"2\r", &mut b)?, 0);
        assert_eq!(d.left(), 0);
        assert_eq!(d.parse_input(b"2\r\n", &mut b)?, 3);
        assert_eq!(d.left(), 2);
        Ok(())
    }

    #[test]
    fn test_dechunk_size_meta() -> Result<(), Error> {
        let mut d = Dechunker::new(100);
        let mut b = BytesMut::new();
        assert_eq!(d.parse_input(b"2;meta\r", &mut b)?, 0);
        assert_eq!(d.parse_input(b"2;meta\r\n", &mut b)?, 8);
        Ok(())
    }

    #[test]
    fn test_dechunk_size_not_meta() -> Result<(), Error> {
        let mut d = Dechunker::new(100);
        let mut b = BytesMut::new();
        assert_eq!(d.parse_input(b"9\r\nnot meta;\r\n", &mut b)?, 14);
        assert_eq!(&b[..], b"not meta;");
        Ok(())
    }

    #[test]
    fn test_dechunk_data() -> Result<(), Error> {
        let mut d = Dechunker::new(100);
        let mut b = BytesMut::new();
        assert_eq!(d.parse_input(b"2\r\nOK", &mut b)?, 5);
        assert_eq!(&b[..], b"OK");
        assert_eq!(d.left(), 0);
        assert_eq!(d.parse_input(b"\r\n", &mut b)?, 2);
        assert!(!d.is_ended());
        assert_eq!(d.parse_input(b"0\r\n", &mut b)?, 3);
        assert!(!d.is_ended());
        assert_eq!(d.parse_input(b"\r\n", &mut b)?, 2);
        assert!(d.is_ended());
        assert!(d.take_trailers().is_none());
        Ok(())
    }

    #[test]
    fn test_dechunk_trailers() -> Result<(), Error> {
        let mut d = Dechunker::new(100);
        let mut b = BytesMut::new();
        let input = b"3\r\nabc\r\n0\r\nChecksum: 42\r\n\r\nGET";
        assert_eq!(d.parse_input(&input[..20], &mut b)?, 11);
        assert!(!d.is_ended());
        assert_eq!(d.parse_input(&input[11..], &mut b)?, input.len() - 11 - 3);
        assert!(d.is_ended());
        assert_eq!(&b[..], b"abc");
        let t = d.take_trailers().unwrap();
        assert_eq!(t.get_str("checksum"), Some("42"));
        Ok(())
    }

    #[test]
    fn test_dechunk_bad_crlf() {
        let mut d = Dechunker::new(100);
        let mut b = BytesMut::new();
        assert!(matches!(
            d.parse_input(b"2\r\nOKxx", &mut b),
            Err(Error::ChunkExpectedCrLf)
        ));
    }

    #[test]
    fn test_dechunk_not_number() {
        let mut d = Dechunker::new(100);
        let mut b = BytesMut::new();
        assert!(matches!(
            d.parse_input(b"zz\r\n", &mut b),
            Err(Error::ChunkLenNotANumber)
        ));
    }

    #[test]
    fn test_dechunk_signed_size() {
        for input in [&b"+5\r\nhello\r\n"[..], &b"-0\r\n"[..], &b"\r\n"[..]] {
            let mut d = Dechunker::new(100);
            let mut b = BytesMut::new();
            assert!(matches!(
                d.parse_input(input, &mut b),
                Err(Error::ChunkLenNotANumber)
            ));
        }
    }
}
