use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use http::{Method, Version};

use crate::chunk::Dechunker;
use crate::ext::StatusExt;
use crate::header::Headers;
use crate::parser::Head;
use crate::util::{compare_lowercase_ascii, LengthChecker};
use crate::Error;

/// Outcome of one [`BodyReader::decode`] step.
#[derive(Debug)]
pub(crate) enum Decoded {
    /// Need more input.
    Pending,
    Data(Bytes),
    /// Body complete, with trailers if the peer sent any.
    End(Option<Headers>),
}

pub(crate) enum BodyReader {
    /// No body is expected either due to the status or method.
    NoBody,
    /// Delimited by content-length.
    /// The value is what's left to receive.
    LengthDelimited(u64),
    /// Chunked, with the trailer names the head announced.
    Chunked(Dechunker, Vec<String>),
    /// Expect remote to close at end of body.
    CloseDelimited,
    /// End has been reported.
    Ended,
}

impl BodyReader {
    pub fn for_request(head: &Head, max_headers: usize) -> Result<Self, Error> {
        let http10 = head.version == Version::HTTP_10;

        let ret = match Self::header_defined(http10, &head.headers, max_headers)? {
            // Request bodies cannot be close delimited (even under http10).
            Self::CloseDelimited => Self::NoBody,
            r => r,
        };

        Ok(ret)
    }

    pub fn for_response(method: &Method, head: &Head, max_headers: usize) -> Result<Self, Error> {
        let status_code = head.status().ok_or(Error::ResponseInvalidStatus)?;
        let http10 = head.version == Version::HTTP_10;

        let has_no_body =
            // https://datatracker.ietf.org/doc/html/rfc2616#section-4.3
            // All responses to the HEAD request method
            // MUST NOT include a message-body, even though the presence of entity-
            // header fields might lead one to believe they do.
            method == Method::HEAD ||
            // A client MUST ignore any Content-Length or Transfer-Encoding
            // header fields received in a successful response to CONNECT.
            status_code.is_success() && method == Method::CONNECT ||
            // All 1xx (informational), 204 (no content), and 304 (not modified) responses
            // MUST NOT include a message-body.
            status_code.is_bodyless();

        if has_no_body {
            return Ok(Self::NoBody);
        }

        // https://datatracker.ietf.org/doc/html/rfc2616#section-4.3
        // All other responses do include a message-body, although it MAY be of zero length.
        Self::header_defined(http10, &head.headers, max_headers)
    }

    fn header_defined(http10: bool, headers: &Headers, max_headers: usize) -> Result<Self, Error> {
        let mut content_length: Option<u64> = None;

        if let Some(values) = headers.get("content-length") {
            // Repeated lengths are fine as long as they agree.
            for v in values.tokens() {
                let v = v.parse::<u64>().map_err(|_| Error::BadContentLengthHeader)?;
                if content_length.map(|c| c != v).unwrap_or(false) {
                    return Err(Error::TooManyContentLengthHeaders);
                }
                content_length = Some(v);
            }
        }

        let chunked = headers
            .get("transfer-encoding")
            .map(|v| v.tokens().any(|t| compare_lowercase_ascii(t, "chunked")))
            .unwrap_or(false);

        if chunked && !http10 {
            // https://datatracker.ietf.org/doc/html/rfc2616#section-4.4
            // Messages MUST NOT include both a Content-Length header field and a
            // non-identity transfer-coding. If the message does include a non-
            // identity transfer-coding, the Content-Length MUST be ignored.
            let announced = headers
                .get("trailer")
                .or_else(|| headers.get("trailers"))
                .map(|v| v.tokens().map(|t| t.to_string()).collect())
                .unwrap_or_default();
            return Ok(Self::Chunked(Dechunker::new(max_headers), announced));
        }

        if let Some(len) = content_length {
            return Ok(Self::LengthDelimited(len));
        }

        Ok(Self::CloseDelimited)
    }

    /// Take body bytes out of `src`.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Decoded, Error> {
        let decoded = match self {
            BodyReader::NoBody | BodyReader::LengthDelimited(0) => Decoded::End(None),
            BodyReader::LengthDelimited(left) => {
                if src.is_empty() {
                    return Ok(Decoded::Pending);
                }
                let left_usize = (*left).min(usize::MAX as u64) as usize;
                let to_read = src.len().min(left_usize);
                *left -= to_read as u64;
                Decoded::Data(src.split_to(to_read).freeze())
            }
            BodyReader::Chunked(dechunker, announced) => {
                let mut out = BytesMut::new();
                let used = dechunker.parse_input(src, &mut out)?;
                let _ = src.split_to(used);
                trace!("Read chunked: {}", used);

                if !out.is_empty() {
                    Decoded::Data(out.freeze())
                } else if dechunker.is_ended() {
                    Decoded::End(dechunker.take_trailers().and_then(|t| only_announced(t, announced)))
                } else {
                    return Ok(Decoded::Pending);
                }
            }
            BodyReader::CloseDelimited => {
                if src.is_empty() {
                    return Ok(Decoded::Pending);
                }
                Decoded::Data(src.split().freeze())
            }
            BodyReader::Ended => return Ok(Decoded::Pending),
        };

        if matches!(decoded, Decoded::End(_)) {
            *self = BodyReader::Ended;
        }

        Ok(decoded)
    }

    /// The transport reached end of file. Close delimited bodies end here,
    /// anything else unfinished is an incomplete message.
    pub fn on_eof(&mut self) -> Result<Decoded, Error> {
        match self {
            BodyReader::CloseDelimited => {
                *self = BodyReader::Ended;
                Ok(Decoded::End(None))
            }
            BodyReader::Ended => Ok(Decoded::Pending),
            _ => Err(Error::IncompleteMessage),
        }
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, BodyReader::Ended)
    }
}

impl fmt::Debug for BodyReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBody => write!(f, "NoBody"),
            Self::LengthDelimited(arg0) => f.debug_tuple("LengthDelimited").field(arg0).finish(),
            Self::Chunked(..) => write!(f, "Chunked"),
            Self::CloseDelimited => write!(f, "CloseDelimited"),
            Self::Ended => write!(f, "Ended"),
        }
    }
}

/// Trailers the head did not announce are dropped.
fn only_announced(trailers: Headers, announced: &[String]) -> Option<Headers> {
    let kept: Headers = trailers
        .into_iter()
        .filter(|(name, _)| announced.iter().any(|a| a.eq_ignore_ascii_case(name)))
        .collect();
    (!kept.is_empty()).then_some(kept)
}

/// Framing chosen for an outgoing body when the head is committed.
#[derive(Debug)]
pub(crate) enum BodyWriter {
    /// The message cannot carry a body. Writes are dropped.
    None,
    Sized(LengthChecker),
    Chunked,
    /// Delimited by closing the connection.
    CloseDelimited,
}

impl BodyWriter {
    pub fn is_chunked(&self) -> bool {
        matches!(self, Self::Chunked)
    }

    pub fn encode(&mut self, input: &[u8], out: &mut BytesMut) -> Result<(), Error> {
        match self {
            BodyWriter::None => {}
            BodyWriter::Sized(checker) => {
                checker.append(input.len())?;
                out.put_slice(input);
            }
            BodyWriter::Chunked => {
                // 0 length means end-of-body.
                if !input.is_empty() {
                    out.put_slice(format!("{:x}\r\n", input.len()).as_bytes());
                    out.put_slice(input);
                    out.put_slice(b"\r\n");
                }
            }
            BodyWriter::CloseDelimited => out.put_slice(input),
        }
        Ok(())
    }

    /// Terminate the body. Returns `false` if the framing was left broken
    /// and the connection must not be reused.
    pub fn finish(&mut self, trailers: Option<&Headers>, out: &mut BytesMut) -> bool {
        match self {
            BodyWriter::None => true,
            BodyWriter::Sized(checker) => checker.complete(),
            BodyWriter::Chunked => {
                out.put_slice(b"0\r\n");
                if let Some(trailers) = trailers {
                    trailers.write_to(out);
                }
                out.put_slice(b"\r\n");
                true
            }
            BodyWriter::CloseDelimited => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::{try_parse_request, try_parse_response};

    fn req(s: &str) -> Head {
        try_parse_request(s.as_bytes(), 100).unwrap().unwrap().1
    }

    fn res(s: &str) -> Head {
        try_parse_response(s.as_bytes(), 100).unwrap().unwrap().1
    }

    #[test]
    fn chunked_wins_over_length() {
        let h = req("POST / HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n");
        let r = BodyReader::for_request(&h, 100).unwrap();
        assert!(matches!(r, BodyReader::Chunked(..)));
    }

    #[test]
    fn conflicting_lengths() {
        let h = req("POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\n");
        assert!(matches!(
            BodyReader::for_request(&h, 100),
            Err(Error::TooManyContentLengthHeaders)
        ));
        let h = req("POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 5\r\n\r\n");
        assert!(matches!(
            BodyReader::for_request(&h, 100),
            Ok(BodyReader::LengthDelimited(5))
        ));
    }

    #[test]
    fn request_without_length_has_no_body() {
        let h = req("GET / HTTP/1.1\r\n\r\n");
        let mut r = BodyReader::for_request(&h, 100).unwrap();
        let mut src = BytesMut::from(&b"GET /next"[..]);
        assert!(matches!(r.decode(&mut src).unwrap(), Decoded::End(None)));
        assert_eq!(src.len(), 9);
    }

    #[test]
    fn response_close_delimited() {
        let h = res("HTTP/1.1 200 OK\r\n\r\n");
        let mut r = BodyReader::for_response(&Method::GET, &h, 100).unwrap();
        let mut src = BytesMut::from(&b"abc"[..]);
        assert!(matches!(r.decode(&mut src).unwrap(), Decoded::Data(d) if d == "abc"));
        assert!(matches!(r.decode(&mut src).unwrap(), Decoded::Pending));
        assert!(matches!(r.on_eof().unwrap(), Decoded::End(None)));
    }

    #[test]
    fn response_without_body() {
        let h = res("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n");
        let r = BodyReader::for_response(&Method::HEAD, &h, 100).unwrap();
        assert!(matches!(r, BodyReader::NoBody));
        let h = res("HTTP/1.1 304 Not Modified\r\nContent-Length: 10\r\n\r\n");
        let r = BodyReader::for_response(&Method::GET, &h, 100).unwrap();
        assert!(matches!(r, BodyReader::NoBody));
        let h = res("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n");
        let r = BodyReader::for_response(&Method::CONNECT, &h, 100).unwrap();
        assert!(matches!(r, BodyReader::NoBody));
    }

    #[test]
    fn length_delimited_incomplete_on_eof() {
        let h = req("POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n");
        let mut r = BodyReader::for_request(&h, 100).unwrap();
        let mut src = BytesMut::from(&b"abc"[..]);
        assert!(matches!(r.decode(&mut src).unwrap(), Decoded::Data(_)));
        assert!(matches!(r.on_eof(), Err(Error::IncompleteMessage)));
    }

    #[test]
    fn unannounced_trailers_dropped() {
        let h = req("POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nTrailer: X-A\r\n\r\n");
        let mut r = BodyReader::for_request(&h, 100).unwrap();
        let mut src = BytesMut::from(&b"1\r\na\r\n0\r\nX-A: 1\r\nX-B: 2\r\n\r\n"[..]);
        assert!(matches!(r.decode(&mut src).unwrap(), Decoded::Data(d) if d == "a"));
        let Decoded::End(Some(t)) = r.decode(&mut src).unwrap() else {
            panic!("expected trailers");
        };
        assert_eq!(t.get_str("x-a"), Some("1"));
        assert!(!t.contains("x-b"));

        let h = req("POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n");
        let mut r = BodyReader::for_request(&h, 100).unwrap();
        let mut src = BytesMut::from(&b"0\r\nX-A: 1\r\n\r\n"[..]);
        assert!(matches!(r.decode(&mut src).unwrap(), Decoded::End(None)));
    }

    #[test]
    fn chunked_writer() {
        let mut w = BodyWriter::Chunked;
        let mut out = BytesMut::new();
        w.encode(b"hello", &mut out).unwrap();
        w.encode(b"", &mut out).unwrap();
        let mut t = Headers::new();
        t.set("Checksum", "1");
        assert!(w.finish(Some(&t), &mut out));
        assert_eq!(&out[..], b"5\r\nhello\r\n0\r\nChecksum: 1\r\n\r\n");
    }

    #[test]
    fn sized_writer() {
        let mut w = BodyWriter::Sized(LengthChecker::new(4));
        let mut out = BytesMut::new();
        w.encode(b"abc", &mut out).unwrap();
        assert!(!w.finish(None, &mut out));
        assert!(matches!(
            w.encode(b"de", &mut out),
            Err(Error::BodyLargerThanContentLength)
        ));
        w.encode(b"d", &mut out).unwrap();
        assert!(w.finish(None, &mut out));
        assert_eq!(&out[..], b"abcd");
    }
}
