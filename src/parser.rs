use http::{Method, Version};

use crate::header::Headers;
use crate::{Error, Result};

/// Largest accepted header block, start line included.
pub(crate) const MAX_HEAD_SIZE: usize = 64 * 1024;

// httparse needs its header slots up front. Start small and grow.
const INITIAL_HEADER_SLOTS: usize = 32;

/// First line of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: Method, url: String },
    Response { status: u16, reason: String },
}

#[derive(Debug, Clone)]
pub(crate) struct Head {
    pub version: Version,
    pub start: StartLine,
    pub headers: Headers,
}

impl Head {
    pub fn status(&self) -> Option<u16> {
        match &self.start {
            StartLine::Request { .. } => None,
            StartLine::Response { status, .. } => Some(*status),
        }
    }
}

fn initial_slots(max_headers: usize) -> usize {
    if max_headers == 0 {
        INITIAL_HEADER_SLOTS
    } else {
        INITIAL_HEADER_SLOTS.min(max_headers)
    }
}

/// Grow the slot count, or fail when the configured maximum is reached.
fn grow_slots(slots: usize, max_headers: usize) -> Result<usize> {
    if max_headers != 0 && slots >= max_headers {
        return Err(Error::HeaderCountExceeded(max_headers));
    }
    let next = slots * 2;
    Ok(if max_headers == 0 {
        next
    } else {
        next.min(max_headers)
    })
}

fn version(v: Option<u8>) -> Result<Version> {
    match v {
        Some(0) => Ok(Version::HTTP_10),
        Some(1) => Ok(Version::HTTP_11),
        _ => Err(Error::UnsupportedVersion),
    }
}

fn check_partial(input: &[u8]) -> Result<Option<(usize, Head)>> {
    if input.len() > MAX_HEAD_SIZE {
        return Err(Error::HeadTooLarge(MAX_HEAD_SIZE));
    }
    Ok(None)
}

/// Try to parse a request head from `input`.
///
/// `Ok(None)` means more input is needed. On success returns the number
/// of bytes the head used.
pub(crate) fn try_parse_request(input: &[u8], max_headers: usize) -> Result<Option<(usize, Head)>> {
    let mut slots = initial_slots(max_headers);

    loop {
        let mut headers = vec![httparse::EMPTY_HEADER; slots];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(input) {
            Ok(httparse::Status::Complete(n)) => {
                if n > MAX_HEAD_SIZE {
                    return Err(Error::HeadTooLarge(MAX_HEAD_SIZE));
                }
                let method = req
                    .method
                    .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
                    .ok_or(Error::RequestInvalidMethod)?;
                let url = req.path.unwrap_or("/").to_string();
                let head = Head {
                    version: version(req.version)?,
                    start: StartLine::Request { method, url },
                    headers: Headers::from_parsed(req.headers),
                };
                return Ok(Some((n, head)));
            }
            Ok(httparse::Status::Partial) => return check_partial(input),
            Err(httparse::Error::TooManyHeaders) => {
                slots = grow_slots(slots, max_headers)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Try to parse a response head from `input`.
pub(crate) fn try_parse_response(input: &[u8], max_headers: usize) -> Result<Option<(usize, Head)>> {
    let mut slots = initial_slots(max_headers);

    loop {
        let mut headers = vec![httparse::EMPTY_HEADER; slots];
        let mut res = httparse::Response::new(&mut headers);

        match res.parse(input) {
            Ok(httparse::Status::Complete(n)) => {
                if n > MAX_HEAD_SIZE {
                    return Err(Error::HeadTooLarge(MAX_HEAD_SIZE));
                }
                let status = res.code.ok_or(Error::ResponseInvalidStatus)?;
                let reason = res.reason.unwrap_or("").to_string();
                let head = Head {
                    version: version(res.version)?,
                    start: StartLine::Response { status, reason },
                    headers: Headers::from_parsed(res.headers),
                };
                return Ok(Some((n, head)));
            }
            Ok(httparse::Status::Partial) => return check_partial(input),
            Err(httparse::Error::TooManyHeaders) => {
                slots = grow_slots(slots, max_headers)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Parse a trailer block. `input` must end with the empty line.
pub(crate) fn parse_trailers(input: &[u8], max_headers: usize) -> Result<Headers> {
    let mut slots = initial_slots(max_headers);

    loop {
        let mut headers = vec![httparse::EMPTY_HEADER; slots];

        match httparse::parse_headers(input, &mut headers) {
            Ok(httparse::Status::Complete((_, parsed))) => {
                return Ok(Headers::from_parsed(parsed));
            }
            Ok(httparse::Status::Partial) => {
                return Err(Error::HttpParseFail("incomplete trailers".into()));
            }
            Err(httparse::Error::TooManyHeaders) => {
                slots = grow_slots(slots, max_headers)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
