use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("http parse fail: {0}")]
    HttpParseFail(String),

    #[error("header block has more than {0} headers")]
    HeaderCountExceeded(usize),

    #[error("header block larger than {0} bytes")]
    HeadTooLarge(usize),

    #[error("unsupported http version")]
    UnsupportedVersion,

    #[error("http request invalid method")]
    RequestInvalidMethod,

    #[error("http response invalid status")]
    ResponseInvalidStatus,

    #[error("more than one content-length header")]
    TooManyContentLengthHeaders,

    #[error("content-length header not a number")]
    BadContentLengthHeader,

    #[error("chunk length is not ascii")]
    ChunkLenNotAscii,

    #[error("chunk length cannot be read as a number")]
    ChunkLenNotANumber,

    #[error("chunk expected crlf as next character")]
    ChunkExpectedCrLf,

    #[error("unexpected 101 response without upgrade request")]
    UnexpectedSwitchingProtocols,

    #[error("connection closed before message completed")]
    IncompleteMessage,

    #[error("headers already sent")]
    HeadersSent,

    #[error("attempt to write body after end")]
    BodyContentAfterFinish,

    #[error("attempt to write larger body than content-length")]
    BodyLargerThanContentLength,

    #[error("trailer not announced in header block: {0}")]
    TrailerNotAnnounced(String),

    #[error("trailers require chunked transfer encoding")]
    TrailersRequireChunked,

    #[error("bad header: {0}")]
    BadHeader(String),

    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    #[error("connection timed out")]
    Timeout,

    #[error("no {0} handler registered")]
    UpgradeContractViolation(&'static str),

    #[error("connection handed off after {0}")]
    HandedOff(&'static str),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("message aborted")]
    Aborted,

    #[error("server already listening")]
    AlreadyListening,

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input on the wire. Fatal to the connection.
    ProtocolParse,
    /// A header block exceeded `max_headers_count`.
    HeaderCountExceeded,
    /// The idle timer fired.
    Timeout,
    /// Misuse of a message, such as mutating headers after commit.
    /// The connection is unaffected.
    State,
    /// CONNECT or upgrade without a registered handler.
    UpgradeContractViolation,
    /// The connection is gone or was handed off.
    Closed,
    /// Transport failure.
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            HttpParseFail(_)
            | HeadTooLarge(_)
            | UnsupportedVersion
            | RequestInvalidMethod
            | ResponseInvalidStatus
            | TooManyContentLengthHeaders
            | BadContentLengthHeader
            | ChunkLenNotAscii
            | ChunkLenNotANumber
            | ChunkExpectedCrLf
            | UnexpectedSwitchingProtocols
            | IncompleteMessage => ErrorKind::ProtocolParse,
            HeaderCountExceeded(_) => ErrorKind::HeaderCountExceeded,
            Timeout => ErrorKind::Timeout,
            HeadersSent
            | BodyContentAfterFinish
            | BodyLargerThanContentLength
            | TrailerNotAnnounced(_)
            | TrailersRequireChunked
            | BadHeader(_)
            | UnknownEncoding(_)
            | AlreadyListening => ErrorKind::State,
            UpgradeContractViolation(_) => ErrorKind::UpgradeContractViolation,
            HandedOff(_) | ConnectionClosed | Aborted => ErrorKind::Closed,
            Io(_) => ErrorKind::Io,
        }
    }
}

impl From<httparse::Error> for Error {
    fn from(value: httparse::Error) -> Self {
        Error::HttpParseFail(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(Error::HeadersSent.kind(), ErrorKind::State);
        assert_eq!(Error::ChunkExpectedCrLf.kind(), ErrorKind::ProtocolParse);
        assert_eq!(
            Error::HeaderCountExceeded(1000).kind(),
            ErrorKind::HeaderCountExceeded
        );
        assert_eq!(
            Error::UpgradeContractViolation("connect").kind(),
            ErrorKind::UpgradeContractViolation
        );
        let e: Error = httparse::Error::Token.into();
        assert_eq!(e.kind(), ErrorKind::ProtocolParse);
    }
}
