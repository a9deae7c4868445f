use http::{Method, Version};

pub(crate) trait MethodExt {
    fn allow_request_body(&self) -> bool;
}

impl MethodExt for Method {
    /// Methods where an empty body goes out without a `content-length: 0`.
    fn allow_request_body(&self) -> bool {
        !(self == Method::GET
            || self == Method::HEAD
            || self == Method::DELETE
            || self == Method::OPTIONS
            || self == Method::TRACE
            || self == Method::CONNECT)
    }
}

pub(crate) trait StatusExt {
    /// 1xx, 204 and 304 never carry a body.
    fn is_bodyless(&self) -> bool;
    fn is_success(&self) -> bool;
}

impl StatusExt for u16 {
    fn is_bodyless(&self) -> bool {
        (100..=199).contains(self) || *self == 204 || *self == 304
    }

    fn is_success(&self) -> bool {
        (200..=299).contains(self)
    }
}

pub(crate) trait VersionExt {
    fn as_str(&self) -> &'static str;
    fn major_minor(&self) -> (u8, u8);
}

impl VersionExt for Version {
    fn as_str(&self) -> &'static str {
        if *self == Version::HTTP_10 {
            "1.0"
        } else {
            "1.1"
        }
    }

    fn major_minor(&self) -> (u8, u8) {
        if *self == Version::HTTP_10 {
            (1, 0)
        } else {
            (1, 1)
        }
    }
}
