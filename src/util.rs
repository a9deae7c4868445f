use std::fmt;

use crate::Error;

pub(crate) fn find_crlf(b: &[u8]) -> Option<usize> {
    let cr = b.iter().position(|c| *c == b'\r')?;
    let maybe_lf = b.get(cr + 1)?;
    if *maybe_lf == b'\n' {
        Some(cr)
    } else {
        None
    }
}

/// Position of the first `\r\n\r\n`, i.e. the end of a header block.
pub(crate) fn find_double_crlf(b: &[u8]) -> Option<usize> {
    b.windows(4).position(|w| w == b"\r\n\r\n")
}

pub(crate) fn compare_lowercase_ascii(a: &str, lowercased: &str) -> bool {
    if a.len() != lowercased.len() {
        return false;
    }

    for (a, b) in a.chars().zip(lowercased.chars()) {
        if !a.is_ascii() {
            return false;
        }
        let norm = a.to_ascii_lowercase();
        if norm != b {
            return false;
        }
    }

    true
}

/// Keeps track of a `content-length` while sending.
pub(crate) struct LengthChecker {
    handled: u64,
    expected: u64,
}

impl LengthChecker {
    pub fn new(expected: u64) -> Self {
        LengthChecker {
            handled: 0,
            expected,
        }
    }

    pub fn append(&mut self, amount: usize) -> Result<(), Error> {
        let new_total = self.handled + amount as u64;
        if new_total > self.expected {
            return Err(Error::BodyLargerThanContentLength);
        }
        self.handled = new_total;
        Ok(())
    }

    pub fn complete(&self) -> bool {
        self.handled == self.expected
    }
}

impl fmt::Debug for LengthChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LengthChecker")
            .field("handled", &self.handled)
            .field("expected", &self.expected)
            .finish()
    }
}
