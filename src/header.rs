//! Ordered, case-insensitive header table where every name maps to a
//! sequence of values.

use std::fmt;
use std::ops::Deref;

use bytes::{BufMut, BytesMut};
use http::{HeaderName, HeaderValue};
use smallvec::SmallVec;

use crate::Error;

/// The values of one header name, in insertion order. Never empty.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HeaderValues(SmallVec<[String; 1]>);

impl HeaderValues {
    /// The first value.
    pub fn first(&self) -> &str {
        self.0.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// All values joined with `,`.
    pub fn joined(&self) -> String {
        self.0.join(",")
    }

    /// Iterator over each comma separated token in all values.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .flat_map(|v| v.split(','))
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
    }

    fn extend(&mut self, other: HeaderValues) {
        self.0.extend(other.0);
    }
}

impl Deref for HeaderValues {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for HeaderValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            write!(f, "{:?}", self.0[0])
        } else {
            f.debug_list().entries(self.0.iter()).finish()
        }
    }
}

impl fmt::Display for HeaderValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.joined())
    }
}

impl PartialEq<&str> for HeaderValues {
    fn eq(&self, other: &&str) -> bool {
        self.0.len() == 1 && self.0[0] == *other
    }
}

impl PartialEq<str> for HeaderValues {
    fn eq(&self, other: &str) -> bool {
        self == &other
    }
}

impl From<&str> for HeaderValues {
    fn from(value: &str) -> Self {
        HeaderValues(smallvec::smallvec![value.to_string()])
    }
}

impl From<String> for HeaderValues {
    fn from(value: String) -> Self {
        HeaderValues(smallvec::smallvec![value])
    }
}

impl From<&String> for HeaderValues {
    fn from(value: &String) -> Self {
        value.as_str().into()
    }
}

impl From<u64> for HeaderValues {
    fn from(value: u64) -> Self {
        value.to_string().into()
    }
}

impl From<usize> for HeaderValues {
    fn from(value: usize) -> Self {
        value.to_string().into()
    }
}

impl From<Vec<String>> for HeaderValues {
    fn from(value: Vec<String>) -> Self {
        HeaderValues(value.into_iter().collect())
    }
}

impl From<Vec<&str>> for HeaderValues {
    fn from(value: Vec<&str>) -> Self {
        value.as_slice().into()
    }
}

impl From<&[&str]> for HeaderValues {
    fn from(value: &[&str]) -> Self {
        HeaderValues(value.iter().map(|v| v.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for HeaderValues {
    fn from(value: [&str; N]) -> Self {
        value.as_slice().into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    values: HeaderValues,
}

/// Header table of a message.
///
/// Names keep the casing they were first set with, lookups ignore ASCII
/// case. Setting a name with no values is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Entry>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Replace all values of `name`.
    pub fn set(&mut self, name: &str, values: impl Into<HeaderValues>) {
        let values = values.into();
        if values.is_empty() {
            return;
        }
        match self.position(name) {
            Some(i) => self.entries[i].values = values,
            None => self.entries.push(Entry {
                name: name.to_string(),
                values,
            }),
        }
    }

    /// Add values to `name`, after any existing ones.
    pub fn append(&mut self, name: &str, values: impl Into<HeaderValues>) {
        let values = values.into();
        if values.is_empty() {
            return;
        }
        match self.position(name) {
            Some(i) => self.entries[i].values.extend(values),
            None => self.entries.push(Entry {
                name: name.to_string(),
                values,
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValues> {
        self.position(name).map(|i| &self.entries[i].values)
    }

    /// First value of `name`.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).map(|v| v.first())
    }

    /// Remove `name`. Removing an absent name is a no-op.
    pub fn remove(&mut self, name: &str) -> Option<HeaderValues> {
        let i = self.position(name)?;
        Some(self.entries.remove(i).values)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Whether any comma separated token of `name` equals `token`, ignoring case.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name)
            .map(|v| v.tokens().any(|t| t.eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    }

    /// Entries in insertion order, with the name as first set.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValues)> {
        self.entries.iter().map(|e| (e.name.as_str(), &e.values))
    }

    /// One `(name, value)` pair per transmitted header line.
    pub fn wire_lines(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|e| e.values.iter().map(move |v| (e.name.as_str(), v.as_str())))
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn write_to(&self, out: &mut BytesMut) {
        for (name, value) in self.wire_lines() {
            out.put_slice(name.as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
    }

    /// Values that are not utf8 (obs-text) are converted lossily, invalid
    /// bytes become U+FFFD.
    pub(crate) fn from_parsed(parsed: &[httparse::Header<'_>]) -> Headers {
        let mut headers = Headers::new();
        for h in parsed {
            let value = String::from_utf8_lossy(h.value);
            headers.append(h.name, value.trim());
        }
        headers
    }
}

/// Check a header pair is fit to go on the wire.
pub(crate) fn validate(name: &str, values: &HeaderValues) -> Result<(), Error> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::BadHeader(format!("invalid name: {}", name)))?;
    for v in values.iter() {
        HeaderValue::from_str(v)
            .map_err(|_| Error::BadHeader(format!("invalid value for {}", name)))?;
    }
    Ok(())
}

/// Owning iterator over a [`Headers`].
pub struct IntoIter(std::vec::IntoIter<Entry>);

impl Iterator for IntoIter {
    type Item = (String, HeaderValues);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|e| (e.name, e.values))
    }
}

impl IntoIterator for Headers {
    type Item = (String, HeaderValues);
    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter(self.entries.into_iter())
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: AsRef<str>,
    V: Into<HeaderValues>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k.as_ref(), v);
        }
        headers
    }
}
