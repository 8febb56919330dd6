use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    StatusCode,
};

use crate::errors::{Error, Result};

/// Ordered header list. Later entries override earlier ones with the same
/// (case-insensitive) name when merged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderList(Vec<HeaderEntry>);

impl HeaderList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Set a header, replacing any existing entry with the same name.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let entry = HeaderEntry::new(key.into(), value.into());
        self.0.retain(|existing| !existing.key.eq_ignore_ascii_case(&entry.key));
        self.0.push(entry);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|entry| entry.key.eq_ignore_ascii_case(key))
            .map(|entry| entry.value.as_str())
    }

    /// Layer `other` on top of `self`.
    pub fn merge(&mut self, other: &HeaderList) {
        for entry in other.iter() {
            self.set(entry.key.clone(), entry.value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert into a reqwest header map, skipping blank entries.
    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for entry in self.iter() {
            if !entry.is_valid() {
                continue;
            }
            let name = HeaderName::from_bytes(entry.key.trim().as_bytes())
                .map_err(|err| Error::Config(format!("invalid header name: {err}")))?;
            let val = HeaderValue::from_str(entry.value.trim())
                .map_err(|err| Error::Config(format!("invalid header value: {err}")))?;
            map.insert(name, val);
        }
        Ok(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderList {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut list = HeaderList::new();
        for (key, value) in iter {
            list.set(key, value);
        }
        list
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

impl HeaderEntry {
    pub fn new(key: String, value: String) -> Self {
        Self { key, value }
    }

    pub fn is_valid(&self) -> bool {
        !(self.key.trim().is_empty() || self.value.trim().is_empty())
    }
}

/// Status line and headers of a transport response, shared with hooks and
/// classifiers.
#[derive(Clone, Debug)]
pub struct ResponseMeta {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub url: String,
}

impl ResponseMeta {
    pub fn new(status: u16, url: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text(status),
            headers: HeaderMap::new(),
            url: url.into(),
        }
    }

    /// Placeholder meta for mock-responder results, which have no real response.
    pub fn synthetic(url: impl Into<String>) -> Self {
        Self {
            status: 200,
            status_text: "mock".to_string(),
            headers: HeaderMap::new(),
            url: url.into(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub(crate) fn status_text(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("request failed")
        .to_string()
}
