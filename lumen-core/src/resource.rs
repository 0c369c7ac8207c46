use std::{fmt, str::FromStr};

use tracing::warn;
use url::Url;

use crate::error::FetchError;

/// Canonical identifier for a fetchable image: an absolute http(s) URL.
///
/// Equality, ordering and hashing use the normalized serialization [`Url`]
/// produces, and the content address is derived from that same string. Inputs
/// that differ only in scheme or host case, an explicit default port, or
/// surrounding whitespace are therefore one resource. Path and query are kept
/// verbatim, so `a.png?x=1` and `a.png?x=2` stay distinct.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(Url);

impl ResourceId {
    /// Parse and validate an absolute http(s) URL.
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let url = Url::parse(raw).map_err(|err| {
            FetchError::InvalidResourceId(format!("{raw}: {err}"))
        })?;
        Self::from_url(url)
    }

    /// Rejects non-http(s) schemes and URLs without a host.
    pub fn from_url(url: Url) -> Result<Self, FetchError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidResourceId(format!(
                "{url}: unsupported scheme {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(FetchError::InvalidResourceId(format!(
                "{url}: missing host"
            )));
        }
        Ok(Self(url))
    }

    /// Normalized URL string; the input to [`crate::address()`].
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Borrow the parsed URL.
    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceId").field(&self.0.as_str()).finish()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for ResourceId {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ResourceId {
    type Error = FetchError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

/// Turn a raw list of URL strings into resource ids, keeping order.
///
/// Malformed entries are dropped with a warning rather than failing the
/// whole list.
pub fn resource_ids_from_strings<I, S>(raw: I) -> Vec<ResourceId>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut dropped = 0usize;
    let ids: Vec<ResourceId> = raw
        .into_iter()
        .filter_map(|entry| match ResourceId::parse(entry.as_ref()) {
            Ok(id) => Some(id),
            Err(err) => {
                dropped += 1;
                warn!(entry = entry.as_ref(), %err, "dropping malformed image url");
                None
            }
        })
        .collect();

    if dropped > 0 {
        warn!(dropped, kept = ids.len(), "some image urls are invalid");
    }
    ids
}
