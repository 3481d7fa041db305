//! Object keys.
//!
//! An [`ObjectKey`] is a non-empty, slash-delimited path naming a blob inside a
//! bucket. Keys compare by their full string. The optional leading `/` is the
//! key's anchor; it is dropped when a key is mapped onto the local filesystem.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::TransferError;

/// Path separator used by object stores.
pub const SEPARATOR: char = '/';

/// An immutable object key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Create a key, rejecting empty strings and strings made only of separators.
    pub fn new(key: impl Into<String>) -> Result<Self, TransferError> {
        let key = key.into();
        if key.trim_matches(SEPARATOR).is_empty() {
            return Err(TransferError::InvalidKey(format!("{:?} is empty", key)));
        }
        Ok(Self(key))
    }

    /// Build `base/name` with exactly one separator between the two parts.
    ///
    /// An empty base yields `name` on its own.
    pub fn join(base: &str, name: &str) -> Result<Self, TransferError> {
        let base = base.trim_end_matches(SEPARATOR);
        let name = name.trim_start_matches(SEPARATOR);
        if base.is_empty() {
            Self::new(name)
        } else if name.is_empty() {
            Err(TransferError::InvalidKey(format!(
                "empty name under {:?}",
                base
            )))
        } else {
            Self::new(format!("{}{}{}", base, SEPARATOR, name))
        }
    }

    /// The full key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The leading root segment, if the key has one.
    pub fn anchor(&self) -> Option<&str> {
        if self.0.starts_with(SEPARATOR) {
            Some(&self.0[..1])
        } else {
            None
        }
    }

    /// The key with its anchor removed.
    pub fn relative(&self) -> &str {
        self.0.trim_start_matches(SEPARATOR)
    }

    /// Non-empty path segments, in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|s| !s.is_empty())
    }

    /// The final segment.
    pub fn file_name(&self) -> &str {
        // `new` guarantees at least one non-empty segment.
        self.segments().last().unwrap_or_default()
    }

    /// Whether the final segment looks like a file (contains a `.`).
    pub fn looks_like_file(&self) -> bool {
        self.file_name().contains('.')
    }

    /// Whether the key ends with `extension`. `None` matches every key.
    pub fn has_extension(&self, extension: Option<&str>) -> bool {
        extension.map_or(true, |ext| self.0.ends_with(ext))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectKey {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
