//! Validated value types: image URLs, local image names and cache tokens.

use std::fmt;

use serde::Serialize;
use url::Url;

use crate::error::ImportError;

/// Maximum length of a local image name.
const ALIAS_MAX_LEN: usize = 64;

/// Immutable URL of a remote image.
///
/// The string is kept exactly as given: it is the key for in-flight imports
/// and the basis of the on-disk artifact name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ResourceLocator(String);

impl ResourceLocator {
    /// Validate an absolute `http`/`https` URL with a host.
    pub fn parse(s: &str) -> Result<Self, ImportError> {
        let url = Url::parse(s).map_err(|e| ImportError::InvalidLocator(format!("{s}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ImportError::InvalidLocator(format!(
                "{s}: unsupported scheme '{}'",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ImportError::InvalidLocator(format!("{s}: missing host")));
        }
        if s.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(ImportError::InvalidLocator(format!(
                "{s}: contains whitespace or control characters"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a writable local copy, stored as `<root>/<alias>.raw`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct LocalAlias(String);

impl LocalAlias {
    pub fn parse(s: &str) -> Result<Self, ImportError> {
        let invalid = |detail: &str| ImportError::InvalidAlias(format!("'{s}': {detail}"));

        if s.is_empty() || s.len() > ALIAS_MAX_LEN {
            return Err(invalid("must be between 1 and 64 characters"));
        }
        if s.starts_with('.') || s.starts_with('-') {
            return Err(invalid("must not start with '.' or '-'"));
        }
        if s.contains("..") {
            return Err(invalid("must not contain '..'"));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid("may only contain letters, digits, '-', '_' and '.'"));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque HTTP entity tag of a committed artifact.
///
/// Holds the opaque-tag only; quotes and the weak `W/` prefix are stripped
/// when parsing a header and the tag is re-quoted for `If-None-Match`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheToken(String);

impl CacheToken {
    /// Build a token from a bare opaque-tag, rejecting characters that are
    /// not allowed inside an entity tag.
    pub fn new(tag: &str) -> Option<Self> {
        let valid = !tag.is_empty()
            && tag
                .chars()
                .all(|c| c == '!' || ('#'..='~').contains(&c) || !c.is_ascii());
        valid.then(|| Self(tag.to_string()))
    }

    /// Parse an `ETag` header value.
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        let value = value.strip_prefix("W/").unwrap_or(value);
        let tag = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        Self::new(tag)
    }

    /// Quoted form, as sent in `If-None-Match`.
    pub fn to_header_value(&self) -> String {
        format!("\"{}\"", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
