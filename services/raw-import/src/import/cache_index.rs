//! Filename-encoded cache of committed images.
//!
//! Committed artifacts are named
//! `.raw-<escaped-url>[.<escaped-etag>].raw`. The escaping replaces `.` (and
//! other unsafe bytes) with `\xNN`, so the dots that remain are separators and
//! the URL and token can be recovered from a directory listing alone.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::locator::{CacheToken, ResourceLocator};

/// Prefix of every committed artifact.
pub const ARTIFACT_PREFIX: &str = ".raw-";

/// Extension shared by artifacts and local copies.
pub const IMAGE_EXTENSION: &str = "raw";

const ESCAPED_BYTES: &[u8] = b"\\/.#\"'";

/// Escape a string for use inside an artifact filename.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if b < 0x20 || b >= 0x7f || ESCAPED_BYTES.contains(&b) {
            let _ = write!(out, "\\x{b:02x}");
        } else {
            out.push(char::from(b));
        }
    }
    out
}

/// Reverse [`escape`]. Returns `None` for malformed escapes, bytes that
/// should have been escaped, or non-UTF-8 results.
pub fn unescape(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            if bytes.get(i + 1) != Some(&b'x') {
                return None;
            }
            let hex = s.get(i + 2..i + 4)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 4;
        } else {
            if b < 0x20 || b >= 0x7f || ESCAPED_BYTES.contains(&b) {
                return None;
            }
            out.push(b);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Filename of the committed artifact for a URL and optional token.
pub fn artifact_file_name(locator: &ResourceLocator, token: Option<&CacheToken>) -> String {
    match token {
        Some(token) => format!(
            "{ARTIFACT_PREFIX}{}.{}.{IMAGE_EXTENSION}",
            escape(locator.as_str()),
            escape(token.as_str())
        ),
        None => format!(
            "{ARTIFACT_PREFIX}{}.{IMAGE_EXTENSION}",
            escape(locator.as_str())
        ),
    }
}

/// Split an artifact filename into its unescaped URL and raw token parts.
pub fn parse_artifact_file_name(name: &str) -> Option<(String, Option<String>)> {
    let inner = name
        .strip_prefix(ARTIFACT_PREFIX)?
        .strip_suffix(IMAGE_EXTENSION)?
        .strip_suffix('.')?;

    let mut parts = inner.split('.');
    let url = unescape(parts.next()?)?;
    if url.is_empty() {
        return None;
    }
    let token = match parts.next() {
        Some(raw) => Some(unescape(raw)?),
        None => None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((url, token))
}

/// A committed variant of an image found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub path: PathBuf,
    pub token: Option<CacheToken>,
    pub modified: Option<SystemTime>,
}

/// Directory scanner over committed artifacts.
#[derive(Debug, Clone)]
pub struct CacheIndex {
    root: PathBuf,
}

impl CacheIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the artifact for a URL and optional token.
    pub fn artifact_path(&self, locator: &ResourceLocator, token: Option<&CacheToken>) -> PathBuf {
        self.root.join(artifact_file_name(locator, token))
    }

    /// All committed variants of `locator`, ordered by token.
    ///
    /// A missing root directory yields an empty list. Entries with invalid
    /// tokens are skipped.
    pub fn scan(&self, locator: &ResourceLocator) -> io::Result<Vec<CachedArtifact>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some((url, raw_token)) = parse_artifact_file_name(name) else {
                continue;
            };
            if url != locator.as_str() {
                continue;
            }

            let token = match raw_token {
                Some(raw) => match CacheToken::new(&raw) {
                    Some(token) => Some(token),
                    None => {
                        debug!(file = %name, "Skipping artifact with invalid cache token");
                        continue;
                    }
                },
                None => None,
            };

            let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
            found.push(CachedArtifact {
                path: entry.path(),
                token,
                modified,
            });
        }

        found.sort_by(|a, b| a.token.cmp(&b.token));
        Ok(found)
    }

    /// Tokens of every committed variant of `locator`.
    pub fn find_tokens(&self, locator: &ResourceLocator) -> io::Result<Vec<CacheToken>> {
        Ok(self
            .scan(locator)?
            .into_iter()
            .filter_map(|artifact| artifact.token)
            .collect())
    }
}
