//! Typed view of the response headers the importer cares about.

use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime};
use tracing::debug;

use crate::locator::CacheToken;

/// Header kinds recognized by the importer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnownHeader {
    ContentLength(u64),
    ETag(CacheToken),
    LastModified(SystemTime),
}

impl KnownHeader {
    /// Parse one header line. Unknown names and unparseable values yield `None`.
    pub fn parse(name: &str, value: &str) -> Option<Self> {
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            value.parse().ok().map(KnownHeader::ContentLength)
        } else if name.eq_ignore_ascii_case("etag") {
            CacheToken::from_header(value).map(KnownHeader::ETag)
        } else if name.eq_ignore_ascii_case("last-modified") {
            parse_http_date(value).map(KnownHeader::LastModified)
        } else {
            None
        }
    }
}

/// Fields extracted once from the response head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    /// Declared transfer length; `None` disables the length checks.
    pub content_length: Option<u64>,
    pub etag: Option<CacheToken>,
    pub last_modified: Option<SystemTime>,
}

impl ResponseHeaders {
    pub fn parse<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut parsed = Self::default();
        for (name, value) in headers {
            match KnownHeader::parse(name, value) {
                Some(KnownHeader::ContentLength(n)) => parsed.content_length = Some(n),
                Some(KnownHeader::ETag(token)) => parsed.etag = Some(token),
                Some(KnownHeader::LastModified(t)) => parsed.last_modified = Some(t),
                None => {}
            }
        }
        parsed
    }
}

/// Obsolete HTTP-date layouts still sent by some servers: RFC 850 and
/// asctime.
const OBSOLETE_DATE_FORMATS: &[&str] = &["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"];

/// Parse an HTTP date (`Wed, 21 Oct 2015 07:28:00 GMT`).
fn parse_http_date(value: &str) -> Option<SystemTime> {
    if let Ok(t) = DateTime::parse_from_rfc2822(value) {
        return Some(SystemTime::from(t));
    }
    let parsed = OBSOLETE_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok());
    match parsed {
        Some(t) => Some(SystemTime::from(t.and_utc())),
        None => {
            debug!(value = %value, "Ignoring unparseable Last-Modified header");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_parse_known_headers() {
        let headers = ResponseHeaders::parse([
            ("Content-Length", "2048"),
            ("ETag", "\"abc\""),
            ("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
            ("Content-Type", "application/octet-stream"),
        ]);

        assert_eq!(headers.content_length, Some(2048));
        assert_eq!(headers.etag.as_ref().map(CacheToken::as_str), Some("abc"));
        assert_eq!(
            headers.last_modified,
            Some(UNIX_EPOCH + Duration::from_secs(1_445_412_480))
        );
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let headers = ResponseHeaders::parse([
            ("content-length", "lots"),
            ("etag", "\"\""),
            ("last-modified", "yesterday"),
        ]);
        assert_eq!(headers, ResponseHeaders::default());
    }

    #[test]
    fn test_obsolete_date_formats() {
        let expected = Some(UNIX_EPOCH + Duration::from_secs(784_111_777));
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), expected);
        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), expected);
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), expected);
    }

    #[test]
    fn test_unknown_header() {
        assert_eq!(KnownHeader::parse("x-custom", "1"), None);
    }
}
