//! Error types for raw image imports.

use std::io;

use thiserror::Error;

use crate::import::DecodeError;
use crate::transport::TransportError;

/// Errors that terminate a single import (or reject a pull request).
#[derive(Debug, Error)]
pub enum ImportError {
    /// The transport failed before the transfer completed.
    #[error("transfer failed: {0}")]
    TransportFailure(#[from] TransportError),

    /// The server answered with something other than 2xx or 304.
    #[error("request failed with HTTP status {status}")]
    BadStatus { status: u16 },

    /// Success status but no body and no cached match.
    #[error("no data received")]
    NoData,

    /// Fewer (or more) bytes arrived than the server declared.
    #[error("download truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },

    /// The decoded image exceeds the configured maximum size.
    #[error("image too large: exceeds limit of {limit} bytes")]
    TooLarge { limit: u64 },

    /// More bytes arrived than the declared Content-Length.
    #[error("content length incorrect: more than {declared} bytes received")]
    SizeMismatch { declared: u64 },

    /// The compressed stream is corrupt.
    #[error("decompression error: {0}")]
    Decode(#[from] DecodeError),

    /// The format converter failed.
    #[error("image conversion failed: {0}")]
    Convert(#[source] io::Error),

    /// Filesystem failure on the staging file, rename or local copy.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Allocation failed while buffering response data.
    #[error("out of memory")]
    OutOfMemory,

    /// The locator is already being imported.
    #[error("import already in progress: {0}")]
    AlreadyInProgress(String),

    /// The locator is not an absolute http(s) URL.
    #[error("invalid image URL: {0}")]
    InvalidLocator(String),

    /// The local alias is not a valid image name.
    #[error("invalid local image name: {0}")]
    InvalidAlias(String),
}

impl ImportError {
    /// Stable reason code for logs and reports.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ImportError::TransportFailure(_) => "transport_failure",
            ImportError::BadStatus { .. } => "bad_status",
            ImportError::NoData => "no_data",
            ImportError::Truncated { .. } => "truncated",
            ImportError::TooLarge { .. } => "too_large",
            ImportError::SizeMismatch { .. } => "size_mismatch",
            ImportError::Decode(_) => "decode_error",
            ImportError::Convert(_) => "convert_error",
            ImportError::Io(_) => "io_error",
            ImportError::OutOfMemory => "out_of_memory",
            ImportError::AlreadyInProgress(_) => "already_in_progress",
            ImportError::InvalidLocator(_) => "invalid_locator",
            ImportError::InvalidAlias(_) => "invalid_alias",
        }
    }

    /// Negative errno-style status delivered to the completion callback.
    pub fn status_code(&self) -> i32 {
        let errno = match self {
            ImportError::TransportFailure(_)
            | ImportError::BadStatus { .. }
            | ImportError::NoData
            | ImportError::Truncated { .. }
            | ImportError::Decode(_) => libc::EIO,
            ImportError::TooLarge { .. } | ImportError::SizeMismatch { .. } => libc::EFBIG,
            ImportError::Convert(e) | ImportError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            ImportError::OutOfMemory => libc::ENOMEM,
            ImportError::AlreadyInProgress(_) => libc::EEXIST,
            ImportError::InvalidLocator(_) | ImportError::InvalidAlias(_) => libc::EINVAL,
        };
        -errno
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_negative() {
        let errors = [
            ImportError::NoData,
            ImportError::TooLarge { limit: 1 },
            ImportError::OutOfMemory,
            ImportError::AlreadyInProgress("https://example.com/a.raw".to_string()),
            ImportError::Io(io::Error::from_raw_os_error(libc::ENOSPC)),
        ];
        for err in &errors {
            assert!(err.status_code() < 0, "{} should map to a negative code", err);
        }
        assert_eq!(errors[4].status_code(), -libc::ENOSPC);
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(ImportError::BadStatus { status: 404 }.reason_code(), "bad_status");
        assert_eq!(
            ImportError::Truncated {
                expected: 10,
                received: 4
            }
            .reason_code(),
            "truncated"
        );
    }
}
