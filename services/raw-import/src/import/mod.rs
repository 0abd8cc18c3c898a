//! Raw disk image import pipeline.
//!
//! This module handles:
//! - Conditional requests against the filename-encoded artifact cache
//! - Format sniffing and streaming XZ decompression
//! - Sparse, size-capped staging with atomic commit
//! - QCOW2 conversion and writable local copies
//!
//! ## On-disk layout
//!
//! ```text
//! <image-root>/.raw-<escaped-url>[.<escaped-etag>].raw   committed, read-only
//! <image-root>/.#<final-name>XXXXXX                      staging, removed on failure
//! <image-root>/<local-name>.raw                           writable copy
//! ```

mod attrs;
mod cache_index;
mod convert;
mod decoder;
mod file;
mod headers;
mod manager;
mod progress;
mod staging;

pub use attrs::{get_xattr, set_xattr, XATTR_CRTIME_USEC, XATTR_SOURCE_ETAG, XATTR_SOURCE_URL};
pub use cache_index::{
    artifact_file_name, escape, parse_artifact_file_name, unescape, CacheIndex, CachedArtifact,
};
pub use convert::{has_magic, ImageConverter, NoConversion, QemuImgConverter};
pub use decoder::{Compression, DecodeError, StreamDecoder, DECODE_BUFFER_SIZE};
pub use file::{FileImport, Flow, ImportContext, ImportOutcome, ImportPhase, ImportReport};
pub use headers::{KnownHeader, ResponseHeaders};
pub use manager::{FinishedCallback, ImportManager};
pub use progress::{ProgressReport, ProgressTracker};
pub use staging::{copy_image, Provenance, StagingWriter};
