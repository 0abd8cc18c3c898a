//! plfm-vt Raw Image Importer
//!
//! Fetches a disk image by URL, decompresses it on the fly when it is XZ
//! compressed, and commits it as a read-only artifact in the local image
//! store. Re-pulls are conditional: committed artifacts carry their ETag in
//! the filename, and a matching token short-circuits the download.
//!
//! ## Architecture
//!
//! ```text
//! ImportManager                 (registry + single-task reactor)
//! └── FileImport(url)           (per-URL state machine)
//!     ├── StreamDecoder         (passthrough | xz)
//!     ├── StagingWriter         (temp file -> atomic rename)
//!     └── CacheIndex            (scan of committed variants)
//! ```
//!
//! ## Modules
//!
//! - `import`: The import pipeline and manager
//! - `transport`: Transport interface plus reqwest and mock implementations
//! - `locator`: Validated URL, local name and cache token types

pub mod config;
pub mod error;
pub mod import;
pub mod locator;
pub mod transport;

// Re-export commonly used types
pub use config::ImportConfig;
pub use error::ImportError;
pub use import::{ImportManager, ImportOutcome, ImportPhase, ImportReport};
pub use locator::{CacheToken, LocalAlias, ResourceLocator};
pub use transport::{MockResponse, MockTransport, ReqwestTransport, Transport};
