//! Per-URL import state machine.
//!
//! A [`FileImport`] is driven by the events of one transport session:
//!
//! ```text
//! Created -> RequestSent -> Negotiated304 ----------------------------> Done
//!                        -> HeadersReceived -> BodyStreaming
//!                                 -> Converting -> Committing -----------> Done
//! ```
//!
//! Any non-terminal phase may move to `Failed` or `Canceled`. Dropping the
//! in-flight transfer unlinks its staging file, so leaving a phase through
//! failure or cancellation never leaves a temp file behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;
use tracing::{debug, info};

use super::cache_index::CacheIndex;
use super::convert::ImageConverter;
use super::decoder::{Compression, StreamDecoder};
use super::headers::ResponseHeaders;
use super::progress::ProgressTracker;
use super::staging::{self, Provenance, StagingWriter};
use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::locator::{CacheToken, LocalAlias, ResourceLocator};
use crate::transport::{ResponseHead, TransferRequest, TransportError, TransportEvent};

/// Settings and collaborators shared by every import of one manager.
#[derive(Clone)]
pub struct ImportContext {
    pub cache: CacheIndex,
    pub max_size: u64,
    pub progress_interval: Duration,
    pub converter: Arc<dyn ImageConverter>,
}

impl ImportContext {
    pub fn new(config: &ImportConfig, converter: Arc<dyn ImageConverter>) -> Self {
        Self {
            cache: CacheIndex::new(&config.image_root),
            max_size: config.max_size,
            progress_interval: config.progress_interval,
            converter,
        }
    }

    pub fn image_root(&self) -> &Path {
        self.cache.root()
    }

    /// Path of the writable copy named `alias`.
    pub fn local_path(&self, alias: &LocalAlias) -> PathBuf {
        self.image_root().join(format!("{alias}.raw"))
    }
}

/// Externally visible phase of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Created,
    RequestSent,
    Negotiated304,
    HeadersReceived,
    BodyStreaming,
    Converting,
    Committing,
    Done,
    Failed,
    Canceled,
}

impl ImportPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportPhase::Done | ImportPhase::Failed | ImportPhase::Canceled
        )
    }
}

/// How a successful import ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportOutcome {
    /// A new artifact was downloaded and committed.
    Downloaded,
    /// The server confirmed a cached artifact; nothing was downloaded.
    UpToDate,
}

/// Summary of a successful import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub url: ResourceLocator,
    pub outcome: ImportOutcome,
    /// Committed artifact, when one is known.
    pub path: Option<PathBuf>,
    pub token: Option<CacheToken>,
    /// Writable copy, when a local name was requested.
    pub local_path: Option<PathBuf>,
    /// Bytes received from the wire.
    pub bytes_received: u64,
    /// Size of the committed image.
    pub bytes_written: u64,
    /// Whether the converter rewrote the downloaded image.
    pub converted: bool,
}

/// Result of handling one event.
#[derive(Debug)]
pub enum Flow {
    /// More events are expected.
    Continue,
    /// The import finished successfully.
    Done(ImportReport),
    /// The event arrived after the import had finished.
    Ignored,
}

/// Body processing before and after format classification.
enum Pipeline {
    /// Collecting the first bytes until the format can be decided.
    Sniffing(Vec<u8>),
    Streaming {
        decoder: StreamDecoder,
        staging: StagingWriter,
    },
}

/// State of a transfer whose 2xx response head has been accepted.
struct Transfer {
    headers: ResponseHeaders,
    final_path: PathBuf,
    pipeline: Pipeline,
    wire_bytes: u64,
    progress: ProgressTracker,
}

impl Transfer {
    /// Accept one body chunk.
    fn receive(
        &mut self,
        data: &[u8],
        locator: &ResourceLocator,
        ctx: &ImportContext,
    ) -> Result<(), ImportError> {
        if data.is_empty() {
            return Ok(());
        }

        let wire_bytes = self
            .wire_bytes
            .checked_add(data.len() as u64)
            .ok_or(ImportError::TooLarge {
                limit: ctx.max_size,
            })?;
        if let Some(declared) = self.headers.content_length {
            if wire_bytes > declared {
                return Err(ImportError::SizeMismatch { declared });
            }
        }
        self.wire_bytes = wire_bytes;

        match &mut self.pipeline {
            Pipeline::Sniffing(head) => {
                head.try_reserve(data.len())
                    .map_err(|_| ImportError::OutOfMemory)?;
                head.extend_from_slice(data);
                if head.len() >= Compression::SNIFF_LEN {
                    let head = std::mem::take(head);
                    self.start_streaming(&head, locator, ctx)?;
                }
            }
            Pipeline::Streaming { decoder, staging } => write_decoded(decoder, staging, data)?,
        }

        if let Some(total) = self.headers.content_length {
            if let Some(report) = self.progress.update(Instant::now(), wire_bytes, total) {
                match report.remaining {
                    Some(left) => info!(
                        url = %locator,
                        percent = report.percent,
                        remaining_secs = left.as_secs(),
                        "Download progress"
                    ),
                    None => info!(url = %locator, percent = report.percent, "Download progress"),
                }
            }
        }
        Ok(())
    }

    /// Classify the stream from its first bytes and open the staging file.
    fn start_streaming(
        &mut self,
        head: &[u8],
        locator: &ResourceLocator,
        ctx: &ImportContext,
    ) -> Result<(), ImportError> {
        let mut decoder = StreamDecoder::classify(head)?;
        match decoder.compression() {
            Some(compression) => {
                info!(url = %locator, compression = ?compression, "Detected compressed image")
            }
            None => debug!(url = %locator, "Image is not compressed"),
        }

        let mut staging = StagingWriter::open(&self.final_path, ctx.max_size)?;
        write_decoded(&mut decoder, &mut staging, head)?;
        self.pipeline = Pipeline::Streaming { decoder, staging };
        Ok(())
    }

    fn has_body(&self) -> bool {
        self.wire_bytes > 0
    }
}

fn write_decoded(
    decoder: &mut StreamDecoder,
    staging: &mut StagingWriter,
    data: &[u8],
) -> Result<(), ImportError> {
    let mut chunks = decoder.feed(data);
    while let Some(chunk) = chunks.next_chunk() {
        staging.write(chunk?)?;
    }
    Ok(())
}

enum State {
    Created,
    RequestSent,
    Negotiated304,
    Receiving(Box<Transfer>),
    Converting,
    Committing,
    Done,
    Failed,
    Canceled,
}

/// Import of one URL, optionally followed by a writable local copy.
pub struct FileImport {
    locator: ResourceLocator,
    alias: Option<LocalAlias>,
    force: bool,
    known_tokens: Vec<CacheToken>,
    started: Instant,
    state: State,
}

impl FileImport {
    pub fn new(locator: ResourceLocator, alias: Option<LocalAlias>, force: bool) -> Self {
        Self {
            locator,
            alias,
            force,
            known_tokens: Vec::new(),
            started: Instant::now(),
            state: State::Created,
        }
    }

    pub fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    pub fn alias(&self) -> Option<&LocalAlias> {
        self.alias.as_ref()
    }

    /// Tokens of cached variants found when the request was built.
    pub fn known_tokens(&self) -> &[CacheToken] {
        &self.known_tokens
    }

    pub fn phase(&self) -> ImportPhase {
        match &self.state {
            State::Created => ImportPhase::Created,
            State::RequestSent => ImportPhase::RequestSent,
            State::Negotiated304 => ImportPhase::Negotiated304,
            State::Receiving(transfer) if transfer.has_body() => ImportPhase::BodyStreaming,
            State::Receiving(_) => ImportPhase::HeadersReceived,
            State::Converting => ImportPhase::Converting,
            State::Committing => ImportPhase::Committing,
            State::Done => ImportPhase::Done,
            State::Failed => ImportPhase::Failed,
            State::Canceled => ImportPhase::Canceled,
        }
    }

    /// Bytes received from the wire so far.
    pub fn bytes_received(&self) -> u64 {
        match &self.state {
            State::Receiving(transfer) => transfer.wire_bytes,
            _ => 0,
        }
    }

    /// Path of the staging file, once the first body byte has arrived.
    pub fn staging_path(&self) -> Option<&Path> {
        match &self.state {
            State::Receiving(transfer) => match &transfer.pipeline {
                Pipeline::Streaming { staging, .. } => Some(staging.path()),
                Pipeline::Sniffing(_) => None,
            },
            _ => None,
        }
    }

    fn enter(&mut self, state: State) {
        self.state = state;
        debug!(url = %self.locator, phase = ?self.phase(), "Import phase changed");
    }

    /// Scan the cache and build the request to send.
    pub fn begin(&mut self, ctx: &ImportContext) -> Result<TransferRequest, ImportError> {
        if !matches!(self.state, State::Created) {
            return Err(ImportError::AlreadyInProgress(self.locator.to_string()));
        }

        let known = match ctx.cache.find_tokens(&self.locator) {
            Ok(known) => known,
            Err(e) => {
                self.enter(State::Failed);
                return Err(e.into());
            }
        };
        if !known.is_empty() {
            info!(
                url = %self.locator,
                cached_variants = known.len(),
                "Found cached image variants, sending conditional request"
            );
        }

        self.known_tokens = known.clone();
        self.started = Instant::now();
        self.enter(State::RequestSent);

        Ok(TransferRequest {
            locator: self.locator.clone(),
            validators: known,
        })
    }

    /// Process one session event. After an error the import is `Failed`
    /// and its staging file is gone.
    pub fn handle(
        &mut self,
        event: TransportEvent,
        ctx: &ImportContext,
    ) -> Result<Flow, ImportError> {
        if self.phase().is_terminal() {
            debug!(url = %self.locator, "Ignoring event for finished import");
            return Ok(Flow::Ignored);
        }

        let result = match event {
            TransportEvent::Response(head) => self.on_response(head, ctx),
            TransportEvent::Data(bytes) => self.on_data(&bytes, ctx),
            TransportEvent::Complete => self.on_complete(ctx),
            TransportEvent::Failed(e) => Err(ImportError::TransportFailure(e)),
        };

        if let Err(e) = &result {
            debug!(
                url = %self.locator,
                reason = e.reason_code(),
                error = %e,
                "Import failed"
            );
            self.enter(State::Failed);
        }
        result
    }

    /// Abort the import. Returns `false` when it had already finished.
    pub fn cancel(&mut self) -> bool {
        if self.phase().is_terminal() {
            return false;
        }
        info!(url = %self.locator, "Import canceled");
        self.enter(State::Canceled);
        true
    }

    fn on_response(
        &mut self,
        head: ResponseHead,
        ctx: &ImportContext,
    ) -> Result<Flow, ImportError> {
        if !matches!(self.state, State::RequestSent) {
            debug!(url = %self.locator, "Ignoring repeated response head");
            return Ok(Flow::Ignored);
        }

        let headers = ResponseHeaders::parse(
            head.headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );

        if head.status == 304 {
            info!(url = %self.locator, "Image already downloaded, skipping download");
            self.enter(State::Negotiated304);
            return self.finish_up_to_date(headers.etag, ctx);
        }
        if !(200..=299).contains(&head.status) {
            return Err(ImportError::BadStatus {
                status: head.status,
            });
        }

        if let Some(etag) = &headers.etag {
            if self.known_tokens.contains(etag) {
                info!(url = %self.locator, etag = %etag, "Image already downloaded, skipping download");
                let etag = etag.clone();
                return self.finish_up_to_date(Some(etag), ctx);
            }
        }

        match headers.content_length {
            Some(size) => info!(url = %self.locator, size = size, "Downloading image"),
            None => info!(url = %self.locator, "Downloading image of unknown size"),
        }

        let final_path = ctx.cache.artifact_path(&self.locator, headers.etag.as_ref());
        self.enter(State::Receiving(Box::new(Transfer {
            headers,
            final_path,
            pipeline: Pipeline::Sniffing(Vec::new()),
            wire_bytes: 0,
            progress: ProgressTracker::new(ctx.progress_interval, self.started),
        })));
        Ok(Flow::Continue)
    }

    fn on_data(&mut self, data: &[u8], ctx: &ImportContext) -> Result<Flow, ImportError> {
        match &mut self.state {
            State::Receiving(transfer) => transfer.receive(data, &self.locator, ctx)?,
            State::RequestSent => {
                return Err(ImportError::TransportFailure(TransportError::new(
                    "body data before response head",
                )))
            }
            _ => return Ok(Flow::Ignored),
        }
        Ok(Flow::Continue)
    }

    fn on_complete(&mut self, ctx: &ImportContext) -> Result<Flow, ImportError> {
        let transfer = match std::mem::replace(&mut self.state, State::Converting) {
            State::Receiving(transfer) => transfer,
            other => {
                self.state = other;
                return Err(ImportError::NoData);
            }
        };
        let Transfer {
            headers,
            final_path,
            pipeline,
            wire_bytes,
            ..
        } = *transfer;

        if wire_bytes == 0 {
            return Err(ImportError::NoData);
        }
        if let Some(expected) = headers.content_length {
            if expected != wire_bytes {
                return Err(ImportError::Truncated {
                    expected,
                    received: wire_bytes,
                });
            }
        }

        let (mut decoder, mut staging) = match pipeline {
            Pipeline::Streaming { decoder, staging } => (decoder, staging),
            // Body shorter than any signature: never compressed.
            Pipeline::Sniffing(head) => {
                let mut decoder = StreamDecoder::classify(&head)?;
                let mut staging = StagingWriter::open(&final_path, ctx.max_size)?;
                write_decoded(&mut decoder, &mut staging, &head)?;
                (decoder, staging)
            }
        };

        decoder.finish()?;
        staging.finalize()?;

        self.enter(State::Converting);
        let converted = staging.replace_contents(ctx.converter.as_ref())?;
        let bytes_written = staging.written();

        self.enter(State::Committing);
        let path = staging.commit(Provenance {
            locator: &self.locator,
            token: headers.etag.as_ref(),
            modified: headers.last_modified,
        })?;
        info!(
            url = %self.locator,
            path = %path.display(),
            size = bytes_written,
            "Completed writing vendor image"
        );

        let local_path = self.make_local_copy(&path, ctx)?;
        self.enter(State::Done);

        Ok(Flow::Done(ImportReport {
            url: self.locator.clone(),
            outcome: ImportOutcome::Downloaded,
            path: Some(path),
            token: headers.etag,
            local_path,
            bytes_received: wire_bytes,
            bytes_written,
            converted,
        }))
    }

    /// Finish without downloading: the server confirmed a cached variant.
    fn finish_up_to_date(
        &mut self,
        token: Option<CacheToken>,
        ctx: &ImportContext,
    ) -> Result<Flow, ImportError> {
        let artifacts = ctx.cache.scan(&self.locator)?;
        let artifact = token
            .as_ref()
            .and_then(|token| artifacts.iter().find(|a| a.token.as_ref() == Some(token)))
            .or_else(|| artifacts.iter().max_by_key(|a| a.modified.unwrap_or(SystemTime::UNIX_EPOCH)));

        let local_path = match (artifact, &self.alias) {
            (Some(artifact), Some(_)) => self.make_local_copy(&artifact.path, ctx)?,
            (None, Some(_)) => {
                return Err(ImportError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no cached image for {}", self.locator),
                )))
            }
            (_, None) => None,
        };

        let report = ImportReport {
            url: self.locator.clone(),
            outcome: ImportOutcome::UpToDate,
            path: artifact.map(|a| a.path.clone()),
            token: artifact.and_then(|a| a.token.clone()).or(token),
            local_path,
            bytes_received: 0,
            bytes_written: 0,
            converted: false,
        };
        self.enter(State::Done);
        Ok(Flow::Done(report))
    }

    fn make_local_copy(
        &self,
        artifact: &Path,
        ctx: &ImportContext,
    ) -> Result<Option<PathBuf>, ImportError> {
        let Some(alias) = &self.alias else {
            return Ok(None);
        };
        let target = ctx.local_path(alias);
        staging::copy_image(artifact, &target, self.force)?;
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::convert::NoConversion;
    use bytes::Bytes;
    use std::fs;
    use tempfile::TempDir;

    fn context(root: &Path, max_size: u64) -> ImportContext {
        ImportContext {
            cache: CacheIndex::new(root),
            max_size,
            progress_interval: Duration::from_secs(1),
            converter: Arc::new(NoConversion),
        }
    }

    fn response(status: u16, headers: &[(&str, &str)]) -> TransportEvent {
        TransportEvent::Response(ResponseHead {
            status,
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        })
    }

    fn data(bytes: &[u8]) -> TransportEvent {
        TransportEvent::Data(Bytes::copy_from_slice(bytes))
    }

    fn import(url: &str) -> FileImport {
        FileImport::new(ResourceLocator::parse(url).unwrap(), None, false)
    }

    fn files(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_plain_download_commits() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 1 << 20);
        let mut import = import("https://example.com/img.raw");

        let request = import.begin(&ctx).unwrap();
        assert!(request.validators.is_empty());
        assert_eq!(import.phase(), ImportPhase::RequestSent);

        import
            .handle(response(200, &[("Content-Length", "10"), ("ETag", "\"v1\"")]), &ctx)
            .unwrap();
        assert_eq!(import.phase(), ImportPhase::HeadersReceived);
        assert!(import.staging_path().is_none());

        // Not enough bytes to classify yet: nothing on disk.
        import.handle(data(b"0123"), &ctx).unwrap();
        assert_eq!(import.phase(), ImportPhase::BodyStreaming);
        assert!(import.staging_path().is_none());
        import.handle(data(b"456789"), &ctx).unwrap();
        assert!(import.staging_path().is_some());
        assert_eq!(import.bytes_received(), 10);

        let Flow::Done(report) = import.handle(TransportEvent::Complete, &ctx).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(import.phase(), ImportPhase::Done);
        assert_eq!(report.outcome, ImportOutcome::Downloaded);
        assert_eq!(report.bytes_received, 10);
        assert_eq!(report.bytes_written, 10);
        let path = report.path.unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"0123456789");
        assert_eq!(files(dir.path()).len(), 1);
    }

    #[test]
    fn test_short_body_is_passthrough() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 1 << 20);
        let mut import = import("https://example.com/tiny.raw");
        import.begin(&ctx).unwrap();

        import.handle(response(200, &[]), &ctx).unwrap();
        import.handle(data(b"\xfd7z"), &ctx).unwrap();
        let Flow::Done(report) = import.handle(TransportEvent::Complete, &ctx).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(fs::read(report.path.unwrap()).unwrap(), b"\xfd7z");
    }

    #[test]
    fn test_bad_status_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 1 << 20);
        let mut import = import("https://example.com/img.raw");
        import.begin(&ctx).unwrap();

        let err = import.handle(response(404, &[]), &ctx).unwrap_err();
        assert!(matches!(err, ImportError::BadStatus { status: 404 }));
        assert_eq!(import.phase(), ImportPhase::Failed);

        // Late events are ignored.
        assert!(matches!(
            import.handle(data(b"late"), &ctx).unwrap(),
            Flow::Ignored
        ));
    }

    #[test]
    fn test_no_data() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 1 << 20);
        let mut import = import("https://example.com/img.raw");
        import.begin(&ctx).unwrap();
        import.handle(response(200, &[]), &ctx).unwrap();

        let err = import.handle(TransportEvent::Complete, &ctx).unwrap_err();
        assert!(matches!(err, ImportError::NoData));
        assert!(files(dir.path()).is_empty());
    }

    #[test]
    fn test_declared_length_exceeded() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 1 << 20);
        let mut import = import("https://example.com/img.raw");
        import.begin(&ctx).unwrap();
        import
            .handle(response(200, &[("Content-Length", "8")]), &ctx)
            .unwrap();
        import.handle(data(b"01234567"), &ctx).unwrap();

        let err = import.handle(data(b"8"), &ctx).unwrap_err();
        assert!(matches!(err, ImportError::SizeMismatch { declared: 8 }));
        assert!(files(dir.path()).is_empty());
    }

    #[test]
    fn test_truncated_removes_temp() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 1 << 20);
        let mut import = import("https://example.com/img.raw");
        import.begin(&ctx).unwrap();
        import
            .handle(response(200, &[("Content-Length", "100")]), &ctx)
            .unwrap();
        import.handle(data(&[1u8; 40]), &ctx).unwrap();
        assert_eq!(files(dir.path()).len(), 1);

        let err = import.handle(TransportEvent::Complete, &ctx).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Truncated {
                expected: 100,
                received: 40
            }
        ));
        assert!(files(dir.path()).is_empty());
    }

    #[test]
    fn test_size_cap_on_plain_bytes() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 16);
        let mut import = import("https://example.com/img.raw");
        import.begin(&ctx).unwrap();
        import.handle(response(200, &[]), &ctx).unwrap();

        let err = import.handle(data(&[7u8; 17]), &ctx).unwrap_err();
        assert!(matches!(err, ImportError::TooLarge { limit: 16 }));
        assert!(files(dir.path()).is_empty());
    }

    #[test]
    fn test_known_token_on_200_is_a_hit() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 1 << 20);
        let url = ResourceLocator::parse("https://example.com/img.raw").unwrap();
        let token = CacheToken::new("v1").unwrap();
        let other = CacheToken::new("v2").unwrap();
        let cached = ctx.cache.artifact_path(&url, Some(&token));
        fs::write(&cached, b"cached").unwrap();
        fs::write(ctx.cache.artifact_path(&url, Some(&other)), b"older").unwrap();

        let mut import = FileImport::new(url, None, false);
        let request = import.begin(&ctx).unwrap();
        assert_eq!(request.validators, vec![token.clone(), other]);

        let flow = import
            .handle(response(200, &[("ETag", "W/\"v1\"")]), &ctx)
            .unwrap();
        let Flow::Done(report) = flow else {
            panic!("expected a cache hit");
        };
        assert_eq!(report.outcome, ImportOutcome::UpToDate);
        assert_eq!(report.path, Some(cached));
        assert_eq!(report.token, Some(token));
        assert_eq!(report.bytes_received, 0);
    }

    #[test]
    fn test_cancel_removes_temp() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 1 << 20);
        let mut import = import("https://example.com/img.raw");
        import.begin(&ctx).unwrap();
        import.handle(response(200, &[]), &ctx).unwrap();
        import.handle(data(&[1u8; 128]), &ctx).unwrap();
        assert_eq!(files(dir.path()).len(), 1);

        assert!(import.cancel());
        assert_eq!(import.phase(), ImportPhase::Canceled);
        assert!(files(dir.path()).is_empty());
        assert!(!import.cancel());
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 1 << 20);
        let mut import = import("https://example.com/img.raw");
        import.begin(&ctx).unwrap();
        assert!(matches!(
            import.begin(&ctx),
            Err(ImportError::AlreadyInProgress(_))
        ));
    }
}
