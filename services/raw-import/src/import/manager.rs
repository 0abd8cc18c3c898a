//! Registry and reactor for in-flight imports.
//!
//! The manager owns every [`FileImport`] and the transport session feeding it.
//! A single task drives all sessions through [`ImportManager::step`]; event
//! handlers, disk writes included, run synchronously inside that task.
//! Removing a session from the map drops it, so a released import never sees
//! another event.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future;
use futures_util::stream::{self, StreamExt};
use tokio_stream::StreamMap;
use tracing::{debug, error, info};

use super::convert::{ImageConverter, QemuImgConverter};
use super::file::{FileImport, Flow, ImportContext, ImportPhase, ImportReport};
use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::locator::{LocalAlias, ResourceLocator};
use crate::transport::{Session, Transport, TransportError, TransportEvent};

/// Callback receiving the overall status: `0` or a negative errno.
pub type FinishedCallback = Box<dyn FnMut(i32) + Send>;

/// Drives concurrent imports over one shared transport.
pub struct ImportManager {
    transport: Arc<dyn Transport>,
    context: ImportContext,
    imports: HashMap<ResourceLocator, FileImport>,
    sessions: StreamMap<ResourceLocator, Session>,
    reports: Vec<ImportReport>,
    first_error: Option<ImportError>,
    on_finished: Option<FinishedCallback>,
    finished: bool,
    /// Set once any import was canceled before finishing.
    canceled: bool,
}

impl ImportManager {
    pub fn new(transport: Arc<dyn Transport>, config: &ImportConfig) -> Self {
        let converter: Arc<dyn ImageConverter> =
            Arc::new(QemuImgConverter::new(config.qemu_img.clone()));
        Self {
            transport,
            context: ImportContext::new(config, converter),
            imports: HashMap::new(),
            sessions: StreamMap::new(),
            reports: Vec::new(),
            first_error: None,
            on_finished: None,
            finished: false,
            canceled: false,
        }
    }

    /// Replace the format converter.
    pub fn with_converter(mut self, converter: Arc<dyn ImageConverter>) -> Self {
        self.context.converter = converter;
        self
    }

    /// Register the completion callback. It fires at most once.
    pub fn on_finished(mut self, callback: impl FnMut(i32) + Send + 'static) -> Self {
        self.on_finished = Some(Box::new(callback));
        self
    }

    /// Start importing `url`, optionally followed by a writable copy named
    /// `local`.
    pub fn pull(&mut self, url: &str, local: Option<&str>, force: bool) -> Result<(), ImportError> {
        let locator = ResourceLocator::parse(url)?;
        let alias = local.map(LocalAlias::parse).transpose()?;

        if self.imports.contains_key(&locator) {
            return Err(ImportError::AlreadyInProgress(locator.to_string()));
        }

        let mut import = FileImport::new(locator.clone(), alias, force);
        let request = import.begin(&self.context)?;

        info!(
            url = %locator,
            local = ?local,
            conditional = !request.validators.is_empty(),
            "Starting image import"
        );

        // A session that ends without a terminal event still fails its import.
        let session = self
            .transport
            .open(&request)
            .chain(stream::once(future::ready(TransportEvent::Failed(
                TransportError::new("transfer ended without completing"),
            ))))
            .boxed();

        self.sessions.insert(locator.clone(), session);
        self.imports.insert(locator, import);
        Ok(())
    }

    /// Abort an in-flight import. Its staging file is removed and its session
    /// released. Returns `false` if `url` is not in flight.
    pub fn cancel(&mut self, locator: &ResourceLocator) -> bool {
        self.sessions.remove(locator);
        match self.imports.remove(locator) {
            Some(mut import) => {
                let canceled = import.cancel();
                self.canceled |= canceled;
                canceled
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &ResourceLocator> {
        self.imports.keys()
    }

    pub fn is_in_flight(&self, locator: &ResourceLocator) -> bool {
        self.imports.contains_key(locator)
    }

    pub fn import(&self, locator: &ResourceLocator) -> Option<&FileImport> {
        self.imports.get(locator)
    }

    pub fn phase(&self, locator: &ResourceLocator) -> Option<ImportPhase> {
        self.imports.get(locator).map(FileImport::phase)
    }

    /// Wait for the next session event and dispatch it. Returns `false` once
    /// no session is left.
    pub async fn step(&mut self) -> bool {
        if self.sessions.is_empty() {
            return false;
        }
        match self.sessions.next().await {
            Some((locator, event)) => {
                self.dispatch(locator, event);
                true
            }
            None => false,
        }
    }

    /// Drive every import to completion. Returns the first error, or the
    /// reports of all successful imports.
    pub async fn run(&mut self) -> Result<Vec<ImportReport>, ImportError> {
        while self.step().await {}

        let reports = std::mem::take(&mut self.reports);
        match self.first_error.take() {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }

    /// Cancel everything still in flight and fire the callback if it has not
    /// fired yet: `-ECANCELED` when any import was canceled, `0` otherwise.
    pub fn shutdown(&mut self) {
        let locators: Vec<_> = self.imports.keys().cloned().collect();
        for locator in &locators {
            self.cancel(locator);
        }
        if !locators.is_empty() {
            info!(canceled = locators.len(), "Import manager shut down");
        }

        let code = if self.canceled { -libc::ECANCELED } else { 0 };
        self.finish(code);
    }

    fn dispatch(&mut self, locator: ResourceLocator, event: TransportEvent) {
        let Some(import) = self.imports.get_mut(&locator) else {
            debug!(url = %locator, "Dropping session without import");
            self.sessions.remove(&locator);
            return;
        };

        match import.handle(event, &self.context) {
            Ok(Flow::Continue) | Ok(Flow::Ignored) => {}
            Ok(Flow::Done(report)) => {
                self.release(&locator);
                info!(
                    url = %locator,
                    outcome = ?report.outcome,
                    bytes = report.bytes_written,
                    "Image import finished"
                );
                self.reports.push(report);
                if self.imports.is_empty() {
                    self.finish(0);
                }
            }
            Err(e) => {
                self.release(&locator);
                error!(
                    url = %locator,
                    reason = e.reason_code(),
                    error = %e,
                    "Image import failed"
                );
                let code = e.status_code();
                if self.first_error.is_none() {
                    self.first_error = Some(e);
                }
                self.finish(code);
            }
        }
    }

    fn release(&mut self, locator: &ResourceLocator) {
        self.sessions.remove(locator);
        self.imports.remove(locator);
    }

    fn finish(&mut self, code: i32) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(callback) = self.on_finished.as_mut() {
            callback(code);
        }
    }
}

impl Drop for ImportManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
