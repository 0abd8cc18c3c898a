//! Staging of one destination file.
//!
//! Bytes are written to a temp file `.#<final-name>XXXXXX` next to the final
//! path. The temp file is either renamed into place by [`StagingWriter::commit`]
//! or unlinked when the writer is aborted or dropped.

use std::ffi::{OsStr, OsString};
use std::fs::{self, File, Permissions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::attrs;
use super::convert::ImageConverter;
use crate::error::ImportError;
use crate::locator::{CacheToken, ResourceLocator};

/// Zero runs at least this long are skipped instead of written.
pub const SPARSE_RUN_LENGTH: usize = 64;

/// Mode of staged and local copies before the read-only mask is applied.
const STAGING_MODE: u32 = 0o644;

/// Mask applied to committed artifacts.
const READ_ONLY_MASK: u32 = 0o7444;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Metadata stamped onto a committed artifact.
#[derive(Debug, Clone, Copy)]
pub struct Provenance<'a> {
    pub locator: &'a ResourceLocator,
    pub token: Option<&'a CacheToken>,
    /// Server-side modification time, used for mtime/atime and crtime.
    pub modified: Option<SystemTime>,
}

/// Write `buf` at the current position, seeking over long zero runs.
///
/// The caller must extend the file to its logical size afterwards, since a
/// trailing seek does not.
pub fn write_sparse(file: &mut File, buf: &[u8]) -> io::Result<()> {
    let mut pending = 0;
    let mut i = 0;

    while i < buf.len() {
        if buf[i] != 0 {
            i += 1;
            continue;
        }

        let run = buf[i..].iter().take_while(|&&b| b == 0).count();
        if run >= SPARSE_RUN_LENGTH {
            file.write_all(&buf[pending..i])?;
            let skip = i64::try_from(run)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            file.seek(SeekFrom::Current(skip))?;
            pending = i + run;
        }
        i += run;
    }

    file.write_all(&buf[pending..])
}

/// Create a temp file for `final_name` in `dir`, mode 0644, COW disabled.
fn create_temp(dir: &Path, final_name: &OsStr) -> io::Result<NamedTempFile> {
    let mut prefix = OsString::from(".#");
    prefix.push(final_name);

    let temp = tempfile::Builder::new().prefix(&prefix).tempfile_in(dir)?;
    temp.as_file()
        .set_permissions(Permissions::from_mode(STAGING_MODE))?;

    if let Err(e) = attrs::disable_cow(temp.as_file()) {
        warn!(
            path = %temp.path().display(),
            error = %e,
            "Failed to disable copy-on-write"
        );
    }
    Ok(temp)
}

fn split_target(target: &Path) -> io::Result<(&Path, &OsStr)> {
    let name = target.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", target.display()),
        )
    })?;
    let dir = match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Ok((dir, name))
}

/// One destination file being written.
#[derive(Debug)]
pub struct StagingWriter {
    temp: NamedTempFile,
    final_path: PathBuf,
    max_size: u64,
    written: u64,
}

impl StagingWriter {
    /// Create the temp file next to `final_path`. The directory is created
    /// if it does not exist.
    pub fn open(final_path: &Path, max_size: u64) -> io::Result<Self> {
        let (dir, name) = split_target(final_path)?;
        fs::create_dir_all(dir)?;
        let temp = create_temp(dir, name)?;

        debug!(path = %temp.path().display(), "Opened staging file");
        Ok(Self {
            temp,
            final_path: final_path.to_path_buf(),
            max_size,
            written: 0,
        })
    }

    /// Path of the temp file.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Plain bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append plain bytes, refusing to grow past the size cap.
    pub fn write(&mut self, data: &[u8]) -> Result<(), ImportError> {
        if data.is_empty() {
            return Ok(());
        }

        let total = u64::try_from(data.len())
            .ok()
            .and_then(|len| self.written.checked_add(len))
            .filter(|total| *total <= self.max_size)
            .ok_or(ImportError::TooLarge {
                limit: self.max_size,
            })?;

        write_sparse(self.temp.as_file_mut(), data)?;
        self.written = total;
        Ok(())
    }

    /// Fix the file length to the logical size, covering a trailing hole.
    pub fn finalize(&mut self) -> io::Result<()> {
        self.temp.as_file().set_len(self.written)
    }

    /// Run `converter` over the staged bytes. When it recognizes the
    /// contents, the converted image replaces them and `true` is returned.
    pub fn replace_contents(
        &mut self,
        converter: &dyn ImageConverter,
    ) -> Result<bool, ImportError> {
        if !converter.detect(self.temp.as_file_mut())? {
            return Ok(false);
        }

        let (dir, name) = split_target(&self.final_path)?;
        let mut converted = create_temp(dir, name)?;
        let size = converter
            .convert(self.temp.as_file_mut(), converted.as_file_mut())
            .map_err(ImportError::Convert)?;

        info!(
            from = %self.temp.path().display(),
            to = %converted.path().display(),
            size = size,
            "Replaced staged image with converted contents"
        );

        // The previous temp file is unlinked on drop.
        self.temp = converted;
        self.written = size;
        Ok(true)
    }

    /// Stamp provenance, mark read-only and rename onto the final path.
    pub fn commit(self, provenance: Provenance<'_>) -> Result<PathBuf, ImportError> {
        let file = self.temp.as_file();

        if let Some(token) = provenance.token {
            best_effort(
                attrs::set_xattr(file, attrs::XATTR_SOURCE_ETAG, token.as_str().as_bytes()),
                attrs::XATTR_SOURCE_ETAG,
            );
        }
        best_effort(
            attrs::set_xattr(
                file,
                attrs::XATTR_SOURCE_URL,
                provenance.locator.as_str().as_bytes(),
            ),
            attrs::XATTR_SOURCE_URL,
        );
        if let Some(modified) = provenance.modified {
            best_effort(attrs::set_times(file, modified), "times");
            best_effort(attrs::set_crtime(file, modified), attrs::XATTR_CRTIME_USEC);
        }

        let mode = file.metadata()?.permissions().mode() & READ_ONLY_MASK;
        file.set_permissions(Permissions::from_mode(mode))?;

        let final_path = self.final_path;
        self.temp
            .persist(&final_path)
            .map_err(|e| ImportError::Io(e.error))?;

        info!(path = %final_path.display(), "Committed image");
        Ok(final_path)
    }

    /// Discard the staged bytes.
    pub fn abort(self) {
        let path = self.temp.path().to_path_buf();
        if let Err(e) = self.temp.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
        }
    }
}

fn best_effort(result: io::Result<()>, what: &str) {
    if let Err(e) = result {
        debug!(attr = %what, error = %e, "Could not record image metadata");
    }
}

/// Copy a committed artifact to a writable image at `target`.
///
/// With `force` an existing target (file or directory) is removed first;
/// otherwise an existing target fails with `AlreadyExists`.
pub fn copy_image(source: &Path, target: &Path, force: bool) -> Result<(), ImportError> {
    let mut src = File::open(source)?;
    let (dir, name) = split_target(target)?;

    if force {
        remove_existing(target)?;
    }

    let mut temp = create_temp(dir, name)?;
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = match src.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        write_sparse(temp.as_file_mut(), &buffer[..n])?;
        total += n as u64;
    }
    temp.as_file().set_len(total)?;

    best_effort(attrs::copy_times(&src, temp.as_file()), "times");
    best_effort(attrs::copy_xattrs(&src, temp.as_file()), "xattrs");

    if force {
        temp.persist(target).map_err(|e| ImportError::Io(e.error))?;
    } else {
        temp.persist_noclobber(target)
            .map_err(|e| ImportError::Io(e.error))?;
    }

    info!(path = %target.display(), size = total, "Created local image");
    Ok(())
}

fn remove_existing(target: &Path) -> io::Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(target),
        Ok(_) => fs::remove_file(target),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
