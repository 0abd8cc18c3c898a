//! Conversion of foreign disk image containers into raw images.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info};

/// Magic at offset 0 of a QCOW2 image.
const QCOW2_MAGIC: &[u8; 4] = b"QFI\xfb";

/// Detects and converts a staged image in place of the downloaded bytes.
///
/// Both calls run synchronously on the task driving the imports.
pub trait ImageConverter: Send + Sync {
    /// Whether `file` holds a container this converter understands.
    fn detect(&self, file: &mut File) -> io::Result<bool>;

    /// Write the raw image contained in `src` to `dst`. Returns the size of
    /// the raw image.
    fn convert(&self, src: &mut File, dst: &mut File) -> io::Result<u64>;
}

/// Accepts every image as already raw.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConversion;

impl ImageConverter for NoConversion {
    fn detect(&self, _file: &mut File) -> io::Result<bool> {
        Ok(false)
    }

    fn convert(&self, _src: &mut File, _dst: &mut File) -> io::Result<u64> {
        Err(io::ErrorKind::Unsupported.into())
    }
}

/// Read the first bytes of a file and compare them with a magic value.
pub fn has_magic(file: &mut File, magic: &[u8]) -> io::Result<bool> {
    let mut head = vec![0u8; magic.len()];
    file.seek(SeekFrom::Start(0))?;
    let matched = match file.read_exact(&mut head) {
        Ok(()) => head == magic,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e),
    };
    file.seek(SeekFrom::Start(0))?;
    Ok(matched)
}

/// Converts QCOW2 images by running `qemu-img convert`.
#[derive(Debug, Clone)]
pub struct QemuImgConverter {
    program: PathBuf,
}

impl QemuImgConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for QemuImgConverter {
    fn default() -> Self {
        Self::new("qemu-img")
    }
}

/// Path through which a child process can open one of our descriptors.
#[cfg(target_os = "linux")]
fn fd_path(file: &File) -> PathBuf {
    use std::os::fd::AsRawFd;
    PathBuf::from(format!(
        "/proc/{}/fd/{}",
        std::process::id(),
        file.as_raw_fd()
    ))
}

#[cfg(not(target_os = "linux"))]
fn fd_path(_file: &File) -> PathBuf {
    PathBuf::new()
}

impl ImageConverter for QemuImgConverter {
    fn detect(&self, file: &mut File) -> io::Result<bool> {
        has_magic(file, QCOW2_MAGIC)
    }

    fn convert(&self, src: &mut File, dst: &mut File) -> io::Result<u64> {
        if cfg!(not(target_os = "linux")) {
            return Err(io::ErrorKind::Unsupported.into());
        }

        info!(program = %self.program.display(), "Unpacking QCOW2 image");
        let status = Command::new(&self.program)
            .args(["convert", "-q", "-f", "qcow2", "-O", "raw"])
            .arg(fd_path(src))
            .arg(fd_path(dst))
            .status()?;

        if !status.success() {
            return Err(io::Error::other(format!(
                "{} convert failed: {status}",
                self.program.display()
            )));
        }

        let size = dst.metadata()?.len();
        debug!(size = size, "QCOW2 image converted");
        Ok(size)
    }
}
