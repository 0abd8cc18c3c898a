//! File attribute helpers: copy-on-write flag, extended attributes and
//! timestamps.
//!
//! Note: the flag and xattr calls are Linux-only and use direct libc calls.
//! Other platforms get `Unsupported` errors, which callers treat as
//! best-effort failures.

use std::fs::{File, FileTimes};
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(target_os = "linux")]
use std::ffi::CString;
#[cfg(target_os = "linux")]
use std::os::fd::AsRawFd;

use tracing::debug;

/// Attribute holding the source URL of an artifact.
pub const XATTR_SOURCE_URL: &str = "user.source_url";
/// Attribute holding the cache token of an artifact.
pub const XATTR_SOURCE_ETAG: &str = "user.source_etag";
/// Attribute holding the creation time (little-endian microseconds).
pub const XATTR_CRTIME_USEC: &str = "user.crtime_usec";

/// `FS_NOCOW_FL` from `linux/fs.h`.
#[cfg(target_os = "linux")]
const FS_NOCOW_FL: libc::c_int = 0x0080_0000;

/// Turn off copy-on-write for a freshly created file.
#[cfg(target_os = "linux")]
pub fn disable_cow(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let mut flags: libc::c_int = 0;

    let result = unsafe { libc::ioctl(fd, libc::FS_IOC_GETFLAGS, &mut flags as *mut libc::c_int) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & FS_NOCOW_FL != 0 {
        return Ok(());
    }

    flags |= FS_NOCOW_FL;
    let result = unsafe { libc::ioctl(fd, libc::FS_IOC_SETFLAGS, &flags as *const libc::c_int) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn disable_cow(_file: &File) -> io::Result<()> {
    Err(io::ErrorKind::Unsupported.into())
}

#[cfg(target_os = "linux")]
fn xattr_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Set one extended attribute on an open file.
#[cfg(target_os = "linux")]
pub fn set_xattr(file: &File, name: &str, value: &[u8]) -> io::Result<()> {
    let name = xattr_name(name)?;
    let result = unsafe {
        libc::fsetxattr(
            file.as_raw_fd(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            0,
        )
    };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_xattr(_file: &File, _name: &str, _value: &[u8]) -> io::Result<()> {
    Err(io::ErrorKind::Unsupported.into())
}

/// Read one extended attribute. A missing attribute is `Ok(None)`.
#[cfg(target_os = "linux")]
pub fn get_xattr(file: &File, name: &str) -> io::Result<Option<Vec<u8>>> {
    let name = xattr_name(name)?;
    let fd = file.as_raw_fd();

    loop {
        let size = unsafe { libc::fgetxattr(fd, name.as_ptr(), std::ptr::null_mut(), 0) };
        if size < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::ENODATA) => Ok(None),
                _ => Err(err),
            };
        }

        let mut value = vec![0u8; size as usize];
        let read = unsafe {
            libc::fgetxattr(fd, name.as_ptr(), value.as_mut_ptr().cast(), value.len())
        };
        if read < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                // Grew between the two calls.
                Some(libc::ERANGE) => continue,
                Some(libc::ENODATA) => return Ok(None),
                _ => return Err(err),
            }
        }
        value.truncate(read as usize);
        return Ok(Some(value));
    }
}

#[cfg(not(target_os = "linux"))]
pub fn get_xattr(_file: &File, _name: &str) -> io::Result<Option<Vec<u8>>> {
    Err(io::ErrorKind::Unsupported.into())
}

/// Names of every extended attribute on an open file.
#[cfg(target_os = "linux")]
pub fn list_xattrs(file: &File) -> io::Result<Vec<String>> {
    let fd = file.as_raw_fd();

    loop {
        let size = unsafe { libc::flistxattr(fd, std::ptr::null_mut(), 0) };
        if size < 0 {
            return Err(io::Error::last_os_error());
        }
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut list = vec![0u8; size as usize];
        let read = unsafe { libc::flistxattr(fd, list.as_mut_ptr().cast(), list.len()) };
        if read < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ERANGE) {
                continue;
            }
            return Err(err);
        }
        list.truncate(read as usize);

        return Ok(list
            .split(|&b| b == 0)
            .filter(|name| !name.is_empty())
            .filter_map(|name| std::str::from_utf8(name).ok())
            .map(str::to_string)
            .collect());
    }
}

#[cfg(not(target_os = "linux"))]
pub fn list_xattrs(_file: &File) -> io::Result<Vec<String>> {
    Err(io::ErrorKind::Unsupported.into())
}

/// Copy every readable extended attribute from `src` to `dst`. Attributes
/// the destination refuses are skipped.
pub fn copy_xattrs(src: &File, dst: &File) -> io::Result<()> {
    for name in list_xattrs(src)? {
        let Some(value) = get_xattr(src, &name)? else {
            continue;
        };
        if let Err(e) = set_xattr(dst, &name, &value) {
            debug!(attr = %name, error = %e, "Skipping extended attribute");
        }
    }
    Ok(())
}

/// Record a creation time in `user.crtime_usec`.
pub fn set_crtime(file: &File, time: SystemTime) -> io::Result<()> {
    let usec = time
        .duration_since(UNIX_EPOCH)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
        .as_micros();
    let usec = u64::try_from(usec).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    set_xattr(file, XATTR_CRTIME_USEC, &usec.to_le_bytes())
}

/// Set both access and modification time.
pub fn set_times(file: &File, time: SystemTime) -> io::Result<()> {
    file.set_times(FileTimes::new().set_accessed(time).set_modified(time))
}

/// Copy access and modification time from `src` to `dst`.
pub fn copy_times(src: &File, dst: &File) -> io::Result<()> {
    let meta = src.metadata()?;
    let mut times = FileTimes::new().set_modified(meta.modified()?);
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    dst.set_times(times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    /// Whether the filesystem under the temp dir accepts `user.*` xattrs.
    fn xattrs_supported(file: &File) -> bool {
        set_xattr(file, "user.probe", b"1").is_ok()
    }

    #[test]
    fn test_set_and_get_xattr() {
        let temp = NamedTempFile::new().unwrap();
        let file = temp.as_file();
        if !xattrs_supported(file) {
            return;
        }

        set_xattr(file, XATTR_SOURCE_ETAG, b"abc").unwrap();
        assert_eq!(
            get_xattr(file, XATTR_SOURCE_ETAG).unwrap().as_deref(),
            Some(&b"abc"[..])
        );
        assert_eq!(get_xattr(file, "user.missing").unwrap(), None);

        let names = list_xattrs(file).unwrap();
        assert!(names.iter().any(|n| n == XATTR_SOURCE_ETAG));
    }

    #[test]
    fn test_copy_xattrs() {
        let src = NamedTempFile::new().unwrap();
        let dst = NamedTempFile::new().unwrap();
        if !xattrs_supported(src.as_file()) {
            return;
        }

        set_xattr(src.as_file(), XATTR_SOURCE_URL, b"https://example.com/a.raw").unwrap();
        copy_xattrs(src.as_file(), dst.as_file()).unwrap();

        assert_eq!(
            get_xattr(dst.as_file(), XATTR_SOURCE_URL).unwrap().as_deref(),
            Some(&b"https://example.com/a.raw"[..])
        );
    }

    #[test]
    fn test_crtime_is_little_endian_micros() {
        let temp = NamedTempFile::new().unwrap();
        if !xattrs_supported(temp.as_file()) {
            return;
        }

        let time = UNIX_EPOCH + Duration::from_micros(1_445_412_480_000_123);
        set_crtime(temp.as_file(), time).unwrap();
        let raw = get_xattr(temp.as_file(), XATTR_CRTIME_USEC).unwrap().unwrap();
        assert_eq!(raw, 1_445_412_480_000_123u64.to_le_bytes());
    }

    #[test]
    fn test_set_and_copy_times() {
        let src = NamedTempFile::new().unwrap();
        let dst = NamedTempFile::new().unwrap();
        let time = UNIX_EPOCH + Duration::from_secs(1_445_412_480);

        set_times(src.as_file(), time).unwrap();
        copy_times(src.as_file(), dst.as_file()).unwrap();

        assert_eq!(src.as_file().metadata().unwrap().modified().unwrap(), time);
        assert_eq!(dst.as_file().metadata().unwrap().modified().unwrap(), time);
    }
}
