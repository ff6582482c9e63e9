//! Memory-mapped backing stores for `splinter-core`.
//!
//! Two kinds of backing object are supported, selected by the caller:
//! - a POSIX shared-memory object (`shm_open`), the default;
//! - a regular file, used when the `persistent` build mode is requested.
//!
//! Both end up mapped through `memmap2`, following the same
//! file-handle-owns-the-mapping shape the rest of the pack uses.

use memmap2::{Mmap, MmapMut};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::FromRawFd;
use std::path::Path;

/// A read-write memory mapping, either of a POSIX shm object or a regular file.
pub struct MmapFileMut {
    /// File handle kept alive to maintain the memory map validity.
    _file: File,
    /// Memory-mapped region providing mutable access to the backing bytes.
    mmap: MmapMut,
}

/// A read-only memory mapping, either of a POSIX shm object or a regular file.
pub struct MmapFile {
    /// File handle kept alive to maintain the memory map validity.
    _file: File,
    /// Memory-mapped region providing read-only access to the backing bytes.
    mmap: Mmap,
}

/// POSIX requires shm names to start with `/` and contain no further `/`.
/// Callers may pass a bare name (`splinter_debug`) or an already-slashed one;
/// this normalizes either form.
fn shm_path(name: &str) -> CString {
    let normalized = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };
    CString::new(normalized).expect("shm name must not contain a NUL byte")
}

fn file_from_raw_fd(fd: libc::c_int) -> io::Result<File> {
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd was just returned by a successful shm_open call and is not
    // owned elsewhere; wrapping it in a File gives it a single owner that
    // closes it on drop.
    Ok(unsafe { File::from_raw_fd(fd) })
}

impl MmapFileMut {
    /// Creates a new POSIX shared-memory object with create-exclusive
    /// semantics (fails if it already exists), sized to `size_bytes`, and
    /// maps it read-write.
    pub fn create_shm_exclusive(name: &str, size_bytes: u64) -> io::Result<Self> {
        let cname = shm_path(name);
        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o666,
            )
        };
        let file = file_from_raw_fd(fd)?;
        file.set_len(size_bytes)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Opens an existing POSIX shared-memory object read-write. The caller
    /// must already know its size (from a header read after mapping, or by
    /// stat'ing the fd); this maps the object's current full size.
    pub fn open_shm_rw(name: &str) -> io::Result<Self> {
        let cname = shm_path(name);
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0o666) };
        let file = file_from_raw_fd(fd)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Creates a new regular file sized to `size_bytes` and maps it
    /// read-write. Used by the `persistent` alternate build mode.
    pub fn create_file_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Opens an existing regular file and maps it read-write.
    pub fn open_file_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl MmapFile {
    /// Opens an existing POSIX shared-memory object read-only.
    pub fn open_shm_ro(name: &str) -> io::Result<Self> {
        let cname = shm_path(name);
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDONLY, 0o666) };
        let file = file_from_raw_fd(fd)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Opens an existing regular file read-only.
    pub fn open_file_ro<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { _file: file, mmap })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

/// Removes a POSIX shared-memory object by name. Not used by the core
/// boundary (destruction always happens externally to a running store);
/// exposed for tests and for administrative tooling that chooses to
/// reclaim a bus.
pub fn shm_unlink(name: &str) -> io::Result<()> {
    let cname = shm_path(name);
    let rc = unsafe { libc::shm_unlink(cname.as_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// True if a POSIX shared-memory object of this name currently exists.
///
/// On Linux, shm objects are backed by `tmpfs` mounted at `/dev/shm`, so this
/// is a plain path existence check rather than another `shm_open` round trip.
pub fn shm_exists(name: &str) -> bool {
    let bare = name.trim_start_matches('/');
    Path::new("/dev/shm").join(bare).exists()
}
