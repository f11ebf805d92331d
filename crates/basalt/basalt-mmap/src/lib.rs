//! Named shared-memory segments backed by memory-mapped files.
//!
//! A segment is a file under the host's shared-memory directory (`/dev/shm` on
//! Linux) that both processes map read-write. The host creates it, the client
//! opens it by name. Nothing beyond the name is exchanged between them.

use memmap2::{MmapMut, MmapOptions};
use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

#[cfg(target_os = "linux")]
const LINUX_SHM_DIR: &str = "/dev/shm";

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("no shared-memory facility on this platform, configure a shared-memory directory")]
    PlatformUnsupported,

    #[error("invalid segment name '{0}'")]
    InvalidName(String),

    #[error("segment '{name}' i/o failure")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("segment '{name}' is {len} bytes, need at least {required}")]
    TooSmall { name: String, len: u64, required: u64 },
}

pub type SegmentResult<T> = Result<T, SegmentError>;

/// The directory that holds named segments on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmFacility {
    dir: PathBuf,
}

impl ShmFacility {
    /// Platform default facility.
    ///
    /// Only Linux has a well-known shared-memory directory. Everywhere else the
    /// caller has to supply one with [`ShmFacility::with_dir`].
    pub fn detect() -> SegmentResult<Self> {
        #[cfg(target_os = "linux")]
        {
            let dir = Path::new(LINUX_SHM_DIR);
            if dir.is_dir() {
                return Ok(Self {
                    dir: dir.to_path_buf(),
                });
            }
        }

        Err(SegmentError::PlatformUnsupported)
    }

    /// Facility rooted at an explicit directory.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Uses `dir` when given, otherwise falls back to [`ShmFacility::detect`].
    pub fn resolve(dir: Option<&Path>) -> SegmentResult<Self> {
        match dir {
            Some(dir) => Ok(Self::with_dir(dir)),
            None => Self::detect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the backing file for `name`.
    ///
    /// Names are single path components so a segment can never escape the
    /// facility directory.
    pub fn path_for(&self, name: &str) -> SegmentResult<PathBuf> {
        let bad = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0']);
        if bad {
            return Err(SegmentError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }
}

/// A mapped, named shared-memory segment.
///
/// Dropping the host side unmaps and removes the backing file; dropping the
/// client side only unmaps. Both steps are best-effort because the peer may
/// already have removed the file.
pub struct SharedSegment {
    file: File,
    mmap: MmapMut,
    name: String,
    path: PathBuf,
    host: bool,
}

impl SharedSegment {
    /// Create a new segment of `size_bytes` and map all of it read-write.
    ///
    /// Fails if a segment with the same name already exists.
    pub fn create(facility: &ShmFacility, name: &str, size_bytes: u64) -> SegmentResult<Self> {
        let path = facility.path_for(name)?;
        let io_err = |source: io::Error| SegmentError::Io {
            name: name.to_string(),
            source,
        };

        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_err)?;

        let sized = file
            .set_len(size_bytes)
            .and_then(|()| map_len(&file, size_bytes as usize));
        let mmap = match sized {
            Ok(mmap) => mmap,
            Err(source) => {
                // don't leave a half-made segment behind under this name
                let _ = std::fs::remove_file(&path);
                return Err(io_err(source));
            }
        };

        tracing::info!(
            segment = name,
            path = %path.display(),
            len = size_bytes,
            "created shared segment"
        );
        Ok(Self {
            file,
            mmap,
            name: name.to_string(),
            path,
            host: true,
        })
    }

    /// Open an existing segment and map only its first `header_len` bytes.
    ///
    /// The caller reads the real size from the header and then calls
    /// [`SharedSegment::remap`].
    pub fn open_header(facility: &ShmFacility, name: &str, header_len: usize) -> SegmentResult<Self> {
        let path = facility.path_for(name)?;
        let io_err = |source: io::Error| SegmentError::Io {
            name: name.to_string(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_err)?;

        let file_len = file.metadata().map_err(io_err)?.len();
        if file_len < header_len as u64 {
            return Err(SegmentError::TooSmall {
                name: name.to_string(),
                len: file_len,
                required: header_len as u64,
            });
        }

        let mmap = map_len(&file, header_len).map_err(io_err)?;

        tracing::info!(
            segment = name,
            path = %path.display(),
            len = header_len,
            "opened shared segment header"
        );
        Ok(Self {
            file,
            mmap,
            name: name.to_string(),
            path,
            host: false,
        })
    }

    /// Replace the current mapping with one covering `len` bytes.
    ///
    /// Any pointer previously taken from this segment is invalid afterwards.
    pub fn remap(&mut self, len: usize) -> SegmentResult<()> {
        let io_err = |source: io::Error| SegmentError::Io {
            name: self.name.clone(),
            source,
        };

        let file_len = self.file.metadata().map_err(io_err)?.len();
        if file_len < len as u64 {
            return Err(SegmentError::TooSmall {
                name: self.name.clone(),
                len: file_len,
                required: len as u64,
            });
        }

        self.mmap = map_len(&self.file, len).map_err(io_err)?;
        tracing::debug!(segment = %self.name, len, "remapped shared segment");
        Ok(())
    }

    /// Return raw pointer to start of the mapped segment
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True for the side that created the segment.
    pub fn is_host(&self) -> bool {
        self.host
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        // The mapping itself is released when `mmap` drops after this body.
        if self.host {
            match std::fs::remove_file(&self.path) {
                Ok(()) => tracing::debug!(segment = %self.name, "removed shared segment"),
                Err(e) => tracing::debug!(
                    segment = %self.name,
                    error = %e,
                    "shared segment already gone"
                ),
            }
        }
    }
}

fn map_len(file: &File, len: usize) -> io::Result<MmapMut> {
    // SAFETY: the file stays open for the life of the mapping and its length was
    // checked (or set) to cover `len` bytes. Concurrent modification by the peer
    // process is the point of the mapping; all shared fields are atomics.
    unsafe { MmapOptions::new().len(len).map_mut(file) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_names_that_leave_the_directory() {
        let facility = ShmFacility::with_dir("/tmp");
        for name in ["", ".", "..", "a/b", "a\\b", "nul\0"] {
            assert!(
                matches!(facility.path_for(name), Err(SegmentError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
        assert_eq!(facility.path_for("seg").unwrap(), Path::new("/tmp/seg"));
    }

    #[test]
    fn create_then_open_sees_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let facility = ShmFacility::with_dir(dir.path());

        let mut host = SharedSegment::create(&facility, "seg", 64).unwrap();
        assert_eq!(host.len(), 64);
        unsafe { host.as_mut_ptr().add(3).write(0xAB) };

        let mut client = SharedSegment::open_header(&facility, "seg", 8).unwrap();
        assert_eq!(client.len(), 8);
        assert_eq!(unsafe { client.as_mut_ptr().add(3).read() }, 0xAB);

        client.remap(64).unwrap();
        assert_eq!(client.len(), 64);
        unsafe { client.as_mut_ptr().add(63).write(0x11) };
        assert_eq!(unsafe { host.as_mut_ptr().add(63).read() }, 0x11);
    }

    #[test]
    fn create_fails_when_name_taken() {
        let dir = tempfile::tempdir().unwrap();
        let facility = ShmFacility::with_dir(dir.path());

        let _host = SharedSegment::create(&facility, "taken", 16).unwrap();
        let err = SharedSegment::create(&facility, "taken", 16).err().unwrap();
        assert!(matches!(err, SegmentError::Io { .. }));
    }

    #[test]
    fn open_missing_segment_fails() {
        let dir = tempfile::tempdir().unwrap();
        let facility = ShmFacility::with_dir(dir.path());
        assert!(SharedSegment::open_header(&facility, "nope", 8).is_err());
    }

    #[test]
    fn remap_beyond_file_is_too_small() {
        let dir = tempfile::tempdir().unwrap();
        let facility = ShmFacility::with_dir(dir.path());

        let _host = SharedSegment::create(&facility, "short", 16).unwrap();
        let mut client = SharedSegment::open_header(&facility, "short", 8).unwrap();
        let err = client.remap(32).unwrap_err();
        assert!(matches!(err, SegmentError::TooSmall { required: 32, .. }));
    }

    #[test]
    fn host_drop_removes_file_and_tolerates_peer_removal() {
        let dir = tempfile::tempdir().unwrap();
        let facility = ShmFacility::with_dir(dir.path());

        let host = SharedSegment::create(&facility, "gone", 16).unwrap();
        let path = host.path().to_path_buf();
        let client = SharedSegment::open_header(&facility, "gone", 8).unwrap();
        assert!(path.exists());

        drop(host);
        assert!(!path.exists());
        // client teardown after the host already removed the file
        drop(client);

        let host = SharedSegment::create(&facility, "gone", 16).unwrap();
        std::fs::remove_file(&path).unwrap();
        drop(host);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn detect_finds_dev_shm() {
        let facility = ShmFacility::detect().unwrap();
        assert_eq!(facility.dir(), Path::new("/dev/shm"));
    }
}
