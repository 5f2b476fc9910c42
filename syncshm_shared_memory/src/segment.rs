//! Named shared memory segments: create, open, map and remove
//!
//! Segments live in the POSIX shm namespace (`/dev/shm` on Linux) and are
//! shared by name, not by reference. Each process maps its own
//! [`MappedRegion`]; dropping it unmaps the view but never unlinks the name.
//! Removal is always explicit through [`remove`].

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use syncshm::consts::{MAX_SEGMENT_NAME_LEN, SEGMENT_MODE};

/// Normalize a segment name to its POSIX form (`/name`).
///
/// A missing leading `/` is added; empty names, interior `/` and names over
/// `NAME_MAX` are rejected before any system call is made.
pub fn normalize_name(name: &str) -> ShmResult<String> {
    let bare = name.strip_prefix('/').unwrap_or(name);
    if bare.is_empty() {
        return Err(ShmError::InvalidName {
            name: name.to_string(),
            reason: "name is empty",
        });
    }
    if bare.contains('/') {
        return Err(ShmError::InvalidName {
            name: name.to_string(),
            reason: "name contains '/' after the leading one",
        });
    }
    if bare.contains('\0') {
        return Err(ShmError::InvalidName {
            name: name.to_string(),
            reason: "name contains NUL",
        });
    }
    if bare.len() + 1 > MAX_SEGMENT_NAME_LEN {
        return Err(ShmError::InvalidName {
            name: name.to_string(),
            reason: "name exceeds NAME_MAX",
        });
    }
    Ok(format!("/{bare}"))
}

fn map_errno(errno: Errno, name: &str) -> ShmError {
    match errno {
        Errno::EEXIST => ShmError::AlreadyExists {
            name: name.to_string(),
        },
        Errno::ENOENT => ShmError::NotFound {
            name: name.to_string(),
        },
        Errno::EACCES | Errno::EPERM => ShmError::PermissionDenied {
            name: name.to_string(),
        },
        Errno::ENAMETOOLONG | Errno::EINVAL => ShmError::InvalidName {
            name: name.to_string(),
            reason: "rejected by the OS",
        },
        other => ShmError::Nix { source: other },
    }
}

/// Best-effort removal of a named segment.
///
/// Returns `Ok(true)` if a segment was unlinked and `Ok(false)` if there was
/// none. Processes that still map the segment keep their view until they
/// unmap it; the name itself is gone immediately.
pub fn remove(name: &str) -> ShmResult<bool> {
    let name = normalize_name(name)?;
    match shm_unlink(name.as_str()) {
        Ok(()) => {
            tracing::debug!("Removed segment {}", name);
            Ok(true)
        }
        Err(Errno::ENOENT) => Ok(false),
        Err(errno) => Err(map_errno(errno, &name)),
    }
}

/// Whether a segment with this name currently exists.
pub fn exists(name: &str) -> ShmResult<bool> {
    let name = normalize_name(name)?;
    match shm_open(name.as_str(), OFlag::O_RDONLY, Mode::empty()) {
        Ok(_fd) => Ok(true),
        Err(Errno::ENOENT) => Ok(false),
        Err(Errno::EACCES) => Ok(true),
        Err(errno) => Err(map_errno(errno, &name)),
    }
}

/// Identity of the object currently bound to `name`, `None` if unbound.
///
/// Two handles refer to the same segment only if their ids are equal. A
/// name that was removed and created again yields a different id.
pub fn identify(name: &str) -> ShmResult<Option<SegmentId>> {
    let name = normalize_name(name)?;
    match shm_open(name.as_str(), OFlag::O_RDONLY, Mode::empty()) {
        Ok(fd) => Ok(Some(SegmentId::of(&File::from(fd))?)),
        Err(Errno::ENOENT) => Ok(None),
        Err(errno) => Err(map_errno(errno, &name)),
    }
}

/// Remove `name` only while it still refers to segment `id`.
///
/// Returns `Ok(false)` when the name is unbound or now belongs to a newer
/// segment, which is left alone.
pub fn remove_if_same(name: &str, id: SegmentId) -> ShmResult<bool> {
    if identify(name)? != Some(id) {
        return Ok(false);
    }
    remove(name)
}

/// Create a new segment of `size` bytes, failing if the name is taken.
///
/// The backing storage is zero-filled. If sizing fails the half-created
/// object is unlinked again so a retry starts clean.
pub fn create_exclusive(name: &str, size: usize) -> ShmResult<SegmentHandle> {
    let name = normalize_name(name)?;
    let mode = Mode::from_bits_truncate(SEGMENT_MODE as libc::mode_t);
    let fd = shm_open(
        name.as_str(),
        OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
        mode,
    )
    .map_err(|errno| map_errno(errno, &name))?;

    if let Err(errno) = ftruncate(&fd, size as libc::off_t) {
        let _ = shm_unlink(name.as_str());
        return Err(map_errno(errno, &name));
    }

    tracing::debug!("Created segment {} ({} bytes)", name, size);
    let file = File::from(fd);
    let id = SegmentId::of(&file)?;
    Ok(SegmentHandle {
        name,
        file,
        size,
        id,
    })
}

/// Open a segment some other process created.
///
/// Fails with `NotFound` while the creator has not run yet. The reported
/// size may still be zero if the creator has not sized it.
pub fn open_existing(name: &str) -> ShmResult<SegmentHandle> {
    let name = normalize_name(name)?;
    let fd = shm_open(name.as_str(), OFlag::O_RDWR, Mode::empty())
        .map_err(|errno| map_errno(errno, &name))?;
    let file = File::from(fd);
    let metadata = file.metadata()?;

    Ok(SegmentHandle {
        name,
        size: metadata.len() as usize,
        id: SegmentId::from_metadata(&metadata),
        file,
    })
}

/// Device and inode of a segment object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId {
    dev: u64,
    ino: u64,
}

impl SegmentId {
    fn of(file: &File) -> ShmResult<Self> {
        Ok(Self::from_metadata(&file.metadata()?))
    }

    fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }
}

/// Open descriptor on a named segment
#[derive(Debug)]
pub struct SegmentHandle {
    name: String,
    file: File,
    size: usize,
    id: SegmentId,
}

impl SegmentHandle {
    /// Normalized segment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the backing storage in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Identity of the opened object
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Map the whole segment read-write into this process.
    ///
    /// An unsized segment reports `NotReady`; any mmap failure is
    /// `MapFailed`.
    pub fn map(&self) -> ShmResult<MappedRegion> {
        if self.size == 0 {
            return Err(ShmError::NotReady {
                name: self.name.clone(),
            });
        }

        let mmap = unsafe { MmapOptions::new().len(self.size).map_mut(&self.file) }.map_err(
            |source| ShmError::MapFailed {
                name: self.name.clone(),
                source,
            },
        )?;

        Ok(MappedRegion {
            name: self.name.clone(),
            id: self.id,
            mmap,
        })
    }
}

/// Process-local read-write view of a segment
pub struct MappedRegion {
    name: String,
    id: SegmentId,
    mmap: MmapMut,
}

impl MappedRegion {
    /// Name of the mapped segment
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of the mapped object
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Whether the mapping is empty (never true for a mapped segment)
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Base address of the mapping
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    /// Mutable base address of the mapping
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }
}
