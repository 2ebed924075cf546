//! Open files and the modes they can be opened in.

use bitflags::bitflags;

use crate::blockdevice::BlockIdx;
use crate::{Error, SECTOR_LEN};

bitflags! {
    /// The mode a file is opened in. Bits are OR-composable:
    /// `Mode::READ | Mode::WRITE | Mode::CREATE_ALWAYS`.
    #[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Mode: u8 {
        /// Open for reading.
        const READ = 0x01;
        /// Open for writing.
        const WRITE = 0x02;
        /// Create a new file; fail with [`Error::Exists`] if it already
        /// exists.
        const CREATE_NEW = 0x04;
        /// Create the file, truncating it if it already exists.
        const CREATE_ALWAYS = 0x08;
        /// Open the file if it exists, create it otherwise.
        const OPEN_ALWAYS = 0x10;
        /// [`Mode::OPEN_ALWAYS`] plus an implicit seek to end of file.
        const OPEN_APPEND = 0x30;
    }
}

impl Mode {
    /// Open the file only if it already exists. This is the default when no
    /// creation bit is given.
    pub const OPEN_EXISTING: Mode = Mode::empty();

    /// Every bit a caller may pass to `open_file`.
    pub(crate) const ALLOWED: Mode = Mode::all();

    /// The read/write access bits.
    pub(crate) const RW: Mode = Mode::READ.union(Mode::WRITE);
}

bitflags! {
    /// A file's open mode together with the driver's internal run-time
    /// flags, packed into one byte.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub(crate) struct FileFlags: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        const CREATE_NEW = 0x04;
        const CREATE_ALWAYS = 0x08;
        const OPEN_ALWAYS = 0x10;
        /// Position the file pointer at end of file after open.
        const SEEK_END = 0x20;
        /// Metadata changed since the last sync.
        const MODIFIED = 0x40;
        /// The per-file sector cache holds unwritten data.
        const DIRTY = 0x80;
    }
}

impl From<Mode> for FileFlags {
    fn from(mode: Mode) -> FileFlags {
        FileFlags::from_bits_truncate(mode.bits())
    }
}

/// An open file on a mounted volume.
///
/// A `File` does not borrow the volume it came from; every operation goes
/// through [`FatFs`](crate::FatFs) and validates the file's mount generation
/// first, so files left over from a previous mount fail with
/// [`Error::InvalidObject`] instead of touching the wrong volume.
pub struct File {
    /// Mount generation this file belongs to.
    pub(crate) id: u16,
    /// Attribute byte from the directory entry.
    pub(crate) attr: u8,
    /// Starting cluster, zero while no data has been written.
    pub(crate) sclust: u32,
    /// File size in bytes.
    pub(crate) objsize: u32,
    /// Open mode and run-time state.
    pub(crate) flags: FileFlags,
    /// Latched abort code, returned by every operation until close.
    pub(crate) err: Option<Error>,
    /// File read/write pointer.
    pub(crate) fptr: u32,
    /// Cluster the pointer currently sits in.
    pub(crate) clust: u32,
    /// Sector held in the private cache, zero when none.
    pub(crate) sect: BlockIdx,
    /// Sector of this file's directory entry, for sync.
    pub(crate) dir_sect: BlockIdx,
    /// Offset of the directory entry within its sector.
    pub(crate) dir_off: usize,
    /// Whether the file is attached to a live mount.
    pub(crate) attached: bool,
    /// Private read/write sector cache.
    pub(crate) buf: [u8; SECTOR_LEN],
}

impl File {
    /// The access mode the file was opened with (the read/write bits only).
    pub fn mode(&self) -> Mode {
        Mode::from_bits_truncate(self.flags.bits()) & Mode::RW
    }

    /// The current file pointer, in bytes from the start of the file.
    pub fn offset(&self) -> u32 {
        self.fptr
    }

    /// The file size in bytes.
    pub fn length(&self) -> u32 {
        self.objsize
    }

    /// Is the file pointer at end of file?
    pub fn is_eof(&self) -> bool {
        self.fptr >= self.objsize
    }

    pub(crate) fn abort(&mut self, err: Error) -> Error {
        self.err = Some(err);
        err
    }
}

impl core::fmt::Debug for File {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("File")
            .field("id", &self.id)
            .field("sclust", &self.sclust)
            .field("objsize", &self.objsize)
            .field("fptr", &self.fptr)
            .field("flags", &self.flags)
            .field("err", &self.err)
            .finish()
    }
}
