//! An embeddable FAT volume driver for block-addressable storage.
//!
//! `tinyfat` mounts a FAT32 volume living on an SD/MMC card, a USB mass
//! storage device or an in-memory image, and gives a host application on a
//! resource-constrained target the ability to enumerate directories and to
//! read, create and write files with semantics compatible with mainstream
//! FAT implementations.
//!
//! The driver is `no_std`, allocation-free after mount, and async end to
//! end: every sector access awaits the host-provided [`BlockDevice`].
//! Access to a mounted volume is single-owner; the host serializes calls.
//!
//! ```no_run
//! # async fn demo<D: tinyfat::BlockDevice, T: tinyfat::TimeSource>(dev: D, clock: T)
//! # -> Result<(), tinyfat::Error> {
//! use tinyfat::{FatFs, Mode};
//!
//! let mut fs = FatFs::new(dev, clock);
//! fs.mount(512, Mode::READ | Mode::WRITE).await?;
//! let mut file = fs.open_file("/logs/boot.txt", Mode::READ).await?;
//! let mut buf = [0u8; 128];
//! let n = fs.read(&mut file, &mut buf).await?;
//! fs.close_file(&mut file).await?;
//! # Ok(()) }
//! ```
//!
//! exFAT volumes are detected but not implemented; FAT12/FAT16 volumes are
//! recognised during mount but their cluster chains are not serviced.

#![cfg_attr(not(test), no_std)]

// ****************************************************************************
//
// Logging facade: compiled against `defmt` or `log` depending on features,
// or compiled out entirely.
//
// ****************************************************************************

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both the `log` and `defmt-log` features");

#[cfg(feature = "defmt-log")]
#[doc(hidden)]
macro_rules! trace {
    ($($arg:tt)+) => (defmt::trace!($($arg)+));
}
#[cfg(feature = "defmt-log")]
#[doc(hidden)]
macro_rules! debug {
    ($($arg:tt)+) => (defmt::debug!($($arg)+));
}
#[cfg(feature = "defmt-log")]
#[doc(hidden)]
macro_rules! warn {
    ($($arg:tt)+) => (defmt::warn!($($arg)+));
}

#[cfg(feature = "log")]
#[doc(hidden)]
macro_rules! trace {
    ($($arg:tt)+) => (log::trace!($($arg)+));
}
#[cfg(feature = "log")]
#[doc(hidden)]
macro_rules! debug {
    ($($arg:tt)+) => (log::debug!($($arg)+));
}
#[cfg(feature = "log")]
#[doc(hidden)]
macro_rules! warn {
    ($($arg:tt)+) => (log::warn!($($arg)+));
}

#[cfg(not(any(feature = "defmt-log", feature = "log")))]
#[doc(hidden)]
macro_rules! trace {
    ($($arg:tt)+) => {{}};
}
#[cfg(not(any(feature = "defmt-log", feature = "log")))]
#[doc(hidden)]
macro_rules! debug {
    ($($arg:tt)+) => {{}};
}
#[cfg(not(any(feature = "defmt-log", feature = "log")))]
#[doc(hidden)]
macro_rules! warn {
    ($($arg:tt)+) => {{}};
}

#[macro_use]
mod structure;

pub mod blockdevice;
pub mod codepage;
pub mod fat;
pub mod filesystem;
mod fs;

pub use crate::blockdevice::{BlockCount, BlockDevice, BlockIdx, BlockIndexer, DeviceMode};
pub use crate::codepage::CodepageTables;
pub use crate::fat::FatType;
pub use crate::filesystem::attributes::Attributes;
pub use crate::filesystem::files::{File, Mode};
pub use crate::filesystem::info::FileInfo;
pub use crate::filesystem::timestamp::{TimeSource, Timestamp};
pub use crate::fs::{Dir, FatFs};

/// Sector size serviced by the driver's buffers, in bytes.
///
/// The volume access window and the per-file sector caches are statically
/// sized; a mount request or a BPB declaring a different sector size is
/// rejected with [`Error::InvalidParameter`].
pub const SECTOR_LEN: usize = 512;

/// [`SECTOR_LEN`] as a `u32`.
pub const SECTOR_LEN_U32: u32 = SECTOR_LEN as u32;

/// The errors a filesystem operation can report to the host.
///
/// Device-layer failures are logged with their payload at the point of
/// failure and collapse to [`Error::Disk`]; a file that hits a Disk or
/// Internal error latches it and returns it from every subsequent operation
/// until the file is closed.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A hard error occurred in the low-level disk I/O layer.
    Disk,
    /// Assertion failed: an on-disk structure violated a driver invariant.
    /// The mount should be considered unsafe.
    Internal,
    /// The physical drive cannot work.
    NotReady,
    /// Could not find the file.
    NoFile,
    /// Could not find the path.
    NoPath,
    /// The path name format is invalid.
    InvalidName,
    /// Access denied, or the directory is full and cannot grow.
    Denied,
    /// The object already exists.
    Exists,
    /// The file or directory object is invalid (stale mount generation, or
    /// already closed).
    InvalidObject,
    /// The drive is write-protected.
    WriteProtected,
    /// The logical drive number is invalid.
    InvalidDrive,
    /// The volume has no work area.
    NotEnabled,
    /// There is no valid FAT volume.
    NoFilesystem,
    /// Volume formatting was aborted.
    MkfsAborted,
    /// Could not get access to the volume within the defined period.
    Timeout,
    /// The operation was rejected by the sharing policy.
    Locked,
    /// A working buffer could not be allocated.
    OutOfMemory,
    /// Too many open files.
    TooManyOpenFiles,
    /// A given parameter is invalid.
    InvalidParameter,
    /// The operation is not supported on this volume subtype.
    Unsupported,
    /// The file is closed.
    Closed,
    /// The open mode bits are outside the allowed set.
    InvalidMode,
    /// The open mode asks for access the mounted volume was not granted.
    ForbiddenMode,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_small_and_copy() {
        fn assert_copy<T: Copy>() {}
        assert_copy::<Error>();
        assert!(core::mem::size_of::<Error>() <= 2);
    }
}
