//! Filesystem-level types shared by the directory engine and the file
//! runtime.

pub mod attributes;
pub mod filename;
pub mod files;
pub mod info;
pub mod timestamp;

/// Largest file size representable on a non-exFAT volume.
pub const MAX_FILE_SIZE: u32 = u32::MAX;
