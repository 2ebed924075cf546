//! Accessors over a raw 32-byte directory entry inside the volume window.
//!
//! The directory engine never holds a reference into the window across a
//! window move; it remembers `(sector, offset)` pairs and re-derives a
//! bounded view on each access.

use byteorder::{ByteOrder, LittleEndian};

use crate::fat::{FatType, DIR_ENTRY_LEN, LFN_OFFSETS, LLEF};
use crate::filesystem::attributes::Attributes;

/// Offsets within a short-name entry.
pub(crate) const DIR_NAME: usize = 0;
pub(crate) const DIR_ATTR: usize = 11;
pub(crate) const DIR_NTRES: usize = 12;
pub(crate) const DIR_CRT_TIME10: usize = 13;
pub(crate) const DIR_CRT_TIME: usize = 14;
pub(crate) const DIR_LST_ACC_DATE: usize = 18;
pub(crate) const DIR_FST_CLUS_HI: usize = 20;
pub(crate) const DIR_MOD_TIME: usize = 22;
pub(crate) const DIR_FST_CLUS_LO: usize = 26;
pub(crate) const DIR_FILE_SIZE: usize = 28;

/// Offsets within a long-name entry.
pub(crate) const LDIR_ORD: usize = 0;
pub(crate) const LDIR_ATTR: usize = 11;
pub(crate) const LDIR_TYPE: usize = 12;
pub(crate) const LDIR_CHKSUM: usize = 13;
pub(crate) const LDIR_FST_CLUS_LO: usize = 26;

/// A read-only view over one directory entry.
pub(crate) struct OnDiskDirEntry<'a> {
    data: &'a [u8],
}

impl<'a> OnDiskDirEntry<'a> {
    pub(crate) fn new(data: &'a [u8]) -> OnDiskDirEntry<'a> {
        debug_assert!(data.len() >= DIR_ENTRY_LEN);
        OnDiskDirEntry { data }
    }

    pub(crate) fn first_byte(&self) -> u8 {
        self.data[DIR_NAME]
    }

    pub(crate) fn name(&self) -> &[u8] {
        &self.data[DIR_NAME..DIR_NAME + 11]
    }

    pub(crate) fn attributes(&self) -> Attributes {
        Attributes::create_from_fat(self.data[DIR_ATTR])
    }

    pub(crate) fn ntres(&self) -> u8 {
        self.data[DIR_NTRES]
    }

    pub(crate) fn mod_time(&self) -> u16 {
        LittleEndian::read_u16(&self.data[DIR_MOD_TIME..])
    }

    pub(crate) fn mod_date(&self) -> u16 {
        LittleEndian::read_u16(&self.data[DIR_MOD_TIME + 2..])
    }

    pub(crate) fn file_size(&self) -> u32 {
        LittleEndian::read_u32(&self.data[DIR_FILE_SIZE..])
    }

    /// The starting cluster, combining the high half only on FAT32.
    pub(crate) fn first_cluster(&self, fat_type: FatType) -> u32 {
        let lo = u32::from(LittleEndian::read_u16(&self.data[DIR_FST_CLUS_LO..]));
        if fat_type == FatType::Fat32 {
            lo | u32::from(LittleEndian::read_u16(&self.data[DIR_FST_CLUS_HI..])) << 16
        } else {
            lo
        }
    }

    // Long-name entry fields.

    pub(crate) fn lfn_ordinal(&self) -> u8 {
        self.data[LDIR_ORD]
    }

    pub(crate) fn lfn_is_last(&self) -> bool {
        self.data[LDIR_ORD] & LLEF != 0
    }

    pub(crate) fn lfn_checksum(&self) -> u8 {
        self.data[LDIR_CHKSUM]
    }

    pub(crate) fn lfn_first_cluster_lo(&self) -> u16 {
        LittleEndian::read_u16(&self.data[LDIR_FST_CLUS_LO..])
    }

    /// The UTF-16 code unit at position `s` (0..13) of this long-name
    /// entry.
    pub(crate) fn lfn_unit(&self, s: usize) -> u16 {
        LittleEndian::read_u16(&self.data[LFN_OFFSETS[s]..])
    }
}

/// Store the starting cluster into a short-name entry, splitting the high
/// half on FAT32.
pub(crate) fn store_cluster(entry: &mut [u8], fat_type: FatType, cluster: u32) {
    LittleEndian::write_u16(&mut entry[DIR_FST_CLUS_LO..DIR_FST_CLUS_LO + 2], cluster as u16);
    if fat_type == FatType::Fat32 {
        LittleEndian::write_u16(
            &mut entry[DIR_FST_CLUS_HI..DIR_FST_CLUS_HI + 2],
            (cluster >> 16) as u16,
        );
    }
}
