//! The BIOS Parameter Block: the boot-sector structure describing a FAT
//! volume's geometry.

use byteorder::{ByteOrder, LittleEndian};

use crate::SECTOR_LEN;

/// A parsed view over a volume boot record.
///
/// Field accessors follow the standard BPB offsets; the FAT32 extended
/// region (offset 36 onward) is only meaningful once the cluster count has
/// classified the volume as FAT32.
pub struct Bpb<'a> {
    data: &'a [u8; SECTOR_LEN],
}

impl<'a> Bpb<'a> {
    /// The boot signature expected at offset 510.
    pub const FOOTER_VALUE: u16 = 0xAA55;

    /// Wrap a boot sector. No validation happens here; the mount path
    /// validates what it reads.
    pub fn new(data: &'a [u8; SECTOR_LEN]) -> Bpb<'a> {
        Bpb { data }
    }

    // FAT12/FAT16/FAT32 common region.
    define_field!(bytes_per_sector, u16, 11);
    define_field!(sectors_per_cluster, u8, 13);
    define_field!(reserved_sector_count, u16, 14);
    define_field!(num_fats, u8, 16);
    define_field!(root_entries_count, u16, 17);
    define_field!(total_sectors16, u16, 19);
    define_field!(media, u8, 21);
    define_field!(fat_size16, u16, 22);
    define_field!(sectors_per_track, u16, 24);
    define_field!(num_heads, u16, 26);
    define_field!(hidden_sectors, u32, 28);
    define_field!(total_sectors32, u32, 32);
    define_field!(footer, u16, 510);

    // FAT32 extended region.
    define_field!(fat_size32, u32, 36);
    define_field!(ext_flags, u16, 40);
    define_field!(fs_version, u16, 42);
    define_field!(root_cluster, u32, 44);
    define_field!(fs_info_sector, u16, 48);
    define_field!(backup_boot_sector, u16, 50);
    define_field!(drive_number, u8, 64);
    define_field!(volume_id, u32, 67);

    /// The x86 jump instruction at the start of the sector.
    pub fn jump_instruction(&self) -> [u8; 3] {
        let mut jmp = [0u8; 3];
        jmp.copy_from_slice(&self.data[0..3]);
        jmp
    }

    /// The OEM name following the jump instruction.
    pub fn oem_name(&self) -> &[u8] {
        &self.data[3..11]
    }

    /// The 11-byte volume label from the FAT32 extended region.
    pub fn volume_label(&self) -> &[u8] {
        &self.data[71..82]
    }

    /// The filesystem type string, `"FAT32   "` on FAT32 volumes.
    pub fn fs_type_string(&self) -> &[u8] {
        &self.data[82..90]
    }

    /// FAT size in sectors, whichever of the 16- and 32-bit fields is set.
    pub fn fat_size(&self) -> u32 {
        let size = u32::from(self.fat_size16());
        if size != 0 {
            size
        } else {
            self.fat_size32()
        }
    }

    /// Volume size in sectors, whichever of the 16- and 32-bit fields is
    /// set.
    pub fn total_sectors(&self) -> u32 {
        let total = u32::from(self.total_sectors16());
        if total != 0 {
            total
        } else {
            self.total_sectors32()
        }
    }

    /// Does the sector carry the 0xAA55 boot signature?
    pub fn has_valid_footer(&self) -> bool {
        self.footer() == Self::FOOTER_VALUE
    }
}

impl core::fmt::Debug for Bpb<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bpb")
            .field("oem_name", &core::str::from_utf8(self.oem_name()).ok())
            .field("bytes_per_sector", &self.bytes_per_sector())
            .field("sectors_per_cluster", &self.sectors_per_cluster())
            .field("reserved_sector_count", &self.reserved_sector_count())
            .field("num_fats", &self.num_fats())
            .field("root_entries_count", &self.root_entries_count())
            .field("total_sectors", &self.total_sectors())
            .field("fat_size", &self.fat_size())
            .field("root_cluster", &self.root_cluster())
            .field("fs_info_sector", &self.fs_info_sector())
            .field("volume_id", &self.volume_id())
            .field(
                "volume_label",
                &core::str::from_utf8(self.volume_label()).ok(),
            )
            .finish()
    }
}

/// Write a 32-bit value at `offset` in a sector buffer.
pub(crate) fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut data[offset..offset + 4], value);
}

/// Write a 16-bit value at `offset` in a sector buffer.
pub(crate) fn put_u16(data: &mut [u8], offset: usize, value: u16) {
    LittleEndian::write_u16(&mut data[offset..offset + 2], value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // Boot sector of the `keylargo` FAT32 test image (mkfs.fat, 512-byte
    // sectors, 8 sectors per cluster, 32 reserved sectors, 2 FATs).
    fn keylargo_boot_sector() -> [u8; SECTOR_LEN] {
        let mut sector = [0u8; SECTOR_LEN];
        sector[..96].copy_from_slice(&hex!(
            "eb 58 90 6d 6b 66 73 2e 66 61 74 00 02 08 20 00"
            "02 00 00 00 00 f8 00 00 3e 00 f8 00 00 00 00 00"
            "d0 07 f0 00 e8 3b 00 00 00 00 00 00 02 00 00 00"
            "01 00 06 00 00 00 00 00 00 00 00 00 00 00 00 00"
            "80 00 29 06 f1 12 c5 6b 65 79 6c 61 72 67 6f 20"
            "20 20 46 41 54 33 32 20 20 20 0e 1f be 77 7c ac"
        ));
        sector[510] = 0x55;
        sector[511] = 0xAA;
        sector
    }

    #[test]
    fn parses_keylargo_geometry() {
        let sector = keylargo_boot_sector();
        let bpb = Bpb::new(&sector);
        assert!(bpb.has_valid_footer());
        assert_eq!(bpb.bytes_per_sector(), 512);
        assert_eq!(bpb.sectors_per_cluster(), 8);
        assert_eq!(bpb.reserved_sector_count(), 32);
        assert_eq!(bpb.num_fats(), 2);
        assert_eq!(bpb.root_entries_count(), 0);
        assert_eq!(bpb.total_sectors(), 0x00F0_07D0);
        assert_eq!(bpb.fat_size(), 0x3BE8);
        assert_eq!(bpb.root_cluster(), 2);
        assert_eq!(bpb.fs_info_sector(), 1);
        assert_eq!(bpb.fs_version(), 0);
        assert_eq!(bpb.oem_name(), b"mkfs.fat");
        assert_eq!(bpb.volume_label(), b"keylargo   ");
        assert_eq!(bpb.fs_type_string(), b"FAT32   ");
    }

    #[test]
    fn footer_check() {
        let mut sector = keylargo_boot_sector();
        sector[510] = 0;
        assert!(!Bpb::new(&sector).has_valid_footer());
    }
}
