//! Helpers shared by the integration tests: an in-memory block device and
//! the embedded `keylargo` FAT32 test image.

#![allow(dead_code)]

use hex_literal::hex;
use tinyfat::{BlockDevice, BlockIdx, DeviceMode, TimeSource, Timestamp};

pub const SECTOR_LEN: usize = 512;

/// Number of sectors in the test device (16 MiB).
pub const DISK_SECTORS: usize = 32_000;

#[derive(Debug)]
pub enum RamDiskError {
    OutOfRange,
}

/// A RAM-backed block device.
pub struct RamDisk {
    data: Vec<u8>,
    read_only: bool,
}

impl RamDisk {
    pub fn new(sectors: usize) -> RamDisk {
        RamDisk {
            data: vec![0u8; sectors * SECTOR_LEN],
            read_only: false,
        }
    }

    pub fn from_image(data: Vec<u8>) -> RamDisk {
        assert_eq!(data.len() % SECTOR_LEN, 0);
        RamDisk {
            data,
            read_only: false,
        }
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn sector(&self, lba: u32) -> &[u8] {
        let start = lba as usize * SECTOR_LEN;
        &self.data[start..start + SECTOR_LEN]
    }

    fn range(&self, len: usize, start: BlockIdx) -> Result<core::ops::Range<usize>, RamDiskError> {
        let offset = start.0 as usize * SECTOR_LEN;
        let end = offset + len;
        if end > self.data.len() {
            return Err(RamDiskError::OutOfRange);
        }
        Ok(offset..end)
    }
}

impl BlockDevice for RamDisk {
    type Error = RamDiskError;

    async fn read(&mut self, dst: &mut [u8], start: BlockIdx) -> Result<usize, Self::Error> {
        let range = self.range(dst.len(), start)?;
        dst.copy_from_slice(&self.data[range]);
        Ok(dst.len())
    }

    async fn write(&mut self, src: &[u8], start: BlockIdx) -> Result<usize, Self::Error> {
        let range = self.range(src.len(), start)?;
        self.data[range].copy_from_slice(src);
        Ok(src.len())
    }

    async fn erase(&mut self, start: BlockIdx, count: u32) -> Result<(), Self::Error> {
        let range = self.range(count as usize * SECTOR_LEN, start)?;
        self.data[range].fill(0);
        Ok(())
    }

    fn mode(&self) -> DeviceMode {
        if self.read_only {
            DeviceMode::ReadOnly
        } else {
            DeviceMode::ReadWrite
        }
    }

    fn block_size(&self) -> usize {
        SECTOR_LEN
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A clock pinned to 2016-05-23 14:30:20, so directory-entry timestamps are
/// deterministic.
pub struct TestClock;

impl TimeSource for TestClock {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 46,
            zero_indexed_month: 4,
            zero_indexed_day: 22,
            hours: 14,
            minutes: 30,
            seconds: 20,
        }
    }
}

/// A clock that follows the host's wall clock.
pub struct WallClock;

impl TimeSource for WallClock {
    fn get_timestamp(&self) -> Timestamp {
        use chrono::{Datelike, Timelike};
        let local = chrono::Local::now();
        Timestamp {
            year_since_1970: (local.year() - 1970) as u8,
            zero_indexed_month: local.month0() as u8,
            zero_indexed_day: local.day0() as u8,
            hours: local.hour() as u8,
            minutes: local.minute() as u8,
            seconds: local.second() as u8,
        }
    }
}

pub const ROOTFILE_CONTENTS: &[u8] = b"this is\nthe root file\n";
pub const DIRFILE_CONTENTS: &[u8] =
    b"this is not\nnot the root\nnot the root file\nnope. \nThis file has 5 lines.\n";

/// Start of the first FAT copy within the image.
pub const FAT1_SECTOR: u32 = 32;
/// Start of the second FAT copy.
pub const FAT2_SECTOR: u32 = 32 + 0x3BE8;
/// First sector of the data area (cluster 2, the root directory).
pub const DATA_SECTOR: u32 = 30_704;

/// Boot sector of the `keylargo` volume (clean mkfs.fat FAT32 image:
/// 512-byte sectors, 8 sectors per cluster, 32 reserved sectors, 2 FATs of
/// 0x3BE8 sectors each).
fn boot_sector() -> [u8; SECTOR_LEN] {
    let mut sector = [0u8; SECTOR_LEN];
    sector[..224].copy_from_slice(&hex!(
        "eb 58 90 6d 6b 66 73 2e 66 61 74 00 02 08 20 00"
        "02 00 00 00 00 f8 00 00 3e 00 f8 00 00 00 00 00"
        "d0 07 f0 00 e8 3b 00 00 00 00 00 00 02 00 00 00"
        "01 00 06 00 00 00 00 00 00 00 00 00 00 00 00 00"
        "80 00 29 06 f1 12 c5 6b 65 79 6c 61 72 67 6f 20"
        "20 20 46 41 54 33 32 20 20 20 0e 1f be 77 7c ac"
        "22 c0 74 0b 56 b4 0e bb 07 00 cd 10 5e eb f0 32"
        "e4 cd 16 cd 19 eb fe 54 68 69 73 20 69 73 20 6e"
        "6f 74 20 61 20 62 6f 6f 74 61 62 6c 65 20 64 69"
        "73 6b 2e 20 20 50 6c 65 61 73 65 20 69 6e 73 65"
        "72 74 20 61 20 62 6f 6f 74 61 62 6c 65 20 66 6c"
        "6f 70 70 79 20 61 6e 64 0d 0a 70 72 65 73 73 20"
        "61 6e 79 20 6b 65 79 20 74 6f 20 74 72 79 20 61"
        "67 61 69 6e 20 2e 2e 2e 20 0d 0a 00 00 00 00 00"
    ));
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

fn fsinfo_sector(free_count: [u8; 4], next_free: u8) -> [u8; SECTOR_LEN] {
    let mut sector = [0u8; SECTOR_LEN];
    sector[..4].copy_from_slice(&hex!("52 52 61 41"));
    sector[484..488].copy_from_slice(&hex!("72 72 41 61"));
    sector[488..492].copy_from_slice(&free_count);
    sector[492] = next_free;
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

/// Build the 16 MiB `keylargo` image: `/rootfile` and `/rootdir/dirfile`,
/// plus a volume label and a few deleted entries.
pub fn make_fat32_image() -> Vec<u8> {
    let mut image = vec![0u8; DISK_SECTORS * SECTOR_LEN];
    let mut patch = |lba: usize, data: &[u8]| {
        image[lba * SECTOR_LEN..lba * SECTOR_LEN + data.len()].copy_from_slice(data);
    };

    patch(0, &boot_sector());
    patch(1, &fsinfo_sector(hex!("f8 f1 1d 00"), 0x05));
    // Backup boot region.
    patch(6, &boot_sector());
    patch(7, &fsinfo_sector(hex!("fb f1 1d 00"), 0x02));

    // Both FAT copies: media/EOC entries, root dir at cluster 2, rootdir at
    // 3, rootfile at 4, dirfile at 5, all single-cluster chains.
    let fat_head = hex!(
        "f8 ff ff 0f ff ff ff 0f f8 ff ff 0f ff ff ff 0f"
        "ff ff ff 0f ff ff ff 0f"
    );
    patch(FAT1_SECTOR as usize, &fat_head);
    patch(FAT2_SECTOR as usize, &fat_head);

    // Root directory (cluster 2).
    patch(
        30_704,
        &hex!(
            "6b 65 79 6c 61 72 67 6f 20 20 20 08 00 00 ba 53"
            "35 58 35 58 00 00 ba 53 35 58 00 00 00 00 00 00"
            "41 72 00 6f 00 6f 00 74 00 66 00 0f 00 1a 69 00"
            "6c 00 65 00 00 00 ff ff ff ff 00 00 ff ff ff ff"
            "52 4f 4f 54 46 49 4c 45 20 20 20 20 00 03 d4 bb"
            "37 58 37 58 00 00 d4 bb 37 58 04 00 16 00 00 00"
            "41 72 00 6f 00 6f 00 74 00 64 00 0f 00 de 69 00"
            "72 00 00 00 ff ff ff ff ff ff 00 00 ff ff ff ff"
            "52 4f 4f 54 44 49 52 20 20 20 20 10 00 29 e4 bb"
            "37 58 37 58 00 00 e4 bb 37 58 03 00 00 00 00 00"
            "e5 6d 00 2d 00 4e 00 44 00 38 00 0f 00 95 4a 00"
            "49 00 32 00 00 00 ff ff ff ff 00 00 ff ff ff ff"
            "e5 2e 00 67 00 6f 00 75 00 74 00 0f 00 95 70 00"
            "75 00 74 00 73 00 74 00 72 00 00 00 65 00 61 00"
            "e5 4f 55 54 50 55 7e 31 20 20 20 20 00 03 d4 bb"
            "37 58 37 58 00 00 d4 bb 37 58 04 00 16 00 00 00"
        ),
    );

    // `/rootdir` contents (cluster 3).
    patch(
        30_712,
        &hex!(
            "2e 20 20 20 20 20 20 20 20 20 20 10 00 28 64 b6"
            "37 58 37 58 00 00 64 b6 37 58 03 00 00 00 00 00"
            "2e 2e 20 20 20 20 20 20 20 20 20 10 00 28 64 b6"
            "37 58 37 58 00 00 64 b6 37 58 00 00 00 00 00 00"
            "41 64 00 69 00 72 00 66 00 69 00 0f 00 27 6c 00"
            "65 00 00 00 ff ff ff ff ff ff 00 00 ff ff ff ff"
            "44 49 52 46 49 4c 45 20 20 20 20 20 00 28 e4 bb"
            "37 58 37 58 00 00 e4 bb 37 58 05 00 49 00 00 00"
            "e5 6d 00 2d 00 48 00 49 00 47 00 0f 00 95 37 00"
            "48 00 32 00 00 00 ff ff ff ff 00 00 ff ff ff ff"
            "e5 2e 00 67 00 6f 00 75 00 74 00 0f 00 95 70 00"
            "75 00 74 00 73 00 74 00 72 00 00 00 65 00 61 00"
            "e5 4f 55 54 50 55 7e 31 20 20 20 20 00 28 e4 bb"
            "37 58 37 58 00 00 e4 bb 37 58 05 00 49 00 00 00"
        ),
    );

    // `/rootfile` contents (cluster 4).
    patch(30_720, ROOTFILE_CONTENTS);
    // `/rootdir/dirfile` contents (cluster 5).
    patch(30_728, DIRFILE_CONTENTS);

    image
}

/// The `keylargo` image as a mountable device.
pub fn make_block_device() -> RamDisk {
    RamDisk::from_image(make_fat32_image())
}

/// The `keylargo` volume behind an MBR partition table, starting at
/// `offset` sectors.
pub fn make_partitioned_device(offset: u32) -> RamDisk {
    let volume = make_fat32_image();
    let mut image = vec![0u8; (offset as usize + DISK_SECTORS) * SECTOR_LEN];
    // Partition entry 1: type 0x0C (FAT32 LBA), starting at `offset`.
    image[446] = 0x00;
    image[446 + 4] = 0x0C;
    image[446 + 8..446 + 12].copy_from_slice(&offset.to_le_bytes());
    image[446 + 12..446 + 16].copy_from_slice(&(DISK_SECTORS as u32).to_le_bytes());
    image[510] = 0x55;
    image[511] = 0xAA;
    image[offset as usize * SECTOR_LEN..][..volume.len()].copy_from_slice(&volume);
    RamDisk::from_image(image)
}
