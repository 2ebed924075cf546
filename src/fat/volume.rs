//! Volume-level internals: boot-record probing, geometry initialisation,
//! the shared sector window and the cluster allocator.

use byteorder::{ByteOrder, LittleEndian};

use crate::blockdevice::{BlockCount, BlockDevice, BlockIdx};
use crate::fat::bpb::Bpb;
use crate::fat::direntry::OnDiskDirEntry;
use crate::fat::info::{write_info_sector, InfoSector};
use crate::fat::{
    FatType, CLUSTER_DISK_ERROR, CLUSTER_INT_ERROR, CLUST_MAX_FAT12, CLUST_MAX_FAT16,
    CLUST_MAX_FAT32, DIR_ENTRY_LEN_U32, MASK_28BITS,
};
use crate::filesystem::timestamp::TimeSource;
use crate::fs::FatFs;
use crate::{Error, SECTOR_LEN};

/// Offset of the partition table inside the master boot record.
const MBR_TABLE: usize = 446;
/// Size of one partition table entry.
const MBR_ENTRY_LEN: usize = 16;
/// Offset of the starting LBA within a partition table entry.
const MBR_ENTRY_LBA: usize = 8;

/// What probing a sector for a volume boot record concluded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum BootSector {
    /// A FAT volume boot record.
    Fat,
    /// An exFAT volume boot record.
    ExFat,
    /// Not a FAT VBR, but the sector carries a valid boot signature.
    NotFatValid,
    /// Not a FAT VBR and no valid boot signature.
    NotFatInvalid,
    /// The sector could not be read.
    DiskError,
}

impl<D, T> FatFs<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    // ------------------------------------------------------------------
    // Volume access window.
    //
    // One sector-sized buffer is shared by FAT traversal, directory walks
    // and FSInfo updates. It either reflects the sector at `winsect`
    // verbatim, or carries the dirty flag indicating pending write-back.
    // ------------------------------------------------------------------

    /// Point the window at `sector`, flushing any pending write first.
    pub(crate) async fn move_window(&mut self, sector: BlockIdx) -> Result<(), Error> {
        if sector == self.winsect {
            return Ok(());
        }
        self.sync_window().await?;
        trace!("move_window: sector={}", sector.0);
        if self.disk.read(&mut self.win, sector).await.is_err() {
            self.winsect = BlockIdx::INVALID;
            return Err(Error::Disk);
        }
        self.winsect = sector;
        Ok(())
    }

    /// Write the window back if dirty. A write landing inside the first FAT
    /// copy is mirrored to the second copy; the mirror write is best-effort
    /// redundancy and its failure is ignored.
    pub(crate) async fn sync_window(&mut self) -> Result<(), Error> {
        if !self.wflag {
            return Ok(());
        }
        trace!("sync_window: sector={}", self.winsect.0);
        self.disk
            .write(&self.win, self.winsect)
            .await
            .map_err(|_| Error::Disk)?;
        if self.n_fats == 2
            && self.winsect >= self.fatbase
            && (self.winsect - self.fatbase).0 < self.fsize
        {
            let mirror = self.winsect + BlockCount(self.fsize);
            if self.disk.write(&self.win, mirror).await.is_err() {
                warn!("sync_window: mirror write failed at {}", mirror.0);
            }
        }
        self.wflag = false;
        Ok(())
    }

    pub(crate) fn invalidate_window(&mut self) {
        self.wflag = false;
        self.winsect = BlockIdx::INVALID;
    }

    /// Flush the window, then rewrite the FSInfo sector if the allocator
    /// hints changed since the last sync.
    pub(crate) async fn sync_volume(&mut self) -> Result<(), Error> {
        self.sync_window().await?;
        if self.fstype == Some(FatType::Fat32) && self.fsi_enabled && self.fsi_dirty {
            trace!(
                "sync_volume: fsinfo free={} last={}",
                self.free_clst,
                self.last_clst
            );
            write_info_sector(&mut self.win, self.free_clst, self.last_clst);
            self.winsect = self.volbase + BlockCount(1);
            if self.disk.write(&self.win, self.winsect).await.is_err() {
                warn!("sync_volume: fsinfo write failed");
            }
            self.fsi_dirty = false;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Geometry helpers.
    // ------------------------------------------------------------------

    /// Sector-size divide and modulus, each a single bitwise operation.
    #[inline]
    pub(crate) fn div_ss(&self, n: u32) -> u32 {
        self.disk.blk.idx(n)
    }

    #[inline]
    pub(crate) fn mod_ss(&self, n: u32) -> u32 {
        self.disk.blk.off(n)
    }

    /// The first sector of a data cluster, or `None` if the cluster number
    /// is out of range.
    pub(crate) fn clst2sect(&self, clst: u32) -> Option<BlockIdx> {
        let c = clst.wrapping_sub(2);
        if c >= self.n_fatent.wrapping_sub(2) {
            return None;
        }
        Some(self.database + BlockCount(c * u32::from(self.csize)))
    }

    /// Load the starting cluster out of a 32-byte directory entry.
    pub(crate) fn ld_clust(&self, entry: &[u8]) -> u32 {
        let ft = self.fstype.unwrap_or(FatType::Fat32);
        OnDiskDirEntry::new(entry).first_cluster(ft)
    }

    // ------------------------------------------------------------------
    // FAT chain engine.
    //
    // FAT entry reads and the allocator speak the cluster-number protocol
    // of the on-disk format itself: 0 is free, 1 flags an internal error,
    // 0xFFFF_FFFF flags a disk error, anything at or above 0x0FFF_FFF8
    // (masked) ends a chain.
    // ------------------------------------------------------------------

    /// Read the FAT entry for `clst`. Returns the masked 28-bit value, or
    /// 1 for an out-of-range cluster, or 0xFFFF_FFFF on disk error.
    pub(crate) async fn cluster_get(&mut self, clst: u32) -> u32 {
        if clst < 2 || clst >= self.n_fatent {
            return CLUSTER_INT_ERROR;
        }
        match self.fstype {
            Some(FatType::Fat32) => {
                let sect = self.fatbase + BlockCount(self.div_ss(clst * 4));
                if self.move_window(sect).await.is_err() {
                    warn!("cluster_get: window move failed for cluster {}", clst);
                    return CLUSTER_DISK_ERROR;
                }
                let off = self.mod_ss(clst * 4) as usize;
                LittleEndian::read_u32(&self.win[off..]) & MASK_28BITS
            }
            // FAT12/FAT16 chains are not serviced.
            _ => CLUSTER_INT_ERROR,
        }
    }

    /// Change the FAT entry for `clst`, preserving the 4 reserved top bits
    /// already on disk.
    pub(crate) async fn cluster_put(&mut self, clst: u32, value: u32) -> Result<(), Error> {
        if clst < 2 || clst >= self.n_fatent {
            return Err(Error::Internal);
        }
        match self.fstype {
            Some(FatType::Fat32) => {
                let sect = self.fatbase + BlockCount(self.div_ss(clst * 4));
                self.move_window(sect).await?;
                let off = self.mod_ss(clst * 4) as usize;
                let old = LittleEndian::read_u32(&self.win[off..]);
                let merged = (value & MASK_28BITS) | (old & !MASK_28BITS);
                LittleEndian::write_u32(&mut self.win[off..off + 4], merged);
                self.wflag = true;
                Ok(())
            }
            _ => Err(Error::Unsupported),
        }
    }

    /// Stretch the chain ending at `clst`, or start a fresh chain when
    /// `clst` is zero.
    ///
    /// Returns the new (or already-linked next) cluster number, 0 when no
    /// free cluster exists, 1 on an internal inconsistency, or 0xFFFF_FFFF
    /// on disk error. Allocation prefers the cluster following the chain
    /// tail so files stay contiguous, falling back to a modular scan from
    /// the last-allocated hint.
    pub(crate) async fn create_chain(&mut self, clst: u32) -> u32 {
        trace!("create_chain: clst={}", clst);
        let mut scl;
        if clst == 0 {
            scl = self.last_clst;
            if scl == 0 || scl >= self.n_fatent {
                scl = 1;
            }
        } else {
            let cs = self.cluster_get(clst).await;
            if cs < 2 {
                warn!("create_chain: chain tail {} reads free/invalid", clst);
                return CLUSTER_INT_ERROR;
            }
            if cs == CLUSTER_DISK_ERROR || cs < self.n_fatent {
                // Disk error, or the tail is already followed by a next
                // cluster: hand it back unchanged.
                return cs;
            }
            scl = clst;
        }
        if self.free_clst == 0 {
            return 0;
        }

        let mut ncl = 0u32;
        if scl == clst {
            // Stretching: probe the neighbouring cluster first.
            ncl = scl + 1;
            if ncl >= self.n_fatent {
                ncl = 2;
            }
            let cs = self.cluster_get(ncl).await;
            if cs == CLUSTER_INT_ERROR || cs == CLUSTER_DISK_ERROR {
                return cs;
            }
            if cs != 0 {
                // Neighbour taken; restart the scan at the hint.
                let hint = self.last_clst;
                if hint >= 2 && hint < self.n_fatent {
                    scl = hint;
                }
                ncl = 0;
            }
        }
        if ncl == 0 {
            // Scan for a free slot, wrapping at the end of the FAT.
            ncl = scl;
            loop {
                ncl += 1;
                if ncl >= self.n_fatent {
                    ncl = 2;
                    if ncl > scl {
                        return 0;
                    }
                }
                let cs = self.cluster_get(ncl).await;
                if cs == 0 {
                    break;
                }
                if cs == CLUSTER_INT_ERROR || cs == CLUSTER_DISK_ERROR {
                    return cs;
                }
                if ncl == scl {
                    return 0;
                }
            }
        }

        let mut result = self.cluster_put(ncl, 0xFFFF_FFFF).await;
        if result.is_ok() && clst != 0 {
            result = self.cluster_put(clst, ncl).await;
        }
        match result {
            Ok(()) => {
                self.last_clst = ncl;
                if self.free_clst <= self.n_fatent - 2 {
                    self.free_clst -= 1;
                }
                self.fsi_dirty = true;
                ncl
            }
            Err(Error::Disk) => CLUSTER_DISK_ERROR,
            Err(_) => CLUSTER_INT_ERROR,
        }
    }

    /// Free the chain starting at `clst`. When `pclst` is nonzero the chain
    /// is being cut, so `pclst` becomes the new end-of-chain first.
    pub(crate) async fn remove_chain(&mut self, clst: u32, pclst: u32) -> Result<(), Error> {
        trace!("remove_chain: clst={} pclst={}", clst, pclst);
        if clst < 2 || clst >= self.n_fatent {
            return Err(Error::Internal);
        }
        if pclst != 0 {
            self.cluster_put(pclst, 0xFFFF_FFFF).await?;
        }
        let mut clst = clst;
        while clst < self.n_fatent {
            let nxt = self.cluster_get(clst).await;
            if nxt == 0 {
                break;
            }
            if nxt == CLUSTER_INT_ERROR {
                return Err(Error::Internal);
            }
            if nxt == CLUSTER_DISK_ERROR {
                return Err(Error::Disk);
            }
            self.cluster_put(clst, 0).await?;
            if self.free_clst < self.n_fatent - 2 {
                self.free_clst += 1;
                self.fsi_dirty = true;
            }
            clst = nxt;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mount path.
    // ------------------------------------------------------------------

    /// Probe `sect` for a volume boot record.
    pub(crate) async fn check_fs(&mut self, sect: BlockIdx) -> BootSector {
        trace!("check_fs: sector={}", sect.0);
        self.invalidate_window();
        if self.move_window(sect).await.is_err() {
            return BootSector::DiskError;
        }
        let signature_ok = LittleEndian::read_u16(&self.win[510..]) == Bpb::FOOTER_VALUE;
        if signature_ok && &self.win[0..11] == b"\xEBv\x90EXFAT   " {
            return BootSector::ExFat;
        }
        let jump = self.win[0];
        if jump != 0xEB && jump != 0xE9 && jump != 0xE8 {
            return if signature_ok {
                BootSector::NotFatValid
            } else {
                BootSector::NotFatInvalid
            };
        }
        if signature_ok && &self.win[82..90] == b"FAT32   " {
            return BootSector::Fat;
        }
        BootSector::NotFatInvalid
    }

    /// Find a FAT volume: try sector 0 as an unpartitioned volume first,
    /// detect a GPT protective MBR, then scan the four MBR partition table
    /// entries and take the first that probes as FAT.
    pub(crate) async fn find_volume(&mut self) -> BootSector {
        let status = self.check_fs(BlockIdx(0)).await;
        if status != BootSector::NotFatValid {
            return status;
        }
        if self.win[MBR_TABLE + 4] == 0xEE {
            return self.find_gpt_volume();
        }
        let mut partitions = [0u32; 4];
        for (i, lba) in partitions.iter_mut().enumerate() {
            let off = MBR_TABLE + MBR_ENTRY_LEN * i + MBR_ENTRY_LBA;
            *lba = LittleEndian::read_u32(&self.win[off..]);
        }
        let mut status = BootSector::NotFatInvalid;
        for lba in partitions {
            status = if lba > 0 {
                self.check_fs(BlockIdx(lba)).await
            } else {
                BootSector::NotFatInvalid
            };
            if matches!(status, BootSector::Fat | BootSector::ExFat) {
                break;
            }
        }
        status
    }

    /// GUID Partition Table disks are detected but not parsed.
    fn find_gpt_volume(&mut self) -> BootSector {
        debug!("find_volume: GPT protective MBR detected, unsupported");
        BootSector::NotFatInvalid
    }

    /// Parse the BPB held in the window and initialise the volume geometry.
    /// The window still holds the probed boot sector on entry.
    pub(crate) async fn init_fat(&mut self, ssize: u16) -> Result<(), Error> {
        let base = self.winsect;
        let bpb = Bpb::new(&self.win);

        if bpb.bytes_per_sector() != ssize {
            return Err(Error::InvalidParameter);
        }
        let fat_sectors = bpb.fat_size();
        self.fsize = fat_sectors;
        self.n_fats = bpb.num_fats();
        if self.n_fats != 1 && self.n_fats != 2 {
            return Err(Error::NoFilesystem);
        }
        let total_fat_sectors = fat_sectors * u32::from(self.n_fats);
        self.csize = u16::from(bpb.sectors_per_cluster());
        if self.csize == 0 || !self.csize.is_power_of_two() {
            return Err(Error::NoFilesystem);
        }
        self.n_rootdir = bpb.root_entries_count();
        if self.n_rootdir % (ssize / 32) != 0 {
            return Err(Error::NoFilesystem);
        }
        let total_sectors = bpb.total_sectors();
        let reserved_sectors = bpb.reserved_sector_count();
        if reserved_sectors == 0 {
            return Err(Error::NoFilesystem);
        }

        // RSV + FAT + static root directory: everything ahead of the data
        // area.
        let system_sectors = u32::from(reserved_sectors)
            + total_fat_sectors
            + u32::from(self.n_rootdir) / (u32::from(ssize) / DIR_ENTRY_LEN_U32);
        if total_sectors < system_sectors {
            return Err(Error::NoFilesystem);
        }
        let total_clusters = (total_sectors - system_sectors) / u32::from(self.csize);
        if total_clusters == 0 {
            return Err(Error::NoFilesystem);
        }
        let fmt = match total_clusters {
            c if c > CLUST_MAX_FAT32 => return Err(Error::NoFilesystem),
            c if c > CLUST_MAX_FAT16 => FatType::Fat32,
            c if c > CLUST_MAX_FAT12 => FatType::Fat16,
            _ => FatType::Fat12,
        };

        self.n_fatent = total_clusters + 2;
        self.volbase = base;
        self.fatbase = base + BlockCount(u32::from(reserved_sectors));
        self.database = base + BlockCount(system_sectors);
        let needed_fat_bytes;
        if fmt == FatType::Fat32 {
            if bpb.fs_version() != 0 {
                return Err(Error::NoFilesystem);
            }
            if self.n_rootdir != 0 {
                return Err(Error::NoFilesystem);
            }
            self.dirbase = bpb.root_cluster();
            needed_fat_bytes = self.n_fatent * 4;
        } else {
            if self.n_rootdir == 0 {
                return Err(Error::NoFilesystem);
            }
            self.dirbase = (self.fatbase + BlockCount(total_fat_sectors)).0;
            needed_fat_bytes = match fmt {
                FatType::Fat16 => self.n_fatent * 2,
                _ => self.n_fatent * 3 / 2 + (self.n_fatent & 1),
            };
        }
        let needed_fat_sectors = needed_fat_bytes.div_ceil(u32::from(ssize));
        if self.fsize < needed_fat_sectors {
            // Some formatters produce a FAT shorter than the cluster count
            // implies; such volumes mount and read correctly, so this stays
            // a warning.
            warn!(
                "init_fat: FAT spans {} sectors, geometry implies {}",
                self.fsize, needed_fat_sectors
            );
        }

        self.last_clst = 0xFFFF_FFFF;
        self.free_clst = 0xFFFF_FFFF;
        self.fsi_enabled = false;
        self.fsi_dirty = false;

        if fmt == FatType::Fat32 && bpb.fs_info_sector() == 1 {
            let fsinfo_sector = base + BlockCount(1);
            if self.move_window(fsinfo_sector).await.is_ok() {
                self.fsi_enabled = true;
                let info = InfoSector::new(&self.win);
                if info.is_valid() {
                    self.free_clst = info.free_count();
                    self.last_clst = info.next_free();
                }
            }
        }
        debug!(
            "init_fat: type={:?} csize={} n_fatent={} fatbase={} dirbase={} database={}",
            fmt, self.csize, self.n_fatent, self.fatbase.0, self.dirbase, self.database.0
        );
        self.fstype = Some(fmt);
        self.id = self.id.wrapping_add(1);
        Ok(())
    }

    /// Zero-fill the cluster `clst` on disk and leave the window holding
    /// its (zeroed, dirty) first sector.
    pub(crate) async fn dir_clear(&mut self, clst: u32) -> Result<(), Error> {
        trace!("dir_clear: clst={}", clst);
        self.sync_window().await.map_err(|_| Error::Disk)?;
        let sect = self.clst2sect(clst).ok_or(Error::Internal)?;
        self.winsect = sect;
        self.win.fill(0);
        self.wflag = true;
        if self
            .disk
            .erase(sect, u32::from(self.csize))
            .await
            .is_err()
        {
            warn!("dir_clear: erase failed at {}", sect.0);
            return Err(Error::Disk);
        }
        Ok(())
    }
}

// Keep the window maths honest: the window buffer is exactly one sector.
const _: () = assert!(SECTOR_LEN == 512);
