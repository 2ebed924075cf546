//! The mounted-volume object and its host-facing surface.

use byteorder::{ByteOrder, LittleEndian};

use crate::blockdevice::{BlockCount, BlockDevice, BlockIdx, BlockIndexer, DeviceMode, Disk};
use crate::codepage::{self, CodepageTables};
use crate::fat::direntry::{
    store_cluster, DIR_ATTR, DIR_CRT_TIME, DIR_CRT_TIME10, DIR_FILE_SIZE, DIR_LST_ACC_DATE,
    DIR_MOD_TIME,
};
use crate::fat::volume::BootSector;
use crate::fat::{FatType, CLUSTER_DISK_ERROR};
use crate::filesystem::attributes::Attributes;
use crate::filesystem::filename::{NameStatus, ShortName};
use crate::filesystem::files::{File, FileFlags, Mode};
use crate::filesystem::info::FileInfo;
use crate::filesystem::timestamp::TimeSource;
use crate::filesystem::MAX_FILE_SIZE;
use crate::{Error, SECTOR_LEN};

/// Length of the long-filename working buffer, in UTF-16 code units
/// (255 name units plus a terminator).
pub(crate) const LFN_BUF_LEN: usize = 256;

/// A FAT volume driver bound to one block device.
///
/// The object owns the device, the shared sector window and the long-name
/// working buffer. It is single-owner: the host serializes all calls on a
/// mounted volume. Files and directory walkers do not borrow the volume;
/// they carry the mount generation instead and every operation validates it,
/// so handles from an earlier mount fail with [`Error::InvalidObject`].
pub struct FatFs<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    pub(crate) disk: Disk<D>,
    time_source: T,
    pub(crate) fstype: Option<FatType>,
    pub(crate) n_fats: u8,
    /// Entry count of the static FAT12/16 root directory.
    pub(crate) n_rootdir: u16,
    /// Cluster size in sectors.
    pub(crate) csize: u16,
    /// Sector size in bytes.
    pub(crate) ssize: u16,
    /// Long filename working buffer, shared by all directory operations.
    pub(crate) lfn_buf: [u16; LFN_BUF_LEN],
    /// Last allocated cluster hint, 0xFFFF_FFFF when unknown.
    pub(crate) last_clst: u32,
    /// Free cluster count hint, 0xFFFF_FFFF when unknown.
    pub(crate) free_clst: u32,
    /// Whether the volume carries an FSInfo sector worth updating.
    pub(crate) fsi_enabled: bool,
    /// Whether the allocator hints changed since the last FSInfo write.
    pub(crate) fsi_dirty: bool,
    /// Number of FAT entries (clusters + 2).
    pub(crate) n_fatent: u32,
    /// Sectors per FAT copy.
    pub(crate) fsize: u32,
    pub(crate) volbase: BlockIdx,
    pub(crate) fatbase: BlockIdx,
    /// Root directory start: a cluster number on FAT32, an absolute sector
    /// on FAT12/16.
    pub(crate) dirbase: u32,
    pub(crate) database: BlockIdx,
    /// The volume access window.
    pub(crate) win: [u8; SECTOR_LEN],
    pub(crate) winsect: BlockIdx,
    pub(crate) wflag: bool,
    /// Mount generation, bumped on every mount to invalidate old handles.
    pub(crate) id: u16,
    pub(crate) codepage: Option<&'static CodepageTables>,
    pub(crate) dbc_ranges: [u8; 10],
}

/// An open directory on a mounted volume.
///
/// Like [`File`], a `Dir` carries the mount generation instead of borrowing
/// the volume; it is invalidated implicitly by a remount.
pub struct Dir {
    pub(crate) id: u16,
    pub(crate) attr: u8,
    /// Start cluster of the table (0 = root).
    pub(crate) sclust: u32,
    /// Current byte offset within the directory stream.
    pub(crate) dptr: u32,
    /// Cluster holding the current entry.
    pub(crate) clust: u32,
    /// Sector holding the current entry; zero once the walk terminated.
    pub(crate) sect: BlockIdx,
    /// Short-name scratch for lookups and registration.
    pub(crate) sfn: ShortName,
    /// Stream offset of the long-name group preceding the current entry,
    /// 0xFFFF_FFFF when there is none.
    pub(crate) blk_ofs: u32,
}

impl Dir {
    pub(crate) fn new() -> Dir {
        Dir {
            id: 0,
            attr: 0,
            sclust: 0,
            dptr: 0,
            clust: 0,
            sect: BlockIdx(0),
            sfn: ShortName::blank(),
            blk_ofs: 0xFFFF_FFFF,
        }
    }
}

impl<D, T> FatFs<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    /// Wrap a block device and a time source into an unmounted volume
    /// driver. Nothing touches the device until [`FatFs::mount`].
    pub fn new(device: D, time_source: T) -> FatFs<D, T> {
        FatFs {
            disk: Disk {
                device,
                blk: BlockIndexer::DEFAULT,
                perm: Mode::empty(),
            },
            time_source,
            fstype: None,
            n_fats: 0,
            n_rootdir: 0,
            csize: 0,
            ssize: 0,
            lfn_buf: [0; LFN_BUF_LEN],
            last_clst: 0xFFFF_FFFF,
            free_clst: 0xFFFF_FFFF,
            fsi_enabled: false,
            fsi_dirty: false,
            n_fatent: 0,
            fsize: 0,
            volbase: BlockIdx(0),
            fatbase: BlockIdx(0),
            dirbase: 0,
            database: BlockIdx(0),
            win: [0; SECTOR_LEN],
            winsect: BlockIdx::INVALID,
            wflag: false,
            id: 0,
            codepage: None,
            dbc_ranges: codepage::DEFAULT_DBC_RANGES,
        }
    }

    /// Temporarily get access to the underlying block device.
    pub fn device(&mut self) -> &mut D {
        &mut self.disk.device
    }

    /// Consume the driver and hand back the device and time source.
    pub fn free(self) -> (D, T) {
        (self.disk.device, self.time_source)
    }

    /// Configure the OEM codepage hook used for short-name conversion.
    /// Takes effect for subsequent directory operations.
    pub fn set_codepage(&mut self, tables: &'static CodepageTables) {
        self.dbc_ranges = tables.dbc_ranges;
        self.codepage = Some(tables);
    }

    /// The subtype of the mounted volume, if any.
    pub fn fat_type(&self) -> Option<FatType> {
        self.fstype
    }

    /// The free-cluster count hint, when known. Advisory only.
    pub fn free_cluster_hint(&self) -> Option<u32> {
        match self.free_clst {
            0xFFFF_FFFF => None,
            n => Some(n),
        }
    }

    /// Mount the FAT volume on the device.
    ///
    /// Probes sector 0 directly, then the MBR partition table, and parses
    /// the BPB of the first FAT volume found. Remounting is allowed and
    /// bumps the mount generation, invalidating every open file and
    /// directory. `mode` grants read and/or write access for the lifetime
    /// of the mount.
    pub async fn mount(&mut self, sector_size: u16, mode: Mode) -> Result<(), Error> {
        debug!("mount: sector_size={} mode={}", sector_size, mode.bits());
        if !(Mode::READ | Mode::WRITE).contains(mode) {
            return Err(Error::InvalidMode);
        }
        match self.disk.device.mode() {
            DeviceMode::NoAccess => return Err(Error::NotReady),
            DeviceMode::ReadOnly if mode.contains(Mode::WRITE) => {
                return Err(Error::WriteProtected)
            }
            _ => {}
        }
        // The window and the per-file caches are statically sized.
        if usize::from(sector_size) != SECTOR_LEN
            || self.disk.device.block_size() != usize::from(sector_size)
        {
            return Err(Error::InvalidParameter);
        }
        self.disk.blk = BlockIndexer::new(usize::from(sector_size))?;
        self.fstype = None;
        self.id = self.id.wrapping_add(1);
        self.ssize = sector_size;
        self.disk.perm = mode & Mode::RW;
        self.invalidate_window();

        match self.find_volume().await {
            BootSector::Fat => self.init_fat(sector_size).await,
            BootSector::ExFat => Err(Error::Unsupported),
            BootSector::DiskError => Err(Error::Disk),
            BootSector::NotFatValid | BootSector::NotFatInvalid => Err(Error::NoFilesystem),
        }
    }

    pub(crate) fn check_mounted(&self) -> Result<FatType, Error> {
        self.fstype.ok_or(Error::NotEnabled)
    }

    fn validate_file(&self, file: &File) -> Result<(), Error> {
        if !file.attached || file.id != self.id {
            return Err(Error::InvalidObject);
        }
        Ok(())
    }

    fn validate_dir(&self, dir: &Dir) -> Result<(), Error> {
        if dir.id != self.id {
            return Err(Error::InvalidObject);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Files.
    // ------------------------------------------------------------------

    /// Open or create the file at the absolute `path`.
    ///
    /// Paths use `/` or `\` separators and may not contain `.` or `..`
    /// components. With no creation bit set the file must exist; see
    /// [`Mode`] for the creation variants.
    pub async fn open_file(&mut self, path: &str, mode: Mode) -> Result<File, Error> {
        trace!("open_file: mode={}", mode.bits());
        self.check_mounted()?;
        if !Mode::ALLOWED.contains(mode) {
            return Err(Error::InvalidMode);
        }
        if !self.disk.perm.contains(mode & Mode::RW) {
            return Err(Error::ForbiddenMode);
        }
        if self.disk.perm.is_empty() {
            return Err(Error::Denied);
        }

        let mut flags = FileFlags::from(mode);
        let mut dj = Dir::new();
        let mut lookup = self.follow_path(&mut dj, path).await;
        if lookup.is_ok() && dj.sfn.status.contains(NameStatus::NO_NAME) {
            // The path named the origin directory itself.
            lookup = Err(Error::InvalidName);
        }

        if mode.intersects(Mode::CREATE_ALWAYS | Mode::OPEN_ALWAYS | Mode::CREATE_NEW) {
            match lookup {
                Err(Error::NoFile) => {
                    // Creating a file that does not exist yet.
                    self.dir_register(&mut dj).await?;
                    flags.insert(FileFlags::CREATE_ALWAYS);
                    lookup = Ok(());
                }
                Err(e) => return Err(e),
                Ok(()) => {
                    if dj.attr & (Attributes::READ_ONLY | Attributes::DIRECTORY) != 0 {
                        return Err(Error::Denied);
                    }
                    if mode.contains(Mode::CREATE_NEW) {
                        return Err(Error::Exists);
                    }
                }
            }
            if flags.contains(FileFlags::CREATE_ALWAYS) {
                // Truncate: reset the entry and release the old chain,
                // remembering the window position to restore afterwards.
                let ts = self.time_source.get_timestamp();
                let tm = ts.fat_datetime();
                let off = self.mod_ss(dj.dptr) as usize;
                let cl = self.ld_clust(&self.win[off..]);
                let ft = self.fstype.unwrap_or(FatType::Fat32);
                let entry = &mut self.win[off..off + 32];
                entry[DIR_CRT_TIME10] = ts.fat_fine();
                LittleEndian::write_u32(&mut entry[DIR_CRT_TIME..DIR_CRT_TIME + 4], tm);
                LittleEndian::write_u32(&mut entry[DIR_MOD_TIME..DIR_MOD_TIME + 4], tm);
                entry[DIR_ATTR] = Attributes::ARCHIVE;
                LittleEndian::write_u32(&mut entry[DIR_FILE_SIZE..DIR_FILE_SIZE + 4], 0);
                store_cluster(entry, ft, 0);
                self.wflag = true;
                if cl != 0 {
                    let sc = self.winsect;
                    self.remove_chain(cl, 0).await?;
                    self.move_window(sc).await?;
                    // Reuse the hole the released chain left behind.
                    self.last_clst = cl - 1;
                }
            }
        } else {
            lookup?;
            if dj.attr & Attributes::DIRECTORY != 0 {
                return Err(Error::NoFile);
            }
            if mode.contains(Mode::WRITE) && dj.attr & Attributes::READ_ONLY != 0 {
                return Err(Error::Denied);
            }
        }
        debug_assert!(lookup.is_ok());

        if flags.contains(FileFlags::CREATE_ALWAYS) {
            flags.insert(FileFlags::MODIFIED);
        }
        let off = self.mod_ss(dj.dptr) as usize;
        let mut file = File {
            id: self.id,
            attr: dj.attr,
            sclust: self.ld_clust(&self.win[off..]),
            objsize: LittleEndian::read_u32(&self.win[off + DIR_FILE_SIZE..]),
            flags,
            err: None,
            fptr: 0,
            clust: 0,
            sect: BlockIdx(0),
            dir_sect: self.winsect,
            dir_off: off,
            attached: true,
            buf: [0; SECTOR_LEN],
        };

        if flags.contains(FileFlags::SEEK_END) && file.objsize > 0 {
            // Walk the chain to end of file and prime the sector cache.
            file.fptr = file.objsize;
            let bcs = u32::from(self.csize) * u32::from(self.ssize);
            let mut clst = file.sclust;
            let mut ofs = file.objsize;
            while ofs > bcs {
                clst = self.cluster_get(clst).await;
                if clst <= 1 {
                    return Err(Error::Internal);
                }
                if clst == CLUSTER_DISK_ERROR {
                    return Err(Error::Disk);
                }
                ofs -= bcs;
            }
            file.clust = clst;
            if self.mod_ss(ofs) != 0 {
                let sc = self.clst2sect(clst).ok_or(Error::Internal)?;
                file.sect = sc + BlockCount(self.div_ss(ofs));
                self.disk
                    .read(&mut file.buf, file.sect)
                    .await
                    .map_err(|_| Error::Disk)?;
            }
        }
        Ok(file)
    }

    /// Read up to `buf.len()` bytes from the file at its current pointer.
    /// Returns the number of bytes read; zero means end of file.
    pub async fn read(&mut self, file: &mut File, buf: &mut [u8]) -> Result<usize, Error> {
        self.check_mounted()?;
        self.validate_file(file)?;
        if let Some(err) = file.err {
            return Err(err);
        }
        if !file.flags.contains(FileFlags::READ) || !self.disk.perm.contains(Mode::READ) {
            return Err(Error::Denied);
        }
        let ss = u32::from(self.ssize);
        let cs = u32::from(self.csize);
        let remain = file.objsize.saturating_sub(file.fptr);
        let btr = core::cmp::min(buf.len() as u64, u64::from(remain)) as u32;
        let mut br: u32 = 0;
        while br < btr {
            if self.mod_ss(file.fptr) == 0 {
                // Sector boundary; maybe a cluster boundary too.
                let csect = self.div_ss(file.fptr) & (cs - 1);
                if csect == 0 {
                    let clst = if file.fptr == 0 {
                        file.sclust
                    } else {
                        self.cluster_get(file.clust).await
                    };
                    if clst < 2 {
                        return Err(file.abort(Error::Internal));
                    }
                    if clst == CLUSTER_DISK_ERROR {
                        return Err(file.abort(Error::Disk));
                    }
                    file.clust = clst;
                }
                let sect = match self.clst2sect(file.clust) {
                    Some(s) => s + BlockCount(csect),
                    None => return Err(file.abort(Error::Internal)),
                };
                let cc = (btr - br) / ss;
                if cc > 0 {
                    // Bulk path: read whole sectors straight into the
                    // caller's buffer, clipped at the cluster boundary.
                    let cc = cc.min(cs - csect);
                    let start = br as usize;
                    let len = (cc * ss) as usize;
                    if self.disk.read(&mut buf[start..start + len], sect).await.is_err() {
                        return Err(file.abort(Error::Disk));
                    }
                    // The cache may hold newer data for one of the sectors
                    // just read.
                    if file.flags.contains(FileFlags::DIRTY)
                        && file.sect >= sect
                        && (file.sect - sect).0 < cc
                    {
                        let patch = ((file.sect - sect).0 * ss) as usize;
                        buf[start + patch..start + patch + ss as usize]
                            .copy_from_slice(&file.buf);
                    }
                    br += cc * ss;
                    file.fptr += cc * ss;
                    continue;
                }
                if file.flags.contains(FileFlags::DIRTY) {
                    if self.disk.write(&file.buf, file.sect).await.is_err() {
                        return Err(file.abort(Error::Disk));
                    }
                    file.flags.remove(FileFlags::DIRTY);
                }
                if self.disk.read(&mut file.buf, sect).await.is_err() {
                    return Err(file.abort(Error::Disk));
                }
                file.sect = sect;
            }
            let off = self.mod_ss(file.fptr) as usize;
            let rcnt = core::cmp::min(ss as usize - off, (btr - br) as usize);
            buf[br as usize..br as usize + rcnt].copy_from_slice(&file.buf[off..off + rcnt]);
            br += rcnt as u32;
            file.fptr += rcnt as u32;
        }
        Ok(br as usize)
    }

    /// Write `buf` to the file at its current pointer, growing the file and
    /// allocating clusters as needed.
    ///
    /// Returns the number of bytes written; a short count means the volume
    /// ran out of free clusters. The write is clipped so the file never
    /// exceeds the 4 GiB FAT limit.
    pub async fn write(&mut self, file: &mut File, buf: &[u8]) -> Result<usize, Error> {
        self.check_mounted()?;
        self.validate_file(file)?;
        if let Some(err) = file.err {
            return Err(err);
        }
        if !file.flags.contains(FileFlags::WRITE) || !self.disk.perm.contains(Mode::WRITE) {
            return Err(Error::WriteProtected);
        }
        let ss = u32::from(self.ssize);
        let cs = u32::from(self.csize);
        let btw = core::cmp::min(
            buf.len() as u64,
            u64::from(MAX_FILE_SIZE) - u64::from(file.fptr),
        ) as u32;
        let mut bw: u32 = 0;
        'outer: while bw < btw {
            if self.mod_ss(file.fptr) == 0 {
                let csect = self.div_ss(file.fptr) & (cs - 1);
                if csect == 0 {
                    // Cluster boundary: follow or grow the chain.
                    let clst = if file.fptr == 0 {
                        if file.sclust == 0 {
                            self.create_chain(0).await
                        } else {
                            file.sclust
                        }
                    } else {
                        self.create_chain(file.clust).await
                    };
                    match clst {
                        0 => break 'outer, // volume full: short write
                        1 => return Err(file.abort(Error::Internal)),
                        CLUSTER_DISK_ERROR => return Err(file.abort(Error::Disk)),
                        _ => {}
                    }
                    file.clust = clst;
                    if file.sclust == 0 {
                        file.sclust = clst;
                    }
                }
                if file.flags.contains(FileFlags::DIRTY) {
                    if self.disk.write(&file.buf, file.sect).await.is_err() {
                        return Err(file.abort(Error::Disk));
                    }
                    file.flags.remove(FileFlags::DIRTY);
                }
                let sect = match self.clst2sect(file.clust) {
                    Some(s) => s + BlockCount(csect),
                    None => return Err(file.abort(Error::Internal)),
                };
                let cc = (btw - bw) / ss;
                if cc > 0 {
                    // Bulk path: write whole sectors from the caller's
                    // buffer, clipped at the cluster boundary.
                    let cc = cc.min(cs - csect);
                    let start = bw as usize;
                    let len = (cc * ss) as usize;
                    if self.disk.write(&buf[start..start + len], sect).await.is_err() {
                        return Err(file.abort(Error::Disk));
                    }
                    if file.sect >= sect && (file.sect - sect).0 < cc {
                        // Refill the cache from the data that just
                        // overwrote its sector.
                        let patch = ((file.sect - sect).0 * ss) as usize;
                        file.buf
                            .copy_from_slice(&buf[start + patch..start + patch + ss as usize]);
                        file.flags.remove(FileFlags::DIRTY);
                    }
                    bw += cc * ss;
                    file.fptr += cc * ss;
                    file.objsize = file.objsize.max(file.fptr);
                    continue;
                }
                if file.sect != sect && file.fptr < file.objsize {
                    // Fill the cache with the existing sector contents
                    // before a partial overwrite.
                    if self.disk.read(&mut file.buf, sect).await.is_err() {
                        return Err(file.abort(Error::Disk));
                    }
                }
                file.sect = sect;
            }
            let off = self.mod_ss(file.fptr) as usize;
            let wcnt = core::cmp::min(ss as usize - off, (btw - bw) as usize);
            file.buf[off..off + wcnt].copy_from_slice(&buf[bw as usize..bw as usize + wcnt]);
            file.flags.insert(FileFlags::DIRTY);
            bw += wcnt as u32;
            file.fptr += wcnt as u32;
            file.objsize = file.objsize.max(file.fptr);
        }
        file.flags.insert(FileFlags::MODIFIED);
        Ok(bw as usize)
    }

    /// Flush the file's cached data and persist its size, chain start and
    /// timestamp into the directory entry, then sync the volume (window and
    /// FSInfo).
    pub async fn sync_file(&mut self, file: &mut File) -> Result<(), Error> {
        self.check_mounted()?;
        self.validate_file(file)?;
        if !file.flags.contains(FileFlags::MODIFIED) {
            return Ok(());
        }
        trace!("sync_file: sclust={} objsize={}", file.sclust, file.objsize);
        if file.flags.contains(FileFlags::DIRTY) {
            self.disk
                .write(&file.buf, file.sect)
                .await
                .map_err(|_| Error::Disk)?;
            file.flags.remove(FileFlags::DIRTY);
        }
        let tm = self.time_source.get_timestamp().fat_datetime();
        self.move_window(file.dir_sect).await?;
        let ft = self.fstype.unwrap_or(FatType::Fat32);
        let entry = &mut self.win[file.dir_off..file.dir_off + 32];
        entry[DIR_ATTR] |= Attributes::ARCHIVE;
        store_cluster(entry, ft, file.sclust);
        LittleEndian::write_u32(&mut entry[DIR_FILE_SIZE..DIR_FILE_SIZE + 4], file.objsize);
        LittleEndian::write_u32(&mut entry[DIR_MOD_TIME..DIR_MOD_TIME + 4], tm);
        LittleEndian::write_u16(&mut entry[DIR_LST_ACC_DATE..DIR_LST_ACC_DATE + 2], 0);
        self.wflag = true;
        self.sync_volume().await?;
        file.flags.remove(FileFlags::MODIFIED);
        Ok(())
    }

    /// Sync the file, then detach it. A detached file fails every further
    /// operation with [`Error::InvalidObject`].
    pub async fn close_file(&mut self, file: &mut File) -> Result<(), Error> {
        self.validate_file(file)?;
        self.sync_file(file).await?;
        file.attached = false;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Directories.
    // ------------------------------------------------------------------

    /// Open the directory at the absolute `path`. `/` opens the root.
    pub async fn open_dir(&mut self, path: &str) -> Result<Dir, Error> {
        self.check_mounted()?;
        let mut dp = Dir::new();
        match self.follow_path(&mut dp, path).await {
            Ok(()) => {}
            Err(Error::NoFile) => return Err(Error::NoPath),
            Err(e) => return Err(e),
        }
        if !dp.sfn.status.contains(NameStatus::NO_NAME) {
            if dp.attr & Attributes::DIRECTORY == 0 {
                return Err(Error::NoPath);
            }
            let off = self.mod_ss(dp.dptr) as usize;
            dp.sclust = self.ld_clust(&self.win[off..]);
        }
        dp.id = self.id;
        match self.dir_sdi(&mut dp, 0).await {
            Ok(()) => {}
            Err(Error::NoFile) => return Err(Error::NoPath),
            Err(e) => return Err(e),
        }
        Ok(dp)
    }

    /// Call `callback` for every file and subdirectory entry in `dir`,
    /// rewinding first. Volume labels, deleted entries and dot entries are
    /// skipped. An error returned by the callback stops the walk and is
    /// handed back.
    pub async fn for_each_file<F>(&mut self, dir: &mut Dir, mut callback: F) -> Result<(), Error>
    where
        F: FnMut(&FileInfo) -> Result<(), Error>,
    {
        self.check_mounted()?;
        self.validate_dir(dir)?;
        if !self.disk.perm.contains(Mode::READ) {
            return Err(Error::ForbiddenMode);
        }
        self.dir_sdi(dir, 0).await?;
        let mut info = FileInfo::empty();
        loop {
            match self.dir_read(dir, false).await {
                Ok(()) => {}
                Err(Error::NoFile) => return Ok(()), // end of table
                Err(e) => return Err(e),
            }
            self.get_fileinfo(dir, &mut info);
            callback(&info)?;
            match self.dir_next(dir, false).await {
                Ok(()) => {}
                Err(Error::NoFile) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}
