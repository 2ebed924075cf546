//! The directory engine: walking, searching, registering and projecting
//! directory entries, plus the absolute-path resolver.
//!
//! All directory I/O goes through the shared volume window. A walker never
//! keeps a pointer into the window; it remembers the stream offset and
//! re-derives the in-window position from it after every window move.

use byteorder::{ByteOrder, LittleEndian};

use crate::blockdevice::{BlockCount, BlockDevice, BlockIdx};
use crate::codepage::{self, oem_to_uni, uni_to_oem};
use crate::fat::direntry::{
    OnDiskDirEntry, DIR_NTRES, LDIR_ATTR, LDIR_CHKSUM, LDIR_FST_CLUS_LO, LDIR_ORD, LDIR_TYPE,
};
use crate::fat::{
    FatType, CLUSTER_DISK_ERROR, DDEM, DIR_ENTRY_LEN, DIR_ENTRY_LEN_U32, LFN_OFFSETS,
    LFN_UNITS_PER_ENTRY, LLEF, MAX_DIR, RDDEM,
};
use crate::filesystem::attributes::Attributes;
use crate::filesystem::filename::{
    generate_numbered_name, is_illegal, is_illegal_sfn, is_lower, is_separator, is_terminator,
    is_upper, sum_sfn, wto_upper, NameStatus, ShortName,
};
use crate::filesystem::info::FileInfo;
use crate::filesystem::timestamp::{TimeSource, Timestamp};
use crate::fs::{Dir, FatFs, LFN_BUF_LEN};
use crate::Error;

/// How many numbered-name attempts are made before giving up on a
/// colliding short name.
const MAX_NAME_COLLISIONS: u32 = 100;

impl<D, T> FatFs<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    /// The in-window byte offset of the walker's current entry.
    #[inline]
    pub(crate) fn entry_off(&self, dp: &Dir) -> usize {
        self.mod_ss(dp.dptr) as usize
    }

    fn lfn_len(&self) -> usize {
        self.lfn_buf
            .iter()
            .position(|&u| u == 0)
            .unwrap_or(self.lfn_buf.len())
    }

    // ------------------------------------------------------------------
    // Walk primitives.
    // ------------------------------------------------------------------

    /// Seek the walker to byte offset `ofs` within the directory stream,
    /// following the cluster chain as needed.
    pub(crate) async fn dir_sdi(&mut self, dp: &mut Dir, ofs: u32) -> Result<(), Error> {
        if ofs >= MAX_DIR {
            return Err(Error::Internal);
        }
        dp.dptr = ofs;
        let mut clst = dp.sclust;
        if clst == 0 && self.fstype == Some(FatType::Fat32) {
            // The FAT32 root directory is an ordinary cluster chain.
            clst = self.dirbase;
        }

        let mut ofs_rem = ofs;
        if clst == 0 {
            // Static FAT12/16 root directory area.
            if ofs / DIR_ENTRY_LEN_U32 >= u32::from(self.n_rootdir) {
                return Err(Error::Internal);
            }
            dp.sect = BlockIdx(self.dirbase);
        } else {
            let bytes_per_cluster = u32::from(self.csize) * u32::from(self.ssize);
            while ofs_rem >= bytes_per_cluster {
                clst = self.cluster_get(clst).await;
                if clst == CLUSTER_DISK_ERROR {
                    return Err(Error::Disk);
                }
                if clst < 2 || clst >= self.n_fatent {
                    return Err(Error::Internal);
                }
                ofs_rem -= bytes_per_cluster;
            }
            dp.sect = self.clst2sect(clst).ok_or(Error::Internal)?;
        }
        dp.clust = clst;
        dp.sect += BlockCount(self.div_ss(ofs_rem));
        Ok(())
    }

    /// Advance the walker one 32-byte entry. At the end of the table,
    /// `stretch` grows the directory by one zeroed cluster; otherwise the
    /// walk terminates with [`Error::NoFile`].
    pub(crate) async fn dir_next(&mut self, dp: &mut Dir, stretch: bool) -> Result<(), Error> {
        let ofs = dp.dptr + DIR_ENTRY_LEN_U32;
        if ofs >= MAX_DIR {
            dp.sect = BlockIdx(0);
        }
        if dp.sect.0 == 0 {
            return Err(Error::NoFile);
        }
        if self.mod_ss(ofs) == 0 {
            // Sector boundary.
            dp.sect = BlockIdx(dp.sect.0 + 1);
            if dp.clust == 0 {
                // Static table.
                if ofs / DIR_ENTRY_LEN_U32 >= u32::from(self.n_rootdir) {
                    dp.sect = BlockIdx(0);
                    return Err(Error::NoFile);
                }
            } else if self.div_ss(ofs) & u32::from(self.csize - 1) == 0 {
                // Cluster boundary.
                let mut clst = self.cluster_get(dp.clust).await;
                if clst <= 1 {
                    return Err(Error::Internal);
                }
                if clst == CLUSTER_DISK_ERROR {
                    return Err(Error::Disk);
                }
                if clst >= self.n_fatent {
                    if !stretch {
                        dp.sect = BlockIdx(0);
                        return Err(Error::NoFile);
                    }
                    // Grow the table by one cluster and wipe it.
                    clst = self.create_chain(dp.clust).await;
                    match clst {
                        0 => return Err(Error::Denied),
                        1 => return Err(Error::Internal),
                        CLUSTER_DISK_ERROR => return Err(Error::Disk),
                        _ => {}
                    }
                    self.dir_clear(clst).await?;
                }
                dp.clust = clst;
                dp.sect = self.clst2sect(clst).ok_or(Error::Internal)?;
            }
        }
        dp.dptr = ofs;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Long-filename entry handling.
    // ------------------------------------------------------------------

    /// Copy the name fragment of the LFN entry at `off` into the working
    /// buffer. Returns false if the entry is malformed.
    fn pick_lfn(&mut self, off: usize) -> bool {
        let entry = OnDiskDirEntry::new(&self.win[off..off + DIR_ENTRY_LEN]);
        if entry.lfn_first_cluster_lo() != 0 {
            return false;
        }
        let last = entry.lfn_is_last();
        let seq = entry.lfn_ordinal() & !LLEF;
        if seq == 0 {
            return false;
        }
        let mut i = usize::from(seq - 1) * LFN_UNITS_PER_ENTRY;
        let mut wc: u16 = 1;
        for s in 0..LFN_UNITS_PER_ENTRY {
            let uc = entry.lfn_unit(s);
            if wc != 0 {
                if i >= LFN_BUF_LEN {
                    return false;
                }
                self.lfn_buf[i] = uc;
                wc = uc;
                i += 1;
            } else if uc != 0xFFFF {
                return false;
            }
        }
        if last && wc != 0 {
            // Terminate if the last fragment was not terminated on disk.
            if i >= LFN_BUF_LEN {
                return false;
            }
            self.lfn_buf[i] = 0;
        }
        true
    }

    /// Does the LFN entry at `off` match the name in the working buffer?
    /// Comparison is case-insensitive per Unicode upper-casing.
    fn cmp_lfn(&self, off: usize) -> bool {
        let entry = OnDiskDirEntry::new(&self.win[off..off + DIR_ENTRY_LEN]);
        if entry.lfn_first_cluster_lo() != 0 {
            return false;
        }
        let seq = entry.lfn_ordinal() & 0x3F;
        if seq == 0 {
            return false;
        }
        let mut i = usize::from(seq - 1) * LFN_UNITS_PER_ENTRY;
        let mut wc: u16 = 1;
        for s in 0..LFN_UNITS_PER_ENTRY {
            let uc = entry.lfn_unit(s);
            if wc != 0 {
                if i >= LFN_BUF_LEN || wto_upper(uc) != wto_upper(self.lfn_buf[i]) {
                    return false;
                }
                i += 1;
                wc = uc;
            } else if uc != 0xFFFF {
                return false;
            }
        }
        // On the last fragment the buffered name must end where the entry
        // name does.
        !(entry.lfn_is_last() && wc != 0 && i < LFN_BUF_LEN && self.lfn_buf[i] != 0)
    }

    /// Build the LFN entry carrying fragment `ord` (1-based) of the working
    /// buffer at window offset `off`.
    fn put_lfn(&mut self, off: usize, ord: u8, sum: u8) {
        let mut i = usize::from(ord - 1) * LFN_UNITS_PER_ENTRY;
        let mut wc: u16 = 0;
        {
            let entry = &mut self.win[off..off + DIR_ENTRY_LEN];
            entry[LDIR_CHKSUM] = sum;
            entry[LDIR_ATTR] = Attributes::LFN;
            entry[LDIR_TYPE] = 0;
            LittleEndian::write_u16(&mut entry[LDIR_FST_CLUS_LO..LDIR_FST_CLUS_LO + 2], 0);
            entry[LDIR_ORD] = 0;
        }
        for &unit_off in LFN_OFFSETS.iter() {
            if wc != 0xFFFF {
                wc = self.lfn_buf[i];
                i += 1;
            }
            LittleEndian::write_u16(&mut self.win[off + unit_off..off + unit_off + 2], wc);
            if wc == 0 {
                // Pad the rest of the fragment.
                wc = 0xFFFF;
            }
        }
        let mut ord = ord;
        if wc == 0xFFFF || (i < LFN_BUF_LEN && self.lfn_buf[i] == 0) {
            // The name ends inside this fragment, so it is the last (and
            // physically first) entry of the group.
            ord |= LLEF;
        }
        self.win[off + LDIR_ORD] = ord;
    }

    // ------------------------------------------------------------------
    // Name creation.
    // ------------------------------------------------------------------

    /// Tokenize the next segment of `path` into the walker's short-name
    /// scratch and the volume's LFN working buffer. Returns the remainder
    /// of the path; the scratch's `LAST` flag marks the terminal segment.
    pub(crate) fn create_name<'p>(
        &mut self,
        dp: &mut Dir,
        path: &'p str,
    ) -> Result<&'p str, Error> {
        // Fill the LFN buffer up to a separator or terminator.
        let mut di = 0usize;
        let mut end = path.len();
        let mut separator = false;
        for (idx, ch) in path.char_indices() {
            if is_separator(ch) {
                end = idx + ch.len_utf8();
                separator = true;
                break;
            }
            if is_terminator(ch) {
                end = idx;
                break;
            }
            if is_illegal(ch) {
                return Err(Error::InvalidName);
            }
            let mut units = [0u16; 2];
            for &unit in ch.encode_utf16(&mut units).iter() {
                if di >= LFN_BUF_LEN - 1 {
                    return Err(Error::InvalidName);
                }
                self.lfn_buf[di] = unit;
                di += 1;
            }
        }
        let mut cf = NameStatus::empty();
        let rest = if separator {
            let rest = path[end..].trim_start_matches(is_separator);
            if rest.is_empty() || rest.starts_with(is_terminator) {
                cf |= NameStatus::LAST;
            }
            rest
        } else {
            cf |= NameStatus::LAST;
            &path[end..end]
        };

        // Snip trailing spaces and dots.
        while di > 0 {
            let wc = self.lfn_buf[di - 1];
            if wc != u16::from(b' ') && wc != u16::from(b'.') {
                break;
            }
            di -= 1;
        }
        self.lfn_buf[di] = 0;
        if di == 0 {
            return Err(Error::InvalidName);
        }

        let mut si = 0usize;
        while si < di && self.lfn_buf[si] == u16::from(b' ') {
            si += 1;
        }
        if si > 0 || self.lfn_buf[si] == u16::from(b'.') {
            // Leading spaces or a leading dot never fit 8.3.
            cf |= NameStatus::LOSS | NameStatus::LFN;
        }
        // Index just past the last dot; the extension starts here.
        let mut ext_start = di;
        while ext_start > 0 && self.lfn_buf[ext_start - 1] != u16::from(b'.') {
            ext_start -= 1;
        }

        dp.sfn = ShortName::blank();
        let mut i = 0usize;
        let mut ni = 8usize;
        let mut case_map: u8 = 0;
        loop {
            let mut wc = self.lfn_buf[si];
            si += 1;
            if wc == 0 {
                break;
            }
            if wc == u16::from(b' ') || (wc == u16::from(b'.') && si != ext_start) {
                // Embedded spaces and dots are dropped from the short name.
                cf |= NameStatus::LOSS | NameStatus::LFN;
                continue;
            }
            if i >= ni || si == ext_start {
                if ni == 11 {
                    // Extension overflow.
                    cf |= NameStatus::LOSS | NameStatus::LFN;
                    break;
                }
                if si != ext_start {
                    // Body overflow.
                    cf |= NameStatus::LOSS | NameStatus::LFN;
                }
                if si > ext_start {
                    // No extension to fill.
                    break;
                }
                si = ext_start;
                i = 8;
                ni = 11;
                case_map <<= 2;
                continue;
            }
            if wc >= 0x80 {
                if let Some(tables) = self.codepage {
                    // Extended character: convert to OEM and upcase.
                    cf |= NameStatus::LFN;
                    wc = uni_to_oem(u32::from(wc), self.codepage);
                    if wc & 0x80 != 0 {
                        wc = u16::from(tables.upcase[usize::from(wc & 0x7F)]);
                    }
                }
            }
            if wc >= 0x100 {
                // Double-byte character: lead byte first.
                if i >= ni - 1 {
                    cf |= NameStatus::LOSS | NameStatus::LFN;
                    i = ni;
                    continue;
                }
                dp.sfn.bytes[i] = (wc >> 8) as u8;
                i += 1;
            } else if wc == 0 || is_illegal_sfn(wc) {
                // Legal in an LFN but not in a short name.
                wc = u16::from(b'_');
                cf |= NameStatus::LOSS | NameStatus::LFN;
            } else {
                if is_upper(wc) {
                    case_map |= 2;
                }
                if is_lower(wc) {
                    case_map |= 1;
                    wc -= 0x20;
                }
            }
            dp.sfn.bytes[i] = wc as u8;
            i += 1;
        }

        if dp.sfn.bytes[0] == DDEM {
            // A leading 0xE5 would read as a deleted entry.
            dp.sfn.bytes[0] = RDDEM;
        }
        if ni == 8 {
            case_map <<= 2;
        }
        if case_map & 0x0C == 0x0C || case_map & 0x03 == 0x03 {
            // Mixed case within a field can only be kept in an LFN.
            cf |= NameStatus::LFN;
        }
        if !cf.contains(NameStatus::LFN) {
            if case_map & 0x01 != 0 {
                cf |= NameStatus::EXT;
            }
            if case_map & 0x04 != 0 {
                cf |= NameStatus::BODY;
            }
        }
        dp.sfn.status = cf;
        Ok(rest)
    }

    // ------------------------------------------------------------------
    // Search, allocation, registration.
    // ------------------------------------------------------------------

    /// Search the directory for the name held in the walker's scratch.
    /// Matches on the long filename when a valid LFN group precedes the
    /// entry, on the 11-byte short name otherwise. Leaves the walker on
    /// the matched entry.
    pub(crate) async fn dir_find(&mut self, dp: &mut Dir) -> Result<(), Error> {
        self.dir_sdi(dp, 0).await?;
        let mut ord: u8 = 0xFF;
        let mut sum: u8 = 0xFF;
        dp.blk_ofs = 0xFFFF_FFFF;
        loop {
            self.move_window(dp.sect).await?;
            let off = self.entry_off(dp);
            let (c, attr, chksum, name) = {
                let entry = OnDiskDirEntry::new(&self.win[off..off + DIR_ENTRY_LEN]);
                let mut name = [0u8; 11];
                name.copy_from_slice(entry.name());
                (entry.first_byte(), entry.attributes(), entry.lfn_checksum(), name)
            };
            if c == 0 {
                return Err(Error::NoFile);
            }
            dp.attr = attr.bits();
            if c == DDEM || (attr.is_volume() && !attr.is_lfn()) {
                // Not a real entry; restart any LFN group.
                ord = 0xFF;
                dp.blk_ofs = 0xFFFF_FFFF;
            } else if attr.is_lfn() {
                if !dp.sfn.status.contains(NameStatus::NO_LFN) {
                    if c & LLEF != 0 {
                        sum = chksum;
                        ord = c & !LLEF;
                        dp.blk_ofs = dp.dptr;
                    }
                    let seq = c & !LLEF;
                    ord = if seq == ord && sum == chksum && self.cmp_lfn(off) {
                        ord.wrapping_sub(1)
                    } else {
                        0xFF
                    };
                }
            } else {
                if ord == 0 && sum == sum_sfn(&name) {
                    // The LFN group before this entry matched completely.
                    return Ok(());
                }
                if !dp.sfn.status.contains(NameStatus::LOSS) && name == dp.sfn.bytes {
                    return Ok(());
                }
                ord = 0xFF;
                dp.blk_ofs = 0xFFFF_FFFF;
            }
            self.dir_next(dp, false).await?;
        }
    }

    /// Reserve `nent` contiguous entries, stretching the table at its end.
    /// Leaves the walker on the last entry of the reserved run.
    pub(crate) async fn dir_alloc(&mut self, dp: &mut Dir, nent: usize) -> Result<(), Error> {
        self.dir_sdi(dp, 0).await?;
        let mut run = 0usize;
        loop {
            self.move_window(dp.sect).await?;
            let c = self.win[self.entry_off(dp)];
            if c == DDEM || c == 0 {
                run += 1;
                if run == nent {
                    return Ok(());
                }
            } else {
                run = 0;
            }
            match self.dir_next(dp, true).await {
                Ok(()) => {}
                // The table cannot grow any further.
                Err(Error::NoFile) => return Err(Error::Denied),
                Err(e) => return Err(e),
            }
        }
    }

    /// Register the name held in the walker's scratch as a new entry:
    /// resolve short-name collisions with numbered names, reserve the
    /// entry run, write the LFN group bottom-up and finally the short-name
    /// entry itself.
    pub(crate) async fn dir_register(&mut self, dp: &mut Dir) -> Result<(), Error> {
        trace!("dir_register");
        if dp
            .sfn
            .status
            .intersects(NameStatus::DOT | NameStatus::NO_NAME)
        {
            return Err(Error::InvalidName);
        }
        let lfn_len = self.lfn_len();
        let sn = dp.sfn;
        if sn.status.contains(NameStatus::LOSS) {
            // The 8.3 rendering is lossy; find a free numbered name.
            dp.sfn.status = NameStatus::NO_LFN;
            let mut seq = 1u32;
            let mut free_name = false;
            while seq < MAX_NAME_COLLISIONS {
                dp.sfn.bytes =
                    generate_numbered_name(&sn.bytes, &self.lfn_buf, seq, &self.dbc_ranges);
                match self.dir_find(dp).await {
                    Ok(()) => seq += 1,
                    Err(Error::NoFile) => {
                        free_name = true;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            if !free_name {
                return Err(Error::Denied);
            }
            dp.sfn.status = sn.status;
        }

        let total_entries = if sn.status.contains(NameStatus::LFN) {
            lfn_len.div_ceil(LFN_UNITS_PER_ENTRY) + 1
        } else {
            1
        };
        self.dir_alloc(dp, total_entries).await?;
        let mut lfn_entries = total_entries - 1;
        if lfn_entries != 0 {
            // Walk back to the head of the reserved run and lay the LFN
            // group down, highest ordinal first.
            let head = dp.dptr - (lfn_entries as u32) * DIR_ENTRY_LEN_U32;
            self.dir_sdi(dp, head).await?;
            let sum = sum_sfn(&dp.sfn.bytes);
            loop {
                self.move_window(dp.sect).await?;
                let off = self.entry_off(dp);
                self.put_lfn(off, lfn_entries as u8, sum);
                self.wflag = true;
                self.dir_next(dp, false).await?;
                lfn_entries -= 1;
                if lfn_entries == 0 {
                    break;
                }
            }
        }
        self.move_window(dp.sect).await?;
        let off = self.entry_off(dp);
        let entry = &mut self.win[off..off + DIR_ENTRY_LEN];
        entry.fill(0);
        entry[..11].copy_from_slice(&dp.sfn.bytes);
        entry[DIR_NTRES] = (dp.sfn.status & (NameStatus::BODY | NameStatus::EXT)).bits();
        self.wflag = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reading entries.
    // ------------------------------------------------------------------

    /// Advance the walker to the next real entry (skipping deleted
    /// entries, dot entries and, unless `vol` is set, volume labels),
    /// accumulating any long filename along the way. [`Error::NoFile`]
    /// means the end of the table.
    pub(crate) async fn dir_read(&mut self, dp: &mut Dir, vol: bool) -> Result<(), Error> {
        let mut ord: u8 = 0;
        let mut sum: u8 = 0;
        let result = loop {
            if dp.sect.0 == 0 {
                break Err(Error::NoFile);
            }
            if let Err(e) = self.move_window(dp.sect).await {
                break Err(e);
            }
            let off = self.entry_off(dp);
            let (c, attr, chksum, name) = {
                let entry = OnDiskDirEntry::new(&self.win[off..off + DIR_ENTRY_LEN]);
                let mut name = [0u8; 11];
                name.copy_from_slice(entry.name());
                (entry.first_byte(), entry.attributes(), entry.lfn_checksum(), name)
            };
            if c == 0 {
                break Err(Error::NoFile);
            }
            dp.attr = attr.bits();
            let is_label = attr.bits() & !Attributes::ARCHIVE == Attributes::VOLUME;
            if c == DDEM || c == b'.' || is_label != vol {
                // Entry without data for this walk.
                ord = 0xFF;
            } else if attr.is_lfn() {
                if c & LLEF != 0 {
                    sum = chksum;
                    ord = c & !LLEF;
                    dp.blk_ofs = dp.dptr;
                }
                let seq = c & !LLEF;
                ord = if seq == ord && sum == chksum && self.pick_lfn(off) {
                    ord.wrapping_sub(1)
                } else {
                    0xFF
                };
            } else {
                if ord != 0 || sum != sum_sfn(&name) {
                    // The preceding LFN group was absent or inconsistent.
                    dp.blk_ofs = 0xFFFF_FFFF;
                }
                break Ok(());
            }
            if let Err(e) = self.dir_next(dp, false).await {
                break Err(e);
            }
        };
        if result.is_err() {
            // Terminate the walk.
            dp.sect = BlockIdx(0);
        }
        result
    }

    /// Project the walker's current entry into `info`.
    pub(crate) fn get_fileinfo(&self, dp: &Dir, info: &mut FileInfo) {
        info.name.clear();
        info.alt_name.clear();
        if dp.sect.0 == 0 {
            return;
        }
        let off = self.entry_off(dp);

        if dp.blk_ofs != 0xFFFF_FFFF {
            // A long filename was accumulated for this entry.
            let len = self.lfn_len();
            let units = self.lfn_buf[..len].iter().copied();
            let mut ok = true;
            for decoded in char::decode_utf16(units) {
                match decoded {
                    Ok(c) if info.name.push(c).is_ok() => {}
                    // Broken surrogate pair or overflow: discard the LFN.
                    _ => {
                        ok = false;
                        break;
                    }
                }
            }
            if !ok {
                info.name.clear();
            }
        }

        // Render the 8.3 name.
        let entry = OnDiskDirEntry::new(&self.win[off..off + DIR_ENTRY_LEN]);
        let name = entry.name();
        let mut si = 0usize;
        while si < 11 {
            let mut wc = u16::from(name[si]);
            si += 1;
            if wc == u16::from(b' ') {
                continue;
            }
            if wc == u16::from(RDDEM) {
                wc = u16::from(DDEM);
            }
            if si == 9 && info.alt_name.push('.').is_err() {
                info.alt_name.clear();
                break;
            }
            if si != 8
                && si != 11
                && codepage::is_dbc_first(wc as u8, &self.dbc_ranges)
                && codepage::is_dbc_second(name[si], &self.dbc_ranges)
            {
                wc = wc << 8 | u16::from(name[si]);
                si += 1;
            }
            let uni = oem_to_uni(wc, self.codepage);
            let pushed = char::from_u32(u32::from(uni))
                .filter(|_| uni != 0)
                .map(|c| info.alt_name.push(c).is_ok())
                .unwrap_or(false);
            if !pushed {
                info.alt_name.clear();
                break;
            }
        }

        if info.name.is_empty() {
            // No LFN: the primary name is the short name with its stored
            // case bits applied.
            if info.alt_name.is_empty() {
                let _ = info.name.push('?');
            } else {
                let ntres = entry.ntres();
                let alt = info.alt_name.clone();
                let mut lowercase_flag = NameStatus::BODY.bits();
                for ch in alt.chars() {
                    if ch == '.' {
                        lowercase_flag = NameStatus::EXT.bits();
                    }
                    let ch = if ch.is_ascii_uppercase() && ntres & lowercase_flag != 0 {
                        ch.to_ascii_lowercase()
                    } else {
                        ch
                    };
                    if info.name.push(ch).is_err() {
                        break;
                    }
                }
            }
            if entry.ntres() == 0 {
                // The short name is the primary name; no alternate needed.
                info.alt_name.clear();
            }
        }

        info.attributes = entry.attributes();
        info.size = entry.file_size();
        info.mtime = Timestamp::from_fat(entry.mod_date(), entry.mod_time());
    }

    // ------------------------------------------------------------------
    // Path resolution.
    // ------------------------------------------------------------------

    /// Resolve an absolute path, leaving the walker on the terminal
    /// component (or rewound to the root for an empty path).
    pub(crate) async fn follow_path(&mut self, dp: &mut Dir, path: &str) -> Result<(), Error> {
        let mut path = path.trim_start_matches(is_separator);
        dp.sclust = 0; // Resolution always starts at the root.
        if path.is_empty() || path.starts_with(is_terminator) {
            dp.sfn = ShortName::blank();
            dp.sfn.status = NameStatus::NO_NAME;
            return self.dir_sdi(dp, 0).await;
        }
        loop {
            path = self.create_name(dp, path)?;
            let found = self.dir_find(dp).await;
            let last = dp.sfn.status.contains(NameStatus::LAST);
            match found {
                Ok(()) => {}
                Err(Error::NoFile) if !last => return Err(Error::NoPath),
                Err(e) => return Err(e),
            }
            if last {
                return Ok(());
            }
            if dp.attr & Attributes::DIRECTORY == 0 {
                // An intermediate component must be a directory.
                return Err(Error::NoPath);
            }
            let off = self.entry_off(dp);
            dp.sclust = self.ld_clust(&self.win[off..]);
        }
    }
}
