//! Traits and types for block devices the driver can mount.
//!
//! The host supplies an object implementing [`BlockDevice`]; the driver only
//! ever issues whole-sector transfers through it. All addressing is by
//! Logical Block Address, a 0-based sector index into the device.

use crate::Error;

/// A sector index into the block device.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockIdx(pub u32);

/// A number of sectors.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockCount(pub u32);

impl BlockIdx {
    /// Sentinel for "no sector": used by the volume access window while it
    /// holds no valid data.
    pub const INVALID: BlockIdx = BlockIdx(0xFFFF_FFFF);

    /// The byte offset of the start of this sector, for sectors of `size`
    /// bytes.
    pub fn into_bytes(self, size: usize) -> u64 {
        u64::from(self.0) * size as u64
    }
}

impl core::ops::Add<BlockCount> for BlockIdx {
    type Output = BlockIdx;
    fn add(self, rhs: BlockCount) -> BlockIdx {
        BlockIdx(self.0 + rhs.0)
    }
}

impl core::ops::AddAssign<BlockCount> for BlockIdx {
    fn add_assign(&mut self, rhs: BlockCount) {
        self.0 += rhs.0;
    }
}

impl core::ops::Sub<BlockIdx> for BlockIdx {
    type Output = BlockCount;
    fn sub(self, rhs: BlockIdx) -> BlockCount {
        BlockCount(self.0 - rhs.0)
    }
}

/// The access level a device grants the host.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceMode {
    /// No access: the medium is absent or prohibited.
    NoAccess,
    /// The medium can only be read.
    ReadOnly,
    /// The medium can be read and written.
    ReadWrite,
}

/// A block-addressable storage device.
///
/// `dst`/`src` lengths must be whole multiples of [`block_size`]; the driver
/// enforces this before every call. Reads and writes past the end of the
/// medium must return an error, not a short count.
///
/// [`block_size`]: BlockDevice::block_size
#[allow(async_fn_in_trait)]
pub trait BlockDevice {
    /// The error type reported by the device.
    type Error: core::fmt::Debug;

    /// Read `dst.len() / block_size()` sectors starting at `start`,
    /// returning the number of bytes read.
    async fn read(&mut self, dst: &mut [u8], start: BlockIdx) -> Result<usize, Self::Error>;

    /// Write `src.len() / block_size()` sectors starting at `start`,
    /// returning the number of bytes written.
    async fn write(&mut self, src: &[u8], start: BlockIdx) -> Result<usize, Self::Error>;

    /// Erase `count` sectors starting at `start`. Erased sectors read back
    /// as zero.
    async fn erase(&mut self, start: BlockIdx, count: u32) -> Result<(), Self::Error>;

    /// The access level this device grants.
    fn mode(&self) -> DeviceMode;

    /// The sector size in bytes. Must be a power of two.
    fn block_size(&self) -> usize;

    /// Total device capacity in bytes.
    fn size(&self) -> u64;
}

/// Byte-offset to (sector, in-sector-offset) math for power-of-two sector
/// sizes.
///
/// Dividing and taking the modulus by the sector size reduce to a shift and
/// a mask, so the hot paths of the driver never perform a hardware divide.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockIndexer {
    shift: u32,
    mask: u32,
}

impl BlockIndexer {
    /// Indexer for the built-in sector size, used until a mount supplies
    /// the real one.
    pub(crate) const DEFAULT: BlockIndexer = BlockIndexer {
        shift: 9,
        mask: 511,
    };

    /// Build an indexer for `block_size`-byte sectors.
    ///
    /// Fails with [`Error::InvalidParameter`] if `block_size` is zero or not
    /// a power of two.
    pub fn new(block_size: usize) -> Result<BlockIndexer, Error> {
        if block_size == 0 || !block_size.is_power_of_two() || block_size > u16::MAX as usize {
            return Err(Error::InvalidParameter);
        }
        let shift = block_size.trailing_zeros();
        Ok(BlockIndexer {
            shift,
            mask: (block_size as u32) - 1,
        })
    }

    /// The sector size this indexer was built for.
    pub fn size(&self) -> u32 {
        1 << self.shift
    }

    /// The sector index containing the byte at `byte_idx`.
    #[inline]
    pub fn idx(&self, byte_idx: u32) -> u32 {
        byte_idx >> self.shift
    }

    /// The offset of the byte at `byte_idx` from the start of its sector.
    #[inline]
    pub fn off(&self, byte_idx: u32) -> u32 {
        byte_idx & self.mask
    }
}

/// The driver's view of the device: every transfer is validated to be a
/// whole number of sectors, failures are logged and collapsed to the
/// host-visible error codes, and writes respect the access mode the volume
/// was mounted with.
pub(crate) struct Disk<D> {
    pub(crate) device: D,
    pub(crate) blk: BlockIndexer,
    pub(crate) perm: crate::filesystem::files::Mode,
}

impl<D: BlockDevice> Disk<D> {
    pub(crate) async fn read(&mut self, dst: &mut [u8], sector: BlockIdx) -> Result<(), Error> {
        if self.blk.off(dst.len() as u32) != 0 {
            warn!("disk read: unaligned length {}", dst.len());
            return Err(Error::InvalidParameter);
        }
        trace!("disk read: sector={} len={}", sector.0, dst.len());
        match self.device.read(dst, sector).await {
            Ok(_) => Ok(()),
            Err(_e) => {
                #[cfg(feature = "log")]
                warn!("disk read failed at {}: {:?}", sector.0, _e);
                #[cfg(not(feature = "log"))]
                warn!("disk read failed at {}", sector.0);
                Err(Error::Disk)
            }
        }
    }

    pub(crate) async fn write(&mut self, src: &[u8], sector: BlockIdx) -> Result<(), Error> {
        if !self.perm.contains(crate::filesystem::files::Mode::WRITE) {
            return Err(Error::WriteProtected);
        }
        if self.blk.off(src.len() as u32) != 0 {
            warn!("disk write: unaligned length {}", src.len());
            return Err(Error::InvalidParameter);
        }
        trace!("disk write: sector={} len={}", sector.0, src.len());
        match self.device.write(src, sector).await {
            Ok(_) => Ok(()),
            Err(_e) => {
                #[cfg(feature = "log")]
                warn!("disk write failed at {}: {:?}", sector.0, _e);
                #[cfg(not(feature = "log"))]
                warn!("disk write failed at {}", sector.0);
                Err(Error::Disk)
            }
        }
    }

    pub(crate) async fn erase(&mut self, sector: BlockIdx, count: u32) -> Result<(), Error> {
        if !self.perm.contains(crate::filesystem::files::Mode::WRITE) {
            return Err(Error::WriteProtected);
        }
        trace!("disk erase: sector={} count={}", sector.0, count);
        match self.device.erase(sector, count).await {
            Ok(()) => Ok(()),
            Err(_e) => {
                #[cfg(feature = "log")]
                warn!("disk erase failed at {}: {:?}", sector.0, _e);
                #[cfg(not(feature = "log"))]
                warn!("disk erase failed at {}", sector.0);
                Err(Error::Disk)
            }
        }
    }
}
