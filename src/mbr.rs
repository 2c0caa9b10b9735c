//! MBR (_Master Boot Record_) on-disk structures
//!
//! Legacy structure used to store partition information on hard drives, stored on the first
//! logical block of the drive.
//!
//! It limits the number of partition to 4 (without using _EBR_), and the partition sizes to 2
//! Terabytes at most.

use core::fmt::{self, Debug};

use thiserror::Error;
use zerocopy::{
    byteorder::little_endian::{U16, U32},
    FromBytes, IntoBytes,
};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Size of the bootstrap code area, in bytes.
pub const MBR_BOOTSTRAP_SIZE: usize = 440;

/// Offset of the partition table inside the *MBR*.
pub const MBR_PARTITION_TABLE_OFFSET: usize = 0x1BE;

/// Magic boot signature for the *MBR* header (little-endian format).
pub const MBR_MAGIC_LE: u16 = 0xaa55;

/// Number of primary partition entries in an *MBR*.
pub const MBR_PARTITION_COUNT: usize = 4;

/// Partition type marking a GPT protective entry.
pub const MBR_PROTECTIVE_TYPE: u8 = 0xEE;

/// Heads per cylinder used when translating LBA to CHS.
pub const CHS_HEADS: u32 = 255;

/// Sectors per track used when translating LBA to CHS.
pub const CHS_SECTORS: u32 = 63;

/// Error type when dealing with [`Mbr`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MbrError {
    /// A buffer too small was provided.
    #[error("buffer too small for an MBR")]
    InvalidBufferSize,

    /// The signature field in this [`Mbr`] contains an invalid value.
    #[error("invalid MBR signature")]
    InvalidSignature,

    /// A partition entry has a boot indicator other than `0x00` or `0x80`.
    #[error("invalid boot indicator in MBR entry {0}")]
    InvalidBootIndicator(usize),
}

/// The Master Boot Record is the first sector of a storage device that
/// contains important metadata, including bootstrap code, a partition
/// table, and a boot signature.
///
/// # Examples
///
/// ```
/// use fzdisk::mbr::Mbr;
///
/// let mut mbr = Mbr::new(0xdeadbeef);
/// mbr.partitions[0].set_start_lba(2048);
/// mbr.partitions[0].set_sectors_count(1024);
///
/// let mut buf = [0u8; 512];
/// mbr.write(&mut buf).unwrap();
///
/// let parsed = Mbr::parse_from_buf(&buf).unwrap();
/// assert_eq!(parsed.disk_id(), 0xdeadbeef);
/// assert!(parsed.partitions[0].is_used());
/// ```
#[derive(Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct Mbr {
    bootstrap: [u8; MBR_BOOTSTRAP_SIZE],
    disk_id: U32,
    reserved: [u8; 2],

    /// Partition table for this `Mbr`.
    ///
    /// The partition table contains entries describing up to four primary partitions.
    pub partitions: [MbrPartition; MBR_PARTITION_COUNT],

    boot_sig: U16,
}

assert_eq_size!(Mbr, [u8; 0x200]);

impl Mbr {
    /// Creates a new, empty (but valid) MBR.
    pub fn new(disk_id: u32) -> Self {
        Self {
            bootstrap: [0u8; MBR_BOOTSTRAP_SIZE],
            disk_id: U32::new(disk_id),
            reserved: [0u8; 2],
            partitions: [MbrPartition::default(); MBR_PARTITION_COUNT],
            boot_sig: U16::new(MBR_MAGIC_LE),
        }
    }

    /// Creates a protective MBR covering a GPT disk of `total_sectors` sectors.
    pub fn new_protective(total_sectors: u64) -> Self {
        let mut mbr = Self::new(0);
        mbr.make_protective(total_sectors);

        mbr
    }

    /// Reads the MBR from a raw bytes buffer.
    ///
    /// This creates a copy, and does not operate in-place.
    pub fn parse_from_buf(buf: &[u8]) -> Result<Self, MbrError> {
        let (mbr, _) = Mbr::read_from_prefix(buf).map_err(|_| MbrError::InvalidBufferSize)?;

        mbr.check_validity()?;

        Ok(mbr)
    }

    /// Writes this MBR to a mutable bytes buffer.
    pub fn write(&self, buf: &mut [u8]) -> Result<(), MbrError> {
        let bytes = self.as_bytes();
        if buf.len() < bytes.len() {
            return Err(MbrError::InvalidBufferSize);
        }

        buf[..bytes.len()].copy_from_slice(bytes);

        Ok(())
    }

    /// Checks if this MBR is valid (correct signature, sane boot indicators).
    ///
    /// Returns an error describing what is wrong if it's not a valid MBR.
    pub fn check_validity(&self) -> Result<(), MbrError> {
        if !self.check_signature() {
            return Err(MbrError::InvalidSignature);
        }

        if let Some(idx) = self
            .partitions
            .iter()
            .position(|part| part.is_active().is_err())
        {
            return Err(MbrError::InvalidBootIndicator(idx));
        }

        Ok(())
    }

    #[inline]
    fn check_signature(&self) -> bool {
        self.boot_sig.get() == MBR_MAGIC_LE
    }

    /// Returns the 32-bit disk identifier stored before the partition table.
    #[inline]
    pub fn disk_id(&self) -> u32 {
        self.disk_id.get()
    }

    #[inline]
    pub fn set_disk_id(&mut self, disk_id: u32) {
        self.disk_id.set(disk_id);
    }

    /// Returns `true` if one of the entries is a GPT protective entry.
    pub fn is_protective(&self) -> bool {
        self.partitions
            .iter()
            .any(|part| part.partition_type() == MBR_PROTECTIVE_TYPE)
    }

    /// Replaces the partition table with a single protective entry spanning the disk.
    pub fn make_protective(&mut self, total_sectors: u64) {
        let covered = total_sectors.saturating_sub(1).min(u64::from(u32::MAX));

        self.partitions = [MbrPartition::default(); MBR_PARTITION_COUNT];

        let entry = &mut self.partitions[0];
        entry.set_partition_type(MBR_PROTECTIVE_TYPE);
        entry.set_start_lba(1);
        entry.set_sectors_count(covered as u32);
        entry.update_chs();
    }
}

impl Default for Mbr {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Debug for Mbr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mbr")
            .field("disk_id", &format_args!("0x{:08x}", self.disk_id()))
            .field("partitions", &self.partitions)
            .field("boot_sig", &format_args!("0x{:04x}", self.boot_sig.get()))
            .finish()
    }
}

/// A 3-byte representation of a CHS address
#[repr(transparent)]
#[derive(
    Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct Chs([u8; 3]);

impl Debug for Chs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chs")
            .field("c", &self.cylinder())
            .field("h", &self.head())
            .field("s", &self.sector())
            .finish()
    }
}

impl Chs {
    /// Address used for every LBA past the 1024th cylinder.
    pub const MAX: Chs = Chs([0xFE, 0xFF, 0xFF]);

    /// Creates a new CHS value from an LBA, using the legacy 255 heads / 63 sectors geometry.
    pub const fn from_lba(lba: u64) -> Self {
        let per_cylinder = (CHS_SECTORS * CHS_HEADS) as u64;
        let cylinder = lba / per_cylinder;
        if cylinder > 0x03FF {
            return Self::MAX;
        }

        let tmp = lba % per_cylinder;
        let head = tmp / CHS_SECTORS as u64;
        let sector = tmp % CHS_SECTORS as u64 + 1;

        Self([
            (head & 0xFF) as u8,
            (sector & 0b0011_1111) as u8 | ((cylinder & 0x0300) >> 2) as u8,
            (cylinder & 0xFF) as u8,
        ])
    }

    pub fn head(&self) -> u8 {
        self.0[0]
    }

    pub fn sector(&self) -> u8 {
        self.0[1] & 0b0011_1111
    }

    pub fn cylinder(&self) -> u16 {
        ((u16::from(self.0[1]) & 0b1100_0000) << 2) | u16::from(self.0[2])
    }

    /// Translates this address back to an LBA, `None` for the saturated address.
    pub fn as_lba(&self) -> Option<u32> {
        if *self == Self::MAX || self.sector() == 0 {
            return None;
        }

        Some(
            u32::from(self.cylinder()) * CHS_SECTORS * CHS_HEADS
                + u32::from(self.head()) * CHS_SECTORS
                + u32::from(self.sector())
                - 1,
        )
    }
}

/// Represents an individual partition entry in an MBR partition table.
///
/// This struct matches the exact layout of an MBR partition entry on disk.
///
/// # Examples
///
/// ```
/// use fzdisk::mbr::Mbr;
///
/// let mut mbr = Mbr::new(0);
///
/// mbr.partitions[0].set_sectors_count(1024);
/// mbr.partitions[0].set_partition_type(0x83);
///
/// assert!(mbr.partitions[0].is_used());
/// ```
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(C)]
pub struct MbrPartition {
    attributes: u8,

    chs_start: Chs,
    part_type: u8,
    chs_last: Chs,

    start_lba: U32,
    sectors_count: U32,
}

assert_eq_size!(MbrPartition, [u8; 16]);

impl MbrPartition {
    /// Returns `Ok(true)` if this partition is flagged as _active_ (or bootable).
    ///
    /// # Errors
    ///
    /// Returns [`MbrError::InvalidBootIndicator`] if the _active_ field holds anything but
    /// `0x00` or `0x80`.
    pub fn is_active(&self) -> Result<bool, MbrError> {
        match self.attributes {
            0 => Ok(false),
            0x80 => Ok(true),
            _ => Err(MbrError::InvalidBootIndicator(0)),
        }
    }

    /// Sets the _active_ (or bootable) flag for this partition.
    #[inline]
    pub fn set_active(&mut self, active: bool) {
        self.attributes = if active { 0x80 } else { 0 }
    }

    /// Returns `true` if this entry describes a partition, that is if it has a non-zero size.
    pub fn is_used(&self) -> bool {
        self.sectors_count.get() != 0
    }

    /// Returns the size of this partition, in sectors.
    #[inline]
    pub fn sectors_count(&self) -> u32 {
        self.sectors_count.get()
    }

    /// Sets the size of this partition, in sectors.
    #[inline]
    pub fn set_sectors_count(&mut self, count: u32) {
        self.sectors_count.set(count);
    }

    /// Returns this partition's starting LBA.
    ///
    /// The _LBA_ is encoded using 32 bits, which limits the maximum partition size to 2TB.
    #[inline]
    pub fn start_lba(&self) -> u32 {
        self.start_lba.get()
    }

    #[inline]
    pub fn set_start_lba(&mut self, lba: u32) {
        self.start_lba.set(lba);
    }

    /// Returns the last LBA covered by this partition.
    pub fn last_lba(&self) -> u64 {
        (u64::from(self.start_lba()) + u64::from(self.sectors_count())).saturating_sub(1)
    }

    /// Returns the raw type byte of this partition.
    #[inline]
    pub fn partition_type(&self) -> u8 {
        self.part_type
    }

    #[inline]
    pub fn set_partition_type(&mut self, part_type: u8) {
        self.part_type = part_type;
    }

    pub fn chs_start(&self) -> Chs {
        self.chs_start
    }

    pub fn chs_last(&self) -> Chs {
        self.chs_last
    }

    /// Recomputes both CHS addresses from the LBA fields.
    pub fn update_chs(&mut self) {
        if !self.is_used() {
            self.chs_start = Chs::default();
            self.chs_last = Chs::default();
            return;
        }

        self.chs_start = Chs::from_lba(u64::from(self.start_lba()));
        self.chs_last = Chs::from_lba(self.last_lba());
    }

    /// Zeroes this entry.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::{Chs, Mbr, MbrError, MBR_PROTECTIVE_TYPE};
    use base64::prelude::*;

    const DUMMY_MBR: &str = "M+2QkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJAz7fqO1bwAfPv8ZjHbZjHJZlNmUQZXjt2OxVK+AHy/AAa5AAHzpepLBgAAUrRBu6pVMckw9vnNE3IWgftVqnUQg+EBdAtmxwbzBrRC6xXrAjHJWlG0CM0TWw+2xkBQg+E/UffhU1JQuwB8uQQAZqGwB+hEAA+CgABmQIDHAuLyZoE+QHz7wHhwdQn6vOx76kR8AADogwBpc29saW51eC5iaW4gbWlzc2luZyBvciBjb3JydXB0Lg0KZmBmMdJmAwb4e2YTFvx7ZlJmUAZTagFqEInmZvc26HvA5AaI4YjFkvY27nuIxgjhQbgBAooW8nvNE41kEGZhw+geAE9wZXJhdGluZyBzeXN0ZW0gbG9hZCBlcnJvci4NCl6stA6KPmIEswfNEDwKdfHNGPTr/QAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA7AEAAAAAAAD25m4IAACAAQIAAKv//0AAAADAT6kAAKv//++r//8AUKkAAFgFAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAVao=";

    #[test]
    fn parse_standard_mbr_from_buffer() {
        let mbr_bytes = BASE64_STANDARD.decode(DUMMY_MBR).unwrap();

        let mbr = Mbr::parse_from_buf(&mbr_bytes).unwrap();

        assert_eq!(mbr.disk_id(), 0x086e_e6f6);
    }

    #[test]
    fn write_mbr_to_buf() {
        let mut buf = [0u8; 0x200];
        let mbr = Mbr::new(42);

        mbr.write(&mut buf).unwrap();

        assert_eq!(&buf[0x1FE..], &[0x55, 0xaa]);
        assert_eq!(Mbr::parse_from_buf(&buf).unwrap().disk_id(), 42);
    }

    #[test]
    fn read_partition_table() {
        let mbr_bytes = BASE64_STANDARD.decode(DUMMY_MBR).unwrap();

        let mbr = Mbr::parse_from_buf(&mbr_bytes).unwrap();

        assert!(mbr.partitions[0].is_active().unwrap());
        assert!(!mbr.partitions[1].is_active().unwrap());

        assert_eq!(mbr.partitions[0].sectors_count(), 11096000);
        assert_eq!(mbr.partitions[0].start_lba(), 64);
        assert_eq!(mbr.partitions[0].chs_start().as_lba(), Some(64));

        assert_eq!(mbr.partitions[1].sectors_count(), 350208);
        assert_eq!(
            u64::from(mbr.partitions[1].start_lba()),
            mbr.partitions[0].last_lba() + 1
        );

        assert_eq!(mbr.partitions[1].partition_type(), 0xEF);
        assert!(!mbr.partitions[2].is_used());
    }

    #[test]
    fn reject_bad_signature_and_short_buffers() {
        let mut buf = [0u8; 0x200];
        assert_eq!(
            Mbr::parse_from_buf(&buf).unwrap_err(),
            MbrError::InvalidSignature
        );

        Mbr::new(0).write(&mut buf).unwrap();
        buf[0x1BE + 16] = 0x12;
        assert_eq!(
            Mbr::parse_from_buf(&buf).unwrap_err(),
            MbrError::InvalidBootIndicator(1)
        );

        assert_eq!(
            Mbr::parse_from_buf(&buf[..100]).unwrap_err(),
            MbrError::InvalidBufferSize
        );
    }

    #[test]
    fn chs_translation() {
        let chs = Chs::from_lba(2048);

        assert_eq!((chs.cylinder(), chs.head(), chs.sector()), (0, 32, 33));
        assert_eq!(chs.as_lba(), Some(2048));

        assert_eq!(Chs::from_lba(u64::from(u32::MAX)), Chs::MAX);
    }

    #[test]
    fn protective_mbr_covers_disk() {
        let mbr = Mbr::new_protective(2048);

        assert!(mbr.is_protective());
        assert_eq!(mbr.partitions[0].partition_type(), MBR_PROTECTIVE_TYPE);
        assert_eq!(mbr.partitions[0].start_lba(), 1);
        assert_eq!(mbr.partitions[0].sectors_count(), 2047);
        assert!(!mbr.partitions[1].is_used());
    }
}
