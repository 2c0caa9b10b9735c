//! GPT (_GUID Partition Table_) on-disk structures
//!
//! The primary header lives in LBA 1 and is followed by the partition entry array. A backup
//! copy of both sits at the very end of the disk, entries first and header in the last LBA.

use core::fmt::{self, Display};

use bitflags::bitflags;
use thiserror::Error;
use uuid::Uuid;
use zerocopy::{
    byteorder::little_endian::{U16, U32, U64},
    FromBytes, IntoBytes,
};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Identifies EFI-compatible partition table header.
pub const GPT_SIG: &[u8; 8] = b"EFI PART";

/// Revision 1.0 of the header format.
pub const GPT_REVISION: u32 = 0x0001_0000;

/// Size of the header structure, in bytes.
pub const GPT_HEADER_SIZE: u32 = 0x5C;

/// Size of a partition entry, in bytes.
pub const GPT_ENTRY_SIZE: u32 = 0x80;

/// Number of entries in a freshly created entry array.
pub const GPT_DEFAULT_ENTRIES: u32 = 128;

/// Upper bound on the number of entries accepted when reading a header.
pub const GPT_MAX_ENTRIES: u32 = 4096;

/// Length of a partition name, in UTF-16 code units.
pub const GPT_NAME_LEN: usize = 36;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum GptError {
    #[error("buffer too small for a GPT structure")]
    InvalidBufferSize,

    #[error("invalid GPT signature")]
    InvalidSignature,

    #[error("invalid GPT header size {0}")]
    InvalidHeaderSize(u32),

    #[error("GPT header checksum mismatch (expected {0:#010x}, found {1:#010x})")]
    InvalidHeaderChecksum(u32, u32),

    #[error("GPT entry array checksum mismatch (expected {0:#010x}, found {1:#010x})")]
    InvalidEntriesChecksum(u32, u32),

    #[error("unsupported GPT entry size {0}")]
    UnsupportedEntrySize(u32),

    #[error("unsupported number of GPT entries {0}")]
    UnsupportedEntryCount(u32),

    #[error("GPT header is not located at LBA {0}")]
    UnexpectedLba(u64),

    #[error("inconsistent GPT usable area")]
    InvalidLayout,

    #[error("GPT entry {0} lies outside of the usable area")]
    InvalidEntry(usize),
}

/// A GUID as stored on disk (mixed-endian).
#[repr(transparent)]
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
pub struct Guid([u8; 16]);

impl Guid {
    pub const ZERO: Guid = Guid([0; 16]);

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid.to_bytes_le())
    }

    pub fn to_uuid(self) -> Uuid {
        Uuid::from_bytes_le(self.0)
    }

    /// Generates a random (version 4) GUID.
    pub fn new_random() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Parses the textual form of a GUID, in any case.
    pub fn parse(text: &str) -> Option<Self> {
        Uuid::try_parse(text.trim()).ok().map(Self::from_uuid)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.to_uuid())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

bitflags! {
    /// Attribute bits of a partition entry.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GptAttributes: u64 {
        /// The platform requires this partition to function.
        const REQUIRED_PARTITION = 1 << 0;

        /// EFI firmware must not produce a block I/O protocol for this partition.
        const NO_BLOCK_IO_PROTOCOL = 1 << 1;

        /// Legacy BIOS bootable.
        const LEGACY_BIOS_BOOTABLE = 1 << 2;
    }
}

impl Display for GptAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut words = Vec::new();

        if self.contains(Self::REQUIRED_PARTITION) {
            words.push(String::from("RequiredPartition"));
        }
        if self.contains(Self::NO_BLOCK_IO_PROTOCOL) {
            words.push(String::from("NoBlockIOProtocol"));
        }
        if self.contains(Self::LEGACY_BIOS_BOOTABLE) {
            words.push(String::from("LegacyBIOSBootable"));
        }

        let guid_bits: Vec<String> = (48..64u32)
            .filter(|&bit| self.bits() & (1u64 << bit) != 0)
            .map(|bit| bit.to_string())
            .collect();
        if !guid_bits.is_empty() {
            words.push(format!("GUID:{}", guid_bits.join(",")));
        }

        f.write_str(&words.join(" "))
    }
}

#[derive(Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct GptHeader {
    /// Identifies EFI-compatible partition table header.
    /// Should contain the string "EFI PART".
    signature: [u8; 8],

    /// Revision number for this header.
    revision: U32,

    /// Size of the header in bytes.
    size: U32,

    /// CRC32 checksum for the header.
    checksum: U32,
    reserved: [u8; 4],

    /// The LBA that contains this structure.
    lba: U64,

    /// The LBA of the alternate `GPT` header.
    alternate_lba: U64,

    /// First logical block that may be used by a partition.
    first_usable_lba: U64,

    /// Last logical block that may be used by a partition.
    last_usable_lba: U64,

    /// GUID used to identify the disk.
    guid: Guid,

    /// Starting LBA of the GUID Partition Entry array.
    partition_start_lba: U64,

    /// Number of partitions entries in the GUID Partition Entry array.
    partition_entries_count: U32,

    /// Size in bytes of each entry in the GUID Partition Entry array.
    partition_entry_size: U32,

    /// CRC32 of the GUID Partition Entry array.
    partition_entries_checksum: U32,
}

assert_eq_size!(GptHeader, [u8; 0x5C]);
assert_eq_align!(GptHeader, u8);

impl GptHeader {
    /// Creates the primary header of a new table on a disk of `total_sectors` sectors.
    ///
    /// Fails with [`GptError::InvalidLayout`] when the disk cannot hold both copies of the
    /// entry array and at least one usable sector.
    pub fn new_primary(
        guid: Guid,
        total_sectors: u64,
        sector_size: u64,
        entries_count: u32,
    ) -> Result<Self, GptError> {
        let entries_sectors = entries_sectors(entries_count, sector_size);
        let last_lba = total_sectors.checked_sub(1).ok_or(GptError::InvalidLayout)?;
        let first_usable = 2 + entries_sectors;
        let last_usable = last_lba
            .checked_sub(entries_sectors + 1)
            .ok_or(GptError::InvalidLayout)?;

        if first_usable > last_usable {
            return Err(GptError::InvalidLayout);
        }

        let mut header = Self {
            signature: *GPT_SIG,
            revision: U32::new(GPT_REVISION),
            size: U32::new(GPT_HEADER_SIZE),
            checksum: U32::new(0),
            reserved: [0; 4],
            lba: U64::new(1),
            alternate_lba: U64::new(last_lba),
            first_usable_lba: U64::new(first_usable),
            last_usable_lba: U64::new(last_usable),
            guid,
            partition_start_lba: U64::new(2),
            partition_entries_count: U32::new(entries_count),
            partition_entry_size: U32::new(GPT_ENTRY_SIZE),
            partition_entries_checksum: U32::new(0),
        };
        header.update_checksum();

        Ok(header)
    }

    /// Parses and validates a header from the sector that holds it.
    ///
    /// The checksum covers `size` bytes of the sector, which may be more than the structure
    /// itself.
    pub fn parse_from_buf(buf: &[u8]) -> Result<Self, GptError> {
        let (header, _) =
            GptHeader::read_from_prefix(buf).map_err(|_| GptError::InvalidBufferSize)?;

        if &header.signature != GPT_SIG {
            return Err(GptError::InvalidSignature);
        }

        let size = header.size.get();
        if size < GPT_HEADER_SIZE || size as usize > buf.len() {
            return Err(GptError::InvalidHeaderSize(size));
        }

        let expected = checksum_with_zeroed_field(&buf[..size as usize]);
        if expected != header.checksum.get() {
            return Err(GptError::InvalidHeaderChecksum(
                expected,
                header.checksum.get(),
            ));
        }

        if header.partition_entry_size.get() != GPT_ENTRY_SIZE {
            return Err(GptError::UnsupportedEntrySize(
                header.partition_entry_size.get(),
            ));
        }

        let count = header.partition_entries_count.get();
        if count == 0 || count > GPT_MAX_ENTRIES {
            return Err(GptError::UnsupportedEntryCount(count));
        }

        if header.first_usable_lba() > header.last_usable_lba() {
            return Err(GptError::InvalidLayout);
        }

        Ok(header)
    }

    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut copy = self.clone();
        copy.checksum.set(0);

        crc32fast::hash(copy.as_bytes())
    }

    /// Recomputes the header checksum, after the header size is reset to the structure size.
    pub fn update_checksum(&mut self) {
        self.size.set(GPT_HEADER_SIZE);
        let checksum = self.compute_checksum();
        self.checksum.set(checksum);
    }

    /// Builds the alternate copy of this header, whose entry array starts at `entries_lba`.
    pub fn to_alternate(&self, entries_lba: u64) -> Self {
        let mut alternate = self.clone();
        alternate.lba = self.alternate_lba;
        alternate.alternate_lba = self.lba;
        alternate.partition_start_lba.set(entries_lba);
        alternate.update_checksum();

        alternate
    }

    /// Returns the number of sectors used by one copy of the entry array.
    pub fn entries_sectors(&self, sector_size: u64) -> u64 {
        entries_sectors(self.partition_entries_count(), sector_size)
    }

    /// Returns the size, in bytes, of one copy of the entry array.
    pub fn entries_bytes(&self) -> usize {
        self.partition_entries_count() as usize * self.partition_entry_size.get() as usize
    }

    pub fn signature(&self) -> [u8; 8] {
        self.signature
    }

    pub fn revision(&self) -> u32 {
        self.revision.get()
    }

    pub fn checksum(&self) -> u32 {
        self.checksum.get()
    }

    pub fn lba(&self) -> u64 {
        self.lba.get()
    }

    pub fn alternate_lba(&self) -> u64 {
        self.alternate_lba.get()
    }

    pub fn set_alternate_lba(&mut self, lba: u64) {
        self.alternate_lba.set(lba);
    }

    pub fn first_usable_lba(&self) -> u64 {
        self.first_usable_lba.get()
    }

    pub fn last_usable_lba(&self) -> u64 {
        self.last_usable_lba.get()
    }

    pub fn set_last_usable_lba(&mut self, lba: u64) {
        self.last_usable_lba.set(lba);
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn partition_start_lba(&self) -> u64 {
        self.partition_start_lba.get()
    }

    pub fn set_partition_start_lba(&mut self, lba: u64) {
        self.partition_start_lba.set(lba);
    }

    pub fn partition_entries_count(&self) -> u32 {
        self.partition_entries_count.get()
    }

    pub fn partition_entry_size(&self) -> u32 {
        self.partition_entry_size.get()
    }

    pub fn partition_entries_checksum(&self) -> u32 {
        self.partition_entries_checksum.get()
    }

    pub fn set_partition_entries_checksum(&mut self, checksum: u32) {
        self.partition_entries_checksum.set(checksum);
    }
}

/// Number of sectors needed to hold `entries_count` entries.
pub fn entries_sectors(entries_count: u32, sector_size: u64) -> u64 {
    (u64::from(entries_count) * u64::from(GPT_ENTRY_SIZE)).div_ceil(sector_size)
}

fn checksum_with_zeroed_field(header_bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header_bytes[..16]);
    hasher.update(&[0u8; 4]);
    hasher.update(&header_bytes[20..]);

    hasher.finalize()
}

#[derive(Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct GptEntry {
    /// Defines the purpose and type of this partition.
    type_guid: Guid,

    /// GUID unique for every partition entry.
    partition_guid: Guid,

    /// Starting LBA of this partition.
    start_lba: U64,

    /// Last LBA of this partition.
    last_lba: U64,

    /// Partition's attributes bits.
    attributes: U64,

    /// Null-terminated string containing a human-readable name of this partition.
    partition_name: [U16; GPT_NAME_LEN],
}

assert_eq_size!(GptEntry, [u8; 0x80]);
assert_eq_align!(GptEntry, u8);

impl GptEntry {
    /// Creates a used entry covering `start_lba..=last_lba`.
    pub fn new(type_guid: Guid, partition_guid: Guid, start_lba: u64, last_lba: u64) -> Self {
        Self {
            type_guid,
            partition_guid,
            start_lba: U64::new(start_lba),
            last_lba: U64::new(last_lba),
            attributes: U64::new(0),
            partition_name: [U16::new(0); GPT_NAME_LEN],
        }
    }

    /// Returns this partition's sectors count, zero if the bounds are reversed.
    pub fn size(&self) -> u64 {
        self.last_lba()
            .checked_sub(self.start_lba())
            .map_or(0, |span| span.saturating_add(1))
    }

    pub fn is_used(&self) -> bool {
        !self.type_guid.is_zero()
    }

    /// Decodes the partition name, replacing invalid UTF-16 sequences.
    pub fn name(&self) -> String {
        let units = self
            .partition_name
            .iter()
            .map(|unit| unit.get())
            .take_while(|&unit| unit != 0);

        char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }

    /// Stores `name`, truncated to the number of UTF-16 units an entry can hold.
    pub fn set_name(&mut self, name: &str) {
        self.partition_name = [U16::new(0); GPT_NAME_LEN];

        for (slot, unit) in self.partition_name.iter_mut().zip(name.encode_utf16()) {
            slot.set(unit);
        }
    }

    pub fn type_guid(&self) -> Guid {
        self.type_guid
    }

    pub fn set_type_guid(&mut self, guid: Guid) {
        self.type_guid = guid;
    }

    pub fn partition_guid(&self) -> Guid {
        self.partition_guid
    }

    pub fn start_lba(&self) -> u64 {
        self.start_lba.get()
    }

    pub fn last_lba(&self) -> u64 {
        self.last_lba.get()
    }

    pub fn attributes(&self) -> GptAttributes {
        GptAttributes::from_bits_retain(self.attributes.get())
    }

    pub fn set_attributes(&mut self, attributes: GptAttributes) {
        self.attributes.set(attributes.bits());
    }
}

impl Default for GptEntry {
    fn default() -> Self {
        Self::new(Guid::ZERO, Guid::ZERO, 0, 0)
    }
}

/// Decodes an entry array.
pub fn parse_entries(buf: &[u8], count: u32) -> Result<Vec<GptEntry>, GptError> {
    let needed = count as usize * GPT_ENTRY_SIZE as usize;
    if buf.len() < needed {
        return Err(GptError::InvalidBufferSize);
    }

    buf[..needed]
        .chunks_exact(GPT_ENTRY_SIZE as usize)
        .map(|chunk| GptEntry::read_from_bytes(chunk).map_err(|_| GptError::InvalidBufferSize))
        .collect()
}

/// CRC32 of an entry array, as stored in the header.
pub fn entries_checksum(entries: &[GptEntry]) -> u32 {
    crc32fast::hash(entries.as_bytes())
}
