//! Filesystem and volume signature probing.
//!
//! Only looks at well-known magic strings, to name what a partition contains or to erase stale
//! signatures before a new label is written. Nothing here interprets a filesystem further.

use std::io::{Read, Seek, Write};

use zerocopy::{byteorder::little_endian::U32, FromBytes};

use crate::{device::DeviceHandle, error::Result};

/// A magic string identifying a filesystem or volume format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    /// Name of the format, as blkid reports it.
    pub name: &'static str,

    /// Byte offset of the magic, from the start of the partition.
    pub offset: usize,

    pub magic: &'static [u8],
}

impl Signature {
    const fn new(name: &'static str, offset: usize, magic: &'static [u8]) -> Self {
        Self {
            name,
            offset,
            magic,
        }
    }

    fn matches(&self, window: &[u8]) -> bool {
        window
            .get(self.offset..self.offset + self.magic.len())
            .is_some_and(|bytes| bytes == self.magic)
    }
}

const EXT_SUPERBLOCK: usize = 0x400;
const EXT_MAGIC: Signature = Signature::new("ext2", EXT_SUPERBLOCK + 0x38, &[0x53, 0xEF]);
const EXT_FEATURE_COMPAT_HAS_JOURNAL: u32 = 0x0004;
const EXT_FEATURE_INCOMPAT_EXT4: u32 = 0x0040 | 0x0080 | 0x0200;

const SIGNATURES: &[Signature] = &[
    Signature::new("crypto_LUKS", 0, b"LUKS\xba\xbe"),
    Signature::new("xfs", 0, b"XFSB"),
    Signature::new("btrfs", 0x10040, b"_BHRfS_M"),
    Signature::new("ntfs", 3, b"NTFS    "),
    Signature::new("exfat", 3, b"EXFAT   "),
    Signature::new("vfat", 0x52, b"FAT32   "),
    Signature::new("vfat", 0x36, b"FAT16   "),
    Signature::new("vfat", 0x36, b"FAT12   "),
    Signature::new("swap", 0xFF6, b"SWAPSPACE2"),
    Signature::new("swap", 0xFF6, b"SWAP-SPACE"),
    Signature::new("LVM2_member", 0x218, b"LVM2 001"),
    Signature::new("iso9660", 0x8001, b"CD001"),
];

/// Bytes read from the start of a partition, enough to cover every signature.
const WINDOW: u64 = 0x10048;

fn read_window<D: Read + Seek>(
    handle: &mut DeviceHandle<D>,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>> {
    let mut window = vec![0u8; WINDOW.min(len) as usize];
    handle.read_at(offset, &mut window)?;

    Ok(window)
}

fn ext_variant(window: &[u8]) -> &'static str {
    let feature = |at: usize| {
        window
            .get(EXT_SUPERBLOCK + at..)
            .and_then(|bytes| U32::read_from_prefix(bytes).ok())
            .map_or(0, |(value, _)| value.get())
    };

    if feature(0x60) & EXT_FEATURE_INCOMPAT_EXT4 != 0 {
        "ext4"
    } else if feature(0x5C) & EXT_FEATURE_COMPAT_HAS_JOURNAL != 0 {
        "ext3"
    } else {
        "ext2"
    }
}

fn find_all(window: &[u8]) -> Vec<Signature> {
    let mut found: Vec<Signature> = SIGNATURES
        .iter()
        .filter(|sig| sig.matches(window))
        .copied()
        .collect();

    if EXT_MAGIC.matches(window) {
        found.push(Signature {
            name: ext_variant(window),
            ..EXT_MAGIC
        });
    }

    found
}

/// Names the format stored in the `len` bytes at `offset`, if any signature matches.
pub fn probe<D: Read + Seek>(
    handle: &mut DeviceHandle<D>,
    offset: u64,
    len: u64,
) -> Result<Option<&'static str>> {
    let window = read_window(handle, offset, len)?;
    let name = find_all(&window).first().map(|sig| sig.name);

    log::trace!("signature at offset {offset}: {name:?}");

    Ok(name)
}

/// Zeroes every signature found in the `len` bytes at `offset`, returning the erased ones.
pub fn wipe<D: Read + Write + Seek>(
    handle: &mut DeviceHandle<D>,
    offset: u64,
    len: u64,
) -> Result<Vec<Signature>> {
    let window = read_window(handle, offset, len)?;
    let found = find_all(&window);

    for sig in &found {
        log::info!("wiping {} signature at offset {}", sig.name, offset + sig.offset as u64);
        handle.write_at(offset + sig.offset as u64, &vec![0u8; sig.magic.len()])?;
    }

    Ok(found)
}
