//! Device geometry and the alignment policy derived from it.

#[cfg(target_os = "linux")]
use std::path::Path;
use std::fs::File;

use crate::{device::DeviceHandle, error::Result};

/// Size of a mebibyte, the default partition alignment.
const MIB: u64 = 1024 * 1024;

/// Sector size assumed for regular files and devices that do not report one.
pub const DEFAULT_SECTOR_SIZE: u64 = 512;

/// I/O limits of a device and the number of addressable sectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Topology {
    /// Logical sector size, the LBA unit.
    pub sector_size: u64,

    /// Physical sector size.
    pub phy_sector_size: u64,

    /// Minimum I/O size.
    pub min_io_size: u64,

    /// Optimal I/O size, zero when unknown.
    pub optimal_io_size: u64,

    /// Offset (in bytes) of the first naturally aligned sector.
    pub alignment_offset: u64,

    /// Number of logical sectors.
    pub total_sectors: u64,
}

impl Topology {
    /// Topology of a plain image of `size_bytes` bytes with `sector_size`-byte sectors.
    pub fn for_size(size_bytes: u64, sector_size: u64) -> Self {
        Self {
            sector_size,
            phy_sector_size: sector_size,
            min_io_size: sector_size,
            optimal_io_size: 0,
            alignment_offset: 0,
            total_sectors: size_bytes / sector_size,
        }
    }

    /// Probes the device behind `handle`.
    ///
    /// Block devices report their limits through sysfs on Linux. Regular files (and any device
    /// whose limits cannot be read) use `sector_size`, or 512 bytes if none is given. An explicit
    /// `sector_size` always overrides the logical sector size reported by the device.
    pub fn probe(handle: &mut DeviceHandle<File>, sector_size: Option<u64>) -> Result<Self> {
        let size_bytes = handle.size_bytes()?;
        let mut topology = Self::for_size(size_bytes, sector_size.unwrap_or(DEFAULT_SECTOR_SIZE));

        #[cfg(target_os = "linux")]
        if let Some(limits) = block_device_limits(handle.storage(), handle.path())? {
            let logical = sector_size.unwrap_or(limits.logical);

            topology = Self {
                sector_size: logical,
                phy_sector_size: limits.physical.max(logical),
                min_io_size: limits.min_io.max(logical),
                optimal_io_size: limits.optimal_io,
                alignment_offset: limits.alignment_offset,
                total_sectors: size_bytes / logical,
            };
        }

        log::debug!(
            "topology of {}: {:?}",
            handle.path().display(),
            topology
        );
        handle.set_sector_size(topology.sector_size);

        Ok(topology)
    }

    /// Size of the device, in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.total_sectors * self.sector_size
    }

    /// Returns the last addressable LBA, if the device holds any sector.
    pub fn last_lba(&self) -> Option<u64> {
        self.total_sectors.checked_sub(1)
    }

    fn phy_sectors(&self) -> u64 {
        (self.phy_sector_size / self.sector_size).max(1)
    }

    /// Lowest LBA offered for partitions.
    ///
    /// One mebibyte (or the optimal I/O size / alignment offset when larger), except on devices
    /// smaller than four times that, where a single physical sector is used.
    pub fn first_lba(&self) -> u64 {
        let mut align = self.optimal_io_size.max(MIB);
        if self.alignment_offset > align {
            align = self.alignment_offset;
        }

        let first = align / self.sector_size;
        if self.total_sectors <= first * 4 {
            return self.phy_sectors();
        }

        first
    }

    /// Alignment unit of partition starts and sizes, in bytes.
    pub fn grain(&self) -> u64 {
        let grain = self.optimal_io_size.max(MIB);

        if self.total_sectors <= (grain * 4) / self.sector_size {
            return self.phy_sector_size;
        }

        grain
    }

    /// Grain expressed in sectors.
    pub fn grain_sectors(&self) -> u64 {
        (self.grain() / self.sector_size).max(1)
    }

    fn offset_sectors(&self) -> u64 {
        self.alignment_offset / self.sector_size
    }

    /// Rounds `lba` down to the closest aligned sector.
    pub fn align_down(&self, lba: u64) -> u64 {
        let grain = self.grain_sectors();
        let offset = self.offset_sectors() % grain;

        if lba < offset {
            return lba;
        }

        (lba - offset) / grain * grain + offset
    }

    /// Rounds `lba` up to the closest aligned sector.
    pub fn align_up(&self, lba: u64) -> u64 {
        let down = self.align_down(lba);

        if down == lba {
            lba
        } else {
            down.saturating_add(self.grain_sectors())
        }
    }

    /// Returns `true` if `lba` starts on a physical sector boundary.
    pub fn is_aligned(&self, lba: u64) -> bool {
        let offset = self.offset_sectors();
        let phy = self.phy_sectors();

        lba >= offset && (lba - offset) % phy == 0
    }
}

#[cfg(target_os = "linux")]
struct BlockLimits {
    logical: u64,
    physical: u64,
    min_io: u64,
    optimal_io: u64,
    alignment_offset: u64,
}

#[cfg(target_os = "linux")]
fn block_device_limits(file: &File, path: &Path) -> Result<Option<BlockLimits>> {
    use std::{fs, os::unix::fs::FileTypeExt};

    if !file.metadata()?.file_type().is_block_device() {
        return Ok(None);
    }

    let canonical = fs::canonicalize(path)?;
    let Some(name) = canonical.file_name() else {
        return Ok(None);
    };
    let sysfs = Path::new("/sys/class/block").join(name);

    let read = |attr: &str| -> Option<u64> {
        fs::read_to_string(sysfs.join(attr))
            .ok()
            .and_then(|text| text.trim().parse().ok())
    };

    let Some(logical) = read("queue/logical_block_size") else {
        log::debug!("no sysfs limits for {}", canonical.display());
        return Ok(None);
    };

    Ok(Some(BlockLimits {
        logical,
        physical: read("queue/physical_block_size").unwrap_or(logical),
        min_io: read("queue/minimum_io_size").unwrap_or(logical),
        optimal_io: read("queue/optimal_io_size").unwrap_or(0),
        alignment_offset: read("alignment_offset").unwrap_or(0),
    }))
}

#[cfg(test)]
mod tests {
    use super::Topology;

    #[test]
    fn small_images_align_on_physical_sectors() {
        let topology = Topology::for_size(2048 * 512, 512);

        assert_eq!(topology.total_sectors, 2048);
        assert_eq!(topology.first_lba(), 1);
        assert_eq!(topology.grain(), 512);
        assert_eq!(topology.align_up(5), 5);
    }

    #[test]
    fn default_alignment_is_one_mebibyte() {
        let topology = Topology::for_size(16 * 1024 * 1024, 512);

        assert_eq!(topology.first_lba(), 2048);
        assert_eq!(topology.grain_sectors(), 2048);
        assert_eq!(topology.align_up(34), 2048);
        assert_eq!(topology.align_up(2048), 2048);
        assert_eq!(topology.align_down(4095), 2048);
        assert!(topology.is_aligned(3));
    }

    #[test]
    fn alignment_offset_shifts_the_grid() {
        let topology = Topology {
            phy_sector_size: 4096,
            alignment_offset: 3584,
            ..Topology::for_size(64 * 1024 * 1024, 512)
        };

        assert_eq!(topology.align_up(2048), 2055);
        assert_eq!(topology.align_down(2054), 7);
        assert!(topology.is_aligned(15));
        assert!(!topology.is_aligned(16));
    }

    #[test]
    fn large_sectors() {
        let topology = Topology::for_size(64 * 1024 * 1024, 4096);

        assert_eq!(topology.first_lba(), 256);
        assert_eq!(topology.last_lba(), Some(16383));
    }
}
