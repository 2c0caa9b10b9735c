//! DOS (MBR) disk label, primary partitions only.

use std::io::{Read, Seek, Write};

use crate::{
    device::DeviceHandle,
    error::{Error, PartitionError, Result},
    gpt::GPT_SIG,
    mbr::{Mbr, MbrPartition, MBR_PARTITION_COUNT},
    partition::Partition,
    parttype::{PartType, PartTypeRegistry},
    topology::Topology,
};

use super::{LabelDriver, LabelKind};

/// Last sector a DOS entry can address, with 32-bit LBA fields.
const DOS_MAX_LBA: u64 = u32::MAX as u64;

fn warn_if_too_large(total_sectors: u64) {
    if total_sectors > DOS_MAX_LBA + 1 {
        log::warn!(
            "device has {total_sectors} sectors, DOS labels stop at sector {DOS_MAX_LBA}"
        );
    }
}

/// In-memory DOS label.
///
/// The whole boot sector is kept, so that the boot code survives a rewrite of the table.
#[derive(Clone, Debug)]
pub struct DosLabel {
    mbr: Mbr,
    total_sectors: u64,
    changed: bool,
    created: bool,
}

impl DosLabel {
    /// Reads the DOS label of the device, if it has a valid one.
    pub fn probe<D: Read + Seek>(
        handle: &mut DeviceHandle<D>,
        topology: &Topology,
    ) -> Result<Option<Self>> {
        let sector = handle.read_sectors(0, 1)?;

        let mbr = match Mbr::parse_from_buf(&sector) {
            Ok(mbr) => mbr,
            Err(err) => {
                log::debug!("no DOS label: {err}");
                return Ok(None);
            }
        };

        if mbr.is_protective() {
            log::warn!("protective MBR without a valid GPT, reading it as a DOS label");
        }
        warn_if_too_large(topology.total_sectors);

        Ok(Some(Self {
            mbr,
            total_sectors: topology.total_sectors,
            changed: false,
            created: false,
        }))
    }

    /// Creates an empty label with a random disk identifier.
    pub fn create(topology: &Topology) -> Result<Self> {
        if topology.total_sectors < 2 {
            return Err(Error::DeviceTooSmall("dos"));
        }
        warn_if_too_large(topology.total_sectors);

        let disk_id = loop {
            let id = rand::random::<u32>();
            if id != 0 {
                break id;
            }
        };

        Ok(Self {
            mbr: Mbr::new(disk_id),
            total_sectors: topology.total_sectors,
            changed: true,
            created: true,
        })
    }

    pub fn mbr(&self) -> &Mbr {
        &self.mbr
    }

    pub fn disk_id(&self) -> u32 {
        self.mbr.disk_id()
    }

    fn entry_mut(&mut self, partno: usize) -> Result<&mut MbrPartition> {
        partno
            .checked_sub(1)
            .and_then(|idx| self.mbr.partitions.get_mut(idx))
            .filter(|entry| entry.is_used())
            .ok_or_else(|| PartitionError::NoSuchPartition(partno).into())
    }

    fn type_code(parttype: &PartType) -> Result<u8> {
        parttype
            .code()
            .and_then(|code| u8::try_from(code).ok())
            .ok_or_else(|| PartitionError::IncompatibleType.into())
    }

    fn to_partition(&self, idx: usize, entry: &MbrPartition) -> Partition {
        let code = entry.partition_type();
        let parttype = self
            .registry()
            .by_code(u32::from(code))
            .cloned()
            .unwrap_or_else(|| PartType::unknown_code(code));

        let mut partition = Partition::new();
        partition.set_partno(idx + 1);
        partition.set_start(u64::from(entry.start_lba()));
        partition.set_size(u64::from(entry.sectors_count()));
        partition.set_parttype(parttype);
        partition.set_bootable(entry.is_active().unwrap_or(false));

        partition
    }
}

impl LabelDriver for DosLabel {
    fn kind(&self) -> LabelKind {
        LabelKind::Dos
    }

    fn registry(&self) -> &'static PartTypeRegistry {
        PartTypeRegistry::dos()
    }

    fn disk_identifier(&self) -> String {
        format!("0x{:08x}", self.mbr.disk_id())
    }

    fn is_changed(&self) -> bool {
        self.changed
    }

    fn is_created(&self) -> bool {
        self.created
    }

    fn first_usable_lba(&self) -> u64 {
        1
    }

    fn last_usable_lba(&self) -> u64 {
        self.total_sectors.saturating_sub(1).min(DOS_MAX_LBA)
    }

    fn max_partitions(&self) -> usize {
        MBR_PARTITION_COUNT
    }

    fn partitions(&self) -> Vec<Partition> {
        self.mbr
            .partitions
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_used())
            .map(|(idx, entry)| self.to_partition(idx, entry))
            .collect()
    }

    fn add_partition(&mut self, partition: &Partition, topology: &Topology) -> Result<usize> {
        let resolved = self.resolve_follow_defaults(partition, topology)?;
        let (Some(partno), Some(start), Some(size)) =
            (resolved.partno(), resolved.start(), resolved.size())
        else {
            return Err(PartitionError::MissingStart.into());
        };

        let start = u32::try_from(start).map_err(|_| PartitionError::TooLarge)?;
        let size = u32::try_from(size).map_err(|_| PartitionError::TooLarge)?;

        let code = match resolved.parttype() {
            Some(parttype) => Self::type_code(parttype)?,
            None => Self::type_code(self.registry().default_type())?,
        };

        let entry = &mut self.mbr.partitions[partno - 1];
        entry.clear();
        entry.set_start_lba(start);
        entry.set_sectors_count(size);
        entry.set_partition_type(code);
        entry.set_active(resolved.is_bootable());
        entry.update_chs();

        self.changed = true;
        log::debug!("added DOS partition {partno} ({start}+{size}, type {code:#04x})");

        Ok(partno)
    }

    fn delete_partition(&mut self, partno: usize) -> Result<()> {
        self.entry_mut(partno)?.clear();
        self.changed = true;

        Ok(())
    }

    fn set_partition_type(&mut self, partno: usize, parttype: &PartType) -> Result<()> {
        let code = Self::type_code(parttype)?;
        self.entry_mut(partno)?.set_partition_type(code);
        self.changed = true;

        Ok(())
    }

    fn set_partition_bootable(&mut self, partno: usize, bootable: bool) -> Result<()> {
        self.entry_mut(partno)?.set_active(bootable);
        self.changed = true;

        Ok(())
    }

    fn write<D: Read + Write + Seek>(&mut self, handle: &mut DeviceHandle<D>) -> Result<()> {
        for entry in self.mbr.partitions.iter_mut() {
            entry.update_chs();
        }

        // Sectors larger than 512 bytes keep whatever follows the boot record.
        let mut sector = handle.read_sectors(0, 1)?;
        self.mbr.write(&mut sector)?;
        handle.write_sectors(0, &sector)?;

        self.changed = false;
        self.created = false;
        log::info!("wrote DOS label {}", self.disk_identifier());

        Ok(())
    }

    /// Clears the primary and backup GPT headers, which would otherwise take precedence over
    /// this label on the next detection.
    fn wipe_foreign_signatures<D: Read + Write + Seek>(
        &self,
        handle: &mut DeviceHandle<D>,
    ) -> Result<()> {
        let mut candidates = vec![1];
        if let Some(last) = self.total_sectors.checked_sub(1) {
            candidates.push(last);
        }

        for lba in candidates {
            if lba >= self.total_sectors {
                continue;
            }

            let sector = handle.read_sectors(lba, 1)?;
            if sector.starts_with(GPT_SIG) {
                log::info!("wiping GPT header at LBA {lba}");
                handle.write_sectors(lba, &vec![0u8; sector.len()])?;
            }
        }

        Ok(())
    }
}
