//! GPT disk label.

use std::io::{Read, Seek, Write};

use zerocopy::IntoBytes;

use crate::{
    device::DeviceHandle,
    error::{Error, PartitionError, Result},
    gpt::{
        entries_checksum, parse_entries, GptAttributes, GptEntry, GptError, GptHeader, Guid,
        GPT_DEFAULT_ENTRIES,
    },
    mbr::Mbr,
    partition::Partition,
    parttype::{PartType, PartTypeRegistry},
    topology::Topology,
};

use super::{LabelDriver, LabelKind};

/// In-memory GPT label: protective MBR, primary header and entry array.
///
/// The backup header and entries are derived from the primary ones when writing.
#[derive(Clone, Debug)]
pub struct GptLabel {
    pmbr: Mbr,
    header: GptHeader,
    entries: Vec<GptEntry>,
    sector_size: u64,
    changed: bool,
    created: bool,
}

impl GptLabel {
    /// Reads the GPT label of the device.
    ///
    /// A corrupted primary header or entry array is recovered from the backup copy, in which case
    /// the label is marked as changed so that the next write repairs the primary copy.
    pub fn probe<D: Read + Seek>(
        handle: &mut DeviceHandle<D>,
        topology: &Topology,
    ) -> Result<Option<Self>> {
        let Some(last_lba) = topology.last_lba() else {
            return Ok(None);
        };
        if last_lba < 2 {
            return Ok(None);
        }

        let pmbr = match Mbr::parse_from_buf(&handle.read_sectors(0, 1)?) {
            Ok(mbr) if mbr.is_protective() => mbr,
            _ => return Ok(None),
        };

        let primary = read_header(handle, 1, last_lba);
        let alternate_lba = match &primary {
            Ok((header, _)) => header.alternate_lba(),
            Err(_) => last_lba,
        };

        let (header, entries, changed) = match primary {
            Ok((header, entries)) => (header, entries, false),
            Err(err) => {
                log::warn!("primary GPT header is unusable ({err}), trying the backup");

                match read_header(handle, alternate_lba, last_lba) {
                    Ok((backup, entries)) => {
                        log::warn!("using the backup GPT header at LBA {alternate_lba}");
                        (backup.to_alternate(2), entries, true)
                    }
                    Err(err) => {
                        log::debug!("backup GPT header is unusable: {err}");
                        return Ok(None);
                    }
                }
            }
        };

        if header.alternate_lba() != last_lba {
            log::warn!(
                "backup GPT header is at LBA {} but the device ends at LBA {last_lba}",
                header.alternate_lba()
            );
        }

        Ok(Some(Self {
            pmbr,
            header,
            entries,
            sector_size: handle.sector_size(),
            changed,
            created: false,
        }))
    }

    /// Creates an empty label with 128 entries and random GUIDs.
    pub fn create(topology: &Topology) -> Result<Self> {
        let header = GptHeader::new_primary(
            Guid::new_random(),
            topology.total_sectors,
            topology.sector_size,
            GPT_DEFAULT_ENTRIES,
        )
        .map_err(|_| Error::DeviceTooSmall("gpt"))?;

        let mut entries = Vec::new();
        entries.try_reserve_exact(GPT_DEFAULT_ENTRIES as usize)?;
        entries.resize(GPT_DEFAULT_ENTRIES as usize, GptEntry::default());

        Ok(Self {
            pmbr: Mbr::new_protective(topology.total_sectors),
            header,
            entries,
            sector_size: topology.sector_size,
            changed: true,
            created: true,
        })
    }

    pub fn header(&self) -> &GptHeader {
        &self.header
    }

    pub fn entries(&self) -> &[GptEntry] {
        &self.entries
    }

    fn entry_mut(&mut self, partno: usize) -> Result<&mut GptEntry> {
        partno
            .checked_sub(1)
            .and_then(|idx| self.entries.get_mut(idx))
            .filter(|entry| entry.is_used())
            .ok_or_else(|| PartitionError::NoSuchPartition(partno).into())
    }

    fn type_guid(parttype: &PartType) -> Result<Guid> {
        parttype
            .guid()
            .ok_or_else(|| PartitionError::IncompatibleType.into())
    }

    fn to_partition(&self, idx: usize, entry: &GptEntry) -> Partition {
        let type_guid = entry.type_guid();
        let parttype = self
            .registry()
            .by_guid(type_guid)
            .cloned()
            .unwrap_or_else(|| PartType::unknown_guid(type_guid));
        let attributes = entry.attributes();

        let mut partition = Partition::new();
        partition.set_partno(idx + 1);
        partition.set_start(entry.start_lba());
        partition.set_size(entry.size());
        partition.set_parttype(parttype);
        partition.set_uuid(entry.partition_guid());
        partition.set_attrs(attributes);
        partition.set_bootable(attributes.contains(GptAttributes::LEGACY_BIOS_BOOTABLE));

        let name = entry.name();
        if !name.is_empty() {
            partition.set_name(name);
        }

        partition
    }

    fn padded(bytes: &[u8], sectors: u64, sector_size: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(sectors * sector_size)
            .map_err(|_| Error::InvalidArgument("GPT entry array too large"))?;

        let mut buf = Vec::new();
        buf.try_reserve_exact(len.max(bytes.len()))?;
        buf.extend_from_slice(bytes);
        buf.resize(len.max(bytes.len()), 0);

        Ok(buf)
    }
}

/// Reads and validates the header at `lba`, then the entry array it points to.
///
/// Every used entry must lie inside the usable area, which must itself end before `last_lba`.
fn read_header<D: Read + Seek>(
    handle: &mut DeviceHandle<D>,
    lba: u64,
    last_lba: u64,
) -> Result<(GptHeader, Vec<GptEntry>)> {
    let sector = handle.read_sectors(lba, 1)?;
    let header = GptHeader::parse_from_buf(&sector)?;

    if header.lba() != lba {
        return Err(GptError::UnexpectedLba(lba).into());
    }
    if header.last_usable_lba() > last_lba {
        return Err(GptError::InvalidLayout.into());
    }

    let sectors = header.entries_sectors(handle.sector_size());
    let raw = handle.read_sectors(header.partition_start_lba(), sectors)?;
    let entries = parse_entries(&raw, header.partition_entries_count())?;

    let checksum = entries_checksum(&entries);
    if checksum != header.partition_entries_checksum() {
        return Err(GptError::InvalidEntriesChecksum(
            checksum,
            header.partition_entries_checksum(),
        )
        .into());
    }

    let usable = header.first_usable_lba()..=header.last_usable_lba();
    if let Some(idx) = entries.iter().position(|entry| {
        entry.is_used()
            && !(entry.start_lba() <= entry.last_lba()
                && usable.contains(&entry.start_lba())
                && usable.contains(&entry.last_lba()))
    }) {
        return Err(GptError::InvalidEntry(idx).into());
    }

    Ok((header, entries))
}

impl LabelDriver for GptLabel {
    fn kind(&self) -> LabelKind {
        LabelKind::Gpt
    }

    fn registry(&self) -> &'static PartTypeRegistry {
        PartTypeRegistry::gpt()
    }

    fn disk_identifier(&self) -> String {
        self.header.guid().to_string()
    }

    fn is_changed(&self) -> bool {
        self.changed
    }

    fn is_created(&self) -> bool {
        self.created
    }

    fn first_usable_lba(&self) -> u64 {
        self.header.first_usable_lba()
    }

    fn last_usable_lba(&self) -> u64 {
        self.header.last_usable_lba()
    }

    fn max_partitions(&self) -> usize {
        self.entries.len()
    }

    fn partitions(&self) -> Vec<Partition> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_used())
            .map(|(idx, entry)| self.to_partition(idx, entry))
            .collect()
    }

    fn add_partition(&mut self, partition: &Partition, topology: &Topology) -> Result<usize> {
        let resolved = self.resolve_follow_defaults(partition, topology)?;
        let (Some(partno), Some(start), Some(end)) =
            (resolved.partno(), resolved.start(), resolved.end())
        else {
            return Err(PartitionError::MissingStart.into());
        };

        let type_guid = match resolved.parttype() {
            Some(parttype) => Self::type_guid(parttype)?,
            None => Self::type_guid(self.registry().default_type())?,
        };

        let mut entry = GptEntry::new(
            type_guid,
            resolved.uuid().unwrap_or_else(Guid::new_random),
            start,
            end,
        );
        if let Some(name) = resolved.name() {
            entry.set_name(name);
        }

        let mut attributes = resolved.attrs().unwrap_or_default();
        attributes.set(GptAttributes::LEGACY_BIOS_BOOTABLE, resolved.is_bootable());
        entry.set_attributes(attributes);

        self.entries[partno - 1] = entry;
        self.changed = true;
        log::debug!("added GPT partition {partno} ({start}..={end}, type {type_guid})");

        Ok(partno)
    }

    fn delete_partition(&mut self, partno: usize) -> Result<()> {
        *self.entry_mut(partno)? = GptEntry::default();
        self.changed = true;

        Ok(())
    }

    fn set_partition_type(&mut self, partno: usize, parttype: &PartType) -> Result<()> {
        let guid = Self::type_guid(parttype)?;
        self.entry_mut(partno)?.set_type_guid(guid);
        self.changed = true;

        Ok(())
    }

    fn set_partition_bootable(&mut self, partno: usize, bootable: bool) -> Result<()> {
        let entry = self.entry_mut(partno)?;
        let mut attributes = entry.attributes();
        attributes.set(GptAttributes::LEGACY_BIOS_BOOTABLE, bootable);
        entry.set_attributes(attributes);
        self.changed = true;

        Ok(())
    }

    fn write<D: Read + Write + Seek>(&mut self, handle: &mut DeviceHandle<D>) -> Result<()> {
        let sector_size = handle.sector_size();
        if sector_size != self.sector_size {
            return Err(Error::InvalidArgument(
                "sector size changed since the label was read",
            ));
        }

        self.header
            .set_partition_entries_checksum(entries_checksum(&self.entries));
        self.header.update_checksum();

        let entries_sectors = self.header.entries_sectors(sector_size);
        let backup_entries_lba = self
            .header
            .alternate_lba()
            .checked_sub(entries_sectors)
            .ok_or(GptError::InvalidLayout)?;
        let backup = self.header.to_alternate(backup_entries_lba);

        let entries = Self::padded(self.entries.as_bytes(), entries_sectors, sector_size)?;

        // Backup copy goes out before the primary one.
        handle.write_sectors(backup_entries_lba, &entries)?;
        handle.write_sectors(
            backup.lba(),
            &Self::padded(backup.as_bytes(), 1, sector_size)?,
        )?;

        handle.write_sectors(self.header.partition_start_lba(), &entries)?;
        handle.write_sectors(
            self.header.lba(),
            &Self::padded(self.header.as_bytes(), 1, sector_size)?,
        )?;

        let mut sector = handle.read_sectors(0, 1)?;
        self.pmbr.write(&mut sector)?;
        handle.write_sectors(0, &sector)?;

        self.changed = false;
        self.created = false;
        log::info!("wrote GPT label {}", self.disk_identifier());

        Ok(())
    }
}
