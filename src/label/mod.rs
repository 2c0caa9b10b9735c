//! Disk label drivers.
//!
//! A label is the partition table format of a disk. Every format implements [`LabelDriver`], and
//! [`Label`] holds whichever one was detected on, or created for, a device.

use std::{
    fmt::{self, Display},
    io::{Read, Seek, Write},
    str::FromStr,
};

use crate::{
    device::DeviceHandle,
    error::{Error, PartitionError, Result},
    partition::{Partition, Setting},
    parttype::{PartType, PartTypeRegistry},
    topology::Topology,
};

pub mod dos;
pub mod gpt;

pub use dos::DosLabel;
pub use gpt::GptLabel;

/// Disk label formats, with their libfdisk tag values.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LabelKind {
    Dos = 2,
    Sun = 4,
    Sgi = 8,
    Bsd = 16,
    Gpt = 32,
}

impl LabelKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Dos => "dos",
            Self::Sun => "sun",
            Self::Sgi => "sgi",
            Self::Bsd => "bsd",
            Self::Gpt => "gpt",
        }
    }

    /// Returns `true` if this crate can read and write labels of this format.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Dos | Self::Gpt)
    }
}

impl Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LabelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dos" | "mbr" => Ok(Self::Dos),
            "gpt" => Ok(Self::Gpt),
            "sun" => Ok(Self::Sun),
            "sgi" => Ok(Self::Sgi),
            "bsd" => Ok(Self::Bsd),
            _ => Err(Error::UnsupportedFormat(s.to_owned())),
        }
    }
}

impl TryFrom<u32> for LabelKind {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            2 => Ok(Self::Dos),
            4 => Ok(Self::Sun),
            8 => Ok(Self::Sgi),
            16 => Ok(Self::Bsd),
            32 => Ok(Self::Gpt),
            _ => Err(Error::UnsupportedFormat(format!("{value:#x}"))),
        }
    }
}

/// Unpartitioned area between the first and last usable sectors, bounds included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeSpace {
    pub start: u64,
    pub end: u64,
}

impl FreeSpace {
    /// Size of the area, in sectors.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    fn contains(&self, lba: u64) -> bool {
        self.start <= lba && lba <= self.end
    }
}

/// Operations shared by every label format.
pub trait LabelDriver {
    fn kind(&self) -> LabelKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Partition types known to this format.
    fn registry(&self) -> &'static PartTypeRegistry;

    /// Returns `true` if partition types are numeric codes rather than strings.
    fn has_code_types(&self) -> bool {
        self.registry().has_code_types()
    }

    /// Identifier of the disk, as displayed by fdisk.
    fn disk_identifier(&self) -> String;

    /// Returns `true` if the in-memory label differs from the device.
    fn is_changed(&self) -> bool;

    /// Returns `true` if the label was created in memory and never written.
    fn is_created(&self) -> bool;

    fn first_usable_lba(&self) -> u64;

    fn last_usable_lba(&self) -> u64;

    /// Number of partition entries of the label.
    fn max_partitions(&self) -> usize;

    /// Used entries, in on-disk order.
    fn partitions(&self) -> Vec<Partition>;

    /// Installs `partition`, resolving its follow-default attributes first.
    ///
    /// Returns the number of the new partition.
    fn add_partition(&mut self, partition: &Partition, topology: &Topology) -> Result<usize>;

    fn delete_partition(&mut self, partno: usize) -> Result<()>;

    fn set_partition_type(&mut self, partno: usize, parttype: &PartType) -> Result<()>;

    fn set_partition_bootable(&mut self, partno: usize, bootable: bool) -> Result<()>;

    /// Serializes the label to the device and clears the changed and created flags.
    fn write<D: Read + Write + Seek>(&mut self, handle: &mut DeviceHandle<D>) -> Result<()>;

    /// Erases structures of other label formats that would survive [`LabelDriver::write`].
    fn wipe_foreign_signatures<D: Read + Write + Seek>(
        &self,
        _handle: &mut DeviceHandle<D>,
    ) -> Result<()> {
        Ok(())
    }

    fn parttype_from_code(&self, code: u32) -> Result<PartType> {
        if !self.has_code_types() {
            return Err(Error::UnsupportedOperation {
                label: self.name(),
                op: "partition type lookup by code",
            });
        }

        self.registry()
            .by_code(code)
            .cloned()
            .ok_or_else(|| Error::TypeNotFound(format!("{code:#x}")))
    }

    fn parttype_from_string(&self, typestr: &str) -> Result<PartType> {
        if self.has_code_types() {
            return Err(Error::UnsupportedOperation {
                label: self.name(),
                op: "partition type lookup by string",
            });
        }

        self.registry()
            .by_string(typestr)
            .cloned()
            .ok_or_else(|| Error::TypeNotFound(typestr.to_owned()))
    }

    /// Parses user input into a partition type: a shortcut, an alias or the native code/GUID.
    fn parse_parttype(&self, text: &str) -> Result<PartType> {
        self.registry()
            .parse(text)
            .cloned()
            .ok_or_else(|| Error::TypeNotFound(text.to_owned()))
    }

    fn free_spaces(&self) -> Vec<FreeSpace> {
        free_spaces(
            &self.partitions(),
            self.first_usable_lba(),
            self.last_usable_lba(),
        )
    }

    /// Computes the partition number, start and size of `partition` against the current table.
    ///
    /// The returned partition has all three attributes set to explicit values.
    fn resolve_follow_defaults(
        &self,
        partition: &Partition,
        topology: &Topology,
    ) -> Result<Partition> {
        let used = self.partitions();
        let first = self.first_usable_lba();
        let last = self.last_usable_lba();

        let partno = resolve_partno(partition.partno_setting(), &used, self.max_partitions())?;

        let gaps = free_spaces(&used, first, last);
        let (start, gap) = match partition.start_setting() {
            Setting::Unset => return Err(PartitionError::MissingStart.into()),
            Setting::Value(start) => {
                if start < first || start > last {
                    return Err(PartitionError::OutOfBounds.into());
                }
                if let Some(other) = used.iter().find(|p| p.overlaps(start, start)) {
                    return Err(PartitionError::Overlap(other.partno().unwrap_or(0)).into());
                }
                if !topology.is_aligned(start) {
                    return Err(PartitionError::Misaligned(start).into());
                }

                let gap = gaps
                    .iter()
                    .copied()
                    .find(|gap| gap.contains(start))
                    .ok_or(PartitionError::NoFreeSpace)?;
                (start, gap)
            }
            Setting::FollowDefault => {
                let lowest = first.max(topology.first_lba());

                gaps.iter()
                    .filter(|gap| gap.end >= lowest)
                    .find_map(|gap| {
                        let start = topology.align_up(gap.start.max(lowest));
                        if start > gap.end {
                            return None;
                        }
                        let fits = match partition.size_setting() {
                            Setting::Value(size) if size > 0 => {
                                start.saturating_add(size - 1) <= gap.end
                            }
                            _ => true,
                        };
                        fits.then_some((start, *gap))
                    })
                    .ok_or(PartitionError::NoFreeSpace)?
            }
        };

        let size = match partition.size_setting() {
            Setting::Unset => return Err(PartitionError::MissingSize.into()),
            Setting::Value(0) => return Err(PartitionError::ZeroSize.into()),
            Setting::Value(size) => {
                let end = start
                    .checked_add(size - 1)
                    .ok_or(PartitionError::OutOfBounds)?;
                if end > last {
                    return Err(PartitionError::OutOfBounds.into());
                }
                if let Some(other) = used.iter().find(|p| p.overlaps(start, end)) {
                    return Err(PartitionError::Overlap(other.partno().unwrap_or(0)).into());
                }
                size
            }
            Setting::FollowDefault => {
                let aligned_end = topology.align_down(gap.end + 1).saturating_sub(1);
                let end = if aligned_end > start && aligned_end <= gap.end {
                    aligned_end
                } else {
                    gap.end
                };
                end - start + 1
            }
        };

        log::debug!("resolved partition {partno}: start {start}, size {size} sectors");

        let mut resolved = partition.clone();
        resolved.set_partno(partno);
        resolved.set_start(start);
        resolved.set_size(size);

        Ok(resolved)
    }
}

fn resolve_partno(setting: Setting<usize>, used: &[Partition], max: usize) -> Result<usize> {
    let in_use = |partno: usize| used.iter().any(|p| p.partno() == Some(partno));

    match setting {
        Setting::Unset => Err(PartitionError::MissingPartno.into()),
        Setting::Value(partno) if partno == 0 || partno > max => {
            Err(PartitionError::PartnoOutOfRange(partno).into())
        }
        Setting::Value(partno) if in_use(partno) => Err(PartitionError::PartnoInUse(partno).into()),
        Setting::Value(partno) => Ok(partno),
        Setting::FollowDefault => (1..=max)
            .find(|&partno| !in_use(partno))
            .ok_or_else(|| PartitionError::TableFull.into()),
    }
}

/// Areas of `first..=last` that no partition of `used` covers, in ascending order.
pub fn free_spaces(used: &[Partition], first: u64, last: u64) -> Vec<FreeSpace> {
    let mut spans: Vec<(u64, u64)> = used
        .iter()
        .filter_map(|p| Some((p.start()?, p.end()?)))
        .collect();
    spans.sort_unstable();

    let mut gaps = Vec::new();
    let mut next = first;

    for (start, end) in spans {
        if start > next && next <= last {
            gaps.push(FreeSpace {
                start: next,
                end: (start - 1).min(last),
            });
        }
        next = next.max(end.saturating_add(1));
    }

    if next <= last {
        gaps.push(FreeSpace { start: next, end: last });
    }

    gaps
}

/// The label of a device.
#[derive(Debug)]
pub enum Label {
    Dos(DosLabel),
    Gpt(GptLabel),
}

macro_rules! dispatch {
    ($self:expr, $label:ident => $body:expr) => {
        match $self {
            Label::Dos($label) => $body,
            Label::Gpt($label) => $body,
        }
    };
}

impl Label {
    /// Looks for a known label on the device, GPT first since a GPT disk also carries a valid
    /// (protective) MBR.
    pub fn detect<D: Read + Seek>(
        handle: &mut DeviceHandle<D>,
        topology: &Topology,
    ) -> Result<Option<Self>> {
        if let Some(label) = GptLabel::probe(handle, topology)? {
            log::debug!("found a GPT label");
            return Ok(Some(Self::Gpt(label)));
        }

        if let Some(label) = DosLabel::probe(handle, topology)? {
            log::debug!("found a DOS label");
            return Ok(Some(Self::Dos(label)));
        }

        log::debug!("no known label found");
        Ok(None)
    }

    /// Creates an empty label of the given format, in memory.
    pub fn create(kind: LabelKind, topology: &Topology) -> Result<Self> {
        let label = match kind {
            LabelKind::Dos => Self::Dos(DosLabel::create(topology)?),
            LabelKind::Gpt => Self::Gpt(GptLabel::create(topology)?),
            LabelKind::Sun | LabelKind::Sgi | LabelKind::Bsd => {
                return Err(Error::UnsupportedFormat(kind.name().to_owned()))
            }
        };

        log::info!("created a new {} disk label ({})", kind, label.disk_identifier());

        Ok(label)
    }
}

impl LabelDriver for Label {
    fn kind(&self) -> LabelKind {
        dispatch!(self, label => label.kind())
    }

    fn registry(&self) -> &'static PartTypeRegistry {
        dispatch!(self, label => label.registry())
    }

    fn disk_identifier(&self) -> String {
        dispatch!(self, label => label.disk_identifier())
    }

    fn is_changed(&self) -> bool {
        dispatch!(self, label => label.is_changed())
    }

    fn is_created(&self) -> bool {
        dispatch!(self, label => label.is_created())
    }

    fn first_usable_lba(&self) -> u64 {
        dispatch!(self, label => label.first_usable_lba())
    }

    fn last_usable_lba(&self) -> u64 {
        dispatch!(self, label => label.last_usable_lba())
    }

    fn max_partitions(&self) -> usize {
        dispatch!(self, label => label.max_partitions())
    }

    fn partitions(&self) -> Vec<Partition> {
        dispatch!(self, label => label.partitions())
    }

    fn add_partition(&mut self, partition: &Partition, topology: &Topology) -> Result<usize> {
        dispatch!(self, label => label.add_partition(partition, topology))
    }

    fn delete_partition(&mut self, partno: usize) -> Result<()> {
        dispatch!(self, label => label.delete_partition(partno))
    }

    fn set_partition_type(&mut self, partno: usize, parttype: &PartType) -> Result<()> {
        dispatch!(self, label => label.set_partition_type(partno, parttype))
    }

    fn set_partition_bootable(&mut self, partno: usize, bootable: bool) -> Result<()> {
        dispatch!(self, label => label.set_partition_bootable(partno, bootable))
    }

    fn write<D: Read + Write + Seek>(&mut self, handle: &mut DeviceHandle<D>) -> Result<()> {
        dispatch!(self, label => label.write(handle))
    }

    fn wipe_foreign_signatures<D: Read + Write + Seek>(
        &self,
        handle: &mut DeviceHandle<D>,
    ) -> Result<()> {
        dispatch!(self, label => label.wipe_foreign_signatures(handle))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{free_spaces, FreeSpace, Label, LabelDriver, LabelKind};
    use crate::{
        device::DeviceHandle,
        error::{Error, ErrorKind, PartitionError},
        partition::Partition,
        topology::Topology,
    };

    fn placed(partno: usize, start: u64, size: u64) -> Partition {
        let mut partition = Partition::new();
        partition.set_partno(partno);
        partition.set_start(start);
        partition.set_size(size);

        partition
    }

    fn partition_error(err: Error) -> PartitionError {
        match err {
            Error::InvalidPartition(reason) => reason,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn label_kind_names() {
        assert_eq!("MBR".parse::<LabelKind>().unwrap(), LabelKind::Dos);
        assert_eq!("gpt".parse::<LabelKind>().unwrap(), LabelKind::Gpt);
        assert_eq!(LabelKind::try_from(32).unwrap(), LabelKind::Gpt);
        assert_eq!(LabelKind::Sgi as u32, 8);

        let err = "amiga".parse::<LabelKind>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn free_space_between_partitions() {
        let used = [placed(2, 100, 50), placed(1, 10, 10)];

        assert_eq!(
            free_spaces(&used, 1, 199),
            [
                FreeSpace { start: 1, end: 9 },
                FreeSpace { start: 20, end: 99 },
                FreeSpace { start: 150, end: 199 },
            ]
        );
        assert!(free_spaces(&[placed(1, 1, 199)], 1, 199).is_empty());
    }

    #[test]
    fn unsupported_formats_cannot_be_created() {
        let topology = Topology::for_size(2048 * 512, 512);

        for kind in [LabelKind::Sun, LabelKind::Sgi, LabelKind::Bsd] {
            let err = Label::create(kind, &topology).unwrap_err();
            assert!(matches!(err, Error::UnsupportedFormat(_)));
        }
    }

    #[test]
    fn follow_defaults_fill_the_first_gap() {
        let topology = Topology::for_size(16 * 1024 * 1024, 512);
        let mut label = Label::create(LabelKind::Dos, &topology).unwrap();

        let mut first = Partition::with_follow_defaults(true, true, false);
        first.set_size(2048);
        assert_eq!(label.add_partition(&first, &topology).unwrap(), 1);

        let rest = Partition::with_follow_defaults(true, true, true);
        let resolved = label.resolve_follow_defaults(&rest, &topology).unwrap();
        assert_eq!(resolved.partno(), Some(2));
        assert_eq!(resolved.start(), Some(4096));
        assert_eq!(resolved.end(), Some(32767));
    }

    #[test]
    fn invalid_placements() {
        let topology = Topology::for_size(2048 * 512, 512);
        let mut label = Label::create(LabelKind::Dos, &topology).unwrap();
        label.add_partition(&placed(1, 100, 100), &topology).unwrap();

        let reason = |partition: &Partition| {
            partition_error(label.resolve_follow_defaults(partition, &topology).unwrap_err())
        };

        assert_eq!(reason(&Partition::new()), PartitionError::MissingPartno);
        assert_eq!(reason(&placed(1, 300, 10)), PartitionError::PartnoInUse(1));
        assert_eq!(reason(&placed(5, 300, 10)), PartitionError::PartnoOutOfRange(5));
        assert_eq!(reason(&placed(2, 150, 10)), PartitionError::Overlap(1));
        assert_eq!(reason(&placed(2, 50, 60)), PartitionError::Overlap(1));
        assert_eq!(reason(&placed(2, 2000, 100)), PartitionError::OutOfBounds);
        assert_eq!(reason(&placed(2, 0, 10)), PartitionError::OutOfBounds);
        assert_eq!(reason(&placed(2, 300, 0)), PartitionError::ZeroSize);

        let mut no_start = Partition::with_follow_defaults(true, false, true);
        assert_eq!(reason(&no_start), PartitionError::MissingStart);
        no_start.start_follow_default(true);
        no_start.end_follow_default(false);
        assert_eq!(reason(&no_start), PartitionError::MissingSize);

        let mut huge = Partition::with_follow_defaults(true, true, false);
        huge.set_size(4096);
        assert_eq!(reason(&huge), PartitionError::NoFreeSpace);
    }

    #[test]
    fn detection_prefers_gpt() {
        let topology = Topology::for_size(2048 * 512, 512);
        let mut handle = DeviceHandle::from_storage(Cursor::new(vec![0u8; 2048 * 512]), 512);

        assert!(Label::detect(&mut handle, &topology).unwrap().is_none());

        let mut label = Label::create(LabelKind::Gpt, &topology).unwrap();
        label.write(&mut handle).unwrap();

        let detected = Label::detect(&mut handle, &topology).unwrap().unwrap();
        assert_eq!(detected.kind(), LabelKind::Gpt);
        assert_eq!(detected.disk_identifier(), label.disk_identifier());
        assert!(!detected.is_changed());
    }
}
