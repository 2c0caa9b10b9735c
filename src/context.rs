//! Partitioning sessions.
//!
//! A [`Context`] is bound to at most one device at a time. It owns the device handle, the label
//! found on (or created for) the device and a snapshot of the label's partitions, and every
//! operation on the disk goes through it.

use std::{fs::File, path::Path};

use crate::{
    device::DeviceHandle,
    error::{Error, Result},
    field::{self, FieldContext, FieldTag, SizeUnit},
    fstype,
    label::{FreeSpace, Label, LabelDriver, LabelKind},
    partition::{Partition, PartitionTable},
    parttype::PartType,
    topology::{Topology, DEFAULT_SECTOR_SIZE},
};

/// When [`Context::write_disklabel`] erases foreign signatures before writing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WipeMode {
    /// Only when the label was created in this session.
    #[default]
    Auto,

    /// On every write.
    Always,

    /// Never.
    Never,
}

/// Options of a [`Context`].
///
/// ```no_run
/// use fzdisk::{ContextOptions, SizeUnit};
///
/// let context = ContextOptions::new()
///     .read_only(true)
///     .size_unit(SizeUnit::Bytes)
///     .open("/dev/sda")
///     .unwrap();
///
/// println!("{} sectors", context.nsectors());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextOptions {
    details: bool,
    read_only: bool,
    sector_size: Option<u64>,
    size_unit: SizeUnit,
    wipe: WipeMode,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            details: true,
            read_only: false,
            sector_size: None,
            size_unit: SizeUnit::Human,
            wipe: WipeMode::Auto,
        }
    }
}

impl ContextOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Details mode, where human readable sizes carry two fractional digits.
    pub fn details(mut self, details: bool) -> Self {
        self.details = details;
        self
    }

    /// Opens devices read-only and rejects every change.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Overrides the logical sector size of the devices.
    pub fn sector_size(mut self, sector_size: u64) -> Self {
        self.sector_size = Some(sector_size);
        self
    }

    pub fn size_unit(mut self, size_unit: SizeUnit) -> Self {
        self.size_unit = size_unit;
        self
    }

    pub fn wipe(mut self, wipe: WipeMode) -> Self {
        self.wipe = wipe;
        self
    }

    /// Creates a context without a device.
    pub fn build(self) -> Result<Context> {
        if let Some(sector_size) = self.sector_size {
            if sector_size < DEFAULT_SECTOR_SIZE || !sector_size.is_power_of_two() {
                return Err(Error::InvalidArgument(
                    "sector size must be a power of two of at least 512 bytes",
                ));
            }
        }

        Ok(Context {
            options: self,
            device: None,
            table: PartitionTable::default(),
        })
    }

    /// Creates a context and assigns it the device at `path`.
    pub fn open(self, path: impl AsRef<Path>) -> Result<Context> {
        let mut context = self.build()?;
        context.assign_device(path)?;

        Ok(context)
    }
}

#[derive(Debug)]
struct Attached {
    handle: DeviceHandle<File>,
    topology: Topology,
    label: Option<Label>,
}

/// A partitioning session.
#[derive(Debug)]
pub struct Context {
    options: ContextOptions,
    device: Option<Attached>,
    table: PartitionTable,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a context without a device, with default options.
    pub fn new() -> Self {
        Self {
            options: ContextOptions::default(),
            device: None,
            table: PartitionTable::default(),
        }
    }

    /// Creates a context, assigning it `device` when given.
    pub fn open(device: Option<&Path>, details: bool, read_only: bool) -> Result<Self> {
        let options = ContextOptions::new().details(details).read_only(read_only);

        match device {
            Some(path) => options.open(path),
            None => options.build(),
        }
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Binds the context to the device at `path` and reads its label.
    ///
    /// A previously assigned device is released first. On failure, the context is left without a
    /// device.
    pub fn assign_device(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.deassign_device();

        let mut handle = DeviceHandle::open(path, self.options.read_only)?;
        let topology = Topology::probe(&mut handle, self.options.sector_size)?;
        let label = Label::detect(&mut handle, &topology)?;

        log::info!(
            "assigned {} ({} sectors of {} bytes, label: {})",
            path.display(),
            topology.total_sectors,
            topology.sector_size,
            label.as_ref().map_or("none", |label| label.name())
        );

        self.device = Some(Attached {
            handle,
            topology,
            label,
        });
        if let Err(err) = self.rebuild_table() {
            self.deassign_device();
            return Err(err);
        }

        Ok(())
    }

    /// Releases the device and its label, discarding unwritten changes.
    pub fn deassign_device(&mut self) {
        if let Some(attached) = self.device.take() {
            if attached.label.as_ref().is_some_and(|label| label.is_changed()) {
                log::warn!(
                    "discarding unwritten changes to {}",
                    attached.handle.path().display()
                );
            }
        }
        self.table = PartitionTable::default();
    }

    /// Returns `true` if a device is assigned.
    pub fn is_assigned(&self) -> bool {
        self.device.is_some()
    }

    fn attached(&self) -> Result<&Attached> {
        self.device.as_ref().ok_or(Error::NoDevice)
    }

    fn attached_mut(&mut self) -> Result<&mut Attached> {
        self.device.as_mut().ok_or(Error::NoDevice)
    }

    fn writable(&mut self) -> Result<&mut Attached> {
        if self.options.read_only {
            return Err(Error::ReadOnly);
        }

        self.attached_mut()
    }

    fn writable_label(&mut self) -> Result<(&mut Label, &Topology)> {
        let attached = self.writable()?;
        let label = attached.label.as_mut().ok_or(Error::NoLabel)?;

        Ok((label, &attached.topology))
    }

    fn rebuild_table(&mut self) -> Result<()> {
        self.table = match self.device.as_ref().and_then(|attached| attached.label.as_ref()) {
            Some(label) => PartitionTable::rebuild(label.partitions().into_iter())?,
            None => PartitionTable::default(),
        };

        Ok(())
    }

    /// Replaces the label in memory with an empty one of the given format (DOS by default).
    ///
    /// Nothing is written until [`Context::write_disklabel`].
    pub fn create_disklabel(&mut self, format: Option<&str>) -> Result<()> {
        let attached = self.writable()?;
        let kind = format
            .map(str::parse::<LabelKind>)
            .transpose()?
            .unwrap_or(LabelKind::Dos);

        let label = Label::create(kind, &attached.topology)?;
        attached.label = Some(label);

        self.rebuild_table()
    }

    /// Writes the label to the device.
    pub fn write_disklabel(&mut self) -> Result<()> {
        let wipe = self.options.wipe;
        let attached = self.writable()?;
        let label = attached.label.as_mut().ok_or(Error::NoLabel)?;
        let handle = &mut attached.handle;

        let should_wipe = match wipe {
            WipeMode::Auto => label.is_created(),
            WipeMode::Always => true,
            WipeMode::Never => false,
        };
        if should_wipe {
            label.wipe_foreign_signatures(handle)?;
            fstype::wipe(handle, 0, attached.topology.size_bytes())?;
        }

        label.write(handle)?;
        handle.sync()?;

        Ok(())
    }

    /// Adds `partition` to the label, returning the number it was given.
    pub fn add_partition(&mut self, partition: &Partition) -> Result<usize> {
        let (label, topology) = self.writable_label()?;
        let partno = label.add_partition(partition, topology)?;

        self.rebuild_table()?;

        Ok(partno)
    }

    pub fn delete_partition(&mut self, partno: usize) -> Result<()> {
        let (label, _) = self.writable_label()?;
        label.delete_partition(partno)?;

        self.rebuild_table()
    }

    pub fn set_partition_type(&mut self, partno: usize, parttype: &PartType) -> Result<()> {
        let (label, _) = self.writable_label()?;
        label.set_partition_type(partno, parttype)?;

        self.rebuild_table()
    }

    pub fn set_partition_bootable(&mut self, partno: usize, bootable: bool) -> Result<()> {
        let (label, _) = self.writable_label()?;
        label.set_partition_bootable(partno, bootable)?;

        self.rebuild_table()
    }

    /// Renders one field of `partition` as text.
    pub fn partition_to_string(
        &mut self,
        partition: &Partition,
        field: FieldTag,
    ) -> Result<String> {
        let size_unit = self.options.size_unit;
        let details = self.options.details;
        let attached = self.attached_mut()?;
        let code_types = attached
            .label
            .as_ref()
            .ok_or(Error::NoLabel)?
            .has_code_types();
        let sector_size = attached.topology.sector_size;

        let fstype = match (field, partition.start(), partition.size()) {
            (FieldTag::FsType, Some(start), Some(size)) => {
                fstype::probe(
                    &mut attached.handle,
                    start.saturating_mul(sector_size),
                    size.saturating_mul(sector_size),
                )
                .unwrap_or_else(|err| {
                    log::debug!("cannot probe partition at {start}: {err}");
                    None
                })
            }
            _ => None,
        };

        let devname = attached.handle.path().to_string_lossy();
        let cx = FieldContext {
            devname: &devname,
            sector_size,
            size_unit,
            details,
            code_types,
            fstype,
        };

        Ok(field::render(field, partition, &cx))
    }

    /// Number of sectors of the device, zero without a device.
    pub fn nsectors(&self) -> u64 {
        self.device
            .as_ref()
            .map_or(0, |attached| attached.topology.total_sectors)
    }

    /// Logical sector size.
    pub fn sector_size(&self) -> u64 {
        match &self.device {
            Some(attached) => attached.topology.sector_size,
            None => self.options.sector_size.unwrap_or(DEFAULT_SECTOR_SIZE),
        }
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.device.as_ref().map(|attached| &attached.topology)
    }

    /// Path of the assigned device.
    pub fn devname(&self) -> Option<&Path> {
        self.device.as_ref().map(|attached| attached.handle.path())
    }

    pub fn label(&self) -> Option<&Label> {
        self.device
            .as_ref()
            .and_then(|attached| attached.label.as_ref())
    }

    /// Name of the active label, `"none"` without one.
    pub fn label_name(&self) -> &'static str {
        self.label().map_or("none", |label| label.name())
    }

    pub fn disk_identifier(&self) -> Option<String> {
        self.label().map(|label| label.disk_identifier())
    }

    pub fn nparts(&self) -> usize {
        self.table.len()
    }

    /// Snapshot of the partitions, in on-disk entry order.
    pub fn partitions(&self) -> Vec<Partition> {
        self.table.to_vec()
    }

    pub fn table(&self) -> &PartitionTable {
        &self.table
    }

    /// Unpartitioned areas of the device.
    pub fn free_spaces(&self) -> Result<Vec<FreeSpace>> {
        let label = self.attached()?.label.as_ref().ok_or(Error::NoLabel)?;

        Ok(label.free_spaces())
    }

    pub fn size_unit(&self) -> SizeUnit {
        self.options.size_unit
    }

    pub fn set_size_unit(&mut self, size_unit: SizeUnit) {
        self.options.size_unit = size_unit;
    }

    pub fn is_details(&self) -> bool {
        self.options.details
    }

    pub fn enable_details(&mut self, details: bool) {
        self.options.details = details;
    }

    pub fn is_readonly(&self) -> bool {
        self.options.read_only
    }

    pub fn wipe_mode(&self) -> WipeMode {
        self.options.wipe
    }

    pub fn set_wipe_mode(&mut self, wipe: WipeMode) {
        self.options.wipe = wipe;
    }

    /// Returns `true` if the label has changes that were not written yet.
    pub fn is_changed(&self) -> bool {
        self.label().is_some_and(|label| label.is_changed())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{Context, ContextOptions, WipeMode};
    use crate::{
        error::{Error, ErrorKind},
        field::{FieldTag, SizeUnit},
        partition::Partition,
    };

    fn image(sectors: u64) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; (sectors * 512) as usize]).unwrap();
        file.flush().unwrap();

        file
    }

    #[test]
    fn unattached_context() {
        let mut context = Context::new();

        assert!(!context.is_assigned());
        assert_eq!(context.nsectors(), 0);
        assert_eq!(context.sector_size(), 512);
        assert_eq!(context.label_name(), "none");
        assert!(context.devname().is_none());
        assert!(context.partitions().is_empty());

        assert!(matches!(context.create_disklabel(None), Err(Error::NoDevice)));
        assert!(matches!(context.write_disklabel(), Err(Error::NoDevice)));
        assert_eq!(
            context
                .add_partition(&Partition::with_follow_defaults(true, true, true))
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn invalid_sector_size() {
        assert!(matches!(
            ContextOptions::new().sector_size(1000).build(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(ContextOptions::new().sector_size(4096).build().is_ok());
    }

    #[test]
    fn failed_assignment_releases_previous_device() {
        let file = image(2048);
        let mut context = Context::open(Some(file.path()), true, false).unwrap();
        assert!(context.is_assigned());

        let err = context
            .assign_device("/nonexistent/fzdisk-image")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!context.is_assigned());
        assert!(context.devname().is_none());
    }

    #[test]
    fn options_are_carried() {
        let file = image(2048);
        let mut context = ContextOptions::new()
            .details(false)
            .size_unit(SizeUnit::Bytes)
            .wipe(WipeMode::Never)
            .open(file.path())
            .unwrap();

        assert!(!context.is_details());
        assert_eq!(context.size_unit(), SizeUnit::Bytes);
        assert_eq!(context.wipe_mode(), WipeMode::Never);
        assert_eq!(context.devname(), Some(file.path()));

        context.create_disklabel(Some("dos")).unwrap();
        let mut partition = Partition::with_follow_defaults(true, true, false);
        partition.set_size(1024);
        context.add_partition(&partition).unwrap();

        let added = &context.partitions()[0];
        assert_eq!(
            context.partition_to_string(added, FieldTag::Size).unwrap(),
            "524288"
        );

        context.set_size_unit(SizeUnit::Human);
        context.enable_details(true);
        assert_eq!(
            context.partition_to_string(added, FieldTag::Size).unwrap(),
            "512K"
        );
    }
}
