//! Partitions as seen by callers, and the table snapshot a label exposes.

use std::slice;

use crate::{
    error::{Error, Result},
    gpt::{GptAttributes, Guid},
    parttype::PartType,
};

/// A partition attribute that may be absent, explicit, or left to the label to compute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Setting<T> {
    #[default]
    Unset,
    Value(T),
    FollowDefault,
}

impl<T: Copy> Setting<T> {
    /// The explicit value, if any.
    pub fn value(&self) -> Option<T> {
        match self {
            Self::Value(value) => Some(*value),
            Self::Unset | Self::FollowDefault => None,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    pub fn is_follow_default(&self) -> bool {
        matches!(self, Self::FollowDefault)
    }

    fn follow_default(&mut self, enable: bool) {
        if enable {
            *self = Self::FollowDefault;
        } else if self.is_follow_default() {
            *self = Self::Unset;
        }
    }
}

/// One partition: location, size and type, plus the GPT-only metadata.
///
/// A `Partition` built by the caller is a description. Adding it to a context copies it, and
/// the partitions returned by the context are snapshots of the label at that time.
///
/// ```
/// use fzdisk::{Partition, Setting};
///
/// let mut partition = Partition::with_follow_defaults(true, true, false);
/// partition.set_size(1024);
///
/// assert_eq!(partition.partno(), None);
/// assert_eq!(partition.partno_setting(), Setting::FollowDefault);
/// assert_eq!(partition.size(), Some(1024));
/// assert_eq!(partition.end(), None);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    partno: Setting<usize>,
    start: Setting<u64>,
    size: Setting<u64>,
    parttype: Option<PartType>,
    name: Option<String>,
    uuid: Option<Guid>,
    attrs: Option<GptAttributes>,
    bootable: bool,
}

impl Partition {
    /// Creates a partition with every attribute unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a partition whose number, start and end (size) follow the label defaults as
    /// requested.
    pub fn with_follow_defaults(partno: bool, start: bool, end: bool) -> Self {
        let mut partition = Self::new();
        partition.partno_follow_default(partno);
        partition.start_follow_default(start);
        partition.end_follow_default(end);

        partition
    }

    /// Partition number, 1-based.
    pub fn partno(&self) -> Option<usize> {
        self.partno.value()
    }

    pub fn partno_setting(&self) -> Setting<usize> {
        self.partno
    }

    pub fn set_partno(&mut self, partno: usize) {
        self.partno = Setting::Value(partno);
    }

    pub fn unset_partno(&mut self) {
        self.partno = Setting::Unset;
    }

    /// Lets the label pick the smallest free partition number.
    pub fn partno_follow_default(&mut self, enable: bool) {
        self.partno.follow_default(enable);
    }

    /// First sector of the partition.
    pub fn start(&self) -> Option<u64> {
        self.start.value()
    }

    pub fn start_setting(&self) -> Setting<u64> {
        self.start
    }

    pub fn set_start(&mut self, start: u64) {
        self.start = Setting::Value(start);
    }

    pub fn unset_start(&mut self) {
        self.start = Setting::Unset;
    }

    /// Lets the label pick the first aligned free sector.
    pub fn start_follow_default(&mut self, enable: bool) {
        self.start.follow_default(enable);
    }

    /// Size of the partition, in sectors.
    pub fn size(&self) -> Option<u64> {
        self.size.value()
    }

    pub fn size_setting(&self) -> Setting<u64> {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = Setting::Value(size);
    }

    pub fn unset_size(&mut self) {
        self.size = Setting::Unset;
    }

    /// Lets the label extend the partition to the end of the free area it starts in.
    pub fn end_follow_default(&mut self, enable: bool) {
        self.size.follow_default(enable);
    }

    /// Last sector of the partition, when both start and size are known.
    pub fn end(&self) -> Option<u64> {
        let size = self.size()?;

        self.start()?.checked_add(size.checked_sub(1)?)
    }

    /// Sets the size so that the partition ends on `end`, inclusive.
    pub fn set_end(&mut self, end: u64) -> Result<()> {
        let start = self
            .start()
            .ok_or(Error::InvalidArgument("end requires an explicit start"))?;
        if end < start {
            return Err(Error::InvalidArgument("end lies before start"));
        }

        self.set_size(end - start + 1);

        Ok(())
    }

    pub fn parttype(&self) -> Option<&PartType> {
        self.parttype.as_ref()
    }

    pub fn set_parttype(&mut self, parttype: PartType) {
        self.parttype = Some(parttype);
    }

    /// Partition name (GPT).
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Unique partition GUID (GPT).
    pub fn uuid(&self) -> Option<Guid> {
        self.uuid
    }

    pub fn set_uuid(&mut self, uuid: Guid) {
        self.uuid = Some(uuid);
    }

    /// Attribute bits (GPT).
    pub fn attrs(&self) -> Option<GptAttributes> {
        self.attrs
    }

    pub fn set_attrs(&mut self, attrs: GptAttributes) {
        self.attrs = Some(attrs);
    }

    /// Boot flag: the active indicator on DOS, legacy BIOS bootable on GPT.
    pub fn is_bootable(&self) -> bool {
        self.bootable
    }

    pub fn set_bootable(&mut self, bootable: bool) {
        self.bootable = bootable;
    }

    /// Returns `true` if `self` and `other` share at least one sector.
    pub(crate) fn overlaps(&self, start: u64, end: u64) -> bool {
        match (self.start(), self.end()) {
            (Some(own_start), Some(own_end)) => own_start <= end && start <= own_end,
            _ => false,
        }
    }
}

/// Iteration order over a [`PartitionTable`].
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    #[default]
    Forward = 0,
    Backward = 1,
}

impl TryFrom<u32> for Direction {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Forward),
            1 => Ok(Self::Backward),
            _ => Err(Error::InvalidArgument("unknown iteration direction")),
        }
    }
}

/// Snapshot of the partitions of a label, in on-disk entry order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionTable {
    entries: Vec<Partition>,
}

impl PartitionTable {
    /// Builds a fresh table from the partitions a label reports.
    pub(crate) fn rebuild(partitions: impl ExactSizeIterator<Item = Partition>) -> Result<Self> {
        let mut entries = Vec::new();
        entries.try_reserve_exact(partitions.len())?;
        entries.extend(partitions);

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks a partition up by number.
    pub fn get(&self, partno: usize) -> Option<&Partition> {
        self.entries
            .iter()
            .find(|partition| partition.partno() == Some(partno))
    }

    pub fn iter(&self, direction: Direction) -> TableIter<'_> {
        TableIter {
            inner: self.entries.iter(),
            direction,
        }
    }

    pub fn as_slice(&self) -> &[Partition] {
        &self.entries
    }

    pub fn to_vec(&self) -> Vec<Partition> {
        self.entries.clone()
    }
}

impl<'a> IntoIterator for &'a PartitionTable {
    type Item = &'a Partition;
    type IntoIter = TableIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter(Direction::Forward)
    }
}

/// Iterator over a [`PartitionTable`], in either [`Direction`].
#[derive(Clone, Debug)]
pub struct TableIter<'a> {
    inner: slice::Iter<'a, Partition>,
    direction: Direction,
}

impl<'a> Iterator for TableIter<'a> {
    type Item = &'a Partition;

    fn next(&mut self) -> Option<Self::Item> {
        match self.direction {
            Direction::Forward => self.inner.next(),
            Direction::Backward => self.inner.next_back(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for TableIter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        match self.direction {
            Direction::Forward => self.inner.next_back(),
            Direction::Backward => self.inner.next(),
        }
    }
}

impl ExactSizeIterator for TableIter<'_> {}

#[cfg(test)]
mod tests {
    use super::{Direction, Partition, PartitionTable, Setting};

    fn placed(partno: usize, start: u64, size: u64) -> Partition {
        let mut partition = Partition::new();
        partition.set_partno(partno);
        partition.set_start(start);
        partition.set_size(size);

        partition
    }

    #[test]
    fn unset_is_not_zero() {
        let mut partition = Partition::new();
        assert_eq!(partition.partno(), None);
        assert_eq!(partition.start(), None);
        assert_eq!(partition.size(), None);

        partition.set_size(0);
        assert_eq!(partition.size(), Some(0));
        assert_eq!(partition.end(), None);

        partition.unset_size();
        assert!(partition.size_setting().is_unset());
    }

    #[test]
    fn follow_default_toggles() {
        let mut partition = Partition::with_follow_defaults(true, false, true);
        assert_eq!(partition.partno_setting(), Setting::FollowDefault);
        assert_eq!(partition.start_setting(), Setting::Unset);
        assert!(partition.size_setting().is_follow_default());

        partition.partno_follow_default(false);
        assert_eq!(partition.partno_setting(), Setting::Unset);

        partition.set_start(10);
        partition.start_follow_default(false);
        assert_eq!(partition.start(), Some(10));
    }

    #[test]
    fn end_is_derived() {
        let mut partition = placed(1, 2048, 1024);
        assert_eq!(partition.end(), Some(3071));

        partition.set_end(2048).unwrap();
        assert_eq!(partition.size(), Some(1));
        assert!(partition.set_end(10).is_err());

        assert!(partition.overlaps(2000, 2048));
        assert!(!partition.overlaps(2049, 4000));
    }

    #[test]
    fn table_iteration() {
        let partitions = vec![placed(1, 34, 10), placed(2, 44, 10), placed(4, 54, 10)];
        let table = PartitionTable::rebuild(partitions.into_iter()).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(4).unwrap().start(), Some(54));
        assert!(table.get(3).is_none());

        let forward: Vec<_> = table
            .iter(Direction::Forward)
            .filter_map(|p| p.partno())
            .collect();
        let backward: Vec<_> = table
            .iter(Direction::Backward)
            .filter_map(|p| p.partno())
            .collect();
        assert_eq!(forward, [1, 2, 4]);
        assert_eq!(backward, [4, 2, 1]);

        assert_eq!(Direction::try_from(1).unwrap(), Direction::Backward);
        assert!(Direction::try_from(2).is_err());
    }
}
