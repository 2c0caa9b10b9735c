//! Textual rendering of partition fields.

use std::fmt::{self, Display};

use crate::{error::Error, partition::Partition};

/// Partition fields that can be rendered as text, with their libfdisk tag values.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldTag {
    Device = 1,
    Start = 2,
    End = 3,
    Sectors = 4,
    Size = 6,
    Type = 7,
    TypeId = 8,
    Attr = 9,
    Boot = 10,
    Name = 15,
    Uuid = 17,
    FsType = 20,
}

impl FieldTag {
    pub const ALL: [FieldTag; 12] = [
        Self::Device,
        Self::Start,
        Self::End,
        Self::Sectors,
        Self::Size,
        Self::Type,
        Self::TypeId,
        Self::Attr,
        Self::Boot,
        Self::Name,
        Self::Uuid,
        Self::FsType,
    ];

    /// Column header used by fdisk for this field.
    pub fn header(self) -> &'static str {
        match self {
            Self::Device => "Device",
            Self::Start => "Start",
            Self::End => "End",
            Self::Sectors => "Sectors",
            Self::Size => "Size",
            Self::Type => "Type",
            Self::TypeId => "Type-UUID",
            Self::Attr => "Attrs",
            Self::Boot => "Boot",
            Self::Name => "Name",
            Self::Uuid => "UUID",
            Self::FsType => "FS-type",
        }
    }
}

impl TryFrom<u32> for FieldTag {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|&tag| tag as u32 == value)
            .ok_or(Error::UnknownField(value))
    }
}

impl Display for FieldTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// How sizes are displayed.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SizeUnit {
    /// Binary multiples with a one-letter suffix, such as `512K` or `1.5G`.
    #[default]
    Human = 0,

    /// Exact number of bytes.
    Bytes = 1,
}

impl TryFrom<u32> for SizeUnit {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::Human),
            1 => Ok(Self::Bytes),
            _ => Err(Error::InvalidArgument("unknown size unit")),
        }
    }
}

/// Formats `bytes` with a binary suffix and at most one fractional digit, or two when
/// `two_digits` is set. A trailing zero digit is dropped.
///
/// ```
/// use fzdisk::field::size_to_human;
///
/// assert_eq!(size_to_human(524288, false), "512K");
/// assert_eq!(size_to_human(1572864, false), "1.5M");
/// assert_eq!(size_to_human(1293942784, true), "1.21G");
/// ```
pub fn size_to_human(bytes: u64, two_digits: bool) -> String {
    const SUFFIXES: [char; 7] = ['B', 'K', 'M', 'G', 'T', 'P', 'E'];

    let exp = (10..=60usize)
        .step_by(10)
        .find(|&shift| bytes < 1u64 << shift)
        .map_or(60, |shift| shift - 10);

    let suffix = SUFFIXES[exp / 10];
    let mut dec = if exp == 0 { bytes } else { bytes >> exp };
    let mut frac = if exp == 0 { 0 } else { bytes & ((1u64 << exp) - 1) };

    if frac != 0 {
        // Three digits first, then rounded to the requested precision.
        frac = if frac >= u64::MAX / 1000 {
            ((frac / 1024) * 1000) >> (exp - 10)
        } else {
            (frac * 1000) >> exp
        };

        frac = if two_digits {
            (frac + 5) / 10
        } else {
            ((frac + 50) / 100) * 10
        };

        if frac == 100 {
            dec += 1;
            frac = 0;
        }
    }

    if frac == 0 {
        return format!("{dec}{suffix}");
    }

    let mut text = format!("{dec}.{frac:02}");
    if text.ends_with('0') {
        text.pop();
    }
    text.push(suffix);

    text
}

/// Name of partition `partno` of the device `devname`, as the kernel names it.
///
/// Devices whose name ends with a digit get a `p` separator (`/dev/nvme0n1p1`).
pub fn partition_device_name(devname: &str, partno: usize) -> String {
    if devname.is_empty() {
        return String::new();
    }

    let separator = if devname.ends_with(|c: char| c.is_ascii_digit()) {
        "p"
    } else {
        ""
    };

    format!("{devname}{separator}{partno}")
}

/// Everything outside of a partition that rendering its fields depends on.
pub(crate) struct FieldContext<'a> {
    pub devname: &'a str,
    pub sector_size: u64,
    pub size_unit: SizeUnit,
    pub details: bool,
    pub code_types: bool,
    pub fstype: Option<&'static str>,
}

pub(crate) fn render(field: FieldTag, partition: &Partition, cx: &FieldContext<'_>) -> String {
    match field {
        FieldTag::Device => partition
            .partno()
            .map(|partno| partition_device_name(cx.devname, partno))
            .unwrap_or_default(),
        FieldTag::Start => to_text(partition.start()),
        FieldTag::End => to_text(partition.end()),
        FieldTag::Sectors => to_text(partition.size()),
        FieldTag::Size => match partition.size() {
            Some(size) => {
                let bytes = size.saturating_mul(cx.sector_size);
                match cx.size_unit {
                    SizeUnit::Bytes => bytes.to_string(),
                    SizeUnit::Human => size_to_human(bytes, cx.details),
                }
            }
            None => String::new(),
        },
        FieldTag::Type => partition
            .parttype()
            .map(|parttype| parttype.name().to_owned())
            .unwrap_or_default(),
        FieldTag::TypeId => match partition.parttype() {
            Some(parttype) if cx.code_types => {
                parttype.code().map(|code| format!("{code:x}")).unwrap_or_default()
            }
            Some(parttype) => parttype.typestr().unwrap_or_default().to_owned(),
            None => String::new(),
        },
        FieldTag::Attr => partition
            .attrs()
            .map(|attrs| attrs.to_string())
            .unwrap_or_default(),
        FieldTag::Boot => {
            if partition.is_bootable() {
                "*".to_owned()
            } else {
                String::new()
            }
        }
        FieldTag::Name => partition.name().unwrap_or_default().to_owned(),
        FieldTag::Uuid => to_text(partition.uuid()),
        FieldTag::FsType => cx.fstype.unwrap_or_default().to_owned(),
    }
}

fn to_text<T: ToString>(value: Option<T>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}
