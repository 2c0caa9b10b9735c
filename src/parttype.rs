//! Partition types and the per-label registries they are looked up from.
//!
//! DOS labels classify partitions with a one-byte code, GPT labels with a type GUID. Each label
//! driver has one static [`PartTypeRegistry`], indexed on first use and never mutated.

use std::{
    borrow::Cow,
    collections::HashMap,
    fmt::{self, Display},
    sync::OnceLock,
};

use crate::{gpt::Guid, label::LabelKind};

/// A partition type: a DOS code or a GPT type GUID, plus a display name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartType {
    code: Option<u32>,
    typestr: Option<Cow<'static, str>>,
    name: Cow<'static, str>,
    known: bool,
}

impl PartType {
    const fn from_code(code: u8, name: &'static str) -> Self {
        Self {
            code: Some(code as u32),
            typestr: None,
            name: Cow::Borrowed(name),
            known: true,
        }
    }

    const fn from_typestr(typestr: &'static str, name: &'static str) -> Self {
        Self {
            code: None,
            typestr: Some(Cow::Borrowed(typestr)),
            name: Cow::Borrowed(name),
            known: true,
        }
    }

    /// Type for an on-disk DOS code that no registry entry describes.
    pub(crate) fn unknown_code(code: u8) -> Self {
        Self {
            code: Some(u32::from(code)),
            typestr: None,
            name: Cow::Borrowed("unknown"),
            known: false,
        }
    }

    /// Type for an on-disk GPT type GUID that no registry entry describes.
    pub(crate) fn unknown_guid(guid: Guid) -> Self {
        Self {
            code: None,
            typestr: Some(Cow::Owned(guid.to_string())),
            name: Cow::Borrowed("unknown"),
            known: false,
        }
    }

    /// Human readable name of this type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// DOS code of this type, `None` for string-keyed types.
    pub fn code(&self) -> Option<u32> {
        self.code
    }

    /// Type identifier string (the type GUID for GPT), `None` for code-keyed types.
    pub fn typestr(&self) -> Option<&str> {
        self.typestr.as_deref()
    }

    /// Returns `true` if this type was read from disk and is not in any registry.
    pub fn is_unknown(&self) -> bool {
        !self.known
    }

    pub(crate) fn guid(&self) -> Option<Guid> {
        self.typestr().and_then(Guid::parse)
    }
}

impl Display for PartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Read-only table of the partition types a label format knows about.
#[derive(Debug)]
pub struct PartTypeRegistry {
    kind: LabelKind,
    types: Vec<PartType>,
    index: HashMap<RegistryKey, usize>,
    shortcuts: HashMap<&'static str, usize>,
    default: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum RegistryKey {
    Code(u32),
    Guid(Guid),
}

impl PartTypeRegistry {
    /// Registry of the DOS label.
    pub fn dos() -> &'static Self {
        static REGISTRY: OnceLock<PartTypeRegistry> = OnceLock::new();

        REGISTRY.get_or_init(|| {
            let types = DOS_TYPES
                .iter()
                .map(|&(code, name)| PartType::from_code(code, name))
                .collect();

            Self::build(LabelKind::Dos, types, DOS_SHORTCUTS, DOS_DEFAULT)
        })
    }

    /// Registry of the GPT label.
    pub fn gpt() -> &'static Self {
        static REGISTRY: OnceLock<PartTypeRegistry> = OnceLock::new();

        REGISTRY.get_or_init(|| {
            let types = GPT_TYPES
                .iter()
                .map(|&(typestr, name)| PartType::from_typestr(typestr, name))
                .collect();

            Self::build(LabelKind::Gpt, types, GPT_SHORTCUTS, GPT_DEFAULT)
        })
    }

    fn build(
        kind: LabelKind,
        types: Vec<PartType>,
        shortcuts: &'static [(&'static str, &'static str, &'static str)],
        default: &str,
    ) -> Self {
        let mut index = HashMap::with_capacity(types.len());
        for (idx, parttype) in types.iter().enumerate() {
            if let Some(key) = Self::key_of(parttype) {
                index.entry(key).or_insert(idx);
            }
        }

        let mut registry = Self {
            kind,
            types,
            index,
            shortcuts: HashMap::new(),
            default: 0,
        };

        for &(letter, alias, native) in shortcuts {
            if let Some(idx) = registry.native_index(native) {
                registry.shortcuts.insert(letter, idx);
                registry.shortcuts.insert(alias, idx);
            }
        }
        registry.default = registry.native_index(default).unwrap_or(0);

        registry
    }

    fn key_of(parttype: &PartType) -> Option<RegistryKey> {
        match (parttype.code(), parttype.guid()) {
            (Some(code), _) => Some(RegistryKey::Code(code)),
            (None, Some(guid)) => Some(RegistryKey::Guid(guid)),
            (None, None) => None,
        }
    }

    fn native_index(&self, text: &str) -> Option<usize> {
        let key = if self.has_code_types() {
            let digits = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .unwrap_or(text);
            RegistryKey::Code(u32::from_str_radix(digits, 16).ok()?)
        } else {
            RegistryKey::Guid(Guid::parse(text)?)
        };

        self.index.get(&key).copied()
    }

    /// The label format this registry belongs to.
    pub fn kind(&self) -> LabelKind {
        self.kind
    }

    /// Returns `true` if types are keyed by a numeric code.
    pub fn has_code_types(&self) -> bool {
        self.kind == LabelKind::Dos
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Known types, in table order.
    pub fn parttypes(&self) -> &[PartType] {
        &self.types
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartType> {
        self.types.iter()
    }

    /// Looks a type up by its DOS code.
    pub fn by_code(&self, code: u32) -> Option<&PartType> {
        self.index
            .get(&RegistryKey::Code(code))
            .map(|&idx| &self.types[idx])
    }

    /// Looks a type up by its type GUID, in any case.
    pub fn by_string(&self, typestr: &str) -> Option<&PartType> {
        self.by_guid(Guid::parse(typestr)?)
    }

    pub(crate) fn by_guid(&self, guid: Guid) -> Option<&PartType> {
        self.index
            .get(&RegistryKey::Guid(guid))
            .map(|&idx| &self.types[idx])
    }

    /// Parses user input: a shortcut letter or alias (`L`, `swap`, `uefi`, ...), or the native
    /// code (hexadecimal, optional `0x`) or GUID.
    pub fn parse(&self, text: &str) -> Option<&PartType> {
        let text = text.trim();

        self.shortcuts
            .iter()
            .find(|(shortcut, _)| shortcut.eq_ignore_ascii_case(text))
            .map(|(_, &idx)| idx)
            .or_else(|| self.native_index(text))
            .map(|idx| &self.types[idx])
    }

    /// Type given to new partitions that do not specify one.
    pub fn default_type(&self) -> &PartType {
        &self.types[self.default]
    }
}

const DOS_DEFAULT: &str = "83";

const DOS_SHORTCUTS: &[(&str, &str, &str)] = &[
    ("L", "linux", "83"),
    ("S", "swap", "82"),
    ("E", "extended", "05"),
    ("X", "linux-extended", "85"),
    ("U", "uefi", "ef"),
    ("R", "raid", "fd"),
    ("V", "lvm", "8e"),
];

const DOS_TYPES: &[(u8, &str)] = &[
    (0x00, "Empty"),
    (0x01, "FAT12"),
    (0x02, "XENIX root"),
    (0x03, "XENIX usr"),
    (0x04, "FAT16 <32M"),
    (0x05, "Extended"),
    (0x06, "FAT16"),
    (0x07, "HPFS/NTFS/exFAT"),
    (0x08, "AIX"),
    (0x09, "AIX bootable"),
    (0x0a, "OS/2 Boot Manager"),
    (0x0b, "W95 FAT32"),
    (0x0c, "W95 FAT32 (LBA)"),
    (0x0e, "W95 FAT16 (LBA)"),
    (0x0f, "W95 Ext'd (LBA)"),
    (0x10, "OPUS"),
    (0x11, "Hidden FAT12"),
    (0x12, "Compaq diagnostics"),
    (0x14, "Hidden FAT16 <32M"),
    (0x16, "Hidden FAT16"),
    (0x17, "Hidden HPFS/NTFS"),
    (0x18, "AST SmartSleep"),
    (0x1b, "Hidden W95 FAT32"),
    (0x1c, "Hidden W95 FAT32 (LBA)"),
    (0x1e, "Hidden W95 FAT16 (LBA)"),
    (0x24, "NEC DOS"),
    (0x27, "Hidden NTFS WinRE"),
    (0x39, "Plan 9"),
    (0x3c, "PartitionMagic recovery"),
    (0x40, "Venix 80286"),
    (0x41, "PPC PReP Boot"),
    (0x42, "SFS"),
    (0x4d, "QNX4.x"),
    (0x4e, "QNX4.x 2nd part"),
    (0x4f, "QNX4.x 3rd part"),
    (0x50, "OnTrack DM"),
    (0x51, "OnTrack DM6 Aux1"),
    (0x52, "CP/M"),
    (0x53, "OnTrack DM6 Aux3"),
    (0x54, "OnTrackDM6"),
    (0x55, "EZ-Drive"),
    (0x56, "Golden Bow"),
    (0x5c, "Priam Edisk"),
    (0x61, "SpeedStor"),
    (0x63, "GNU HURD or SysV"),
    (0x64, "Novell Netware 286"),
    (0x65, "Novell Netware 386"),
    (0x70, "DiskSecure Multi-Boot"),
    (0x75, "PC/IX"),
    (0x80, "Old Minix"),
    (0x81, "Minix / old Linux"),
    (0x82, "Linux swap / Solaris"),
    (0x83, "Linux"),
    (0x84, "OS/2 hidden or Intel hibernation"),
    (0x85, "Linux extended"),
    (0x86, "NTFS volume set"),
    (0x87, "NTFS volume set"),
    (0x88, "Linux plaintext"),
    (0x8e, "Linux LVM"),
    (0x93, "Amoeba"),
    (0x94, "Amoeba BBT"),
    (0x9f, "BSD/OS"),
    (0xa0, "IBM Thinkpad hibernation"),
    (0xa5, "FreeBSD"),
    (0xa6, "OpenBSD"),
    (0xa7, "NeXTSTEP"),
    (0xa8, "Darwin UFS"),
    (0xa9, "NetBSD"),
    (0xab, "Darwin boot"),
    (0xaf, "HFS / HFS+"),
    (0xb7, "BSDI fs"),
    (0xb8, "BSDI swap"),
    (0xbb, "Boot Wizard hidden"),
    (0xbc, "Acronis FAT32 LBA"),
    (0xbe, "Solaris boot"),
    (0xbf, "Solaris"),
    (0xc1, "DRDOS/sec (FAT-12)"),
    (0xc4, "DRDOS/sec (FAT-16 < 32M)"),
    (0xc6, "DRDOS/sec (FAT-16)"),
    (0xc7, "Syrinx"),
    (0xda, "Non-FS data"),
    (0xdb, "CP/M / CTOS / ..."),
    (0xde, "Dell Utility"),
    (0xdf, "BootIt"),
    (0xe1, "DOS access"),
    (0xe3, "DOS R/O"),
    (0xe4, "SpeedStor"),
    (0xea, "Linux extended boot"),
    (0xeb, "BeOS fs"),
    (0xee, "GPT"),
    (0xef, "EFI (FAT-12/16/32)"),
    (0xf0, "Linux/PA-RISC boot"),
    (0xf1, "SpeedStor"),
    (0xf2, "DOS secondary"),
    (0xf4, "SpeedStor"),
    (0xf8, "EBBR protective"),
    (0xfb, "VMware VMFS"),
    (0xfc, "VMware VMKCORE"),
    (0xfd, "Linux raid autodetect"),
    (0xfe, "LANstep"),
    (0xff, "BBT"),
];

const GPT_DEFAULT: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";

const GPT_SHORTCUTS: &[(&str, &str, &str)] = &[
    ("L", "linux", "0FC63DAF-8483-4772-8E79-3D69D8477DE4"),
    ("S", "swap", "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F"),
    ("H", "home", "933AC7E1-2EB4-4F13-B844-0E14E2AEF915"),
    ("U", "uefi", "C12A7328-F81F-11D2-BA4B-00A0C93EC93B"),
    ("R", "raid", "A19D880F-05FC-4D3B-A006-743F0F84911E"),
    ("V", "lvm", "E6D6D379-F507-44C2-A23C-238F2A3DF928"),
];

const GPT_TYPES: &[(&str, &str)] = &[
    // Generic
    ("C12A7328-F81F-11D2-BA4B-00A0C93EC93B", "EFI System"),
    ("024DEE41-33E7-11D3-9D69-0008C781F39F", "MBR partition scheme"),
    ("D3BFE2DE-3DAF-11DF-BA40-E3A556D89593", "Intel Fast Flash"),
    // Hah!IdontneedEFI
    ("21686148-6449-6E6F-744E-656564454649", "BIOS boot"),
    ("F4019732-066E-4E12-8273-346C5641494F", "Sony boot partition"),
    ("BFBFAFE7-A34F-448A-9A5B-6213EB736C22", "Lenovo boot partition"),
    ("9E1A2D38-C612-4316-AA26-8B49521E5A8B", "PowerPC PReP boot"),
    ("7412F7D5-A156-4B13-81DC-867174929325", "ONIE boot"),
    ("D4E6E2CD-4469-46F3-B5CB-1BFF57AFC149", "ONIE config"),
    // Windows
    ("E3C9E316-0B5C-4DB8-817D-F92DF00215AE", "Microsoft reserved"),
    ("EBD0A0A2-B9E5-4433-87C0-68B6B72699C7", "Microsoft basic data"),
    ("5808C8AA-7E8F-42E0-85D2-E1E90434CFB3", "Microsoft LDM metadata"),
    ("AF9B60A0-1431-4F62-BC68-3311714A69AD", "Microsoft LDM data"),
    ("DE94BBA4-06D1-4D40-A16A-BFD50179D6AC", "Windows recovery environment"),
    ("37AFFC90-EF7D-4E96-91C3-2D7AE055B174", "IBM General Parallel Fs"),
    ("E75CAF8F-F680-4CEE-AFA3-B001E56EFC2D", "Microsoft Storage Spaces"),
    // HP-UX
    ("75894C1E-3AEB-11D3-B7C1-7B03A0000000", "HP-UX data"),
    ("E2A1E728-32E3-11D6-A682-7B03A0000000", "HP-UX service"),
    // Linux
    ("0657FD6D-A4AB-43C4-84E5-0933C84B4F4F", "Linux swap"),
    ("0FC63DAF-8483-4772-8E79-3D69D8477DE4", "Linux filesystem"),
    ("3B8F8425-20E0-4F3B-907F-1A25A76F98E8", "Linux server data"),
    ("44479540-F297-41B2-9AF7-D131D5F0458A", "Linux root (x86)"),
    ("4F68BCE3-E8CD-4DB1-96E7-FBCAF984B709", "Linux root (x86-64)"),
    ("B921B045-1DF0-41C3-AF44-4C6F280D3FAE", "Linux root (ARM-64)"),
    ("69DAD710-2CE4-4E3C-B16C-21A1D49ABED3", "Linux root (ARM)"),
    ("8DA63339-0007-60C0-C436-083AC8230908", "Linux reserved"),
    ("933AC7E1-2EB4-4F13-B844-0E14E2AEF915", "Linux home"),
    ("A19D880F-05FC-4D3B-A006-743F0F84911E", "Linux RAID"),
    ("BC13C2FF-59E6-4262-A352-B275FD6F7172", "Linux extended boot"),
    ("E6D6D379-F507-44C2-A23C-238F2A3DF928", "Linux LVM"),
    // FreeBSD
    ("516E7CB4-6ECF-11D6-8FF8-00022D09712B", "FreeBSD data"),
    ("83BD6B9D-7F41-11DC-BE0B-001560B84F0F", "FreeBSD boot"),
    ("516E7CB5-6ECF-11D6-8FF8-00022D09712B", "FreeBSD swap"),
    ("516E7CB6-6ECF-11D6-8FF8-00022D09712B", "FreeBSD UFS"),
    ("516E7CBA-6ECF-11D6-8FF8-00022D09712B", "FreeBSD ZFS"),
    ("516E7CB8-6ECF-11D6-8FF8-00022D09712B", "FreeBSD Vinum"),
    // Apple
    ("48465300-0000-11AA-AA11-00306543ECAC", "Apple HFS/HFS+"),
    ("7C3457EF-0000-11AA-AA11-00306543ECAC", "Apple APFS"),
    ("55465300-0000-11AA-AA11-00306543ECAC", "Apple UFS"),
    ("52414944-0000-11AA-AA11-00306543ECAC", "Apple RAID"),
    ("426F6F74-0000-11AA-AA11-00306543ECAC", "Apple boot"),
    // Solaris
    ("6A82CB45-1DD2-11B2-99A6-080020736631", "Solaris boot"),
    ("6A85CF4D-1DD2-11B2-99A6-080020736631", "Solaris root"),
    ("6A898CC3-1DD2-11B2-99A6-080020736631", "Solaris /usr & Apple ZFS"),
    // NetBSD and OpenBSD
    ("49F48D32-B10E-11DC-B99B-0019D1879648", "NetBSD swap"),
    ("49F48D5A-B10E-11DC-B99B-0019D1879648", "NetBSD FFS"),
    ("824CC7A0-36A8-11E3-890A-952519AD3F61", "OpenBSD data"),
    // Others
    ("CEF5A9AD-73BC-4601-89F3-CDEEEEE321A1", "QNX6 file system"),
    ("9D275380-40AD-11DB-BF97-000C2911D1B8", "VMware VMFS"),
    ("9198EFFC-31C0-11DB-8F78-000C2911D1B8", "VMware reserved"),
    ("FE3A2A5D-4F32-41A7-B725-ACCC3285A309", "ChromeOS kernel"),
    ("3CB8E202-3B7E-47DD-8A3C-7FF2A13CFCEC", "ChromeOS root fs"),
    ("2E0A753D-9E48-43B0-8337-B15192CB1B5E", "ChromeOS reserved"),
];

#[cfg(test)]
mod tests {
    use super::PartTypeRegistry;
    use crate::label::LabelKind;

    #[test]
    fn dos_lookup_by_code() {
        let registry = PartTypeRegistry::dos();

        assert_eq!(registry.kind(), LabelKind::Dos);
        assert!(registry.has_code_types());

        let linux = registry.by_code(0x83).unwrap();
        assert_eq!(linux.name(), "Linux");
        assert_eq!(linux.code(), Some(0x83));
        assert_eq!(linux.typestr(), None);

        assert!(registry.by_code(0x13).is_none());
        assert!(registry.by_code(0x183).is_none());
        assert!(registry.by_string("0FC63DAF-8483-4772-8E79-3D69D8477DE4").is_none());
    }

    #[test]
    fn gpt_lookup_by_string_ignores_case() {
        let registry = PartTypeRegistry::gpt();

        assert!(!registry.has_code_types());

        let esp = registry
            .by_string("c12a7328-f81f-11d2-ba4b-00a0c93ec93b")
            .unwrap();
        assert_eq!(esp.name(), "EFI System");
        assert_eq!(esp.code(), None);
        assert_eq!(esp.typestr(), Some("C12A7328-F81F-11D2-BA4B-00A0C93EC93B"));

        assert!(registry.by_code(0xef).is_none());
    }

    #[test]
    fn shortcuts_and_native_input() {
        let dos = PartTypeRegistry::dos();
        assert_eq!(dos.parse("L").unwrap().code(), Some(0x83));
        assert_eq!(dos.parse("swap").unwrap().code(), Some(0x82));
        assert_eq!(dos.parse("0xef").unwrap().code(), Some(0xef));
        assert_eq!(dos.parse("7").unwrap().name(), "HPFS/NTFS/exFAT");
        assert!(dos.parse("zz").is_none());

        let gpt = PartTypeRegistry::gpt();
        assert_eq!(gpt.parse("u").unwrap().name(), "EFI System");
        assert_eq!(gpt.parse("home").unwrap().name(), "Linux home");
        assert!(gpt.parse("83").is_none());
    }

    #[test]
    fn defaults_and_listing() {
        assert_eq!(PartTypeRegistry::dos().default_type().name(), "Linux");
        assert_eq!(PartTypeRegistry::gpt().default_type().name(), "Linux filesystem");

        let registry = PartTypeRegistry::dos();
        assert_eq!(registry.iter().count(), registry.len());
        assert_eq!(registry.iter().next().unwrap().name(), "Empty");
        assert_eq!(registry.parttypes()[0], *registry.by_code(0).unwrap());
        assert_eq!(PartTypeRegistry::gpt().parttypes()[0].name(), "EFI System");
    }
}
