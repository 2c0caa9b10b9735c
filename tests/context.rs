use std::{
    fs,
    io::Write,
    path::Path,
};

use fzdisk::{
    Context, ContextOptions, Direction, Error, ErrorKind, FieldTag, LabelDriver, LabelKind,
    Partition, PartitionError, SizeUnit, WipeMode,
};
use tempfile::NamedTempFile;

const SECTOR: u64 = 512;

fn image(sectors: u64) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&vec![0u8; (sectors * SECTOR) as usize]).unwrap();
    file.flush().unwrap();

    file
}

fn open(path: &Path) -> Context {
    Context::open(Some(path), true, false).unwrap()
}

fn sized(size: u64) -> Partition {
    let mut partition = Partition::with_follow_defaults(true, true, false);
    partition.set_size(size);

    partition
}

#[test]
fn small_dos_image() {
    let file = image(2048);
    let mut context = open(file.path());

    assert_eq!(context.nsectors(), 2048);
    assert_eq!(context.sector_size(), 512);
    assert_eq!(context.label_name(), "none");

    context.create_disklabel(Some("dos")).unwrap();
    assert_eq!(context.label().unwrap().kind(), LabelKind::Dos);
    assert_eq!(context.nparts(), 0);

    let partno = context.add_partition(&sized(1024)).unwrap();
    assert_eq!(partno, 1);
    assert_eq!(context.nparts(), 1);

    let partition = &context.partitions()[0];
    assert_eq!(partition.partno(), Some(1));
    assert_eq!(partition.start(), Some(1));
    assert_eq!(partition.size(), Some(1024));
}

#[test]
fn default_start_on_larger_image() {
    let file = image(32768);
    let mut context = open(file.path());

    context.create_disklabel(None).unwrap();
    assert_eq!(context.label_name(), "dos");
    context.add_partition(&sized(1024)).unwrap();

    assert_eq!(context.partitions()[0].start(), Some(2048));
}

#[test]
fn follow_default_partno_is_smallest_free() {
    let file = image(32768);
    let mut context = open(file.path());
    context.create_disklabel(Some("gpt")).unwrap();

    for _ in 0..3 {
        context.add_partition(&sized(2048)).unwrap();
    }
    context.delete_partition(2).unwrap();
    assert_eq!(context.nparts(), 2);

    assert_eq!(context.add_partition(&sized(1024)).unwrap(), 2);
    assert_eq!(context.add_partition(&sized(1024)).unwrap(), 4);

    let numbers: Vec<_> = context
        .table()
        .iter(Direction::Forward)
        .filter_map(|partition| partition.partno())
        .collect();
    assert_eq!(numbers, [1, 2, 3, 4]);
}

#[test]
fn dos_round_trip() {
    let file = image(32768);

    let mut context = open(file.path());
    context.create_disklabel(Some("dos")).unwrap();
    context.add_partition(&sized(4096)).unwrap();
    let mut rest = Partition::with_follow_defaults(true, true, true);
    rest.set_bootable(true);
    context.add_partition(&rest).unwrap();
    let identifier = context.disk_identifier().unwrap();
    assert!(context.is_changed());
    context.write_disklabel().unwrap();
    assert!(!context.is_changed());

    context.assign_device(file.path()).unwrap();
    assert_eq!(context.label().unwrap().kind(), LabelKind::Dos);
    assert_eq!(context.disk_identifier().unwrap(), identifier);
    assert_eq!(context.nparts(), 2);

    let partitions = context.partitions();
    assert_eq!(partitions[1].start(), Some(6144));
    assert_eq!(partitions[1].end(), Some(32767));
    assert!(partitions[1].is_bootable());
    assert_eq!(
        context
            .partition_to_string(&partitions[1], FieldTag::Boot)
            .unwrap(),
        "*"
    );
}

#[test]
fn gpt_round_trip() {
    let file = image(32768);

    let mut context = open(file.path());
    context.create_disklabel(Some("gpt")).unwrap();
    let mut root = Partition::with_follow_defaults(true, true, true);
    root.set_name("root");
    context.add_partition(&root).unwrap();
    context.write_disklabel().unwrap();

    let mut context = Context::open(Some(file.path()), true, true).unwrap();
    assert_eq!(context.label_name(), "gpt");
    assert_eq!(context.nparts(), 1);

    let partition = &context.partitions()[0];
    assert_eq!(partition.start(), Some(2048));
    assert_eq!(partition.end(), Some(30719));
    assert_eq!(
        context.partition_to_string(partition, FieldTag::Name).unwrap(),
        "root"
    );
    assert_eq!(
        context.partition_to_string(partition, FieldTag::Type).unwrap(),
        "Linux filesystem"
    );
    assert_eq!(
        context.partition_to_string(partition, FieldTag::Size).unwrap(),
        "14M"
    );
}

#[test]
fn dos_replaces_gpt() {
    let file = image(32768);

    let mut context = open(file.path());
    context.create_disklabel(Some("gpt")).unwrap();
    context.write_disklabel().unwrap();

    context.create_disklabel(Some("dos")).unwrap();
    context.write_disklabel().unwrap();

    context.assign_device(file.path()).unwrap();
    assert_eq!(context.label_name(), "dos");
}

#[test]
fn wipe_mode_never_keeps_stale_gpt() {
    let file = image(32768);

    let mut context = open(file.path());
    context.create_disklabel(Some("gpt")).unwrap();
    context.write_disklabel().unwrap();

    context.set_wipe_mode(WipeMode::Never);
    context.create_disklabel(Some("dos")).unwrap();
    context.write_disklabel().unwrap();

    // The DOS record overwrote the protective MBR, but the backup GPT header remains.
    let image = fs::read(file.path()).unwrap();
    let last = (32767 * SECTOR) as usize;
    assert_eq!(&image[last..last + 8], b"EFI PART");
}

#[test]
fn read_only_context_rejects_changes() {
    let file = image(2048);
    let before = fs::read(file.path()).unwrap();

    let mut context = Context::open(Some(file.path()), true, true).unwrap();
    assert!(context.is_readonly());

    let err = context.create_disklabel(Some("dos")).unwrap_err();
    assert!(matches!(err, Error::ReadOnly));
    assert_eq!(err.kind(), ErrorKind::ReadOnly);
    assert!(matches!(context.write_disklabel(), Err(Error::ReadOnly)));
    assert!(matches!(
        context.add_partition(&sized(16)),
        Err(Error::ReadOnly)
    ));

    drop(context);
    assert_eq!(fs::read(file.path()).unwrap(), before);
}

#[test]
fn unlabeled_device() {
    let file = image(2048);
    let mut context = open(file.path());

    assert!(context.label().is_none());
    assert_eq!(context.label_name(), "none");
    assert!(context.disk_identifier().is_none());

    let err = context.add_partition(&sized(16)).unwrap_err();
    assert!(matches!(err, Error::NoLabel));
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(matches!(context.write_disklabel(), Err(Error::NoLabel)));
    assert!(matches!(context.free_spaces(), Err(Error::NoLabel)));
}

#[test]
fn type_lookups_depend_on_label() {
    let file = image(32768);
    let mut context = open(file.path());

    context.create_disklabel(Some("gpt")).unwrap();
    let gpt = context.label().unwrap();
    assert_eq!(
        gpt.parttype_from_code(0x83).unwrap_err().kind(),
        ErrorKind::Unsupported
    );
    assert_eq!(
        gpt.parttype_from_string("C12A7328-F81F-11D2-BA4B-00A0C93EC93B")
            .unwrap()
            .name(),
        "EFI System"
    );

    context.create_disklabel(Some("dos")).unwrap();
    let dos = context.label().unwrap();
    assert_eq!(
        dos.parttype_from_string("C12A7328-F81F-11D2-BA4B-00A0C93EC93B")
            .unwrap_err()
            .kind(),
        ErrorKind::Unsupported
    );
    assert_eq!(dos.parttype_from_code(0x07).unwrap().code(), Some(0x07));
    assert_eq!(
        dos.parttype_from_code(0x13).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn unsupported_formats() {
    let file = image(2048);
    let mut context = open(file.path());

    for format in ["sun", "sgi", "bsd", "amiga"] {
        let err = context.create_disklabel(Some(format)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
    assert!(context.label().is_none());
}

#[test]
fn partitions_snapshot_is_stable() {
    let file = image(32768);
    let mut context = open(file.path());
    context.create_disklabel(Some("dos")).unwrap();
    context.add_partition(&sized(2048)).unwrap();

    let first = context.partitions();
    let second = context.partitions();
    assert_eq!(first, second);

    context.add_partition(&sized(2048)).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(context.partitions().len(), 2);
}

#[test]
fn invalid_partitions_are_distinguishable() {
    let file = image(2048);
    let mut context = open(file.path());
    context.create_disklabel(Some("dos")).unwrap();
    context.add_partition(&sized(1024)).unwrap();

    let mut overlapping = Partition::new();
    overlapping.set_partno(2);
    overlapping.set_start(512);
    overlapping.set_size(16);

    let err = context.add_partition(&overlapping).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidPartition(PartitionError::Overlap(1))
    ));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_ne!(err.kind(), ErrorKind::Io);
}

#[test]
fn edit_and_render() {
    let file = image(32768);
    let mut context = ContextOptions::new()
        .details(false)
        .open(file.path())
        .unwrap();
    context.create_disklabel(Some("dos")).unwrap();
    context.add_partition(&sized(3072)).unwrap();

    let swap = context.label().unwrap().parse_parttype("S").unwrap();
    context.set_partition_type(1, &swap).unwrap();
    context.set_partition_bootable(1, true).unwrap();

    let partition = context.partitions()[0].clone();
    let text = |context: &mut Context, field| {
        context.partition_to_string(&partition, field).unwrap()
    };

    let devname = file.path().display().to_string();
    let expected_device = if devname.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{devname}p1")
    } else {
        format!("{devname}1")
    };
    assert_eq!(text(&mut context, FieldTag::Device), expected_device);
    assert_eq!(text(&mut context, FieldTag::Start), "2048");
    assert_eq!(text(&mut context, FieldTag::End), "5119");
    assert_eq!(text(&mut context, FieldTag::Sectors), "3072");
    assert_eq!(text(&mut context, FieldTag::Size), "1.5M");
    assert_eq!(text(&mut context, FieldTag::Type), "Linux swap / Solaris");
    assert_eq!(text(&mut context, FieldTag::TypeId), "82");
    assert_eq!(text(&mut context, FieldTag::FsType), "");

    context.set_size_unit(SizeUnit::Bytes);
    assert_eq!(text(&mut context, FieldTag::Size), "1572864");

    assert!(matches!(
        FieldTag::try_from(99),
        Err(Error::UnknownField(99))
    ));

    let free = context.free_spaces().unwrap();
    assert_eq!(free.first().map(|space| space.start), Some(1));
    assert_eq!(free.last().map(|space| space.end), Some(32767));
}

#[test]
fn missing_device() {
    let err = Context::open(Some(Path::new("/nonexistent/fzdisk.img")), true, false).unwrap_err();

    assert!(matches!(err, Error::DeviceUnavailable { .. }));
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(err.raw_os_error().is_some());
}
