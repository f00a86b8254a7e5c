use apx_vm_runtime::file_map::{
    AddressLayout, AddressRegion, File, FileInfo, FileMap, FileMapError, FileType,
    DEFINITION_BOUNDARY, DEFINITION_START, INVALID_ADDRESS, PORT_DATA_START, REMOTE_ADDRESS_BIT,
    USER_DATA_START,
};
use apx_vm_runtime::ErrorKind;

fn auto(name: &str, length: u32, file_type: FileType) -> File {
    File::new(FileInfo::new(name, length), file_type)
}

fn fixed(name: &str, address: u32, length: u32) -> File {
    File::new(
        FileInfo::new(name, length).with_address(address),
        FileType::Definition,
    )
}

fn addresses(map: &FileMap) -> Vec<u32> {
    map.iter().map(|(_, file)| file.info.address).collect()
}

#[test]
fn definitions_are_placed_on_megabyte_boundaries() {
    let mut map = FileMap::new();
    for (name, length) in [("TestNode1.apx", 100), ("TestNode2.apx", 200), ("TestNode3.apx", 300)] {
        map.insert_file(auto(name, length, FileType::Definition))
            .expect("definition should be placed");
    }
    assert_eq!(
        addresses(&map),
        vec![
            DEFINITION_START,
            DEFINITION_START + 0x10_0000,
            DEFINITION_START + 0x20_0000
        ]
    );
    let file = map
        .find_by_address(DEFINITION_START + 0x10_0000)
        .expect("second file resident");
    assert_eq!(file.info.name, "TestNode2.apx");
}

#[test]
fn port_data_is_placed_on_kilobyte_boundaries() {
    let mut map = FileMap::new();
    map.insert_file(auto("a.in", 100, FileType::InData))
        .expect("in-data placed");
    map.insert_file(auto("a.out", 10, FileType::OutData))
        .expect("out-data placed");
    map.insert_file(auto("b.out", 0x400, FileType::OutData))
        .expect("out-data placed");
    assert_eq!(addresses(&map), vec![PORT_DATA_START, 0x400, 0x800]);
}

#[test]
fn regions_are_filled_independently() {
    let mut map = FileMap::new();
    map.insert_file(auto("node.apx", 100, FileType::Definition))
        .expect("definition placed");
    map.insert_file(auto("user.bin", 16, FileType::Custom))
        .expect("custom placed");
    map.insert_file(auto("node.out", 8, FileType::OutData))
        .expect("out-data placed");
    assert_eq!(
        addresses(&map),
        vec![PORT_DATA_START, DEFINITION_START, USER_DATA_START]
    );
}

#[test]
fn auto_placement_follows_last_resident_file() {
    let mut map = FileMap::new();
    map.insert_file(fixed("late.apx", DEFINITION_START + 0x30_0000, 10))
        .expect("explicit file admitted");
    map.insert_file(auto("next.apx", 10, FileType::Definition))
        .expect("auto file placed");
    let file = map.find_by_name("next.apx").expect("placed file resident");
    assert_eq!(file.info.address, DEFINITION_START + 0x40_0000);
}

#[test]
fn unknown_type_without_address_is_rejected() {
    let mut map = FileMap::new();
    let err = map
        .insert_file(auto("mystery", 4, FileType::Unknown))
        .expect_err("unknown type cannot be placed");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(map.is_empty());
}

#[test]
fn exhausted_region_reports_out_of_memory() {
    let layout = AddressLayout {
        port_data: AddressRegion::new(0, 0x1000, 0x400),
        ..AddressLayout::default()
    };
    let mut map = FileMap::with_layout(layout).expect("layout is valid");
    for index in 0..4 {
        map.insert_file(auto(&format!("p{index}.in"), 0x400, FileType::InData))
            .expect("room left in region");
    }
    let before = addresses(&map);
    assert_eq!(before, vec![0x000, 0x400, 0x800, 0xC00]);
    let err = map
        .insert_file(auto("overflow.in", 1, FileType::InData))
        .expect_err("region is full");
    assert_eq!(
        err,
        FileMapError::OutOfMemory {
            start: 0,
            end: 0x1000
        }
    );
    assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    assert_eq!(map.len(), 4);
    assert_eq!(addresses(&map), before);
    assert!(map.find_by_name("overflow.in").is_none());
}

#[test]
fn explicit_inserts_reject_overlaps() {
    let mut map = FileMap::new();
    map.insert_file(fixed("middle", 0x1000, 0x100))
        .expect("first file admitted");

    let err = map
        .insert_file(fixed("tail-overlap", 0x1080, 0x10))
        .expect_err("starts inside resident file");
    assert_eq!(err.kind(), ErrorKind::AddressInUse);

    let err = map
        .insert_file(fixed("head-overlap", 0x0F80, 0x100))
        .expect_err("runs into resident file");
    assert_eq!(err.kind(), ErrorKind::FileTooLarge);

    let err = map
        .insert_file(fixed("same", 0x1000, 0x10))
        .expect_err("same address");
    assert_eq!(err.kind(), ErrorKind::AddressInUse);

    map.insert_file(fixed("before", 0x0F00, 0x100))
        .expect("adjacent file admitted");
    map.insert_file(fixed("after", 0x1100, 0x100))
        .expect("adjacent file admitted");
    assert_eq!(addresses(&map), vec![0x0F00, 0x1000, 0x1100]);
    assert_eq!(map.len(), 3);
}

#[test]
fn remote_flag_is_ignored_for_ordering_and_lookup() {
    let mut map = FileMap::new();
    for (name, offset) in [("TestNode1.apx", 0u32), ("TestNode2.apx", 0x10_0000), ("TestNode3.apx", 0x20_0000)] {
        map.insert_file(fixed(name, (DEFINITION_START + offset) | REMOTE_ADDRESS_BIT, 100))
            .expect("remote file admitted");
    }
    let file = map
        .find_by_address((DEFINITION_START + DEFINITION_BOUNDARY) | REMOTE_ADDRESS_BIT)
        .expect("lookup masks flag bits");
    assert_eq!(file.info.name, "TestNode2.apx");
    assert!(file.info.is_remote());
    assert_eq!(
        file.info.address_without_flags(),
        DEFINITION_START + DEFINITION_BOUNDARY
    );
}

#[test]
fn lookups_hit_ranges_and_survive_removal() {
    let mut map = FileMap::new();
    let first = map
        .insert_file(auto("first.out", 0x20, FileType::OutData))
        .expect("placed");
    let second = map
        .insert_file(auto("second.out", 0x20, FileType::OutData))
        .expect("placed");

    assert_eq!(map.find_by_address(0x1F).map(|f| f.info.name.as_str()), Some("first.out"));
    assert_eq!(map.find_by_address(0x10).map(|f| f.info.name.as_str()), Some("first.out"));
    assert!(map.find_by_address(0x20).is_none());
    assert_eq!(map.find_by_address(0x400).map(|f| f.info.name.as_str()), Some("second.out"));

    let removed = map.remove_file(first).expect("first resident");
    assert_eq!(removed.info.name, "first.out");
    assert!(!map.exist(first));
    assert!(map.exist(second));
    assert!(map.find_by_address(0x10).is_none());
    assert_eq!(map.find_by_address(0x410).map(|f| f.info.name.as_str()), Some("second.out"));
    assert!(map.remove_file(first).is_none());
}

#[test]
fn handles_stay_valid_across_inserts() {
    let mut map = FileMap::new();
    let late = map
        .insert_file(fixed("late", 0x2000, 0x10))
        .expect("admitted");
    let early = map
        .insert_file(fixed("early", 0x1000, 0x10))
        .expect("admitted");
    assert_eq!(map.get(late).map(|f| f.info.address), Some(0x2000));
    assert_eq!(map.get(early).map(|f| f.info.address), Some(0x1000));
    assert_ne!(late, early);
}

#[test]
fn file_infos_and_take_all_preserve_order() {
    let mut map = FileMap::new();
    map.insert_file(auto("b.apx", 10, FileType::Definition))
        .expect("placed");
    map.insert_file(auto("a.out", 10, FileType::OutData))
        .expect("placed");
    let infos = map.file_infos();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].name, "a.out");
    assert_eq!(infos[1].name, "b.apx");

    let files = map.take_all();
    assert!(map.is_empty());
    assert!(map.find_by_name("a.out").is_none());
    let names: Vec<&str> = files.iter().map(|(_, f)| f.info.name.as_str()).collect();
    assert_eq!(names, vec!["a.out", "b.apx"]);
}

#[test]
fn layouts_are_validated() {
    let layout = AddressLayout {
        definition: AddressRegion::new(DEFINITION_START, USER_DATA_START, 0x300),
        ..AddressLayout::default()
    };
    let err = FileMap::with_layout(layout).expect_err("boundary is not a power of two");
    assert!(matches!(
        err,
        FileMapError::InvalidLayout {
            region: "definition",
            ..
        }
    ));

    let layout = AddressLayout {
        user_data: AddressRegion::new(USER_DATA_START, USER_DATA_START, 0x10_0000),
        ..AddressLayout::default()
    };
    assert!(FileMap::with_layout(layout).is_err());
    assert!(AddressLayout::default().validate().is_ok());
}

#[test]
fn unassigned_marker_is_all_ones() {
    let info = FileInfo::new("x", 1);
    assert_eq!(info.address, INVALID_ADDRESS);
    assert!(info.is_unassigned());
    assert!(!info.is_remote());
}
