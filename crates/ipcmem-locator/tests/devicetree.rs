use ipcmem_locator::blob::{memory_window_blob, FdtBuilder};
use ipcmem_locator::{DeviceTreeLocator, LocateError, RegionLocator, DEFAULT_COMPATIBLE};
use proptest::prelude::*;

fn locate(blob: &[u8]) -> Result<ipcmem_locator::RegionDescriptor, LocateError> {
    DeviceTreeLocator::from_bytes(blob, DEFAULT_COMPATIBLE)?.locate()
}

/// Root (2/2 cells) with a `soc` bus of the given cell widths holding one shared memory node.
fn board(address_cells: u32, size_cells: u32, node: impl FnOnce(&mut FdtBuilder)) -> Vec<u8> {
    let mut b = FdtBuilder::new();
    b.begin_node("")
        .prop_strings("compatible", &["vendor,board"])
        .prop_u32("#address-cells", 2)
        .prop_u32("#size-cells", 2)
        .begin_node("cpus")
        .end_node()
        .begin_node("soc")
        .prop_strings("compatible", &["simple-bus"])
        .prop_u32("#address-cells", address_cells)
        .prop_u32("#size-cells", size_cells)
        .begin_node("ipcmemory@40000000");
    node(&mut b);
    b.end_node().end_node().end_node();
    b.finish().unwrap()
}

#[test]
fn resolves_reference_board_node() {
    let blob = memory_window_blob(DEFAULT_COMPATIBLE, 0x4000_0000, 0x1000_0000).unwrap();
    let region = locate(&blob).unwrap();
    assert_eq!(region.node, "ipcmemory@40000000");
    assert_eq!(region.base, 0x4000_0000);
    assert_eq!(region.size, 0x1000_0000);
}

#[test]
fn single_cell_layout() {
    let blob = board(1, 1, |b| {
        b.prop_str("compatible", DEFAULT_COMPATIBLE)
            .prop_cells("reg", &[0x4000_0000, 0x0010_0000]);
    });
    let region = locate(&blob).unwrap();
    assert_eq!((region.base, region.size), (0x4000_0000, 0x0010_0000));
}

#[test]
fn reg_uses_the_parent_bus_cells() {
    // Root is 2/2 but the node sits on a 1/1 bus, as on most SoC boards.
    let mut b = FdtBuilder::new();
    b.begin_node("")
        .prop_u32("#address-cells", 2)
        .prop_u32("#size-cells", 2)
        .begin_node("soc")
        .prop_u32("#address-cells", 1)
        .prop_u32("#size-cells", 1)
        .begin_node("ipcmemory@40000000")
        .prop_str("compatible", DEFAULT_COMPATIBLE)
        .prop_cells("reg", &[0x4000_0000, 0x1000_0000])
        .end_node()
        .end_node()
        .end_node();
    let region = locate(&b.finish().unwrap()).unwrap();
    assert_eq!(region.node, "ipcmemory@40000000");
    assert_eq!((region.base, region.size), (0x4000_0000, 0x1000_0000));

    // A bus wider than the root decodes with its own widths, not the root's.
    let mut b = FdtBuilder::new();
    b.begin_node("")
        .prop_u32("#address-cells", 1)
        .prop_u32("#size-cells", 1)
        .begin_node("soc")
        .prop_u32("#address-cells", 2)
        .prop_u32("#size-cells", 2)
        .begin_node("shm@100000000")
        .prop_str("compatible", DEFAULT_COMPATIBLE)
        .prop_cells("reg", &[0x1, 0x0, 0x0, 0x8000])
        .end_node()
        .end_node()
        .end_node();
    let region = locate(&b.finish().unwrap()).unwrap();
    assert_eq!((region.base, region.size), (0x1_0000_0000, 0x8000));
}

#[test]
fn sibling_cells_do_not_leak_into_the_match() {
    let mut b = FdtBuilder::new();
    b.begin_node("")
        .prop_u32("#address-cells", 1)
        .prop_u32("#size-cells", 1)
        .begin_node("pcie")
        .prop_u32("#address-cells", 3)
        .prop_u32("#size-cells", 2)
        .end_node()
        .begin_node("ipcmemory@40000000")
        .prop_str("compatible", DEFAULT_COMPATIBLE)
        .prop_cells("reg", &[0x4000_0000, 0x1000])
        .end_node()
        .end_node();
    let region = locate(&b.finish().unwrap()).unwrap();
    assert_eq!((region.base, region.size), (0x4000_0000, 0x1000));
}

#[test]
fn matches_any_entry_of_the_compatible_list() {
    let blob = board(2, 2, |b| {
        b.prop_strings("compatible", &["vendor,shm-v2", DEFAULT_COMPATIBLE])
            .prop_cells("reg", &[0x1, 0x0, 0x0, 0x2000]);
    });
    let region = locate(&blob).unwrap();
    assert_eq!(region.base, 0x1_0000_0000);
    assert_eq!(region.size, 0x2000);
}

#[test]
fn missing_size_cells_defaults_to_one() {
    let mut b = FdtBuilder::new();
    b.begin_node("")
        .begin_node("shm@80000000")
        .prop_str("compatible", DEFAULT_COMPATIBLE)
        // Two address cells (default) and one size cell (default).
        .prop_cells("reg", &[0x0, 0x8000_0000, 0x4000])
        .end_node()
        .end_node();
    let region = locate(&b.finish().unwrap()).unwrap();
    assert_eq!((region.base, region.size), (0x8000_0000, 0x4000));
}

#[test]
fn no_matching_node() {
    let blob = memory_window_blob("other,shm", 0x4000_0000, 0x1000).unwrap();
    assert!(matches!(
        locate(&blob),
        Err(LocateError::NoCompatibleNode { compatible }) if compatible == DEFAULT_COMPATIBLE
    ));
}

#[test]
fn custom_compatible_string() {
    let blob = memory_window_blob("acme,mailbox-ram", 0x1000, 0x1000).unwrap();
    let region = DeviceTreeLocator::from_bytes(&blob, "acme,mailbox-ram")
        .unwrap()
        .locate()
        .unwrap();
    assert_eq!(region.base, 0x1000);
}

#[test]
fn disabled_node_is_rejected() {
    let blob = board(2, 2, |b| {
        b.prop_str("compatible", DEFAULT_COMPATIBLE)
            .prop_cells("reg", &[0, 0x4000_0000, 0, 0x1000])
            .prop_str("status", "disabled");
    });
    assert!(matches!(
        locate(&blob),
        Err(LocateError::Disabled { status, .. }) if status == "disabled"
    ));
}

#[test]
fn disabled_matches_are_skipped() {
    let shm = |b: &mut FdtBuilder, name: &str, base: u32, status: &str| {
        b.begin_node(name)
            .prop_str("compatible", DEFAULT_COMPATIBLE)
            .prop_cells("reg", &[base, 0x1000])
            .prop_str("status", status)
            .end_node();
    };

    let mut b = FdtBuilder::new();
    b.begin_node("")
        .prop_u32("#address-cells", 1)
        .prop_u32("#size-cells", 1);
    shm(&mut b, "ipcmemory@30000000", 0x3000_0000, "disabled");
    shm(&mut b, "ipcmemory@40000000", 0x4000_0000, "okay");
    b.end_node();
    let region = locate(&b.finish().unwrap()).unwrap();
    assert_eq!(region.node, "ipcmemory@40000000");
    assert_eq!(region.base, 0x4000_0000);

    let mut b = FdtBuilder::new();
    b.begin_node("")
        .prop_u32("#address-cells", 1)
        .prop_u32("#size-cells", 1);
    shm(&mut b, "ipcmemory@30000000", 0x3000_0000, "disabled");
    shm(&mut b, "ipcmemory@40000000", 0x4000_0000, "fail");
    b.end_node();
    assert!(matches!(
        locate(&b.finish().unwrap()),
        Err(LocateError::Disabled { node, status })
            if node == "ipcmemory@30000000" && status == "disabled"
    ));
}

#[test]
fn reg_problems() {
    let missing = board(2, 2, |b| {
        b.prop_str("compatible", DEFAULT_COMPATIBLE);
    });
    assert!(matches!(locate(&missing), Err(LocateError::MissingReg { .. })));

    let short = board(2, 2, |b| {
        b.prop_str("compatible", DEFAULT_COMPATIBLE)
            .prop_cells("reg", &[0, 0x4000_0000, 0x1000]);
    });
    assert!(matches!(
        locate(&short),
        Err(LocateError::ShortReg { len: 12, needed: 16, .. })
    ));

    let empty = board(2, 2, |b| {
        b.prop_str("compatible", DEFAULT_COMPATIBLE)
            .prop_cells("reg", &[0, 0x4000_0000, 0, 0]);
    });
    assert!(matches!(locate(&empty), Err(LocateError::EmptyRegion { .. })));

    let overflow = board(2, 2, |b| {
        b.prop_str("compatible", DEFAULT_COMPATIBLE)
            .prop_cells("reg", &[0xFFFF_FFFF, 0xFFFF_F000, 0, 0x2000]);
    });
    assert!(matches!(
        locate(&overflow),
        Err(LocateError::RegionOverflow { .. })
    ));
}

#[test]
fn unsupported_cell_widths() {
    let blob = board(3, 2, |b| {
        b.prop_str("compatible", DEFAULT_COMPATIBLE)
            .prop_cells("reg", &[0; 5]);
    });
    assert!(matches!(
        locate(&blob),
        Err(LocateError::UnsupportedCells {
            address_cells: 3,
            size_cells: 2
        })
    ));
}

#[test]
fn trailing_bytes_after_totalsize_are_ignored() {
    let mut blob = memory_window_blob(DEFAULT_COMPATIBLE, 0x4000_0000, 0x1000).unwrap();
    blob.extend_from_slice(&[0xAB; 13]);
    assert_eq!(locate(&blob).unwrap().size, 0x1000);
}

#[test]
fn reads_blob_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("board.dtb");
    std::fs::write(&path, memory_window_blob(DEFAULT_COMPATIBLE, 0x4000_0000, 0x8000).unwrap()).unwrap();

    let region = DeviceTreeLocator::from_path(&path, DEFAULT_COMPATIBLE)
        .unwrap()
        .locate()
        .unwrap();
    assert_eq!(region.size, 0x8000);

    assert!(matches!(
        DeviceTreeLocator::from_path(dir.path().join("missing.dtb"), DEFAULT_COMPATIBLE),
        Err(LocateError::Io { .. })
    ));
}

proptest! {
    #[test]
    fn any_describable_region_resolves(
        base in any::<u64>(),
        size in 1u64..=u64::MAX,
    ) {
        prop_assume!(base.checked_add(size).is_some());
        let blob = memory_window_blob(DEFAULT_COMPATIBLE, base, size).unwrap();
        let region = locate(&blob).unwrap();
        prop_assert_eq!(region.base, base);
        prop_assert_eq!(region.size, size);
    }

    #[test]
    fn truncated_blobs_never_panic(cut in 0usize..200) {
        let blob = memory_window_blob(DEFAULT_COMPATIBLE, 0x4000_0000, 0x1000).unwrap();
        let cut = cut.min(blob.len().saturating_sub(1));
        prop_assert!(locate(&blob[..cut]).is_err());
    }
}
