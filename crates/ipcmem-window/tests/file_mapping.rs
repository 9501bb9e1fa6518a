#![cfg(unix)]

use ipcmem_window::{BackingKind, MemoryWindow, WindowError};
use std::io::{Seek, SeekFrom, Write};

#[test]
fn mapped_file_is_shared_with_the_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.as_file().set_len(0x3000).unwrap();
    file.seek(SeekFrom::Start(0x1010)).unwrap();
    file.write_all(&[0x11, 0x22, 0x33, 0x44]).unwrap();
    file.flush().unwrap();
    let path = file.into_temp_path();

    // Deliberately not page aligned.
    let win = MemoryWindow::map_file(&path, 0x1010, 0x100).unwrap();
    assert_eq!(win.backing(), BackingKind::File);
    assert_eq!(win.size(), 0x100);
    assert_eq!(win.read_u32_le(0).unwrap(), 0x4433_2211);

    win.write_bytes(0xFC, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    assert!(win.read_bytes(0xFD, &mut [0u8; 4]).is_err());
    drop(win);

    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(&on_disk[0x110C..0x1110], &[0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(on_disk[0x1110], 0);
}

#[test]
fn short_file_is_an_initialization_failure() {
    let file = tempfile::NamedTempFile::new().unwrap();
    file.as_file().set_len(0x800).unwrap();

    let err = MemoryWindow::map_file(file.path(), 0x400, 0x800).unwrap_err();
    assert!(matches!(err, WindowError::Map { offset: 0x400, size: 0x800, .. }));
}

#[test]
fn missing_file_is_an_initialization_failure() {
    let dir = tempfile::tempdir().unwrap();
    let err = MemoryWindow::map_file(dir.path().join("nope"), 0, 0x1000).unwrap_err();
    match err {
        WindowError::Map { source, .. } => {
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound)
        }
        other => panic!("unexpected error: {other}"),
    }
}
