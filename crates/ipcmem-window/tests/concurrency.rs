use ipcmem_window::MemoryWindow;
use std::sync::{Arc, Barrier};

#[test]
fn concurrent_readers_see_the_same_bytes() {
    let win = Arc::new(MemoryWindow::anonymous(0x4000).unwrap());
    let pattern: Vec<u8> = (0..0x4000u32).map(|i| (i % 251) as u8).collect();
    win.write_bytes(0, &pattern).unwrap();
    let pattern = Arc::new(pattern);

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let win = win.clone();
            let pattern = pattern.clone();
            std::thread::spawn(move || {
                for _ in 0..16 {
                    let mut buf = vec![0u8; 0x4000];
                    win.read_bytes(0, &mut buf).unwrap();
                    assert_eq!(buf, *pattern);
                }
            })
        })
        .collect();

    for t in threads {
        t.join().expect("reader thread panicked");
    }
}

#[test]
fn concurrent_writes_to_disjoint_ranges() {
    let win = Arc::new(MemoryWindow::anonymous(0x8000).unwrap());

    let threads: Vec<_> = (0u64..8)
        .map(|i| {
            let win = win.clone();
            std::thread::spawn(move || {
                win.write_bytes(i * 0x1000, &vec![i as u8 + 1; 0x1000])
                    .unwrap();
            })
        })
        .collect();

    for t in threads {
        t.join().expect("writer thread panicked");
    }

    let mut buf = vec![0u8; 0x1000];
    for i in 0u64..8 {
        win.read_bytes(i * 0x1000, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == i as u8 + 1));
    }
}

/// Overlapping writers race: the window does not serialize them. Each overlapped byte ends up
/// holding one of the competing values, and nothing outside the written ranges changes.
#[test]
fn overlapping_writes_are_not_serialized() {
    const SIZE: u64 = 0x3000;
    let win = Arc::new(MemoryWindow::anonymous(SIZE).unwrap());
    win.write_bytes(0, &vec![0xEE; SIZE as usize]).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let writers: Vec<_> = [(0x0800u64, 0xA1u8), (0x1000u64, 0xB2u8)]
        .into_iter()
        .map(|(start, value)| {
            let win = win.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                for _ in 0..64 {
                    win.write_bytes(start, &[value; 0x1000]).unwrap();
                }
            })
        })
        .collect();

    for w in writers {
        w.join().expect("writer thread panicked");
    }

    let mut buf = vec![0u8; SIZE as usize];
    win.read_bytes(0, &mut buf).unwrap();

    assert!(buf[..0x800].iter().all(|b| *b == 0xEE));
    assert!(buf[0x800..0x1000].iter().all(|b| *b == 0xA1));
    assert!(buf[0x1000..0x1800]
        .iter()
        .all(|b| *b == 0xA1 || *b == 0xB2));
    assert!(buf[0x1800..0x2000].iter().all(|b| *b == 0xB2));
    assert!(buf[0x2000..].iter().all(|b| *b == 0xEE));
}
