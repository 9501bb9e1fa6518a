#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
#[cfg(not(target_arch = "wasm32"))]
use ipcmem_window::{MemoryWindow, SliceSink, SliceSource};
#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
fn criterion_config() -> Criterion {
    match std::env::var("IPCMEM_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            .warm_up_time(Duration::from_millis(200))
            .measurement_time(Duration::from_secs(1))
            .sample_size(10),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(30),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_bulk(c: &mut Criterion) {
    const LEN: usize = 64 * 1024;
    let win = MemoryWindow::anonymous(1024 * 1024).unwrap();
    let src = vec![0xA5u8; LEN];
    let mut dst = vec![0u8; LEN];

    let mut group = c.benchmark_group("window_bulk");
    group.throughput(Throughput::Bytes(LEN as u64));

    group.bench_function("write_64k", |b| {
        b.iter(|| {
            let t = win
                .write(black_box(0x1000), LEN as u64, &mut SliceSource::new(&src))
                .unwrap();
            black_box(t);
        })
    });

    group.bench_function("read_64k", |b| {
        b.iter(|| {
            let t = win
                .read(black_box(0x1000), LEN as u64, &mut SliceSink::new(&mut dst))
                .unwrap();
            black_box(t);
        })
    });

    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_bulk
}
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
