//! Paging benchmarks
//!
//! - Zero-page faults with a roomy pool (no eviction)
//! - Fault churn through a small pool (every fault evicts)
//! - File-backed faults

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use core::hint::black_box;
use nos_vm::sim::{SimFile, SimFramePool, SimPageDirectory, SimSwap};
use nos_vm::{AddressSpace, PageFault, VirtAddr, Vm, VmConfig, PAGE_SIZE};

const BASE: usize = 0x0804_8000;
const SP: VirtAddr = VirtAddr::new(0xc000_0000);

fn setup(frames: usize, swap_slots: usize) -> (Vm, Arc<AddressSpace>) {
    let pool = Arc::new(SimFramePool::new(frames));
    let vm = Vm::new(VmConfig::default(), pool.clone(), Arc::new(SimSwap::new(swap_slots))).unwrap();
    let space = vm.create_address_space(1, Arc::new(SimPageDirectory::new(pool)));
    (vm, space)
}

fn fault_at(addr: usize) -> PageFault {
    PageFault::not_present(VirtAddr::new(addr), false, true, SP)
}

fn bench_zero_faults(c: &mut Criterion) {
    c.bench_function("zero_page_fault", |b| {
        b.iter_batched(
            || {
                let (vm, space) = setup(64, 0);
                for i in 0..64 {
                    space.declare_zero(VirtAddr::new(BASE + i * PAGE_SIZE), true).unwrap();
                }
                (vm, space)
            },
            |(vm, space)| {
                for i in 0..64 {
                    black_box(vm.handle_page_fault(&space, &fault_at(BASE + i * PAGE_SIZE)));
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_eviction_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction_churn");
    for frames in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(frames), &frames, |b, &frames| {
            let pages = frames * 4;
            let (vm, space) = setup(frames, pages);
            for i in 0..pages {
                space.declare_zero(VirtAddr::new(BASE + i * PAGE_SIZE), true).unwrap();
            }
            let mut next = 0;
            b.iter(|| {
                // Cycling over more pages than frames makes every fault evict.
                let addr = BASE + (next % pages) * PAGE_SIZE;
                next += 1;
                let result = vm.handle_page_fault(&space, &fault_at(addr));
                black_box(result)
            })
        });
    }
    group.finish();
}

fn bench_file_faults(c: &mut Criterion) {
    let file = Arc::new(SimFile::new(vec![0x90; 16 * PAGE_SIZE]));
    c.bench_function("file_page_fault", |b| {
        b.iter_batched(
            || {
                let (vm, space) = setup(16, 0);
                space
                    .declare_segment(file.clone(), 0, VirtAddr::new(BASE), 16 * PAGE_SIZE, 0, false)
                    .unwrap();
                (vm, space)
            },
            |(vm, space)| {
                for i in 0..16 {
                    black_box(vm.handle_page_fault(&space, &fault_at(BASE + i * PAGE_SIZE)));
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(vm_benchmarks, bench_zero_faults, bench_eviction_churn, bench_file_faults);

criterion_main!(vm_benchmarks);
