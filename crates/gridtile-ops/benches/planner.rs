//! Benchmarks for block planning and program construction

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gridtile_device::{DataFormat, Device};
use gridtile_ops::tensor::{DeviceBuffer, Layout, TensorSpec};
use gridtile_ops::{large_matmul_params, run_operation, split_work_to_cores, MatmulOp};
use std::hint::black_box;

/// Benchmark the block search across output sizes (in tiles)
fn bench_large_matmul_params(c: &mut Criterion) {
    let mut group = c.benchmark_group("large_matmul_params");

    let sizes = vec![
        (8, 8),     // Fits one 8x8 grid pass
        (22, 8),    // Forced row split
        (64, 64),   // Large square
        (97, 97),   // Prime, no plan
        (128, 256), // Wide
    ];

    for (mt, nt) in sizes {
        group.throughput(Throughput::Elements((mt * nt) as u64));
        group.bench_with_input(
            BenchmarkId::new("8x8_grid", format!("{}x{}", mt, nt)),
            &(mt, nt),
            |bencher, &(mt, nt)| {
                bencher.iter(|| large_matmul_params(black_box(mt), black_box(nt), 8, 8, 2));
            },
        );
    }

    group.finish();
}

/// Benchmark splitting work units over the grid
fn bench_split_work(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_work_to_cores");
    let grid = Device::wormhole().compute_with_storage_grid_size();

    for units in [1u32, 63, 64, 70, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(units), &units, |bencher, &units| {
            bencher.iter(|| split_work_to_cores(grid, black_box(units), false).unwrap());
        });
    }

    group.finish();
}

/// Benchmark building a full matmul program, including ledger reservations
fn bench_matmul_program(c: &mut Criterion) {
    let mut group = c.benchmark_group("matmul_program");
    let device = Device::wormhole();
    let op = MatmulOp::new(DataFormat::Float16B);

    for (mt, kt, nt) in [(1, 2, 1), (8, 2, 8), (32, 4, 32), (97, 2, 97)] {
        let tensor = |h: u32, w: u32, address: u32| {
            TensorSpec::on_device([1, 1, h * 32, w * 32], Layout::Tile, DataFormat::Float16B, DeviceBuffer::dram(address))
        };
        let inputs = [tensor(mt, kt, 0), tensor(kt, nt, 0x100_0000)];
        let outputs = [tensor(mt, nt, 0x200_0000)];

        group.bench_with_input(
            BenchmarkId::new("bf16", format!("{}x{}x{}", mt, kt, nt)),
            &(inputs, outputs),
            |bencher, (inputs, outputs)| {
                bencher.iter(|| run_operation(&device, &op, inputs, outputs).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_large_matmul_params, bench_split_work, bench_matmul_program);
criterion_main!(benches);
