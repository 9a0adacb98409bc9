// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use xclock_engine::batch::SampleBatch;
use xclock_engine::edges::detect_edges;
use xclock_engine::rollover::RolloverState;

/// Square waves with `channels` different periods, 40000 ticks per scan.
fn create_batch(scans: usize, channels: usize) -> SampleBatch {
    let mut batch = SampleBatch::new(channels + 1);
    let mut row = vec![0; channels + 1];
    for scan in 0..scans {
        for (channel, level) in row.iter_mut().take(channels).enumerate() {
            *level = ((scan / (channel + 2)) % 2) as i64;
        }
        row[channels] = scan as i64 * 40_000;
        batch.push_row(&row).unwrap();
    }
    batch
}

fn bench_detect_edges(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect_edges");
    for &scans in &[500, 5_000, 50_000] {
        let batch = create_batch(scans, 4);
        let prepend = vec![0; 5];
        group.bench_with_input(BenchmarkId::from_parameter(scans), &scans, |b, _| {
            b.iter(|| black_box(detect_edges(&batch, 4, Some(prepend.as_slice())).unwrap()));
        });
    }
    group.finish();
}

fn bench_rollover_correction(c: &mut Criterion) {
    let batch = create_batch(50_000, 1);
    c.bench_function("rollover_correction", |b| {
        b.iter(|| {
            let mut batch = batch.clone();
            let mut state = RolloverState::new();
            black_box(state.correct(&mut batch));
        });
    });
}

criterion_group!(benches, bench_detect_edges, bench_rollover_correction);
criterion_main!(benches);
