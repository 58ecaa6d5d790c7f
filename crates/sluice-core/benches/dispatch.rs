//! Benchmarks for worklet dispatch
//!
//! Measures a memory-bound map kernel on every compiled-in device, and the
//! fixed cost of a dispatch on a tiny domain.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sluice_core::worklet::{FieldIn, FieldInOut, FieldInNeighborhood, FieldOut, GridDims, Neighborhood, ThreadContext};
use sluice_core::worklet::{WorkletMapField, WorkletPointNeighborhood};
use sluice_core::{ArrayHandle, DeviceId, Dispatcher, RuntimeDeviceTracker};

struct Saxpy(f32);

impl WorkletMapField for Saxpy {
    type Args = (FieldIn<f32>, FieldInOut<f32>);

    #[inline]
    fn execute<'a>(&self, _ctx: &ThreadContext<'a>, (x, y): (f32, &'a mut f32)) {
        *y += self.0 * x;
    }
}

struct Smooth;

impl WorkletPointNeighborhood for Smooth {
    type Args = (FieldInNeighborhood<f32>, FieldOut<f32>);

    #[inline]
    fn execute<'a>(&self, _ctx: &ThreadContext<'a>, (hood, out): (Neighborhood<'a, f32>, &'a mut f32)) {
        *out = (hood.get(-1, 0, 0) + hood.get(1, 0, 0) + hood.get(0, -1, 0) + hood.get(0, 1, 0)) * 0.25;
    }
}

fn devices() -> impl Iterator<Item = DeviceId> {
    DeviceId::ALL.into_iter().filter(|id| id.is_compiled_in())
}

fn benchmark_map_field(c: &mut Criterion) {
    let tracker = RuntimeDeviceTracker::new();
    let mut group = c.benchmark_group("map_field_saxpy");

    for size in [1_024usize, 65_536, 1_048_576] {
        group.throughput(Throughput::Elements(size as u64));
        let x = ArrayHandle::counting(0.0f32, 0.5, size);
        let y = ArrayHandle::<f32>::allocate(size);
        y.fill(1.0).unwrap();

        for device in devices() {
            let dispatcher = Dispatcher::with_tracker(&tracker).on(device);
            group.bench_with_input(BenchmarkId::new(device.name(), size), &size, |b, _| {
                b.iter(|| dispatcher.invoke(&Saxpy(black_box(1e-3)), (&x, &y)).unwrap());
            });
        }
    }

    group.finish();
}

fn benchmark_dispatch_overhead(c: &mut Criterion) {
    let tracker = RuntimeDeviceTracker::new();
    let mut group = c.benchmark_group("dispatch_overhead");
    let x = ArrayHandle::from_slice(&[1.0f32; 4]).unwrap();
    let y = ArrayHandle::from_slice(&[0.0f32; 4]).unwrap();

    for device in devices() {
        let dispatcher = Dispatcher::with_tracker(&tracker).on(device);
        group.bench_function(device.name(), |b| {
            b.iter(|| dispatcher.invoke(&Saxpy(2.0), (&x, &y)).unwrap());
        });
    }

    group.finish();
}

fn benchmark_neighborhood(c: &mut Criterion) {
    let tracker = RuntimeDeviceTracker::new();
    let mut group = c.benchmark_group("point_neighborhood_smooth");

    for side in [64usize, 256, 1024] {
        let dims = GridDims::d2(side, side);
        group.throughput(Throughput::Elements(dims.count() as u64));
        let field = ArrayHandle::counting(0.0f32, 1.0, dims.count());
        let out = ArrayHandle::new();

        for device in devices() {
            let dispatcher = Dispatcher::with_tracker(&tracker).on(device);
            group.bench_with_input(BenchmarkId::new(device.name(), dims), &dims, |b, &dims| {
                b.iter(|| dispatcher.invoke_neighborhood(&Smooth, dims, (&field, &out)).unwrap());
            });
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_map_field,
    benchmark_dispatch_overhead,
    benchmark_neighborhood
);
criterion_main!(benches);
