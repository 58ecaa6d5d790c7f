//! Worklet dispatch across devices: validation, staging and failure paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use proptest::prelude::*;
use sluice_core::worklet::{
    AtomicArrayInOut, AtomicPortal, FieldIn, FieldInNeighborhood, FieldOut, GridDims, Neighborhood, ThreadContext,
    WorkletMapField, WorkletPointNeighborhood,
};
use sluice_core::{ArrayHandle, DeviceId, Dispatcher, Error, MemorySpace, Result, RuntimeDeviceTracker};

struct Polynomial;

impl WorkletMapField for Polynomial {
    type Args = (FieldIn<f32>, FieldOut<f32>);

    fn execute<'a>(&self, _ctx: &ThreadContext<'a>, (x, y): (f32, &'a mut f32)) {
        *y = 3.0 * x * x - 2.0 * x + 0.5;
    }
}

struct CountCalls<'c>(&'c AtomicUsize);

impl WorkletMapField for CountCalls<'_> {
    type Args = (FieldIn<u32>, FieldOut<u32>);

    fn execute<'a>(&self, _ctx: &ThreadContext<'a>, (x, y): (u32, &'a mut u32)) {
        self.0.fetch_add(1, Ordering::Relaxed);
        *y = x;
    }
}

struct PanicsAt(usize);

impl WorkletMapField for PanicsAt {
    type Args = (FieldIn<i32>,);

    fn execute<'a>(&self, ctx: &ThreadContext<'a>, _args: (i32,)) {
        if ctx.index() == self.0 {
            panic!("bad element {}", ctx.index());
        }
    }
}

struct Bin;

impl WorkletMapField for Bin {
    type Args = (FieldIn<u64>, AtomicArrayInOut<u64>);

    fn execute<'a>(&self, _ctx: &ThreadContext<'a>, (value, bins): (u64, AtomicPortal<'a, u64>)) {
        bins.add((value % 8) as usize, 1);
    }
}

struct Laplacian;

impl WorkletPointNeighborhood for Laplacian {
    type Args = (FieldInNeighborhood<f64>, FieldOut<f64>);

    fn execute<'a>(&self, ctx: &ThreadContext<'a>, (hood, out): (Neighborhood<'a, f64>, &'a mut f64)) {
        if ctx.is_boundary() {
            *out = 0.0;
            return;
        }
        *out = hood.get(-1, 0, 0) + hood.get(1, 0, 0) + hood.get(0, -1, 0) + hood.get(0, 1, 0) - 4.0 * hood.center();
    }
}

fn every_device() -> Vec<DeviceId> {
    DeviceId::ALL.into_iter().filter(|id| id.is_compiled_in()).collect()
}

// ============================================================================
// Results
// ============================================================================

#[test]
fn map_field_matches_on_every_device() -> Result<()> {
    let tracker = RuntimeDeviceTracker::new();
    let values: Vec<f32> = (0..10_000).map(|i| i as f32 * 0.01).collect();
    let expected: Vec<f32> = values.iter().map(|x| 3.0 * x * x - 2.0 * x + 0.5).collect();
    let input = ArrayHandle::from_slice(&values)?;

    for device in every_device() {
        let output = ArrayHandle::new();
        let used = Dispatcher::with_tracker(&tracker)
            .on(device)
            .invoke(&Polynomial, (&input, &output))?;
        assert_eq!(used, device);
        assert_eq!(
            output.buffer().and_then(|b| b.authoritative_space()),
            Some(device.memory_space())
        );
        assert_eq!(output.to_vec()?, expected, "results differ on {device}");
    }
    Ok(())
}

#[cfg(feature = "discrete")]
#[test]
fn discrete_dispatch_stages_inputs_once() -> Result<()> {
    let tracker = RuntimeDeviceTracker::new();
    let dispatcher = Dispatcher::with_tracker(&tracker).on(DeviceId::Discrete);
    let input = ArrayHandle::from_slice(&[1.0f32, 2.0, 3.0])?;
    let first = ArrayHandle::new();
    let second = ArrayHandle::new();

    dispatcher.invoke(&Polynomial, (&input, &first))?;
    dispatcher.invoke(&Polynomial, (&input, &second))?;

    let buffer = input.buffer().expect("basic storage");
    assert_eq!(buffer.transfer_count(MemorySpace::Discrete), 1);
    assert!(buffer.is_valid_on(MemorySpace::Host));
    assert!(!first.buffer().expect("basic storage").is_valid_on(MemorySpace::Host));
    Ok(())
}

proptest! {
    #[test]
    fn pure_kernels_are_idempotent(values in prop::collection::vec(-1.0e3f32..1.0e3, 0..2048)) {
        let tracker = RuntimeDeviceTracker::new();
        let dispatcher = Dispatcher::with_tracker(&tracker).on(DeviceId::Threaded);
        let input = ArrayHandle::from_slice(&values).unwrap();
        let first = ArrayHandle::new();
        let second = ArrayHandle::new();

        dispatcher.invoke(&Polynomial, (&input, &first)).unwrap();
        dispatcher.invoke(&Polynomial, (&input, &second)).unwrap();

        let first: Vec<u32> = first.to_vec().unwrap().iter().map(|v| v.to_bits()).collect();
        let second: Vec<u32> = second.to_vec().unwrap().iter().map(|v| v.to_bits()).collect();
        prop_assert_eq!(first, second);
    }
}

#[test]
fn atomic_bins_count_every_element() -> Result<()> {
    let tracker = RuntimeDeviceTracker::new();
    let input = ArrayHandle::counting(0u64, 1, 80_000);
    let bins = ArrayHandle::<u64>::allocate(8);

    Dispatcher::with_tracker(&tracker)
        .on(DeviceId::Threaded)
        .invoke(&Bin, (&input, &bins))?;
    assert_eq!(bins.to_vec()?, vec![10_000; 8]);
    Ok(())
}

#[test]
fn neighborhood_dispatch_over_a_grid() -> Result<()> {
    let tracker = RuntimeDeviceTracker::new();
    let dims = GridDims::d2(4, 3);
    // f(i, j) = i * i + j * j has a constant Laplacian of 4.
    let field: Vec<f64> = (0..dims.count())
        .map(|index| {
            let [i, j, _] = dims.ijk(index);
            (i * i + j * j) as f64
        })
        .collect();
    let field = ArrayHandle::from_slice(&field)?;
    let out = ArrayHandle::new();

    Dispatcher::with_tracker(&tracker)
        .on(DeviceId::Threaded)
        .invoke_neighborhood(&Laplacian, dims, (&field, &out))?;

    let out = out.to_vec()?;
    assert_eq!(out[dims.flat_index([1, 1, 0])], 4.0);
    assert_eq!(out[dims.flat_index([2, 1, 0])], 4.0);
    assert_eq!(out[dims.flat_index([0, 0, 0])], 0.0);
    Ok(())
}

#[test]
fn neighborhood_field_must_match_the_grid() {
    let tracker = RuntimeDeviceTracker::new();
    let field = ArrayHandle::<f64>::allocate(5);
    let out = ArrayHandle::new();
    let err = Dispatcher::with_tracker(&tracker)
        .on(DeviceId::Serial)
        .invoke_neighborhood(&Laplacian, GridDims::d2(2, 2), (&field, &out))
        .unwrap_err();
    assert!(matches!(err, Error::Dispatch(_)));
}

// ============================================================================
// Boundaries and validation
// ============================================================================

#[test]
fn zero_length_dispatch_succeeds_without_invocations() -> Result<()> {
    let tracker = RuntimeDeviceTracker::new();
    let calls = AtomicUsize::new(0);
    let input = ArrayHandle::<u32>::new();
    let output = ArrayHandle::new();

    for device in every_device() {
        Dispatcher::with_tracker(&tracker)
            .on(device)
            .invoke(&CountCalls(&calls), (&input, &output))?;
    }
    assert_eq!(calls.load(Ordering::Relaxed), 0);
    assert!(output.is_empty());
    Ok(())
}

#[cfg(feature = "discrete")]
#[test]
fn mismatched_output_fails_before_any_allocation() {
    let tracker = RuntimeDeviceTracker::new();
    let calls = AtomicUsize::new(0);
    let input = ArrayHandle::counting(0u32, 1, 5).deep_copy().unwrap();
    let output = ArrayHandle::<u32>::allocate(3);

    let err = Dispatcher::with_tracker(&tracker)
        .on(DeviceId::Discrete)
        .invoke(&CountCalls(&calls), (&input, &output))
        .unwrap_err();

    assert!(matches!(err, Error::Dispatch(_)), "unexpected error: {err}");
    assert_eq!(calls.load(Ordering::Relaxed), 0);
    for array in [&input, &output] {
        let buffer = array.buffer().expect("basic storage");
        assert_eq!(buffer.allocation_count(MemorySpace::Discrete), 0);
        assert_eq!(buffer.transfer_count(MemorySpace::Discrete), 0);
    }
    assert_eq!(output.buffer().expect("basic storage").allocation_count(MemorySpace::Host), 0);
    assert_eq!(output.len(), 3);
}

#[test]
fn read_only_output_is_unsupported() {
    let tracker = RuntimeDeviceTracker::new();
    let input = ArrayHandle::from_slice(&[1.0f32, 2.0]).unwrap();
    let output = ArrayHandle::constant(0.0f32, 2);
    let err = Dispatcher::with_tracker(&tracker)
        .on(DeviceId::Serial)
        .invoke(&Polynomial, (&input, &output))
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation(_)));
}

#[test]
fn output_aliasing_an_input_is_rejected() {
    let tracker = RuntimeDeviceTracker::new();
    let values = ArrayHandle::from_slice(&[1.0f32, 2.0]).unwrap();
    let alias = values.clone();
    let err = Dispatcher::with_tracker(&tracker)
        .on(DeviceId::Serial)
        .invoke(&Polynomial, (&values, &alias))
        .unwrap_err();
    assert!(matches!(err, Error::Dispatch(_)));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn kernel_panic_is_an_execution_error_naming_the_device() {
    let tracker = RuntimeDeviceTracker::new();
    let input = ArrayHandle::counting(0i32, 1, 64).deep_copy().unwrap();

    for device in [DeviceId::Serial, DeviceId::Threaded] {
        let err = Dispatcher::with_tracker(&tracker)
            .on(device)
            .invoke(&PanicsAt(17), (&input,))
            .unwrap_err();
        match err {
            Error::Execution { device: failed, message } => {
                assert_eq!(failed, device);
                assert!(message.contains("bad element 17"), "message: {message}");
            }
            other => panic!("expected an execution error, got {other:?}"),
        }
    }

    // Leases were released by the failed dispatch.
    input.fill(1).unwrap();
}

#[test]
fn unavailable_device_is_reported_not_replaced() {
    let tracker = RuntimeDeviceTracker::with_prober(|id| id == DeviceId::Serial);
    let input = ArrayHandle::from_slice(&[1.0f32]).unwrap();
    let output = ArrayHandle::new();
    let err = Dispatcher::with_tracker(&tracker)
        .on(DeviceId::Threaded)
        .invoke(&Polynomial, (&input, &output))
        .unwrap_err();
    assert!(matches!(err, Error::NoAvailableDevice { ref requested } if requested == &[DeviceId::Threaded]));
    assert!(output.is_empty());
}

#[test]
fn concurrent_dispatches_share_inputs() -> Result<()> {
    let tracker = RuntimeDeviceTracker::new();
    let input = ArrayHandle::from_slice(&(0..4096).map(|i| i as f32).collect::<Vec<_>>())?;
    let outputs: Vec<ArrayHandle<f32>> = (0..4).map(|_| ArrayHandle::new()).collect();

    thread::scope(|scope| {
        for output in &outputs {
            let (tracker, input) = (&tracker, &input);
            scope.spawn(move || {
                Dispatcher::with_tracker(tracker)
                    .on(DeviceId::Threaded)
                    .invoke(&Polynomial, (input, output))
                    .unwrap();
            });
        }
    });

    let expected = outputs[0].to_vec()?;
    for output in &outputs[1..] {
        assert_eq!(output.to_vec()?, expected);
    }
    Ok(())
}
