//! The device adapter contract and static dispatch over device tags.

use std::any::Any;
use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};

use crate::device::{DeviceId, MemorySpace};
use crate::error::{BackendError, Result};

/// Bulk parallel primitives offered by one backend.
///
/// Adapters are zero-sized and used statically: generic code is
/// monomorphised per adapter and selected at run time with
/// [`visit_adapter`]. Every slice argument must live in
/// [`DeviceAdapter::MEMORY_SPACE`].
///
/// Panics raised by callbacks never cross the device boundary; they are
/// reported as [`BackendError::Execution`] naming [`DeviceAdapter::ID`].
pub trait DeviceAdapter: Send + Sync + 'static {
    const ID: DeviceId;
    const MEMORY_SPACE: MemorySpace;

    fn name() -> &'static str {
        Self::ID.name()
    }

    /// Whether the device can run in this process. Called once per tracker.
    fn probe() -> bool;

    /// Invoke `f` once for every index in `0..n`, in no particular order.
    fn schedule<F>(n: usize, f: F) -> Result<()>
    where
        F: Fn(usize) + Send + Sync;

    /// `output[i] = input[0] op ... op input[i]`.
    fn scan_inclusive<T, F>(input: &[T], output: &mut [T], op: F) -> Result<()>
    where
        T: Copy + Send + Sync,
        F: Fn(T, T) -> T + Send + Sync;

    /// `output[0] = init`, `output[i] = init op input[0] op ... op input[i - 1]`.
    /// Returns the reduction of `init` with every input.
    fn scan_exclusive<T, F>(input: &[T], output: &mut [T], init: T, op: F) -> Result<T>
    where
        T: Copy + Send + Sync,
        F: Fn(T, T) -> T + Send + Sync;

    /// Stable sort.
    fn sort_by<T, C>(data: &mut [T], compare: C) -> Result<()>
    where
        T: Send,
        C: Fn(&T, &T) -> Ordering + Send + Sync;

    /// `init op input[0] op ... op input[n - 1]` for an associative `op`.
    fn reduce<T, F>(input: &[T], init: T, op: F) -> Result<T>
    where
        T: Copy + Send + Sync,
        F: Fn(T, T) -> T + Send + Sync;

    fn copy<T>(input: &[T], output: &mut [T]) -> Result<()>
    where
        T: Copy + Send + Sync;

    /// Stream compaction: keep `input[i]` where `predicate(&stencil[i])`.
    fn copy_if<T, S, P>(input: &[T], stencil: &[S], predicate: P) -> Result<Vec<T>>
    where
        T: Copy + Send + Sync,
        S: Sync,
        P: Fn(&S) -> bool + Send + Sync;
}

/// Generic code run against whichever adapter a [`DeviceId`] names.
pub trait AdapterVisitor {
    type Output;

    fn visit<A: DeviceAdapter>(self) -> Self::Output;
}

/// Run `visitor` monomorphised for the adapter behind `id`.
///
/// Fails with [`BackendError::DeviceUnavailable`] when the adapter was not
/// compiled in.
pub fn visit_adapter<V: AdapterVisitor>(id: DeviceId, visitor: V) -> Result<V::Output> {
    match id {
        DeviceId::Serial => Ok(visitor.visit::<crate::serial::SerialAdapter>()),
        #[cfg(feature = "threaded")]
        DeviceId::Threaded => Ok(visitor.visit::<crate::threaded::ThreadedAdapter>()),
        #[cfg(feature = "discrete")]
        DeviceId::Discrete => Ok(visitor.visit::<crate::discrete::DiscreteAdapter>()),
        #[allow(unreachable_patterns)]
        other => Err(BackendError::DeviceUnavailable(other)),
    }
}

struct Probe;

impl AdapterVisitor for Probe {
    type Output = bool;

    fn visit<A: DeviceAdapter>(self) -> bool {
        A::probe()
    }
}

/// Runtime availability of `id`; `false` when not compiled in.
pub fn probe_device(id: DeviceId) -> bool {
    visit_adapter(id, Probe).unwrap_or(false)
}

/// Run `body`, turning a panic into an execution error for `device`.
pub(crate) fn guarded<R>(device: DeviceId, body: impl FnOnce() -> R) -> Result<R> {
    panic::catch_unwind(AssertUnwindSafe(body)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(device = %device, message = %message, "kernel panicked");
        BackendError::execution(device, message)
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "kernel panicked".to_string()
    }
}

pub(crate) fn check_lengths(device: DeviceId, expected: usize, actual: usize, what: &str) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(BackendError::execution(
            device,
            format!("{what}: expected {expected} elements, got {actual}"),
        ))
    }
}

/// Sequential building blocks shared by the host adapters.
pub(crate) mod sequential {
    use std::cmp::Ordering;

    pub fn scan_inclusive<T: Copy>(input: &[T], output: &mut [T], op: impl Fn(T, T) -> T) {
        let mut acc: Option<T> = None;
        for (out, &value) in output.iter_mut().zip(input) {
            let next = match acc {
                Some(prev) => op(prev, value),
                None => value,
            };
            *out = next;
            acc = Some(next);
        }
    }

    pub fn scan_exclusive<T: Copy>(input: &[T], output: &mut [T], init: T, op: impl Fn(T, T) -> T) -> T {
        let mut acc = init;
        for (out, &value) in output.iter_mut().zip(input) {
            *out = acc;
            acc = op(acc, value);
        }
        acc
    }

    pub fn sort_by<T>(data: &mut [T], compare: impl Fn(&T, &T) -> Ordering) {
        data.sort_by(compare);
    }

    pub fn reduce<T: Copy>(input: &[T], init: T, op: impl Fn(T, T) -> T) -> T {
        input.iter().copied().fold(init, op)
    }

    pub fn copy_if<T: Copy, S>(input: &[T], stencil: &[S], predicate: impl Fn(&S) -> bool) -> Vec<T> {
        input
            .iter()
            .zip(stencil)
            .filter(|(_, s)| predicate(*s))
            .map(|(v, _)| *v)
            .collect()
    }
}
