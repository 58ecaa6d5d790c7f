//! Single-threaded reference adapter.

use std::cmp::Ordering;

use crate::adapter::{check_lengths, guarded, sequential, DeviceAdapter};
use crate::device::{DeviceId, MemorySpace};
use crate::error::Result;

/// Runs everything in order on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialAdapter;

impl DeviceAdapter for SerialAdapter {
    const ID: DeviceId = DeviceId::Serial;
    const MEMORY_SPACE: MemorySpace = MemorySpace::Host;

    fn probe() -> bool {
        true
    }

    fn schedule<F>(n: usize, f: F) -> Result<()>
    where
        F: Fn(usize) + Send + Sync,
    {
        guarded(Self::ID, || (0..n).for_each(&f))
    }

    fn scan_inclusive<T, F>(input: &[T], output: &mut [T], op: F) -> Result<()>
    where
        T: Copy + Send + Sync,
        F: Fn(T, T) -> T + Send + Sync,
    {
        check_lengths(Self::ID, input.len(), output.len(), "scan output")?;
        guarded(Self::ID, || sequential::scan_inclusive(input, output, op))
    }

    fn scan_exclusive<T, F>(input: &[T], output: &mut [T], init: T, op: F) -> Result<T>
    where
        T: Copy + Send + Sync,
        F: Fn(T, T) -> T + Send + Sync,
    {
        check_lengths(Self::ID, input.len(), output.len(), "scan output")?;
        guarded(Self::ID, || sequential::scan_exclusive(input, output, init, op))
    }

    fn sort_by<T, C>(data: &mut [T], compare: C) -> Result<()>
    where
        T: Send,
        C: Fn(&T, &T) -> Ordering + Send + Sync,
    {
        guarded(Self::ID, || sequential::sort_by(data, compare))
    }

    fn reduce<T, F>(input: &[T], init: T, op: F) -> Result<T>
    where
        T: Copy + Send + Sync,
        F: Fn(T, T) -> T + Send + Sync,
    {
        guarded(Self::ID, || sequential::reduce(input, init, op))
    }

    fn copy<T>(input: &[T], output: &mut [T]) -> Result<()>
    where
        T: Copy + Send + Sync,
    {
        check_lengths(Self::ID, input.len(), output.len(), "copy output")?;
        output.copy_from_slice(input);
        Ok(())
    }

    fn copy_if<T, S, P>(input: &[T], stencil: &[S], predicate: P) -> Result<Vec<T>>
    where
        T: Copy + Send + Sync,
        S: Sync,
        P: Fn(&S) -> bool + Send + Sync,
    {
        check_lengths(Self::ID, input.len(), stencil.len(), "stencil")?;
        guarded(Self::ID, || sequential::copy_if(input, stencil, predicate))
    }
}
