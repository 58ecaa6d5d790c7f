//! Accelerator-style adapter with its own memory space.
//!
//! Kernels run on the shared worker pool, but every argument has to be
//! staged into [`MemorySpace::Discrete`] first, so host/device transfers,
//! staleness tracking and the device memory budget behave as they would on
//! a real accelerator.

use std::cmp::Ordering;

use crate::adapter::DeviceAdapter;
use crate::device::{DeviceId, MemorySpace};
use crate::error::Result;
use crate::memory::discrete_memory;
use crate::parallel;

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscreteAdapter;

impl DeviceAdapter for DiscreteAdapter {
    const ID: DeviceId = DeviceId::Discrete;
    const MEMORY_SPACE: MemorySpace = MemorySpace::Discrete;

    /// Available when the device has a non-zero memory budget and the
    /// worker pool can be built.
    fn probe() -> bool {
        let limit = discrete_memory().limit();
        if limit == 0 {
            tracing::info!("discrete device has no memory budget; reporting unavailable");
            return false;
        }
        parallel::pool().is_ok()
    }

    fn schedule<F>(n: usize, f: F) -> Result<()>
    where
        F: Fn(usize) + Send + Sync,
    {
        parallel::schedule(Self::ID, n, f)
    }

    fn scan_inclusive<T, F>(input: &[T], output: &mut [T], op: F) -> Result<()>
    where
        T: Copy + Send + Sync,
        F: Fn(T, T) -> T + Send + Sync,
    {
        parallel::scan_inclusive(Self::ID, input, output, op)
    }

    fn scan_exclusive<T, F>(input: &[T], output: &mut [T], init: T, op: F) -> Result<T>
    where
        T: Copy + Send + Sync,
        F: Fn(T, T) -> T + Send + Sync,
    {
        parallel::scan_exclusive(Self::ID, input, output, init, op)
    }

    fn sort_by<T, C>(data: &mut [T], compare: C) -> Result<()>
    where
        T: Send,
        C: Fn(&T, &T) -> Ordering + Send + Sync,
    {
        parallel::sort_by(Self::ID, data, compare)
    }

    fn reduce<T, F>(input: &[T], init: T, op: F) -> Result<T>
    where
        T: Copy + Send + Sync,
        F: Fn(T, T) -> T + Send + Sync,
    {
        parallel::reduce(Self::ID, input, init, op)
    }

    fn copy<T>(input: &[T], output: &mut [T]) -> Result<()>
    where
        T: Copy + Send + Sync,
    {
        parallel::copy(Self::ID, input, output)
    }

    fn copy_if<T, S, P>(input: &[T], stencil: &[S], predicate: P) -> Result<Vec<T>>
    where
        T: Copy + Send + Sync,
        S: Sync,
        P: Fn(&S) -> bool + Send + Sync,
    {
        parallel::copy_if(Self::ID, input, stencil, predicate)
    }
}
