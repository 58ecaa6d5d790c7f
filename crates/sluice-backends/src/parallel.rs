//! rayon pool and parallel algorithms shared by the threaded and discrete
//! adapters.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::OnceLock;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::adapter::{check_lengths, guarded, sequential};
use crate::device::DeviceId;
use crate::error::{BackendError, Result};

/// Inputs shorter than this run sequentially on the calling pool thread.
pub const MIN_PARALLEL_LEN: usize = 4096;

static REQUESTED_THREADS: AtomicUsize = AtomicUsize::new(0);
static POOL: OnceLock<ThreadPool> = OnceLock::new();

/// Request `threads` worker threads (0 = one per core).
///
/// Only effective before the pool is first used; returns `false` once the
/// pool already exists.
pub fn configure_threads(threads: usize) -> bool {
    if POOL.get().is_some() {
        tracing::warn!(threads, "thread pool already built; ignoring thread count");
        return false;
    }
    REQUESTED_THREADS.store(threads, AtomicOrdering::Release);
    true
}

/// Worker count of the pool, once built.
pub fn thread_count() -> Option<usize> {
    POOL.get().map(ThreadPool::current_num_threads)
}

pub(crate) fn pool() -> Result<&'static ThreadPool> {
    if let Some(pool) = POOL.get() {
        return Ok(pool);
    }

    let requested = REQUESTED_THREADS.load(AtomicOrdering::Acquire);
    let built = rayon::ThreadPoolBuilder::new()
        .num_threads(requested)
        .thread_name(|index| format!("sluice-worker-{index}"))
        .build()
        .map_err(|err| BackendError::unsupported(format!("failed to build thread pool: {err}")))?;

    // A concurrent builder may have won; its pool is used and ours dropped.
    let _ = POOL.set(built);
    let pool = POOL
        .get()
        .ok_or_else(|| BackendError::unsupported("thread pool missing after initialisation"))?;
    tracing::info!(threads = pool.current_num_threads(), "thread pool ready");
    Ok(pool)
}

fn run<R: Send>(device: DeviceId, body: impl FnOnce() -> R + Send) -> Result<R> {
    let pool = pool()?;
    guarded(device, || pool.install(body))
}

pub(crate) fn schedule<F>(device: DeviceId, n: usize, f: F) -> Result<()>
where
    F: Fn(usize) + Send + Sync,
{
    run(device, || (0..n).into_par_iter().for_each(|index| f(index)))
}

fn chunk_len(n: usize) -> usize {
    n.div_ceil(rayon::current_num_threads() * 4).max(MIN_PARALLEL_LEN / 4)
}

fn inclusive_in_place<T, F>(input: &[T], output: &mut [T], op: &F)
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Send + Sync,
{
    let n = input.len();
    if n < MIN_PARALLEL_LEN {
        sequential::scan_inclusive(input, output, op);
        return;
    }

    let chunk = chunk_len(n);
    let totals: Vec<T> = output
        .par_chunks_mut(chunk)
        .zip(input.par_chunks(chunk))
        .map(|(out, inp)| {
            sequential::scan_inclusive(inp, out, op);
            out[out.len() - 1]
        })
        .collect();

    let mut carries: Vec<Option<T>> = Vec::with_capacity(totals.len());
    let mut running: Option<T> = None;
    for total in totals {
        carries.push(running);
        running = Some(match running {
            Some(prev) => op(prev, total),
            None => total,
        });
    }

    output
        .par_chunks_mut(chunk)
        .zip(carries.par_iter())
        .for_each(|(out, carry)| {
            if let Some(carry) = *carry {
                for value in out.iter_mut() {
                    *value = op(carry, *value);
                }
            }
        });
}

pub(crate) fn scan_inclusive<T, F>(device: DeviceId, input: &[T], output: &mut [T], op: F) -> Result<()>
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Send + Sync,
{
    check_lengths(device, input.len(), output.len(), "scan output")?;
    run(device, || inclusive_in_place(input, output, &op))
}

pub(crate) fn scan_exclusive<T, F>(device: DeviceId, input: &[T], output: &mut [T], init: T, op: F) -> Result<T>
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Send + Sync,
{
    check_lengths(device, input.len(), output.len(), "scan output")?;
    let n = input.len();
    if n < MIN_PARALLEL_LEN {
        return run(device, || sequential::scan_exclusive(input, output, init, &op));
    }

    run(device, || {
        inclusive_in_place(input, output, &op);
        let total = op(init, output[n - 1]);
        let inclusive = output.to_vec();
        output[1..]
            .par_iter_mut()
            .zip(inclusive[..n - 1].par_iter())
            .for_each(|(out, prefix)| *out = op(init, *prefix));
        output[0] = init;
        total
    })
}

pub(crate) fn sort_by<T, C>(device: DeviceId, data: &mut [T], compare: C) -> Result<()>
where
    T: Send,
    C: Fn(&T, &T) -> Ordering + Send + Sync,
{
    run(device, || data.par_sort_by(compare))
}

pub(crate) fn reduce<T, F>(device: DeviceId, input: &[T], init: T, op: F) -> Result<T>
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Send + Sync,
{
    run(device, || {
        input
            .par_iter()
            .copied()
            .reduce_with(|a, b| op(a, b))
            .map_or(init, |partial| op(init, partial))
    })
}

pub(crate) fn copy<T>(device: DeviceId, input: &[T], output: &mut [T]) -> Result<()>
where
    T: Copy + Send + Sync,
{
    check_lengths(device, input.len(), output.len(), "copy output")?;
    run(device, || {
        output
            .par_chunks_mut(MIN_PARALLEL_LEN)
            .zip(input.par_chunks(MIN_PARALLEL_LEN))
            .for_each(|(out, inp)| out.copy_from_slice(inp))
    })
}

pub(crate) fn copy_if<T, S, P>(device: DeviceId, input: &[T], stencil: &[S], predicate: P) -> Result<Vec<T>>
where
    T: Copy + Send + Sync,
    S: Sync,
    P: Fn(&S) -> bool + Send + Sync,
{
    check_lengths(device, input.len(), stencil.len(), "stencil")?;
    run(device, || {
        input
            .par_iter()
            .zip(stencil.par_iter())
            .filter(|(_, s)| predicate(*s))
            .map(|(v, _)| *v)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DEVICE: DeviceId = DeviceId::Threaded;

    #[test]
    fn large_inclusive_scan_matches_sequential() {
        let input: Vec<u64> = (0..50_000).map(|i| i % 17).collect();
        let mut parallel = vec![0; input.len()];
        let mut expected = vec![0; input.len()];
        scan_inclusive(DEVICE, &input, &mut parallel, |a, b| a + b).unwrap();
        sequential::scan_inclusive(&input, &mut expected, |a, b| a + b);
        assert_eq!(parallel, expected);
    }

    #[test]
    fn large_exclusive_scan_returns_total() {
        let input = vec![1u32; 20_000];
        let mut output = vec![0; input.len()];
        let total = scan_exclusive(DEVICE, &input, &mut output, 5, |a, b| a + b).unwrap();
        assert_eq!(total, 20_005);
        assert_eq!(output[0], 5);
        assert_eq!(output[19_999], 20_004);
    }

    #[test]
    fn scan_respects_operand_order() {
        // Keeps the left operand's first field and the right operand's second: associative, not commutative.
        let input: Vec<(u32, u32)> = (0..10_000).map(|i| (i, i)).collect();
        let mut output = vec![(0, 0); input.len()];
        scan_inclusive(DEVICE, &input, &mut output, |a, b| (a.0, b.1)).unwrap();
        assert!(output.iter().enumerate().all(|(i, v)| *v == (0, i as u32)));
    }

    #[test]
    fn copy_if_preserves_order() {
        let input: Vec<u32> = (0..10_000).collect();
        let kept = copy_if(DEVICE, &input, &input, |v| v % 3 == 0).unwrap();
        assert_eq!(kept.len(), 3334);
        assert!(kept.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn panics_inside_pool_are_captured() {
        let err = schedule(DEVICE, 10_000, |i| {
            if i == 9_999 {
                panic!("boom");
            }
        })
        .unwrap_err();
        assert!(matches!(err, BackendError::Execution { device: DeviceId::Threaded, .. }));
    }

    #[test]
    fn reduce_applies_init_once() {
        let input = vec![2i64; 10_000];
        assert_eq!(reduce(DEVICE, &input, 7, |a, b| a + b).unwrap(), 20_007);
        assert_eq!(reduce(DEVICE, &[] as &[i64], 7, |a, b| a + b).unwrap(), 7);
    }

    proptest! {
        #[test]
        fn parallel_sort_is_stable(values in proptest::collection::vec((0u8..8, any::<u16>()), 0..6000)) {
            let mut parallel = values.clone();
            let mut expected = values;
            sort_by(DEVICE, &mut parallel, |a, b| a.0.cmp(&b.0)).unwrap();
            expected.sort_by(|a, b| a.0.cmp(&b.0));
            prop_assert_eq!(parallel, expected);
        }
    }
}
