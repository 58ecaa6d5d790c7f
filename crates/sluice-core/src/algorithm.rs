//! Bulk algorithms over array handles.
//!
//! Each function resolves its device through the process-wide tracker,
//! stages its arrays on that device's memory space and runs the adapter's
//! primitive there. Results stay authoritative on the device.
//!
//! ```
//! use sluice_core::{algorithm, ArrayHandle, DeviceSelection};
//!
//! let values = ArrayHandle::from_slice(&[3u32, 1, 2]).unwrap();
//! algorithm::sort(DeviceSelection::Any, &values).unwrap();
//! assert_eq!(values.to_vec().unwrap(), vec![1, 2, 3]);
//! assert_eq!(algorithm::reduce(DeviceSelection::Any, &values, 0, |a, b| a + b).unwrap(), 6);
//! ```

use std::cmp::Ordering;

use sluice_backends::{visit_adapter, AdapterVisitor, DeviceAdapter, DeviceSelection, RuntimeDeviceTracker};
use sluice_tracing::perf_span;

use crate::array_handle::ArrayHandle;
use crate::element::Element;
use crate::error::{Error, Result};

/// Resolves the device, then runs `visitor` on it. Visitors resize their
/// outputs, so nothing is touched when no device can run.
fn run<V, R>(name: &'static str, selection: DeviceSelection, visitor: V) -> Result<R>
where
    V: AdapterVisitor<Output = Result<R>>,
{
    let device = RuntimeDeviceTracker::global().resolve(selection)?;
    let _perf = perf_span!(name);
    tracing::debug!(algorithm = name, device = %device, "running algorithm");
    visit_adapter(device, visitor)?
}

fn check_distinct<T: Element, U: Element>(input: &ArrayHandle<T>, output: &ArrayHandle<U>, what: &str) -> Result<()> {
    if input.same_storage(output) {
        Err(Error::dispatch(format!("{what}: output shares storage with an input")))
    } else {
        Ok(())
    }
}

/// Order for `PartialOrd` values; incomparable values (NaN) sort last.
fn total_order<T: PartialOrd>(a: &T, b: &T) -> Ordering {
    a.partial_cmp(b).unwrap_or_else(|| {
        let a_ordered = a.partial_cmp(a).is_some();
        let b_ordered = b.partial_cmp(b).is_some();
        b_ordered.cmp(&a_ordered)
    })
}

struct CopyOp<'a, T: Element> {
    input: &'a ArrayHandle<T>,
    output: &'a ArrayHandle<T>,
}

impl<T: Element> AdapterVisitor for CopyOp<'_, T> {
    type Output = Result<()>;

    fn visit<A: DeviceAdapter>(self) -> Result<()> {
        self.output.resize(self.input.len(), false)?;
        let source = self.input.read_portal_on(A::MEMORY_SPACE)?;
        let mut target = self.output.output_portal_on(A::MEMORY_SPACE)?;
        A::copy(&*source.values(), target.as_mut_slice())?;
        Ok(())
    }
}

/// Copy `input` into `output`, resizing `output` to match.
pub fn copy<T: Element>(selection: DeviceSelection, input: &ArrayHandle<T>, output: &ArrayHandle<T>) -> Result<()> {
    check_distinct(input, output, "copy")?;
    run("copy", selection, CopyOp { input, output })
}

struct CopySubRangeOp<'a, T: Element> {
    input: &'a ArrayHandle<T>,
    start: usize,
    count: usize,
    output: &'a ArrayHandle<T>,
    output_start: usize,
}

impl<T: Element> AdapterVisitor for CopySubRangeOp<'_, T> {
    type Output = Result<()>;

    fn visit<A: DeviceAdapter>(self) -> Result<()> {
        let output_end = self.output_start + self.count;
        if output_end > self.output.len() {
            self.output.resize(output_end, true)?;
        }
        let source = self.input.read_portal_on(A::MEMORY_SPACE)?;
        let mut target = self.output.write_portal_on(A::MEMORY_SPACE)?;
        let values = source.values();
        A::copy(
            &values[self.start..self.start + self.count],
            &mut target.as_mut_slice()[self.output_start..self.output_start + self.count],
        )?;
        Ok(())
    }
}

/// Copy `count` elements of `input` starting at `start` into `output` at
/// `output_start`. `output` grows when the range runs past its end; its
/// other elements are kept.
pub fn copy_sub_range<T: Element>(
    selection: DeviceSelection,
    input: &ArrayHandle<T>,
    start: usize,
    count: usize,
    output: &ArrayHandle<T>,
    output_start: usize,
) -> Result<()> {
    let end = start.checked_add(count).ok_or(Error::OutOfBounds {
        index: usize::MAX,
        len: input.len(),
    })?;
    if end > input.len() {
        return Err(Error::OutOfBounds {
            index: end,
            len: input.len(),
        });
    }
    if output_start > output.len() {
        return Err(Error::OutOfBounds {
            index: output_start,
            len: output.len(),
        });
    }
    check_distinct(input, output, "copy_sub_range")?;
    if count == 0 {
        return Ok(());
    }

    run(
        "copy_sub_range",
        selection,
        CopySubRangeOp {
            input,
            start,
            count,
            output,
            output_start,
        },
    )
}

struct CopyIfOp<'a, T: Element, S: Element, P> {
    input: &'a ArrayHandle<T>,
    stencil: &'a ArrayHandle<S>,
    output: &'a ArrayHandle<T>,
    predicate: P,
}

impl<T, S, P> AdapterVisitor for CopyIfOp<'_, T, S, P>
where
    T: Element,
    S: Element,
    P: Fn(&S) -> bool + Send + Sync,
{
    type Output = Result<usize>;

    fn visit<A: DeviceAdapter>(self) -> Result<usize> {
        let kept = {
            let source = self.input.read_portal_on(A::MEMORY_SPACE)?;
            let stencil = self.stencil.read_portal_on(A::MEMORY_SPACE)?;
            A::copy_if(&*source.values(), &*stencil.values(), self.predicate)?
        };
        self.output.resize(kept.len(), false)?;
        let mut target = self.output.output_portal_on(A::MEMORY_SPACE)?;
        A::copy(kept.as_slice(), target.as_mut_slice())?;
        Ok(kept.len())
    }
}

/// Stream compaction: keep `input[i]` where `predicate(&stencil[i])`, in
/// order. `output` is resized to the number kept, which is returned.
pub fn copy_if<T, S, P>(
    selection: DeviceSelection,
    input: &ArrayHandle<T>,
    stencil: &ArrayHandle<S>,
    output: &ArrayHandle<T>,
    predicate: P,
) -> Result<usize>
where
    T: Element,
    S: Element,
    P: Fn(&S) -> bool + Send + Sync,
{
    if stencil.len() != input.len() {
        return Err(Error::BufferSizeMismatch {
            expected: input.len(),
            actual: stencil.len(),
        });
    }
    check_distinct(input, output, "copy_if")?;
    check_distinct(stencil, output, "copy_if")?;
    run(
        "copy_if",
        selection,
        CopyIfOp {
            input,
            stencil,
            output,
            predicate,
        },
    )
}

struct FillOp<'a, T: Element> {
    output: &'a ArrayHandle<T>,
    value: T,
}

impl<T: Element> AdapterVisitor for FillOp<'_, T> {
    type Output = Result<()>;

    fn visit<A: DeviceAdapter>(self) -> Result<()> {
        let target = self.output.output_portal_on(A::MEMORY_SPACE)?;
        let value = self.value;
        let target = &target;
        A::schedule(target.len(), move |index| {
            // SAFETY: `schedule` visits each in-bounds index once.
            unsafe { *target.slot(index) = value };
        })?;
        Ok(())
    }
}

/// Set every element of `output` to `value`.
pub fn fill<T: Element>(selection: DeviceSelection, output: &ArrayHandle<T>, value: T) -> Result<()> {
    if !output.is_writable() {
        return Err(Error::unsupported(format!(
            "cannot fill a {} array",
            output.storage_kind()
        )));
    }
    run("fill", selection, FillOp { output, value })
}

struct ReduceOp<'a, T: Element, F> {
    input: &'a ArrayHandle<T>,
    init: T,
    op: F,
}

impl<T, F> AdapterVisitor for ReduceOp<'_, T, F>
where
    T: Element,
    F: Fn(T, T) -> T + Send + Sync,
{
    type Output = Result<T>;

    fn visit<A: DeviceAdapter>(self) -> Result<T> {
        let source = self.input.read_portal_on(A::MEMORY_SPACE)?;
        Ok(A::reduce(&*source.values(), self.init, self.op)?)
    }
}

/// `init op input[0] op ... op input[n - 1]` for an associative `op`.
pub fn reduce<T, F>(selection: DeviceSelection, input: &ArrayHandle<T>, init: T, op: F) -> Result<T>
where
    T: Element,
    F: Fn(T, T) -> T + Send + Sync,
{
    run("reduce", selection, ReduceOp { input, init, op })
}

struct ScanOp<'a, T: Element, F> {
    input: &'a ArrayHandle<T>,
    output: &'a ArrayHandle<T>,
    init: Option<T>,
    op: F,
}

impl<T, F> AdapterVisitor for ScanOp<'_, T, F>
where
    T: Element,
    F: Fn(T, T) -> T + Send + Sync,
{
    type Output = Result<Option<T>>;

    fn visit<A: DeviceAdapter>(self) -> Result<Option<T>> {
        self.output.resize(self.input.len(), false)?;
        let source = self.input.read_portal_on(A::MEMORY_SPACE)?;
        let mut target = self.output.output_portal_on(A::MEMORY_SPACE)?;
        match self.init {
            Some(init) => Ok(Some(A::scan_exclusive(
                &*source.values(),
                target.as_mut_slice(),
                init,
                self.op,
            )?)),
            None => {
                A::scan_inclusive(&*source.values(), target.as_mut_slice(), self.op)?;
                Ok(None)
            }
        }
    }
}

/// `output[i] = input[0] op ... op input[i]`; `output` is resized to match.
pub fn scan_inclusive<T, F>(
    selection: DeviceSelection,
    input: &ArrayHandle<T>,
    output: &ArrayHandle<T>,
    op: F,
) -> Result<()>
where
    T: Element,
    F: Fn(T, T) -> T + Send + Sync,
{
    check_distinct(input, output, "scan_inclusive")?;
    run(
        "scan_inclusive",
        selection,
        ScanOp {
            input,
            output,
            init: None,
            op,
        },
    )
    .map(drop)
}

/// `output[i] = init op input[0] op ... op input[i - 1]`. Returns the
/// reduction of `init` with every input.
pub fn scan_exclusive<T, F>(
    selection: DeviceSelection,
    input: &ArrayHandle<T>,
    output: &ArrayHandle<T>,
    init: T,
    op: F,
) -> Result<T>
where
    T: Element,
    F: Fn(T, T) -> T + Send + Sync,
{
    check_distinct(input, output, "scan_exclusive")?;
    let total = run(
        "scan_exclusive",
        selection,
        ScanOp {
            input,
            output,
            init: Some(init),
            op,
        },
    )?;
    Ok(total.unwrap_or(init))
}

struct SortOp<'a, T: Element, C> {
    data: &'a ArrayHandle<T>,
    compare: C,
}

impl<T, C> AdapterVisitor for SortOp<'_, T, C>
where
    T: Element,
    C: Fn(&T, &T) -> Ordering + Send + Sync,
{
    type Output = Result<()>;

    fn visit<A: DeviceAdapter>(self) -> Result<()> {
        let mut portal = self.data.write_portal_on(A::MEMORY_SPACE)?;
        A::sort_by(portal.as_mut_slice(), self.compare)?;
        Ok(())
    }
}

/// Sort in place, ascending. Incomparable values (NaN) go last.
pub fn sort<T: Element + PartialOrd>(selection: DeviceSelection, data: &ArrayHandle<T>) -> Result<()> {
    sort_by(selection, data, total_order::<T>)
}

/// Stable sort in place by `compare`.
pub fn sort_by<T, C>(selection: DeviceSelection, data: &ArrayHandle<T>, compare: C) -> Result<()>
where
    T: Element,
    C: Fn(&T, &T) -> Ordering + Send + Sync,
{
    run("sort", selection, SortOp { data, compare })
}

struct SortByKeyOp<'a, K: Element, V: Element> {
    keys: &'a ArrayHandle<K>,
    values: &'a ArrayHandle<V>,
}

impl<K, V> AdapterVisitor for SortByKeyOp<'_, K, V>
where
    K: Element + PartialOrd,
    V: Element,
{
    type Output = Result<()>;

    fn visit<A: DeviceAdapter>(self) -> Result<()> {
        let mut keys = self.keys.write_portal_on(A::MEMORY_SPACE)?;
        let mut values = self.values.write_portal_on(A::MEMORY_SPACE)?;

        let mut pairs: Vec<(K, V)> = keys
            .as_slice()
            .iter()
            .copied()
            .zip(values.as_slice().iter().copied())
            .collect();
        A::sort_by(pairs.as_mut_slice(), |a, b| total_order(&a.0, &b.0))?;

        for (index, (key, value)) in pairs.into_iter().enumerate() {
            keys.set(index, key);
            values.set(index, value);
        }
        Ok(())
    }
}

/// Stable sort of `keys`, applying the same permutation to `values`.
pub fn sort_by_key<K, V>(selection: DeviceSelection, keys: &ArrayHandle<K>, values: &ArrayHandle<V>) -> Result<()>
where
    K: Element + PartialOrd,
    V: Element,
{
    if keys.len() != values.len() {
        return Err(Error::BufferSizeMismatch {
            expected: keys.len(),
            actual: values.len(),
        });
    }
    check_distinct(keys, values, "sort_by_key")?;
    run("sort_by_key", selection, SortByKeyOp { keys, values })
}

struct UniqueOp<'a, T: Element> {
    data: &'a ArrayHandle<T>,
}

impl<T: Element + PartialEq> AdapterVisitor for UniqueOp<'_, T> {
    type Output = Result<usize>;

    fn visit<A: DeviceAdapter>(self) -> Result<usize> {
        let kept = {
            let source = self.data.read_portal_on(A::MEMORY_SPACE)?;
            let values = source.values();
            let indices: Vec<usize> = (0..values.len()).collect();
            let values = &values[..];
            A::copy_if(values, indices.as_slice(), |&i| i == 0 || values[i] != values[i - 1])?
        };
        self.data.resize(kept.len(), false)?;
        let mut target = self.data.output_portal_on(A::MEMORY_SPACE)?;
        A::copy(kept.as_slice(), target.as_mut_slice())?;
        Ok(kept.len())
    }
}

/// Remove adjacent duplicates in place, returning the new length.
pub fn unique<T: Element + PartialEq>(selection: DeviceSelection, data: &ArrayHandle<T>) -> Result<usize> {
    if !data.is_writable() {
        return Err(Error::unsupported(format!(
            "cannot compact a {} array in place",
            data.storage_kind()
        )));
    }
    run("unique", selection, UniqueOp { data })
}

struct BoundsOp<'a, T: Element> {
    sorted: &'a ArrayHandle<T>,
    values: &'a ArrayHandle<T>,
    output: &'a ArrayHandle<usize>,
    upper: bool,
}

impl<T: Element + PartialOrd> AdapterVisitor for BoundsOp<'_, T> {
    type Output = Result<()>;

    fn visit<A: DeviceAdapter>(self) -> Result<()> {
        self.output.resize(self.values.len(), false)?;
        let sorted = self.sorted.read_portal_on(A::MEMORY_SPACE)?;
        let values = self.values.read_portal_on(A::MEMORY_SPACE)?;
        let target = self.output.output_portal_on(A::MEMORY_SPACE)?;
        let sorted = sorted.values();
        let (sorted, values, target) = (&sorted[..], &values, &target);
        let upper = self.upper;

        A::schedule(values.len(), move |index| {
            let value = values.get(index);
            let position = if upper {
                sorted.partition_point(|x| total_order(x, &value) != Ordering::Greater)
            } else {
                sorted.partition_point(|x| total_order(x, &value) == Ordering::Less)
            };
            // SAFETY: `schedule` visits each in-bounds index once.
            unsafe { *target.slot(index) = position };
        })?;
        Ok(())
    }
}

fn bounds<T: Element + PartialOrd>(
    name: &'static str,
    selection: DeviceSelection,
    sorted: &ArrayHandle<T>,
    values: &ArrayHandle<T>,
    output: &ArrayHandle<usize>,
    upper: bool,
) -> Result<()> {
    check_distinct(sorted, output, name)?;
    check_distinct(values, output, name)?;
    run(
        name,
        selection,
        BoundsOp {
            sorted,
            values,
            output,
            upper,
        },
    )
}

/// For each of `values`, the first index in `sorted` whose element is not
/// less than it.
pub fn lower_bounds<T: Element + PartialOrd>(
    selection: DeviceSelection,
    sorted: &ArrayHandle<T>,
    values: &ArrayHandle<T>,
    output: &ArrayHandle<usize>,
) -> Result<()> {
    bounds("lower_bounds", selection, sorted, values, output, false)
}

/// For each of `values`, the first index in `sorted` whose element is
/// greater than it.
pub fn upper_bounds<T: Element + PartialOrd>(
    selection: DeviceSelection,
    sorted: &ArrayHandle<T>,
    values: &ArrayHandle<T>,
    output: &ArrayHandle<usize>,
) -> Result<()> {
    bounds("upper_bounds", selection, sorted, values, output, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_backends::DeviceId;

    const SERIAL: DeviceSelection = DeviceSelection::Device(DeviceId::Serial);

    #[test]
    fn total_order_puts_nan_last() {
        let mut values = [2.0f32, f32::NAN, -1.0, 0.5];
        values.sort_by(total_order);
        assert_eq!(&values[..3], &[-1.0, 0.5, 2.0]);
        assert!(values[3].is_nan());
    }

    #[test]
    fn copy_resizes_output() {
        let input = ArrayHandle::counting(1u8, 1, 4);
        let output = ArrayHandle::from_slice(&[9u8; 7]).unwrap();
        copy(SERIAL, &input, &output).unwrap();
        assert_eq!(output.to_vec().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn copy_sub_range_grows_and_keeps_prefix() {
        let input = ArrayHandle::from_slice(&[10i32, 20, 30, 40]).unwrap();
        let output = ArrayHandle::from_slice(&[1i32, 2]).unwrap();
        copy_sub_range(SERIAL, &input, 1, 3, &output, 1).unwrap();
        assert_eq!(output.to_vec().unwrap(), vec![1, 20, 30, 40]);

        let err = copy_sub_range(SERIAL, &input, 2, 3, &output, 0).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { index: 5, len: 4 }));
    }

    #[test]
    fn copy_if_checks_stencil_length() {
        let input = ArrayHandle::from_slice(&[1u16, 2, 3]).unwrap();
        let stencil = ArrayHandle::from_slice(&[1u8, 0]).unwrap();
        let output = ArrayHandle::new();
        let err = copy_if(SERIAL, &input, &stencil, &output, |&s| s != 0).unwrap_err();
        assert!(matches!(err, Error::BufferSizeMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn exclusive_scan_of_empty_returns_init() {
        let input = ArrayHandle::<i64>::new();
        let output = ArrayHandle::new();
        assert_eq!(scan_exclusive(SERIAL, &input, &output, 5, |a, b| a + b).unwrap(), 5);
        assert!(output.is_empty());
    }

    #[test]
    fn sort_by_key_moves_values_with_keys() {
        let keys = ArrayHandle::from_slice(&[3u32, 1, 2, 1]).unwrap();
        let values = ArrayHandle::from_slice(&[30.0f32, 10.0, 20.0, 11.0]).unwrap();
        sort_by_key(SERIAL, &keys, &values).unwrap();
        assert_eq!(keys.to_vec().unwrap(), vec![1, 1, 2, 3]);
        assert_eq!(values.to_vec().unwrap(), vec![10.0, 11.0, 20.0, 30.0]);
    }

    #[test]
    fn unique_compacts_in_place() {
        let data = ArrayHandle::from_slice(&[1i32, 1, 2, 2, 2, 3, 1]).unwrap();
        assert_eq!(unique(SERIAL, &data).unwrap(), 4);
        assert_eq!(data.to_vec().unwrap(), vec![1, 2, 3, 1]);
    }

    #[test]
    fn bounds_of_sorted_values() {
        let sorted = ArrayHandle::from_slice(&[1i32, 3, 3, 5]).unwrap();
        let values = ArrayHandle::from_slice(&[0i32, 3, 4, 9]).unwrap();
        let output = ArrayHandle::new();
        lower_bounds(SERIAL, &sorted, &values, &output).unwrap();
        assert_eq!(output.to_vec().unwrap(), vec![0, 1, 3, 4]);
        upper_bounds(SERIAL, &sorted, &values, &output).unwrap();
        assert_eq!(output.to_vec().unwrap(), vec![0, 3, 3, 4]);
    }

    #[test]
    fn computed_arrays_cannot_be_filled() {
        let constant = ArrayHandle::constant(1u8, 3);
        assert!(matches!(fill(SERIAL, &constant, 2), Err(Error::UnsupportedOperation(_))));
    }
}
