//! Argument roles: how an [`ArrayHandle`] is bound to a worklet parameter.
//!
//! A role validates its handle on the host, stages it into a portal on the
//! execution device and hands each invocation its view of the data.

use std::fmt;
use std::marker::PhantomData;

use sluice_backends::MemorySpace;

use crate::array_handle::ArrayHandle;
use crate::buffer::Buffer;
use crate::element::{AtomicElement, Element};
use crate::error::{Error, Result};
use crate::portal::{ReadPortal, WritePortal};
use crate::worklet::context::{GridDims, ThreadContext};

/// Shape of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Domain {
    pub len: usize,
    /// Point grid of a neighborhood dispatch.
    pub grid: Option<GridDims>,
}

/// A buffer bound to one argument position.
#[derive(Debug, Clone)]
pub struct Binding {
    pub position: usize,
    pub role: &'static str,
    pub writes: bool,
    pub buffer: Buffer,
}

/// One argument role.
///
/// Roles are marker types named in a worklet's `Args` tuple; users never
/// call these functions directly.
pub trait ArgRole: 'static {
    /// What the caller passes.
    type Arg<'h>;
    /// Device-side state held for the whole dispatch.
    type Staged: Send + Sync + 'static;
    /// What a single invocation receives.
    type Exec<'a>;

    const NAME: &'static str;
    const WRITES: bool;
    /// Whether this argument's length sets the dispatch range.
    const DEFINES_DOMAIN: bool;

    fn len(arg: &Self::Arg<'_>) -> usize;

    fn buffers(arg: &Self::Arg<'_>) -> Vec<Buffer>;

    fn validate(arg: &Self::Arg<'_>, domain: &Domain, position: usize) -> Result<()>;

    /// Host-side fix-ups after validation, such as sizing outputs.
    fn prepare(_arg: &Self::Arg<'_>, _domain: &Domain) -> Result<()> {
        Ok(())
    }

    fn stage(arg: &Self::Arg<'_>, space: MemorySpace) -> Result<Self::Staged>;

    /// # Safety
    /// `ctx.index()` is within the validated domain, and each index is
    /// fetched by at most one invocation per dispatch.
    unsafe fn fetch<'a>(staged: &'a Self::Staged, ctx: &ThreadContext<'_>) -> Self::Exec<'a>;
}

fn check_len<R: ArgRole>(actual: usize, expected: usize, position: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::dispatch(format!(
            "argument {position} ({}) has {actual} values but the dispatch range is {expected}",
            R::NAME
        )))
    }
}

fn check_writable<T: Element, R: ArgRole>(array: &ArrayHandle<T>, position: usize) -> Result<()> {
    if array.is_writable() {
        Ok(())
    } else {
        Err(Error::unsupported(format!(
            "argument {position} ({}) is bound to read-only {} storage",
            R::NAME,
            array.storage_kind()
        )))
    }
}

macro_rules! role_marker {
    ($(#[$doc:meta])* $name:ident<$t:ident: $bound:path>) => {
        $(#[$doc])*
        pub struct $name<$t: $bound>(PhantomData<fn() -> $t>);

        impl<$t: $bound> fmt::Debug for $name<$t> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}<{}>", stringify!($name), $t::type_name())
            }
        }
    };
}

role_marker! {
    /// One input value per invocation.
    FieldIn<T: Element>
}
role_marker! {
    /// One output slot per invocation. An empty handle is allocated to the
    /// dispatch range; previous contents are not transferred.
    FieldOut<T: Element>
}
role_marker! {
    /// One read-write slot per invocation.
    FieldInOut<T: Element>
}
role_marker! {
    /// Random read access to the whole array.
    WholeArrayIn<T: Element>
}
role_marker! {
    /// Shared read-modify-write access to the whole array.
    ///
    /// The only role through which invocations may touch the same element;
    /// every access is atomic, so results do not depend on scheduling
    /// beyond the order of commutative updates.
    AtomicArrayInOut<T: AtomicElement>
}
role_marker! {
    /// Values around the invocation's grid point. Neighborhood worklets only.
    FieldInNeighborhood<T: Element>
}

impl<T: Element> ArgRole for FieldIn<T> {
    type Arg<'h> = &'h ArrayHandle<T>;
    type Staged = ReadPortal<T>;
    type Exec<'a> = T;

    const NAME: &'static str = "FieldIn";
    const WRITES: bool = false;
    const DEFINES_DOMAIN: bool = true;

    fn len(arg: &Self::Arg<'_>) -> usize {
        arg.len()
    }

    fn buffers(arg: &Self::Arg<'_>) -> Vec<Buffer> {
        arg.buffers()
    }

    fn validate(arg: &Self::Arg<'_>, domain: &Domain, position: usize) -> Result<()> {
        check_len::<Self>(arg.len(), domain.len, position)
    }

    fn stage(arg: &Self::Arg<'_>, space: MemorySpace) -> Result<Self::Staged> {
        arg.read_portal_on(space)
    }

    #[inline]
    unsafe fn fetch<'a>(staged: &'a Self::Staged, ctx: &ThreadContext<'_>) -> T {
        staged.get_unchecked(ctx.index())
    }
}

impl<T: Element> ArgRole for FieldOut<T> {
    type Arg<'h> = &'h ArrayHandle<T>;
    type Staged = WritePortal<T>;
    type Exec<'a> = &'a mut T;

    const NAME: &'static str = "FieldOut";
    const WRITES: bool = true;
    const DEFINES_DOMAIN: bool = false;

    fn len(arg: &Self::Arg<'_>) -> usize {
        arg.len()
    }

    fn buffers(arg: &Self::Arg<'_>) -> Vec<Buffer> {
        arg.buffers()
    }

    fn validate(arg: &Self::Arg<'_>, domain: &Domain, position: usize) -> Result<()> {
        check_writable::<T, Self>(arg, position)?;
        if arg.is_empty() {
            return Ok(());
        }
        check_len::<Self>(arg.len(), domain.len, position)
    }

    fn prepare(arg: &Self::Arg<'_>, domain: &Domain) -> Result<()> {
        if arg.len() != domain.len {
            arg.resize(domain.len, false)?;
        }
        Ok(())
    }

    fn stage(arg: &Self::Arg<'_>, space: MemorySpace) -> Result<Self::Staged> {
        arg.output_portal_on(space)
    }

    #[inline]
    unsafe fn fetch<'a>(staged: &'a Self::Staged, ctx: &ThreadContext<'_>) -> &'a mut T {
        &mut *staged.slot(ctx.index())
    }
}

impl<T: Element> ArgRole for FieldInOut<T> {
    type Arg<'h> = &'h ArrayHandle<T>;
    type Staged = WritePortal<T>;
    type Exec<'a> = &'a mut T;

    const NAME: &'static str = "FieldInOut";
    const WRITES: bool = true;
    const DEFINES_DOMAIN: bool = true;

    fn len(arg: &Self::Arg<'_>) -> usize {
        arg.len()
    }

    fn buffers(arg: &Self::Arg<'_>) -> Vec<Buffer> {
        arg.buffers()
    }

    fn validate(arg: &Self::Arg<'_>, domain: &Domain, position: usize) -> Result<()> {
        check_writable::<T, Self>(arg, position)?;
        check_len::<Self>(arg.len(), domain.len, position)
    }

    fn stage(arg: &Self::Arg<'_>, space: MemorySpace) -> Result<Self::Staged> {
        arg.write_portal_on(space)
    }

    #[inline]
    unsafe fn fetch<'a>(staged: &'a Self::Staged, ctx: &ThreadContext<'_>) -> &'a mut T {
        &mut *staged.slot(ctx.index())
    }
}

impl<T: Element> ArgRole for WholeArrayIn<T> {
    type Arg<'h> = &'h ArrayHandle<T>;
    type Staged = ReadPortal<T>;
    type Exec<'a> = &'a ReadPortal<T>;

    const NAME: &'static str = "WholeArrayIn";
    const WRITES: bool = false;
    const DEFINES_DOMAIN: bool = false;

    fn len(arg: &Self::Arg<'_>) -> usize {
        arg.len()
    }

    fn buffers(arg: &Self::Arg<'_>) -> Vec<Buffer> {
        arg.buffers()
    }

    fn validate(_arg: &Self::Arg<'_>, _domain: &Domain, _position: usize) -> Result<()> {
        Ok(())
    }

    fn stage(arg: &Self::Arg<'_>, space: MemorySpace) -> Result<Self::Staged> {
        arg.read_portal_on(space)
    }

    #[inline]
    unsafe fn fetch<'a>(staged: &'a Self::Staged, _ctx: &ThreadContext<'_>) -> &'a ReadPortal<T> {
        staged
    }
}

/// Atomic view of an array shared by every invocation.
pub struct AtomicPortal<'a, T: AtomicElement> {
    portal: &'a WritePortal<T>,
}

impl<T: AtomicElement> AtomicPortal<'_, T> {
    pub fn len(&self) -> usize {
        self.portal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portal.is_empty()
    }

    #[inline]
    fn slot(&self, index: usize) -> *mut T {
        assert!(
            index < self.portal.len(),
            "atomic index {index} out of bounds for length {}",
            self.portal.len()
        );
        // SAFETY: in bounds; all accesses through this portal are atomic.
        unsafe { self.portal.slot(index) }
    }

    /// Adds `value`, returning the previous value.
    pub fn add(&self, index: usize, value: T) -> T {
        // SAFETY: `slot` returns an aligned in-bounds pointer only accessed atomically.
        unsafe { T::fetch_add(self.slot(index), value) }
    }

    pub fn min(&self, index: usize, value: T) -> T {
        // SAFETY: as for `add`.
        unsafe { T::fetch_min(self.slot(index), value) }
    }

    pub fn max(&self, index: usize, value: T) -> T {
        // SAFETY: as for `add`.
        unsafe { T::fetch_max(self.slot(index), value) }
    }

    pub fn load(&self, index: usize) -> T {
        // SAFETY: as for `add`.
        unsafe { T::load(self.slot(index)) }
    }

    pub fn store(&self, index: usize, value: T) {
        // SAFETY: as for `add`.
        unsafe { T::store(self.slot(index), value) }
    }

    pub fn compare_exchange(&self, index: usize, current: T, new: T) -> std::result::Result<T, T> {
        // SAFETY: as for `add`.
        unsafe { T::compare_exchange(self.slot(index), current, new) }
    }
}

impl<T: AtomicElement> ArgRole for AtomicArrayInOut<T> {
    type Arg<'h> = &'h ArrayHandle<T>;
    type Staged = WritePortal<T>;
    type Exec<'a> = AtomicPortal<'a, T>;

    const NAME: &'static str = "AtomicArrayInOut";
    const WRITES: bool = true;
    const DEFINES_DOMAIN: bool = false;

    fn len(arg: &Self::Arg<'_>) -> usize {
        arg.len()
    }

    fn buffers(arg: &Self::Arg<'_>) -> Vec<Buffer> {
        arg.buffers()
    }

    fn validate(arg: &Self::Arg<'_>, _domain: &Domain, position: usize) -> Result<()> {
        check_writable::<T, Self>(arg, position)
    }

    fn stage(arg: &Self::Arg<'_>, space: MemorySpace) -> Result<Self::Staged> {
        arg.write_portal_on(space)
    }

    #[inline]
    unsafe fn fetch<'a>(staged: &'a Self::Staged, _ctx: &ThreadContext<'_>) -> AtomicPortal<'a, T> {
        AtomicPortal { portal: staged }
    }
}

/// Read access to the points around one grid point. Offsets that leave
/// the grid are clamped to its edge.
pub struct Neighborhood<'a, T: Element> {
    portal: &'a ReadPortal<T>,
    ijk: [usize; 3],
    dims: GridDims,
}

impl<T: Element> Neighborhood<'_, T> {
    pub fn center(&self) -> T {
        self.get(0, 0, 0)
    }

    pub fn get(&self, di: isize, dj: isize, dk: isize) -> T {
        let extents = self.dims.extents();
        let mut ijk = [0usize; 3];
        for (axis, offset) in [di, dj, dk].into_iter().enumerate() {
            let last = extents[axis].saturating_sub(1);
            ijk[axis] = self.ijk[axis].saturating_add_signed(offset).min(last);
        }
        self.portal.get(self.dims.flat_index(ijk))
    }

    pub fn ijk(&self) -> [usize; 3] {
        self.ijk
    }
}

impl<T: Element> ArgRole for FieldInNeighborhood<T> {
    type Arg<'h> = &'h ArrayHandle<T>;
    type Staged = ReadPortal<T>;
    type Exec<'a> = Neighborhood<'a, T>;

    const NAME: &'static str = "FieldInNeighborhood";
    const WRITES: bool = false;
    const DEFINES_DOMAIN: bool = true;

    fn len(arg: &Self::Arg<'_>) -> usize {
        arg.len()
    }

    fn buffers(arg: &Self::Arg<'_>) -> Vec<Buffer> {
        arg.buffers()
    }

    fn validate(arg: &Self::Arg<'_>, domain: &Domain, position: usize) -> Result<()> {
        if domain.grid.is_none() {
            return Err(Error::dispatch(format!(
                "argument {position} ({}) needs a point neighborhood dispatch",
                Self::NAME
            )));
        }
        check_len::<Self>(arg.len(), domain.len, position)
    }

    fn stage(arg: &Self::Arg<'_>, space: MemorySpace) -> Result<Self::Staged> {
        arg.read_portal_on(space)
    }

    #[inline]
    unsafe fn fetch<'a>(staged: &'a Self::Staged, ctx: &ThreadContext<'_>) -> Neighborhood<'a, T> {
        Neighborhood {
            portal: staged,
            ijk: ctx.ijk(),
            dims: ctx.dims(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worklet::context::ErrorBuffer;
    use sluice_backends::DeviceId;

    fn domain(len: usize) -> Domain {
        Domain { len, grid: None }
    }

    #[test]
    fn field_out_accepts_empty_and_matching_lengths() {
        let empty = ArrayHandle::<f32>::new();
        let matching = ArrayHandle::<f32>::allocate(5);
        let short = ArrayHandle::<f32>::allocate(3);
        assert!(FieldOut::<f32>::validate(&&empty, &domain(5), 1).is_ok());
        assert!(FieldOut::<f32>::validate(&&matching, &domain(5), 1).is_ok());
        assert!(matches!(FieldOut::<f32>::validate(&&short, &domain(5), 1), Err(Error::Dispatch(_))));
    }

    #[test]
    fn write_roles_reject_computed_storage() {
        let counting = ArrayHandle::counting(0u32, 1, 4);
        assert!(matches!(
            FieldInOut::<u32>::validate(&&counting, &domain(4), 0),
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(matches!(
            AtomicArrayInOut::<u32>::validate(&&counting, &domain(4), 0),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn neighborhood_role_needs_a_grid() {
        let values = ArrayHandle::<f64>::allocate(4);
        assert!(matches!(
            FieldInNeighborhood::<f64>::validate(&&values, &domain(4), 0),
            Err(Error::Dispatch(_))
        ));
        let grid = Domain {
            len: 4,
            grid: Some(GridDims::d2(2, 2)),
        };
        assert!(FieldInNeighborhood::<f64>::validate(&&values, &grid, 0).is_ok());
    }

    #[test]
    fn neighborhood_clamps_at_edges() {
        let values = ArrayHandle::counting(0i32, 1, 9);
        let portal = values.read_portal().unwrap();
        let errors = ErrorBuffer::default();
        let dims = GridDims::d2(3, 3);
        let ctx = ThreadContext::new(0, dims, DeviceId::Serial, &errors);
        let hood = unsafe { FieldInNeighborhood::<i32>::fetch(&portal, &ctx) };
        assert_eq!(hood.center(), 0);
        assert_eq!(hood.get(-1, -1, 0), 0);
        assert_eq!(hood.get(1, 0, 0), 1);
        assert_eq!(hood.get(0, 5, 0), 6);
        assert_eq!(hood.get(0, 0, 1), 0);
    }

    #[test]
    fn atomic_portal_updates_in_place() {
        let counts = ArrayHandle::<u32>::allocate(2);
        let staged = AtomicArrayInOut::<u32>::stage(&&counts, MemorySpace::Host).unwrap();
        let errors = ErrorBuffer::default();
        let ctx = ThreadContext::new(0, GridDims::d1(1), DeviceId::Serial, &errors);
        let atomic = unsafe { AtomicArrayInOut::<u32>::fetch(&staged, &ctx) };
        atomic.add(1, 3);
        atomic.max(0, 9);
        assert_eq!(atomic.load(1), 3);
        drop(staged);
        assert_eq!(counts.to_vec().unwrap(), vec![9, 3]);
    }
}
