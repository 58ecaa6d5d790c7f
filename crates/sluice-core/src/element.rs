//! Element types storable in an [`ArrayHandle`](crate::ArrayHandle).
//!
//! Scalars (`i8`..`i64`, `u8`..`u64`, `isize`, `usize`, `f32`, `f64`) and
//! small fixed vectors `[S; 2]`, `[S; 3]`, `[S; 4]` of those scalars.
//! Vectors are stored interleaved, one element per `size_of::<[S; N]>()`
//! bytes.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use bytemuck::Pod;

/// A plain-old-data value with a fixed number of scalar components.
pub trait Element: Pod + Send + Sync + Debug + 'static {
    /// Scalar type of each component (`Self` for scalars). A component is
    /// its own component.
    type Component: Element<Component = Self::Component>;

    const NUM_COMPONENTS: usize;

    fn component(&self, index: usize) -> Self::Component;

    fn set_component(&mut self, index: usize, value: Self::Component);

    /// `start + step * index`, component-wise. Integers wrap.
    fn affine(start: Self, step: Self, index: usize) -> Self;

    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

macro_rules! impl_int_element {
    ($($t:ty),*) => {$(
        impl Element for $t {
            type Component = $t;
            const NUM_COMPONENTS: usize = 1;

            #[inline]
            fn component(&self, _index: usize) -> $t {
                *self
            }

            #[inline]
            fn set_component(&mut self, _index: usize, value: $t) {
                *self = value;
            }

            #[inline]
            fn affine(start: $t, step: $t, index: usize) -> $t {
                start.wrapping_add(step.wrapping_mul(index as $t))
            }
        }
    )*};
}

macro_rules! impl_float_element {
    ($($t:ty),*) => {$(
        impl Element for $t {
            type Component = $t;
            const NUM_COMPONENTS: usize = 1;

            #[inline]
            fn component(&self, _index: usize) -> $t {
                *self
            }

            #[inline]
            fn set_component(&mut self, _index: usize, value: $t) {
                *self = value;
            }

            #[inline]
            fn affine(start: $t, step: $t, index: usize) -> $t {
                start + step * index as $t
            }
        }
    )*};
}

impl_int_element!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
impl_float_element!(f32, f64);

macro_rules! impl_vec_element {
    ($($n:literal),*) => {$(
        impl<S> Element for [S; $n]
        where
            S: Element<Component = S>,
            [S; $n]: Pod,
        {
            type Component = S;
            const NUM_COMPONENTS: usize = $n;

            #[inline]
            fn component(&self, index: usize) -> S {
                self[index]
            }

            #[inline]
            fn set_component(&mut self, index: usize, value: S) {
                self[index] = value;
            }

            fn affine(start: Self, step: Self, index: usize) -> Self {
                std::array::from_fn(|c| S::affine(start[c], step[c], index))
            }
        }
    )*};
}

impl_vec_element!(2, 3, 4);

/// Integer scalars supporting atomic read-modify-write in place.
///
/// Used by [`AtomicArrayInOut`](crate::worklet::AtomicArrayInOut).
pub trait AtomicElement: Element<Component = Self> + Eq {
    /// # Safety
    /// `ptr` must be valid, aligned, and only accessed atomically for the
    /// duration of the call.
    unsafe fn fetch_add(ptr: *mut Self, value: Self) -> Self;
    /// # Safety
    /// As for [`AtomicElement::fetch_add`].
    unsafe fn fetch_min(ptr: *mut Self, value: Self) -> Self;
    /// # Safety
    /// As for [`AtomicElement::fetch_add`].
    unsafe fn fetch_max(ptr: *mut Self, value: Self) -> Self;
    /// # Safety
    /// As for [`AtomicElement::fetch_add`].
    unsafe fn load(ptr: *mut Self) -> Self;
    /// # Safety
    /// As for [`AtomicElement::fetch_add`].
    unsafe fn store(ptr: *mut Self, value: Self);
    /// # Safety
    /// As for [`AtomicElement::fetch_add`].
    unsafe fn compare_exchange(ptr: *mut Self, current: Self, new: Self) -> Result<Self, Self>;
}

macro_rules! impl_atomic_element {
    ($($t:ty => $atomic:ty),*) => {$(
        impl AtomicElement for $t {
            unsafe fn fetch_add(ptr: *mut Self, value: Self) -> Self {
                <$atomic>::from_ptr(ptr).fetch_add(value, Ordering::AcqRel)
            }

            unsafe fn fetch_min(ptr: *mut Self, value: Self) -> Self {
                <$atomic>::from_ptr(ptr).fetch_min(value, Ordering::AcqRel)
            }

            unsafe fn fetch_max(ptr: *mut Self, value: Self) -> Self {
                <$atomic>::from_ptr(ptr).fetch_max(value, Ordering::AcqRel)
            }

            unsafe fn load(ptr: *mut Self) -> Self {
                <$atomic>::from_ptr(ptr).load(Ordering::Acquire)
            }

            unsafe fn store(ptr: *mut Self, value: Self) {
                <$atomic>::from_ptr(ptr).store(value, Ordering::Release)
            }

            unsafe fn compare_exchange(ptr: *mut Self, current: Self, new: Self) -> Result<Self, Self> {
                <$atomic>::from_ptr(ptr).compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            }
        }
    )*};
}

impl_atomic_element!(i32 => AtomicI32, i64 => AtomicI64, u32 => AtomicU32, u64 => AtomicU64, usize => AtomicUsize);
