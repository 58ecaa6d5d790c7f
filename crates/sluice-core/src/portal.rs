//! Indexed element access for kernels.
//!
//! A portal is valid only while the lease it holds is alive; it is created
//! by the array handle for one memory space and dropped when the kernel or
//! control-side access finishes.

use std::borrow::Cow;
use std::fmt;

use num_traits::AsPrimitive;

use crate::buffer::{ReadLease, WriteLease};
use crate::element::Element;
use crate::error::{Error, Result};

/// Type-erased element source behind a cast portal.
pub(crate) trait CastPortal<T>: Send + Sync {
    fn get(&self, index: usize) -> T;
}

struct CastReadPortal<U: Element> {
    source: ReadPortal<U>,
}

impl<T, U> CastPortal<T> for CastReadPortal<U>
where
    T: Element,
    U: Element + AsPrimitive<T>,
{
    #[inline]
    fn get(&self, index: usize) -> T {
        // SAFETY: the outer portal bounds-checks against the same length.
        unsafe { self.source.get_unchecked(index) }.as_()
    }
}

enum ReadInner<T: Element> {
    Basic { ptr: *const T, _lease: ReadLease },
    Constant(T),
    Counting { start: T, step: T },
    Composite(Vec<ReadPortal<T::Component>>),
    Cast(Box<dyn CastPortal<T>>),
}

/// Read-only view of an array, valid on one memory space.
pub struct ReadPortal<T: Element> {
    inner: ReadInner<T>,
    len: usize,
}

// SAFETY: the raw pointer refers to memory pinned by the read lease, which
// excludes writers until the portal is dropped.
unsafe impl<T: Element> Send for ReadPortal<T> {}
unsafe impl<T: Element> Sync for ReadPortal<T> {}

impl<T: Element> fmt::Debug for ReadPortal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            ReadInner::Basic { .. } => "basic",
            ReadInner::Constant(_) => "constant",
            ReadInner::Counting { .. } => "counting",
            ReadInner::Composite(_) => "composite",
            ReadInner::Cast(_) => "cast",
        };
        f.debug_struct("ReadPortal")
            .field("kind", &kind)
            .field("len", &self.len)
            .finish()
    }
}

impl<T: Element> ReadPortal<T> {
    pub(crate) fn basic(lease: ReadLease, ptr: *const u8) -> Self {
        let len = lease.len_bytes / std::mem::size_of::<T>();
        Self {
            inner: ReadInner::Basic {
                ptr: ptr.cast::<T>(),
                _lease: lease,
            },
            len,
        }
    }

    pub(crate) fn constant(value: T, len: usize) -> Self {
        Self {
            inner: ReadInner::Constant(value),
            len,
        }
    }

    pub(crate) fn counting(start: T, step: T, len: usize) -> Self {
        Self {
            inner: ReadInner::Counting { start, step },
            len,
        }
    }

    /// Fails if the components disagree on length. Each component portal
    /// holds its lease, so the lengths cannot change afterwards.
    pub(crate) fn composite(components: Vec<ReadPortal<T::Component>>) -> Result<Self> {
        let len = components.first().map_or(0, ReadPortal::len);
        if let Some(mismatched) = components.iter().find(|c| c.len() != len) {
            return Err(Error::BufferSizeMismatch {
                expected: len,
                actual: mismatched.len(),
            });
        }
        Ok(Self {
            inner: ReadInner::Composite(components),
            len,
        })
    }

    pub(crate) fn cast<U>(source: ReadPortal<U>) -> Self
    where
        U: Element + AsPrimitive<T>,
    {
        let len = source.len();
        Self {
            inner: ReadInner::Cast(Box::new(CastReadPortal { source })),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element at `index`.
    ///
    /// # Panics
    /// If `index >= self.len()`.
    #[inline]
    pub fn get(&self, index: usize) -> T {
        assert!(
            index < self.len,
            "portal index {index} out of bounds for length {}",
            self.len
        );
        // SAFETY: bounds checked above.
        unsafe { self.get_unchecked(index) }
    }

    pub fn try_get(&self, index: usize) -> Option<T> {
        // SAFETY: bounds checked by the guard.
        (index < self.len).then(|| unsafe { self.get_unchecked(index) })
    }

    /// # Safety
    /// `index` must be less than `self.len()`.
    #[inline]
    pub(crate) unsafe fn get_unchecked(&self, index: usize) -> T {
        match &self.inner {
            ReadInner::Basic { ptr, .. } => *ptr.add(index),
            ReadInner::Constant(value) => *value,
            ReadInner::Counting { start, step } => T::affine(*start, *step, index),
            ReadInner::Composite(components) => {
                let mut value = T::zeroed();
                for (c, component) in components.iter().enumerate() {
                    value.set_component(c, component.get_unchecked(index));
                }
                value
            }
            ReadInner::Cast(source) => source.get(index),
        }
    }

    /// Contiguous elements, when the portal is backed by memory.
    pub fn as_slice(&self) -> Option<&[T]> {
        match &self.inner {
            // SAFETY: the lease keeps `len` elements at `ptr` alive and free of writers.
            ReadInner::Basic { ptr, .. } => Some(unsafe { std::slice::from_raw_parts(*ptr, self.len) }),
            _ => None,
        }
    }

    /// Elements as a slice, materialising computed storage.
    pub fn values(&self) -> Cow<'_, [T]> {
        match self.as_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(self.iter().collect()),
        }
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = T> + '_ {
        // SAFETY: the range is within bounds.
        (0..self.len).map(move |index| unsafe { self.get_unchecked(index) })
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.values().into_owned()
    }
}

/// Mutable view of a basic array, valid on one memory space.
pub struct WritePortal<T: Element> {
    ptr: *mut T,
    len: usize,
    _lease: WriteLease,
}

// SAFETY: the write lease grants exclusive access to the memory at `ptr`.
unsafe impl<T: Element> Send for WritePortal<T> {}
unsafe impl<T: Element> Sync for WritePortal<T> {}

impl<T: Element> fmt::Debug for WritePortal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritePortal").field("len", &self.len).finish()
    }
}

impl<T: Element> WritePortal<T> {
    pub(crate) fn new(lease: WriteLease, ptr: *mut u8) -> Self {
        let len = lease.len_bytes / std::mem::size_of::<T>();
        Self {
            ptr: ptr.cast::<T>(),
            len,
            _lease: lease,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Panics
    /// If `index >= self.len()`.
    #[inline]
    pub fn get(&self, index: usize) -> T {
        self.as_slice()[index]
    }

    /// # Panics
    /// If `index >= self.len()`.
    #[inline]
    pub fn set(&mut self, index: usize, value: T) {
        self.as_mut_slice()[index] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: the lease keeps `len` elements at `ptr` alive and exclusive to this portal.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as for `as_slice`; `&mut self` rules out other borrows.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Pointer to element `index`, for kernels writing disjoint indices
    /// from several threads.
    ///
    /// # Safety
    /// `index < self.len()`, and no two threads may access the same index
    /// non-atomically while one of them writes.
    #[inline]
    pub(crate) unsafe fn slot(&self, index: usize) -> *mut T {
        self.ptr.add(index)
    }
}
