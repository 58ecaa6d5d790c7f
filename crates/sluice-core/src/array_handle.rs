//! Typed, reference-counted arrays.
//!
//! An [`ArrayHandle`] is the unit of data exchanged between control code and
//! kernels. Cloning is cheap and shares storage; [`ArrayHandle::deep_copy`]
//! makes an independent array.
//!
//! ```
//! use sluice_core::ArrayHandle;
//!
//! let values = ArrayHandle::from_slice(&[1.0f32, 2.0, 3.0]).unwrap();
//! let alias = values.clone();
//! values.fill(4.0).unwrap();
//! assert_eq!(alias.to_vec().unwrap(), vec![4.0; 3]);
//! ```

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use num_traits::AsPrimitive;
use sluice_backends::MemorySpace;

use crate::buffer::{Buffer, BufferId};
use crate::element::Element;
use crate::error::{Error, Result};
use crate::portal::{ReadPortal, WritePortal};
use crate::storage::{CastArray, Storage, StorageKind};

/// Typed array over a [`Storage`] strategy.
#[derive(Clone)]
pub struct ArrayHandle<T: Element> {
    storage: Storage<T>,
}

impl<T: Element> fmt::Debug for ArrayHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayHandle")
            .field("type", &T::type_name())
            .field("storage", &self.storage.kind())
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Element> Default for ArrayHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> ArrayHandle<T> {
    /// An empty basic array.
    pub fn new() -> Self {
        Self::allocate(0)
    }

    /// A basic array of `len` elements. Memory is allocated on first use
    /// and zero-filled.
    pub fn allocate(len: usize) -> Self {
        Self {
            storage: Storage::Basic(Buffer::new(len * std::mem::size_of::<T>())),
        }
    }

    /// A host-resident basic array holding a copy of `values`.
    pub fn from_slice(values: &[T]) -> Result<Self> {
        let buffer = Buffer::from_host_bytes(bytemuck::cast_slice(values))?;
        Ok(Self {
            storage: Storage::Basic(buffer),
        })
    }

    pub fn from_vec(values: Vec<T>) -> Result<Self> {
        Self::from_slice(&values)
    }

    /// View an existing buffer as elements of `T`.
    pub fn from_buffer(buffer: Buffer) -> Result<Self> {
        let len_bytes = buffer.len_bytes();
        if len_bytes % std::mem::size_of::<T>() != 0 {
            return Err(Error::TypeMismatch {
                expected: format!("a multiple of {} bytes for {}", std::mem::size_of::<T>(), T::type_name()),
                actual: format!("{len_bytes} bytes"),
            });
        }
        Ok(Self {
            storage: Storage::Basic(buffer),
        })
    }

    /// `len` copies of `value`, computed on read.
    pub fn constant(value: T, len: usize) -> Self {
        Self {
            storage: Storage::Constant { value, len },
        }
    }

    /// `start, start + step, ...`, computed on read.
    pub fn counting(start: T, step: T, len: usize) -> Self {
        Self {
            storage: Storage::Counting { start, step, len },
        }
    }

    /// Gathers one scalar array per component into vector elements.
    pub fn composite(components: Vec<ArrayHandle<T::Component>>) -> Result<Self> {
        if components.len() != T::NUM_COMPONENTS {
            return Err(Error::TypeMismatch {
                expected: format!("{} component arrays for {}", T::NUM_COMPONENTS, T::type_name()),
                actual: format!("{} component arrays", components.len()),
            });
        }
        let len = components.first().map_or(0, ArrayHandle::len);
        if let Some(mismatched) = components.iter().find(|c| c.len() != len) {
            return Err(Error::BufferSizeMismatch {
                expected: len,
                actual: mismatched.len(),
            });
        }
        Ok(Self {
            storage: Storage::Composite { components },
        })
    }

    /// `source` converted element-wise with `as` semantics.
    pub fn cast<U>(source: &ArrayHandle<U>) -> Self
    where
        U: Element + AsPrimitive<T>,
    {
        Self {
            storage: Storage::Cast(Arc::new(CastArray::<T, U>::new(source.clone()))),
        }
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.storage.kind()
    }

    pub fn is_writable(&self) -> bool {
        self.storage_kind().is_writable()
    }

    pub fn element_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    pub fn element_type_name(&self) -> &'static str {
        T::type_name()
    }

    /// The buffer behind a basic array.
    pub fn buffer(&self) -> Option<&Buffer> {
        match &self.storage {
            Storage::Basic(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Every buffer this array reads, including those of its sources.
    pub fn buffers(&self) -> Vec<Buffer> {
        self.storage.buffers()
    }

    pub fn buffer_ids(&self) -> Vec<BufferId> {
        self.buffers().iter().map(Buffer::id).collect()
    }

    /// Whether both handles read any common buffer.
    pub fn same_storage<U: Element>(&self, other: &ArrayHandle<U>) -> bool {
        let theirs = other.buffers();
        self.buffers().iter().any(|mine| theirs.iter().any(|b| b.ptr_eq(mine)))
    }

    fn writable_buffer(&self) -> Result<&Buffer> {
        self.buffer().ok_or_else(|| {
            Error::unsupported(format!("cannot write to a {} array", self.storage_kind()))
        })
    }

    /// Make every backing buffer valid on `space`.
    pub fn ensure_on(&self, space: MemorySpace) -> Result<()> {
        for buffer in self.buffers() {
            buffer.ensure_on(space)?;
        }
        Ok(())
    }

    pub fn read_portal(&self) -> Result<ReadPortal<T>> {
        self.read_portal_on(MemorySpace::Host)
    }

    /// Read access on `space`; transfers stale data there first.
    pub fn read_portal_on(&self, space: MemorySpace) -> Result<ReadPortal<T>> {
        match &self.storage {
            Storage::Basic(buffer) => {
                let (lease, ptr) = buffer.acquire_read(space)?;
                Ok(ReadPortal::basic(lease, ptr))
            }
            Storage::Constant { value, len } => Ok(ReadPortal::constant(*value, *len)),
            Storage::Counting { start, step, len } => Ok(ReadPortal::counting(*start, *step, *len)),
            Storage::Composite { components } => {
                let portals = components
                    .iter()
                    .map(|component| component.read_portal_on(space))
                    .collect::<Result<Vec<_>>>()?;
                ReadPortal::composite(portals)
            }
            Storage::Cast(source) => source.read_portal_on(space),
        }
    }

    pub fn write_portal(&self) -> Result<WritePortal<T>> {
        self.write_portal_on(MemorySpace::Host)
    }

    /// Read-write access on `space`, which becomes the only valid copy.
    pub fn write_portal_on(&self, space: MemorySpace) -> Result<WritePortal<T>> {
        let (lease, ptr) = self.writable_buffer()?.acquire_write(space, true)?;
        Ok(WritePortal::new(lease, ptr))
    }

    /// Write-only access on `space`; current contents are not transferred.
    pub(crate) fn output_portal_on(&self, space: MemorySpace) -> Result<WritePortal<T>> {
        let (lease, ptr) = self.writable_buffer()?.acquire_write(space, false)?;
        Ok(WritePortal::new(lease, ptr))
    }

    /// Change the length of a basic array, keeping the leading elements when
    /// `preserve` is set. Shared by every clone.
    pub fn resize(&self, len: usize, preserve: bool) -> Result<()> {
        self.writable_buffer()?.resize(len * std::mem::size_of::<T>(), preserve)
    }

    /// Release the copy on `space` of every backing buffer that is not
    /// authoritative there.
    pub fn release_resources_on(&self, space: MemorySpace) -> Result<()> {
        for buffer in self.buffers() {
            if buffer.authoritative_space() != Some(space) {
                buffer.release_resources_on(space)?;
            }
        }
        Ok(())
    }

    /// An independent basic array with the same contents.
    pub fn deep_copy(&self) -> Result<ArrayHandle<T>> {
        match &self.storage {
            Storage::Basic(buffer) => {
                let space = buffer.authoritative_space().unwrap_or(MemorySpace::Host);
                let source = self.read_portal_on(space)?;
                let copy = ArrayHandle::allocate(source.len());
                let mut target = copy.output_portal_on(space)?;
                target.as_mut_slice().copy_from_slice(&source.values());
                Ok(copy)
            }
            _ => ArrayHandle::from_vec(self.to_vec()?),
        }
    }

    /// Contents read on the host.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        Ok(self.read_portal()?.to_vec())
    }

    pub fn get(&self, index: usize) -> Result<T> {
        self.read_portal()?.try_get(index).ok_or(Error::OutOfBounds {
            index,
            len: self.len(),
        })
    }

    /// Set every element to `value` on the host.
    pub fn fill(&self, value: T) -> Result<()> {
        let mut portal = self.output_portal_on(MemorySpace::Host)?;
        portal.as_mut_slice().fill(value);
        Ok(())
    }

    /// Overwrite the contents on the host. Lengths must match.
    pub fn copy_from_slice(&self, values: &[T]) -> Result<()> {
        if values.len() != self.len() {
            return Err(Error::BufferSizeMismatch {
                expected: self.len(),
                actual: values.len(),
            });
        }
        let mut portal = self.output_portal_on(MemorySpace::Host)?;
        portal.as_mut_slice().copy_from_slice(values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_and_deep_copies_do_not() {
        let a = ArrayHandle::from_slice(&[1u32, 2, 3]).unwrap();
        let b = a.clone();
        let c = a.deep_copy().unwrap();
        assert!(a.same_storage(&b));
        assert!(!a.same_storage(&c));

        a.write_portal().unwrap().set(0, 10);
        assert_eq!(b.to_vec().unwrap(), vec![10, 2, 3]);
        assert_eq!(c.to_vec().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn constant_array_rejects_writes() {
        let array = ArrayHandle::constant(7i32, 5);
        assert_eq!(array.to_vec().unwrap(), vec![7; 5]);
        assert!(matches!(array.write_portal(), Err(Error::UnsupportedOperation(_))));
        assert!(matches!(array.fill(1), Err(Error::UnsupportedOperation(_))));
        assert!(array.buffers().is_empty());
    }

    #[test]
    fn counting_array_values() {
        let array = ArrayHandle::counting(10i64, 2, 4);
        assert_eq!(array.to_vec().unwrap(), vec![10, 12, 14, 16]);
        assert_eq!(array.storage_kind(), StorageKind::Counting);
    }

    #[test]
    fn composite_requires_one_array_per_component() {
        let xs = ArrayHandle::from_slice(&[1.0f32, 2.0]).unwrap();
        let ys = ArrayHandle::constant(0.0f32, 2);
        let points = ArrayHandle::<[f32; 2]>::composite(vec![xs.clone(), ys.clone()]).unwrap();
        assert_eq!(points.to_vec().unwrap(), vec![[1.0, 0.0], [2.0, 0.0]]);
        assert!(points.same_storage(&xs));

        let err = ArrayHandle::<[f32; 3]>::composite(vec![xs.clone(), ys]).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));

        let short = ArrayHandle::constant(0.0f32, 1);
        let err = ArrayHandle::<[f32; 2]>::composite(vec![xs, short]).unwrap_err();
        assert!(matches!(err, Error::BufferSizeMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn cast_follows_its_source() {
        let source = ArrayHandle::from_slice(&[1.9f64, -2.5, 300.0]).unwrap();
        let truncated = ArrayHandle::<i32>::cast(&source);
        assert_eq!(truncated.to_vec().unwrap(), vec![1, -2, 300]);

        source.copy_from_slice(&[4.0, 5.0, 6.0]).unwrap();
        assert_eq!(truncated.to_vec().unwrap(), vec![4, 5, 6]);
        assert!(!truncated.is_writable());
    }

    #[test]
    fn resize_is_visible_through_clones() {
        let a = ArrayHandle::from_slice(&[1u16, 2]).unwrap();
        let b = a.clone();
        a.resize(4, true).unwrap();
        assert_eq!(b.to_vec().unwrap(), vec![1, 2, 0, 0]);
    }

    #[test]
    fn from_buffer_checks_element_size() {
        let buffer = Buffer::new(6);
        assert!(matches!(ArrayHandle::<u32>::from_buffer(buffer.clone()), Err(Error::TypeMismatch { .. })));
        assert_eq!(ArrayHandle::<u16>::from_buffer(buffer).unwrap().len(), 3);
    }

    #[test]
    fn get_reports_out_of_bounds() {
        let array = ArrayHandle::from_slice(&[5u8]).unwrap();
        assert_eq!(array.get(0).unwrap(), 5);
        assert!(matches!(array.get(1), Err(Error::OutOfBounds { index: 1, len: 1 })));
    }

    #[test]
    fn copy_from_slice_checks_length() {
        let array = ArrayHandle::<i8>::allocate(2);
        assert!(matches!(
            array.copy_from_slice(&[1, 2, 3]),
            Err(Error::BufferSizeMismatch { expected: 2, actual: 3 })
        ));
    }
}
