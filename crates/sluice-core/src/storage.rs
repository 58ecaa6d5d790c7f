//! Storage strategies behind an [`ArrayHandle`].
//!
//! Only [`Storage::Basic`] owns memory. The other strategies compute values
//! on read and reject writes.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use num_traits::AsPrimitive;
use sluice_backends::MemorySpace;

use crate::array_handle::ArrayHandle;
use crate::buffer::Buffer;
use crate::element::Element;
use crate::error::Result;
use crate::portal::ReadPortal;

/// Tag of a [`Storage`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Basic,
    Constant,
    Counting,
    Composite,
    Cast,
}

impl StorageKind {
    pub fn is_writable(self) -> bool {
        matches!(self, StorageKind::Basic)
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageKind::Basic => "basic",
            StorageKind::Constant => "constant",
            StorageKind::Counting => "counting",
            StorageKind::Composite => "composite",
            StorageKind::Cast => "cast",
        };
        f.write_str(name)
    }
}

/// How an array's elements are produced.
#[derive(Clone, Debug)]
pub enum Storage<T: Element> {
    /// Elements stored contiguously in one buffer, `size_of::<T>()` bytes each.
    Basic(Buffer),
    /// Every element equals `value`.
    Constant { value: T, len: usize },
    /// Element `i` is `start + step * i`.
    Counting { start: T, step: T, len: usize },
    /// Element `i` gathers component `c` from `components[c][i]`.
    Composite { components: Vec<ArrayHandle<T::Component>> },
    /// Elements converted from another array with `as` semantics.
    Cast(Arc<dyn CastSource<T>>),
}

impl<T: Element> Storage<T> {
    pub fn kind(&self) -> StorageKind {
        match self {
            Storage::Basic(_) => StorageKind::Basic,
            Storage::Constant { .. } => StorageKind::Constant,
            Storage::Counting { .. } => StorageKind::Counting,
            Storage::Composite { .. } => StorageKind::Composite,
            Storage::Cast(_) => StorageKind::Cast,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Storage::Basic(buffer) => buffer.len_bytes() / std::mem::size_of::<T>(),
            Storage::Constant { len, .. } | Storage::Counting { len, .. } => *len,
            // Components are shared handles and may be resized independently.
            Storage::Composite { components } => components.iter().map(ArrayHandle::len).min().unwrap_or(0),
            Storage::Cast(source) => source.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffers this storage reads from, directly or through its sources.
    pub fn buffers(&self) -> Vec<Buffer> {
        match self {
            Storage::Basic(buffer) => vec![buffer.clone()],
            Storage::Constant { .. } | Storage::Counting { .. } => Vec::new(),
            Storage::Composite { components } => components.iter().flat_map(ArrayHandle::buffers).collect(),
            Storage::Cast(source) => source.buffers(),
        }
    }
}

/// Source array of a [`Storage::Cast`], with its element type erased.
pub trait CastSource<T: Element>: Send + Sync + fmt::Debug {
    fn len(&self) -> usize;

    fn source_type(&self) -> &'static str;

    fn buffers(&self) -> Vec<Buffer>;

    fn read_portal_on(&self, space: MemorySpace) -> Result<ReadPortal<T>>;
}

pub(crate) struct CastArray<T, U: Element> {
    source: ArrayHandle<U>,
    _target: PhantomData<fn() -> T>,
}

impl<T, U: Element> CastArray<T, U> {
    pub(crate) fn new(source: ArrayHandle<U>) -> Self {
        Self {
            source,
            _target: PhantomData,
        }
    }
}

impl<T, U: Element> fmt::Debug for CastArray<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CastArray")
            .field("from", &U::type_name())
            .field("to", &std::any::type_name::<T>())
            .field("len", &self.source.len())
            .finish()
    }
}

impl<T, U> CastSource<T> for CastArray<T, U>
where
    T: Element,
    U: Element + AsPrimitive<T>,
{
    fn len(&self) -> usize {
        self.source.len()
    }

    fn source_type(&self) -> &'static str {
        U::type_name()
    }

    fn buffers(&self) -> Vec<Buffer> {
        self.source.buffers()
    }

    fn read_portal_on(&self, space: MemorySpace) -> Result<ReadPortal<T>> {
        Ok(ReadPortal::cast(self.source.read_portal_on(space)?))
    }
}
