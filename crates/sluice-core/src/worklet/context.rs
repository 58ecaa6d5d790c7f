//! Per-invocation index context handed to worklets.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use sluice_backends::DeviceId;

/// Extent of a structured point grid. Unused axes have extent 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridDims([usize; 3]);

impl GridDims {
    pub const fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self([nx, ny, nz])
    }

    pub const fn d1(nx: usize) -> Self {
        Self::new(nx, 1, 1)
    }

    pub const fn d2(nx: usize, ny: usize) -> Self {
        Self::new(nx, ny, 1)
    }

    pub const fn d3(nx: usize, ny: usize, nz: usize) -> Self {
        Self::new(nx, ny, nz)
    }

    pub const fn extents(self) -> [usize; 3] {
        self.0
    }

    /// Number of points, or `None` on overflow.
    pub fn checked_count(self) -> Option<usize> {
        self.0[0].checked_mul(self.0[1])?.checked_mul(self.0[2])
    }

    pub fn count(self) -> usize {
        self.0.iter().product()
    }

    /// Row-major flat index, `i` fastest.
    #[inline]
    pub fn flat_index(self, [i, j, k]: [usize; 3]) -> usize {
        i + self.0[0] * (j + self.0[1] * k)
    }

    #[inline]
    pub fn ijk(self, index: usize) -> [usize; 3] {
        let [nx, ny, _] = self.0;
        let nx = nx.max(1);
        let ny = ny.max(1);
        [index % nx, (index / nx) % ny, index / (nx * ny)]
    }
}

impl From<usize> for GridDims {
    fn from(nx: usize) -> Self {
        Self::d1(nx)
    }
}

impl From<[usize; 2]> for GridDims {
    fn from([nx, ny]: [usize; 2]) -> Self {
        Self::d2(nx, ny)
    }
}

impl From<[usize; 3]> for GridDims {
    fn from([nx, ny, nz]: [usize; 3]) -> Self {
        Self::d3(nx, ny, nz)
    }
}

impl fmt::Display for GridDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.0[0], self.0[1], self.0[2])
    }
}

/// Error reported from inside a kernel. The first message wins.
#[derive(Default)]
pub(crate) struct ErrorBuffer {
    raised: AtomicBool,
    message: Mutex<Option<String>>,
}

impl ErrorBuffer {
    pub(crate) fn raise(&self, message: String) {
        if self.raised.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.message.lock() = Some(message);
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    pub(crate) fn take(&self) -> Option<String> {
        self.message.lock().take()
    }
}

/// Where one worklet invocation sits in the dispatch domain.
pub struct ThreadContext<'a> {
    index: usize,
    ijk: [usize; 3],
    dims: GridDims,
    device: DeviceId,
    errors: &'a ErrorBuffer,
}

impl<'a> ThreadContext<'a> {
    pub(crate) fn new(index: usize, dims: GridDims, device: DeviceId, errors: &'a ErrorBuffer) -> Self {
        Self {
            index,
            ijk: dims.ijk(index),
            dims,
            device,
            errors,
        }
    }

    /// Flat index of this invocation.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Grid coordinates; `[index, 0, 0]` for map-field dispatches.
    #[inline]
    pub fn ijk(&self) -> [usize; 3] {
        self.ijk
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Whether the point lies on the edge of any axis with more than one
    /// point.
    pub fn is_boundary(&self) -> bool {
        self.ijk
            .iter()
            .zip(self.dims.extents())
            .any(|(&c, extent)| extent > 1 && (c == 0 || c + 1 == extent))
    }

    /// Fail the dispatch with `message`. The invocation keeps running;
    /// other invocations may still execute.
    pub fn raise_error(&self, message: impl Into<String>) {
        self.errors.raise(message.into());
    }

    pub fn error_raised(&self) -> bool {
        self.errors.is_raised()
    }
}

impl fmt::Debug for ThreadContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadContext")
            .field("index", &self.index)
            .field("ijk", &self.ijk)
            .field("device", &self.device)
            .finish()
    }
}
