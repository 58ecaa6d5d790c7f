//! Device adapters and memory management for sluice.
//!
//! This crate provides:
//! - **Device identity**: [`DeviceId`] tags, [`MemorySpace`]s and caller
//!   [`DeviceSelection`]s
//! - **Memory managers**: word-aligned [`Allocation`]s per memory space, with a
//!   budget on the discrete device
//! - **Device adapters**: the static [`DeviceAdapter`] contract with serial,
//!   threaded (rayon) and discrete implementations
//! - **Runtime device tracker**: lazy probing, enablement overrides and
//!   priority-ordered selection
//!
//! # Architecture
//!
//! ```text
//!   sluice-core (array handles, dispatcher, algorithms)
//!                │
//!                ▼ visit_adapter(DeviceId, visitor)
//!   ┌──────────────┬────────────────┬────────────────┐
//!   │ SerialAdapter│ ThreadedAdapter│ DiscreteAdapter│
//!   └──────┬───────┴───────┬────────┴───────┬────────┘
//!          └──── HostMemory ┘          DiscreteMemory
//! ```
//!
//! # Usage
//!
//! ```rust
//! use sluice_backends::{DeviceAdapter, RuntimeDeviceTracker, SerialAdapter};
//!
//! # fn main() -> sluice_backends::Result<()> {
//! let tracker = RuntimeDeviceTracker::global();
//! assert!(tracker.can_run_on(sluice_backends::DeviceId::Serial));
//!
//! let mut sums = [0u32; 4];
//! SerialAdapter::scan_inclusive(&[1, 2, 3, 4], &mut sums, |a, b| a + b)?;
//! assert_eq!(sums, [1, 3, 6, 10]);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod device;
pub mod error;
pub mod memory;
pub mod serial;
pub mod tracker;

#[cfg(any(feature = "threaded", feature = "discrete"))]
pub mod parallel;

#[cfg(feature = "discrete")]
pub mod discrete;
#[cfg(feature = "threaded")]
pub mod threaded;

pub use adapter::{probe_device, visit_adapter, AdapterVisitor, DeviceAdapter};
pub use device::{DeviceId, DeviceSelection, MemorySpace};
pub use error::{BackendError, Result};
pub use memory::{
    discrete_memory, host_memory, manager, Allocation, DiscreteMemory, HostMemory, MemoryManager, MemoryStats,
    DEFAULT_DISCRETE_MEMORY_LIMIT,
};
pub use serial::SerialAdapter;
pub use tracker::{OverrideMode, RuntimeDeviceTracker, ScopedDeviceOverride, TrackerSnapshot};

#[cfg(feature = "discrete")]
pub use discrete::DiscreteAdapter;
#[cfg(any(feature = "threaded", feature = "discrete"))]
pub use parallel::{configure_threads, thread_count};
#[cfg(feature = "threaded")]
pub use threaded::ThreadedAdapter;
