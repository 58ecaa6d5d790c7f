//! # sluice-core - Portable Data-Parallel Execution
//!
//! Typed arrays whose memory may live on the host, on a discrete device or
//! both, and the machinery that feeds them to device-specific parallel
//! algorithms and to user kernels ("worklets").
//!
//! ## Architecture
//!
//! - **[`Buffer`]**: reference-counted bytes with one copy per memory space.
//!   One copy is authoritative; others are refreshed lazily on demand.
//! - **[`Storage`]**: how elements map onto buffers. Basic storage owns a
//!   buffer; constant, counting, composite and cast storage compute values
//!   on read and reject writes.
//! - **[`ArrayHandle`]**: typed, shareable view over a storage strategy.
//!   Cloning shares storage; [`ArrayHandle::deep_copy`] materialises.
//! - **[`Dispatcher`]**: validates worklet arguments on the host, picks a
//!   device through the [`RuntimeDeviceTracker`], stages every argument on
//!   that device and runs the kernel once per element.
//! - **[`algorithm`]**: copy, compaction, scan, sort, reduce and search
//!   primitives over array handles.
//!
//! Device adapters, memory managers and the tracker live in
//! `sluice-backends` and are re-exported here.
//!
//! ## Example
//!
//! ```
//! use sluice_core::worklet::{FieldIn, FieldInOut, ThreadContext, WorkletMapField};
//! use sluice_core::{ArrayHandle, DeviceId, Dispatcher};
//!
//! struct Axpy(f64);
//!
//! impl WorkletMapField for Axpy {
//!     type Args = (FieldIn<f64>, FieldInOut<f64>);
//!
//!     fn execute<'a>(&self, _ctx: &ThreadContext<'a>, (x, y): (f64, &'a mut f64)) {
//!         *y += self.0 * x;
//!     }
//! }
//!
//! let x = ArrayHandle::counting(0.0, 1.0, 4);
//! let y = ArrayHandle::from_slice(&[1.0; 4]).unwrap();
//! Dispatcher::new().on(DeviceId::Threaded).invoke(&Axpy(2.0), (&x, &y)).unwrap();
//! assert_eq!(y.to_vec().unwrap(), vec![1.0, 3.0, 5.0, 7.0]);
//! ```

use std::sync::OnceLock;

use parking_lot::Mutex;

pub mod algorithm;
pub mod array_handle;
pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod element;
pub mod error;
pub mod portal;
pub mod storage;
pub mod worklet;

pub use array_handle::ArrayHandle;
pub use buffer::{Buffer, BufferId, TargetInfo};
pub use config::RuntimeConfig;
pub use dispatcher::Dispatcher;
pub use element::{AtomicElement, Element};
pub use error::{Error, Result};
pub use portal::{ReadPortal, WritePortal};
pub use storage::{CastSource, Storage, StorageKind};

pub use sluice_backends::{
    DeviceId, DeviceSelection, MemorySpace, MemoryStats, OverrideMode, RuntimeDeviceTracker, ScopedDeviceOverride,
    TrackerSnapshot,
};

static RUNTIME: OnceLock<RuntimeConfig> = OnceLock::new();
static INIT: Mutex<()> = parking_lot::const_mutex(());

/// Apply `config` to the backends and the process-wide tracker.
///
/// Only the first call applies anything; later calls return the config
/// that is already in effect.
pub fn initialize(config: RuntimeConfig) -> Result<&'static RuntimeConfig> {
    let _guard = INIT.lock();
    if let Some(applied) = RUNTIME.get() {
        tracing::debug!(?applied, "runtime already initialised");
        return Ok(applied);
    }

    apply(&config)?;
    tracing::info!(
        device = %config.device,
        priority = ?config.priority,
        num_threads = ?config.num_threads,
        discrete_memory_limit = ?config.discrete_memory_limit,
        "runtime initialised"
    );
    Ok(RUNTIME.get_or_init(|| config))
}

/// [`initialize`] with [`RuntimeConfig::from_env`].
pub fn initialize_from_env() -> Result<&'static RuntimeConfig> {
    initialize(RuntimeConfig::from_env()?)
}

/// The config applied by [`initialize`], if it has run.
pub fn runtime_config() -> Option<&'static RuntimeConfig> {
    RUNTIME.get()
}

fn apply(config: &RuntimeConfig) -> Result<()> {
    if let Some(threads) = config.num_threads {
        #[cfg(any(feature = "threaded", feature = "discrete"))]
        if !sluice_backends::configure_threads(threads) {
            tracing::warn!(threads, "thread pool already running; thread count unchanged");
        }
        #[cfg(not(any(feature = "threaded", feature = "discrete")))]
        tracing::warn!(threads, "no threaded backend compiled in; thread count ignored");
    }

    if let Some(limit) = config.discrete_memory_limit {
        sluice_backends::discrete_memory().set_limit(limit);
    }

    let tracker = RuntimeDeviceTracker::global();
    tracker.set_priority(&config.priority);
    if let DeviceSelection::Device(id) = config.device {
        tracker.force_device(id)?;
    }
    Ok(())
}
