//! Runtime device tracker.
//!
//! Records, per [`DeviceId`], whether the adapter is compiled in, whether it
//! is available in this process (probed lazily, exactly once per tracker)
//! and whether callers currently allow it. Selection walks a preference list
//! and picks the first device passing all three checks.
//!
//! The process-wide instance is [`RuntimeDeviceTracker::global`]; tests and
//! embedders may build private trackers with their own prober.

use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::adapter::probe_device;
use crate::device::{DeviceId, DeviceSelection};
use crate::error::{BackendError, Result};

type Prober = dyn Fn(DeviceId) -> bool + Send + Sync;

/// Enablement of every device, as captured by [`RuntimeDeviceTracker::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSnapshot {
    enabled: [bool; DeviceId::COUNT],
}

impl TrackerSnapshot {
    pub fn is_enabled(&self, id: DeviceId) -> bool {
        self.enabled[id.index()]
    }
}

pub struct RuntimeDeviceTracker {
    prober: Box<Prober>,
    probed: [OnceLock<bool>; DeviceId::COUNT],
    enabled: RwLock<[bool; DeviceId::COUNT]>,
    priority: RwLock<Vec<DeviceId>>,
}

impl std::fmt::Debug for RuntimeDeviceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeDeviceTracker")
            .field("probed", &self.probed)
            .field("enabled", &*self.enabled.read())
            .field("priority", &*self.priority.read())
            .finish_non_exhaustive()
    }
}

impl Default for RuntimeDeviceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeDeviceTracker {
    /// Tracker probing the real adapters.
    pub fn new() -> Self {
        Self::with_prober(probe_device)
    }

    /// Tracker whose runtime availability comes from `prober`.
    ///
    /// The prober is consulted at most once per device, and only for devices
    /// that are compiled in.
    pub fn with_prober(prober: impl Fn(DeviceId) -> bool + Send + Sync + 'static) -> Self {
        Self {
            prober: Box::new(prober),
            probed: [OnceLock::new(), OnceLock::new(), OnceLock::new()],
            enabled: RwLock::new([true; DeviceId::COUNT]),
            priority: RwLock::new(DeviceId::ALL.to_vec()),
        }
    }

    /// The process-wide tracker, created on first use.
    pub fn global() -> &'static RuntimeDeviceTracker {
        static GLOBAL: OnceLock<RuntimeDeviceTracker> = OnceLock::new();
        GLOBAL.get_or_init(RuntimeDeviceTracker::new)
    }

    pub fn is_compiled_in(&self, id: DeviceId) -> bool {
        id.is_compiled_in()
    }

    /// Compiled in and reported available by the (single) probe.
    pub fn is_available(&self, id: DeviceId) -> bool {
        if !id.is_compiled_in() {
            return false;
        }
        *self.probed[id.index()].get_or_init(|| {
            let available = (self.prober)(id);
            tracing::info!(device = %id, available, "probed device");
            available
        })
    }

    pub fn is_enabled(&self, id: DeviceId) -> bool {
        self.enabled.read()[id.index()]
    }

    /// Compiled in, available and enabled.
    pub fn can_run_on(&self, id: DeviceId) -> bool {
        self.is_enabled(id) && self.is_available(id)
    }

    /// First device of `preference` that can run.
    pub fn select_adapter(&self, preference: &[DeviceId]) -> Result<DeviceId> {
        match preference.iter().copied().find(|id| self.can_run_on(*id)) {
            Some(id) => {
                tracing::debug!(device = %id, ?preference, "selected device");
                Ok(id)
            }
            None => {
                tracing::warn!(?preference, "no device in preference list can run");
                Err(BackendError::NoAvailableDevice {
                    requested: preference.to_vec(),
                })
            }
        }
    }

    /// Resolve a caller's selection: a named device must itself be able to
    /// run, `Any` walks the configured priority order.
    pub fn resolve(&self, selection: DeviceSelection) -> Result<DeviceId> {
        match selection {
            DeviceSelection::Device(id) => self.select_adapter(&[id]),
            DeviceSelection::Any => {
                let priority = self.priority();
                self.select_adapter(&priority)
            }
        }
    }

    pub fn priority(&self) -> Vec<DeviceId> {
        self.priority.read().clone()
    }

    /// Replace the order used for [`DeviceSelection::Any`]. Duplicates are
    /// dropped; an empty list restores [`DeviceId::ALL`].
    pub fn set_priority(&self, order: &[DeviceId]) {
        let mut deduped: Vec<DeviceId> = Vec::with_capacity(order.len());
        for id in order {
            if !deduped.contains(id) {
                deduped.push(*id);
            }
        }
        if deduped.is_empty() {
            deduped = DeviceId::ALL.to_vec();
        }
        tracing::debug!(priority = ?deduped, "device priority updated");
        *self.priority.write() = deduped;
    }

    pub fn enable_device(&self, id: DeviceId) {
        self.enabled.write()[id.index()] = true;
    }

    pub fn disable_device(&self, id: DeviceId) {
        tracing::debug!(device = %id, "device disabled");
        self.enabled.write()[id.index()] = false;
    }

    /// Clear any override on `id`. Availability is not re-probed.
    pub fn reset_device(&self, id: DeviceId) {
        self.enable_device(id);
    }

    /// Clear every override.
    pub fn reset(&self) {
        *self.enabled.write() = [true; DeviceId::COUNT];
    }

    /// Enable `id` and disable every other device.
    pub fn force_device(&self, id: DeviceId) -> Result<()> {
        if !self.is_available(id) {
            return Err(BackendError::DeviceUnavailable(id));
        }
        let mut enabled = [false; DeviceId::COUNT];
        enabled[id.index()] = true;
        *self.enabled.write() = enabled;
        tracing::info!(device = %id, "device forced");
        Ok(())
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            enabled: *self.enabled.read(),
        }
    }

    pub fn restore(&self, snapshot: &TrackerSnapshot) {
        *self.enabled.write() = snapshot.enabled;
    }
}

/// What a [`ScopedDeviceOverride`] does to its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideMode {
    /// Only this device may run.
    Force,
    Enable,
    Disable,
}

/// Changes a device's enablement until dropped, then restores the
/// tracker's previous enablement, including on early return or unwind.
///
/// Overrides on a shared tracker from several threads at once restore in
/// drop order; nest them per thread.
#[must_use = "the override is undone when this guard is dropped"]
pub struct ScopedDeviceOverride<'t> {
    tracker: &'t RuntimeDeviceTracker,
    previous: TrackerSnapshot,
}

impl<'t> ScopedDeviceOverride<'t> {
    pub fn new(tracker: &'t RuntimeDeviceTracker, id: DeviceId, mode: OverrideMode) -> Result<Self> {
        let previous = tracker.snapshot();
        match mode {
            OverrideMode::Force => tracker.force_device(id)?,
            OverrideMode::Enable => tracker.enable_device(id),
            OverrideMode::Disable => tracker.disable_device(id),
        }
        Ok(Self { tracker, previous })
    }

    pub fn force(tracker: &'t RuntimeDeviceTracker, id: DeviceId) -> Result<Self> {
        Self::new(tracker, id, OverrideMode::Force)
    }

    pub fn disable(tracker: &'t RuntimeDeviceTracker, id: DeviceId) -> Self {
        let previous = tracker.snapshot();
        tracker.disable_device(id);
        Self { tracker, previous }
    }
}

impl Drop for ScopedDeviceOverride<'_> {
    fn drop(&mut self) {
        self.tracker.restore(&self.previous);
    }
}
