//! Device tags and memory spaces.

use std::fmt;
use std::str::FromStr;

use crate::error::BackendError;

/// Compile-time device tag. Each tag maps to exactly one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceId {
    /// Single-threaded reference execution on the host
    Serial,
    /// rayon-parallel execution on the host
    Threaded,
    /// Accelerator-style execution on a separate memory space
    Discrete,
}

impl DeviceId {
    /// Default preference order, fastest first.
    pub const ALL: [DeviceId; 3] = [DeviceId::Discrete, DeviceId::Threaded, DeviceId::Serial];
    pub const COUNT: usize = Self::ALL.len();

    pub const fn name(self) -> &'static str {
        match self {
            DeviceId::Serial => "serial",
            DeviceId::Threaded => "threaded",
            DeviceId::Discrete => "discrete",
        }
    }

    /// Whether the adapter for this tag was built into the crate.
    pub const fn is_compiled_in(self) -> bool {
        match self {
            DeviceId::Serial => true,
            DeviceId::Threaded => cfg!(feature = "threaded"),
            DeviceId::Discrete => cfg!(feature = "discrete"),
        }
    }

    /// Memory space the adapter executes against.
    pub const fn memory_space(self) -> MemorySpace {
        match self {
            DeviceId::Serial | DeviceId::Threaded => MemorySpace::Host,
            DeviceId::Discrete => MemorySpace::Discrete,
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            DeviceId::Serial => 0,
            DeviceId::Threaded => 1,
            DeviceId::Discrete => 2,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceId {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(DeviceId::Serial),
            "threaded" | "rayon" => Ok(DeviceId::Threaded),
            "discrete" => Ok(DeviceId::Discrete),
            other => Err(BackendError::UnknownDevice(other.to_string())),
        }
    }
}

/// Where a copy of a buffer's bytes lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    Host,
    Discrete,
}

impl MemorySpace {
    pub const ALL: [MemorySpace; 2] = [MemorySpace::Host, MemorySpace::Discrete];
    pub const COUNT: usize = Self::ALL.len();

    /// Dense index, for per-space tables.
    pub const fn index(self) -> usize {
        match self {
            MemorySpace::Host => 0,
            MemorySpace::Discrete => 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            MemorySpace::Host => "host",
            MemorySpace::Discrete => "discrete",
        }
    }
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Device requested by a caller: a specific tag, or whatever the tracker
/// picks from its priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSelection {
    #[default]
    Any,
    Device(DeviceId),
}

impl From<DeviceId> for DeviceSelection {
    fn from(id: DeviceId) -> Self {
        DeviceSelection::Device(id)
    }
}

impl fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelection::Any => f.write_str("any"),
            DeviceSelection::Device(id) => fmt::Display::fmt(id, f),
        }
    }
}

impl FromStr for DeviceSelection {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("any") {
            Ok(DeviceSelection::Any)
        } else {
            s.parse().map(DeviceSelection::Device)
        }
    }
}
