//! Process-wide runtime configuration.
//!
//! Settings come from presets, environment variables or command-line style
//! arguments and are applied once with [`crate::initialize`].
//!
//! | variable                       | meaning                                  |
//! |--------------------------------|------------------------------------------|
//! | `SLUICE_DEVICE`                | force one device, or `any`               |
//! | `SLUICE_DEVICE_PRIORITY`       | comma list, e.g. `discrete,threaded`     |
//! | `SLUICE_NUM_THREADS`           | worker threads of the threaded backend   |
//! | `SLUICE_DISCRETE_MEMORY_LIMIT` | discrete device memory budget in bytes   |

use std::env;
use std::str::FromStr;

use sluice_backends::{DeviceId, DeviceSelection};

use crate::error::{Error, Result};

pub const DEVICE_ENV: &str = "SLUICE_DEVICE";
pub const DEVICE_PRIORITY_ENV: &str = "SLUICE_DEVICE_PRIORITY";
pub const NUM_THREADS_ENV: &str = "SLUICE_NUM_THREADS";
pub const DISCRETE_MEMORY_LIMIT_ENV: &str = "SLUICE_DISCRETE_MEMORY_LIMIT";

const DEVICE_ARG: &str = "--sluice-device";
const DEVICE_PRIORITY_ARG: &str = "--sluice-device-priority";
const NUM_THREADS_ARG: &str = "--sluice-num-threads";
const DISCRETE_MEMORY_LIMIT_ARG: &str = "--sluice-discrete-memory-limit";

/// Runtime settings for the backends and the device tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Device every dispatch is forced onto, or `Any`.
    pub device: DeviceSelection,
    /// Order in which `Any` selections try devices.
    pub priority: Vec<DeviceId>,
    /// Worker threads of the threaded pool; `None` uses one per core.
    pub num_threads: Option<usize>,
    /// Discrete memory budget in bytes; `None` keeps the default.
    pub discrete_memory_limit: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device: DeviceSelection::Any,
            priority: DeviceId::ALL.to_vec(),
            num_threads: None,
            discrete_memory_limit: None,
        }
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| Error::InvalidConfig(format!("{name}={value:?}: {err}")))
}

fn parse_priority(name: &str, value: &str) -> Result<Vec<DeviceId>> {
    let devices = value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse::<DeviceId>(name, item))
        .collect::<Result<Vec<_>>>()?;
    if devices.is_empty() {
        return Err(Error::InvalidConfig(format!("{name} names no devices")));
    }
    Ok(devices)
}

fn parse_threads(name: &str, value: &str) -> Result<usize> {
    match parse::<usize>(name, value)? {
        0 => Err(Error::InvalidConfig(format!("{name} must be at least 1"))),
        threads => Ok(threads),
    }
}

impl RuntimeConfig {
    /// Defaults overridden by the `SLUICE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = env::var(DEVICE_ENV) {
            self.set(DEVICE_ENV, &value)?;
        }
        if let Ok(value) = env::var(DEVICE_PRIORITY_ENV) {
            self.set(DEVICE_PRIORITY_ENV, &value)?;
        }
        if let Ok(value) = env::var(NUM_THREADS_ENV) {
            self.set(NUM_THREADS_ENV, &value)?;
        }
        if let Ok(value) = env::var(DISCRETE_MEMORY_LIMIT_ENV) {
            self.set(DISCRETE_MEMORY_LIMIT_ENV, &value)?;
        }
        Ok(())
    }

    fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            DEVICE_ENV | DEVICE_ARG => self.device = parse(name, value)?,
            DEVICE_PRIORITY_ENV | DEVICE_PRIORITY_ARG => self.priority = parse_priority(name, value)?,
            NUM_THREADS_ENV | NUM_THREADS_ARG => self.num_threads = Some(parse_threads(name, value)?),
            DISCRETE_MEMORY_LIMIT_ENV | DISCRETE_MEMORY_LIMIT_ARG => {
                self.discrete_memory_limit = Some(parse(name, value)?)
            }
            _ => return Err(Error::InvalidConfig(format!("unknown setting {name}"))),
        }
        Ok(())
    }

    /// Defaults overridden by `--sluice-*` arguments.
    ///
    /// Both `--sluice-device=serial` and `--sluice-device serial` are
    /// accepted. Arguments that are not recognised are returned in order.
    pub fn from_args<I, S>(args: I) -> Result<(Self, Vec<String>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Self::default();
        let mut rest = Vec::new();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            let (name, inline) = match arg.split_once('=') {
                Some((name, value)) => (name.to_string(), Some(value.to_string())),
                None => (arg.clone(), None),
            };
            let known = matches!(
                name.as_str(),
                DEVICE_ARG | DEVICE_PRIORITY_ARG | NUM_THREADS_ARG | DISCRETE_MEMORY_LIMIT_ARG
            );
            if !known {
                rest.push(arg);
                continue;
            }
            let value = match inline {
                Some(value) => value,
                None => args
                    .next()
                    .ok_or_else(|| Error::InvalidConfig(format!("{name} needs a value")))?,
            };
            config.set(&name, &value)?;
        }

        Ok((config, rest))
    }

    /// Devices an `Any` selection may use, in order. A forced device is the
    /// only candidate.
    pub fn effective_priority(&self) -> Vec<DeviceId> {
        match self.device {
            DeviceSelection::Device(id) => vec![id],
            DeviceSelection::Any => self.priority.clone(),
        }
    }
}
