//! Process initialisation. Kept to one test: `initialize` applies once per
//! process.

use serial_test::serial;
use sluice_core::{
    algorithm, runtime_config, ArrayHandle, DeviceId, DeviceSelection, Result, RuntimeConfig, RuntimeDeviceTracker,
};

#[test]
#[serial]
fn initialize_applies_once() -> Result<()> {
    assert!(runtime_config().is_none());

    let (config, rest) = RuntimeConfig::from_args([
        "--sluice-device=serial",
        "--sluice-num-threads",
        "2",
        "--sluice-discrete-memory-limit=1048576",
        "scene.json",
    ])?;
    assert_eq!(rest, vec!["scene.json".to_string()]);

    let applied = sluice_core::initialize(config.clone())?;
    assert_eq!(applied, &config);
    assert_eq!(sluice_backends::discrete_memory().limit(), 1 << 20);
    #[cfg(feature = "threaded")]
    {
        use sluice_backends::{DeviceAdapter, ThreadedAdapter};
        // The pool is built on first use, with the configured size.
        ThreadedAdapter::schedule(1, |_| {})?;
        assert_eq!(sluice_backends::thread_count(), Some(2));
    }

    let tracker = RuntimeDeviceTracker::global();
    assert_eq!(tracker.resolve(DeviceSelection::Any)?, DeviceId::Serial);

    let data = ArrayHandle::from_slice(&[2u8, 1])?;
    algorithm::sort(DeviceSelection::Any, &data)?;
    assert_eq!(data.to_vec()?, vec![1, 2]);

    // A second call keeps the first configuration.
    let again = sluice_core::initialize(RuntimeConfig::default())?;
    assert!(std::ptr::eq(again, applied));
    assert_eq!(runtime_config(), Some(applied));
    assert_eq!(tracker.resolve(DeviceSelection::Any)?, DeviceId::Serial);
    Ok(())
}
