//! Volume to block device mapping
//!
//! Every operation that reads or changes mappings runs inside the host-wide
//! [`ExclusiveLock`], so two invocations cannot both see a volume as
//! unmapped and create two devices for it.

use crate::driver::{BlockDriver, MappedVolume};
use crate::error::{VlmcError, VlmcResult};
use crate::guard::ExclusiveLock;
use archip_common::{BlktapConfig, VolumeName};
use std::sync::Arc;
use tracing::{debug, info};

/// Binds volumes to local block devices
#[derive(Clone)]
pub struct VolumeMapper {
    driver: Arc<dyn BlockDriver>,
    lock: ExclusiveLock,
    module: String,
    device_prefix: String,
}

impl VolumeMapper {
    #[must_use]
    pub fn new(driver: Arc<dyn BlockDriver>, lock: ExclusiveLock, blktap: &BlktapConfig) -> Self {
        Self {
            driver,
            lock,
            module: blktap.module.clone(),
            device_prefix: blktap.device_prefix.clone(),
        }
    }

    /// Path of the device with the given minor
    #[must_use]
    pub fn device_path(&self, minor: u32) -> String {
        format!("{}{minor}", self.device_prefix)
    }

    /// Accept either a device path or a bare minor number
    fn resolve_device(&self, device: &str) -> String {
        match device.parse::<u32>() {
            Ok(minor) => self.device_path(minor),
            Err(_) => device.to_string(),
        }
    }

    pub fn module_loaded(&self) -> VlmcResult<bool> {
        self.driver.module_loaded()
    }

    /// Load the driver module unless it already is
    pub fn load_module(&self) -> VlmcResult<()> {
        if self.driver.module_loaded()? {
            return Ok(());
        }
        self.driver.load_module()
    }

    fn require_module(&self) -> VlmcResult<()> {
        if self.driver.module_loaded()? {
            Ok(())
        } else {
            Err(VlmcError::ModuleNotLoaded {
                module: self.module.clone(),
            })
        }
    }

    // Callers hold the lock
    fn mapped(&self) -> VlmcResult<Vec<MappedVolume>> {
        if !self.driver.module_loaded()? {
            return Ok(Vec::new());
        }
        self.driver.list()
    }

    fn find_volume(&self, volume: &VolumeName) -> VlmcResult<Option<MappedVolume>> {
        Ok(self
            .mapped()?
            .into_iter()
            .find(|m| m.volume.as_deref() == Some(volume.as_str())))
    }

    /// Snapshot of the current mappings
    pub fn list_mapped(&self) -> VlmcResult<Vec<MappedVolume>> {
        self.lock.run(|| self.mapped())
    }

    /// Mapping of `volume`, if it has a device
    pub fn is_volume_mapped(&self, volume: &VolumeName) -> VlmcResult<Option<MappedVolume>> {
        self.lock.run(|| self.find_volume(volume))
    }

    /// Mapping behind `device` (path or minor), if any
    pub fn is_device_mapped(&self, device: &str) -> VlmcResult<Option<MappedVolume>> {
        let device = self.resolve_device(device);
        self.lock
            .run(|| Ok(self.mapped()?.into_iter().find(|m| m.device == device)))
    }

    /// Expose `volume` as a block device; returns the device minor
    pub fn map_volume(&self, volume: &VolumeName) -> VlmcResult<u32> {
        self.lock.run(|| {
            self.require_module()?;
            if let Some(existing) = self.find_volume(volume)? {
                return Err(VlmcError::AlreadyMapped {
                    volume: volume.to_string(),
                    device: existing.device,
                });
            }

            let device = self.driver.create(volume)?;
            let minor = device
                .strip_prefix(&self.device_prefix)
                .and_then(|minor| minor.parse::<u32>().ok())
                .ok_or_else(|| {
                    VlmcError::driver(format!("unexpected device {device} for volume {volume}"))
                })?;
            info!("mapped {volume} on {device}");
            Ok(minor)
        })
    }

    /// Remove the device `device` (path or minor).
    ///
    /// Refuses while a process holds the device open or a filesystem is
    /// mounted on it.
    pub fn unmap_volume(&self, device: &str) -> VlmcResult<()> {
        let device = self.resolve_device(device);
        self.lock.run(|| {
            self.require_module()?;
            if !self.mapped()?.iter().any(|m| m.device == device) {
                return Err(VlmcError::NotMapped { device });
            }
            if let Some(pid) = self.driver.busy_pid(&device)? {
                return Err(VlmcError::DeviceBusy { device, pid });
            }
            if self.driver.is_mounted(&device)? {
                return Err(VlmcError::DeviceMounted { device });
            }

            self.driver.destroy(&device)?;
            info!("unmapped {device}");
            Ok(())
        })
    }

    /// Pause every running mapped device; returns how many were paused
    pub fn pause_all(&self) -> VlmcResult<usize> {
        self.lock.run(|| {
            let mut paused = 0;
            for mapped in self.mapped()? {
                if !mapped.state.is_paused() {
                    debug!("pausing {}", mapped.device);
                    self.driver.pause(&mapped)?;
                    paused += 1;
                }
            }
            Ok(paused)
        })
    }

    /// Resume every paused mapped device; returns how many were resumed
    pub fn resume_all(&self) -> VlmcResult<usize> {
        self.lock.run(|| {
            let mut resumed = 0;
            for mapped in self.mapped()? {
                if mapped.state.is_paused() {
                    debug!("resuming {}", mapped.device);
                    self.driver.unpause(&mapped)?;
                    resumed += 1;
                }
            }
            Ok(resumed)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::driver::TapdiskState;
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Default)]
    pub(crate) struct FakeDriverState {
        pub loaded: bool,
        pub mapped: Vec<MappedVolume>,
        pub busy: Option<u32>,
        pub mounted: bool,
        pub created: Vec<String>,
        pub destroyed: Vec<String>,
    }

    /// In-memory blktap
    #[derive(Debug, Default)]
    pub(crate) struct FakeDriver {
        pub state: Mutex<FakeDriverState>,
    }

    impl FakeDriver {
        pub fn loaded() -> Self {
            let driver = Self::default();
            driver.state.lock().loaded = true;
            driver
        }
    }

    const PREFIX: &str = "/dev/xen/blktap-2/tapdev";

    impl BlockDriver for FakeDriver {
        fn module_loaded(&self) -> VlmcResult<bool> {
            Ok(self.state.lock().loaded)
        }

        fn load_module(&self) -> VlmcResult<()> {
            self.state.lock().loaded = true;
            Ok(())
        }

        fn list(&self) -> VlmcResult<Vec<MappedVolume>> {
            Ok(self.state.lock().mapped.clone())
        }

        fn create(&self, volume: &VolumeName) -> VlmcResult<String> {
            // Widen the window between the check and the create
            thread::sleep(Duration::from_millis(5));
            let mut state = self.state.lock();
            let minor = (0..)
                .find(|minor| !state.mapped.iter().any(|m| m.minor == *minor))
                .unwrap_or_default();
            let device = format!("{PREFIX}{minor}");
            state.mapped.push(MappedVolume {
                minor,
                volume: Some(volume.to_string()),
                device: device.clone(),
                state: TapdiskState::Running,
                pid: Some(4000 + minor),
            });
            state.created.push(volume.to_string());
            Ok(device)
        }

        fn destroy(&self, device: &str) -> VlmcResult<()> {
            let mut state = self.state.lock();
            state.mapped.retain(|m| m.device != device);
            state.destroyed.push(device.to_string());
            Ok(())
        }

        fn busy_pid(&self, _device: &str) -> VlmcResult<Option<u32>> {
            Ok(self.state.lock().busy)
        }

        fn is_mounted(&self, _device: &str) -> VlmcResult<bool> {
            Ok(self.state.lock().mounted)
        }

        fn pause(&self, mapped: &MappedVolume) -> VlmcResult<()> {
            let mut state = self.state.lock();
            if let Some(m) = state.mapped.iter_mut().find(|m| m.minor == mapped.minor) {
                m.state = TapdiskState::Paused;
            }
            Ok(())
        }

        fn unpause(&self, mapped: &MappedVolume) -> VlmcResult<()> {
            let mut state = self.state.lock();
            if let Some(m) = state.mapped.iter_mut().find(|m| m.minor == mapped.minor) {
                m.state = TapdiskState::Running;
            }
            Ok(())
        }
    }

    pub(crate) fn mapper(driver: &Arc<FakeDriver>, dir: &tempfile::TempDir) -> VolumeMapper {
        let driver: Arc<dyn BlockDriver> = driver.clone();
        VolumeMapper::new(
            driver,
            ExclusiveLock::new(dir.path().join("archipelago.lock")),
            &BlktapConfig::default(),
        )
    }

    fn name(s: &str) -> VolumeName {
        VolumeName::new(s).unwrap()
    }

    #[test]
    fn test_map_requires_module() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::default());
        let mapper = mapper(&driver, &dir);

        let err = mapper.map_volume(&name("volumeabc")).unwrap_err();
        assert!(matches!(err, VlmcError::ModuleNotLoaded { module } if module == "blktap"));
        assert!(mapper.list_mapped().unwrap().is_empty());

        mapper.load_module().unwrap();
        assert_eq!(mapper.map_volume(&name("volumeabc")).unwrap(), 0);
    }

    #[test]
    fn test_map_twice() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::loaded());
        let mapper = mapper(&driver, &dir);

        assert_eq!(mapper.map_volume(&name("volumeabc")).unwrap(), 0);
        assert_eq!(mapper.map_volume(&name("volumexyz")).unwrap(), 1);
        let err = mapper.map_volume(&name("volumeabc")).unwrap_err();
        assert!(matches!(
            err,
            VlmcError::AlreadyMapped { device, .. } if device == "/dev/xen/blktap-2/tapdev0"
        ));

        let mapped = mapper.is_volume_mapped(&name("volumexyz")).unwrap().unwrap();
        assert_eq!(mapped.minor, 1);
        assert!(mapper.is_device_mapped("1").unwrap().is_some());
        assert!(mapper.is_device_mapped("/dev/xen/blktap-2/tapdev7").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_map_creates_one_device() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::loaded());

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let mapper = mapper(&driver, &dir);
                thread::spawn(move || mapper.map_volume(&name("volumeabc")))
            })
            .collect();
        let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(VlmcError::AlreadyMapped { .. })))
        );
        assert_eq!(driver.state.lock().created, vec!["volumeabc".to_string()]);
    }

    #[test]
    fn test_unmap() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::loaded());
        let mapper = mapper(&driver, &dir);
        mapper.map_volume(&name("volumeabc")).unwrap();

        let err = mapper.unmap_volume("/dev/xen/blktap-2/tapdev4").unwrap_err();
        assert!(matches!(err, VlmcError::NotMapped { .. }));

        mapper.unmap_volume("/dev/xen/blktap-2/tapdev0").unwrap();
        assert!(mapper.list_mapped().unwrap().is_empty());
        assert_eq!(
            driver.state.lock().destroyed,
            vec!["/dev/xen/blktap-2/tapdev0".to_string()]
        );
    }

    #[test]
    fn test_unmap_refuses_busy_or_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::loaded());
        let mapper = mapper(&driver, &dir);
        mapper.map_volume(&name("volumeabc")).unwrap();

        driver.state.lock().busy = Some(4242);
        let err = mapper.unmap_volume("0").unwrap_err();
        assert!(matches!(err, VlmcError::DeviceBusy { pid: 4242, .. }));

        {
            let mut state = driver.state.lock();
            state.busy = None;
            state.mounted = true;
        }
        let err = mapper.unmap_volume("0").unwrap_err();
        assert!(matches!(err, VlmcError::DeviceMounted { .. }));

        assert!(driver.state.lock().destroyed.is_empty());
        assert_eq!(mapper.list_mapped().unwrap().len(), 1);
    }

    #[test]
    fn test_pause_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::loaded());
        let mapper = mapper(&driver, &dir);
        mapper.map_volume(&name("volumeabc")).unwrap();
        mapper.map_volume(&name("volumexyz")).unwrap();

        assert_eq!(mapper.pause_all().unwrap(), 2);
        assert_eq!(mapper.pause_all().unwrap(), 0);
        assert!(
            mapper
                .list_mapped()
                .unwrap()
                .iter()
                .all(|m| m.state.is_paused())
        );
        assert_eq!(mapper.resume_all().unwrap(), 2);
    }
}
