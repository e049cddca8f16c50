//! blktap driver through `tap-ctl` and `/proc`

use crate::driver::{BlockDriver, MappedVolume, TapdiskState};
use crate::error::{VlmcError, VlmcResult};
use archip_common::{BlktapConfig, VolumeName};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// [`BlockDriver`] backed by blktap
#[derive(Clone, Debug)]
pub struct TapCtl {
    config: BlktapConfig,
    proc_root: PathBuf,
}

impl TapCtl {
    #[must_use]
    pub fn new(config: BlktapConfig) -> Self {
        Self::with_proc_root(config, "/proc")
    }

    /// Read kernel state from an alternative procfs mount
    #[must_use]
    pub fn with_proc_root(config: BlktapConfig, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            proc_root: proc_root.into(),
        }
    }

    fn run(&self, program: &str, args: &[&str]) -> VlmcResult<String> {
        debug!("running {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| VlmcError::driver(format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            return Err(VlmcError::driver(format!(
                "{program} {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn tap_ctl(&self, args: &[&str]) -> VlmcResult<String> {
        self.run(&self.config.tap_ctl, args)
    }

    fn read_proc(&self, name: &str) -> VlmcResult<String> {
        let path = self.proc_root.join(name);
        std::fs::read_to_string(&path)
            .map_err(|e| VlmcError::driver(format!("cannot read {}: {e}", path.display())))
    }
}

impl BlockDriver for TapCtl {
    fn module_loaded(&self) -> VlmcResult<bool> {
        let modules = self.read_proc("modules")?;
        Ok(modules
            .lines()
            .any(|line| line.split_whitespace().next() == Some(self.config.module.as_str())))
    }

    fn load_module(&self) -> VlmcResult<()> {
        info!("loading module {}", self.config.module);
        self.run("modprobe", &[self.config.module.as_str()]).map(|_| ())
    }

    fn list(&self) -> VlmcResult<Vec<MappedVolume>> {
        let output = self.tap_ctl(&["list"])?;
        Ok(parse_list(&output, &self.config))
    }

    fn create(&self, volume: &VolumeName) -> VlmcResult<String> {
        let args = format!("{}:{volume}", self.config.driver);
        let device = self.tap_ctl(&["create", "-a", &args])?.trim().to_string();
        if device.is_empty() {
            return Err(VlmcError::driver(format!("cannot map volume {volume}")));
        }
        Ok(device)
    }

    fn destroy(&self, device: &str) -> VlmcResult<()> {
        self.tap_ctl(&["destroy", "-d", device]).map(|_| ())
    }

    fn busy_pid(&self, device: &str) -> VlmcResult<Option<u32>> {
        let entries = std::fs::read_dir(&self.proc_root).map_err(|e| {
            VlmcError::driver(format!("cannot read {}: {e}", self.proc_root.display()))
        })?;

        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            // Processes we may not inspect, or that exit meanwhile, are skipped
            let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            let holds_device = fds
                .flatten()
                .filter_map(|fd| std::fs::read_link(fd.path()).ok())
                .any(|target| target == Path::new(device));
            if holds_device {
                return Ok(Some(pid));
            }
        }
        Ok(None)
    }

    fn is_mounted(&self, device: &str) -> VlmcResult<bool> {
        let mounts = self.read_proc("mounts")?;
        Ok(mounts
            .lines()
            .any(|line| line.split_whitespace().next() == Some(device)))
    }

    fn pause(&self, mapped: &MappedVolume) -> VlmcResult<()> {
        let (pid, minor) = tapdisk_ids(mapped)?;
        self.tap_ctl(&["pause", "-p", pid.as_str(), "-m", minor.as_str()]).map(|_| ())
    }

    fn unpause(&self, mapped: &MappedVolume) -> VlmcResult<()> {
        let (pid, minor) = tapdisk_ids(mapped)?;
        let mut args = vec!["unpause", "-p", pid.as_str(), "-m", minor.as_str()];
        let image = mapped
            .volume
            .as_ref()
            .map(|volume| format!("{}:{volume}", self.config.driver));
        if let Some(image) = &image {
            args.extend(["-a", image.as_str()]);
        }
        self.tap_ctl(&args).map(|_| ())
    }
}

fn tapdisk_ids(mapped: &MappedVolume) -> VlmcResult<(String, String)> {
    let pid = mapped
        .pid
        .ok_or_else(|| VlmcError::driver(format!("{} has no tapdisk process", mapped.device)))?;
    Ok((pid.to_string(), mapped.minor.to_string()))
}

fn parse_state(value: &str) -> Option<u32> {
    match value.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Parse `tap-ctl list` output.
///
/// Each line is a sequence of `key=value` fields, e.g.
/// `pid=4120 minor=0 state=0 args=archipelago:volumeabc`. Lines without a
/// minor describe tapdisks with no device attached and are skipped.
#[must_use]
pub fn parse_list(output: &str, config: &BlktapConfig) -> Vec<MappedVolume> {
    let driver_prefix = format!("{}:", config.driver);
    let mut mapped = Vec::new();

    for line in output.lines() {
        let mut minor = None;
        let mut pid = None;
        let mut state = 0;
        let mut volume = None;

        for field in line.split_whitespace() {
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            match key {
                "minor" => minor = value.parse::<u32>().ok(),
                "pid" => pid = value.parse::<u32>().ok(),
                "state" => state = parse_state(value).unwrap_or(0),
                "args" => {
                    volume = value
                        .strip_prefix(&driver_prefix)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string);
                }
                _ => {}
            }
        }

        if let Some(minor) = minor {
            mapped.push(MappedVolume {
                minor,
                volume,
                device: format!("{}{minor}", config.device_prefix),
                state: TapdiskState::from_raw(state),
                pid,
            });
        }
    }

    mapped
}
