// src/config.rs

//! Host configuration consumed by the driver.
//!
//! Stands in for the host's configuration layer: device sections naming the
//! driver, the monitor section, the mode database and a few driver-level
//! knobs. Everything deserializes from JSON and every field has a default, so
//! an empty object is a valid configuration.

use crate::dispatch::NativeCaps;
use crate::driver::DRIVER_NAME;
use crate::modes::{Mode, ModeSource, MonitorLimits};
use crate::negotiator::PixelProfile;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root of the host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Device sections; Probe claims the ones whose `driver` matches.
    pub device_sections: Vec<DeviceSection>,
    /// Pixel format requested during PreInit.
    pub profile: PixelProfile,
    pub mode_source: ModeSource,
    /// Mode database, used when `mode_source` is `database`.
    pub modes: Vec<Mode>,
    pub monitor: MonitorLimits,
    /// Optional memory-mapped framebuffer.
    pub framebuffer: Option<FramebufferConfig>,
    /// Upper bound on the event-loop wait while drawing damage is pending.
    pub poll_interval_ms: u64,
    pub variant: VariantConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            device_sections: vec![DeviceSection::default()],
            profile: PixelProfile::default(),
            mode_source: ModeSource::Native,
            modes: Vec::new(),
            monitor: MonitorLimits::default(),
            framebuffer: None,
            poll_interval_ms: 16,
            variant: VariantConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse host configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// One "Device" section of the host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub identifier: String,
    pub driver: String,
    /// Raw option values keyed by option name, e.g. `"NoAccel": "on"`.
    pub options: BTreeMap<String, String>,
}

impl Default for DeviceSection {
    fn default() -> Self {
        DeviceSection {
            identifier: "Raspberry Pi".to_string(),
            driver: DRIVER_NAME.to_string(),
            options: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramebufferConfig {
    pub path: PathBuf,
    /// Mapping length in bytes.
    pub size: usize,
}

/// What the hardware variant supports. Selected at build of the driver
/// instance, never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantConfig {
    pub name: String,
    /// Accepted bits per pixel.
    pub depths: Vec<u32>,
    pub caps: NativeCaps,
}

impl Default for VariantConfig {
    fn default() -> Self {
        VariantConfig {
            name: "rpivc4".to_string(),
            depths: vec![16, 24, 32],
            caps: NativeCaps::all(),
        }
    }
}
