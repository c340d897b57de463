// src/modes.rs
//! Mode/geometry resolution.
//!
//! Two sources: the panel's native geometry (one mode, zoom-locked) or a
//! host-provided mode database pruned against the monitor limits. An empty
//! database after pruning falls back to `DEFAULT_MODE`.

use crate::error::{DriverError, DriverResult};
use crate::native::NativeGraphics;
use crate::negotiator::DisplayConnection;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

const DEFAULT_REFRESH_HZ: u32 = 60;

/// Built-in fallback when nothing else survives validation.
pub const DEFAULT_MODE: Mode = Mode {
    width: 640,
    height: 480,
    refresh_hz: DEFAULT_REFRESH_HZ,
};

fn default_refresh() -> u32 {
    DEFAULT_REFRESH_HZ
}

/// A display geometry. Two modes with the same width and height are the
/// same mode; `refresh_hz` only matters for monitor validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mode {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_refresh")]
    pub refresh_hz: u32,
}

impl Mode {
    pub fn new(width: u32, height: u32) -> Self {
        Mode {
            width,
            height,
            refresh_hz: DEFAULT_REFRESH_HZ,
        }
    }

    pub fn same_geometry(&self, other: &Mode) -> bool {
        self.width == other.width && self.height == other.height
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.refresh_hz)
    }
}

/// Declared monitor limits, as found in a monitor section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorLimits {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub min_refresh_hz: u32,
    pub max_refresh_hz: u32,
}

impl Default for MonitorLimits {
    fn default() -> Self {
        MonitorLimits {
            min_width: 320,
            min_height: 200,
            max_width: 2048,
            max_height: 2048,
            min_refresh_hz: 24,
            max_refresh_hz: 75,
        }
    }
}

/// Why a database mode was pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRejection {
    ZeroSize,
    TooSmall,
    TooLarge,
    RefreshOutOfRange,
    Duplicate,
}

impl MonitorLimits {
    pub fn check(&self, mode: &Mode) -> Result<(), ModeRejection> {
        if mode.width == 0 || mode.height == 0 {
            return Err(ModeRejection::ZeroSize);
        }
        if mode.width < self.min_width || mode.height < self.min_height {
            return Err(ModeRejection::TooSmall);
        }
        if mode.width > self.max_width || mode.height > self.max_height {
            return Err(ModeRejection::TooLarge);
        }
        if mode.refresh_hz < self.min_refresh_hz || mode.refresh_hz > self.max_refresh_hz {
            return Err(ModeRejection::RefreshOutOfRange);
        }
        Ok(())
    }
}

/// Where PreInit takes its modes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeSource {
    /// Ask the panel for its native geometry.
    #[default]
    Native,
    /// Validate the host mode database.
    Database,
}

/// Ordered mode list with a distinguished current entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeList {
    modes: Vec<Mode>,
    current: usize,
    zoom_locked: bool,
}

impl ModeList {
    fn new(modes: Vec<Mode>, zoom_locked: bool) -> Self {
        debug_assert!(!modes.is_empty());
        ModeList {
            modes,
            current: 0,
            zoom_locked,
        }
    }

    pub fn current(&self) -> Mode {
        self.modes[self.current]
    }

    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    #[allow(clippy::len_without_is_empty)] // never empty
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    /// Zoom-locked lists only hold the native mode; the host must not cycle.
    pub fn is_zoom_locked(&self) -> bool {
        self.zoom_locked
    }

    /// Largest width and height over all modes; the virtual screen size.
    pub fn virtual_size(&self) -> (u32, u32) {
        let width = self.modes.iter().map(|m| m.width).max().unwrap_or(0);
        let height = self.modes.iter().map(|m| m.height).max().unwrap_or(0);
        (width, height)
    }

    /// Makes the listed mode with `mode`'s geometry current. Fails if no
    /// entry has that width and height.
    pub fn select(&mut self, mode: &Mode) -> DriverResult<()> {
        match self.modes.iter().position(|m| m.same_geometry(mode)) {
            Some(index) => {
                self.current = index;
                Ok(())
            }
            None => Err(DriverError::ModeNotInList {
                width: mode.width,
                height: mode.height,
            }),
        }
    }
}

/// Inputs to mode resolution.
#[derive(Debug, Clone, Copy)]
pub struct ModeRequest<'a> {
    pub source: ModeSource,
    pub database: &'a [Mode],
    pub limits: &'a MonitorLimits,
}

/// Builds the mode list for an instance. The current mode is always the first
/// surviving entry.
pub fn resolve(display: &DisplayConnection, request: &ModeRequest<'_>) -> DriverResult<ModeList> {
    match request.source {
        ModeSource::Native => resolve_native(display.native().as_ref(), display),
        ModeSource::Database => Ok(resolve_database(request.database, request.limits)),
    }
}

fn resolve_native(native: &dyn NativeGraphics, display: &DisplayConnection) -> DriverResult<ModeList> {
    let (width, height) = native
        .query_geometry(display.handle())
        .map_err(|e| DriverError::ModeResolutionFailed(format!("{:#}", e)))?;
    if width == 0 || height == 0 {
        return Err(DriverError::ModeResolutionFailed(format!(
            "native display reported {}x{}",
            width, height
        )));
    }
    let mode = Mode::new(width, height);
    info!("RPI: native display mode {}", mode);
    Ok(ModeList::new(vec![mode], true))
}

fn resolve_database(database: &[Mode], limits: &MonitorLimits) -> ModeList {
    let mut surviving: Vec<Mode> = Vec::with_capacity(database.len());
    for mode in database {
        let verdict = if surviving.iter().any(|m| m.same_geometry(mode)) {
            Err(ModeRejection::Duplicate)
        } else {
            limits.check(mode)
        };
        match verdict {
            Ok(()) => {
                debug!("RPI: mode {} accepted", mode);
                surviving.push(*mode);
            }
            Err(reason) => debug!("RPI: mode {} pruned: {:?}", mode, reason),
        }
    }

    if surviving.is_empty() {
        warn!(
            "RPI: no usable modes in database ({} candidates), using default {}",
            database.len(),
            DEFAULT_MODE
        );
        surviving.push(DEFAULT_MODE);
    }
    ModeList::new(surviving, false)
}
