// src/native/headless.rs
//! Headless in-memory native backend.
//!
//! Used by the demo host and by tests. It hands out monotonically increasing
//! handles, keeps a count of everything still open, and can be told to fail
//! any individual call.

use crate::native::{
    ConfigAttribs, ConfigHandle, ContextHandle, DisplayHandle, NativeGraphics, NativeVersion,
    SurfaceFlags,
};
use crate::negotiator::PixelProfile;
use anyhow::{anyhow, bail, Result};
use log::{debug, trace, warn};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

const DEFAULT_GEOMETRY: (u32, u32) = (1920, 1080);

/// Which native calls should fail on their next invocation(s).
#[derive(Debug, Clone, Copy, Default)]
pub struct FailurePlan {
    pub open_display: bool,
    pub initialize_display: bool,
    pub enumerate: bool,
    pub create_context: bool,
    pub query_geometry: bool,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_handle: u64,
    open_displays: HashSet<u64>,
    initialized: HashSet<u64>,
    // context -> owning display
    contexts: HashMap<u64, u64>,
}

pub struct HeadlessNative {
    configs: Vec<ConfigAttribs>,
    geometry: Cell<(u32, u32)>,
    failures: Cell<FailurePlan>,
    state: RefCell<HeadlessState>,
}

impl HeadlessNative {
    /// Backend exposing the usual VideoCore set: RGBA8888, RGB888 and RGB565,
    /// all window-capable.
    pub fn new() -> Self {
        Self::with_configs(default_configs())
    }

    pub fn with_configs(configs: Vec<ConfigAttribs>) -> Self {
        Self {
            configs,
            geometry: Cell::new(DEFAULT_GEOMETRY),
            failures: Cell::new(FailurePlan::default()),
            state: RefCell::new(HeadlessState {
                next_handle: 1,
                ..Default::default()
            }),
        }
    }

    pub fn set_geometry(&self, width: u32, height: u32) {
        self.geometry.set((width, height));
    }

    pub fn set_failures(&self, plan: FailurePlan) {
        self.failures.set(plan);
    }

    /// Displays opened and not yet closed.
    pub fn open_displays(&self) -> usize {
        self.state.borrow().open_displays.len()
    }

    /// Contexts created and not yet destroyed.
    pub fn live_contexts(&self) -> usize {
        self.state.borrow().contexts.len()
    }

    fn allocate_handle(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        let handle = state.next_handle;
        state.next_handle += 1;
        handle
    }
}

impl Default for HeadlessNative {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeGraphics for HeadlessNative {
    fn name(&self) -> &str {
        "headless"
    }

    fn open_display(&self) -> Result<DisplayHandle> {
        if self.failures.get().open_display {
            bail!("headless: open_display failure injected");
        }
        let handle = self.allocate_handle();
        self.state.borrow_mut().open_displays.insert(handle);
        trace!("HeadlessNative: opened display {}", handle);
        Ok(DisplayHandle(handle))
    }

    fn initialize_display(&self, display: DisplayHandle) -> Result<NativeVersion> {
        if self.failures.get().initialize_display {
            bail!("headless: initialize_display failure injected");
        }
        let mut state = self.state.borrow_mut();
        if !state.open_displays.contains(&display.0) {
            bail!("headless: display {} is not open", display.0);
        }
        state.initialized.insert(display.0);
        Ok(NativeVersion { major: 1, minor: 4 })
    }

    fn close_display(&self, display: DisplayHandle) {
        let mut state = self.state.borrow_mut();
        if !state.open_displays.remove(&display.0) {
            warn!("HeadlessNative: close of unknown display {}", display.0);
            return;
        }
        state.initialized.remove(&display.0);
        let orphaned = state.contexts.values().filter(|d| **d == display.0).count();
        if orphaned > 0 {
            warn!(
                "HeadlessNative: display {} closed with {} live context(s)",
                display.0, orphaned
            );
        }
        trace!("HeadlessNative: closed display {}", display.0);
    }

    fn enumerate_configurations(
        &self,
        display: DisplayHandle,
        profile: &PixelProfile,
    ) -> Result<Vec<ConfigAttribs>> {
        if self.failures.get().enumerate {
            bail!("headless: enumerate_configurations failure injected");
        }
        if !self.state.borrow().initialized.contains(&display.0) {
            bail!("headless: display {} is not initialized", display.0);
        }
        let matches: Vec<ConfigAttribs> = self
            .configs
            .iter()
            .filter(|c| profile.is_satisfied_by(c))
            .cloned()
            .collect();
        debug!(
            "HeadlessNative: {} of {} configurations match {:?}",
            matches.len(),
            self.configs.len(),
            profile
        );
        Ok(matches)
    }

    fn create_context(
        &self,
        display: DisplayHandle,
        config: ConfigHandle,
    ) -> Result<ContextHandle> {
        if self.failures.get().create_context {
            bail!("headless: create_context failure injected");
        }
        if !self.configs.iter().any(|c| c.id == config) {
            return Err(anyhow!("headless: unknown configuration {}", config.0));
        }
        if !self.state.borrow().initialized.contains(&display.0) {
            bail!("headless: display {} is not initialized", display.0);
        }
        let handle = self.allocate_handle();
        self.state.borrow_mut().contexts.insert(handle, display.0);
        trace!("HeadlessNative: created context {} on display {}", handle, display.0);
        Ok(ContextHandle(handle))
    }

    fn destroy_context(&self, display: DisplayHandle, context: ContextHandle) {
        match self.state.borrow_mut().contexts.remove(&context.0) {
            Some(owner) if owner == display.0 => {
                trace!("HeadlessNative: destroyed context {}", context.0)
            }
            Some(owner) => warn!(
                "HeadlessNative: context {} belonged to display {}, not {}",
                context.0, owner, display.0
            ),
            None => warn!("HeadlessNative: destroy of unknown context {}", context.0),
        }
    }

    fn query_geometry(&self, display: DisplayHandle) -> Result<(u32, u32)> {
        if self.failures.get().query_geometry {
            bail!("headless: query_geometry failure injected");
        }
        if !self.state.borrow().open_displays.contains(&display.0) {
            bail!("headless: display {} is not open", display.0);
        }
        Ok(self.geometry.get())
    }
}

fn config(id: u64, rgba: [u32; 4], buffer_size: u32, visual: u32) -> ConfigAttribs {
    ConfigAttribs {
        id: ConfigHandle(id),
        buffer_size,
        red_size: rgba[0],
        green_size: rgba[1],
        blue_size: rgba[2],
        alpha_size: rgba[3],
        depth_size: 24,
        stencil_size: 8,
        surface_type: SurfaceFlags::WINDOW | SurfaceFlags::PIXMAP | SurfaceFlags::PBUFFER,
        native_visual_id: visual,
    }
}

pub fn default_configs() -> Vec<ConfigAttribs> {
    vec![
        config(1, [8, 8, 8, 8], 32, 0x21),
        config(2, [8, 8, 8, 0], 24, 0x22),
        config(3, [5, 6, 5, 0], 16, 0x23),
    ]
}
