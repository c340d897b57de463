// src/native/mod.rs
//! Outbound interface to the native graphics subsystem.
//!
//! The driver core never talks to EGL/GLX directly. Everything it needs
//! (open a display, initialize it, enumerate configurations, create and
//! destroy contexts, query the panel geometry) goes through `NativeGraphics`.
//!
//! Handles are opaque integers. Backends own the mapping from handle to the
//! real native object.

use crate::negotiator::PixelProfile;
use anyhow::Result;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub mod headless;

#[cfg(feature = "glx")]
pub mod glx;

pub use headless::HeadlessNative;

#[cfg(feature = "glx")]
pub use glx::GlxNative;

/// Opaque native display connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayHandle(pub u64);

/// Opaque native rendering context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

/// Opaque native configuration identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigHandle(pub u64);

bitflags! {
    /// Surface kinds a configuration can render to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SurfaceFlags: u32 {
        /// Presentable to the window system.
        const WINDOW = 0x0001;
        const PIXMAP = 0x0002;
        const PBUFFER = 0x0004;
    }
}

/// Attribute record reported by the native subsystem for one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigAttribs {
    pub id: ConfigHandle,
    pub buffer_size: u32,
    pub red_size: u32,
    pub green_size: u32,
    pub blue_size: u32,
    pub alpha_size: u32,
    pub depth_size: u32,
    pub stencil_size: u32,
    pub surface_type: SurfaceFlags,
    pub native_visual_id: u32,
}

impl ConfigAttribs {
    /// Named attribute values, in the order the driver logs them.
    pub fn named_values(&self) -> [(&'static str, u32); 10] {
        [
            ("BUFFER_SIZE", self.buffer_size),
            ("RED_SIZE", self.red_size),
            ("GREEN_SIZE", self.green_size),
            ("BLUE_SIZE", self.blue_size),
            ("ALPHA_SIZE", self.alpha_size),
            ("CONFIG_ID", self.id.0 as u32),
            ("DEPTH_SIZE", self.depth_size),
            ("STENCIL_SIZE", self.stencil_size),
            ("SURFACE_TYPE", self.surface_type.bits()),
            ("NATIVE_VISUAL_ID", self.native_visual_id),
        ]
    }
}

/// Version reported by display initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeVersion {
    pub major: i32,
    pub minor: i32,
}

/// Synchronous native graphics primitives.
///
/// All calls block until the native subsystem answers. Methods take `&self`;
/// backends that track state use interior mutability since the driver is
/// single-threaded and shares one backend between device instances.
pub trait NativeGraphics {
    /// Backend name for diagnostics.
    fn name(&self) -> &str;

    fn open_display(&self) -> Result<DisplayHandle>;

    fn initialize_display(&self, display: DisplayHandle) -> Result<NativeVersion>;

    /// Terminates and closes a display previously returned by `open_display`.
    fn close_display(&self, display: DisplayHandle);

    /// Returns every configuration satisfying `profile`, in the backend's own
    /// stable order.
    fn enumerate_configurations(
        &self,
        display: DisplayHandle,
        profile: &PixelProfile,
    ) -> Result<Vec<ConfigAttribs>>;

    fn create_context(&self, display: DisplayHandle, config: ConfigHandle)
        -> Result<ContextHandle>;

    fn destroy_context(&self, display: DisplayHandle, context: ContextHandle);

    /// Native panel geometry in pixels.
    fn query_geometry(&self, display: DisplayHandle) -> Result<(u32, u32)>;
}
