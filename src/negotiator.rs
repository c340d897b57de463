// src/negotiator.rs
//! Capability negotiation: resolve a requested pixel-format profile to one
//! native configuration.
//!
//! The first configuration the native subsystem returns that satisfies the
//! profile wins. No re-sorting happens here; the native ordering is the
//! preference order. On success the opened display connection travels with
//! the configuration so the caller does not reopen it.

use crate::error::{DriverError, DriverResult};
use crate::native::{ConfigAttribs, ConfigHandle, DisplayHandle, NativeGraphics, SurfaceFlags};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Minimum channel depths and surface capabilities requested by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelProfile {
    pub red_size: u32,
    pub green_size: u32,
    pub blue_size: u32,
    pub alpha_size: u32,
    /// Minimum total buffer size in bits. Zero means "don't care".
    pub buffer_size: u32,
    pub surface_type: SurfaceFlags,
}

impl Default for PixelProfile {
    /// 8 bits per channel with alpha, presentable to the window system.
    fn default() -> Self {
        PixelProfile {
            red_size: 8,
            green_size: 8,
            blue_size: 8,
            alpha_size: 8,
            buffer_size: 0,
            surface_type: SurfaceFlags::WINDOW,
        }
    }
}

impl PixelProfile {
    pub fn is_satisfied_by(&self, attribs: &ConfigAttribs) -> bool {
        attribs.red_size >= self.red_size
            && attribs.green_size >= self.green_size
            && attribs.blue_size >= self.blue_size
            && attribs.alpha_size >= self.alpha_size
            && attribs.buffer_size >= self.buffer_size
            && attribs.surface_type.contains(self.surface_type)
    }
}

/// The negotiated configuration. Immutable once selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    attribs: ConfigAttribs,
}

impl Configuration {
    pub fn id(&self) -> ConfigHandle {
        self.attribs.id
    }

    pub fn attribs(&self) -> &ConfigAttribs {
        &self.attribs
    }

    /// Bits per pixel of the colour buffer.
    pub fn bits_per_pixel(&self) -> u32 {
        self.attribs.buffer_size
    }

    /// Significant colour bits (alpha excluded).
    pub fn depth(&self) -> u32 {
        self.attribs.red_size + self.attribs.green_size + self.attribs.blue_size
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.attribs.buffer_size.div_ceil(8) as usize
    }

    /// Channel masks for a packed RGB layout, red in the high bits.
    pub fn masks(&self) -> ChannelMasks {
        let a = &self.attribs;
        ChannelMasks {
            red: mask(a.red_size) << (a.green_size + a.blue_size),
            green: mask(a.green_size) << a.blue_size,
            blue: mask(a.blue_size),
        }
    }
}

fn mask(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMasks {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

impl fmt::Display for ChannelMasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R={:#x} G={:#x} B={:#x}", self.red, self.green, self.blue)
    }
}

/// An open native display connection. Closed on drop.
pub struct DisplayConnection {
    native: Rc<dyn NativeGraphics>,
    handle: DisplayHandle,
}

impl DisplayConnection {
    pub fn handle(&self) -> DisplayHandle {
        self.handle
    }

    pub fn native(&self) -> &Rc<dyn NativeGraphics> {
        &self.native
    }
}

impl fmt::Debug for DisplayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayConnection")
            .field("backend", &self.native.name())
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for DisplayConnection {
    fn drop(&mut self) {
        debug!("RPI: closing display connection {:?}", self.handle);
        self.native.close_display(self.handle);
    }
}

/// Result of a successful negotiation.
#[derive(Debug)]
pub struct Negotiated {
    pub display: DisplayConnection,
    pub config: Configuration,
}

/// Opens and initializes the native display, then picks the first
/// configuration satisfying `profile`.
///
/// On failure nothing stays open.
pub fn negotiate(native: &Rc<dyn NativeGraphics>, profile: &PixelProfile) -> DriverResult<Negotiated> {
    let handle = native
        .open_display()
        .map_err(|e| DriverError::DisplayUnavailable(format!("{:#}", e)))?;
    let display = DisplayConnection {
        native: Rc::clone(native),
        handle,
    };

    let version = native
        .initialize_display(handle)
        .map_err(|e| DriverError::DisplayUnavailable(format!("{:#}", e)))?;
    info!(
        "RPI: {} display initialized, version {}.{}",
        native.name(),
        version.major,
        version.minor
    );

    let candidates = native
        .enumerate_configurations(handle, profile)
        .map_err(|e| DriverError::DisplayUnavailable(format!("{:#}", e)))?;

    let attribs = match candidates.into_iter().find(|c| profile.is_satisfied_by(c)) {
        Some(attribs) => attribs,
        None => {
            warn!("RPI: no configuration matches {:?}", profile);
            return Err(DriverError::NoMatchingConfiguration);
        }
    };

    for (name, value) in attribs.named_values() {
        debug!("RPI: {} = {}", name, value);
    }

    Ok(Negotiated {
        display,
        config: Configuration { attribs },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::headless::{default_configs, FailurePlan};
    use crate::native::HeadlessNative;
    use test_log::test;

    fn backend(native: HeadlessNative) -> (Rc<HeadlessNative>, Rc<dyn NativeGraphics>) {
        let concrete = Rc::new(native);
        let shared: Rc<dyn NativeGraphics> = concrete.clone();
        (concrete, shared)
    }

    #[test]
    fn it_should_pick_the_first_matching_configuration() {
        let (_, native) = backend(HeadlessNative::new());
        let negotiated = negotiate(&native, &PixelProfile::default()).unwrap();
        assert_eq!(negotiated.config.id(), ConfigHandle(1));
        assert_eq!(negotiated.config.bits_per_pixel(), 32);
        assert_eq!(negotiated.config.depth(), 24);
    }

    #[test]
    fn it_should_satisfy_every_profile_constraint() {
        let (_, native) = backend(HeadlessNative::new());
        let profiles = [
            PixelProfile::default(),
            PixelProfile {
                alpha_size: 0,
                ..PixelProfile::default()
            },
            PixelProfile {
                red_size: 5,
                green_size: 6,
                blue_size: 5,
                alpha_size: 0,
                buffer_size: 16,
                surface_type: SurfaceFlags::WINDOW | SurfaceFlags::PIXMAP,
            },
        ];
        for profile in &profiles {
            let negotiated = negotiate(&native, profile).unwrap();
            assert!(profile.is_satisfied_by(negotiated.config.attribs()));
        }
    }

    #[test]
    fn it_should_preserve_native_ordering() {
        let mut configs = default_configs();
        configs.reverse();
        let (_, native) = backend(HeadlessNative::with_configs(configs));
        let profile = PixelProfile {
            red_size: 5,
            green_size: 6,
            blue_size: 5,
            alpha_size: 0,
            ..PixelProfile::default()
        };
        let negotiated = negotiate(&native, &profile).unwrap();
        // 565 is now listed first and must win even though 8888 is "better".
        assert_eq!(negotiated.config.bits_per_pixel(), 16);
    }

    #[test]
    fn it_should_release_the_display_when_nothing_matches() {
        let (concrete, native) = backend(HeadlessNative::new());
        let profile = PixelProfile {
            red_size: 10,
            ..PixelProfile::default()
        };
        let err = negotiate(&native, &profile).unwrap_err();
        assert!(matches!(err, DriverError::NoMatchingConfiguration));
        assert_eq!(concrete.open_displays(), 0);
    }

    #[test]
    fn it_should_report_display_unavailable() {
        let (concrete, native) = backend(HeadlessNative::new());
        concrete.set_failures(FailurePlan {
            initialize_display: true,
            ..Default::default()
        });
        let err = negotiate(&native, &PixelProfile::default()).unwrap_err();
        assert!(matches!(err, DriverError::DisplayUnavailable(_)));
        assert_eq!(concrete.open_displays(), 0);
    }

    #[test]
    fn it_should_compute_packed_channel_masks() {
        let (_, native) = backend(HeadlessNative::new());
        let profile = PixelProfile {
            red_size: 5,
            green_size: 6,
            blue_size: 5,
            alpha_size: 0,
            buffer_size: 0,
            surface_type: SurfaceFlags::WINDOW,
        };
        let negotiated = negotiate(&native, &profile).unwrap();
        // First match for this profile is the 8888 config.
        assert_eq!(negotiated.config.masks().red, 0x00ff_0000);

        let mut configs = default_configs();
        configs.retain(|c| c.buffer_size == 16);
        let (_, native) = backend(HeadlessNative::with_configs(configs));
        let negotiated = negotiate(&native, &profile).unwrap();
        let masks = negotiated.config.masks();
        assert_eq!(masks.red, 0xf800);
        assert_eq!(masks.green, 0x07e0);
        assert_eq!(masks.blue, 0x001f);
    }
}
