// src/screen.rs
//! Per-screen state built by ScreenInit.
//!
//! `build_screen` runs every sub-step into locals and only returns a
//! `ScreenState` once all of them succeeded, so a failed ScreenInit never
//! leaves a half-built table or visual list behind.

use crate::dispatch::{self, DispatchPolicy, DispatchTable, PrimitiveArgs, PrimitiveOp, PrimitiveReply};
use crate::error::{DriverError, DriverResult};
use crate::modes::{Mode, ModeList};
use crate::negotiator::{ChannelMasks, Configuration};
use crate::rasterizer::SoftwareRasterizer;
use crate::resources::FramebufferMapping;
use crate::surface::{Surface, SurfaceState};
use log::{debug, info, trace};

const DEFAULT_COLORMAP_ID: u32 = 0x20;
const FALLBACK_VISUAL_ID: u32 = 0x21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubpixelOrder {
    Unknown,
    HorizontalRgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualClass {
    TrueColor,
    PseudoColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visual {
    pub id: u32,
    pub class: VisualClass,
    pub depth: u32,
    pub bits_per_rgb: u32,
    pub colormap_entries: u32,
    pub masks: ChannelMasks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Colormap {
    pub id: u32,
    pub visual: u32,
    pub installed: bool,
}

/// Top-left corner of the visible area inside the virtual screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
}

/// Everything ScreenInit needs from the instance.
pub struct ScreenParams<'a> {
    pub config: &'a Configuration,
    pub modes: &'a ModeList,
    pub policy: DispatchPolicy,
    pub rasterizer: &'a dyn SoftwareRasterizer,
    /// Length of the mapped framebuffer, if the instance has one.
    pub framebuffer_len: Option<usize>,
}

#[derive(Debug)]
pub struct ScreenState {
    subpixel: SubpixelOrder,
    visuals: Vec<Visual>,
    root_visual: u32,
    colormap: Colormap,
    table: DispatchTable,
    /// Backing store when there is no mapped framebuffer.
    shadow: Option<Box<[u8]>>,
    surface_state: SurfaceState,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
    mode: Mode,
    viewport: Viewport,
}

pub fn build_screen(params: &ScreenParams<'_>) -> DriverResult<ScreenState> {
    let subpixel = init_picture();
    let visuals = init_visuals(params.config)?;
    let root_visual = visuals[0].id;
    let colormap = install_default_colormap(&visuals[0]);
    let table = dispatch::build(&params.policy, params.rasterizer)?;

    let (width, height) = params.modes.virtual_size();
    let bytes_per_pixel = params.config.bytes_per_pixel();
    let needed = width as usize * height as usize * bytes_per_pixel;
    let shadow = match params.framebuffer_len {
        Some(len) if len < needed => {
            return Err(DriverError::FramebufferMapFailed(format!(
                "framebuffer holds {} bytes, a {}x{} screen needs {}",
                len, width, height, needed
            )));
        }
        Some(_) => None,
        None => {
            debug!("RPI: allocating {} byte shadow buffer", needed);
            Some(vec![0u8; needed].into_boxed_slice())
        }
    };

    info!(
        "RPI: screen {}x{} at {} bpp, root visual {:#x}",
        width,
        height,
        params.config.bits_per_pixel(),
        root_visual
    );
    Ok(ScreenState {
        subpixel,
        visuals,
        root_visual,
        colormap,
        table,
        shadow,
        surface_state: SurfaceState::default(),
        width,
        height,
        bytes_per_pixel,
        mode: params.modes.current(),
        viewport: Viewport::default(),
    })
}

fn init_picture() -> SubpixelOrder {
    debug!("RPI: picture init, subpixel order horizontal RGB");
    SubpixelOrder::HorizontalRgb
}

fn init_visuals(config: &Configuration) -> DriverResult<Vec<Visual>> {
    let attribs = config.attribs();
    let bpp = config.bits_per_pixel();
    let id = match attribs.native_visual_id {
        0 => FALLBACK_VISUAL_ID,
        id => id,
    };
    let bits_per_rgb = attribs.red_size.max(attribs.green_size).max(attribs.blue_size);

    let visual = match bpp {
        8 => Visual {
            id,
            class: VisualClass::PseudoColor,
            depth: 8,
            bits_per_rgb: 8,
            colormap_entries: 256,
            masks: ChannelMasks::default(),
        },
        16 | 24 | 32 => {
            if config.depth() == 0 || config.depth() > bpp {
                return Err(DriverError::VisualInitFailed(format!(
                    "depth {} does not fit {} bits per pixel",
                    config.depth(),
                    bpp
                )));
            }
            Visual {
                id,
                class: VisualClass::TrueColor,
                depth: config.depth(),
                bits_per_rgb,
                colormap_entries: 1 << bits_per_rgb,
                masks: config.masks(),
            }
        }
        other => {
            return Err(DriverError::VisualInitFailed(format!(
                "no visual class for {} bits per pixel",
                other
            )));
        }
    };
    debug!("RPI: visual {:#x} {:?} masks {}", visual.id, visual.class, visual.masks);
    Ok(vec![visual])
}

fn install_default_colormap(visual: &Visual) -> Colormap {
    debug!("RPI: installing default colormap for visual {:#x}", visual.id);
    Colormap {
        id: DEFAULT_COLORMAP_ID,
        visual: visual.id,
        installed: true,
    }
}

impl ScreenState {
    pub fn subpixel_order(&self) -> SubpixelOrder {
        self.subpixel
    }

    pub fn visuals(&self) -> &[Visual] {
        &self.visuals
    }

    pub fn root_visual(&self) -> u32 {
        self.root_visual
    }

    pub fn default_colormap(&self) -> &Colormap {
        &self.colormap
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn has_shadow(&self) -> bool {
        self.shadow.is_some()
    }

    pub fn pending_damage(&self) -> u32 {
        self.surface_state.damage
    }

    pub fn take_damage(&mut self) -> u32 {
        std::mem::take(&mut self.surface_state.damage)
    }

    /// Makes `mode` the visible mode and pulls the viewport back inside the
    /// virtual screen if it no longer fits.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.viewport = self.clamp_viewport(self.viewport.x as i64, self.viewport.y as i64);
    }

    pub fn adjust_frame(&mut self, x: i32, y: i32) -> Viewport {
        self.viewport = self.clamp_viewport(x as i64, y as i64);
        self.viewport
    }

    fn clamp_viewport(&self, x: i64, y: i64) -> Viewport {
        let max_x = self.width.saturating_sub(self.mode.width) as i64;
        let max_y = self.height.saturating_sub(self.mode.height) as i64;
        Viewport {
            x: x.clamp(0, max_x) as u32,
            y: y.clamp(0, max_y) as u32,
        }
    }

    /// Runs one primitive against the framebuffer, or the shadow buffer when
    /// there is none. Successful drawing ops leave damage for WakeupHandler.
    pub fn dispatch(
        &mut self,
        framebuffer: Option<&mut FramebufferMapping>,
        op: PrimitiveOp,
        args: &PrimitiveArgs<'_>,
    ) -> DriverResult<PrimitiveReply> {
        let ScreenState {
            table,
            shadow,
            surface_state,
            width,
            height,
            bytes_per_pixel,
            ..
        } = self;
        let pixels: &mut [u8] = match (framebuffer, shadow.as_deref_mut()) {
            (Some(fb), _) => fb.as_mut_slice(),
            (None, Some(shadow)) => shadow,
            (None, None) => {
                return Err(DriverError::PrimitiveRejected {
                    op,
                    reason: "screen has no pixel storage".to_string(),
                })
            }
        };
        let mut surface = Surface::new(pixels, *width, *height, *bytes_per_pixel, surface_state);
        let reply = table.invoke(op, &mut surface, args)?;
        if op.is_drawing() {
            surface.state.damage = surface.state.damage.saturating_add(1);
        }
        trace!("RPI: {:?} -> {:?}", op, reply);
        Ok(reply)
    }
}
