// src/native/glx.rs
#![allow(non_snake_case)] // Xlib/GLX naming

//! `NativeGraphics` over Xlib + GLX.
//!
//! Each opened display is an Xlib connection. Configurations are GLX
//! framebuffer configs identified by their `GLX_FBCONFIG_ID`; the raw
//! `GLXFBConfig` pointers from the last enumeration on a display are kept so
//! `create_context` can find them again.

use super::{ConfigAttribs, ConfigHandle, ContextHandle, DisplayHandle, NativeGraphics, NativeVersion, SurfaceFlags};
use crate::negotiator::PixelProfile;
use anyhow::{anyhow, bail, Context, Result};
use libc::c_int;
use log::{debug, info, trace, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CString;
use std::ptr;
use x11::{glx, xlib};

struct OpenDisplay {
    ptr: *mut xlib::Display,
    screen: c_int,
    configs: HashMap<u64, glx::GLXFBConfig>,
}

#[derive(Default)]
struct GlxState {
    next_handle: u64,
    displays: HashMap<u64, OpenDisplay>,
    // context -> (owning display, native context)
    contexts: HashMap<u64, (u64, glx::GLXContext)>,
}

pub struct GlxNative {
    display_name: Option<CString>,
    state: RefCell<GlxState>,
}

impl GlxNative {
    /// `display_name` of `None` uses `$DISPLAY`.
    pub fn new(display_name: Option<&str>) -> Result<Self> {
        let display_name = display_name
            .map(CString::new)
            .transpose()
            .context("Display name contains a NUL byte")?;
        Ok(Self {
            display_name,
            state: RefCell::new(GlxState {
                next_handle: 1,
                ..Default::default()
            }),
        })
    }

    fn with_display<T>(&self, display: DisplayHandle, f: impl FnOnce(&mut OpenDisplay) -> Result<T>) -> Result<T> {
        let mut state = self.state.borrow_mut();
        let open = state
            .displays
            .get_mut(&display.0)
            .ok_or_else(|| anyhow!("glx: display {} is not open", display.0))?;
        f(open)
    }

    fn attrib(dpy: *mut xlib::Display, config: glx::GLXFBConfig, name: c_int) -> Result<u32> {
        let mut value: c_int = 0;
        let status = unsafe { glx::glXGetFBConfigAttrib(dpy, config, name, &mut value) };
        if status != 0 {
            bail!("glXGetFBConfigAttrib({:#x}) failed with {}", name, status);
        }
        Ok(value.max(0) as u32)
    }

    fn describe(dpy: *mut xlib::Display, config: glx::GLXFBConfig) -> Result<ConfigAttribs> {
        let drawable = Self::attrib(dpy, config, glx::GLX_DRAWABLE_TYPE)?;
        let mut surface_type = SurfaceFlags::empty();
        if drawable & glx::GLX_WINDOW_BIT as u32 != 0 {
            surface_type |= SurfaceFlags::WINDOW;
        }
        if drawable & glx::GLX_PIXMAP_BIT as u32 != 0 {
            surface_type |= SurfaceFlags::PIXMAP;
        }
        if drawable & glx::GLX_PBUFFER_BIT as u32 != 0 {
            surface_type |= SurfaceFlags::PBUFFER;
        }
        Ok(ConfigAttribs {
            id: ConfigHandle(Self::attrib(dpy, config, glx::GLX_FBCONFIG_ID)? as u64),
            buffer_size: Self::attrib(dpy, config, glx::GLX_BUFFER_SIZE)?,
            red_size: Self::attrib(dpy, config, glx::GLX_RED_SIZE)?,
            green_size: Self::attrib(dpy, config, glx::GLX_GREEN_SIZE)?,
            blue_size: Self::attrib(dpy, config, glx::GLX_BLUE_SIZE)?,
            alpha_size: Self::attrib(dpy, config, glx::GLX_ALPHA_SIZE)?,
            depth_size: Self::attrib(dpy, config, glx::GLX_DEPTH_SIZE)?,
            stencil_size: Self::attrib(dpy, config, glx::GLX_STENCIL_SIZE)?,
            surface_type,
            native_visual_id: Self::attrib(dpy, config, glx::GLX_VISUAL_ID)?,
        })
    }
}

fn drawable_bits(flags: SurfaceFlags) -> c_int {
    let mut bits = 0;
    if flags.contains(SurfaceFlags::WINDOW) {
        bits |= glx::GLX_WINDOW_BIT;
    }
    if flags.contains(SurfaceFlags::PIXMAP) {
        bits |= glx::GLX_PIXMAP_BIT;
    }
    if flags.contains(SurfaceFlags::PBUFFER) {
        bits |= glx::GLX_PBUFFER_BIT;
    }
    bits
}

impl NativeGraphics for GlxNative {
    fn name(&self) -> &str {
        "glx"
    }

    fn open_display(&self) -> Result<DisplayHandle> {
        let name = self.display_name.as_ref().map_or(ptr::null(), |n| n.as_ptr());
        let ptr = unsafe { xlib::XOpenDisplay(name) };
        if ptr.is_null() {
            bail!("Failed to open X display. Check DISPLAY environment variable or X server status.");
        }
        let screen = unsafe { xlib::XDefaultScreen(ptr) };
        let mut state = self.state.borrow_mut();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.displays.insert(
            handle,
            OpenDisplay {
                ptr,
                screen,
                configs: HashMap::new(),
            },
        );
        debug!("glx: opened display {:p} as {}", ptr, handle);
        Ok(DisplayHandle(handle))
    }

    fn initialize_display(&self, display: DisplayHandle) -> Result<NativeVersion> {
        self.with_display(display, |open| {
            let (mut major, mut minor): (c_int, c_int) = (0, 0);
            if unsafe { glx::glXQueryVersion(open.ptr, &mut major, &mut minor) } == 0 {
                bail!("glXQueryVersion failed; is the GLX extension present?");
            }
            info!("glx: GLX {}.{} on display {}", major, minor, display.0);
            Ok(NativeVersion { major, minor })
        })
    }

    fn close_display(&self, display: DisplayHandle) {
        let mut state = self.state.borrow_mut();
        let Some(open) = state.displays.remove(&display.0) else {
            warn!("glx: close of unknown display {}", display.0);
            return;
        };
        let status = unsafe { xlib::XCloseDisplay(open.ptr) };
        if status != 0 {
            warn!("XCloseDisplay returned non-zero status: {}", status);
        }
        trace!("glx: closed display {}", display.0);
    }

    fn enumerate_configurations(&self, display: DisplayHandle, profile: &PixelProfile) -> Result<Vec<ConfigAttribs>> {
        self.with_display(display, |open| {
            let attribs: [c_int; 15] = [
                glx::GLX_RED_SIZE,
                profile.red_size as c_int,
                glx::GLX_GREEN_SIZE,
                profile.green_size as c_int,
                glx::GLX_BLUE_SIZE,
                profile.blue_size as c_int,
                glx::GLX_ALPHA_SIZE,
                profile.alpha_size as c_int,
                glx::GLX_BUFFER_SIZE,
                profile.buffer_size as c_int,
                glx::GLX_DRAWABLE_TYPE,
                drawable_bits(profile.surface_type),
                glx::GLX_RENDER_TYPE,
                glx::GLX_RGBA_BIT,
                0,
            ];
            let mut count: c_int = 0;
            let list = unsafe { glx::glXChooseFBConfig(open.ptr, open.screen, attribs.as_ptr(), &mut count) };
            if list.is_null() || count <= 0 {
                debug!("glx: no framebuffer configs match {:?}", profile);
                return Ok(Vec::new());
            }

            let raw = unsafe { std::slice::from_raw_parts(list, count as usize) };
            let mut found = Vec::with_capacity(raw.len());
            open.configs.clear();
            let mut result = Ok(());
            for &config in raw {
                match Self::describe(open.ptr, config) {
                    Ok(attribs) => {
                        open.configs.insert(attribs.id.0, config);
                        found.push(attribs);
                    }
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            unsafe { xlib::XFree(list as *mut _) };
            result?;
            debug!("glx: {} framebuffer configs match", found.len());
            Ok(found)
        })
    }

    fn create_context(&self, display: DisplayHandle, config: ConfigHandle) -> Result<ContextHandle> {
        let (dpy, context) = self.with_display(display, |open| {
            let fbconfig = *open
                .configs
                .get(&config.0)
                .ok_or_else(|| anyhow!("glx: configuration {:#x} was not enumerated", config.0))?;
            let context = unsafe {
                glx::glXCreateNewContext(open.ptr, fbconfig, glx::GLX_RGBA_TYPE, ptr::null_mut(), xlib::True)
            };
            if context.is_null() {
                bail!("glXCreateNewContext failed for configuration {:#x}", config.0);
            }
            Ok((open.ptr, context))
        })?;
        let mut state = self.state.borrow_mut();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.contexts.insert(handle, (display.0, context));
        debug!("glx: created context {:p} on {:p} as {}", context, dpy, handle);
        Ok(ContextHandle(handle))
    }

    fn destroy_context(&self, display: DisplayHandle, context: ContextHandle) {
        let mut state = self.state.borrow_mut();
        let Some((owner, native)) = state.contexts.remove(&context.0) else {
            warn!("glx: destroy of unknown context {}", context.0);
            return;
        };
        if owner != display.0 {
            warn!("glx: context {} belonged to display {}, not {}", context.0, owner, display.0);
        }
        match state.displays.get(&owner) {
            Some(open) => unsafe { glx::glXDestroyContext(open.ptr, native) },
            None => warn!("glx: context {} outlived display {}", context.0, owner),
        }
    }

    fn query_geometry(&self, display: DisplayHandle) -> Result<(u32, u32)> {
        self.with_display(display, |open| {
            let width = unsafe { xlib::XDisplayWidth(open.ptr, open.screen) };
            let height = unsafe { xlib::XDisplayHeight(open.ptr, open.screen) };
            Ok((width.max(0) as u32, height.max(0) as u32))
        })
    }
}

impl Drop for GlxNative {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (handle, (owner, native)) in state.contexts.drain() {
            if let Some(open) = state.displays.get(&owner) {
                warn!("glx: destroying leaked context {}", handle);
                unsafe { glx::glXDestroyContext(open.ptr, native) };
            }
        }
        for (handle, open) in state.displays.drain() {
            warn!("glx: closing leaked display {}", handle);
            unsafe { xlib::XCloseDisplay(open.ptr) };
        }
    }
}
