// src/resources.rs
//! The resource bundle: every native handle a device instance owns.
//!
//! Creation order is display connection, configuration, rendering context,
//! then (optionally) the mapped framebuffer. `release` tears down in exactly
//! the reverse order and only touches what was actually acquired, so it is
//! safe on a partially built bundle and safe to call repeatedly. Dropping a
//! bundle releases it.

use crate::error::{DriverError, DriverResult};
use crate::native::{ContextHandle, NativeGraphics};
use crate::negotiator::{negotiate, Configuration, DisplayConnection, PixelProfile};
use log::{debug, info, warn};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use std::ffi::c_void;
use std::fs::OpenOptions;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::rc::Rc;

/// A rendering context bound to one configuration and one display.
#[derive(Debug)]
pub struct RenderingContext {
    handle: ContextHandle,
}

impl RenderingContext {
    pub fn handle(&self) -> ContextHandle {
        self.handle
    }
}

/// A fixed-size linear framebuffer mapped with `mmap`. Unmapped on drop.
#[derive(Debug)]
pub struct FramebufferMapping {
    path: PathBuf,
    addr: NonNull<c_void>,
    len: NonZeroUsize,
}

impl FramebufferMapping {
    fn map(path: &Path, len: usize) -> DriverResult<Self> {
        let len = NonZeroUsize::new(len).ok_or_else(|| {
            DriverError::FramebufferMapFailed("framebuffer size must be non-zero".to_string())
        })?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DriverError::FramebufferMapFailed(format!("{}: {}", path.display(), e)))?;

        // Regular files report a length; mapping past it would fault on access.
        let metadata = file
            .metadata()
            .map_err(|e| DriverError::FramebufferMapFailed(format!("{}: {}", path.display(), e)))?;
        if metadata.is_file() && (metadata.len() as usize) < len.get() {
            return Err(DriverError::FramebufferMapFailed(format!(
                "{} is {} bytes, need {}",
                path.display(),
                metadata.len(),
                len
            )));
        }

        let addr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0 as libc::off_t,
            )
        }
        .map_err(|e| DriverError::FramebufferMapFailed(format!("{}: {}", path.display(), e)))?;

        info!(
            "RPI: mapped framebuffer {} ({} bytes) at {:p}",
            path.display(),
            len,
            addr
        );
        Ok(Self {
            path: path.to_path_buf(),
            addr,
            len,
        })
    }

    #[allow(clippy::len_without_is_empty)] // mappings are never empty
    pub fn len(&self) -> usize {
        self.len.get()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // The mapping is live for as long as `self` and exclusively borrowed here.
        unsafe { std::slice::from_raw_parts_mut(self.addr.as_ptr() as *mut u8, self.len.get()) }
    }
}

impl Drop for FramebufferMapping {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.addr, self.len.get()) } {
            warn!("RPI: munmap of {} failed: {}", self.path.display(), e);
        } else {
            debug!("RPI: unmapped framebuffer {}", self.path.display());
        }
    }
}

/// Native handles owned by one device instance.
#[derive(Debug)]
pub struct ResourceBundle {
    framebuffer: Option<FramebufferMapping>,
    context: Option<RenderingContext>,
    config: Option<Rc<Configuration>>,
    display: Option<DisplayConnection>,
}

impl ResourceBundle {
    /// Negotiates a configuration and creates a rendering context for it.
    ///
    /// If context creation fails the display connection opened during
    /// negotiation is closed before the error is returned.
    pub fn acquire(native: &Rc<dyn NativeGraphics>, profile: &PixelProfile) -> DriverResult<Self> {
        let negotiated = negotiate(native, profile)?;
        let display = negotiated.display;
        let config = Rc::new(negotiated.config);

        let handle = match native.create_context(display.handle(), config.id()) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("RPI: no context! {:#}", e);
                drop(display);
                return Err(DriverError::ContextCreationFailed(format!("{:#}", e)));
            }
        };
        info!("RPI: context created {:?}", handle);

        Ok(Self {
            framebuffer: None,
            context: Some(RenderingContext { handle }),
            config: Some(config),
            display: Some(display),
        })
    }

    /// Maps a fixed-size linear framebuffer. A second call while a mapping is
    /// held is a successful no-op.
    pub fn map_framebuffer(&mut self, path: &Path, len: usize) -> DriverResult<()> {
        if self.display.is_none() {
            return Err(DriverError::FramebufferMapFailed(
                "bundle already released".to_string(),
            ));
        }
        if let Some(existing) = &self.framebuffer {
            debug!(
                "RPI: framebuffer {} already mapped, ignoring",
                existing.path().display()
            );
            return Ok(());
        }
        self.framebuffer = Some(FramebufferMapping::map(path, len)?);
        Ok(())
    }

    /// Releases framebuffer, context, configuration and display, in that order.
    pub fn release(&mut self) {
        if self.display.is_none() && self.context.is_none() && self.framebuffer.is_none() {
            return;
        }
        debug!("RPI: releasing resource bundle");

        self.framebuffer.take();

        if let Some(context) = self.context.take() {
            match &self.display {
                Some(display) => display.native().destroy_context(display.handle(), context.handle),
                None => warn!("RPI: context {:?} outlived its display", context.handle),
            }
        }

        self.config.take();
        self.display.take();
    }

    pub fn is_released(&self) -> bool {
        self.display.is_none()
    }

    pub fn config(&self) -> Option<&Rc<Configuration>> {
        self.config.as_ref()
    }

    pub fn context(&self) -> Option<&RenderingContext> {
        self.context.as_ref()
    }

    pub fn display(&self) -> Option<&DisplayConnection> {
        self.display.as_ref()
    }

    pub fn framebuffer(&self) -> Option<&FramebufferMapping> {
        self.framebuffer.as_ref()
    }

    pub fn framebuffer_mut(&mut self) -> Option<&mut FramebufferMapping> {
        self.framebuffer.as_mut()
    }
}

impl Drop for ResourceBundle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::headless::FailurePlan;
    use crate::native::HeadlessNative;
    use std::fs::File;
    use test_log::test;

    fn backend() -> (Rc<HeadlessNative>, Rc<dyn NativeGraphics>) {
        let concrete = Rc::new(HeadlessNative::new());
        let shared: Rc<dyn NativeGraphics> = concrete.clone();
        (concrete, shared)
    }

    fn scratch_file(name: &str, len: u64) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rpi-video-{}-{}", std::process::id(), name));
        let file = File::create(&path).unwrap();
        file.set_len(len).unwrap();
        path
    }

    #[test]
    fn it_should_acquire_display_config_and_context() {
        let (concrete, native) = backend();
        let bundle = ResourceBundle::acquire(&native, &PixelProfile::default()).unwrap();
        assert!(bundle.display().is_some());
        assert!(bundle.context().is_some());
        assert_eq!(bundle.config().unwrap().bits_per_pixel(), 32);
        assert_eq!(concrete.open_displays(), 1);
        assert_eq!(concrete.live_contexts(), 1);
    }

    #[test]
    fn it_should_close_the_display_when_context_creation_fails() {
        let (concrete, native) = backend();
        concrete.set_failures(FailurePlan {
            create_context: true,
            ..Default::default()
        });
        let err = ResourceBundle::acquire(&native, &PixelProfile::default()).unwrap_err();
        assert!(matches!(err, DriverError::ContextCreationFailed(_)));
        assert_eq!(concrete.open_displays(), 0);
        assert_eq!(concrete.live_contexts(), 0);
    }

    #[test]
    fn it_should_release_idempotently() {
        let (concrete, native) = backend();
        let mut bundle = ResourceBundle::acquire(&native, &PixelProfile::default()).unwrap();

        bundle.release();
        assert!(bundle.is_released());
        assert_eq!(concrete.open_displays(), 0);
        assert_eq!(concrete.live_contexts(), 0);

        bundle.release();
        assert!(bundle.is_released());
        assert!(bundle.config().is_none());
        assert_eq!(concrete.open_displays(), 0);
        assert_eq!(concrete.live_contexts(), 0);
    }

    #[test]
    fn it_should_release_on_drop() {
        let (concrete, native) = backend();
        {
            let _bundle = ResourceBundle::acquire(&native, &PixelProfile::default()).unwrap();
            assert_eq!(concrete.live_contexts(), 1);
        }
        assert_eq!(concrete.open_displays(), 0);
        assert_eq!(concrete.live_contexts(), 0);
    }

    #[test]
    fn it_should_map_the_framebuffer_once() {
        let (_, native) = backend();
        let path = scratch_file("fb-once", 4096);
        let mut bundle = ResourceBundle::acquire(&native, &PixelProfile::default()).unwrap();

        bundle.map_framebuffer(&path, 4096).unwrap();
        let first = bundle.framebuffer().unwrap().as_ptr_for_test();
        bundle.map_framebuffer(&path, 4096).unwrap();
        assert_eq!(bundle.framebuffer().unwrap().as_ptr_for_test(), first);

        let fb = bundle.framebuffer_mut().unwrap();
        fb.as_mut_slice()[0] = 0xab;
        assert_eq!(fb.as_mut_slice()[0], 0xab);

        bundle.release();
        assert!(bundle.framebuffer().is_none());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn it_should_reject_a_framebuffer_file_that_is_too_short() {
        let (_, native) = backend();
        let path = scratch_file("fb-short", 16);
        let mut bundle = ResourceBundle::acquire(&native, &PixelProfile::default()).unwrap();
        let err = bundle.map_framebuffer(&path, 4096).unwrap_err();
        assert!(matches!(err, DriverError::FramebufferMapFailed(_)));
        assert!(bundle.framebuffer().is_none());
        std::fs::remove_file(path).ok();
    }

    impl FramebufferMapping {
        fn as_ptr_for_test(&self) -> *const c_void {
            self.addr.as_ptr()
        }
    }
}
